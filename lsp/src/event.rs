//! Auto-reset event that releases every waiter at once.
//!
//! `set()` with nobody waiting is remembered and completes the next single
//! `wait()`. `set()` with waiters parked releases all of them and leaves the
//! event unsignaled.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::oneshot;

#[derive(Default)]
struct EventState {
    signaled: bool,
    waiters: Vec<oneshot::Sender<()>>,
}

#[derive(Default)]
pub struct ReleaseAllAutoResetEvent {
    state: Mutex<EventState>,
}

impl ReleaseAllAutoResetEvent {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register as a waiter.
    ///
    /// Registration happens here, not on first poll, so a `set()` between
    /// this call and awaiting the future is not lost.
    #[must_use]
    pub fn wait(&self) -> EventWait {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.signaled {
            state.signaled = false;
            return EventWait { rx: None };
        }
        // Drop senders whose wait future is gone.
        state.waiters.retain(|tx| !tx.is_closed());
        let (tx, rx) = oneshot::channel();
        state.waiters.push(tx);
        EventWait { rx: Some(rx) }
    }

    pub fn set(&self) {
        let waiters = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut state.waiters)
        };

        // Waiters whose future was dropped don't count as released.
        let released = waiters
            .into_iter()
            .fold(0usize, |n, tx| n + usize::from(tx.send(()).is_ok()));

        if released == 0 {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.signaled = true;
        }
    }

    #[must_use]
    pub fn is_signaled(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .signaled
    }

    /// Registered waiters, including abandoned ones not yet pruned by the
    /// next `wait()` or `set()`.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .waiters
            .len()
    }
}

/// Future returned by [`ReleaseAllAutoResetEvent::wait`].
pub struct EventWait {
    rx: Option<oneshot::Receiver<()>>,
}

impl Future for EventWait {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match self.rx.as_mut() {
            None => Poll::Ready(()),
            Some(rx) => match Pin::new(rx).poll(cx) {
                // A closed sender can only mean the event itself is gone.
                Poll::Ready(_) => {
                    self.rx = None;
                    Poll::Ready(())
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}
