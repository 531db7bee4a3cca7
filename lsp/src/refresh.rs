//! Global invalidation and debounced client refresh notifications.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::workspace::WorkspaceChange;

const REFRESH_CHANNEL_CAPACITY: usize = 16;

const NOTIFY_CHANNEL_CAPACITY: usize = 4;

/// Owns the global state version.
///
/// Every cached version key folds this value in, so bumping it makes every
/// source look stale on its next pull.
pub struct Refresher {
    global_state_version: AtomicU64,
    requested: broadcast::Sender<()>,
}

impl Default for Refresher {
    fn default() -> Self {
        Self::new()
    }
}

impl Refresher {
    #[must_use]
    pub fn new() -> Self {
        let (requested, _) = broadcast::channel(REFRESH_CHANNEL_CAPACITY);
        Self {
            global_state_version: AtomicU64::new(0),
            requested,
        }
    }

    #[must_use]
    pub fn global_state_version(&self) -> u64 {
        self.global_state_version.load(Ordering::SeqCst)
    }

    /// Invalidate every cached result and tell subscribers about it.
    pub fn request_workspace_refresh(&self) {
        let version = self.global_state_version.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(global_state_version = version, "Workspace refresh requested");
        // No subscribers is fine.
        let _ = self.requested.send(());
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.requested.subscribe()
    }
}

/// Turns refresh requests and workspace edits into debounced notifications.
///
/// Every event calls `on_change` right away (parked long-polls wake up
/// immediately); the outbound notification waits for `debounce` of quiet,
/// each new event restarting the window, and is sent once per burst.
pub struct RefreshQueue {
    handle: JoinHandle<()>,
}

impl RefreshQueue {
    pub fn spawn(
        refresher: &Refresher,
        changes: broadcast::Receiver<WorkspaceChange>,
        debounce: Duration,
        on_change: Arc<dyn Fn() + Send + Sync>,
    ) -> (Self, mpsc::Receiver<()>) {
        let (notify_tx, notify_rx) = mpsc::channel(NOTIFY_CHANNEL_CAPACITY);
        let refreshes = refresher.subscribe();
        let handle = tokio::spawn(run_queue(refreshes, changes, debounce, on_change, notify_tx));
        (Self { handle }, notify_rx)
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for RefreshQueue {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Outcome of one receive on a broadcast source.
fn observe<T>(result: Result<T, broadcast::error::RecvError>) -> Option<bool> {
    match result {
        Ok(_) => Some(true),
        // Missed events still mean something changed.
        Err(broadcast::error::RecvError::Lagged(n)) => {
            tracing::trace!(skipped = n, "Refresh queue lagged");
            Some(true)
        }
        Err(broadcast::error::RecvError::Closed) => None,
    }
}

async fn run_queue(
    mut refreshes: broadcast::Receiver<()>,
    mut changes: broadcast::Receiver<WorkspaceChange>,
    debounce: Duration,
    on_change: Arc<dyn Fn() + Send + Sync>,
    notify: mpsc::Sender<()>,
) {
    let mut refreshes_open = true;
    let mut changes_open = true;
    let mut deadline: Option<Instant> = None;

    loop {
        if !refreshes_open && !changes_open && deadline.is_none() {
            break;
        }

        let event = tokio::select! {
            result = refreshes.recv(), if refreshes_open => {
                let seen = observe(result);
                refreshes_open = seen.is_some();
                seen.unwrap_or(false)
            }
            result = changes.recv(), if changes_open => {
                let seen = observe(result);
                changes_open = seen.is_some();
                seen.unwrap_or(false)
            }
            () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                if notify.send(()).await.is_err() {
                    tracing::debug!("Refresh notification receiver dropped");
                    break;
                }
                continue;
            }
        };

        if event {
            on_change();
            deadline = Some(Instant::now() + debounce);
        }
    }
}
