use std::fmt;

use serde::{Deserialize, Serialize};

/// Monotonic edit stamp.
///
/// Stamps are cheap to compare but only approximate content: a stamp may move
/// forward without the text changing (e.g. a document touched by a fork).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VersionStamp(u64);

impl VersionStamp {
    pub const INITIAL: Self = Self(0);

    #[must_use]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// The newer of two stamps.
    #[must_use]
    pub fn max_with(self, other: Self) -> Self {
        if other > self { other } else { self }
    }
}

impl fmt::Display for VersionStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}
