//! Subscriber types for the reactive system.
//!
//! A Subscriber is anything a [`Dep`](super::Dep) can notify. In practice
//! that is always a [`Watcher`](super::Watcher), but the trait keeps the
//! Dep side independent of watcher internals.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;

/// Unique identifier for a watcher.
///
/// Ids are handed out in creation order and never reused. The scheduler
/// relies on this: sorting by id runs parents before children and computed
/// values before the render functions that read them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatcherId(u64);

impl WatcherId {
    /// Generate a new unique watcher ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for WatcherId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Something that reacts when a dependency it subscribed to changes.
pub trait Subscriber {
    /// Identity used for dedup and ordering.
    fn id(&self) -> WatcherId;

    /// Deliver a change signal.
    ///
    /// Errors are fatal failures of internal computations; recovered user
    /// failures never surface here.
    fn update(&self) -> Result<()>;
}
