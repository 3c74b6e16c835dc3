//! Update Scheduler
//!
//! Watchers do not re-run the moment one of their dependencies changes.
//! They are queued, and the queue is flushed once at the next tick, so that
//! any number of writes made in one synchronous burst collapse into a
//! single run per watcher.
//!
//! # Ordering
//!
//! A flush runs watchers in ascending id order. Ids follow creation order,
//! so a parent's watchers run before its children's, and computed values
//! created before a render watcher are refreshed before it renders.
//!
//! A watcher queued while a flush is in progress is inserted at its sorted
//! position among the entries not yet run. A watcher re-queued by its own
//! run goes after the current position and runs again in the same flush;
//! doing so more than `max_update_count` times aborts the flush with
//! [`Error::InfiniteUpdateLoop`](crate::Error::InfiniteUpdateLoop).
//!
//! # Ticks
//!
//! The [`tick`] module owns the deferred callback batch. When asynchronous
//! flushing is disabled in the configuration, queueing flushes inline.

mod queue;
pub mod tick;

pub use queue::{flush, is_flushing, pending, queue_watcher, reset};
