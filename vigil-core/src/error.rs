//! Error Types
//!
//! Failures raised by user code (getters, callbacks, tick callbacks) are
//! carried as [`BoxError`] so that `?` works inside closures. Failures the
//! engine itself raises, or that it refuses to swallow, are [`Error`].

use thiserror::Error;

use crate::reactive::WatcherId;

/// A failure raised by user-supplied code.
pub type BoxError = Box<dyn std::error::Error + 'static>;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the reactive engine.
#[derive(Debug, Error)]
pub enum Error {
    /// A render or computed watcher (or a non-user callback) failed.
    ///
    /// These are never routed to the error hook; they indicate a defect in
    /// the surrounding computation and propagate to the caller.
    #[error("error in {location}: {source}")]
    Evaluation {
        location: String,
        #[source]
        source: BoxError,
    },

    /// The scheduler saw the same watcher re-queued by its own run more
    /// times than the configured limit within one flush.
    #[error("you may have an infinite update loop {origin}")]
    InfiniteUpdateLoop { watcher: WatcherId, origin: String },

    /// A snapshot export reached a container that is already on the path.
    #[error("cannot export a cyclic value graph (cycle at `{path}`)")]
    Cycle { path: String },
}

impl Error {
    pub(crate) fn evaluation(location: impl Into<String>, source: BoxError) -> Self {
        Self::Evaluation {
            location: location.into(),
            source,
        }
    }
}
