//! Vigil Core
//!
//! This crate provides a reactive dependency-tracking engine with batched
//! update scheduling. It implements:
//!
//! - Observed containers with per-field dependency sets
//! - Render, computed and user watchers with automatic dependency collection
//! - A scheduler that batches watcher runs per tick, in creation order
//! - Error and warning reporting hooks
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: values, containers, Deps, observers and watchers
//! - `scheduler`: the watcher queue and the next-tick batch
//! - `config`: per-thread settings and reporting hooks
//! - `error`: the crate error type
//!
//! All engine state is thread-local. Nothing here is `Send`.
//!
//! # Example
//!
//! ```rust
//! use vigil_core::reactive::{Object, Owner, Value, WatchOptions};
//! use vigil_core::scheduler::tick;
//!
//! let owner = Owner::new("counter", Object::from_iter([("count", 0)]));
//!
//! owner
//!     .watch("count", |new, old| {
//!         println!("count: {old} -> {new}");
//!         Ok(())
//!     }, WatchOptions::default())
//!     .unwrap();
//!
//! owner.data().set("count", 1).unwrap();
//! owner.data().set("count", 2).unwrap();
//!
//! // One flush, one callback: "count: 0 -> 2"
//! tick::run_pending().unwrap();
//! # assert_eq!(owner.data().get_untracked("count"), Some(Value::from(2)));
//! ```

pub mod config;
pub mod error;
pub mod reactive;
pub mod scheduler;

pub use config::{Config, Settings, TickMode};
pub use error::{BoxError, Error, Result};
pub use reactive::{Array, Computed, Object, Owner, Value, WatchOptions, Watcher};

/// Reset all per-thread engine state: configuration, pending scheduler and
/// tick work, the evaluation stack and the observation toggle.
pub fn reset() {
    config::reset();
    scheduler::reset();
    scheduler::tick::reset();
    reactive::ReactiveContext::clear();
    reactive::toggle_observing(true);
}
