//! Reactive Primitives
//!
//! This module implements dependency tracking: observed containers, the Deps
//! attached to their fields, and the watchers that subscribe to them.
//!
//! # Concepts
//!
//! ## Observed Containers
//!
//! [`Object`] and [`Array`] are shared containers. Once [`observe`]d, reads
//! made while a watcher evaluates subscribe that watcher, and writes notify
//! the subscribers. Keys added or removed at runtime go through [`set`] and
//! [`delete`] so that watchers depending on the key set are notified too.
//!
//! ## Deps
//!
//! A [`Dep`] is a set of subscribers for one reactive slot: one per field,
//! plus one per container for structural changes.
//!
//! ## Watchers
//!
//! A [`Watcher`] evaluates a getter and reacts when anything it read
//! changes: render watchers re-render, [`Computed`] values mark themselves
//! dirty, user watchers run a callback with the new and old value.
//!
//! # Implementation Notes
//!
//! The watcher currently collecting dependencies lives on a thread-local
//! stack ([`ReactiveContext`]). Deps hold watchers weakly and watchers hold
//! Deps weakly; containers own their Deps, owners own their watchers.

mod array;
mod computed;
mod context;
mod dep;
mod object;
mod observer;
mod owner;
mod path;
mod subscriber;
mod traverse;
mod value;
mod watcher;

pub use array::Array;
pub use computed::Computed;
pub use context::ReactiveContext;
pub use dep::{Dep, DepId};
pub use object::{Interceptor, Object};
pub use observer::{define_reactive, delete, is_observing, observe, set, toggle_observing, Observer};
pub use owner::Owner;
pub use path::Path;
pub use subscriber::{Subscriber, WatcherId};
pub use traverse::traverse;
pub use value::{ContainerId, Key, Opaque, Value};
pub use watcher::{
    callback, BeforeHook, Callback, Expression, Getter, WatchOptions, Watcher, WatcherKind,
};
