//! Dependency Sets
//!
//! A [`Dep`] is the subject side of the dependency graph. Every reactive
//! field owns one, and every observed container owns one more for
//! structural changes (keys added or removed, sequence mutations).
//!
//! Deps hold their subscribers weakly and never own them. Subscriptions are
//! created through [`Dep::depend`], which hands the Dep to the watcher on top
//! of the evaluation stack; the watcher decides whether it is already
//! subscribed.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::config;
use crate::error::Result;

use super::context::ReactiveContext;
use super::subscriber::{Subscriber, WatcherId};

/// Identity of a Dep. Monotonically increasing, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DepId(u64);

impl DepId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// A set of subscribers interested in one reactive slot.
pub struct Dep {
    id: DepId,
    subs: RefCell<IndexMap<WatcherId, Weak<dyn Subscriber>>>,
}

impl Dep {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            id: DepId::next(),
            subs: RefCell::new(IndexMap::new()),
        })
    }

    pub fn id(&self) -> DepId {
        self.id
    }

    /// Register the currently evaluating watcher, if any.
    pub fn depend(self: &Rc<Self>) {
        if let Some(watcher) = ReactiveContext::current() {
            watcher.add_dep(self);
        }
    }

    /// Add a subscriber. Idempotent.
    pub fn add_sub(&self, id: WatcherId, sub: Weak<dyn Subscriber>) {
        self.subs.borrow_mut().entry(id).or_insert(sub);
    }

    /// Remove a subscriber. Idempotent.
    pub fn remove_sub(&self, id: WatcherId) {
        self.subs.borrow_mut().shift_remove(&id);
    }

    /// Deliver an update to every live subscriber, in subscription order.
    pub fn notify(&self) -> Result<()> {
        // Snapshot first: updates may subscribe or unsubscribe.
        let mut subs: SmallVec<[Rc<dyn Subscriber>; 8]> = self
            .subs
            .borrow()
            .values()
            .filter_map(Weak::upgrade)
            .collect();

        if !config::settings().async_flush {
            // Without batching there is no flush to sort, so keep creation order here.
            subs.sort_by_key(|sub| sub.id());
        }

        tracing::trace!(dep = self.id.0, subscribers = subs.len(), "notify");
        for sub in subs {
            sub.update()?;
        }
        Ok(())
    }

    pub fn has_subscribers(&self) -> bool {
        !self.subs.borrow().is_empty()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subs.borrow().len()
    }

    /// Subscriber ids in notification order.
    pub fn subscriber_ids(&self) -> Vec<WatcherId> {
        self.subs.borrow().keys().copied().collect()
    }
}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.id)
            .field("subscribers", &self.subscriber_ids())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
