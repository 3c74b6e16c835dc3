//! Computed Values
//!
//! A Computed is a cached derived value backed by a lazy watcher.
//!
//! # How Computed Values Work
//!
//! 1. Creation does not evaluate anything. The watcher starts dirty.
//!
//! 2. On read, the reader (if any) subscribes to the computed value's own
//!    Dep, then the value is recomputed if dirty and returned.
//!
//! 3. When a dependency changes and nobody subscribes to the computed
//!    value, it is only marked dirty. Values that are never read again are
//!    never recomputed.
//!
//! 4. When somebody does subscribe, it recomputes eagerly and notifies its
//!    subscribers only if the result changed. Computed values reading other
//!    computed values chain this way.

use std::fmt;

use crate::error::{BoxError, Result};

use super::owner::Owner;
use super::value::Value;
use super::watcher::{Expression, WatchOptions, Watcher};

/// A lazily evaluated, cached derived value.
#[derive(Clone)]
pub struct Computed {
    watcher: Watcher,
}

impl Computed {
    /// Create a computed value. `f` runs on first read, not here.
    pub fn new<F>(owner: Option<&Owner>, f: F) -> Result<Self>
    where
        F: Fn() -> std::result::Result<Value, BoxError> + 'static,
    {
        Self::from_expression(owner, Expression::function(f))
    }

    pub(crate) fn from_expression(owner: Option<&Owner>, expression: Expression) -> Result<Self> {
        let watcher = Watcher::new(owner, expression, None, WatchOptions::computed(), false)?;
        Ok(Self { watcher })
    }

    /// Read the value, subscribing the current watcher.
    pub fn get(&self) -> Result<Value> {
        self.watcher.depend();
        self.watcher.evaluate()
    }

    pub fn is_dirty(&self) -> bool {
        self.watcher.is_dirty()
    }

    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }
}

impl fmt::Debug for Computed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.watcher.id())
            .field("dirty", &self.watcher.is_dirty())
            .field("subscribers", &self.watcher.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
