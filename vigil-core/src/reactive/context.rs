//! Reactive Context
//!
//! The reactive context tracks which watcher is currently evaluating.
//! This enables automatic dependency tracking: when a reactive field is
//! read, its Dep registers the current watcher as a subscriber.
//!
//! # Implementation
//!
//! We use a thread-local stack of targets. Entering an evaluation pushes the
//! watcher; the returned guard pops it when dropped, restoring the caller as
//! the collection target. This supports nested evaluation (a computed value
//! read while a render watcher is running).
//!
//! An entry may also be empty: [`ReactiveContext::untracked`] pushes one so
//! that reads inside it record nothing, even when called from inside an
//! evaluation.

use std::cell::RefCell;

use super::watcher::Watcher;
use super::WatcherId;

thread_local! {
    static TARGET_STACK: RefCell<Vec<Option<Watcher>>> = const { RefCell::new(Vec::new()) };
}

/// Guard that pops the target when dropped.
///
/// This ensures the stack is properly maintained even if the evaluation
/// panics.
pub struct ReactiveContext {
    target: Option<WatcherId>,
}

impl ReactiveContext {
    /// Make `watcher` the dependency-collection target until the guard drops.
    pub fn enter(watcher: Watcher) -> Self {
        let target = Some(watcher.id());
        TARGET_STACK.with(|stack| stack.borrow_mut().push(Some(watcher)));
        Self { target }
    }

    /// Run `f` with dependency collection suspended.
    pub fn untracked<T>(f: impl FnOnce() -> T) -> T {
        TARGET_STACK.with(|stack| stack.borrow_mut().push(None));
        let _guard = Self { target: None };
        f()
    }

    /// Check if a watcher is currently collecting dependencies.
    pub fn is_active() -> bool {
        TARGET_STACK.with(|stack| matches!(stack.borrow().last(), Some(Some(_))))
    }

    /// The watcher currently collecting dependencies, if any.
    pub fn current() -> Option<Watcher> {
        TARGET_STACK.with(|stack| stack.borrow().last().cloned().flatten())
    }

    /// Current nesting depth, counting untracked sections.
    #[cfg(test)]
    pub(crate) fn depth() -> usize {
        TARGET_STACK.with(|stack| stack.borrow().len())
    }

    /// Drop every entry. Only meant for resetting between tests.
    pub fn clear() {
        let drained = TARGET_STACK.with(|stack| std::mem::take(&mut *stack.borrow_mut()));
        drop(drained);
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        let popped = TARGET_STACK.with(|stack| stack.borrow_mut().pop());

        // Verify we're popping the right context.
        if let Some(entry) = &popped {
            debug_assert_eq!(
                entry.as_ref().map(Watcher::id),
                self.target,
                "ReactiveContext mismatch"
            );
        }
    }
}
