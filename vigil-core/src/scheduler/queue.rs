//! The watcher queue and its flush loop.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use crate::config;
use crate::error::{Error, Result};
use crate::reactive::{Watcher, WatcherId};

use super::tick;

#[derive(Default)]
struct QueueState {
    queue: Vec<Watcher>,
    has: HashSet<WatcherId>,
    circular: HashMap<WatcherId, u32>,
    waiting: bool,
    flushing: bool,
    index: usize,
}

thread_local! {
    static SCHEDULER: RefCell<QueueState> = RefCell::new(QueueState::default());
}

/// Queue a watcher for the next flush. Queueing a watcher that is already
/// pending is a no-op.
///
/// The first watcher of a burst schedules the flush on the next tick, or
/// flushes right away when asynchronous flushing is disabled.
pub fn queue_watcher(watcher: Watcher) -> Result<()> {
    let id = watcher.id();
    let schedule = SCHEDULER.with(|state| {
        let mut state = state.borrow_mut();
        if !state.has.insert(id) {
            tracing::trace!(watcher = %id, "already queued");
            return false;
        }

        if state.flushing {
            // Keep the unrun tail sorted, never moving before the current entry.
            let mut i = state.queue.len();
            while i > state.index + 1 && state.queue[i - 1].id() > id {
                i -= 1;
            }
            state.queue.insert(i, watcher);
        } else {
            state.queue.push(watcher);
        }
        tracing::trace!(watcher = %id, queued = state.queue.len(), "queued");

        !std::mem::replace(&mut state.waiting, true)
    });

    if !schedule {
        return Ok(());
    }
    if config::settings().async_flush {
        tick::schedule(Box::new(flush));
        Ok(())
    } else {
        flush()
    }
}

/// Run every queued watcher in ascending id order.
///
/// A call made while a flush is already running returns immediately. The
/// queue is reset on every exit, including an aborted flush.
pub fn flush() -> Result<()> {
    let queued = SCHEDULER.with(|state| {
        let mut state = state.borrow_mut();
        if state.flushing {
            return None;
        }
        state.flushing = true;
        state.queue.sort_by_key(Watcher::id);
        Some(state.queue.len())
    });
    let Some(queued) = queued else {
        return Ok(());
    };

    tracing::debug!(queued, "flush start");
    let result = run_queue();
    let ran = reset_state();
    tracing::debug!(ran, ok = result.is_ok(), "flush done");
    result
}

fn run_queue() -> Result<()> {
    let max_update_count = config::settings().max_update_count;
    loop {
        let next = SCHEDULER.with(|state| {
            let state = state.borrow();
            state.queue.get(state.index).cloned()
        });
        let Some(watcher) = next else {
            return Ok(());
        };

        if let Some(before) = watcher.before() {
            before();
        }
        let id = watcher.id();
        SCHEDULER.with(|state| state.borrow_mut().has.remove(&id));

        watcher.run()?;

        let exceeded = SCHEDULER.with(|state| {
            let mut state = state.borrow_mut();
            state.index += 1;
            if !state.has.contains(&id) {
                return false;
            }
            let count = state.circular.entry(id).or_insert(0);
            *count += 1;
            *count > max_update_count
        });
        if exceeded {
            let origin = if watcher.is_user() {
                format!("in watcher with expression \"{}\"", watcher.expression())
            } else {
                "in a component render function".to_string()
            };
            tracing::error!(watcher = %id, "you may have an infinite update loop {origin}");
            return Err(Error::InfiniteUpdateLoop { watcher: id, origin });
        }
    }
}

/// Clear the queue and flags. Returns how many entries were queued.
fn reset_state() -> usize {
    let drained = SCHEDULER.with(|state| std::mem::take(&mut *state.borrow_mut()));
    drained.queue.len()
}

/// Discard all pending work.
pub fn reset() {
    reset_state();
}

/// Number of queued watchers, including ones already run in the current
/// flush.
pub fn pending() -> usize {
    SCHEDULER.with(|state| state.borrow().queue.len())
}

pub fn is_flushing() -> bool {
    SCHEDULER.with(|state| state.borrow().flushing)
}

/// Whether a flush has been scheduled and not finished yet.
#[cfg(test)]
fn is_waiting() -> bool {
    SCHEDULER.with(|state| state.borrow().waiting)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
