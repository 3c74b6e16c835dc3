//! Next-Tick Callbacks
//!
//! Deferred work is collected into one batch per tick. The batch is drained
//! in insertion order by [`run_pending`]; work added while draining lands in
//! the next batch.
//!
//! When the batch gets drained depends on [`TickMode`]. In `Manual` mode the
//! host calls [`run_pending`] (or [`run_until_idle`]) at its own frame
//! boundary. In `Local` mode the first callback of each batch spawns a tokio
//! local task that yields once and then drains.

use std::cell::RefCell;
use std::future::Future;

use tokio::sync::oneshot;

use crate::config::{self, TickMode};
use crate::error::{BoxError, Result};

pub(crate) type Task = Box<dyn FnOnce() -> Result<()>>;

#[derive(Default)]
struct TickState {
    callbacks: Vec<Task>,
    pending: bool,
}

thread_local! {
    static TICK: RefCell<TickState> = RefCell::new(TickState::default());
}

/// Run `f` at the next tick. A failure is reported to the error hook with
/// location `nextTick` and does not stop the rest of the batch.
pub fn next_tick<F>(f: F)
where
    F: FnOnce() -> std::result::Result<(), BoxError> + 'static,
{
    schedule(Box::new(move || {
        if let Err(err) = f() {
            config::handle_error(&*err, None, "nextTick");
        }
        Ok(())
    }));
}

/// Resolves once the current batch has been drained.
pub fn next_tick_async() -> impl Future<Output = ()> {
    let (tx, rx) = oneshot::channel();
    next_tick(move || {
        // The receiver may be gone if the future was dropped.
        let _ = tx.send(());
        Ok(())
    });
    async move {
        let _ = rx.await;
    }
}

pub(crate) fn schedule(task: Task) {
    let first = TICK.with(|tick| {
        let mut tick = tick.borrow_mut();
        tick.callbacks.push(task);
        !std::mem::replace(&mut tick.pending, true)
    });
    if first && config::settings().tick == TickMode::Local {
        spawn_drain();
    }
}

fn spawn_drain() {
    tokio::task::spawn_local(async {
        tokio::task::yield_now().await;
        if let Err(err) = run_pending() {
            config::handle_error(&err, None, "nextTick");
        }
    });
}

/// Drain the current batch.
///
/// Every callback runs even if an earlier one failed; the first engine
/// error is returned.
pub fn run_pending() -> Result<()> {
    let batch = TICK.with(|tick| {
        let mut tick = tick.borrow_mut();
        tick.pending = false;
        std::mem::take(&mut tick.callbacks)
    });
    if batch.is_empty() {
        return Ok(());
    }
    tracing::trace!(callbacks = batch.len(), "tick");

    let mut first_error = None;
    for task in batch {
        if let Err(err) = task() {
            first_error.get_or_insert(err);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// Drain batches until none is left. Returns how many batches ran.
pub fn run_until_idle() -> Result<usize> {
    let mut batches = 0;
    while pending_callbacks() > 0 {
        run_pending()?;
        batches += 1;
    }
    Ok(batches)
}

pub fn pending_callbacks() -> usize {
    TICK.with(|tick| tick.borrow().callbacks.len())
}

/// Drop the current batch without running it.
pub fn reset() {
    let dropped = TICK.with(|tick| std::mem::take(&mut *tick.borrow_mut()));
    drop(dropped);
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
