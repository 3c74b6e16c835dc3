//! Owners
//!
//! An [`Owner`] is the computation context that watchers belong to, the
//! equivalent of a component instance. It holds the root state, a registry
//! of watchers, an optional render watcher and named computed values. Error
//! and warning reports name the owner they happened in.
//!
//! Owners hold their watchers strongly; watchers refer back weakly.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::config;
use crate::error::{BoxError, Result};

use super::computed::Computed;
use super::context::ReactiveContext;
use super::object::Object;
use super::observer::observe;
use super::subscriber::WatcherId;
use super::value::Value;
use super::watcher::{callback, BeforeHook, Expression, WatchOptions, Watcher};

struct OwnerInner {
    name: String,
    data: Object,
    watchers: RefCell<Vec<Watcher>>,
    render_watcher: RefCell<Option<Watcher>>,
    computed: RefCell<IndexMap<String, Computed>>,
    being_destroyed: Cell<bool>,
    destroyed: Cell<bool>,
}

/// Handle to an owning context.
#[derive(Clone)]
pub struct Owner {
    inner: Rc<OwnerInner>,
}

#[derive(Clone)]
pub(crate) struct WeakOwner(Weak<OwnerInner>);

impl WeakOwner {
    pub(crate) fn upgrade(&self) -> Option<Owner> {
        self.0.upgrade().map(|inner| Owner { inner })
    }
}

impl Owner {
    /// Create an owner whose root state is `data`. The data is observed as
    /// root state: keys can no longer be added or removed at runtime.
    pub fn new(name: impl Into<String>, data: Object) -> Self {
        observe(&Value::Object(data.clone()), true);
        Self {
            inner: Rc::new(OwnerInner {
                name: name.into(),
                data,
                watchers: RefCell::new(Vec::new()),
                render_watcher: RefCell::new(None),
                computed: RefCell::new(IndexMap::new()),
                being_destroyed: Cell::new(false),
                destroyed: Cell::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn data(&self) -> &Object {
        &self.inner.data
    }

    pub fn is_being_destroyed(&self) -> bool {
        self.inner.being_destroyed.get()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.borrow().len()
    }

    pub fn render_watcher(&self) -> Option<Watcher> {
        self.inner.render_watcher.borrow().clone()
    }

    /// Watch an expression. The watcher is always a user watcher; with
    /// `immediate`, `callback` runs once right away with the current value.
    ///
    /// Call [`Watcher::teardown`] on the result to stop watching.
    pub fn watch<F>(
        &self,
        expression: impl Into<Expression>,
        callback_fn: F,
        mut options: WatchOptions,
    ) -> Result<Watcher>
    where
        F: Fn(&Value, &Value) -> std::result::Result<(), BoxError> + 'static,
    {
        options.user = true;
        let immediate = options.immediate;
        let cb = callback(callback_fn);
        let watcher = Watcher::new(Some(self), expression.into(), Some(cb.clone()), options, false)?;

        if immediate {
            let value = watcher.value();
            if let Err(err) = ReactiveContext::untracked(|| cb(&value, &Value::Null)) {
                let location = format!("callback for immediate watcher \"{}\"", watcher.expression());
                config::handle_error(&*err, Some(self), &location);
            }
        }
        Ok(watcher)
    }

    /// Define a named computed value. A name that is already a data key is
    /// refused with a warning; the returned value is then not registered.
    pub fn define_computed<F>(&self, name: &str, f: F) -> Result<Computed>
    where
        F: Fn() -> std::result::Result<Value, BoxError> + 'static,
    {
        let computed = Computed::from_expression(Some(self), Expression::labeled(name, f))?;
        if self.inner.data.contains_key_untracked(name) {
            config::warn(
                &format!("The computed property \"{name}\" is already defined in data."),
                Some(self),
            );
            return Ok(computed);
        }
        self.inner
            .computed
            .borrow_mut()
            .insert(name.to_string(), computed.clone());
        Ok(computed)
    }

    /// Read a named computed value, subscribing the current watcher.
    pub fn computed(&self, name: &str) -> Result<Option<Value>> {
        let computed = self.inner.computed.borrow().get(name).cloned();
        computed.map(|c| c.get()).transpose()
    }

    /// Install the render watcher. `render` runs now and again whenever
    /// anything it read changes; `before` runs ahead of each scheduled
    /// re-render.
    pub fn mount<F>(&self, render: F, before: Option<BeforeHook>) -> Result<Watcher>
    where
        F: Fn() -> std::result::Result<(), BoxError> + 'static,
    {
        let previous = self.inner.render_watcher.borrow_mut().take();
        if let Some(previous) = previous {
            previous.teardown();
        }
        let options = WatchOptions {
            before,
            ..WatchOptions::default()
        };
        let expression = Expression::labeled("render", move || render().map(|()| Value::Null));
        let watcher = Watcher::new(Some(self), expression, None, options, true)?;
        *self.inner.render_watcher.borrow_mut() = Some(watcher.clone());
        Ok(watcher)
    }

    /// Queue the render watcher without any dependency having changed.
    pub fn force_update(&self) -> Result<()> {
        match self.render_watcher() {
            Some(watcher) => watcher.update(),
            None => Ok(()),
        }
    }

    /// Tear down every watcher and release the root state. Idempotent.
    pub fn destroy(&self) {
        if self.inner.being_destroyed.replace(true) {
            return;
        }
        if let Some(render) = self.render_watcher() {
            render.teardown();
        }
        let watchers = self.inner.watchers.borrow().clone();
        for watcher in watchers.iter().rev() {
            watcher.teardown();
        }
        if let Some(observer) = self.inner.data.observer() {
            observer.release_root();
        }
        self.inner.destroyed.set(true);
        tracing::debug!(owner = %self.inner.name, watchers = watchers.len(), "destroyed");
    }

    pub(crate) fn register(&self, watcher: Watcher) {
        self.inner.watchers.borrow_mut().push(watcher);
    }

    pub(crate) fn remove_watcher(&self, id: WatcherId) {
        let removed = {
            let mut watchers = self.inner.watchers.borrow_mut();
            watchers
                .iter()
                .position(|w| w.id() == id)
                .map(|index| watchers.remove(index))
        };
        drop(removed);
    }

    pub(crate) fn downgrade(&self) -> WeakOwner {
        WeakOwner(Rc::downgrade(&self.inner))
    }
}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owner")
            .field("name", &self.inner.name)
            .field("watchers", &self.watcher_count())
            .field("computed", &self.inner.computed.borrow().keys().collect::<Vec<_>>())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use crate::scheduler;

    fn owner_with(entries: &[(&str, i32)]) -> Owner {
        let data: Object = entries.iter().map(|(k, v)| (*k, *v)).collect();
        Owner::new("test", data)
    }

    #[test]
    fn watch_path_fires_after_flush() {
        crate::reset();
        let owner = owner_with(&[("a", 1)]);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        owner
            .watch(
                "a",
                move |new, old| {
                    sink.borrow_mut().push((new.clone(), old.clone()));
                    Ok(())
                },
                WatchOptions::default(),
            )
            .unwrap();

        owner.data().set("a", 2).unwrap();
        assert!(seen.borrow().is_empty());

        scheduler::flush().unwrap();
        assert_eq!(*seen.borrow(), vec![(Value::from(2), Value::from(1))]);
        crate::reset();
    }

    #[test]
    fn immediate_watch_fires_at_creation() {
        let owner = owner_with(&[("a", 1)]);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let watcher = owner
            .watch(
                "a",
                move |new, old| {
                    sink.borrow_mut().push((new.clone(), old.clone()));
                    Ok(())
                },
                WatchOptions::default().immediate(true),
            )
            .unwrap();

        assert!(watcher.is_user());
        assert_eq!(*seen.borrow(), vec![(Value::from(1), Value::Null)]);
    }

    #[test]
    fn callback_errors_name_the_owner() {
        crate::reset();
        let reports = Rc::new(RefCell::new(Vec::new()));
        let sink = reports.clone();
        config::set_error_handler(move |err, owner, location| {
            let name = owner.map(|o| o.name().to_string()).unwrap_or_default();
            sink.borrow_mut().push(format!("{name}: {location}: {err}"));
        });

        let owner = owner_with(&[("a", 1)]);
        owner
            .watch("a", |_, _| Err("nope".into()), WatchOptions::default().immediate(true))
            .unwrap();

        assert_eq!(
            *reports.borrow(),
            vec!["test: callback for immediate watcher \"a\": nope".to_string()]
        );
        crate::reset();
    }

    #[test]
    fn computed_by_name() {
        let owner = owner_with(&[("a", 2)]);
        let data = owner.data().clone();
        owner
            .define_computed("double", move || {
                let a = data.get("a").and_then(|v| v.as_f64()).unwrap_or(0.0);
                Ok(Value::from(a * 2.0))
            })
            .unwrap();

        assert_eq!(owner.computed("double").unwrap(), Some(Value::from(4)));
        assert_eq!(owner.computed("missing").unwrap(), None);
    }

    #[test]
    fn computed_name_clashing_with_data_warns() {
        crate::reset();
        let warnings = Rc::new(RefCell::new(Vec::new()));
        let sink = warnings.clone();
        config::set_warn_handler(move |msg, _| sink.borrow_mut().push(msg.to_string()));

        let owner = owner_with(&[("a", 1)]);
        owner.define_computed("a", || Ok(Value::Null)).unwrap();

        assert_eq!(owner.computed("a").unwrap(), None);
        assert_eq!(warnings.borrow().len(), 1);
        crate::reset();
    }

    #[test]
    fn mount_and_force_update() {
        crate::reset();
        let owner = owner_with(&[("a", 1)]);
        let renders = Rc::new(Cell::new(0));
        let count = renders.clone();
        let data = owner.data().clone();
        owner
            .mount(
                move || {
                    data.get("a");
                    count.set(count.get() + 1);
                    Ok(())
                },
                None,
            )
            .unwrap();
        assert_eq!(renders.get(), 1);

        owner.force_update().unwrap();
        owner.force_update().unwrap();
        scheduler::flush().unwrap();
        assert_eq!(renders.get(), 2);
        crate::reset();
    }

    #[test]
    fn destroy_tears_everything_down() {
        let owner = owner_with(&[("a", 1)]);
        let data = owner.data().clone();
        let render = owner
            .mount(
                move || {
                    data.get("a");
                    Ok(())
                },
                None,
            )
            .unwrap();
        let user = owner.watch("a", |_, _| Ok(()), WatchOptions::default()).unwrap();
        assert_eq!(owner.watcher_count(), 2);
        assert_eq!(owner.data().observer().unwrap().root_count(), 1);

        owner.destroy();
        owner.destroy();

        assert!(owner.is_destroyed());
        assert!(!render.is_active());
        assert!(!user.is_active());
        assert!(!owner.data().field_dep("a").unwrap().has_subscribers());
        assert_eq!(owner.data().observer().unwrap().root_count(), 0);
    }

    #[test]
    fn computed_read_after_destroy_does_not_resubscribe() {
        let owner = owner_with(&[("a", 1)]);
        let data = owner.data().clone();
        let computed = owner
            .define_computed("c", move || Ok(data.get("a").unwrap_or_default()))
            .unwrap();

        owner.destroy();
        computed.get().unwrap();

        assert!(!computed.watcher().is_active());
        assert!(!owner.data().field_dep("a").unwrap().has_subscribers());
    }

    #[test]
    fn immediate_callback_inside_render_is_untracked() {
        crate::reset();
        let owner = owner_with(&[("a", 1), ("secret", 1)]);
        let renders = Rc::new(Cell::new(0));
        let count = renders.clone();
        let inner = owner.clone();
        owner
            .mount(
                move || {
                    inner.data().get("a");
                    count.set(count.get() + 1);
                    if count.get() == 1 {
                        let peek = inner.data().clone();
                        inner.watch(
                            "a",
                            move |_, _| {
                                peek.get("secret");
                                Ok(())
                            },
                            WatchOptions::default().immediate(true),
                        )?;
                    }
                    Ok(())
                },
                None,
            )
            .unwrap();

        assert!(!owner.data().field_dep("secret").unwrap().has_subscribers());

        owner.data().set("secret", 2).unwrap();
        scheduler::flush().unwrap();
        assert_eq!(renders.get(), 1);

        owner.destroy();
        crate::reset();
    }

    #[test]
    fn unwatch_removes_from_registry() {
        let owner = owner_with(&[("a", 1)]);
        let watcher = owner.watch("a", |_, _| Ok(()), WatchOptions::default()).unwrap();
        assert_eq!(owner.watcher_count(), 1);

        watcher.teardown();
        assert_eq!(owner.watcher_count(), 0);
    }
}
