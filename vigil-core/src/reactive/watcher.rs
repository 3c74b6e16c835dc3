//! Watcher Implementation
//!
//! A Watcher is a unit of reactive computation. It evaluates a getter while
//! registered as the collection target, which subscribes it to every Dep the
//! getter reads. When one of those Deps fires, the watcher reacts according
//! to its mode.
//!
//! # Kinds
//!
//! - **Render**: re-runs the owner's render function. Has no callback.
//! - **Computed**: lazy. Starts dirty, evaluates on first read and only
//!   recomputes after a dependency changed. Owns a Dep of its own so other
//!   watchers can depend on it.
//! - **User**: registered through [`Owner::watch`]. Failures in its getter or
//!   callback are reported through the error hook instead of propagating.
//!
//! # Dependency Bookkeeping
//!
//! Every evaluation collects a fresh dep set. Afterwards, Deps that were
//! subscribed to last time but not read this time are unsubscribed, and the
//! fresh set becomes the current one. This runs whether the getter succeeded
//! or not.
//!
//! # Lifetime
//!
//! Deps hold watchers weakly. A watcher lives as long as some handle to it
//! does (its owner, the scheduler queue, the caller); dropping the last
//! handle unsubscribes it everywhere.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::config;
use crate::error::{BoxError, Error, Result};
use crate::scheduler;

use super::context::ReactiveContext;
use super::dep::{Dep, DepId};
use super::owner::{Owner, WeakOwner};
use super::path::Path;
use super::subscriber::{Subscriber, WatcherId};
use super::traverse::traverse;
use super::value::Value;

/// A watcher getter.
pub type Getter = Rc<dyn Fn() -> std::result::Result<Value, BoxError>>;

/// A watcher callback: `(new, old)`.
pub type Callback = Rc<dyn Fn(&Value, &Value) -> std::result::Result<(), BoxError>>;

/// Hook run by the scheduler right before a queued watcher runs.
pub type BeforeHook = Rc<dyn Fn()>;

/// Wrap a closure as a [`Callback`].
pub fn callback<F>(f: F) -> Callback
where
    F: Fn(&Value, &Value) -> std::result::Result<(), BoxError> + 'static,
{
    Rc::new(f)
}

/// What a watcher evaluates.
#[derive(Clone)]
pub enum Expression {
    /// A function, with a label used in error reports.
    Function { label: String, getter: Getter },

    /// A dot path resolved against the owner's root state.
    Path(String),
}

impl Expression {
    /// A function expression labelled with the closure's type name.
    pub fn function<F>(f: F) -> Self
    where
        F: Fn() -> std::result::Result<Value, BoxError> + 'static,
    {
        Self::Function {
            label: std::any::type_name::<F>().to_string(),
            getter: Rc::new(f),
        }
    }

    /// A function expression with an explicit label.
    pub fn labeled<F>(label: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> std::result::Result<Value, BoxError> + 'static,
    {
        Self::Function {
            label: label.into(),
            getter: Rc::new(f),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Function { label, .. } => label,
            Self::Path(path) => path,
        }
    }
}

impl From<&str> for Expression {
    fn from(path: &str) -> Self {
        Self::Path(path.to_string())
    }
}

impl From<String> for Expression {
    fn from(path: String) -> Self {
        Self::Path(path)
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function { label, .. } => f.debug_tuple("Function").field(label).finish(),
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
        }
    }
}

/// Watcher flags.
#[derive(Clone, Default)]
pub struct WatchOptions {
    /// Traverse the value after every evaluation, subscribing to everything
    /// below it. Deep watchers always fire their callback.
    pub deep: bool,

    /// Registered by user code. Failures are reported, not returned.
    pub user: bool,

    /// Lazy computed value.
    pub computed: bool,

    /// Run inline on notification instead of going through the scheduler.
    pub sync: bool,

    /// Invoke the callback once at creation. Only honored by
    /// [`Owner::watch`].
    pub immediate: bool,

    pub before: Option<BeforeHook>,
}

impl WatchOptions {
    pub fn user() -> Self {
        Self {
            user: true,
            ..Self::default()
        }
    }

    pub fn computed() -> Self {
        Self {
            computed: true,
            ..Self::default()
        }
    }

    pub fn deep(mut self, deep: bool) -> Self {
        self.deep = deep;
        self
    }

    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    pub fn before<F>(mut self, hook: F) -> Self
    where
        F: Fn() + 'static,
    {
        self.before = Some(Rc::new(hook));
        self
    }
}

impl fmt::Debug for WatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchOptions")
            .field("deep", &self.deep)
            .field("user", &self.user)
            .field("computed", &self.computed)
            .field("sync", &self.sync)
            .field("immediate", &self.immediate)
            .field("before", &self.before.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherKind {
    Render,
    Computed,
    User,
    Internal,
}

struct WatcherInner {
    id: WatcherId,
    this: Weak<WatcherInner>,
    owner: Option<WeakOwner>,
    expression: String,
    getter: Getter,
    callback: Option<Callback>,
    deep: bool,
    user: bool,
    computed: bool,
    sync: bool,
    render: bool,
    before: Option<BeforeHook>,

    /// Subscribers of this computed value. `None` for other kinds.
    dep: Option<Rc<Dep>>,

    active: Cell<bool>,
    dirty: Cell<bool>,
    value: RefCell<Value>,
    deps: RefCell<IndexMap<DepId, Weak<Dep>>>,
    new_deps: RefCell<IndexMap<DepId, Weak<Dep>>>,
}

/// Handle to a watcher. Clones share the same watcher.
#[derive(Clone)]
pub struct Watcher {
    inner: Rc<WatcherInner>,
}

impl Watcher {
    /// Create a watcher and, unless it is computed, evaluate it once.
    ///
    /// With an owner, the watcher is added to the owner's registry after the
    /// first evaluation. A failing first evaluation of a non-user watcher is
    /// returned and nothing is registered.
    pub fn new(
        owner: Option<&Owner>,
        expression: Expression,
        callback: Option<Callback>,
        options: WatchOptions,
        is_render: bool,
    ) -> Result<Self> {
        let (label, getter) = match expression {
            Expression::Function { label, getter } => (label, getter),
            Expression::Path(path) => {
                let getter = path_getter(owner, &path);
                (path, getter)
            }
        };

        let inner = Rc::new_cyclic(|this| WatcherInner {
            id: WatcherId::new(),
            this: this.clone(),
            owner: owner.map(Owner::downgrade),
            expression: label,
            getter,
            callback,
            deep: options.deep,
            user: options.user,
            computed: options.computed,
            sync: options.sync,
            render: is_render,
            before: options.before,
            dep: options.computed.then(Dep::new),
            active: Cell::new(true),
            dirty: Cell::new(options.computed),
            value: RefCell::new(Value::Null),
            deps: RefCell::new(IndexMap::new()),
            new_deps: RefCell::new(IndexMap::new()),
        });
        let watcher = Self { inner };

        if !watcher.inner.computed {
            if let Some(value) = watcher.get()? {
                *watcher.inner.value.borrow_mut() = value;
            }
        }
        if let Some(owner) = owner {
            owner.register(watcher.clone());
        }
        Ok(watcher)
    }

    pub fn id(&self) -> WatcherId {
        self.inner.id
    }

    /// The expression text, or the label of a function expression.
    pub fn expression(&self) -> &str {
        &self.inner.expression
    }

    pub fn kind(&self) -> WatcherKind {
        if self.inner.render {
            WatcherKind::Render
        } else if self.inner.computed {
            WatcherKind::Computed
        } else if self.inner.user {
            WatcherKind::User
        } else {
            WatcherKind::Internal
        }
    }

    pub fn owner(&self) -> Option<Owner> {
        self.inner.owner.as_ref().and_then(WeakOwner::upgrade)
    }

    /// Last evaluated value.
    pub fn value(&self) -> Value {
        self.inner.value.borrow().clone()
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.get()
    }

    pub fn is_user(&self) -> bool {
        self.inner.user
    }

    pub fn is_render(&self) -> bool {
        self.inner.render
    }

    pub fn before(&self) -> Option<BeforeHook> {
        self.inner.before.clone()
    }

    /// Ids of the Deps this watcher is subscribed to.
    pub fn dep_ids(&self) -> Vec<DepId> {
        self.inner.deps.borrow().keys().copied().collect()
    }

    /// Subscribers of a computed watcher's own Dep.
    pub fn subscriber_count(&self) -> usize {
        self.inner.dep.as_ref().map_or(0, |dep| dep.subscriber_count())
    }

    fn location(&self, what: &str) -> String {
        if self.inner.render {
            "render".to_string()
        } else {
            format!("{what} for watcher \"{}\"", self.inner.expression)
        }
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Evaluate the getter, collecting dependencies.
    ///
    /// `Ok(None)` means a user getter failed and the failure was reported.
    fn get(&self) -> Result<Option<Value>> {
        let outcome = {
            let _ctx = ReactiveContext::enter(self.clone());
            let outcome = (self.inner.getter)();
            if self.inner.deep {
                if let Ok(value) = &outcome {
                    traverse(value);
                }
            }
            outcome
        };
        self.cleanup_deps();

        match outcome {
            Ok(value) => Ok(Some(value)),
            Err(source) if self.inner.user => {
                config::handle_error(&*source, self.owner().as_ref(), &self.location("getter"));
                Ok(None)
            }
            Err(source) => Err(Error::evaluation(self.location("getter"), source)),
        }
    }

    /// Record `dep` for the evaluation in progress. Subscribes only if the
    /// previous evaluation did not already.
    pub fn add_dep(&self, dep: &Rc<Dep>) {
        let id = dep.id();
        {
            let mut new_deps = self.inner.new_deps.borrow_mut();
            if new_deps.contains_key(&id) {
                return;
            }
            new_deps.insert(id, Rc::downgrade(dep));
        }
        if !self.inner.deps.borrow().contains_key(&id) {
            let sub: Weak<dyn Subscriber> = self.inner.this.clone();
            dep.add_sub(self.inner.id, sub);
        }
    }

    /// Drop subscriptions the last evaluation did not renew, then make the
    /// collected set current.
    fn cleanup_deps(&self) {
        let fresh = std::mem::take(&mut *self.inner.new_deps.borrow_mut());
        let stale: SmallVec<[Rc<Dep>; 8]> = self
            .inner
            .deps
            .borrow()
            .iter()
            .filter(|(id, _)| !fresh.contains_key(*id))
            .filter_map(|(_, dep)| dep.upgrade())
            .collect();
        for dep in stale {
            dep.remove_sub(self.inner.id);
        }
        *self.inner.deps.borrow_mut() = fresh;
    }

    /// Scheduler job: re-evaluate and fire the callback on change.
    pub fn run(&self) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }
        self.get_and_invoke(false)
    }

    fn get_and_invoke(&self, notify_subscribers: bool) -> Result<()> {
        let Some(value) = self.get()? else {
            return Ok(());
        };
        let changed = {
            let current = self.inner.value.borrow();
            !value.same(&current) || value.is_object() || self.inner.deep
        };
        if !changed {
            return Ok(());
        }

        let old = self.inner.value.replace(value.clone());
        self.inner.dirty.set(false);

        if notify_subscribers {
            return match &self.inner.dep {
                Some(dep) => dep.notify(),
                None => Ok(()),
            };
        }
        self.invoke_callback(&value, &old)
    }

    fn invoke_callback(&self, new: &Value, old: &Value) -> Result<()> {
        let Some(callback) = &self.inner.callback else {
            return Ok(());
        };
        match ReactiveContext::untracked(|| callback(new, old)) {
            Ok(()) => Ok(()),
            Err(source) if self.inner.user => {
                config::handle_error(&*source, self.owner().as_ref(), &self.location("callback"));
                Ok(())
            }
            Err(source) => Err(Error::evaluation(self.location("callback"), source)),
        }
    }

    /// React to a dependency change.
    pub fn update(&self) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }
        if self.inner.computed {
            match &self.inner.dep {
                Some(dep) if dep.has_subscribers() => self.get_and_invoke(true),
                _ => {
                    self.inner.dirty.set(true);
                    Ok(())
                }
            }
        } else if self.inner.sync {
            self.run()
        } else {
            scheduler::queue_watcher(self.clone())
        }
    }

    /// Value of a computed watcher, recomputing it if dirty. A torn-down
    /// watcher returns its last value.
    pub fn evaluate(&self) -> Result<Value> {
        if self.inner.dirty.get() && self.is_active() {
            if let Some(value) = self.get()? {
                *self.inner.value.borrow_mut() = value;
            }
            self.inner.dirty.set(false);
        }
        Ok(self.value())
    }

    /// Subscribe the current target to this computed watcher.
    pub fn depend(&self) {
        if !self.is_active() {
            return;
        }
        if let Some(dep) = &self.inner.dep {
            dep.depend();
        }
    }

    /// Unsubscribe from every Dep and deactivate. Idempotent.
    pub fn teardown(&self) {
        if !self.inner.active.get() {
            return;
        }
        if let Some(owner) = self.owner() {
            if !owner.is_being_destroyed() {
                owner.remove_watcher(self.inner.id);
            }
        }
        self.inner.unsubscribe_all();
        self.inner.active.set(false);
    }
}

impl WatcherInner {
    fn unsubscribe_all(&self) {
        let deps = std::mem::take(&mut *self.deps.borrow_mut());
        for dep in deps.values().filter_map(Weak::upgrade) {
            dep.remove_sub(self.id);
        }
    }
}

impl Subscriber for WatcherInner {
    fn id(&self) -> WatcherId {
        self.id
    }

    fn update(&self) -> Result<()> {
        match self.this.upgrade() {
            Some(inner) => Watcher { inner }.update(),
            None => Ok(()),
        }
    }
}

impl Drop for WatcherInner {
    fn drop(&mut self) {
        self.unsubscribe_all();
    }
}

impl PartialEq for Watcher {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.inner.id)
            .field("expression", &self.inner.expression)
            .field("kind", &self.kind())
            .field("active", &self.inner.active.get())
            .field("dirty", &self.inner.dirty.get())
            .field("deps", &self.dep_ids())
            .finish()
    }
}

fn path_getter(owner: Option<&Owner>, path: &str) -> Getter {
    let Some(parsed) = Path::parse(path) else {
        config::warn(
            &format!(
                "Failed watching path: \"{path}\" Watcher only accepts simple dot-delimited \
                 paths. For full control, use a function instead."
            ),
            owner,
        );
        return Rc::new(|| Ok(Value::Null));
    };
    let root = owner.map_or(Value::Null, |owner| Value::Object(owner.data().clone()));
    Rc::new(move || Ok(parsed.resolve(&root)))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{observe, Object};

    fn observed(entries: &[(&str, i32)]) -> Object {
        let object: Object = entries.iter().map(|(k, v)| (*k, *v)).collect();
        observe(&Value::from(object.clone()), false);
        object
    }

    fn sync_watcher(getter: Expression, log: &Rc<RefCell<Vec<(Value, Value)>>>) -> Watcher {
        let sink = log.clone();
        Watcher::new(
            None,
            getter,
            Some(callback(move |new, old| {
                sink.borrow_mut().push((new.clone(), old.clone()));
                Ok(())
            })),
            WatchOptions::default().sync(true),
            false,
        )
        .unwrap()
    }

    #[test]
    fn subscribes_to_exactly_what_it_reads() {
        let data = observed(&[("a", 1), ("b", 2), ("c", 3)]);
        let reader = data.clone();
        let watcher = Watcher::new(
            None,
            Expression::function(move || {
                let a = reader.get("a").unwrap_or_default();
                reader.get("a");
                reader.get("b");
                Ok(a)
            }),
            None,
            WatchOptions::default(),
            false,
        )
        .unwrap();

        let a = data.field_dep("a").unwrap();
        let b = data.field_dep("b").unwrap();
        let c = data.field_dep("c").unwrap();
        assert_eq!(watcher.dep_ids(), vec![a.id(), b.id()]);
        assert_eq!(a.subscriber_count(), 1);
        assert!(!c.has_subscribers());
        assert_eq!(watcher.value(), Value::from(1));
    }

    #[test]
    fn drops_dependencies_no_longer_read() {
        let data = observed(&[("flag", 1), ("a", 1), ("b", 2)]);
        let reader = data.clone();
        let log = Rc::new(RefCell::new(Vec::new()));
        let watcher = sync_watcher(
            Expression::function(move || {
                let key = if reader.get("flag") == Some(Value::from(1)) { "a" } else { "b" };
                Ok(reader.get(key).unwrap_or_default())
            }),
            &log,
        );
        let a = data.field_dep("a").unwrap();
        assert!(a.subscriber_ids().contains(&watcher.id()));

        data.set("flag", 0).unwrap();

        assert!(!a.has_subscribers());
        assert!(data.field_dep("b").unwrap().has_subscribers());
        assert_eq!(*log.borrow(), vec![(Value::from(2), Value::from(1))]);
    }

    #[test]
    fn unchanged_writes_do_not_fire() {
        let data = Object::from_iter([("n", Value::from(f64::NAN))]);
        observe(&Value::from(data.clone()), false);
        let reader = data.clone();
        let log = Rc::new(RefCell::new(Vec::new()));
        let _watcher = sync_watcher(
            Expression::function(move || Ok(reader.get("n").unwrap_or_default())),
            &log,
        );

        data.set("n", f64::NAN).unwrap();
        assert!(log.borrow().is_empty());

        data.set("n", 1.0).unwrap();
        data.set("n", 1.0).unwrap();
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn sync_callback_reads_are_not_tracked_by_the_evaluating_watcher() {
        let data = observed(&[("x", 1), ("a", 1), ("secret", 1)]);
        let peek = data.clone();
        let _sync = Watcher::new(
            None,
            Expression::labeled("a", {
                let reader = data.clone();
                move || Ok(reader.get("a").unwrap_or_default())
            }),
            Some(callback(move |_, _| {
                peek.get("secret");
                Ok(())
            })),
            WatchOptions::user().sync(true),
            false,
        )
        .unwrap();

        let writer = data.clone();
        let outer = Watcher::new(
            None,
            Expression::function(move || {
                let x = writer.get("x").unwrap_or_default();
                writer.set("a", x.as_f64().unwrap_or(0.0) + 1.0)?;
                Ok(x)
            }),
            None,
            WatchOptions::default(),
            false,
        )
        .unwrap();

        let secret = data.field_dep("secret").unwrap();
        assert!(!secret.subscriber_ids().contains(&outer.id()));
        assert!(!outer.dep_ids().contains(&secret.id()));
    }

    #[test]
    fn torn_down_computed_does_not_resubscribe() {
        let data = observed(&[("a", 1)]);
        let reader = data.clone();
        let computed = Watcher::new(
            None,
            Expression::function(move || Ok(reader.get("a").unwrap_or_default())),
            None,
            WatchOptions::computed(),
            false,
        )
        .unwrap();
        assert_eq!(computed.evaluate().unwrap(), Value::from(1));

        computed.teardown();
        data.set("a", 2).unwrap();
        computed.update().unwrap();
        computed.depend();

        assert_eq!(computed.evaluate().unwrap(), Value::from(1));
        assert!(!data.field_dep("a").unwrap().has_subscribers());
        assert!(computed.dep_ids().is_empty());
    }

    #[test]
    fn computed_is_lazy() {
        let data = observed(&[("a", 1)]);
        let reader = data.clone();
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let computed = Watcher::new(
            None,
            Expression::function(move || {
                counter.set(counter.get() + 1);
                Ok(reader.get("a").unwrap_or_default())
            }),
            None,
            WatchOptions::computed(),
            false,
        )
        .unwrap();

        assert!(computed.is_dirty());
        assert_eq!(calls.get(), 0);

        assert_eq!(computed.evaluate().unwrap(), Value::from(1));
        assert_eq!(computed.evaluate().unwrap(), Value::from(1));
        assert_eq!(calls.get(), 1);

        data.set("a", 2).unwrap();
        data.set("a", 3).unwrap();
        assert!(computed.is_dirty());
        assert_eq!(calls.get(), 1);

        assert_eq!(computed.evaluate().unwrap(), Value::from(3));
        assert_eq!(computed.evaluate().unwrap(), Value::from(3));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn user_getter_failure_is_reported() {
        crate::reset();
        let reports = Rc::new(RefCell::new(Vec::new()));
        let sink = reports.clone();
        config::set_error_handler(move |err, _, location| {
            sink.borrow_mut().push(format!("{location}: {err}"));
        });

        let watcher = Watcher::new(
            None,
            Expression::labeled("broken", || Err("boom".into())),
            None,
            WatchOptions::user(),
            false,
        )
        .unwrap();

        assert!(watcher.is_active());
        assert_eq!(*reports.borrow(), vec!["getter for watcher \"broken\": boom".to_string()]);
        crate::reset();
    }

    #[test]
    fn internal_getter_failure_is_returned() {
        let result = Watcher::new(
            None,
            Expression::labeled("broken", || Err("boom".into())),
            None,
            WatchOptions::default(),
            false,
        );

        let err = result.unwrap_err();
        assert!(matches!(err, crate::Error::Evaluation { .. }));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn teardown_unsubscribes_everywhere() {
        let data = observed(&[("a", 1)]);
        let reader = data.clone();
        let log = Rc::new(RefCell::new(Vec::new()));
        let watcher = sync_watcher(
            Expression::function(move || Ok(reader.get("a").unwrap_or_default())),
            &log,
        );

        watcher.teardown();
        watcher.teardown();
        data.set("a", 2).unwrap();

        assert!(!watcher.is_active());
        assert!(!data.field_dep("a").unwrap().has_subscribers());
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn dropping_the_last_handle_unsubscribes() {
        let data = observed(&[("a", 1)]);
        let reader = data.clone();
        let log = Rc::new(RefCell::new(Vec::new()));
        let watcher = sync_watcher(
            Expression::function(move || Ok(reader.get("a").unwrap_or_default())),
            &log,
        );
        assert!(data.field_dep("a").unwrap().has_subscribers());

        drop(watcher);

        assert!(!data.field_dep("a").unwrap().has_subscribers());
    }

    #[test]
    fn invalid_path_warns_and_yields_null() {
        crate::reset();
        let warnings = Rc::new(RefCell::new(Vec::new()));
        let sink = warnings.clone();
        config::set_warn_handler(move |msg, _| sink.borrow_mut().push(msg.to_string()));

        let watcher =
            Watcher::new(None, Expression::from("a + b"), None, WatchOptions::user(), false)
                .unwrap();

        assert_eq!(watcher.value(), Value::Null);
        assert_eq!(watcher.expression(), "a + b");
        assert!(warnings.borrow()[0].starts_with("Failed watching path: \"a + b\""));
        crate::reset();
    }
}
