//! Keyed Containers
//!
//! An [`Object`] is an insertion-ordered map from field names to values.
//! Until it is observed it behaves like a plain shared map. Once observed,
//! every field carries its own [`Dep`]: reading the field while a watcher
//! evaluates subscribes that watcher, writing a different value notifies it.
//!
//! Reads that depend on the key set rather than on one field (`keys`, `len`,
//! `contains_key`, or reading a key that does not exist) subscribe to the
//! container's structural Dep, which fires when keys are added or removed.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::error::Result;

use super::context::ReactiveContext;
use super::dep::Dep;
use super::observer::{self, Observer};
use super::value::{ContainerId, Key, Value};

/// Side-effect hook run on every write of one field, before the value is
/// stored. Receives the field name and the incoming value.
pub type Interceptor = Rc<dyn Fn(&str, &Value)>;

struct Field {
    value: Value,
    reactive: Option<FieldDep>,
}

struct FieldDep {
    dep: Rc<Dep>,
    child: Option<Rc<Observer>>,
    shallow: bool,
    interceptor: Option<Interceptor>,
}

struct ObjectInner {
    id: ContainerId,
    fields: RefCell<IndexMap<String, Field>>,
    observer: RefCell<Option<Rc<Observer>>>,
    frozen: bool,
}

/// A shared keyed container.
#[derive(Clone)]
pub struct Object {
    inner: Rc<ObjectInner>,
}

/// Non-owning reference held by an object's observer.
#[derive(Clone)]
pub(crate) struct WeakObject(Weak<ObjectInner>);

impl WeakObject {
    pub(crate) fn upgrade(&self) -> Option<Object> {
        self.0.upgrade().map(|inner| Object { inner })
    }
}

impl Object {
    pub fn new() -> Self {
        Self::with_fields(IndexMap::new(), false)
    }

    /// An immutable object. It is never observed, rejects every mutation
    /// and stops deep traversal.
    pub fn frozen<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self::with_fields(Self::plain_fields(entries), true)
    }

    fn with_fields(fields: IndexMap<String, Field>, frozen: bool) -> Self {
        Self {
            inner: Rc::new(ObjectInner {
                id: ContainerId::next(),
                fields: RefCell::new(fields),
                observer: RefCell::new(None),
                frozen,
            }),
        }
    }

    fn plain_fields<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> IndexMap<String, Field>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        entries
            .into_iter()
            .map(|(k, v)| {
                let field = Field {
                    value: v.into(),
                    reactive: None,
                };
                (k.into(), field)
            })
            .collect()
    }

    pub fn id(&self) -> ContainerId {
        self.inner.id
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.frozen
    }

    pub fn observer(&self) -> Option<Rc<Observer>> {
        self.inner.observer.borrow().clone()
    }

    pub fn is_observed(&self) -> bool {
        self.inner.observer.borrow().is_some()
    }

    // ------------------------------------------------------------------
    // Tracked reads
    // ------------------------------------------------------------------

    /// Read a field, subscribing the current watcher.
    pub fn get(&self, key: &str) -> Option<Value> {
        let found = {
            let fields = self.inner.fields.borrow();
            fields.get(key).map(|field| {
                let tracking = field
                    .reactive
                    .as_ref()
                    .map(|r| (r.dep.clone(), r.child.clone()));
                (field.value.clone(), tracking)
            })
        };

        let Some((value, tracking)) = found else {
            self.depend_structure();
            return None;
        };

        if let Some((dep, child)) = tracking {
            if ReactiveContext::is_active() {
                dep.depend();
                if let Some(child) = child {
                    child.dep().depend();
                    if let Value::Array(array) = &value {
                        array.depend_elements();
                    }
                }
            }
        }
        Some(value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.depend_structure();
        self.contains_key_untracked(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.depend_structure();
        self.keys_untracked()
    }

    pub fn len(&self) -> usize {
        self.depend_structure();
        self.len_untracked()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read every field, in insertion order.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.keys()
            .into_iter()
            .filter_map(|key| self.get(&key).map(|value| (key, value)))
            .collect()
    }

    fn depend_structure(&self) {
        if !ReactiveContext::is_active() {
            return;
        }
        if let Some(observer) = self.observer() {
            observer.dep().depend();
        }
    }

    // ------------------------------------------------------------------
    // Untracked reads
    // ------------------------------------------------------------------

    pub fn get_untracked(&self, key: &str) -> Option<Value> {
        self.inner.fields.borrow().get(key).map(|f| f.value.clone())
    }

    pub fn contains_key_untracked(&self, key: &str) -> bool {
        self.inner.fields.borrow().contains_key(key)
    }

    pub fn keys_untracked(&self) -> Vec<String> {
        self.inner.fields.borrow().keys().cloned().collect()
    }

    pub fn len_untracked(&self) -> usize {
        self.inner.fields.borrow().len()
    }

    pub fn entries_untracked(&self) -> Vec<(String, Value)> {
        self.inner
            .fields
            .borrow()
            .iter()
            .map(|(k, f)| (k.clone(), f.value.clone()))
            .collect()
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Write a field. Existing fields go through the reactive write path;
    /// new fields are added through [`observer::set`], which notifies the
    /// structural Dep.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<Value> {
        observer::set(&Value::Object(self.clone()), Key::from(key), value.into())
    }

    /// Remove a field through [`observer::delete`].
    pub fn remove(&self, key: &str) -> Result<()> {
        observer::delete(&Value::Object(self.clone()), Key::from(key))
    }

    /// Store a value without any notification. A new key is added as a
    /// plain, non-reactive field.
    pub fn insert_untracked(&self, key: impl Into<String>, value: impl Into<Value>) {
        if self.inner.frozen {
            return;
        }
        let value = value.into();
        self.inner
            .fields
            .borrow_mut()
            .entry(key.into())
            .and_modify(|field| field.value = value.clone())
            .or_insert_with(|| Field {
                value: value.clone(),
                reactive: None,
            });
    }

    /// The reactive setter of an existing field.
    pub(crate) fn write(&self, key: &str, new: Value) -> Result<()> {
        if self.inner.frozen {
            return Ok(());
        }

        let (interceptor, dep, shallow) = {
            let fields = self.inner.fields.borrow();
            let Some(field) = fields.get(key) else {
                return Ok(());
            };
            if field.value.same(&new) {
                return Ok(());
            }
            match &field.reactive {
                Some(r) => (r.interceptor.clone(), Some(r.dep.clone()), r.shallow),
                None => (None, None, true),
            }
        };

        if let Some(interceptor) = interceptor {
            interceptor(key, &new);
        }
        let child = if shallow {
            None
        } else {
            observer::observe(&new, false)
        };

        if let Some(field) = self.inner.fields.borrow_mut().get_mut(key) {
            field.value = new;
            if let Some(reactive) = field.reactive.as_mut() {
                reactive.child = child;
            }
        }

        match dep {
            Some(dep) => dep.notify(),
            None => Ok(()),
        }
    }

    /// Install (or replace) a reactive field. Any previous Dep of the field
    /// is discarded along with its subscriptions.
    pub(crate) fn install_reactive(
        &self,
        key: &str,
        value: Value,
        child: Option<Rc<Observer>>,
        shallow: bool,
        interceptor: Option<Interceptor>,
    ) {
        let field = Field {
            value,
            reactive: Some(FieldDep {
                dep: Dep::new(),
                child,
                shallow,
                interceptor,
            }),
        };
        self.inner.fields.borrow_mut().insert(key.to_string(), field);
    }

    pub(crate) fn remove_field(&self, key: &str) -> Option<Value> {
        self.inner
            .fields
            .borrow_mut()
            .shift_remove(key)
            .map(|field| field.value)
    }

    /// Dep of a reactive field, for inspection.
    pub fn field_dep(&self, key: &str) -> Option<Rc<Dep>> {
        self.inner
            .fields
            .borrow()
            .get(key)
            .and_then(|f| f.reactive.as_ref())
            .map(|r| r.dep.clone())
    }

    pub(crate) fn attach_observer(&self, observer: Rc<Observer>) {
        *self.inner.observer.borrow_mut() = Some(observer);
    }

    pub(crate) fn downgrade(&self) -> WeakObject {
        WeakObject(Rc::downgrade(&self.inner))
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> FromIterator<(K, V)> for Object
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::with_fields(Self::plain_fields(iter), false)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.inner.id)
            .field("keys", &self.keys_untracked())
            .field("observed", &self.is_observed())
            .field("frozen", &self.inner.frozen)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
