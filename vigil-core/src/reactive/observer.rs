//! Observers
//!
//! [`observe`] turns a plain container into a reactive one, at most once:
//! the resulting [`Observer`] is stored inside the container, and observing
//! again returns it. Objects get one Dep per field ([`define_reactive`]);
//! arrays get their elements observed and rely on the intercepted mutators.
//! Either way the observer owns one structural Dep, notified whenever the
//! container's shape changes.
//!
//! Observation is recursive and cycle safe: the observer is attached before
//! the children are walked, so a container that reaches itself stops at the
//! existing observer.
//!
//! [`set`] and [`delete`] are the structural mutation entry points.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::config;
use crate::error::Result;

use super::array::{Array, WeakArray};
use super::dep::Dep;
use super::object::{Interceptor, Object, WeakObject};
use super::value::{Key, Value};

thread_local! {
    static SHOULD_OBSERVE: Cell<bool> = const { Cell::new(true) };
}

/// Enable or disable creation of new observers on this thread.
///
/// Existing observers keep working; only `observe` on a not-yet-observed
/// container is affected.
pub fn toggle_observing(enabled: bool) {
    SHOULD_OBSERVE.with(|flag| flag.set(enabled));
}

pub fn is_observing() -> bool {
    SHOULD_OBSERVE.with(Cell::get)
}

#[derive(Clone)]
enum Observed {
    Object(WeakObject),
    Array(WeakArray),
}

/// Reactive bookkeeping attached to one observed container.
pub struct Observer {
    dep: Rc<Dep>,
    root_count: Cell<u32>,
    value: Observed,
}

impl Observer {
    fn new(value: Observed) -> Rc<Self> {
        Rc::new(Self {
            dep: Dep::new(),
            root_count: Cell::new(0),
            value,
        })
    }

    /// The structural Dep.
    pub fn dep(&self) -> &Rc<Dep> {
        &self.dep
    }

    /// How many owners use this container as their root state.
    pub fn root_count(&self) -> u32 {
        self.root_count.get()
    }

    pub(crate) fn release_root(&self) {
        self.root_count.set(self.root_count.get().saturating_sub(1));
    }

    /// The observed container, while it is alive.
    pub fn value(&self) -> Option<Value> {
        match &self.value {
            Observed::Object(object) => object.upgrade().map(Value::Object),
            Observed::Array(array) => array.upgrade().map(Value::Array),
        }
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("dep", &self.dep.id())
            .field("root_count", &self.root_count.get())
            .finish()
    }
}

/// Observe `value` if it is an observable container.
///
/// Returns `None` for scalars, opaque values, frozen containers, and, while
/// observation is toggled off, containers that are not observed yet.
/// `as_root` marks the container as some owner's root state.
pub fn observe(value: &Value, as_root: bool) -> Option<Rc<Observer>> {
    let observer = match value {
        Value::Object(object) => match object.observer() {
            Some(existing) => existing,
            None if is_observing() && !object.is_frozen() => observe_object(object),
            None => return None,
        },
        Value::Array(array) => match array.observer() {
            Some(existing) => existing,
            None if is_observing() && !array.is_frozen() => observe_array(array),
            None => return None,
        },
        _ => return None,
    };
    if as_root {
        observer.root_count.set(observer.root_count.get() + 1);
    }
    Some(observer)
}

fn observe_object(object: &Object) -> Rc<Observer> {
    let observer = Observer::new(Observed::Object(object.downgrade()));
    object.attach_observer(observer.clone());
    for (key, value) in object.entries_untracked() {
        define_reactive(object, &key, value, None, false);
    }
    observer
}

fn observe_array(array: &Array) -> Rc<Observer> {
    let observer = Observer::new(Observed::Array(array.downgrade()));
    array.attach_observer(observer.clone());
    for value in array.to_vec_untracked() {
        observe(&value, false);
    }
    observer
}

/// Make `key` a reactive field of `object` holding `value`.
///
/// `interceptor` runs on every changed write; `shallow` keeps the value
/// itself from being observed.
pub fn define_reactive(
    object: &Object,
    key: &str,
    value: Value,
    interceptor: Option<Interceptor>,
    shallow: bool,
) {
    let child = if shallow { None } else { observe(&value, false) };
    object.install_reactive(key, value, child, shallow, interceptor);
}

/// Set a key on a container, adding it reactively if it is new.
///
/// * sequence + index: widen to the index if needed, then splice in;
/// * object + existing key: the field's normal reactive write;
/// * object + new key: plain insert when unobserved, otherwise a new
///   reactive field plus a structural notification. Refused (with a
///   warning) on root state and frozen objects.
///
/// Anything else is a warning and a no-op. Returns the value.
pub fn set(target: &Value, key: impl Into<Key>, value: Value) -> Result<Value> {
    let key = key.into();
    match target {
        Value::Array(array) => {
            let Some(index) = key.as_index() else {
                config::warn(&format!("Cannot set non-index key \"{key}\" on an array"), None);
                return Ok(value);
            };
            array.set_index(index, value.clone())?;
            Ok(value)
        }
        Value::Object(object) => {
            let name = key.to_string();
            if object.is_frozen() {
                config::warn(&format!("Cannot set property \"{name}\" on a frozen object"), None);
                return Ok(value);
            }
            if object.contains_key_untracked(&name) {
                object.write(&name, value.clone())?;
                return Ok(value);
            }

            let observer = object.observer();
            if observer.as_ref().is_some_and(|ob| ob.root_count() > 0) {
                config::warn(
                    "Avoid adding reactive properties to root state at runtime - \
                     declare it upfront.",
                    None,
                );
                return Ok(value);
            }
            match observer {
                None => object.insert_untracked(name, value.clone()),
                Some(observer) => {
                    define_reactive(object, &name, value.clone(), None, false);
                    observer.dep().notify()?;
                }
            }
            Ok(value)
        }
        other => {
            config::warn(
                &format!("Cannot set reactive property on a null or primitive value: {other}"),
                None,
            );
            Ok(value)
        }
    }
}

/// Remove a key from a container, notifying structural subscribers.
///
/// Refused (with a warning) on root state, frozen containers and
/// non-containers. Removing a missing object key is a silent no-op.
pub fn delete(target: &Value, key: impl Into<Key>) -> Result<()> {
    let key = key.into();
    match target {
        Value::Array(array) => {
            let Some(index) = key.as_index() else {
                config::warn(&format!("Cannot delete non-index key \"{key}\" from an array"), None);
                return Ok(());
            };
            array.splice(index, 1, []).map(drop)
        }
        Value::Object(object) => {
            let name = key.to_string();
            if object.is_frozen() {
                config::warn(&format!("Cannot delete property \"{name}\" of a frozen object"), None);
                return Ok(());
            }
            let observer = object.observer();
            if observer.as_ref().is_some_and(|ob| ob.root_count() > 0) {
                config::warn(
                    "Avoid deleting properties on root state - just set it to null.",
                    None,
                );
                return Ok(());
            }
            if object.remove_field(&name).is_none() {
                return Ok(());
            }
            match observer {
                Some(observer) => observer.dep().notify(),
                None => Ok(()),
            }
        }
        other => {
            config::warn(
                &format!("Cannot delete reactive property on a null or primitive value: {other}"),
                None,
            );
            Ok(())
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use crate::reactive::Opaque;

    #[test]
    fn observe_is_idempotent() {
        let value = Value::from(Object::from_iter([("a", 1)]));
        let first = observe(&value, false).unwrap();
        let second = observe(&value, false).unwrap();

        assert!(Rc::ptr_eq(&first, &second));
        assert!(first.value().unwrap().same(&value));
    }

    #[test]
    fn observe_skips_non_containers() {
        assert!(observe(&Value::from(1), false).is_none());
        assert!(observe(&Value::from("s"), false).is_none());
        assert!(observe(&Value::from(Opaque::new(5_u8)), false).is_none());
    }

    #[test]
    fn observe_recurses_into_nested_containers() {
        let inner = Object::from_iter([("x", 1)]);
        let list = Array::from_iter([Value::from(inner.clone())]);
        let root = Object::from_iter([("list", Value::from(list.clone()))]);

        observe(&Value::from(root), false);

        assert!(list.is_observed());
        assert!(inner.is_observed());
        assert!(inner.field_dep("x").is_some());
    }

    #[test]
    fn observe_terminates_on_cycles() {
        let a = Object::new();
        let b = Object::from_iter([("a", Value::from(a.clone()))]);
        a.insert_untracked("b", b.clone());
        a.insert_untracked("me", a.clone());

        let observer = observe(&Value::from(a.clone()), false);

        assert!(observer.is_some());
        assert!(b.is_observed());
        assert!(Rc::ptr_eq(&a.observer().unwrap(), &observer.unwrap()));
    }

    #[test]
    fn toggled_off_observation_leaves_containers_plain() {
        let object = Object::from_iter([("a", 1)]);
        toggle_observing(false);
        let result = observe(&Value::from(object.clone()), false);
        toggle_observing(true);

        assert!(result.is_none());
        assert!(!object.is_observed());
    }

    #[test]
    fn root_count_is_incremented_for_root_state() {
        let value = Value::from(Object::new());
        observe(&value, true);
        let observer = observe(&value, true).unwrap();
        assert_eq!(observer.root_count(), 2);

        observer.release_root();
        assert_eq!(observer.root_count(), 1);
    }

    #[test]
    fn set_on_root_state_warns_and_skips() {
        crate::reset();
        let warnings = Rc::new(RefCell::new(Vec::new()));
        let sink = warnings.clone();
        config::set_warn_handler(move |msg, _| sink.borrow_mut().push(msg.to_string()));

        let root = Object::from_iter([("a", 1)]);
        observe(&Value::from(root.clone()), true);

        set(&Value::from(root.clone()), "b", Value::from(2)).unwrap();
        delete(&Value::from(root.clone()), "a").unwrap();
        set(&Value::from(3), "x", Value::Null).unwrap();

        assert!(!root.contains_key_untracked("b"));
        assert!(root.contains_key_untracked("a"));
        assert_eq!(warnings.borrow().len(), 3);
        crate::reset();
    }

    #[test]
    fn set_new_key_on_observed_object_is_reactive() {
        let object = Object::new();
        observe(&Value::from(object.clone()), false);

        set(&Value::from(object.clone()), "b", Value::from(2)).unwrap();

        assert!(object.field_dep("b").is_some());
        assert_eq!(object.get_untracked("b"), Some(Value::from(2)));
    }

    #[test]
    fn delete_removes_keys_and_indices() {
        let object = Object::from_iter([("a", 1), ("b", 2)]);
        delete(&Value::from(object.clone()), "a").unwrap();
        delete(&Value::from(object.clone()), "zzz").unwrap();
        assert_eq!(object.keys_untracked(), vec!["b".to_string()]);

        let array = Array::from_iter([1, 2, 3]);
        delete(&Value::from(array.clone()), 1usize).unwrap();
        assert_eq!(array.to_vec_untracked(), vec![Value::from(1), Value::from(3)]);
    }
}
