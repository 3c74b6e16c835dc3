//! Ordered Sequences
//!
//! An [`Array`] cannot have per-index Deps the way object fields do, so
//! the sequence is instrumented as a whole: every read subscribes to the
//! observer's structural Dep, and the closed set of mutating operations
//! (`push`, `pop`, `shift`, `unshift`, `splice`, `sort_by`, `reverse`) are
//! the only way to change contents. Each of them performs the mutation,
//! observes inserted elements, then notifies the structural Dep.
//!
//! Index assignment and removal ([`Array::set`], [`Array::remove`]) are
//! spelled as splices, so they take the same path.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::config;
use crate::error::Result;

use super::context::ReactiveContext;
use super::observer::{self, Observer};
use super::value::{ContainerId, Key, Value};

struct ArrayInner {
    id: ContainerId,
    items: RefCell<Vec<Value>>,
    observer: RefCell<Option<Rc<Observer>>>,
    frozen: bool,
}

/// A shared ordered sequence.
#[derive(Clone)]
pub struct Array {
    inner: Rc<ArrayInner>,
}

#[derive(Clone)]
pub(crate) struct WeakArray(Weak<ArrayInner>);

impl WeakArray {
    pub(crate) fn upgrade(&self) -> Option<Array> {
        self.0.upgrade().map(|inner| Array { inner })
    }
}

impl Array {
    pub fn new() -> Self {
        Self::with_items(Vec::new(), false)
    }

    /// An immutable sequence: never observed, never mutated, not traversed.
    pub fn frozen(items: impl IntoIterator<Item = Value>) -> Self {
        Self::with_items(items.into_iter().collect(), true)
    }

    fn with_items(items: Vec<Value>, frozen: bool) -> Self {
        Self {
            inner: Rc::new(ArrayInner {
                id: ContainerId::next(),
                items: RefCell::new(items),
                observer: RefCell::new(None),
                frozen,
            }),
        }
    }

    pub fn id(&self) -> ContainerId {
        self.inner.id
    }

    pub fn ptr_eq(&self, other: &Array) -> bool {
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
    // Reads
    // ------------------------------------------------------------------

    pub fn get(&self, index: usize) -> Option<Value> {
        self.depend_structure();
        self.get_untracked(index)
    }

    pub fn len(&self) -> usize {
        self.depend_structure();
        self.len_untracked()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.depend_structure();
        self.to_vec_untracked()
    }

    pub fn get_untracked(&self, index: usize) -> Option<Value> {
        self.inner.items.borrow().get(index).cloned()
    }

    pub fn len_untracked(&self) -> usize {
        self.inner.items.borrow().len()
    }

    pub fn to_vec_untracked(&self) -> Vec<Value> {
        self.inner.items.borrow().clone()
    }

    fn depend_structure(&self) {
        if !ReactiveContext::is_active() {
            return;
        }
        if let Some(observer) = self.observer() {
            observer.dep().depend();
        }
    }

    /// Subscribe the current watcher to the structural Dep of every element
    /// container, recursively through nested sequences.
    pub(crate) fn depend_elements(&self) {
        let mut seen = HashSet::new();
        seen.insert(self.id());
        self.depend_elements_inner(&mut seen);
    }

    fn depend_elements_inner(&self, seen: &mut HashSet<ContainerId>) {
        for item in self.to_vec_untracked() {
            match &item {
                Value::Object(object) => {
                    if let Some(observer) = object.observer() {
                        observer.dep().depend();
                    }
                }
                Value::Array(array) => {
                    if let Some(observer) = array.observer() {
                        observer.dep().depend();
                    }
                    if seen.insert(array.id()) {
                        array.depend_elements_inner(seen);
                    }
                }
                _ => {}
            }
        }
    }

    // ------------------------------------------------------------------
    // Intercepted mutations
    // ------------------------------------------------------------------

    /// Append an element. Returns the new length.
    pub fn push(&self, value: impl Into<Value>) -> Result<usize> {
        let value = value.into();
        if !self.writable("push") {
            return Ok(self.len_untracked());
        }
        let len = {
            let mut items = self.inner.items.borrow_mut();
            items.push(value.clone());
            items.len()
        };
        self.after_mutation(&[value])?;
        Ok(len)
    }

    pub fn pop(&self) -> Result<Option<Value>> {
        if !self.writable("pop") {
            return Ok(None);
        }
        let popped = self.inner.items.borrow_mut().pop();
        self.after_mutation(&[])?;
        Ok(popped)
    }

    pub fn shift(&self) -> Result<Option<Value>> {
        if !self.writable("shift") {
            return Ok(None);
        }
        let shifted = {
            let mut items = self.inner.items.borrow_mut();
            if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            }
        };
        self.after_mutation(&[])?;
        Ok(shifted)
    }

    /// Prepend elements, keeping their order. Returns the new length.
    pub fn unshift(&self, values: impl IntoIterator<Item = Value>) -> Result<usize> {
        let values: Vec<Value> = values.into_iter().collect();
        if !self.writable("unshift") {
            return Ok(self.len_untracked());
        }
        let len = {
            let mut items = self.inner.items.borrow_mut();
            items.splice(0..0, values.iter().cloned());
            items.len()
        };
        self.after_mutation(&values)?;
        Ok(len)
    }

    /// Remove `delete_count` elements at `start` and insert `values` there.
    /// Out-of-range bounds are clamped. Returns the removed elements.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        values: impl IntoIterator<Item = Value>,
    ) -> Result<Vec<Value>> {
        let values: Vec<Value> = values.into_iter().collect();
        if !self.writable("splice") {
            return Ok(Vec::new());
        }
        let removed = {
            let mut items = self.inner.items.borrow_mut();
            let start = start.min(items.len());
            let end = start.saturating_add(delete_count).min(items.len());
            items.splice(start..end, values.iter().cloned()).collect()
        };
        self.after_mutation(&values)?;
        Ok(removed)
    }

    /// Sort in place with a caller-supplied comparator.
    ///
    /// The comparator runs against a snapshot, so it may read the array.
    pub fn sort_by<F>(&self, mut compare: F) -> Result<()>
    where
        F: FnMut(&Value, &Value) -> Ordering,
    {
        if !self.writable("sort") {
            return Ok(());
        }
        let mut sorted = self.to_vec_untracked();
        sorted.sort_by(&mut compare);
        *self.inner.items.borrow_mut() = sorted;
        self.after_mutation(&[])
    }

    pub fn reverse(&self) -> Result<()> {
        if !self.writable("reverse") {
            return Ok(());
        }
        self.inner.items.borrow_mut().reverse();
        self.after_mutation(&[])
    }

    /// Assign an index through [`observer::set`]. Indices past the end widen
    /// the sequence with `Null`.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Result<Value> {
        observer::set(&Value::Array(self.clone()), Key::Index(index), value.into())
    }

    /// Remove an index through [`observer::delete`].
    pub fn remove(&self, index: usize) -> Result<()> {
        observer::delete(&Value::Array(self.clone()), Key::Index(index))
    }

    pub(crate) fn set_index(&self, index: usize, value: Value) -> Result<()> {
        if !self.writable("set") {
            return Ok(());
        }
        {
            let mut items = self.inner.items.borrow_mut();
            if items.len() < index {
                let grow = (index - items.len()).saturating_add(1);
                if items.try_reserve(grow).is_err() {
                    drop(items);
                    config::warn(&format!("Cannot set index {index}: array cannot grow that far"), None);
                    return Ok(());
                }
                items.resize(index, Value::Null);
            }
        }
        self.splice(index, 1, [value]).map(drop)
    }

    fn writable(&self, op: &str) -> bool {
        if self.inner.frozen {
            config::warn(&format!("Cannot {op} on a frozen array"), None);
            return false;
        }
        true
    }

    fn after_mutation(&self, inserted: &[Value]) -> Result<()> {
        let Some(observer) = self.observer() else {
            return Ok(());
        };
        for value in inserted {
            observer::observe(value, false);
        }
        observer.dep().notify()
    }

    pub(crate) fn attach_observer(&self, observer: Rc<Observer>) {
        *self.inner.observer.borrow_mut() = Some(observer);
    }

    pub(crate) fn downgrade(&self) -> WeakArray {
        WeakArray(Rc::downgrade(&self.inner))
    }
}

impl Default for Array {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vec<Value>> for Array {
    fn from(items: Vec<Value>) -> Self {
        Self::with_items(items, false)
    }
}

impl<V: Into<Value>> FromIterator<V> for Array {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        Self::with_items(iter.into_iter().map(Into::into).collect(), false)
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Array")
            .field("id", &self.inner.id)
            .field("len", &self.len_untracked())
            .field("observed", &self.is_observed())
            .field("frozen", &self.inner.frozen)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{observe, Object};

    fn numbers(array: &Array) -> Vec<f64> {
        array
            .to_vec_untracked()
            .iter()
            .map(|v| v.as_f64().unwrap_or(f64::NAN))
            .collect()
    }

    #[test]
    fn mutators_follow_sequence_semantics() {
        let array = Array::from_iter([1, 2, 3]);

        assert_eq!(array.push(4).unwrap(), 4);
        assert_eq!(array.pop().unwrap(), Some(Value::from(4)));
        assert_eq!(array.shift().unwrap(), Some(Value::from(1)));
        assert_eq!(array.unshift([Value::from(0), Value::from(1)]).unwrap(), 4);
        assert_eq!(numbers(&array), vec![0.0, 1.0, 2.0, 3.0]);

        let removed = array.splice(1, 2, [Value::from(9)]).unwrap();
        assert_eq!(removed, vec![Value::from(1), Value::from(2)]);
        assert_eq!(numbers(&array), vec![0.0, 9.0, 3.0]);

        array.reverse().unwrap();
        assert_eq!(numbers(&array), vec![3.0, 9.0, 0.0]);

        array
            .sort_by(|a, b| a.as_f64().partial_cmp(&b.as_f64()).unwrap_or(Ordering::Equal))
            .unwrap();
        assert_eq!(numbers(&array), vec![0.0, 3.0, 9.0]);
    }

    #[test]
    fn splice_clamps_out_of_range_bounds() {
        let array = Array::from_iter([1, 2]);
        let removed = array.splice(10, 5, [Value::from(3)]).unwrap();

        assert!(removed.is_empty());
        assert_eq!(numbers(&array), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn set_past_the_end_widens_with_null() {
        let array = Array::from_iter([1]);
        array.set(3, 7).unwrap();

        assert_eq!(
            array.to_vec_untracked(),
            vec![Value::from(1), Value::Null, Value::Null, Value::from(7)]
        );

        array.set(0, 5).unwrap();
        assert_eq!(array.get_untracked(0), Some(Value::from(5)));
        assert_eq!(array.len_untracked(), 4);
    }

    #[test]
    fn set_at_an_unreachable_index_warns_and_leaves_the_array() {
        crate::reset();
        let warnings = Rc::new(RefCell::new(Vec::new()));
        let sink = warnings.clone();
        config::set_warn_handler(move |msg, _| sink.borrow_mut().push(msg.to_string()));

        let array = Array::from_iter([1]);
        observe(&Value::from(array.clone()), false);

        assert_eq!(array.set(usize::MAX, 7).unwrap(), Value::from(7));
        assert_eq!(array.len_untracked(), 1);
        assert_eq!(warnings.borrow().len(), 1);
        assert!(warnings.borrow()[0].contains("cannot grow"));
        crate::reset();
    }

    #[test]
    fn inserted_containers_are_observed() {
        let array = Array::new();
        observe(&Value::from(array.clone()), false);

        let child = Object::from_iter([("x", 1)]);
        array.push(child.clone()).unwrap();
        assert!(child.is_observed());

        let late = Object::new();
        array.splice(0, 0, [Value::from(late.clone())]).unwrap();
        assert!(late.is_observed());
    }

    #[test]
    fn frozen_array_is_left_untouched() {
        let array = Array::frozen([Value::from(1)]);
        assert_eq!(array.push(2).unwrap(), 1);
        assert_eq!(array.pop().unwrap(), None);
        assert_eq!(array.len_untracked(), 1);
    }
}
