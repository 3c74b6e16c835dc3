//! Deep Traversal
//!
//! Deep watchers need to depend on every field below their value, not just
//! the fields their getter happened to read. [`traverse`] reads them all
//! through the tracked read path.

use std::collections::HashSet;

use super::value::{ContainerId, Value};

/// Read every field reachable from `value`, subscribing the current watcher.
///
/// Stops at scalars, opaque values and frozen containers. Each container is
/// visited once per call, so cyclic graphs terminate.
pub fn traverse(value: &Value) {
    let mut seen = HashSet::new();
    visit(value, &mut seen);
}

fn visit(value: &Value, seen: &mut HashSet<ContainerId>) {
    match value {
        Value::Object(object) => {
            if object.is_frozen() || !seen.insert(object.id()) {
                return;
            }
            for key in object.keys() {
                if let Some(child) = object.get(&key) {
                    visit(&child, seen);
                }
            }
        }
        Value::Array(array) => {
            if array.is_frozen() || !seen.insert(array.id()) {
                return;
            }
            for child in array.to_vec() {
                visit(&child, seen);
            }
        }
        _ => {}
    }
}
