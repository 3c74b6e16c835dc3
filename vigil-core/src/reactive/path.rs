//! Path Expressions
//!
//! Watchers may be given a dot-delimited path (`"user.name"`,
//! `"items.0.title"`) instead of a function. The path is resolved against the
//! owner's root state through tracked reads, one segment at a time.

use smallvec::SmallVec;

use super::value::Value;

/// A parsed dot path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    segments: SmallVec<[String; 4]>,
}

impl Path {
    /// Parse a path. Only word characters, `$` and `.` are accepted.
    pub fn parse(path: &str) -> Option<Self> {
        let valid = path
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '$' || c == '.');
        if !valid {
            return None;
        }
        Some(Self {
            segments: path.split('.').map(str::to_string).collect(),
        })
    }

    /// Follow the path from `root`. A missing segment or a scalar in the
    /// middle resolves to `Null`.
    pub fn resolve(&self, root: &Value) -> Value {
        let mut current = root.clone();
        for segment in &self.segments {
            let next = match &current {
                Value::Object(object) => object.get(segment),
                Value::Array(array) => segment.parse().ok().and_then(|i| array.get(i)),
                _ => None,
            };
            match next {
                Some(value) => current = value,
                None => return Value::Null,
            }
        }
        current
    }
}
