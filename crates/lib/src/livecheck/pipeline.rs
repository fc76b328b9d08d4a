//! Declarative transforms over JSON/XML payloads.
//!
//! A pipeline is a list of operations applied in order to a value tree. The
//! strings left in the result (at any array depth) are the version
//! candidates; nulls and other non-string values are discarded.
//!
//! ```toml
//! pipeline = [
//!   { op = "get", path = "releases" },
//!   { op = "values" },
//!   { op = "map", pipeline = [
//!     { op = "get", path = "children" },
//!     { op = "filter", path = "status", equals = "stable" },
//!     { op = "get", path = "release_number" },
//!   ] },
//!   { op = "flatten" },
//! ]
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
  /// Descend along a dot-separated path. On arrays, numeric segments index
  /// and other segments apply to every element.
  Get { path: String },
  /// Object values (or array elements) as an array.
  Values,
  /// Apply a nested pipeline to every element.
  Map { pipeline: Vec<Op> },
  /// Keep elements whose value at `path` equals / differs from the given
  /// value. Without either, keeps elements where the value is present and
  /// not `false`.
  Filter {
    path: String,
    #[serde(default)]
    equals: Option<Value>,
    #[serde(default)]
    not_equals: Option<Value>,
  },
  /// Flatten nested arrays completely.
  Flatten,
}

/// Run `ops` over `value`.
pub fn apply(ops: &[Op], value: Value) -> Value {
  ops.iter().fold(value, |current, op| apply_one(op, current))
}

fn apply_one(op: &Op, value: Value) -> Value {
  match op {
    Op::Get { path } => lookup(&value, path),
    Op::Values => match value {
      Value::Object(map) => Value::Array(map.into_iter().map(|(_, v)| v).collect()),
      Value::Array(_) => value,
      _ => Value::Null,
    },
    Op::Map { pipeline } => match value {
      Value::Array(items) => Value::Array(items.into_iter().map(|v| apply(pipeline, v)).collect()),
      Value::Object(map) => Value::Array(map.into_iter().map(|(_, v)| apply(pipeline, v)).collect()),
      other => apply(pipeline, other),
    },
    Op::Filter {
      path,
      equals,
      not_equals,
    } => {
      let keep = |item: &Value| {
        let found = lookup(item, path);
        match (equals, not_equals) {
          (Some(expected), _) => &found == expected,
          (None, Some(rejected)) => &found != rejected,
          (None, None) => !matches!(found, Value::Null | Value::Bool(false)),
        }
      };
      match value {
        Value::Array(items) => Value::Array(items.into_iter().filter(|v| keep(v)).collect()),
        other if keep(&other) => other,
        _ => Value::Null,
      }
    }
    Op::Flatten => {
      let mut out = Vec::new();
      flatten_into(value, &mut out);
      Value::Array(out)
    }
  }
}

fn flatten_into(value: Value, out: &mut Vec<Value>) {
  match value {
    Value::Array(items) => items.into_iter().for_each(|v| flatten_into(v, out)),
    other => out.push(other),
  }
}

fn lookup(value: &Value, path: &str) -> Value {
  path
    .split('.')
    .filter(|s| !s.is_empty())
    .fold(value.clone(), |current, segment| step(&current, segment))
}

fn step(value: &Value, segment: &str) -> Value {
  match value {
    Value::Object(map) => map.get(segment).cloned().unwrap_or(Value::Null),
    Value::Array(items) => match segment.parse::<usize>() {
      Ok(index) => items.get(index).cloned().unwrap_or(Value::Null),
      Err(_) => Value::Array(items.iter().map(|item| step(item, segment)).collect()),
    },
    _ => Value::Null,
  }
}

/// Every string in `value`, in document order.
pub fn strings(value: &Value) -> Vec<String> {
  match value {
    Value::String(s) => vec![s.clone()],
    Value::Array(items) => items.iter().flat_map(strings).collect(),
    _ => Vec::new(),
  }
}
