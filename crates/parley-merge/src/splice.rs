//! Sequence splice operations.
//!
//! Splices apply in order, each against the result of the previous one, so a
//! pivot may name a value inserted by an earlier splice of the same merge.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Where a splice inserts its values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pivot {
    /// Before the first element.
    Start,
    /// After the last element.
    End,
    /// Right after the first occurrence of the value.
    After(Value),
    /// Right before the first occurrence of the value.
    Before(Value),
}

impl Pivot {
    /// The element value this pivot refers to, if any.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Pivot::After(v) | Pivot::Before(v) => Some(v),
            Pivot::Start | Pivot::End => None,
        }
    }
}

impl fmt::Display for Pivot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pivot::Start => f.write_str("start"),
            Pivot::End => f.write_str("end"),
            Pivot::After(v) => write!(f, "after {}", v),
            Pivot::Before(v) => write!(f, "before {}", v),
        }
    }
}

/// One ordered edit of a sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpliceOp {
    Insert { at: Pivot, values: Vec<Value> },
    /// Remove every occurrence of each value.
    Remove(Vec<Value>),
}

/// A pivot value was not present in the sequence.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("pivot {0} not found")]
pub struct PivotNotFound(pub Pivot);

/// Apply one splice to `items`.
pub fn apply(items: &mut Vec<Value>, op: &SpliceOp) -> Result<(), PivotNotFound> {
    match op {
        SpliceOp::Insert { at, values } => {
            let index = match at {
                Pivot::Start => 0,
                Pivot::End => items.len(),
                Pivot::After(v) => position(items, at, v)? + 1,
                Pivot::Before(v) => position(items, at, v)?,
            };
            items.splice(index..index, values.iter().cloned());
        }
        SpliceOp::Remove(values) => items.retain(|item| !values.contains(item)),
    }
    Ok(())
}

/// Apply splices in order.
pub fn apply_all(items: &mut Vec<Value>, ops: &[SpliceOp]) -> Result<(), PivotNotFound> {
    ops.iter().try_for_each(|op| apply(items, op))
}

fn position(items: &[Value], pivot: &Pivot, value: &Value) -> Result<usize, PivotNotFound> {
    items
        .iter()
        .position(|item| item == value)
        .ok_or_else(|| PivotNotFound(pivot.clone()))
}

/// Pivots that cannot be resolved from values inserted earlier in `ops`,
/// i.e. those that must refer to elements already in the store.
pub fn stored_pivots(ops: &[SpliceOp]) -> Vec<&Pivot> {
    let mut fresh: Vec<&Value> = Vec::new();
    let mut stored = Vec::new();

    for op in ops {
        match op {
            SpliceOp::Insert { at, values } => {
                if let Some(v) = at.value() {
                    if !fresh.contains(&v) {
                        stored.push(at);
                    }
                }
                fresh.extend(values.iter());
            }
            SpliceOp::Remove(values) => fresh.retain(|v| !values.contains(v)),
        }
    }

    stored
}
