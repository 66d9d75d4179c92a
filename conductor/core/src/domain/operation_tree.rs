// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Operation Tree (Target Profile Algebra)
//!
//! A target profile is a nested union/intersection of named address-sets.
//! [`OperationTree`] resolves such a profile into a concrete, deduplicated
//! list of addresses against a mapping supplied at evaluation time.
//!
//! ## Wire Form
//!
//! The tree travels as an untyped, self-describing JSON record:
//!
//! ```json
//! {"type": 1,
//!  "left_node":  {"type": 0, "value": "A"},
//!  "right_node": {"type": 2,
//!                 "left_node":  {"type": 0, "value": "B"},
//!                 "right_node": {"type": 0, "value": "C"}}}
//! ```
//!
//! `type` is the node discriminator: `0` = Leaf, `1` = Or, `2` = And. The
//! shape varies per query, so decoding walks the payload and dispatches on
//! the discriminator at every level.
//!
//! ## Invariants
//!
//! - Every Leaf name must exist in the address-set mapping; a missing name is
//!   an error, never an empty result.
//! - Evaluation never mutates the tree and never returns partial results.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

/// Address-set mapping: concept identifier → ordered list of addresses.
pub type AddressSets = HashMap<String, Vec<String>>;

/// Node discriminator carried in the `type` field of the wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Leaf,
    Or,
    And,
}

impl NodeKind {
    pub fn from_discriminant(value: i64) -> Result<Self, OperationTreeError> {
        match value {
            0 => Ok(Self::Leaf),
            1 => Ok(Self::Or),
            2 => Ok(Self::And),
            other => Err(OperationTreeError::UnknownNodeKind(other)),
        }
    }

    pub fn discriminant(self) -> i64 {
        match self {
            Self::Leaf => 0,
            Self::Or => 1,
            Self::And => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationTreeError {
    #[error("malformed operation tree: {0}")]
    MalformedTree(String),

    #[error("unknown concept: {name}, expect one of: {}", .known.join(" "))]
    UnknownLeaf { name: String, known: Vec<String> },

    #[error("unknown node type: {0}")]
    UnknownNodeKind(i64),
}

/// Recursive boolean-set expression over named address-sets.
///
/// Children are owned; the tree has no sharing and no cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationTree {
    /// Names one address-set.
    Leaf { name: String },
    /// Deduplicated union of both children, first-seen order.
    Or {
        left: Box<OperationTree>,
        right: Box<OperationTree>,
    },
    /// Intersection of both children.
    And {
        left: Box<OperationTree>,
        right: Box<OperationTree>,
    },
}

impl OperationTree {
    pub fn leaf(name: impl Into<String>) -> Self {
        Self::Leaf { name: name.into() }
    }

    pub fn or(left: OperationTree, right: OperationTree) -> Self {
        Self::Or {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(left: OperationTree, right: OperationTree) -> Self {
        Self::And {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Leaf { .. } => NodeKind::Leaf,
            Self::Or { .. } => NodeKind::Or,
            Self::And { .. } => NodeKind::And,
        }
    }

    /// Resolve the tree against `address_sets`.
    ///
    /// Both children of a binary node are evaluated (left first) before the
    /// operation is applied. The first failure aborts the whole evaluation.
    pub fn evaluate(&self, address_sets: &AddressSets) -> Result<Vec<String>, OperationTreeError> {
        match self {
            Self::Leaf { name } => address_sets.get(name).cloned().ok_or_else(|| {
                let mut known: Vec<String> = address_sets.keys().cloned().collect();
                known.sort();
                OperationTreeError::UnknownLeaf {
                    name: name.clone(),
                    known,
                }
            }),
            Self::Or { left, right } => {
                let a = left.evaluate(address_sets)?;
                let b = right.evaluate(address_sets)?;
                Ok(union(a, b))
            }
            Self::And { left, right } => {
                let a = left.evaluate(address_sets)?;
                let b = right.evaluate(address_sets)?;
                Ok(intersection(&a, b))
            }
        }
    }

    /// Decode a node from its self-describing JSON form.
    pub fn decode(value: &Value) -> Result<Self, OperationTreeError> {
        let node = value.as_object().ok_or_else(|| {
            OperationTreeError::MalformedTree(format!("expected a node object, got {value}"))
        })?;

        let discriminant = match node.get("type") {
            None | Some(Value::Null) => {
                return Err(OperationTreeError::MalformedTree(
                    "no type defined".to_string(),
                ))
            }
            // Producers that go through a float-typed decoder emit `1.0`.
            Some(raw) => raw
                .as_i64()
                .or_else(|| raw.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .ok_or_else(|| {
                    OperationTreeError::MalformedTree(format!("invalid type discriminator: {raw}"))
                })?,
        };

        match NodeKind::from_discriminant(discriminant)? {
            NodeKind::Leaf => {
                // Absent value is tolerated; lookup of "" fails at evaluation.
                let name = node
                    .get("value")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Ok(Self::Leaf { name })
            }
            kind @ (NodeKind::Or | NodeKind::And) => {
                let left = Box::new(Self::decode(child(node, "left_node", kind)?)?);
                let right = Box::new(Self::decode(child(node, "right_node", kind)?)?);
                Ok(match kind {
                    NodeKind::Or => Self::Or { left, right },
                    _ => Self::And { left, right },
                })
            }
        }
    }

    /// Decode a tree from raw JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, OperationTreeError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| OperationTreeError::MalformedTree(e.to_string()))?;
        Self::decode(&value)
    }

    /// Encode the tree into its self-describing JSON form.
    pub fn encode(&self) -> Value {
        match self {
            Self::Leaf { name } if name.is_empty() => json!({ "type": NodeKind::Leaf.discriminant() }),
            Self::Leaf { name } => json!({
                "type": NodeKind::Leaf.discriminant(),
                "value": name,
            }),
            Self::Or { left, right } | Self::And { left, right } => json!({
                "type": self.kind().discriminant(),
                "left_node": left.encode(),
                "right_node": right.encode(),
            }),
        }
    }

    /// Leaf names referenced by the tree, left to right.
    pub fn leaves(&self) -> Vec<&str> {
        match self {
            Self::Leaf { name } => vec![name.as_str()],
            Self::Or { left, right } | Self::And { left, right } => {
                let mut names = left.leaves();
                names.extend(right.leaves());
                names
            }
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            Self::Leaf { .. } => 1,
            Self::Or { left, right } | Self::And { left, right } => {
                1 + left.depth().max(right.depth())
            }
        }
    }
}

fn child<'a>(
    node: &'a Map<String, Value>,
    field: &str,
    kind: NodeKind,
) -> Result<&'a Value, OperationTreeError> {
    match node.get(field) {
        None | Some(Value::Null) => Err(OperationTreeError::MalformedTree(format!(
            "{kind:?} node is missing {field}"
        ))),
        Some(value) => Ok(value),
    }
}

fn union(a: Vec<String>, b: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(a.len() + b.len());
    a.into_iter()
        .chain(b)
        .filter(|address| seen.insert(address.clone()))
        .collect()
}

fn intersection(a: &[String], b: Vec<String>) -> Vec<String> {
    let members: HashSet<&String> = a.iter().collect();
    let mut seen = HashSet::with_capacity(b.len());
    b.into_iter()
        .filter(|address| members.contains(address) && seen.insert(address.clone()))
        .collect()
}

impl fmt::Display for OperationTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leaf { name } => write!(f, "Leaf({name})"),
            Self::Or { left, right } => write!(f, "Or({left}, {right})"),
            Self::And { left, right } => write!(f, "And({left}, {right})"),
        }
    }
}

impl Serialize for OperationTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.encode().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OperationTree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::decode(&value).map_err(D::Error::custom)
    }
}
