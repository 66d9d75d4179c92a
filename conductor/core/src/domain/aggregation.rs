// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Aggregation records carried between the Conductor and the Data Aggregator.
//!
//! An [`AggregationJob`] is caller intent. The Data Aggregator derives an
//! [`AggregationFunction`] from it for the first stage (raw rows) and an
//! [`AggregationPatch`] for later stages (merging partial results). Argument
//! maps are opaque to everything but the aggregator.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub type Args = Map<String, Value>;

/// Transmitted by the querier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationJob {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub job: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub args: Args,
}

impl AggregationJob {
    pub fn new(job: impl Into<String>, args: Args) -> Self {
        Self {
            job: job.into(),
            args,
        }
    }

    /// Key under which the job's result is stored: `args.name` when given,
    /// the job name otherwise.
    pub fn result_name(&self) -> String {
        self.args
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.job.clone())
    }
}

/// Applied by the aggregator to raw rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationFunction {
    #[serde(rename = "func", default, skip_serializing_if = "String::is_empty")]
    pub function: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub args: Args,
}

/// Applied by the aggregator to partial results of a previous stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationPatch {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub patch: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub args: Args,
}

/// Coordinates of one aggregator invocation: pipeline stage × parallel branch.
///
/// Serialized as a 2-element array `[stage, branch]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[usize; 2]", into = "[usize; 2]")]
pub struct AggregationId {
    pub stage: usize,
    pub branch: usize,
}

impl AggregationId {
    pub fn new(stage: usize, branch: usize) -> Self {
        Self { stage, branch }
    }
}

impl From<[usize; 2]> for AggregationId {
    fn from([stage, branch]: [usize; 2]) -> Self {
        Self { stage, branch }
    }
}

impl From<AggregationId> for [usize; 2] {
    fn from(id: AggregationId) -> Self {
        [id.stage, id.branch]
    }
}

impl fmt::Display for AggregationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.stage, self.branch)
    }
}

/// One stage of the aggregation pipeline declared by the querier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerDA {
    /// Rows the querier attaches to the stage. Carried with the layer and
    /// never read by the pipeline.
    #[serde(rename = "layer_data", default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<Map<String, Value>>,
    #[serde(rename = "layer_size")]
    pub size: usize,
    #[serde(
        rename = "layer_enc_jobs",
        default,
        with = "crate::domain::messages::base64_bytes",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub encrypted_jobs: Vec<u8>,
    #[serde(rename = "layer_jobs", default, skip_serializing_if = "Vec::is_empty")]
    pub jobs: Vec<AggregationJob>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_aggregation_id_wire_form() {
        let id = AggregationId::new(1, 3);
        assert_eq!(serde_json::to_value(id).unwrap(), json!([1, 3]));

        let parsed: AggregationId = serde_json::from_value(json!([2, 0])).unwrap();
        assert_eq!(parsed, AggregationId::new(2, 0));
        assert_eq!(parsed.to_string(), "[2, 0]");
    }

    #[test]
    fn test_result_name_prefers_explicit_name() {
        let mut args = Args::new();
        args.insert("key".to_string(), json!("age"));
        let job = AggregationJob::new("sum", args.clone());
        assert_eq!(job.result_name(), "sum");

        args.insert("name".to_string(), json!("total_age"));
        assert_eq!(AggregationJob::new("sum", args).result_name(), "total_age");
    }

    #[test]
    fn test_function_uses_func_field() {
        let function = AggregationFunction {
            function: "mean".to_string(),
            args: Args::new(),
        };
        assert_eq!(serde_json::to_value(&function).unwrap(), json!({"func": "mean"}));
    }

    #[test]
    fn test_layer_wire_names() {
        let layer: LayerDA = serde_json::from_value(json!({
            "layer_size": 2,
            "layer_jobs": [{"job": "count"}]
        }))
        .unwrap();
        assert_eq!(layer.size, 2);
        assert_eq!(layer.jobs[0].job, "count");
        assert!(layer.encrypted_jobs.is_empty());
    }
}
