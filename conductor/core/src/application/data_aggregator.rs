// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Data Aggregator
//!
//! Applies the jobs of one pipeline stage to one branch of data. Stage 0 runs
//! each job as an `AggregationFunction` over the raw rows collected from the
//! targets; later stages run it as an `AggregationPatch` that merges the
//! partial results produced by the previous stage, where every row is the
//! `results` map of one upstream branch.
//!
//! Built-in jobs, all reading the numeric field named by `args.key`:
//!
//! | Job | Partial result |
//! |-----|----------------|
//! | `sum` | `{"sum": s}` |
//! | `count` | `{"count": n}` (rows holding `key`, or all rows without `key`) |
//! | `mean` | `{"sum": s, "count": n, "mean": s / n}` |
//! | `min` | `{"min": v}` |
//! | `max` | `{"max": v}` |

use crate::application::role::{ConductorCallback, RoleError};
use crate::domain::aggregation::{AggregationFunction, AggregationJob, AggregationPatch, Args};
use crate::domain::cipher::{open_json, PayloadCipher};
use crate::domain::messages::{InputDA, OutputDA, RoleResult, Row};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

#[async_trait]
pub trait DataAggregatorService: Send + Sync {
    async fn aggregate(&self, input: InputDA) -> Result<OutputDA, RoleError>;

    /// Aggregate, then report the output to the Conductor in the background.
    async fn submit(&self, input: InputDA) -> Result<(), RoleError>;
}

pub struct StandardDataAggregator {
    callback: Arc<dyn ConductorCallback>,
    cipher: Arc<dyn PayloadCipher>,
}

impl StandardDataAggregator {
    pub fn new(callback: Arc<dyn ConductorCallback>, cipher: Arc<dyn PayloadCipher>) -> Self {
        Self { callback, cipher }
    }
}

#[async_trait]
impl DataAggregatorService for StandardDataAggregator {
    async fn aggregate(&self, input: InputDA) -> Result<OutputDA, RoleError> {
        let cipher = self.cipher.as_ref();
        let jobs: Vec<AggregationJob> =
            open_json(cipher, input.is_encrypted, "enc_jobs", &input.encrypted_jobs)?;
        let rows: Vec<Row> = if input.encrypted_data.is_empty() {
            Vec::new()
        } else {
            open_json(cipher, input.is_encrypted, "enc_data", &input.encrypted_data)?
        };

        let stage = input.aggregation_id.stage;
        let mut results = Map::new();
        for job in &jobs {
            let value = if stage == 0 {
                apply_function(&to_function(job), &rows)?
            } else {
                apply_patch(&to_patch(job), &job.result_name(), &rows)?
            };
            results.insert(job.result_name(), value);
        }

        debug!(
            query_id = %input.query_id,
            aggregation_id = %input.aggregation_id,
            jobs = jobs.len(),
            rows = rows.len(),
            "Aggregated branch"
        );

        Ok(OutputDA {
            results,
            query_id: input.query_id,
            aggregation_id: input.aggregation_id,
            task_metadata: input.task_metadata,
        })
    }

    async fn submit(&self, input: InputDA) -> Result<(), RoleError> {
        let conductor_url = input.conductor_url.clone();
        let is_encrypted = input.is_encrypted;
        let output = self.aggregate(input).await?;

        let callback = self.callback.clone();
        tokio::spawn(async move {
            let query_id = output.query_id.clone();
            let aggregation_id = output.aggregation_id;
            let patch = RoleResult::Aggregator(output).into_patch(is_encrypted);
            if let Err(e) = callback.report(&conductor_url, &query_id, patch).await {
                warn!(
                    %query_id,
                    %aggregation_id,
                    "Failed to report aggregation output: {}",
                    e
                );
            }
        });
        Ok(())
    }
}

pub fn to_function(job: &AggregationJob) -> AggregationFunction {
    AggregationFunction {
        function: job.job.clone(),
        args: job.args.clone(),
    }
}

pub fn to_patch(job: &AggregationJob) -> AggregationPatch {
    AggregationPatch {
        patch: job.job.clone(),
        args: job.args.clone(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuiltIn {
    Sum,
    Count,
    Mean,
    Min,
    Max,
}

impl BuiltIn {
    fn parse(name: &str) -> Result<Self, RoleError> {
        match name {
            "sum" => Ok(Self::Sum),
            "count" => Ok(Self::Count),
            "mean" => Ok(Self::Mean),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            other => Err(RoleError::UnknownJob(other.to_string())),
        }
    }
}

fn key<'a>(job: &str, args: &'a Args) -> Result<&'a str, RoleError> {
    args.get("key")
        .and_then(Value::as_str)
        .ok_or_else(|| RoleError::Job {
            job: job.to_string(),
            reason: "missing string argument `key`".to_string(),
        })
}

fn numbers<'a>(rows: &'a [Row], key: &'a str) -> impl Iterator<Item = f64> + 'a {
    rows.iter().filter_map(move |row| row.get(key).and_then(Value::as_f64))
}

/// Runs one function over raw rows.
pub fn apply_function(function: &AggregationFunction, rows: &[Row]) -> Result<Value, RoleError> {
    let name = function.function.as_str();
    let value = match BuiltIn::parse(name)? {
        BuiltIn::Count => {
            let count = match function.args.get("key").and_then(Value::as_str) {
                Some(key) => rows.iter().filter(|row| row.get(key).is_some_and(|v| !v.is_null())).count(),
                None => rows.len(),
            };
            json!({ "count": count })
        }
        BuiltIn::Sum => {
            let sum: f64 = numbers(rows, key(name, &function.args)?).sum();
            json!({ "sum": sum })
        }
        BuiltIn::Mean => {
            let key = key(name, &function.args)?;
            let (sum, count) = numbers(rows, key).fold((0.0, 0u64), |(s, n), v| (s + v, n + 1));
            mean(sum, count)
        }
        BuiltIn::Min => json!({ "min": numbers(rows, key(name, &function.args)?).reduce(f64::min) }),
        BuiltIn::Max => json!({ "max": numbers(rows, key(name, &function.args)?).reduce(f64::max) }),
    };
    Ok(value)
}

/// Merges the partial results stored under `result_name` in each upstream row.
pub fn apply_patch(patch: &AggregationPatch, result_name: &str, rows: &[Row]) -> Result<Value, RoleError> {
    let partials: Vec<&Map<String, Value>> = rows
        .iter()
        .filter_map(|row| row.get(result_name).and_then(Value::as_object))
        .collect();
    let field = |name: &'static str| partials.iter().filter_map(move |p| p.get(name).and_then(Value::as_f64));

    let value = match BuiltIn::parse(&patch.patch)? {
        BuiltIn::Sum => json!({ "sum": field("sum").sum::<f64>() }),
        BuiltIn::Count => json!({ "count": field("count").sum::<f64>() as u64 }),
        BuiltIn::Mean => mean(field("sum").sum(), field("count").sum::<f64>() as u64),
        BuiltIn::Min => json!({ "min": field("min").reduce(f64::min) }),
        BuiltIn::Max => json!({ "max": field("max").reduce(f64::max) }),
    };
    Ok(value)
}

fn mean(sum: f64, count: u64) -> Value {
    let mean = (count > 0).then(|| sum / count as f64);
    json!({ "sum": sum, "count": count, "mean": mean })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregation::AggregationId;
    use crate::domain::cipher::testing::MaskCipher;
    use crate::domain::cipher::DisabledCipher;
    use crate::domain::messages::{InputPatchQuery, TaskMetadata};
    use crate::domain::query::QueryId;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use url::Url;

    struct ChannelCallback(mpsc::UnboundedSender<InputPatchQuery>);

    #[async_trait]
    impl ConductorCallback for ChannelCallback {
        async fn report(&self, _url: &Url, _id: &QueryId, patch: InputPatchQuery) -> Result<(), RoleError> {
            let _ = self.0.send(patch);
            Ok(())
        }
    }

    fn job(name: &str, key: Option<&str>) -> AggregationJob {
        let mut args = Args::new();
        if let Some(key) = key {
            args.insert("key".to_string(), json!(key));
        }
        AggregationJob::new(name, args)
    }

    fn rows(values: &[Value]) -> Vec<Row> {
        values
            .iter()
            .map(|v| {
                let mut row = Row::new();
                row.insert("amount".to_string(), v.clone());
                row
            })
            .collect()
    }

    fn input(stage: usize, jobs: &[AggregationJob], data: &[Row]) -> InputDA {
        InputDA {
            query_id: QueryId::from("q-7"),
            aggregation_id: AggregationId::new(stage, 1),
            conductor_url: Url::parse("http://conductor.local").unwrap(),
            is_encrypted: false,
            encrypted_jobs: serde_json::to_vec(jobs).unwrap(),
            encrypted_data: serde_json::to_vec(data).unwrap(),
            task_metadata: TaskMetadata(json!({"k": "v"})),
        }
    }

    fn aggregator() -> (StandardDataAggregator, mpsc::UnboundedReceiver<InputPatchQuery>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            StandardDataAggregator::new(Arc::new(ChannelCallback(sender)), Arc::new(DisabledCipher)),
            receiver,
        )
    }

    #[test]
    fn test_functions_over_raw_rows() {
        let data = rows(&[json!(2), json!(4), json!("n/a"), json!(9)]);
        let run = |name: &str| apply_function(&to_function(&job(name, Some("amount"))), &data).unwrap();

        assert_eq!(run("sum"), json!({"sum": 15.0}));
        assert_eq!(run("count"), json!({"count": 4}));
        assert_eq!(run("mean"), json!({"sum": 15.0, "count": 3, "mean": 5.0}));
        assert_eq!(run("min"), json!({"min": 2.0}));
        assert_eq!(run("max"), json!({"max": 9.0}));

        let all = apply_function(&to_function(&job("count", None)), &data).unwrap();
        assert_eq!(all, json!({"count": 4}));
    }

    #[test]
    fn test_functions_on_empty_rows() {
        let run = |name: &str| apply_function(&to_function(&job(name, Some("amount"))), &[]).unwrap();
        assert_eq!(run("sum"), json!({"sum": 0.0}));
        assert_eq!(run("mean"), json!({"sum": 0.0, "count": 0, "mean": null}));
        assert_eq!(run("max"), json!({"max": null}));
    }

    #[test]
    fn test_patches_merge_partials() {
        let partial = |value: Value| {
            let mut row = Row::new();
            row.insert("avg".to_string(), value);
            row
        };
        let upstream = vec![
            partial(json!({"sum": 6.0, "count": 2, "mean": 3.0})),
            partial(json!({"sum": 4.0, "count": 2, "mean": 2.0})),
        ];
        let merged = apply_patch(&to_patch(&job("mean", Some("amount"))), "avg", &upstream).unwrap();
        assert_eq!(merged, json!({"sum": 10.0, "count": 4, "mean": 2.5}));

        let upstream = vec![partial(json!({"min": 3.0})), partial(json!({"min": null}))];
        let merged = apply_patch(&to_patch(&job("min", Some("amount"))), "avg", &upstream).unwrap();
        assert_eq!(merged, json!({"min": 3.0}));
    }

    #[test]
    fn test_unknown_job_and_missing_key() {
        let err = apply_function(&to_function(&job("median", Some("a"))), &[]).unwrap_err();
        assert!(matches!(err, RoleError::UnknownJob(name) if name == "median"));

        let err = apply_function(&to_function(&job("sum", None)), &[]).unwrap_err();
        assert!(matches!(err, RoleError::Job { .. }));
    }

    #[tokio::test]
    async fn test_aggregate_echoes_correlation_fields() {
        let (aggregator, _receiver) = aggregator();
        let mut named = job("sum", Some("amount"));
        named.args.insert("name".to_string(), json!("total"));

        let out = aggregator
            .aggregate(input(0, &[named, job("count", None)], &rows(&[json!(1), json!(2)])))
            .await
            .unwrap();

        assert_eq!(out.results["total"], json!({"sum": 3.0}));
        assert_eq!(out.results["count"], json!({"count": 2}));
        assert_eq!(out.query_id.as_str(), "q-7");
        assert_eq!(out.aggregation_id, AggregationId::new(0, 1));
        assert_eq!(out.task_metadata, TaskMetadata(json!({"k": "v"})));
    }

    #[tokio::test]
    async fn test_submit_reports_to_conductor() {
        let (aggregator, mut receiver) = aggregator();
        aggregator
            .submit(input(0, &[job("max", Some("amount"))], &rows(&[json!(5)])))
            .await
            .unwrap();

        let patch = tokio::time::timeout(Duration::from_secs(5), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(patch.role, "dataaggregation");
        assert_eq!(patch.output_da.unwrap().results["max"], json!({"max": 5.0}));
    }

    #[tokio::test]
    async fn test_submit_surfaces_bad_jobs_synchronously() {
        let (aggregator, mut receiver) = aggregator();
        let err = aggregator
            .submit(input(0, &[job("median", Some("amount"))], &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, RoleError::UnknownJob(_)));
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_encrypted_inputs_are_opened() {
        let cipher = MaskCipher(0x17);
        let aggregator = StandardDataAggregator::new(
            Arc::new(ChannelCallback(mpsc::unbounded_channel().0)),
            Arc::new(cipher),
        );
        let mut encrypted = input(0, &[], &[]);
        encrypted.is_encrypted = true;
        encrypted.encrypted_jobs = cipher
            .seal(&serde_json::to_vec(&[job("sum", Some("amount"))]).unwrap())
            .unwrap();
        encrypted.encrypted_data = cipher
            .seal(&serde_json::to_vec(&rows(&[json!(1.5), json!(2.5)])).unwrap())
            .unwrap();

        let out = aggregator.aggregate(encrypted).await.unwrap();
        assert_eq!(out.results["sum"], json!({"sum": 4.0}));
    }
}
