// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Role Messages
//!
//! Flat, versioned records exchanged between the Conductor and the four
//! processing roles. Field names are the JSON names existing pipeline
//! consumers expect. Every `enc_*` field holds plaintext JSON bytes when
//! `is_encrypted` is false and an opaque cipher blob otherwise; byte fields
//! travel as standard base64 strings.

use crate::domain::aggregation::{AggregationId, LayerDA};
use crate::domain::instance::Instance;
use crate::domain::operation_tree::OperationTree;
use crate::domain::query::{LocalQuery, QueryId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use url::Url;

/// Row returned by a target's local query.
pub type Row = Map<String, Value>;

/// Opaque task bookkeeping record. Passed through, never inspected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskMetadata(pub Value);

impl TaskMetadata {
    pub fn is_empty(&self) -> bool {
        self.0.is_null()
    }
}

/// A natural-language term (possibly encrypted) and its identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concept {
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Vec::is_empty")]
    pub enc_concept: Vec<u8>,
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Vec::is_empty")]
    pub hash: Vec<u8>,
}

impl Concept {
    /// Lowercase hex form of the hash, used as an address-book key.
    pub fn hash_hex(&self) -> String {
        hex::encode(&self.hash)
    }
}

/// Joins concept payloads with `:`.
pub fn concepts_to_string(concepts: &[Concept]) -> String {
    concepts
        .iter()
        .map(|c| String::from_utf8_lossy(&c.enc_concept).into_owned())
        .collect::<Vec<_>>()
        .join(":")
}

// ============================================================================
// Conductor
// ============================================================================

/// Query submitted by a querier to the Conductor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputNewQuery {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub concepts: Vec<String>,
    /// Concept → name the target profile uses for it, for queriers that keep
    /// concept names out of the profile.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub pseudo_concepts: HashMap<String, String>,
    #[serde(default)]
    pub is_encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_query: Option<LocalQuery>,
    /// Accepted as a tree object or as the tree's JSON text.
    #[serde(
        default,
        deserialize_with = "tree_or_text::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub target_profile: Option<OperationTree>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layers_da: Vec<LayerDA>,
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Vec::is_empty")]
    pub enc_local_query: Vec<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enc_concepts: Vec<Concept>,
    #[serde(
        rename = "enc_operation",
        default,
        with = "base64_bytes",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub enc_target_profile: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryCreated {
    #[serde(rename = "queryid")]
    pub query_id: QueryId,
}

/// Registration of a data-holding instance under a set of concepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSubscribe {
    #[serde(default)]
    pub is_encrypted: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub concepts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enc_concepts: Vec<Concept>,
    pub instance: Instance,
}

/// Processing roles of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleKind {
    #[serde(rename = "conceptindexor")]
    ConceptIndexer,
    #[serde(rename = "targetfinder")]
    TargetFinder,
    Target,
    #[serde(rename = "dataaggregation")]
    DataAggregator,
}

impl RoleKind {
    pub const ALL: [RoleKind; 4] = [
        RoleKind::ConceptIndexer,
        RoleKind::TargetFinder,
        RoleKind::Target,
        RoleKind::DataAggregator,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConceptIndexer => "conceptindexor",
            Self::TargetFinder => "targetfinder",
            Self::Target => "target",
            Self::DataAggregator => "dataaggregation",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.as_str() == value)
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire form of a patch pushed to the Conductor by a role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputPatchQuery {
    #[serde(default)]
    pub is_encrypted: bool,
    pub role: String,
    #[serde(rename = "output_da", default, skip_serializing_if = "Option::is_none")]
    pub output_da: Option<OutputDA>,
    #[serde(rename = "output_t", default, skip_serializing_if = "Option::is_none")]
    pub output_t: Option<OutputT>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("role `{0}` cannot patch a query")]
    UnsupportedRole(String),

    #[error("patch from role `{0}` carries no output")]
    MissingOutput(RoleKind),
}

/// Partial output pushed back to the Conductor mid-pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum RoleResult {
    Target(OutputT),
    Aggregator(OutputDA),
}

impl RoleResult {
    pub fn role(&self) -> RoleKind {
        match self {
            Self::Target(_) => RoleKind::Target,
            Self::Aggregator(_) => RoleKind::DataAggregator,
        }
    }

    pub fn into_patch(self, is_encrypted: bool) -> InputPatchQuery {
        match self {
            Self::Target(output) => InputPatchQuery {
                is_encrypted,
                role: RoleKind::Target.as_str().to_string(),
                output_t: Some(output),
                output_da: None,
            },
            Self::Aggregator(output) => InputPatchQuery {
                is_encrypted,
                role: RoleKind::DataAggregator.as_str().to_string(),
                output_da: Some(output),
                output_t: None,
            },
        }
    }
}

impl TryFrom<InputPatchQuery> for RoleResult {
    type Error = PatchError;

    fn try_from(patch: InputPatchQuery) -> Result<Self, Self::Error> {
        match RoleKind::parse(&patch.role) {
            Some(RoleKind::Target) => patch
                .output_t
                .map(RoleResult::Target)
                .ok_or(PatchError::MissingOutput(RoleKind::Target)),
            Some(RoleKind::DataAggregator) => patch
                .output_da
                .map(RoleResult::Aggregator)
                .ok_or(PatchError::MissingOutput(RoleKind::DataAggregator)),
            _ => Err(PatchError::UnsupportedRole(patch.role)),
        }
    }
}

// ============================================================================
// Concept Indexer
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputCI {
    #[serde(default)]
    pub is_encrypted: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub concepts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enc_concepts: Vec<Concept>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputCI {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hashes: Vec<Concept>,
    #[serde(rename = "metadata_task", default, skip_serializing_if = "TaskMetadata::is_empty")]
    pub task_metadata: TaskMetadata,
}

// ============================================================================
// Target Finder
// ============================================================================

/// Address list of every concept plus the target profile to compute.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputTF {
    pub is_encrypted: bool,
    #[serde(
        rename = "enc_instances",
        default,
        with = "base64_map",
        skip_serializing_if = "HashMap::is_empty"
    )]
    pub encrypted_lists_of_addresses: HashMap<String, Vec<u8>>,
    #[serde(
        rename = "enc_operation",
        default,
        with = "base64_bytes",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub encrypted_target_profile: Vec<u8>,
    #[serde(rename = "metadata_task", default, skip_serializing_if = "TaskMetadata::is_empty")]
    pub task_metadata: TaskMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputTF {
    #[serde(
        rename = "enc_targets",
        default,
        with = "base64_bytes",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub encrypted_targets: Vec<u8>,
    #[serde(rename = "metadata_task", default, skip_serializing_if = "TaskMetadata::is_empty")]
    pub task_metadata: TaskMetadata,
}

// ============================================================================
// Target
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputT {
    #[serde(default)]
    pub is_encrypted: bool,
    #[serde(
        rename = "enc_local_query",
        default,
        with = "base64_bytes",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub encrypted_local_query: Vec<u8>,
    #[serde(
        rename = "enc_addresses",
        default,
        with = "base64_bytes",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub encrypted_targets: Vec<u8>,
    pub conductor_url: Url,
    #[serde(rename = "queryid", default)]
    pub query_id: QueryId,
    #[serde(rename = "metadata_task", default, skip_serializing_if = "TaskMetadata::is_empty")]
    pub task_metadata: TaskMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputT {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<Row>,
    #[serde(rename = "queryid", default)]
    pub query_id: QueryId,
    #[serde(rename = "metadata_task", default, skip_serializing_if = "TaskMetadata::is_empty")]
    pub task_metadata: TaskMetadata,
}

// ============================================================================
// Data Aggregator
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDA {
    #[serde(rename = "queryid")]
    pub query_id: QueryId,
    #[serde(rename = "aggregationid", default)]
    pub aggregation_id: AggregationId,
    pub conductor_url: Url,
    pub is_encrypted: bool,
    #[serde(
        rename = "enc_jobs",
        default,
        with = "base64_bytes",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub encrypted_jobs: Vec<u8>,
    #[serde(
        rename = "enc_data",
        default,
        with = "base64_bytes",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub encrypted_data: Vec<u8>,
    #[serde(rename = "metadata_task", default, skip_serializing_if = "TaskMetadata::is_empty")]
    pub task_metadata: TaskMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputDA {
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub results: Map<String, Value>,
    #[serde(rename = "queryid", default)]
    pub query_id: QueryId,
    #[serde(rename = "aggregationid", default)]
    pub aggregation_id: AggregationId,
    #[serde(rename = "metadata_task", default, skip_serializing_if = "TaskMetadata::is_empty")]
    pub task_metadata: TaskMetadata,
}

/// Serde adapter for `Vec<u8>` fields encoded as base64 strings.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD.decode(encoded.as_bytes()).map_err(D::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

/// Reads an operation tree given either inline or as a JSON string.
pub mod tree_or_text {
    use crate::domain::operation_tree::OperationTree;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<OperationTree>, D::Error> {
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(text)) if text.is_empty() => Ok(None),
            Some(Value::String(text)) => OperationTree::from_slice(text.as_bytes())
                .map(Some)
                .map_err(D::Error::custom),
            Some(tree) => OperationTree::decode(&tree).map(Some).map_err(D::Error::custom),
        }
    }
}

/// Serde adapter for string → base64 bytes maps.
pub mod base64_map {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::de::Error as _;
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::HashMap;

    pub fn serialize<S: Serializer>(
        map: &HashMap<String, Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut out = serializer.serialize_map(Some(map.len()))?;
        for (key, bytes) in map {
            out.serialize_entry(key, &STANDARD.encode(bytes))?;
        }
        out.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashMap<String, Vec<u8>>, D::Error> {
        let encoded = Option::<HashMap<String, String>>::deserialize(deserializer)?.unwrap_or_default();
        encoded
            .into_iter()
            .map(|(key, value)| {
                STANDARD
                    .decode(value.as_bytes())
                    .map(|bytes| (key, bytes))
                    .map_err(D::Error::custom)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_target_profile_accepts_object_or_text() {
        let tree = json!({"type": 2, "left_node": {"type": 0, "value": "A"}, "right_node": {"type": 0, "value": "B"}});
        let expected = OperationTree::and(OperationTree::leaf("A"), OperationTree::leaf("B"));

        let inline: InputNewQuery = serde_json::from_value(json!({"target_profile": tree})).unwrap();
        assert_eq!(inline.target_profile, Some(expected.clone()));

        let text: InputNewQuery =
            serde_json::from_value(json!({"target_profile": tree.to_string()})).unwrap();
        assert_eq!(text.target_profile, Some(expected));

        let empty: InputNewQuery = serde_json::from_value(json!({"target_profile": ""})).unwrap();
        assert!(empty.target_profile.is_none());

        let err = serde_json::from_value::<InputNewQuery>(json!({"target_profile": "{\"type\": 9}"}))
            .unwrap_err();
        assert!(err.to_string().contains("unknown node type: 9"), "{err}");
    }

    #[test]
    fn test_new_query_keeps_pseudo_concepts_and_layer_data() {
        let query: InputNewQuery = serde_json::from_value(json!({
            "concepts": ["aime le foot"],
            "pseudo_concepts": {"aime le foot": "c1"},
            "layers_da": [{"layer_size": 1, "layer_data": [{"seed": 1}], "layer_jobs": []}]
        }))
        .unwrap();
        assert_eq!(query.pseudo_concepts["aime le foot"], "c1");
        assert_eq!(query.layers_da[0].data[0]["seed"], 1);

        let value = serde_json::to_value(&query).unwrap();
        assert_eq!(value["pseudo_concepts"], json!({"aime le foot": "c1"}));
        assert_eq!(value["layers_da"][0]["layer_data"], json!([{"seed": 1}]));
        assert!(serde_json::to_value(InputNewQuery::default()).unwrap().get("pseudo_concepts").is_none());
    }

    #[test]
    fn test_concept_bytes_are_base64() {
        let concept = Concept {
            enc_concept: b"aime le foot".to_vec(),
            hash: vec![0xde, 0xad],
        };
        let value = serde_json::to_value(&concept).unwrap();
        assert_eq!(value, json!({"enc_concept": "YWltZSBsZSBmb290", "hash": "3q0="}));

        let parsed: Concept = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, concept);
        assert_eq!(parsed.hash_hex(), "dead");
    }

    #[test]
    fn test_empty_bytes_are_omitted() {
        let value = serde_json::to_value(Concept::default()).unwrap();
        assert_eq!(value, json!({}));
        let parsed: Concept = serde_json::from_value(json!({"hash": null})).unwrap();
        assert!(parsed.hash.is_empty());
    }

    #[test]
    fn test_concepts_to_string_joins_with_colon() {
        let concepts = vec![
            Concept { enc_concept: b"a".to_vec(), hash: vec![] },
            Concept { enc_concept: b"b".to_vec(), hash: vec![] },
            Concept { enc_concept: b"c".to_vec(), hash: vec![] },
        ];
        assert_eq!(concepts_to_string(&concepts), "a:b:c");
        assert_eq!(concepts_to_string(&[]), "");
    }

    #[test]
    fn test_input_tf_wire_names() {
        let mut lists = HashMap::new();
        lists.insert("A".to_string(), br#"["x"]"#.to_vec());
        let input = InputTF {
            is_encrypted: false,
            encrypted_lists_of_addresses: lists,
            encrypted_target_profile: br#"{"type":0,"value":"A"}"#.to_vec(),
            task_metadata: TaskMetadata::default(),
        };
        let value = serde_json::to_value(&input).unwrap();
        assert_eq!(value["is_encrypted"], false);
        assert!(value["enc_instances"]["A"].is_string());
        assert!(value["enc_operation"].is_string());
        assert!(value.get("metadata_task").is_none());

        let parsed: InputTF = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.encrypted_lists_of_addresses["A"], br#"["x"]"#.to_vec());
    }

    #[test]
    fn test_patch_converts_to_role_result() {
        let patch: InputPatchQuery = serde_json::from_value(json!({
            "is_encrypted": false,
            "role": "target",
            "output_t": {"data": [{"age": 3}], "queryid": "q-1"}
        }))
        .unwrap();
        match RoleResult::try_from(patch).unwrap() {
            RoleResult::Target(output) => {
                assert_eq!(output.query_id.as_str(), "q-1");
                assert_eq!(output.data.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }

        let patch: InputPatchQuery = serde_json::from_value(json!({
            "role": "dataaggregation",
            "output_da": {"results": {"sum": 1}, "queryid": "q-1", "aggregationid": [0, 1]}
        }))
        .unwrap();
        let result = RoleResult::try_from(patch).unwrap();
        assert_eq!(result.role(), RoleKind::DataAggregator);
    }

    #[test]
    fn test_patch_rejects_unknown_or_empty() {
        let patch = InputPatchQuery {
            role: "targetfinder".to_string(),
            ..Default::default()
        };
        assert_eq!(
            RoleResult::try_from(patch).unwrap_err(),
            PatchError::UnsupportedRole("targetfinder".to_string())
        );

        let patch = InputPatchQuery {
            role: "target".to_string(),
            ..Default::default()
        };
        assert_eq!(
            RoleResult::try_from(patch).unwrap_err(),
            PatchError::MissingOutput(RoleKind::Target)
        );
    }

    #[test]
    fn test_role_result_into_patch_round_trip() {
        let output = OutputT {
            data: vec![],
            query_id: QueryId::from("q-9"),
            task_metadata: TaskMetadata(json!({"status": "done"})),
        };
        let patch = RoleResult::Target(output.clone()).into_patch(false);
        assert_eq!(patch.role, "target");
        assert_eq!(RoleResult::try_from(patch).unwrap(), RoleResult::Target(output));
    }

    #[test]
    fn test_role_kind_names() {
        for role in RoleKind::ALL {
            assert_eq!(RoleKind::parse(role.as_str()), Some(role));
            assert_eq!(
                serde_json::to_value(role).unwrap(),
                json!(role.as_str())
            );
        }
        assert_eq!(RoleKind::parse("conductor"), None);
    }

    #[test]
    fn test_task_metadata_passes_through() {
        let output: OutputTF = serde_json::from_value(json!({
            "enc_targets": "W10=",
            "metadata_task": {"arrival": "2026-01-01", "nested": {"k": [1, 2]}}
        }))
        .unwrap();
        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(value["metadata_task"]["nested"]["k"], json!([1, 2]));
        assert_eq!(output.encrypted_targets, b"[]".to_vec());
    }
}
