// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Node Configuration Types
//
// Defines the configuration schema for a dispers node:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Which pipeline components the node hosts
// - Where remote roles live (unset endpoints are served in-process)
// - Concept hashing salt and target-side HTTP settings

use crate::domain::messages::RoleKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use url::Url;

pub const API_VERSION: &str = "dispers/v1";
pub const KIND: &str = "DispersConfig";

/// Top-level Kubernetes-style node configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispersConfigManifest {
    /// API version (must be "dispers/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "DispersConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: DispersConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispersConfigSpec {
    pub node: NodeIdentity,

    #[serde(default)]
    pub network: NetworkConfig,

    /// Base URLs of remote roles
    #[serde(default)]
    pub roles: RoleEndpoints,

    #[serde(default)]
    pub concept_indexer: ConceptIndexerConfig,

    #[serde(default)]
    pub target: TargetConfig,

    /// How long finished queries stay readable on the Conductor
    #[serde(default)]
    pub query_retention: QueryRetentionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Unique stable node identifier
    pub id: String,

    /// Whether this node runs the Conductor
    #[serde(default = "default_true")]
    pub conductor: bool,

    /// Roles served by this node
    #[serde(default = "default_roles")]
    pub roles: Vec<RoleKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// URL roles use to call the Conductor back
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleEndpoints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concept_indexer: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_finder: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_aggregator: Option<String>,
}

impl RoleEndpoints {
    pub fn get(&self, role: RoleKind) -> Option<&str> {
        match role {
            RoleKind::ConceptIndexer => self.concept_indexer.as_deref(),
            RoleKind::TargetFinder => self.target_finder.as_deref(),
            RoleKind::Target => self.target.as_deref(),
            RoleKind::DataAggregator => self.data_aggregator.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConceptIndexerConfig {
    /// Salt prepended to every concept before hashing
    #[serde(default)]
    pub salt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Scheme used to reach instances ("https" in production)
    #[serde(default = "default_stack_scheme")]
    pub stack_scheme: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRetentionConfig {
    /// Age after which a completed, failed or cancelled query is dropped
    #[serde(default = "default_query_ttl")]
    pub ttl_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_roles() -> Vec<RoleKind> {
    RoleKind::ALL.to_vec()
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_stack_scheme() -> String {
    "https".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_query_ttl() -> u64 {
    3600
}

fn default_sweep_interval() -> u64 {
    60
}

impl Default for NodeIdentity {
    fn default() -> Self {
        Self {
            id: "dispers-local".to_string(),
            conductor: true,
            roles: default_roles(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            public_url: None,
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            stack_scheme: default_stack_scheme(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for QueryRetentionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_query_ttl(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for DispersConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "dispers-node".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: DispersConfigSpec::default(),
        }
    }
}

impl DispersConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. DISPERS_CONFIG_PATH environment variable
    /// 2. ./dispers-config.yaml (working directory)
    /// 3. ~/.dispers/config.yaml (user home)
    /// 4. /etc/dispers/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("DISPERS_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./dispers-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".dispers").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/dispers/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("DISPERS_PUBLIC_URL") {
            tracing::info!("Environment override: DISPERS_PUBLIC_URL={}", val);
            self.spec.network.public_url = Some(val);
        }

        if let Ok(val) = std::env::var("DISPERS_HASH_SALT") {
            tracing::info!("Environment override: DISPERS_HASH_SALT=<redacted>");
            self.spec.concept_indexer.salt = val;
        }
    }

    /// URL roles use to reach this node's Conductor.
    pub fn public_url(&self) -> anyhow::Result<Url> {
        let raw = match &self.spec.network.public_url {
            Some(url) => url.clone(),
            None => format!(
                "http://{}:{}",
                self.spec.network.bind_address, self.spec.network.port
            ),
        };
        Url::parse(&raw).map_err(|e| anyhow::anyhow!("Invalid public URL '{}': {}", raw, e))
    }

    pub fn role_endpoint(&self, role: RoleKind) -> anyhow::Result<Option<Url>> {
        self.spec
            .roles
            .get(role)
            .map(|raw| {
                Url::parse(raw)
                    .map_err(|e| anyhow::anyhow!("Invalid endpoint for role {}: '{}': {}", role, raw, e))
            })
            .transpose()
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.node.id.is_empty() {
            anyhow::bail!("spec.node.id cannot be empty");
        }

        if !self.spec.node.conductor && self.spec.node.roles.is_empty() {
            anyhow::bail!("spec.node must serve the conductor or at least one role");
        }

        self.public_url()?;
        for role in RoleKind::ALL {
            self.role_endpoint(role)?;
        }

        if !matches!(self.spec.target.stack_scheme.as_str(), "http" | "https") {
            anyhow::bail!(
                "spec.target.stack_scheme must be 'http' or 'https', got '{}'",
                self.spec.target.stack_scheme
            );
        }

        if self.spec.target.request_timeout_secs == 0 {
            anyhow::bail!("spec.target.request_timeout_secs must be greater than zero");
        }

        if self.spec.query_retention.sweep_interval_secs == 0 {
            anyhow::bail!("spec.query_retention.sweep_interval_secs must be greater than zero");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = DispersConfigManifest::default();
        assert_eq!(manifest.api_version, "dispers/v1");
        assert_eq!(manifest.kind, "DispersConfig");
        assert!(manifest.spec.node.conductor);
        assert_eq!(manifest.spec.node.roles.len(), 4);
        assert!(manifest.spec.roles.target.is_none());
        assert!(manifest.validate().is_ok());
        assert_eq!(
            manifest.public_url().unwrap().as_str(),
            "http://127.0.0.1:8000/"
        );
    }

    #[test]
    fn test_yaml_minimal_fills_defaults() {
        let yaml = r#"
apiVersion: dispers/v1
kind: DispersConfig
metadata:
  name: edge-1
spec:
  node:
    id: node-1
    conductor: false
    roles: [target, dataaggregation]
  roles:
    concept_indexer: "http://ci.internal:9000"
"#;
        let manifest = DispersConfigManifest::from_yaml_str(yaml).unwrap();
        assert!(!manifest.spec.node.conductor);
        assert_eq!(
            manifest.spec.node.roles,
            vec![RoleKind::Target, RoleKind::DataAggregator]
        );
        assert_eq!(manifest.spec.network.port, 8000);
        assert_eq!(manifest.spec.target.stack_scheme, "https");
        assert_eq!(manifest.spec.query_retention.ttl_secs, 3600);
        assert_eq!(manifest.spec.query_retention.sweep_interval_secs, 60);
        assert_eq!(
            manifest
                .role_endpoint(RoleKind::ConceptIndexer)
                .unwrap()
                .unwrap()
                .as_str(),
            "http://ci.internal:9000/"
        );
        assert!(manifest.role_endpoint(RoleKind::Target).unwrap().is_none());
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dispers-config.yaml");

        let mut manifest = DispersConfigManifest::default();
        manifest.metadata.name = "roundtrip".to_string();
        manifest.spec.concept_indexer.salt = "pepper".to_string();
        manifest.spec.network.public_url = Some("https://conductor.example".to_string());
        manifest.to_yaml_file(&path).unwrap();

        let parsed = DispersConfigManifest::from_yaml_file(&path).unwrap();
        assert_eq!(parsed.metadata.name, "roundtrip");
        assert_eq!(parsed.spec.concept_indexer.salt, "pepper");
        assert_eq!(
            parsed.public_url().unwrap().as_str(),
            "https://conductor.example/"
        );
    }

    #[test]
    fn test_explicit_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.yaml");
        assert!(DispersConfigManifest::load_or_default(Some(missing)).is_err());
    }

    #[test]
    fn test_validation() {
        let mut manifest = DispersConfigManifest::default();
        assert!(manifest.validate().is_ok());

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.kind = "NodeConfig".to_string();
        assert!(manifest.validate().is_err());
        manifest.kind = KIND.to_string();

        manifest.metadata.name = "".to_string();
        assert!(manifest.validate().is_err());
        manifest.metadata.name = "node".to_string();

        manifest.spec.node.id = "".to_string();
        assert!(manifest.validate().is_err());
        manifest.spec.node.id = "node-id".to_string();

        manifest.spec.roles.target = Some("not a url".to_string());
        assert!(manifest.validate().is_err());
        manifest.spec.roles.target = None;

        manifest.spec.target.stack_scheme = "ftp".to_string();
        assert!(manifest.validate().is_err());
        manifest.spec.target.stack_scheme = "http".to_string();

        manifest.spec.query_retention.sweep_interval_secs = 0;
        assert!(manifest.validate().is_err());
        manifest.spec.query_retention.sweep_interval_secs = 5;

        manifest.spec.node.conductor = false;
        manifest.spec.node.roles.clear();
        assert!(manifest.validate().is_err());
    }
}
