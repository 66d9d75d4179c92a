// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Shared plumbing for the processing roles: the error every role service
// returns and the port roles use to push partial results to the Conductor.

use crate::domain::cipher::CipherError;
use crate::domain::messages::{InputPatchQuery, RoleKind};
use crate::domain::operation_tree::OperationTreeError;
use crate::domain::query::QueryId;
use async_trait::async_trait;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum RoleError {
    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    Tree(#[from] OperationTreeError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("concept hashing failed: {0}")]
    Hash(String),

    #[error("unknown aggregation job `{0}`")]
    UnknownJob(String),

    #[error("aggregation job `{job}` failed: {reason}")]
    Job { job: String, reason: String },

    #[error("role {role} unreachable: {reason}")]
    Transport { role: RoleKind, reason: String },

    /// Error body returned by a remote role; displayed as-is.
    #[error("{message}")]
    Remote {
        role: RoleKind,
        status: u16,
        message: String,
    },

    #[error("conductor callback to {url} failed: {reason}")]
    Callback { url: String, reason: String },
}

impl RoleError {
    /// Whether the failure lies in the request rather than in the role.
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::Cipher(_)
            | Self::Tree(_)
            | Self::InvalidInput(_)
            | Self::UnknownJob(_)
            | Self::Job { .. } => true,
            Self::Remote { status, .. } => (400..500).contains(status),
            Self::Hash(_) | Self::Transport { .. } | Self::Callback { .. } => false,
        }
    }
}

/// Pushes a role's partial output to the Conductor that issued the task.
#[async_trait]
pub trait ConductorCallback: Send + Sync {
    async fn report(
        &self,
        conductor_url: &Url,
        query_id: &QueryId,
        patch: InputPatchQuery,
    ) -> Result<(), RoleError>;
}
