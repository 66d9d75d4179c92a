// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Concept Indexer
//!
//! Turns concepts into stable identifiers. The output list is positionally
//! parallel to the input; in encrypted mode each concept is opened to be
//! hashed and echoed back still sealed.

use crate::application::role::RoleError;
use crate::domain::cipher::{open_bytes, PayloadCipher};
use crate::domain::messages::{Concept, InputCI, OutputCI, TaskMetadata};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

/// How a concept becomes its identifier.
pub trait ConceptHasher: Send + Sync {
    fn hash(&self, concept: &[u8]) -> Result<Vec<u8>, RoleError>;
}

/// SHA-256 over `salt || concept`.
#[derive(Debug, Clone, Default)]
pub struct Sha256ConceptHasher {
    salt: Vec<u8>,
}

impl Sha256ConceptHasher {
    pub fn new(salt: impl Into<Vec<u8>>) -> Self {
        Self { salt: salt.into() }
    }
}

impl ConceptHasher for Sha256ConceptHasher {
    fn hash(&self, concept: &[u8]) -> Result<Vec<u8>, RoleError> {
        let mut hasher = Sha256::new();
        hasher.update(&self.salt);
        hasher.update(concept);
        Ok(hasher.finalize().to_vec())
    }
}

#[async_trait]
pub trait ConceptIndexerService: Send + Sync {
    async fn hash_concepts(&self, input: InputCI) -> Result<OutputCI, RoleError>;
}

pub struct StandardConceptIndexer {
    hasher: Arc<dyn ConceptHasher>,
    cipher: Arc<dyn PayloadCipher>,
}

impl StandardConceptIndexer {
    pub fn new(hasher: Arc<dyn ConceptHasher>, cipher: Arc<dyn PayloadCipher>) -> Self {
        Self { hasher, cipher }
    }
}

#[async_trait]
impl ConceptIndexerService for StandardConceptIndexer {
    async fn hash_concepts(&self, input: InputCI) -> Result<OutputCI, RoleError> {
        let hashes = if input.is_encrypted {
            input
                .enc_concepts
                .into_iter()
                .map(|concept| {
                    let plaintext = open_bytes(self.cipher.as_ref(), true, &concept.enc_concept)?;
                    Ok(Concept {
                        hash: self.hasher.hash(&plaintext)?,
                        enc_concept: concept.enc_concept,
                    })
                })
                .collect::<Result<Vec<_>, RoleError>>()?
        } else {
            input
                .concepts
                .into_iter()
                .map(|concept| {
                    Ok(Concept {
                        hash: self.hasher.hash(concept.as_bytes())?,
                        enc_concept: concept.into_bytes(),
                    })
                })
                .collect::<Result<Vec<_>, RoleError>>()?
        };

        debug!(count = hashes.len(), encrypted = input.is_encrypted, "Hashed concepts");

        Ok(OutputCI {
            hashes,
            task_metadata: TaskMetadata::default(),
        })
    }
}
