// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Target Finder
//!
//! Opens the address list of every concept and the target profile, runs the
//! set algebra once and returns the resolved targets sealed for the Target
//! role. Tree errors surface unchanged.

use crate::application::role::RoleError;
use crate::domain::cipher::{open_bytes, open_json, seal_json, PayloadCipher};
use crate::domain::messages::{InputTF, OutputTF};
use crate::domain::operation_tree::{AddressSets, OperationTree};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

#[async_trait]
pub trait TargetFinderService: Send + Sync {
    async fn find_targets(&self, input: InputTF) -> Result<OutputTF, RoleError>;
}

pub struct StandardTargetFinder {
    cipher: Arc<dyn PayloadCipher>,
}

impl StandardTargetFinder {
    pub fn new(cipher: Arc<dyn PayloadCipher>) -> Self {
        Self { cipher }
    }
}

#[async_trait]
impl TargetFinderService for StandardTargetFinder {
    async fn find_targets(&self, input: InputTF) -> Result<OutputTF, RoleError> {
        let cipher = self.cipher.as_ref();

        let mut address_sets = AddressSets::with_capacity(input.encrypted_lists_of_addresses.len());
        for (concept, payload) in &input.encrypted_lists_of_addresses {
            let addresses: Vec<String> =
                open_json(cipher, input.is_encrypted, "enc_instances", payload)?;
            address_sets.insert(concept.clone(), addresses);
        }

        let profile = open_bytes(cipher, input.is_encrypted, &input.encrypted_target_profile)?;
        let tree = OperationTree::from_slice(&profile)?;
        let targets = tree.evaluate(&address_sets)?;

        debug!(
            concepts = address_sets.len(),
            targets = targets.len(),
            profile = %tree,
            "Resolved target profile"
        );

        Ok(OutputTF {
            encrypted_targets: seal_json(cipher, input.is_encrypted, "enc_targets", &targets)?,
            task_metadata: input.task_metadata,
        })
    }
}
