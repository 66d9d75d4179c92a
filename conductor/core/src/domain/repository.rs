// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for the Conductor's state, following the DDD
//! Repository pattern: interface defined in the domain layer, implemented in
//! `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `QueryRepository` | `Query` | `InMemoryQueryRepository` |
//! | `InstanceRepository` | `AddressBook` | `InMemoryInstanceRepository` |
//!
//! Updates go through a closure executed under the store's write lock, so a
//! read-modify-write on one query is atomic with respect to concurrent
//! patches for the same query id.

use crate::domain::instance::{AddressBookError, Instance, RegistrationOutcome};
use crate::domain::query::{Query, QueryError, QueryId};
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("query {0} not found")]
    QueryNotFound(QueryId),

    #[error("query {0} already exists")]
    QueryExists(QueryId),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    AddressBook(#[from] AddressBookError),

    #[error("failed to encode address: {0}")]
    Address(#[from] serde_json::Error),
}

pub trait QueryRepository: Send + Sync {
    fn insert(&self, query: Query) -> Result<(), RepositoryError>;

    fn find_by_id(&self, id: &QueryId) -> Result<Option<Query>, RepositoryError>;

    /// Run `update` on the stored query under the write lock.
    fn update(
        &self,
        id: &QueryId,
        update: &mut dyn FnMut(&mut Query) -> Result<(), QueryError>,
    ) -> Result<(), RepositoryError>;

    /// Drop all correlation state for a query.
    fn remove(&self, id: &QueryId) -> Result<Query, RepositoryError>;

    fn list_ids(&self) -> Result<Vec<QueryId>, RepositoryError>;

    /// Drop completed, failed and cancelled queries last updated before
    /// `cutoff`. Returns the ids removed.
    fn evict_terminal(&self, cutoff: DateTime<Utc>) -> Result<Vec<QueryId>, RepositoryError>;
}

impl dyn QueryRepository {
    /// Typed form of [`QueryRepository::update`] returning the closure's value.
    pub fn modify<T>(
        &self,
        id: &QueryId,
        update: impl FnOnce(&mut Query) -> Result<T, QueryError>,
    ) -> Result<T, RepositoryError> {
        let mut update = Some(update);
        let mut outcome = None;
        self.update(id, &mut |query| {
            if let Some(update) = update.take() {
                outcome = Some(update(query)?);
            }
            Ok(())
        })?;
        outcome.ok_or_else(|| RepositoryError::QueryNotFound(id.clone()))
    }
}

pub trait InstanceRepository: Send + Sync {
    fn register(
        &self,
        concept: &str,
        instance: Instance,
    ) -> Result<RegistrationOutcome, RepositoryError>;

    fn addresses(&self, concept: &str) -> Result<Vec<String>, RepositoryError>;
}
