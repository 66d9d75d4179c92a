// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::instance::{AddressBook, Instance, RegistrationOutcome};
use crate::domain::query::{Query, QueryError, QueryId};
use crate::domain::repository::{InstanceRepository, QueryRepository, RepositoryError};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Clone, Default)]
pub struct InMemoryQueryRepository {
    queries: Arc<RwLock<HashMap<QueryId, Query>>>,
}

impl InMemoryQueryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueryRepository for InMemoryQueryRepository {
    fn insert(&self, query: Query) -> Result<(), RepositoryError> {
        let mut queries = self.queries.write();
        if queries.contains_key(&query.id) {
            return Err(RepositoryError::QueryExists(query.id));
        }
        queries.insert(query.id.clone(), query);
        Ok(())
    }

    fn find_by_id(&self, id: &QueryId) -> Result<Option<Query>, RepositoryError> {
        Ok(self.queries.read().get(id).cloned())
    }

    fn update(
        &self,
        id: &QueryId,
        update: &mut dyn FnMut(&mut Query) -> Result<(), QueryError>,
    ) -> Result<(), RepositoryError> {
        let mut queries = self.queries.write();
        let query = queries
            .get_mut(id)
            .ok_or_else(|| RepositoryError::QueryNotFound(id.clone()))?;
        update(query)?;
        Ok(())
    }

    fn remove(&self, id: &QueryId) -> Result<Query, RepositoryError> {
        self.queries
            .write()
            .remove(id)
            .ok_or_else(|| RepositoryError::QueryNotFound(id.clone()))
    }

    fn list_ids(&self) -> Result<Vec<QueryId>, RepositoryError> {
        let mut ids: Vec<QueryId> = self.queries.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn evict_terminal(&self, cutoff: DateTime<Utc>) -> Result<Vec<QueryId>, RepositoryError> {
        let mut queries = self.queries.write();
        let expired: Vec<QueryId> = queries
            .values()
            .filter(|query| query.status.is_terminal() && query.updated_at < cutoff)
            .map(|query| query.id.clone())
            .collect();
        for id in &expired {
            queries.remove(id);
        }
        Ok(expired)
    }
}

/// Periodically drops queries that reached a terminal state more than `ttl`
/// ago. Running queries are never touched.
pub fn spawn_query_eviction(
    queries: Arc<dyn QueryRepository>,
    ttl: Duration,
    every: Duration,
) -> JoinHandle<()> {
    info!(ttl_secs = ttl.as_secs(), "Query eviction started");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let cutoff = match chrono::Duration::from_std(ttl) {
                Ok(ttl) => Utc::now() - ttl,
                Err(e) => {
                    warn!("Query eviction disabled, ttl out of range: {}", e);
                    return;
                }
            };
            match queries.evict_terminal(cutoff) {
                Ok(evicted) if !evicted.is_empty() => {
                    debug!(count = evicted.len(), "Evicted finished queries");
                }
                Ok(_) => {}
                Err(e) => warn!("Query eviction failed: {}", e),
            }
        }
    })
}

#[derive(Clone, Default)]
pub struct InMemoryInstanceRepository {
    book: Arc<RwLock<AddressBook>>,
}

impl InMemoryInstanceRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InstanceRepository for InMemoryInstanceRepository {
    fn register(
        &self,
        concept: &str,
        instance: Instance,
    ) -> Result<RegistrationOutcome, RepositoryError> {
        Ok(self.book.write().register(concept, instance)?)
    }

    fn addresses(&self, concept: &str) -> Result<Vec<String>, RepositoryError> {
        Ok(self.book.read().addresses(concept)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregation::LayerDA;
    use crate::domain::instance::AddressBookError;
    use crate::domain::query::QueryStatus;

    fn query() -> Query {
        let layer = LayerDA {
            size: 1,
            ..Default::default()
        };
        Query::new(QueryId::new(), false, vec![layer]).unwrap()
    }

    #[test]
    fn test_insert_find_remove() {
        let repo = InMemoryQueryRepository::new();
        let query = query();
        let id = query.id.clone();

        repo.insert(query.clone()).unwrap();
        assert!(matches!(repo.insert(query), Err(RepositoryError::QueryExists(_))));
        assert_eq!(repo.find_by_id(&id).unwrap().unwrap().id, id);
        assert_eq!(repo.list_ids().unwrap(), vec![id.clone()]);

        repo.remove(&id).unwrap();
        assert!(repo.find_by_id(&id).unwrap().is_none());
        assert!(matches!(repo.remove(&id), Err(RepositoryError::QueryNotFound(_))));
    }

    #[test]
    fn test_modify_returns_closure_value() {
        let repo: Arc<dyn QueryRepository> = Arc::new(InMemoryQueryRepository::new());
        let query = query();
        let id = query.id.clone();
        repo.insert(query).unwrap();

        let expected = repo.modify(&id, |q| {
            q.set_expected_targets(2)?;
            Ok(q.expected_targets())
        });
        assert_eq!(expected.unwrap(), Some(2));
        assert_eq!(
            repo.find_by_id(&id).unwrap().unwrap().status,
            QueryStatus::CollectingData
        );

        let err = repo.modify(&id, |q| q.set_expected_targets(3)).unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::Query(QueryError::TargetCountAlreadySet(_))
        ));
        assert!(matches!(
            repo.modify(&QueryId::new(), |_| Ok(())),
            Err(RepositoryError::QueryNotFound(_))
        ));
    }

    fn aged(mut query: Query, age: chrono::Duration) -> Query {
        query.updated_at = Utc::now() - age;
        query
    }

    #[test]
    fn test_evict_terminal_keeps_running_and_recent_queries() {
        let repo = InMemoryQueryRepository::new();
        let hour = chrono::Duration::hours(1);

        let mut old_failed = query();
        old_failed.fail("stack unreachable");
        let old_failed = aged(old_failed, hour);
        let old_running = aged(query(), hour);
        let mut fresh_failed = query();
        fresh_failed.fail("stack unreachable");

        let expired = old_failed.id.clone();
        for q in [old_failed, old_running.clone(), fresh_failed.clone()] {
            repo.insert(q).unwrap();
        }

        let cutoff = Utc::now() - chrono::Duration::minutes(10);
        assert_eq!(repo.evict_terminal(cutoff).unwrap(), vec![expired.clone()]);
        assert!(repo.find_by_id(&expired).unwrap().is_none());
        assert!(repo.find_by_id(&old_running.id).unwrap().is_some());
        assert!(repo.find_by_id(&fresh_failed.id).unwrap().is_some());
        assert!(repo.evict_terminal(cutoff).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_eviction_task_sweeps_finished_queries() {
        let repo = Arc::new(InMemoryQueryRepository::new());
        let mut finished = query();
        finished.fail("cancelled upstream");
        let finished = aged(finished, chrono::Duration::seconds(5));
        let running = query();
        repo.insert(finished.clone()).unwrap();
        repo.insert(running.clone()).unwrap();

        let handle = spawn_query_eviction(repo.clone(), Duration::from_secs(1), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(repo.find_by_id(&finished.id).unwrap().is_none());
        assert!(repo.find_by_id(&running.id).unwrap().is_some());
    }

    #[test]
    fn test_instance_registration() {
        let repo = InMemoryInstanceRepository::new();
        repo.register("h1", Instance::new("a.example", "t", 1)).unwrap();
        repo.register("h1", Instance::new("b.example", "t", 1)).unwrap();

        let addresses = repo.addresses("h1").unwrap();
        assert_eq!(addresses.len(), 2);
        assert_eq!(Instance::from_address(&addresses[0]).unwrap().domain, "a.example");
        assert!(repo.addresses("h2").unwrap().is_empty());

        let err = repo
            .register("h1", Instance::new("a.example", "other", 1))
            .unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::AddressBook(AddressBookError::VersionConflict { .. })
        ));
    }
}
