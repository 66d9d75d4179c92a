// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Instances and the Address Book
//!
//! An [`Instance`] is one participating data-holding node. Nodes register
//! under the concepts they match; the [`AddressBook`] keeps, per concept
//! identifier, the ordered list of domains and, per domain, its newest
//! record. A strictly newer version supersedes the previous record under
//! every concept at once.
//!
//! Two registrations of the same domain with the same version but different
//! credentials are rejected as a conflict. The tie-break rule for that case is
//! undecided, so it surfaces instead of being guessed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Location of an instance and the token it created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instance {
    pub domain: String,
    pub token_bearer: String,
    pub version: u64,
}

impl Instance {
    pub fn new(domain: impl Into<String>, token_bearer: impl Into<String>, version: u64) -> Self {
        Self {
            domain: domain.into(),
            token_bearer: token_bearer.into(),
            version,
        }
    }

    /// Address string handed to the set algebra: the compact JSON record.
    pub fn to_address(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_address(address: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(address)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// First registration of this domain under the concept.
    Inserted,
    /// A strictly newer version replaced the previous record.
    Replaced { previous_version: u64 },
    /// Same record registered again.
    Unchanged,
    /// Older than the stored record; ignored.
    Stale { current_version: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressBookError {
    #[error("instance {domain} registered twice with version {version} and different credentials")]
    VersionConflict { domain: String, version: u64 },

    #[error("instance domain cannot be empty")]
    EmptyDomain,
}

/// Concept identifier → domains registered under it, in registration order.
///
/// Versions are tracked per domain, not per concept: the newest record of a
/// domain is the one every concept resolves to.
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    entries: HashMap<String, Vec<String>>,
    latest: HashMap<String, Instance>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        concept: &str,
        instance: Instance,
    ) -> Result<RegistrationOutcome, AddressBookError> {
        if instance.domain.is_empty() {
            return Err(AddressBookError::EmptyDomain);
        }

        let outcome = match self.latest.get(&instance.domain) {
            None => RegistrationOutcome::Inserted,
            Some(current) if instance.version > current.version => RegistrationOutcome::Replaced {
                previous_version: current.version,
            },
            Some(current) if instance.version < current.version => {
                return Ok(RegistrationOutcome::Stale {
                    current_version: current.version,
                })
            }
            Some(current) if *current == instance => RegistrationOutcome::Unchanged,
            Some(_) => {
                return Err(AddressBookError::VersionConflict {
                    domain: instance.domain,
                    version: instance.version,
                })
            }
        };

        let domains = self.entries.entry(concept.to_string()).or_default();
        let listed = domains.contains(&instance.domain);
        if !listed {
            domains.push(instance.domain.clone());
        }
        self.latest.insert(instance.domain.clone(), instance);

        Ok(match outcome {
            RegistrationOutcome::Unchanged if !listed => RegistrationOutcome::Inserted,
            other => other,
        })
    }

    /// Current record of every domain registered under `concept`.
    pub fn instances(&self, concept: &str) -> Vec<&Instance> {
        self.entries
            .get(concept)
            .map(|domains| domains.iter().filter_map(|d| self.latest.get(d)).collect())
            .unwrap_or_default()
    }

    /// Address strings for a concept; empty when nothing registered.
    pub fn addresses(&self, concept: &str) -> Result<Vec<String>, serde_json::Error> {
        self.instances(concept).into_iter().map(Instance::to_address).collect()
    }

    pub fn concept_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_round_trip() {
        let instance = Instance::new("alice.mycozy.cloud", "tok", 3);
        let address = instance.to_address().unwrap();
        assert_eq!(
            address,
            r#"{"domain":"alice.mycozy.cloud","token_bearer":"tok","version":3}"#
        );
        assert_eq!(Instance::from_address(&address).unwrap(), instance);
        assert!(Instance::from_address("alice").is_err());
    }

    #[test]
    fn test_newer_version_wins() {
        let mut book = AddressBook::new();
        assert_eq!(
            book.register("h1", Instance::new("a", "t1", 1)).unwrap(),
            RegistrationOutcome::Inserted
        );
        assert_eq!(
            book.register("h1", Instance::new("a", "t2", 2)).unwrap(),
            RegistrationOutcome::Replaced { previous_version: 1 }
        );
        assert_eq!(book.instances("h1"), vec![&Instance::new("a", "t2", 2)]);
    }

    #[test]
    fn test_older_version_is_ignored() {
        let mut book = AddressBook::new();
        book.register("h1", Instance::new("a", "t5", 5)).unwrap();
        assert_eq!(
            book.register("h1", Instance::new("a", "t4", 4)).unwrap(),
            RegistrationOutcome::Stale { current_version: 5 }
        );
        assert_eq!(book.instances("h1")[0].token_bearer, "t5");
    }

    #[test]
    fn test_equal_version_conflict_is_surfaced() {
        let mut book = AddressBook::new();
        book.register("h1", Instance::new("a", "t1", 1)).unwrap();
        assert_eq!(
            book.register("h1", Instance::new("a", "t1", 1)).unwrap(),
            RegistrationOutcome::Unchanged
        );
        assert_eq!(
            book.register("h1", Instance::new("a", "other", 1)).unwrap_err(),
            AddressBookError::VersionConflict {
                domain: "a".to_string(),
                version: 1
            }
        );
        assert_eq!(book.instances("h1")[0].token_bearer, "t1");
    }

    #[test]
    fn test_registration_order_is_kept() {
        let mut book = AddressBook::new();
        book.register("h1", Instance::new("b", "t", 1)).unwrap();
        book.register("h1", Instance::new("a", "t", 1)).unwrap();
        book.register("h2", Instance::new("a", "t", 1)).unwrap();

        let domains: Vec<&str> = book.instances("h1").iter().map(|i| i.domain.as_str()).collect();
        assert_eq!(domains, vec!["b", "a"]);
        assert_eq!(book.concept_count(), 2);
        assert_eq!(book.addresses("h2").unwrap().len(), 1);
        assert!(book.addresses("unknown").unwrap().is_empty());
    }

    #[test]
    fn test_empty_domain_is_rejected() {
        let mut book = AddressBook::new();
        assert_eq!(
            book.register("h1", Instance::new("", "t", 1)).unwrap_err(),
            AddressBookError::EmptyDomain
        );
    }

    #[test]
    fn test_newer_version_supersedes_every_concept() {
        let mut book = AddressBook::new();
        book.register("A", Instance::new("x", "t1", 1)).unwrap();
        book.register("B", Instance::new("x", "t1", 1)).unwrap();
        assert_eq!(
            book.register("A", Instance::new("x", "t2", 2)).unwrap(),
            RegistrationOutcome::Replaced { previous_version: 1 }
        );

        assert_eq!(book.instances("B"), vec![&Instance::new("x", "t2", 2)]);
        assert_eq!(book.addresses("A").unwrap(), book.addresses("B").unwrap());
    }

    #[test]
    fn test_versions_are_compared_across_concepts() {
        let mut book = AddressBook::new();
        book.register("A", Instance::new("x", "t3", 3)).unwrap();
        assert_eq!(
            book.register("B", Instance::new("x", "t2", 2)).unwrap(),
            RegistrationOutcome::Stale { current_version: 3 }
        );
        assert!(book.instances("B").is_empty());

        assert_eq!(
            book.register("B", Instance::new("x", "t3", 3)).unwrap(),
            RegistrationOutcome::Inserted
        );
        assert_eq!(
            book.register("B", Instance::new("x", "other", 3)).unwrap_err(),
            AddressBookError::VersionConflict {
                domain: "x".to_string(),
                version: 3
            }
        );
    }
}
