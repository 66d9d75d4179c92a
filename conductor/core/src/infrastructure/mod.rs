// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod callback;
pub mod event_bus;
pub mod repositories;
pub mod role_client;
pub mod stack_client;

pub use callback::{spawn_patch_pump, HttpConductorCallback, LocalConductorCallback};
pub use event_bus::EventBus;
pub use repositories::{spawn_query_eviction, InMemoryInstanceRepository, InMemoryQueryRepository};
pub use role_client::HttpRoleClient;
pub use stack_client::HttpStackClient;
