// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Coordination primitives for bootstrapping Riskgrid clusters.
//!
//! All members of a Riskgrid cluster share one backing database and one
//! message broker. The database schema must be created exactly once, by
//! exactly one member, before any member's application process starts, and
//! members are started concurrently by the surrounding orchestration layer
//! with no central coordinator process. This crate provides the pieces that
//! make that safe:
//!
//!   * [`AttributeStore`], a publish/subscribe store of typed per-entity
//!     attributes with blocking reads, used as a readiness barrier ("the
//!     database accepts connections", "the schema exists").
//!   * [`MutexService`], cooperative key-scoped mutual exclusion across
//!     independently scheduled member-setup tasks, with structural
//!     release-on-drop.
//!   * [`InitializationCoordinator`], which combines the two into a
//!     decide-once answer to "am I the member that initializes this shared
//!     resource?"
//!   * [`MemberDriver`], the per-member lifecycle driver that sequences
//!     `customize` (decide and, if chosen, initialize) and `launch` (wait for
//!     readiness, then start the application process).

mod attributes;
mod driver;
mod entity;
mod error;
mod init;
mod mutex;

pub use attributes::AttributeStore;
pub use driver::{MemberDriver, MemberRuntime};
pub use entity::{EntityId, Sensor, ADDRESS, DATABASE_INITIALIZED, PORT, SERVICE_UP};
pub use error::CoordinationError;
pub use init::{InitDecision, InitLease, InitializationCoordinator};
pub use mutex::{MutexGuard, MutexService, ProcessMutexService};
