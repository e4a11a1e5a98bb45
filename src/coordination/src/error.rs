// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use thiserror::Error;

use crate::entity::EntityId;

/// An error surfaced by the bootstrap coordination layer.
///
/// Every variant is fatal for the member that observes it. The coordination
/// layer never retries internally; replacing or retrying a failed member is
/// the calling orchestration layer's decision.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// The attribute store was torn down while a member was blocked on an
    /// attribute.
    #[error("attribute {sensor} on entity {entity} became unavailable while waiting")]
    AttributeUnavailable {
        /// The entity whose attribute was being awaited.
        entity: EntityId,
        /// The sensor name.
        sensor: &'static str,
    },
    /// A published attribute value did not deserialize as the sensor's type.
    #[error("attribute {sensor} has an unexpected type")]
    AttributeType {
        /// The sensor name.
        sensor: &'static str,
        /// The deserialization failure.
        #[source]
        source: serde_json::Error,
    },
    /// Acquiring the initialization mutex failed.
    ///
    /// The in-process [`ProcessMutexService`](crate::ProcessMutexService)
    /// never reports this; distributed implementations may.
    #[error("failed to acquire mutex {key}")]
    MutexAcquire {
        /// The mutex key.
        key: String,
        /// The underlying failure.
        #[source]
        source: anyhow::Error,
    },
    /// The one-time database initialization routine failed.
    ///
    /// The mutex has been released and the readiness flag is still false, so
    /// a replacement member can re-attempt initialization.
    #[error("database initialization failed")]
    InitializationFailed(#[source] anyhow::Error),
    /// The member's application process failed to start.
    #[error("application process failed to launch")]
    LaunchFailed(#[source] anyhow::Error),
    /// `launch` was called before `customize` completed.
    #[error("launch requested before customize completed")]
    LaunchBeforeCustomize,
}
