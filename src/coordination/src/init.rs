// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The decide-once initialization protocol for shared resources.
//!
//! Any number of members may race to initialize a shared resource; exactly
//! one may win, and the non-idempotent initialization routine must never run
//! twice against the same resource instance. The protocol is lock +
//! double-check: acquire the resource's mutex, then re-read the readiness
//! flag *under the lock*. Checking before acquisition would let two racing
//! members both decide to initialize.

use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::attributes::AttributeStore;
use crate::entity::{EntityId, Sensor};
use crate::error::CoordinationError;
use crate::mutex::{MutexGuard, MutexService};

/// Decides, per calling member, whether it must initialize a shared
/// resource.
#[derive(Clone, Debug)]
pub struct InitializationCoordinator {
    mutexes: Arc<dyn MutexService>,
    attributes: Arc<AttributeStore>,
}

impl InitializationCoordinator {
    /// Creates a coordinator over the given mutex service and attribute
    /// store.
    pub fn new(
        mutexes: Arc<dyn MutexService>,
        attributes: Arc<AttributeStore>,
    ) -> InitializationCoordinator {
        InitializationCoordinator { mutexes, attributes }
    }

    /// Blocks until the caller either holds the right to initialize
    /// `resource` or learns that initialization already happened.
    ///
    /// On [`InitDecision::Initialize`], the returned lease holds the
    /// resource's mutex. The caller runs its initialization routine and then
    /// calls [`InitLease::complete`], which publishes `ready = true` and
    /// releases the mutex. If the caller fails (or is cancelled) the lease
    /// drops instead: the mutex is released, the flag stays false, and a
    /// later caller gets its own [`InitDecision::Initialize`].
    pub async fn try_become_initializer(
        &self,
        resource: EntityId,
        ready: Sensor<bool>,
    ) -> Result<InitDecision, CoordinationError> {
        let guard = self
            .mutexes
            .acquire(&resource.to_string(), &format!("initializing {}", resource))
            .await?;
        // Re-read under the lock: a racing member may have initialized the
        // resource between our decision to acquire and the acquisition.
        if self.attributes.get(resource, ready)? == Some(true) {
            info!(%resource, "resource already initialized");
            return Ok(InitDecision::AlreadyInitialized);
        }
        Ok(InitDecision::Initialize(InitLease {
            _guard: guard,
            attributes: Arc::clone(&self.attributes),
            resource,
            ready,
        }))
    }
}

/// The outcome of [`InitializationCoordinator::try_become_initializer`].
#[derive(Debug)]
pub enum InitDecision {
    /// The caller must run the initialization routine, then complete the
    /// lease.
    Initialize(InitLease),
    /// The resource is already initialized; the caller has nothing to do.
    AlreadyInitialized,
}

/// The exclusive right to initialize a resource.
///
/// Holds the resource's mutex for its whole lifetime. Dropping the lease
/// without [`complete`](InitLease::complete) releases the mutex and leaves
/// the readiness flag untouched.
pub struct InitLease {
    _guard: MutexGuard,
    attributes: Arc<AttributeStore>,
    resource: EntityId,
    ready: Sensor<bool>,
}

impl InitLease {
    /// The resource this lease initializes.
    pub fn resource(&self) -> EntityId {
        self.resource
    }

    /// Publishes the readiness flag and releases the mutex.
    ///
    /// Called only after the initialization routine succeeded; waiters
    /// blocked on the flag are unblocked by the publish, before the mutex
    /// release.
    pub fn complete(self) {
        self.attributes.publish(self.resource, self.ready, true);
        info!(resource = %self.resource, "initialization complete");
    }
}

impl fmt::Debug for InitLease {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("InitLease")
            .field("resource", &self.resource)
            .field("ready", &self.ready)
            .finish()
    }
}
