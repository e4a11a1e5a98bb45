// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The per-member lifecycle driver.
//!
//! The surrounding orchestration layer creates one [`MemberDriver`] per
//! cluster member and runs `customize` followed by `launch` on the member's
//! setup task. `customize` blocks until the shared database accepts
//! connections, then settles the initialization decision; `launch` blocks
//! until the broker is up and (for non-initializers) until the database
//! schema exists, then starts the application process.

use std::fmt;
use std::sync::Arc;
use std::sync::OnceLock;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::attributes::AttributeStore;
use crate::entity::{EntityId, ADDRESS, DATABASE_INITIALIZED, PORT, SERVICE_UP};
use crate::error::CoordinationError;
use crate::init::{InitDecision, InitializationCoordinator};
use crate::mutex::MutexService;

/// The member-specific behavior the driver sequences: what to run, supplied
/// by the process layer (scripts over SSH, a container exec, a test fake).
#[async_trait]
pub trait MemberRuntime: Send + Sync {
    /// Runs the one-time schema initialization against the shared database.
    ///
    /// Not required to be idempotent. The driver guarantees at most one
    /// invocation per database instance across all members, ever, unless a
    /// previous invocation failed.
    async fn initialize_database(&self) -> Result<(), anyhow::Error>;

    /// Starts the member's application process.
    async fn start_process(&self) -> Result<(), anyhow::Error>;
}

/// Drives one cluster member through its bootstrap lifecycle.
pub struct MemberDriver<R> {
    member: EntityId,
    database: EntityId,
    broker: EntityId,
    attributes: Arc<AttributeStore>,
    coordinator: InitializationCoordinator,
    runtime: R,
    // Settled exactly once, during customize; never reset.
    is_initializer: OnceLock<bool>,
}

impl<R> fmt::Debug for MemberDriver<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MemberDriver")
            .field("member", &self.member)
            .field("database", &self.database)
            .field("broker", &self.broker)
            .field("is_initializer", &self.is_initializer.get())
            .finish()
    }
}

impl<R: MemberRuntime> MemberDriver<R> {
    /// Creates a driver for `member`, which depends on the shared `database`
    /// and `broker` entities.
    pub fn new(
        member: EntityId,
        database: EntityId,
        broker: EntityId,
        attributes: Arc<AttributeStore>,
        mutexes: Arc<dyn MutexService>,
        runtime: R,
    ) -> MemberDriver<R> {
        let coordinator = InitializationCoordinator::new(mutexes, Arc::clone(&attributes));
        MemberDriver {
            member,
            database,
            broker,
            attributes,
            coordinator,
            runtime,
            is_initializer: OnceLock::new(),
        }
    }

    /// Whether this member ran the shared database initialization.
    ///
    /// False until `customize` settles the decision.
    pub fn is_initializer(&self) -> bool {
        self.is_initializer.get().copied().unwrap_or(false)
    }

    /// Prepares the member: waits for the database to accept connections,
    /// then settles the initialization decision and, if this member is the
    /// initializer, runs the one-time schema setup.
    ///
    /// Call once per member, before [`launch`](MemberDriver::launch). If the
    /// initialization routine fails, the mutex is released and the readiness
    /// flag stays false, so a replacement member can re-attempt; the error is
    /// fatal for this member.
    pub async fn customize(&self) -> Result<(), CoordinationError> {
        self.attributes
            .wait_until_ready(self.database, SERVICE_UP)
            .await?;

        match self
            .coordinator
            .try_become_initializer(self.database, DATABASE_INITIALIZED)
            .await?
        {
            InitDecision::Initialize(lease) => {
                let _ = self.is_initializer.set(true);
                info!(member = %self.member, database = %self.database, "initializing database");
                self.runtime
                    .initialize_database()
                    .await
                    .map_err(CoordinationError::InitializationFailed)?;
                lease.complete();
            }
            InitDecision::AlreadyInitialized => {
                let _ = self.is_initializer.set(false);
                info!(member = %self.member, database = %self.database, "database already initialized");
            }
        }
        Ok(())
    }

    /// Launches the member's application process.
    ///
    /// Blocks on broker readiness and, for non-initializers, on the database
    /// schema existing. The initializer skips the schema wait: it published
    /// the flag itself during `customize`.
    pub async fn launch(&self) -> Result<(), CoordinationError> {
        let Some(&is_initializer) = self.is_initializer.get() else {
            return Err(CoordinationError::LaunchBeforeCustomize);
        };

        self.attributes
            .wait_until_ready(self.broker, SERVICE_UP)
            .await?;

        if !is_initializer {
            if self.attributes.get(self.database, DATABASE_INITIALIZED)? == Some(true) {
                debug!(member = %self.member, "database already initialized, continuing");
            } else {
                info!(member = %self.member, "waiting for database initialization");
                self.attributes
                    .wait_until_ready(self.database, DATABASE_INITIALIZED)
                    .await?;
                debug!(member = %self.member, "database initialized, continuing");
            }
        }

        self.runtime
            .start_process()
            .await
            .map_err(CoordinationError::LaunchFailed)?;
        info!(member = %self.member, initializer = is_initializer, "member launched");
        Ok(())
    }

    /// Blocks until the broker has published its address and port, then
    /// returns them as `host:port`.
    pub async fn broker_location(&self) -> Result<String, CoordinationError> {
        let address: String = self.attributes.wait_until_set(self.broker, ADDRESS).await?;
        let port: u16 = self.attributes.wait_until_set(self.broker, PORT).await?;
        Ok(format!("{}:{}", address, port))
    }

    /// Blocks until the database has published its address and port, then
    /// returns them as `host:port`.
    pub async fn database_location(&self) -> Result<String, CoordinationError> {
        let address: String = self
            .attributes
            .wait_until_set(self.database, ADDRESS)
            .await?;
        let port: u16 = self.attributes.wait_until_set(self.database, PORT).await?;
        Ok(format!("{}:{}", address, port))
    }
}
