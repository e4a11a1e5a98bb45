// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::time::Duration;

use itertools::Itertools;
use thiserror::Error;

use crate::api::{ExternalNetwork, PowerState, TaskId, VmId};

/// An error surfaced by the cloud resource layer.
///
/// Every variant is fatal: this layer never retries, never falls back to a
/// default, and never swallows a failure. Retrying a whole provisioning
/// attempt is the caller's decision.
#[derive(Debug, Error)]
pub enum CloudResourceError {
    /// No VM with the requested name label exists.
    #[error(
        "no virtual machine labeled {name}; available virtual machines: [{}]",
        .candidates.iter().join(", ")
    )]
    VirtualMachineNotFound {
        /// The requested name label.
        name: VmId,
        /// Every VM the provider reported.
        candidates: Vec<VmId>,
    },
    /// No external network matches the configured name prefix.
    #[error(
        "no external network with name prefix {prefix:?}; available networks: [{}]",
        .candidates.iter().join(", ")
    )]
    ExternalNetworkNotFound {
        /// The configured name prefix.
        prefix: String,
        /// Every network the provider reported for the datacenter.
        candidates: Vec<ExternalNetwork>,
    },
    /// The matched external network has no unused IPs left.
    #[error("no unused external IP available in network {network}")]
    NoUnusedExternalIp {
        /// The exhausted network.
        network: ExternalNetwork,
    },
    /// A provider task reached a terminal state other than success.
    ///
    /// The VM is deliberately left powered off.
    #[error("task {task} failed: {detail}")]
    TaskFailed {
        /// The failed task.
        task: TaskId,
        /// The provider's error detail.
        detail: String,
    },
    /// The provider did not report the expected power state within the
    /// configured bound.
    #[error("virtual machine {vm} did not report {state} within {waited:?}")]
    PowerStateTimeout {
        /// The VM being watched.
        vm: VmId,
        /// The state that was awaited.
        state: PowerState,
        /// How long the wait lasted.
        waited: Duration,
    },
    /// A provider API request failed at the transport level.
    #[error("cloud API request failed")]
    Api(#[source] anyhow::Error),
}
