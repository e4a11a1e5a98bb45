// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Cloud resource management for Riskgrid clusters.
//!
//! The provisioning layer hands us virtual machines with a single,
//! internally routed NIC. Members that must be reachable from outside the
//! datacenter need a second NIC on an externally routable network, and the
//! cloud provider only applies NIC changes to a VM that is powered off,
//! through an asynchronous task API that is polled to completion. This crate
//! owns that reconfiguration: selecting the external network and an unused
//! IP, and driving the VM through OFF → set NICs → ON with strict ordering
//! and fail-stop error propagation.
//!
//! The provider itself is reached through the [`CloudApi`] and
//! [`RemoteShell`] trait seams; nothing in this crate talks to a real cloud.

mod api;
mod config;
mod error;
mod nic;

pub use api::{
    CloudApi, DatacenterId, ExecOutput, ExternalIp, ExternalNetwork, NicAttachment, PowerState,
    RemoteShell, TaskId, TaskState, TaskStatus, VmId,
};
pub use config::{CloudResourceCliArgs, CloudResourceConfig, DEFAULT_EXTERNAL_NETWORK_PREFIX};
pub use error::CloudResourceError;
pub use nic::{find_external_network, find_unused_external_ip, NicReconfigurer};
