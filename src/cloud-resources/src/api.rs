// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The cloud provider seam: domain types and the traits a provider
//! implementation must supply.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A virtual machine, identified by the name label the provisioning layer
/// gave it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VmId(String);

impl VmId {
    /// Wraps a provider name label.
    pub fn new(name: impl Into<String>) -> VmId {
        VmId(name.into())
    }

    /// The underlying name label.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A provider datacenter.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DatacenterId(String);

impl DatacenterId {
    /// Wraps a provider datacenter identifier.
    pub fn new(id: impl Into<String>) -> DatacenterId {
        DatacenterId(id.into())
    }
}

impl fmt::Display for DatacenterId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A handle on a long-running provider operation.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    /// Wraps a provider task identifier.
    pub fn new(id: impl Into<String>) -> TaskId {
        TaskId(id.into())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The power state of a virtual machine, as observed through the provider's
/// monitor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerState {
    /// The VM is running.
    On,
    /// The VM is powered off.
    Off,
    /// The VM is between states; the provider will eventually report `On` or
    /// `Off`.
    Transitioning,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PowerState::On => f.write_str("ON"),
            PowerState::Off => f.write_str("OFF"),
            PowerState::Transitioning => f.write_str("TRANSITIONING"),
        }
    }
}

/// The state of an asynchronous provider task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    /// Submitted, not yet started.
    Pending,
    /// Executing.
    Running,
    /// Terminal: the operation succeeded.
    FinishedSuccessfully,
    /// Terminal: the operation failed.
    FinishedWithError,
}

impl TaskState {
    /// Whether the task will make no further progress.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::FinishedSuccessfully | TaskState::FinishedWithError
        )
    }
}

/// A task's state plus, for failed tasks, whatever detail the provider
/// reported.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    /// The task's state.
    pub state: TaskState,
    /// Error detail for tasks that finished with an error.
    pub error_detail: Option<String>,
}

impl TaskStatus {
    /// A successfully finished task.
    pub fn succeeded() -> TaskStatus {
        TaskStatus {
            state: TaskState::FinishedSuccessfully,
            error_detail: None,
        }
    }

    /// A failed task with the given detail.
    pub fn failed(detail: impl Into<String>) -> TaskStatus {
        TaskStatus {
            state: TaskState::FinishedWithError,
            error_detail: Some(detail.into()),
        }
    }
}

/// An externally routable network in a datacenter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalNetwork {
    /// The provider's name for the network.
    pub name: String,
}

impl ExternalNetwork {
    /// Wraps a provider network name.
    pub fn new(name: impl Into<String>) -> ExternalNetwork {
        ExternalNetwork { name: name.into() }
    }
}

impl fmt::Display for ExternalNetwork {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// An IP address in an external network's pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIp {
    /// The address, in the provider's textual form.
    pub address: String,
}

impl ExternalIp {
    /// Wraps a provider IP address.
    pub fn new(address: impl Into<String>) -> ExternalIp {
        ExternalIp {
            address: address.into(),
        }
    }
}

impl fmt::Display for ExternalIp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.address)
    }
}

/// One NIC attached (or to be attached) to a VM.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NicAttachment {
    /// The NIC's IP address.
    pub ip: String,
    /// The network the NIC is on.
    pub network: String,
}

impl NicAttachment {
    /// A NIC binding `ip` from `network`.
    pub fn new(ip: impl Into<String>, network: impl Into<String>) -> NicAttachment {
        NicAttachment {
            ip: ip.into(),
            network: network.into(),
        }
    }
}

impl fmt::Display for NicAttachment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{}", self.ip, self.network)
    }
}

/// The output of a remote command execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecOutput {
    /// The command's exit status.
    pub exit_status: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

/// Operations this crate needs from the cloud provider.
///
/// Implementations wrap a real provider client. Errors are transport-level
/// and opaque to this crate; they are surfaced as
/// [`CloudResourceError::Api`](crate::CloudResourceError::Api).
#[async_trait]
pub trait CloudApi: fmt::Debug + Send + Sync {
    /// Lists the virtual machines visible to the caller's account.
    async fn list_virtual_machines(&self) -> Result<Vec<VmId>, anyhow::Error>;

    /// Lists the external networks available in `datacenter`.
    async fn list_external_networks(
        &self,
        datacenter: &DatacenterId,
    ) -> Result<Vec<ExternalNetwork>, anyhow::Error>;

    /// Lists the unused IPs in `network`'s pool.
    async fn list_unused_ips(
        &self,
        network: &ExternalNetwork,
    ) -> Result<Vec<ExternalIp>, anyhow::Error>;

    /// Observes `vm`'s power state.
    async fn power_state(&self, vm: &VmId) -> Result<PowerState, anyhow::Error>;

    /// Requests a power state change for `vm`.
    ///
    /// Returns once the request is accepted; the state change itself is
    /// observed through [`power_state`](CloudApi::power_state).
    async fn set_power_state(&self, vm: &VmId, state: PowerState) -> Result<(), anyhow::Error>;

    /// Submits a task replacing `vm`'s NIC set with `nics`.
    ///
    /// The provider requires the VM to be powered off.
    async fn set_nics(
        &self,
        vm: &VmId,
        network: &ExternalNetwork,
        nics: &[NicAttachment],
    ) -> Result<TaskId, anyhow::Error>;

    /// Observes a task's status.
    async fn task_status(&self, task: &TaskId) -> Result<TaskStatus, anyhow::Error>;

    /// Lists the NICs currently attached to `vm`.
    async fn list_attached_nics(&self, vm: &VmId) -> Result<Vec<NicAttachment>, anyhow::Error>;
}

/// A remote command execution channel on a VM, used for one-shot
/// post-provisioning commands.
#[async_trait]
pub trait RemoteShell: fmt::Debug + Send + Sync {
    /// Runs `command` as root on `vm`.
    ///
    /// An `Err` means the channel failed; a command that ran and exited
    /// non-zero is an `Ok` with that exit status in the output.
    async fn run_as_root(&self, vm: &VmId, command: &str) -> Result<ExecOutput, anyhow::Error>;
}
