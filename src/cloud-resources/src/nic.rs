// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The NIC reconfiguration state machine.
//!
//! The provider applies NIC changes only to a powered-off VM, through an
//! asynchronous task that is polled to a terminal state, and it does not
//! publish the task's terminal state and the VM's observable power state
//! atomically. The resulting sequence is fixed:
//!
//! ```text
//! OFF (confirmed) → submit set-NICs task → task terminal
//!     → OFF re-confirmed → ON (confirmed)
//! ```
//!
//! A task that terminates unsuccessfully aborts the sequence with the VM
//! still powered off: an incompletely configured VM must not come back
//! online.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tracing::{debug, error, info};

use crate::api::{
    CloudApi, DatacenterId, ExternalIp, ExternalNetwork, NicAttachment, PowerState, RemoteShell,
    TaskId, TaskState, TaskStatus, VmId,
};
use crate::config::CloudResourceConfig;
use crate::error::CloudResourceError;

/// The one-shot security policy relaxation run before attaching the NIC.
/// Exit status is reported but not required to be zero.
const RELAX_SECURITY_POLICY_COMMAND: &str =
    "sed -i.rg.bak 's/^SELINUX=enforcing/SELINUX=permissive/' /etc/sysconfig/selinux";

/// Returns the first network whose name starts with `prefix`.
///
/// Deterministic: candidate order is the provider's, and there is no
/// fallback. A miss reports every candidate.
pub fn find_external_network(
    mut candidates: Vec<ExternalNetwork>,
    prefix: &str,
) -> Result<ExternalNetwork, CloudResourceError> {
    match candidates.iter().position(|n| n.name.starts_with(prefix)) {
        Some(i) => Ok(candidates.swap_remove(i)),
        None => Err(CloudResourceError::ExternalNetworkNotFound {
            prefix: prefix.to_string(),
            candidates,
        }),
    }
}

/// Returns the first IP of `unused`, or an error naming the exhausted
/// network. No randomization and no retry: an empty pool is a fatal
/// provisioning error at this layer.
pub fn find_unused_external_ip(
    mut unused: Vec<ExternalIp>,
    network: &ExternalNetwork,
) -> Result<ExternalIp, CloudResourceError> {
    if unused.is_empty() {
        return Err(CloudResourceError::NoUnusedExternalIp {
            network: network.clone(),
        });
    }
    Ok(unused.swap_remove(0))
}

/// Attaches externally routable NICs to freshly provisioned VMs.
///
/// Invoked once per VM during its provisioning path; concurrent
/// reconfiguration of the same VM is not supported and not guarded against
/// here.
#[derive(Debug)]
pub struct NicReconfigurer {
    api: Arc<dyn CloudApi>,
    shell: Option<Arc<dyn RemoteShell>>,
    config: CloudResourceConfig,
}

impl NicReconfigurer {
    /// Creates a reconfigurer over the given provider seams.
    ///
    /// Without a `shell`, the security policy relaxation step is skipped
    /// regardless of configuration.
    pub fn new(
        api: Arc<dyn CloudApi>,
        shell: Option<Arc<dyn RemoteShell>>,
        config: CloudResourceConfig,
    ) -> NicReconfigurer {
        NicReconfigurer { api, shell, config }
    }

    /// Attaches an IP from the datacenter's external network to `vm` and
    /// returns it.
    ///
    /// The VM must already be provisioned and visible to the provider. On
    /// success the VM is powered on with the new NIC present; on failure the
    /// error says exactly which step refused, and a failed NIC task leaves
    /// the VM powered off.
    pub async fn attach_external_nic(
        &self,
        datacenter: &DatacenterId,
        vm: &VmId,
    ) -> Result<ExternalIp, CloudResourceError> {
        let vms = self
            .api
            .list_virtual_machines()
            .await
            .map_err(CloudResourceError::Api)?;
        if !vms.contains(vm) {
            return Err(CloudResourceError::VirtualMachineNotFound {
                name: vm.clone(),
                candidates: vms,
            });
        }

        if self.config.relax_security_policy {
            self.relax_security_policy(vm).await?;
        }

        let networks = self
            .api
            .list_external_networks(datacenter)
            .await
            .map_err(CloudResourceError::Api)?;
        let network = find_external_network(networks, &self.config.external_network_prefix)?;
        info!(%vm, network = %network, %datacenter, "found external network");

        let unused = self
            .api
            .list_unused_ips(&network)
            .await
            .map_err(CloudResourceError::Api)?;
        let ip = find_unused_external_ip(unused, &network)?;

        let mut nics = self
            .api
            .list_attached_nics(vm)
            .await
            .map_err(CloudResourceError::Api)?;
        nics.push(NicAttachment::new(ip.address.clone(), network.name.clone()));

        self.reconfigure_nics(vm, &network, nics).await?;
        info!(%vm, %ip, "attached external NIC");
        Ok(ip)
    }

    /// Replaces `vm`'s NIC set with `nics`, driving the VM through
    /// OFF → set NICs → ON.
    pub async fn reconfigure_nics(
        &self,
        vm: &VmId,
        network: &ExternalNetwork,
        nics: Vec<NicAttachment>,
    ) -> Result<(), CloudResourceError> {
        info!(%vm, ?nics, "reconfiguring NICs");

        self.ensure_power_state(vm, PowerState::Off).await?;

        let task = self
            .api
            .set_nics(vm, network, &nics)
            .await
            .map_err(CloudResourceError::Api)?;
        let status = self.await_task(&task).await?;
        if status.state != TaskState::FinishedSuccessfully {
            // The VM stays off; see the module docs.
            return Err(CloudResourceError::TaskFailed {
                task,
                detail: status
                    .error_detail
                    .unwrap_or_else(|| "no detail reported".into()),
            });
        }

        // The task's terminal state and the VM's observable power state are
        // published independently; re-confirm OFF before powering on.
        self.await_power_state(vm, PowerState::Off, self.config.confirm_timeout)
            .await?;

        self.ensure_power_state(vm, PowerState::On).await?;
        info!(%vm, "NIC reconfiguration complete");
        Ok(())
    }

    /// Best-effort: a non-zero exit status is reported and ignored; only a
    /// failure of the channel itself is fatal.
    async fn relax_security_policy(&self, vm: &VmId) -> Result<(), CloudResourceError> {
        let Some(shell) = &self.shell else {
            return Ok(());
        };
        let output = shell
            .run_as_root(vm, RELAX_SECURITY_POLICY_COMMAND)
            .await
            .map_err(CloudResourceError::Api)?;
        if output.exit_status == 0 {
            info!(%vm, "set security policy to permissive");
        } else {
            error!(
                %vm,
                status = output.exit_status,
                stderr = %output.stderr,
                "failed to set security policy to permissive"
            );
        }
        Ok(())
    }

    async fn ensure_power_state(
        &self,
        vm: &VmId,
        state: PowerState,
    ) -> Result<(), CloudResourceError> {
        self.api
            .set_power_state(vm, state)
            .await
            .map_err(CloudResourceError::Api)?;
        self.await_power_state(vm, state, None).await?;
        debug!(%vm, %state, "virtual machine reached power state");
        Ok(())
    }

    async fn await_power_state(
        &self,
        vm: &VmId,
        state: PowerState,
        limit: Option<Duration>,
    ) -> Result<(), CloudResourceError> {
        let wait = async {
            loop {
                let observed = self
                    .api
                    .power_state(vm)
                    .await
                    .map_err(CloudResourceError::Api)?;
                if observed == state {
                    return Ok(());
                }
                debug!(%vm, %observed, want = %state, "waiting for power state");
                time::sleep(self.config.poll_interval).await;
            }
        };
        match limit {
            None => wait.await,
            Some(limit) => match time::timeout(limit, wait).await {
                Ok(result) => result,
                Err(_) => Err(CloudResourceError::PowerStateTimeout {
                    vm: vm.clone(),
                    state,
                    waited: limit,
                }),
            },
        }
    }

    async fn await_task(&self, task: &TaskId) -> Result<TaskStatus, CloudResourceError> {
        loop {
            let status = self
                .api
                .task_status(task)
                .await
                .map_err(CloudResourceError::Api)?;
            if status.state.is_terminal() {
                return Ok(status);
            }
            debug!(%task, state = ?status.state, "waiting for task");
            time::sleep(self.config.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::api::ExecOutput;

    /// A programmable in-memory provider that records the order of
    /// state-changing operations.
    #[derive(Debug, Default)]
    struct FakeCloud {
        state: Mutex<FakeCloudState>,
    }

    #[derive(Debug, Default)]
    struct FakeCloudState {
        vms: Vec<VmId>,
        networks: Vec<ExternalNetwork>,
        unused_ips: Vec<ExternalIp>,
        nics: BTreeMap<VmId, Vec<NicAttachment>>,
        power: BTreeMap<VmId, PowerState>,
        // Polls of a pending power change that report TRANSITIONING before
        // the target state becomes observable.
        transition_polls: u32,
        pending_power: BTreeMap<VmId, (PowerState, u32)>,
        task_polls_before_terminal: u32,
        task_result: Option<TaskStatus>,
        // After the NIC task reaches its terminal state, report this power
        // state forever (simulates a provider that never re-confirms OFF).
        power_after_task: Option<PowerState>,
        submitted_nics: Option<Vec<NicAttachment>>,
        events: Vec<String>,
    }

    impl FakeCloud {
        fn new(vm: &VmId) -> FakeCloud {
            let fake = FakeCloud::default();
            {
                let mut state = fake.state.lock().unwrap();
                state.vms = vec![vm.clone()];
                state.power.insert(vm.clone(), PowerState::On);
                state.nics.insert(
                    vm.clone(),
                    vec![NicAttachment::new("192.168.0.10", "internal")],
                );
                state.networks = vec![
                    ExternalNetwork::new("X1"),
                    ExternalNetwork::new("CLPU0_IPAC-west"),
                ];
                state.unused_ips = vec![ExternalIp::new("203.0.113.7"), ExternalIp::new("203.0.113.8")];
                state.task_result = Some(TaskStatus::succeeded());
            }
            fake
        }

        fn events(&self) -> Vec<String> {
            self.state.lock().unwrap().events.clone()
        }

        fn observed_power(&self, vm: &VmId) -> PowerState {
            let state = self.state.lock().unwrap();
            if let Some(power) = state.power_after_task {
                if state.task_result.is_none() {
                    return power;
                }
            }
            if state.pending_power.contains_key(vm) {
                return PowerState::Transitioning;
            }
            *state.power.get(vm).unwrap_or(&PowerState::Off)
        }
    }

    #[async_trait]
    impl CloudApi for FakeCloud {
        async fn list_virtual_machines(&self) -> Result<Vec<VmId>, anyhow::Error> {
            Ok(self.state.lock().unwrap().vms.clone())
        }

        async fn list_external_networks(
            &self,
            _datacenter: &DatacenterId,
        ) -> Result<Vec<ExternalNetwork>, anyhow::Error> {
            Ok(self.state.lock().unwrap().networks.clone())
        }

        async fn list_unused_ips(
            &self,
            _network: &ExternalNetwork,
        ) -> Result<Vec<ExternalIp>, anyhow::Error> {
            Ok(self.state.lock().unwrap().unused_ips.clone())
        }

        async fn power_state(&self, vm: &VmId) -> Result<PowerState, anyhow::Error> {
            let mut state = self.state.lock().unwrap();
            if let Some(power) = state.power_after_task {
                if state.task_result.is_none() {
                    return Ok(power);
                }
            }
            if let Some((target, polls_left)) = state.pending_power.get(vm).copied() {
                if polls_left == 0 {
                    state.pending_power.remove(vm);
                    state.power.insert(vm.clone(), target);
                    return Ok(target);
                }
                state.pending_power.insert(vm.clone(), (target, polls_left - 1));
                return Ok(PowerState::Transitioning);
            }
            Ok(*state.power.get(vm).unwrap_or(&PowerState::Off))
        }

        async fn set_power_state(
            &self,
            vm: &VmId,
            target: PowerState,
        ) -> Result<(), anyhow::Error> {
            let mut state = self.state.lock().unwrap();
            state.events.push(format!("power:{}", target));
            let polls = state.transition_polls;
            state.pending_power.insert(vm.clone(), (target, polls));
            Ok(())
        }

        async fn set_nics(
            &self,
            vm: &VmId,
            _network: &ExternalNetwork,
            nics: &[NicAttachment],
        ) -> Result<TaskId, anyhow::Error> {
            let mut state = self.state.lock().unwrap();
            let observed = if state.pending_power.contains_key(vm) {
                PowerState::Transitioning
            } else {
                *state.power.get(vm).unwrap_or(&PowerState::Off)
            };
            state.events.push(format!("set_nics(power={})", observed));
            state.submitted_nics = Some(nics.to_vec());
            Ok(TaskId::new("task-1"))
        }

        async fn task_status(&self, _task: &TaskId) -> Result<TaskStatus, anyhow::Error> {
            let mut state = self.state.lock().unwrap();
            if state.task_polls_before_terminal > 0 {
                state.task_polls_before_terminal -= 1;
                return Ok(TaskStatus {
                    state: TaskState::Running,
                    error_detail: None,
                });
            }
            let result = state.task_result.take().expect("task polled past terminal state");
            if result.state == TaskState::FinishedSuccessfully {
                // The task applied the NIC change.
                if let Some(nics) = state.submitted_nics.clone() {
                    let vm = state.vms[0].clone();
                    state.nics.insert(vm, nics);
                }
            }
            Ok(result)
        }

        async fn list_attached_nics(&self, vm: &VmId) -> Result<Vec<NicAttachment>, anyhow::Error> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .nics
                .get(vm)
                .cloned()
                .unwrap_or_default())
        }
    }

    #[derive(Debug)]
    struct FakeShell {
        exit_status: i32,
        commands: Mutex<Vec<String>>,
    }

    impl FakeShell {
        fn new(exit_status: i32) -> FakeShell {
            FakeShell {
                exit_status,
                commands: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RemoteShell for FakeShell {
        async fn run_as_root(
            &self,
            _vm: &VmId,
            command: &str,
        ) -> Result<ExecOutput, anyhow::Error> {
            self.commands.lock().unwrap().push(command.to_string());
            Ok(ExecOutput {
                exit_status: self.exit_status,
                stdout: String::new(),
                stderr: if self.exit_status == 0 {
                    String::new()
                } else {
                    "permission denied".into()
                },
            })
        }
    }

    fn reconfigurer(api: Arc<FakeCloud>, shell: Option<Arc<FakeShell>>) -> NicReconfigurer {
        let shell = shell.map(|s| s as Arc<dyn RemoteShell>);
        NicReconfigurer::new(api, shell, CloudResourceConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn attach_drives_off_task_on_in_order() {
        let vm = VmId::new("riskgrid-node-1");
        let api = Arc::new(FakeCloud::new(&vm));
        {
            let mut state = api.state.lock().unwrap();
            state.transition_polls = 3;
            state.task_polls_before_terminal = 4;
        }
        let shell = Arc::new(FakeShell::new(0));
        let nic = reconfigurer(Arc::clone(&api), Some(Arc::clone(&shell)));

        let ip = nic
            .attach_external_nic(&DatacenterId::new("dc-west"), &vm)
            .await
            .unwrap();
        assert_eq!(ip, ExternalIp::new("203.0.113.7"));

        // The NIC task was submitted only while the VM was observably off,
        // and the VM came back on only after the task completed.
        assert_eq!(
            api.events(),
            vec!["power:OFF", "set_nics(power=OFF)", "power:ON"]
        );
        assert_eq!(api.observed_power(&vm), PowerState::On);

        // The submitted NIC set is the existing NICs plus the new external
        // one, in order.
        let submitted = api.state.lock().unwrap().submitted_nics.clone().unwrap();
        assert_eq!(
            submitted,
            vec![
                NicAttachment::new("192.168.0.10", "internal"),
                NicAttachment::new("203.0.113.7", "CLPU0_IPAC-west"),
            ]
        );

        // The relaxation command ran exactly once.
        assert_eq!(shell.commands.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_task_leaves_vm_off() {
        let vm = VmId::new("riskgrid-node-1");
        let api = Arc::new(FakeCloud::new(&vm));
        {
            let mut state = api.state.lock().unwrap();
            state.task_result = Some(TaskStatus::failed("address conflict"));
        }
        let nic = reconfigurer(Arc::clone(&api), None);

        match nic
            .attach_external_nic(&DatacenterId::new("dc-west"), &vm)
            .await
        {
            Err(CloudResourceError::TaskFailed { detail, .. }) => {
                assert_eq!(detail, "address conflict")
            }
            other => panic!("unexpected result: {:?}", other),
        }

        // Fail-stop: no power-on was requested and the VM is observably off.
        assert_eq!(api.events(), vec!["power:OFF", "set_nics(power=OFF)"]);
        assert_eq!(api.observed_power(&vm), PowerState::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_power_state_times_out() {
        let vm = VmId::new("riskgrid-node-1");
        let api = Arc::new(FakeCloud::new(&vm));
        {
            let mut state = api.state.lock().unwrap();
            state.power_after_task = Some(PowerState::Transitioning);
        }
        let nic = reconfigurer(Arc::clone(&api), None);

        match nic
            .attach_external_nic(&DatacenterId::new("dc-west"), &vm)
            .await
        {
            Err(CloudResourceError::PowerStateTimeout { state, .. }) => {
                assert_eq!(state, PowerState::Off)
            }
            other => panic!("unexpected result: {:?}", other),
        }
        // Powering on was never attempted.
        assert_eq!(api.events(), vec!["power:OFF", "set_nics(power=OFF)"]);
    }

    #[tokio::test]
    async fn unknown_vm_lists_candidates() {
        let known = VmId::new("riskgrid-node-1");
        let api = Arc::new(FakeCloud::new(&known));
        let nic = reconfigurer(api, None);

        let err = nic
            .attach_external_nic(&DatacenterId::new("dc-west"), &VmId::new("riskgrid-node-9"))
            .await
            .unwrap_err();
        match &err {
            CloudResourceError::VirtualMachineNotFound { name, candidates } => {
                assert_eq!(name, &VmId::new("riskgrid-node-9"));
                assert_eq!(candidates, &vec![known]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(err.to_string().contains("riskgrid-node-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn relaxation_failure_is_not_fatal() {
        let vm = VmId::new("riskgrid-node-1");
        let api = Arc::new(FakeCloud::new(&vm));
        let shell = Arc::new(FakeShell::new(1));
        let nic = reconfigurer(Arc::clone(&api), Some(shell));

        nic.attach_external_nic(&DatacenterId::new("dc-west"), &vm)
            .await
            .unwrap();
        assert_eq!(api.observed_power(&vm), PowerState::On);
    }

    #[test]
    fn external_network_prefix_matching() {
        let candidates = vec![
            ExternalNetwork::new("X1"),
            ExternalNetwork::new("CLPU0_IPAC-west"),
        ];
        let found = find_external_network(candidates, "CLPU0_IPAC").unwrap();
        assert_eq!(found, ExternalNetwork::new("CLPU0_IPAC-west"));

        let err = find_external_network(
            vec![ExternalNetwork::new("X1"), ExternalNetwork::new("X2")],
            "CLPU0_IPAC",
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("X1"), "candidates missing from {message:?}");
        assert!(message.contains("X2"), "candidates missing from {message:?}");
    }

    #[test]
    fn unused_ip_selection() {
        let network = ExternalNetwork::new("CLPU0_IPAC-west");
        let first = find_unused_external_ip(
            vec![ExternalIp::new("203.0.113.7"), ExternalIp::new("203.0.113.8")],
            &network,
        )
        .unwrap();
        assert_eq!(first, ExternalIp::new("203.0.113.7"));

        match find_unused_external_ip(Vec::new(), &network) {
            Err(CloudResourceError::NoUnusedExternalIp { network }) => {
                assert_eq!(network.name, "CLPU0_IPAC-west")
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
