//! Provisioning workflow
//!
//! A run walks a fixed sequence of states against a single management
//! session:
//!
//! ```text
//! Connected -> DatacenterResolved -> ClusterResolved -> DatastoreSelected
//!   create: VmCreated -> [IsoAttached] -> [PoweredOn -> IsoDetachedFromBoot -> [QuestionAnswered]]
//!   clone:  VmCloned -> AffinityApplied
//! -> Done
//! ```
//!
//! Every step waits for the server to finish before the next one starts. A
//! failure anywhere ends the run; whatever was already created on the server
//! is left as is.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::anti_affinity::{self, AffinityGroup, AffinityRuleEngine};
use crate::clone_spec::{build_clone_spec, build_customization, CloneTarget};
use crate::config::{MkvmConfig, DEFAULT_POWER_ON_GRACE};
use crate::datastore;
use crate::devices::{
    attach_iso, create_device_changes, datastore_path, detach_from_boot, find_by_label,
    VirtualDevice, VmCreateSpec, CDROM_LABEL,
};
use crate::error::{MkvmError, MkvmResult};
use crate::management::ManagementClient;
use crate::network::NetworkMap;
use crate::resources;
use crate::types::{
    Cluster, Datacenter, ManagedObjectRef, ProvisioningRequest, ResourceSpec, TaskHandle,
    VmHandle,
};

/// Choice index sent when answering a pending VM question.
pub const DEFAULT_ANSWER_CHOICE: &str = "0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningState {
    Connected,
    DatacenterResolved,
    ClusterResolved,
    DatastoreSelected,
    VmCreated,
    IsoAttached,
    PoweredOn,
    IsoDetachedFromBoot,
    QuestionAnswered,
    VmCloned,
    AffinityApplied,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningOutcome {
    Created {
        vm: VmHandle,
    },
    Cloned {
        vm: VmHandle,
        affinity: Option<AffinityGroup>,
    },
    /// The run stopped on purpose before touching the server.
    Skipped {
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct ProvisionerSettings {
    /// Fixed pause after power-on before the ISO is detached from boot.
    ///
    /// This is a guess at when the guest has finished reading the installer,
    /// not a readiness signal. If the guest is slower the drive may be
    /// detached early, or the question check may run before a question is
    /// raised.
    pub power_on_grace: Duration,
}

impl Default for ProvisionerSettings {
    fn default() -> Self {
        Self {
            power_on_grace: DEFAULT_POWER_ON_GRACE,
        }
    }
}

impl From<&MkvmConfig> for ProvisionerSettings {
    fn from(config: &MkvmConfig) -> Self {
        Self {
            power_on_grace: config.power_on_grace,
        }
    }
}

/// Request checks that need no server access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisioningPlan {
    pub resources: ResourceSpec,
    pub portgroup: String,
}

pub fn validate(request: &ProvisioningRequest, networks: &NetworkMap) -> MkvmResult<ProvisioningPlan> {
    if request.hostname.is_empty() {
        return Err(MkvmError::configuration("A hostname is required"));
    }

    let resources = resources::resolve(request)?;

    match (request.clone, &request.source_vm) {
        (true, None) => {
            return Err(MkvmError::configuration(
                "--clone requires --sourcevm to name the VM to clone",
            ))
        }
        (false, Some(_)) => {
            return Err(MkvmError::configuration(
                "--sourcevm is only used together with --clone",
            ))
        }
        _ => {}
    }

    if request.clone {
        let ip = &request.ip;
        for (value, what, flag) in [
            (&ip.ip, "An IP address", "--ip"),
            (&ip.gateway, "A gateway", "--gateway"),
            (&ip.netmask, "A netmask", "--netmask"),
            (&ip.dns, "A DNS server list", "--dns"),
        ] {
            if value.trim().is_empty() {
                return Err(MkvmError::configuration(format!(
                    "{} is required to customize a clone; pass {}",
                    what, flag
                )));
            }
        }
    }

    let portgroup = networks.portgroup_for(&request.subnet)?.to_string();

    Ok(ProvisioningPlan {
        resources,
        portgroup,
    })
}

/// Annotation stamped on VMs built from scratch.
pub fn annotation(username: &str, at: NaiveDateTime) -> String {
    format!(
        "Created by {} on {}",
        username,
        at.format("%Y-%m-%d at %H:%M %p")
    )
}

pub struct Provisioner {
    client: Arc<dyn ManagementClient>,
    affinity: Arc<dyn AffinityRuleEngine>,
    settings: ProvisionerSettings,
    history: Vec<ProvisioningState>,
}

impl Provisioner {
    /// `client` must already hold an authenticated session.
    pub fn new(
        client: Arc<dyn ManagementClient>,
        affinity: Arc<dyn AffinityRuleEngine>,
        settings: ProvisionerSettings,
    ) -> Self {
        Self {
            client,
            affinity,
            settings,
            history: vec![ProvisioningState::Connected],
        }
    }

    pub fn state(&self) -> ProvisioningState {
        self.history
            .last()
            .copied()
            .unwrap_or(ProvisioningState::Connected)
    }

    /// Every state the run has passed through, in order.
    pub fn history(&self) -> &[ProvisioningState] {
        &self.history
    }

    fn advance(&mut self, next: ProvisioningState) {
        debug!("Provisioning state {:?} -> {:?}", self.state(), next);
        self.history.push(next);
    }

    pub async fn provision(
        &mut self,
        request: &ProvisioningRequest,
        networks: &NetworkMap,
    ) -> MkvmResult<ProvisioningOutcome> {
        let plan = validate(request, networks)?;

        let datacenter = self
            .client
            .find_datacenter(&request.datacenter)
            .await?
            .ok_or_else(|| {
                MkvmError::not_found(format!("vSphere data center {}", request.datacenter))
            })?;
        info!("Connected to datacenter {}", datacenter.name);
        self.advance(ProvisioningState::DatacenterResolved);

        let cluster = self
            .client
            .list_clusters(&datacenter)
            .await?
            .into_iter()
            .find(|c| c.name == request.cluster)
            .ok_or_else(|| MkvmError::not_found(format!("vSphere cluster {}", request.cluster)))?;
        info!("Found VMware cluster {}", cluster.name);
        self.advance(ProvisioningState::ClusterResolved);

        let datastore = self.select_datastore(&datacenter, request).await?;
        self.advance(ProvisioningState::DatastoreSelected);

        let outcome = if request.clone {
            self.clone_vm(request, &plan, &datacenter, &cluster, datastore)
                .await?
        } else {
            self.create_vm(request, &plan, &datacenter, &cluster).await?
        };

        self.advance(ProvisioningState::Done);
        Ok(outcome)
    }

    async fn select_datastore(
        &self,
        datacenter: &Datacenter,
        request: &ProvisioningRequest,
    ) -> MkvmResult<String> {
        let candidates = self.client.list_datastores(datacenter).await?;
        let name = datastore::select(&candidates, &request.datastore_pattern)?;
        info!("Selected datastore {}", name);
        Ok(name)
    }

    async fn run_task(&self, task: TaskHandle) -> MkvmResult<Option<ManagedObjectRef>> {
        debug!("Waiting for {} ({})", task.operation, task.moref);
        self.client.wait_for_task(&task).await
    }

    async fn find_cdrom(&self, vm: &VmHandle) -> MkvmResult<VirtualDevice> {
        let devices = self.client.vm_devices(vm).await?;
        find_by_label(&devices, CDROM_LABEL)
            .cloned()
            .ok_or_else(|| MkvmError::not_found(format!("'{}' on VM {}", CDROM_LABEL, vm.name)))
    }

    async fn create_vm(
        &mut self,
        request: &ProvisioningRequest,
        plan: &ProvisioningPlan,
        datacenter: &Datacenter,
        cluster: &Cluster,
    ) -> MkvmResult<ProvisioningOutcome> {
        if !request.flags.make_vm {
            info!("--no-vm selected. Terminating.");
            return Ok(ProvisioningOutcome::Skipped {
                reason: "--no-vm selected".to_string(),
            });
        }

        // Free space may have moved since the first look.
        let datastore = self.select_datastore(datacenter, request).await?;
        let networks = self.client.list_networks(datacenter).await?;

        let spec = VmCreateSpec {
            name: request.hostname.clone(),
            annotation: annotation(
                &request.credentials.username,
                chrono::Local::now().naive_local(),
            ),
            guest_id: request.guest_id(),
            vm_path_name: datastore_path(&datastore),
            num_cpus: plan.resources.cpu,
            memory_mb: plan.resources.memory_mib,
            device_changes: create_device_changes(
                &datastore,
                &plan.resources,
                &request.iso_store,
                &request.hostname,
                &plan.portgroup,
                &networks,
            )?,
        };

        info!("Building {} VM now", request.hostname);
        debug!("{}", serde_json::to_string_pretty(&spec)?);

        let task = self
            .client
            .create_vm(&datacenter.vm_folder, &spec, &cluster.resource_pool)
            .await?;
        let moref = self.run_task(task).await?.ok_or_else(|| {
            MkvmError::remote("CreateVM_Task", "task finished without returning the new VM")
        })?;
        let vm = VmHandle {
            name: request.hostname.clone(),
            moref,
            parent: Some(datacenter.vm_folder.clone()),
        };
        self.advance(ProvisioningState::VmCreated);

        if request.flags.upload_iso {
            self.upload_and_attach_iso(request, datacenter, &vm).await?;
            self.advance(ProvisioningState::IsoAttached);
        }

        if request.flags.power_on {
            self.power_on_and_detach_iso(&vm).await?;
        }

        Ok(ProvisioningOutcome::Created { vm })
    }

    async fn upload_and_attach_iso(
        &mut self,
        request: &ProvisioningRequest,
        datacenter: &Datacenter,
        vm: &VmHandle,
    ) -> MkvmResult<()> {
        let local = request.local_iso_path();
        if tokio::fs::metadata(&local).await.is_err() {
            return Err(MkvmError::configuration(format!(
                "ISO {} does not exist",
                local.display()
            )));
        }

        info!(
            "Uploading {} to {}",
            request.iso_file_name(),
            request.iso_store
        );
        self.client
            .upload_file(
                datacenter,
                &request.iso_store,
                &format!("/{}", request.iso_file_name()),
                &local,
            )
            .await?;

        let cdrom = self.find_cdrom(vm).await?;
        let change = attach_iso(&cdrom, &request.iso_store, &request.hostname);
        let task = self.client.reconfigure_vm(vm, &[change]).await?;
        self.run_task(task).await?;
        Ok(())
    }

    async fn power_on_and_detach_iso(&mut self, vm: &VmHandle) -> MkvmResult<()> {
        let task = self.client.power_on_vm(vm).await?;
        self.run_task(task).await?;
        info!("Powered on {}", vm.name);
        self.advance(ProvisioningState::PoweredOn);

        warn!(
            "Waiting a fixed {:?} before detaching the ISO from boot; a slow guest may still need it",
            self.settings.power_on_grace
        );
        tokio::time::sleep(self.settings.power_on_grace).await;

        let cdrom = self.find_cdrom(vm).await?;
        let task = self
            .client
            .reconfigure_vm(vm, &[detach_from_boot(&cdrom)])
            .await?;
        self.run_task(task).await?;
        self.advance(ProvisioningState::IsoDetachedFromBoot);

        if let Some(question) = self.client.pending_question(vm).await? {
            info!("Answering pending question on {}: {}", vm.name, question.text);
            self.client
                .answer_question(vm, &question.id, DEFAULT_ANSWER_CHOICE)
                .await?;
            self.advance(ProvisioningState::QuestionAnswered);
        }

        Ok(())
    }

    async fn clone_vm(
        &mut self,
        request: &ProvisioningRequest,
        plan: &ProvisioningPlan,
        datacenter: &Datacenter,
        cluster: &Cluster,
        mut datastore: String,
    ) -> MkvmResult<ProvisioningOutcome> {
        let source_name = request
            .source_vm
            .as_deref()
            .ok_or_else(|| MkvmError::configuration("--clone requires --sourcevm"))?;
        let source = self
            .client
            .find_vm(datacenter, source_name)
            .await?
            .ok_or_else(|| MkvmError::not_found(format!("source vm {}", source_name)))?;

        let source_datastores = self.client.vm_datastores(&source).await?;
        if let Some(preferred) = datastore::clone_override(&source_datastores) {
            info!("Using source VM datastore {} for the clone", preferred);
            datastore = preferred.to_string();
        }

        let devices = self.client.vm_devices(&source).await?;
        let networks = self.client.list_networks(datacenter).await?;
        let target = CloneTarget {
            pool: &cluster.resource_pool,
            cpu: plan.resources.cpu,
            memory_mib: plan.resources.memory_mib,
            datastore: &datastore,
            portgroup: &plan.portgroup,
            secondary_disk_kib: plan.resources.secondary_disk.as_ref().map(|d| d.size_kib),
        };
        let mut spec = build_clone_spec(&devices, &networks, &target)?;
        spec.customization = Some(build_customization(
            &request.hostname,
            &request.domain,
            &request.ip,
        ));
        debug!("{}", serde_json::to_string_pretty(&spec)?);

        let folder = source
            .parent
            .clone()
            .unwrap_or_else(|| datacenter.vm_folder.clone());
        info!("Cloning {} to new VM: {}", source.name, request.hostname);
        let task = self
            .client
            .clone_vm(&source, &folder, &request.hostname, &spec)
            .await?;
        let moref = self.run_task(task).await?.ok_or_else(|| {
            MkvmError::remote("CloneVM_Task", "task finished without returning the new VM")
        })?;
        let vm = VmHandle {
            name: request.hostname.clone(),
            moref,
            parent: Some(folder),
        };
        self.advance(ProvisioningState::VmCloned);

        let affinity = anti_affinity::plan(&request.hostname, &request.domain);
        match &affinity {
            Some(group) => {
                info!(
                    "Adding {} to anti-affinity group {}",
                    request.hostname,
                    group.rule_name()
                );
                self.affinity
                    .create(datacenter, cluster, group)
                    .await
                    .map_err(|e| match e {
                        MkvmError::RemoteOperation { .. } => e,
                        other => MkvmError::remote("create anti-affinity rule", other),
                    })?;
            }
            None => debug!("{} needs no anti-affinity rule", request.hostname),
        }
        self.advance(ProvisioningState::AffinityApplied);

        Ok(ProvisioningOutcome::Cloned { vm, affinity })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::resources::CustomSpec;
    use crate::test_helpers::{
        ClientCall, RecordingAffinityEngine, StubManagementClient,
    };
    use chrono::NaiveDate;
    use tracing_test::traced_test;

    fn networks() -> NetworkMap {
        [("192.168.20.0".to_string(), "Production".to_string())]
            .into_iter()
            .collect()
    }

    fn request() -> ProvisioningRequest {
        let mut request = StubManagementClient::request("app1.example.com");
        request.template = Some("small".to_string());
        request.flags.upload_iso = false;
        request.flags.power_on = false;
        request
    }

    fn provisioner(
        client: &Arc<StubManagementClient>,
        affinity: &Arc<RecordingAffinityEngine>,
    ) -> Provisioner {
        Provisioner::new(
            client.clone(),
            affinity.clone(),
            ProvisionerSettings {
                power_on_grace: Duration::ZERO,
            },
        )
    }

    #[test]
    fn test_annotation_format() {
        let at = NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_opt(14, 5, 0)
            .unwrap();
        assert_eq!(
            annotation("jdoe", at),
            "Created by jdoe on 2024-03-07 at 14:05 PM"
        );
    }

    #[test]
    fn test_validate_requires_source_vm_for_clone() {
        let mut req = request();
        req.clone = true;
        assert_eq!(
            validate(&req, &networks()).unwrap_err().kind(),
            ErrorKind::Configuration
        );

        let mut req = request();
        req.source_vm = Some("dbtemplate".to_string());
        assert_eq!(
            validate(&req, &networks()).unwrap_err().kind(),
            ErrorKind::Configuration
        );
    }

    #[test]
    fn test_clone_needs_static_ip_settings() {
        let mut req = request();
        req.clone = true;
        req.source_vm = Some("dbtemplate".to_string());
        assert!(validate(&req, &networks()).is_ok());

        let clears: [fn(&mut ProvisioningRequest); 4] = [
            |r| r.ip.ip.clear(),
            |r| r.ip.gateway.clear(),
            |r| r.ip.netmask.clear(),
            |r| r.ip.dns = " ".to_string(),
        ];
        for clear in clears {
            let mut incomplete = req.clone();
            clear(&mut incomplete);
            let err = validate(&incomplete, &networks()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Configuration);
            assert!(err.to_string().contains("clone"), "got: {}", err);
        }

        // Builds from an ISO take their address from the kickstart instead.
        let mut req = request();
        req.ip = Default::default();
        assert!(validate(&req, &networks()).is_ok());
    }

    #[test]
    fn test_validate_subnet() {
        let mut req = request();
        req.subnet = "10.9.9.0".to_string();
        let err = validate(&req, &networks()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let mut req = request();
        req.template = None;
        req.custom = Some(CustomSpec {
            cpu: 4,
            memory: "8G".to_string(),
            disk: "50G".to_string(),
        });
        let plan = validate(&req, &networks()).unwrap();
        assert_eq!(plan.portgroup, "Production");
        assert_eq!(plan.resources.memory_mib, 8192);
    }

    #[tokio::test]
    async fn test_missing_datacenter_is_terminal() {
        let client = Arc::new(StubManagementClient::new());
        let affinity = Arc::new(RecordingAffinityEngine::new());
        let mut req = request();
        req.datacenter = "Elsewhere".to_string();

        let err = provisioner(&client, &affinity)
            .provision(&req, &networks())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(client.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_missing_cluster_and_datastore() {
        let client = Arc::new(StubManagementClient::new());
        let affinity = Arc::new(RecordingAffinityEngine::new());

        let mut req = request();
        req.cluster = "Nope".to_string();
        let mut p = provisioner(&client, &affinity);
        let err = p.provision(&req, &networks()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(p.state(), ProvisioningState::DatacenterResolved);

        let mut req = request();
        req.datastore_pattern = "^missing".to_string();
        let mut p = provisioner(&client, &affinity);
        let err = p.provision(&req, &networks()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(p.state(), ProvisioningState::ClusterResolved);
    }

    #[tokio::test]
    async fn test_no_vm_exits_before_create() {
        let client = Arc::new(StubManagementClient::new());
        let affinity = Arc::new(RecordingAffinityEngine::new());
        let mut req = request();
        req.flags.make_vm = false;

        let mut p = provisioner(&client, &affinity);
        let outcome = p.provision(&req, &networks()).await.unwrap();
        assert!(matches!(outcome, ProvisioningOutcome::Skipped { .. }));
        assert!(client.mutations().is_empty());
        assert_eq!(p.state(), ProvisioningState::Done);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_create_without_upload_or_power() {
        let client = Arc::new(StubManagementClient::new());
        let affinity = Arc::new(RecordingAffinityEngine::new());

        let mut p = provisioner(&client, &affinity);
        let outcome = p.provision(&request(), &networks()).await.unwrap();

        let ProvisioningOutcome::Created { vm } = outcome else {
            panic!("expected a created VM");
        };
        assert_eq!(vm.name, "app1.example.com");
        assert_eq!(
            p.history(),
            &[
                ProvisioningState::Connected,
                ProvisioningState::DatacenterResolved,
                ProvisioningState::ClusterResolved,
                ProvisioningState::DatastoreSelected,
                ProvisioningState::VmCreated,
                ProvisioningState::Done,
            ]
        );

        // The create branch looks at free space twice.
        let listings = client
            .calls()
            .into_iter()
            .filter(|c| matches!(c, ClientCall::ListDatastores))
            .count();
        assert_eq!(listings, 2);
        assert!(logs_contain("Selected datastore prod-ds-02"));

        let ClientCall::CreateVm { spec, pool, .. } = &client.mutations()[0] else {
            panic!("expected CreateVM_Task first");
        };
        assert_eq!(spec.vm_path_name, "[prod-ds-02]");
        assert_eq!(spec.guest_id, "rhel8_64Guest");
        assert_eq!(pool.value, "resgroup-8");
    }

    #[tokio::test]
    async fn test_missing_local_iso() {
        let client = Arc::new(StubManagementClient::new());
        let affinity = Arc::new(RecordingAffinityEngine::new());
        let mut req = request();
        req.flags.upload_iso = true;
        req.outdir = std::path::PathBuf::from("/nonexistent/mkvm-test");

        let mut p = provisioner(&client, &affinity);
        let err = p.provision(&req, &networks()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        // The VM itself was already created and is left behind.
        assert_eq!(p.state(), ProvisioningState::VmCreated);
    }

    #[tokio::test]
    async fn test_failed_task_aborts_run() {
        let client = Arc::new(StubManagementClient::new().failing("PowerOnVM_Task"));
        let affinity = Arc::new(RecordingAffinityEngine::new());
        let mut req = request();
        req.flags.power_on = true;

        let mut p = provisioner(&client, &affinity);
        let err = p.provision(&req, &networks()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RemoteOperation);
        assert_eq!(p.state(), ProvisioningState::VmCreated);
        assert!(!client
            .mutations()
            .iter()
            .any(|c| matches!(c, ClientCall::ReconfigureVm { .. })));
    }

    #[tokio::test]
    async fn test_pending_question_is_answered() {
        let client = Arc::new(StubManagementClient::new().with_question("q-17", "Was the VM copied?"));
        let affinity = Arc::new(RecordingAffinityEngine::new());
        let mut req = request();
        req.flags.power_on = true;

        let mut p = provisioner(&client, &affinity);
        p.provision(&req, &networks()).await.unwrap();

        assert!(client.mutations().contains(&ClientCall::AnswerQuestion {
            vm: "app1.example.com".to_string(),
            question_id: "q-17".to_string(),
            choice: "0".to_string(),
        }));
        assert!(p.history().contains(&ProvisioningState::QuestionAnswered));
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_period_before_boot_detach() {
        let client = Arc::new(StubManagementClient::new());
        let affinity = Arc::new(RecordingAffinityEngine::new());
        let mut req = request();
        req.flags.power_on = true;

        let grace = Duration::from_secs(10);
        let mut p = Provisioner::new(
            client.clone(),
            affinity,
            ProvisionerSettings {
                power_on_grace: grace,
            },
        );
        p.provision(&req, &networks()).await.unwrap();

        let timeline = client.timeline();
        let powered_on = timeline
            .iter()
            .find(|(call, _)| matches!(call, ClientCall::PowerOnVm(_)))
            .map(|(_, at)| *at)
            .unwrap();
        let detached = timeline
            .iter()
            .find(|(call, _)| matches!(call, ClientCall::ReconfigureVm { .. }))
            .map(|(_, at)| *at)
            .unwrap();
        assert!(detached.duration_since(powered_on) >= grace);
    }

    #[tokio::test]
    async fn test_clone_missing_source_vm() {
        let client = Arc::new(StubManagementClient::new());
        let affinity = Arc::new(RecordingAffinityEngine::new());
        let mut req = request();
        req.clone = true;
        req.source_vm = Some("ghost".to_string());

        let err = provisioner(&client, &affinity)
            .provision(&req, &networks())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("ghost"));
    }

    #[tokio::test]
    async fn test_affinity_failure_is_remote_error() {
        let client = Arc::new(StubManagementClient::new().with_template_vm("dbtemplate"));
        let affinity = Arc::new(RecordingAffinityEngine::failing());
        let mut req = request();
        req.hostname = "db2.example.com".to_string();
        req.clone = true;
        req.source_vm = Some("dbtemplate".to_string());

        let mut p = provisioner(&client, &affinity);
        let err = p.provision(&req, &networks()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RemoteOperation);
        assert_eq!(p.state(), ProvisioningState::VmCloned);
    }

    #[tokio::test]
    async fn test_clone_prefers_vmstore_datastore() {
        let client = Arc::new(StubManagementClient::new().with_template_vm("dbtemplate"));
        let affinity = Arc::new(RecordingAffinityEngine::new());
        let mut req = request();
        req.hostname = "db1.example.com".to_string();
        req.clone = true;
        req.source_vm = Some("dbtemplate".to_string());
        req.secondary_disk = Some("20G".to_string());

        let mut p = provisioner(&client, &affinity);
        let outcome = p.provision(&req, &networks()).await.unwrap();
        assert!(matches!(
            outcome,
            ProvisioningOutcome::Cloned { affinity: None, .. }
        ));
        assert!(affinity.calls().is_empty());
        assert_eq!(p.state(), ProvisioningState::Done);

        let ClientCall::CloneVm { spec, .. } = &client.mutations()[0] else {
            panic!("expected CloneVM_Task");
        };
        let crate::devices::DeviceChange::Add(crate::devices::DeviceConfigSpec::Disk {
            file_name,
            ..
        }) = &spec.device_changes[1]
        else {
            panic!("expected the secondary disk");
        };
        assert_eq!(file_name, "[tmpl-VMstore-01]");
    }
}
