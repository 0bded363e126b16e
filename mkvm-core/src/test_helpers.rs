//! In-memory collaborators for exercising the provisioner without a server

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::time::Instant;

use crate::anti_affinity::{AffinityGroup, AffinityRuleEngine};
use crate::clone_spec::CloneSpec;
use crate::datastore::DatastoreCandidate;
use crate::devices::{
    DeviceChange, DeviceConfigSpec, VirtualDevice, VmCreateSpec, CDROM_LABEL,
    SOURCE_NETWORK_ADAPTER_LABEL,
};
use crate::error::{MkvmError, MkvmResult};
use crate::management::ManagementClient;
use crate::network::NetworkInfo;
use crate::types::{
    Cluster, Credentials, Datacenter, ManagedObjectRef, ProvisioningRequest, StaticIpSettings,
    TaskHandle, VmHandle, VmQuestion,
};

/// One call made against [`StubManagementClient`].
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCall {
    FindDatacenter(String),
    ListClusters,
    ListDatastores,
    ListNetworks,
    FindVm(String),
    VmDevices(String),
    VmDatastores(String),
    CreateVm {
        folder: ManagedObjectRef,
        spec: VmCreateSpec,
        pool: ManagedObjectRef,
    },
    CloneVm {
        source: String,
        folder: ManagedObjectRef,
        name: String,
        spec: CloneSpec,
    },
    ReconfigureVm {
        vm: String,
        changes: Vec<DeviceChange>,
    },
    PowerOnVm(String),
    PendingQuestion(String),
    AnswerQuestion {
        vm: String,
        question_id: String,
        choice: String,
    },
    UploadFile {
        datastore: String,
        remote_path: String,
        local_path: PathBuf,
    },
    WaitForTask(String),
}

impl ClientCall {
    /// Whether the call changes anything on the server.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            ClientCall::CreateVm { .. }
                | ClientCall::CloneVm { .. }
                | ClientCall::ReconfigureVm { .. }
                | ClientCall::PowerOnVm(_)
                | ClientCall::AnswerQuestion { .. }
                | ClientCall::UploadFile { .. }
        )
    }
}

#[derive(Debug, Clone)]
struct StubVm {
    handle: VmHandle,
    devices: Vec<VirtualDevice>,
    datastores: Vec<String>,
}

#[derive(Debug, Clone)]
struct StubTask {
    operation: String,
    result: Option<ManagedObjectRef>,
}

/// Recording management client with a small fixed inventory
///
/// The inventory is one datacenter `DC1` holding cluster `Cluster-A`, three
/// datastores and a `Production` portgroup. VMs created or cloned through
/// the stub become visible to later lookups, and device edits are applied to
/// them.
pub struct StubManagementClient {
    pub datacenter: Datacenter,
    pub clusters: Vec<Cluster>,
    pub datastores: Vec<DatastoreCandidate>,
    pub networks: Vec<NetworkInfo>,
    vms: Mutex<Vec<StubVm>>,
    tasks: Mutex<HashMap<String, StubTask>>,
    question: Mutex<Option<VmQuestion>>,
    failing_operation: Option<String>,
    calls: Mutex<Vec<(ClientCall, Instant)>>,
    next_id: AtomicU32,
}

impl Default for StubManagementClient {
    fn default() -> Self {
        Self::new()
    }
}

impl StubManagementClient {
    pub fn new() -> Self {
        Self {
            datacenter: Datacenter {
                name: "DC1".to_string(),
                moref: ManagedObjectRef::new("Datacenter", "datacenter-2"),
                vm_folder: ManagedObjectRef::new("Folder", "group-v1"),
            },
            clusters: vec![Cluster {
                name: "Cluster-A".to_string(),
                moref: ManagedObjectRef::new("ClusterComputeResource", "domain-c7"),
                resource_pool: ManagedObjectRef::new("ResourcePool", "resgroup-8"),
            }],
            datastores: vec![
                DatastoreCandidate {
                    name: "ISOs".to_string(),
                    free_space: 5_000_000,
                },
                DatastoreCandidate {
                    name: "prod-ds-01".to_string(),
                    free_space: 500_000,
                },
                DatastoreCandidate {
                    name: "prod-ds-02".to_string(),
                    free_space: 900_000,
                },
            ],
            networks: vec![NetworkInfo {
                name: "Production".to_string(),
                switch_uuid: "50 2a 7c 1d".to_string(),
                portgroup_key: "dvportgroup-20".to_string(),
            }],
            vms: Mutex::new(Vec::new()),
            tasks: Mutex::new(HashMap::new()),
            question: Mutex::new(None),
            failing_operation: None,
            calls: Mutex::new(Vec::new()),
            next_id: AtomicU32::new(100),
        }
    }

    /// A request that matches the stub inventory and needs only a size.
    pub fn request(hostname: &str) -> ProvisioningRequest {
        ProvisioningRequest {
            hostname: hostname.to_string(),
            domain: "example.com".to_string(),
            subnet: "192.168.20.0".to_string(),
            ip: StaticIpSettings {
                ip: "192.168.20.12".to_string(),
                gateway: "192.168.20.1".to_string(),
                netmask: "255.255.255.0".to_string(),
                dns: "192.168.1.10,192.168.1.11".to_string(),
            },
            datastore_pattern: "^prod-".to_string(),
            iso_store: "ISOs".to_string(),
            cluster: "Cluster-A".to_string(),
            datacenter: "DC1".to_string(),
            credentials: Credentials {
                host: "vcenter.example.com".to_string(),
                username: "jdoe".to_string(),
                password: Some("secret".to_string()),
                insecure: true,
            },
            outdir: PathBuf::from("."),
            major: "8".to_string(),
            ..Default::default()
        }
    }

    /// Add a source VM with a SCSI controller, one disk and a NIC, stored on
    /// `prod-ds-01` and `tmpl-VMstore-01`.
    pub fn with_template_vm(self, name: &str) -> Self {
        let devices = vec![
            VirtualDevice::new(1000, "SCSI controller 0", "VMware paravirtual SCSI"),
            VirtualDevice::new(2000, "Hard disk 1", "15,728,640 KB"),
            VirtualDevice::new(4000, SOURCE_NETWORK_ADAPTER_LABEL, "VM Network"),
        ];
        let datastores = vec!["prod-ds-01".to_string(), "tmpl-VMstore-01".to_string()];
        self.with_vm(name, devices, datastores)
    }

    pub fn with_vm(self, name: &str, devices: Vec<VirtualDevice>, datastores: Vec<String>) -> Self {
        let moref = ManagedObjectRef::new("VirtualMachine", format!("vm-{}", self.allocate_id()));
        self.vms.lock().push(StubVm {
            handle: VmHandle {
                name: name.to_string(),
                moref,
                parent: Some(ManagedObjectRef::new("Folder", "group-v42")),
            },
            devices,
            datastores,
        });
        self
    }

    /// Hold every VM on `text` until it is answered.
    pub fn with_question(self, id: &str, text: &str) -> Self {
        *self.question.lock() = Some(VmQuestion {
            id: id.to_string(),
            text: text.to_string(),
        });
        self
    }

    /// Make every task of `operation` (e.g. `PowerOnVM_Task`) finish in error.
    pub fn failing(mut self, operation: &str) -> Self {
        self.failing_operation = Some(operation.to_string());
        self
    }

    pub fn calls(&self) -> Vec<ClientCall> {
        self.calls.lock().iter().map(|(call, _)| call.clone()).collect()
    }

    /// Every call together with the (tokio) instant it was made.
    pub fn timeline(&self) -> Vec<(ClientCall, Instant)> {
        self.calls.lock().clone()
    }

    pub fn mutations(&self) -> Vec<ClientCall> {
        self.calls
            .lock()
            .iter()
            .map(|(call, _)| call)
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    /// Devices of a VM the stub knows about.
    pub fn devices_of(&self, name: &str) -> Option<Vec<VirtualDevice>> {
        self.vms
            .lock()
            .iter()
            .find(|vm| vm.handle.name == name)
            .map(|vm| vm.devices.clone())
    }

    fn record(&self, call: ClientCall) {
        self.calls.lock().push((call, Instant::now()));
    }

    fn allocate_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn start_task(&self, operation: &str, result: Option<ManagedObjectRef>) -> TaskHandle {
        let moref = ManagedObjectRef::new("Task", format!("task-{}", self.allocate_id()));
        self.tasks.lock().insert(
            moref.value.clone(),
            StubTask {
                operation: operation.to_string(),
                result,
            },
        );
        TaskHandle {
            operation: operation.to_string(),
            moref,
        }
    }

    fn add_vm(
        &self,
        name: &str,
        folder: &ManagedObjectRef,
        devices: Vec<VirtualDevice>,
        datastores: Vec<String>,
    ) -> ManagedObjectRef {
        let moref = ManagedObjectRef::new("VirtualMachine", format!("vm-{}", self.allocate_id()));
        self.vms.lock().push(StubVm {
            handle: VmHandle {
                name: name.to_string(),
                moref: moref.clone(),
                parent: Some(folder.clone()),
            },
            devices,
            datastores,
        });
        moref
    }
}

/// What the platform would report for the hardware in a create spec.
fn synthesize_devices(spec: &VmCreateSpec) -> Vec<VirtualDevice> {
    spec.device_changes
        .iter()
        .filter_map(|change| match change {
            DeviceChange::Add(DeviceConfigSpec::ScsiController { bus_number, .. }) => Some(
                VirtualDevice::new(1000, format!("SCSI controller {}", bus_number), "VMware paravirtual SCSI"),
            ),
            DeviceChange::Add(DeviceConfigSpec::Disk {
                index, size_kib, ..
            }) => Some(VirtualDevice::new(
                2000 + index,
                format!("Hard disk {}", index + 1),
                format!("{} KB", size_kib),
            )),
            DeviceChange::Add(DeviceConfigSpec::Cdrom {
                iso_path,
                connectable,
                ..
            }) => {
                let mut drive = VirtualDevice::new(3000, CDROM_LABEL, format!("ISO {}", iso_path));
                drive.connectable = Some(*connectable);
                Some(drive)
            }
            DeviceChange::Add(DeviceConfigSpec::NetworkAdapter { summary, .. }) => Some(
                VirtualDevice::new(4000, SOURCE_NETWORK_ADAPTER_LABEL, summary.clone()),
            ),
            DeviceChange::Edit(_) => None,
        })
        .collect()
}

#[async_trait]
impl ManagementClient for StubManagementClient {
    async fn find_datacenter(&self, name: &str) -> MkvmResult<Option<Datacenter>> {
        self.record(ClientCall::FindDatacenter(name.to_string()));
        Ok((self.datacenter.name == name).then(|| self.datacenter.clone()))
    }

    async fn list_clusters(&self, _datacenter: &Datacenter) -> MkvmResult<Vec<Cluster>> {
        self.record(ClientCall::ListClusters);
        Ok(self.clusters.clone())
    }

    async fn list_datastores(&self, _datacenter: &Datacenter) -> MkvmResult<Vec<DatastoreCandidate>> {
        self.record(ClientCall::ListDatastores);
        Ok(self.datastores.clone())
    }

    async fn list_networks(&self, _datacenter: &Datacenter) -> MkvmResult<Vec<NetworkInfo>> {
        self.record(ClientCall::ListNetworks);
        Ok(self.networks.clone())
    }

    async fn find_vm(&self, _datacenter: &Datacenter, name: &str) -> MkvmResult<Option<VmHandle>> {
        self.record(ClientCall::FindVm(name.to_string()));
        Ok(self
            .vms
            .lock()
            .iter()
            .find(|vm| vm.handle.name == name)
            .map(|vm| vm.handle.clone()))
    }

    async fn vm_devices(&self, vm: &VmHandle) -> MkvmResult<Vec<VirtualDevice>> {
        self.record(ClientCall::VmDevices(vm.name.clone()));
        self.devices_of(&vm.name)
            .ok_or_else(|| MkvmError::not_found(format!("vm {}", vm.name)))
    }

    async fn vm_datastores(&self, vm: &VmHandle) -> MkvmResult<Vec<String>> {
        self.record(ClientCall::VmDatastores(vm.name.clone()));
        self.vms
            .lock()
            .iter()
            .find(|stub| stub.handle.name == vm.name)
            .map(|stub| stub.datastores.clone())
            .ok_or_else(|| MkvmError::not_found(format!("vm {}", vm.name)))
    }

    async fn create_vm(
        &self,
        folder: &ManagedObjectRef,
        spec: &VmCreateSpec,
        pool: &ManagedObjectRef,
    ) -> MkvmResult<TaskHandle> {
        self.record(ClientCall::CreateVm {
            folder: folder.clone(),
            spec: spec.clone(),
            pool: pool.clone(),
        });
        let datastore = spec
            .vm_path_name
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let moref = self.add_vm(&spec.name, folder, synthesize_devices(spec), vec![datastore]);
        Ok(self.start_task("CreateVM_Task", Some(moref)))
    }

    async fn clone_vm(
        &self,
        vm: &VmHandle,
        folder: &ManagedObjectRef,
        name: &str,
        spec: &CloneSpec,
    ) -> MkvmResult<TaskHandle> {
        self.record(ClientCall::CloneVm {
            source: vm.name.clone(),
            folder: folder.clone(),
            name: name.to_string(),
            spec: spec.clone(),
        });
        let (devices, datastores) = self
            .vms
            .lock()
            .iter()
            .find(|stub| stub.handle.name == vm.name)
            .map(|stub| (stub.devices.clone(), stub.datastores.clone()))
            .ok_or_else(|| MkvmError::not_found(format!("vm {}", vm.name)))?;
        let moref = self.add_vm(name, folder, devices, datastores);
        Ok(self.start_task("CloneVM_Task", Some(moref)))
    }

    async fn reconfigure_vm(
        &self,
        vm: &VmHandle,
        changes: &[DeviceChange],
    ) -> MkvmResult<TaskHandle> {
        self.record(ClientCall::ReconfigureVm {
            vm: vm.name.clone(),
            changes: changes.to_vec(),
        });
        if let Some(stub) = self.vms.lock().iter_mut().find(|s| s.handle.name == vm.name) {
            for change in changes {
                if let DeviceChange::Edit(edited) = change {
                    if let Some(device) = stub.devices.iter_mut().find(|d| d.key == edited.key) {
                        *device = edited.clone();
                    }
                }
            }
        }
        Ok(self.start_task("ReconfigVM_Task", None))
    }

    async fn power_on_vm(&self, vm: &VmHandle) -> MkvmResult<TaskHandle> {
        self.record(ClientCall::PowerOnVm(vm.name.clone()));
        Ok(self.start_task("PowerOnVM_Task", None))
    }

    async fn pending_question(&self, vm: &VmHandle) -> MkvmResult<Option<VmQuestion>> {
        self.record(ClientCall::PendingQuestion(vm.name.clone()));
        Ok(self.question.lock().clone())
    }

    async fn answer_question(
        &self,
        vm: &VmHandle,
        question_id: &str,
        choice: &str,
    ) -> MkvmResult<()> {
        self.record(ClientCall::AnswerQuestion {
            vm: vm.name.clone(),
            question_id: question_id.to_string(),
            choice: choice.to_string(),
        });
        *self.question.lock() = None;
        Ok(())
    }

    async fn upload_file(
        &self,
        _datacenter: &Datacenter,
        datastore: &str,
        remote_path: &str,
        local_path: &Path,
    ) -> MkvmResult<()> {
        self.record(ClientCall::UploadFile {
            datastore: datastore.to_string(),
            remote_path: remote_path.to_string(),
            local_path: local_path.to_path_buf(),
        });
        Ok(())
    }

    async fn wait_for_task(&self, task: &TaskHandle) -> MkvmResult<Option<ManagedObjectRef>> {
        self.record(ClientCall::WaitForTask(task.moref.value.clone()));
        let stub = self
            .tasks
            .lock()
            .get(&task.moref.value)
            .cloned()
            .ok_or_else(|| MkvmError::not_found(format!("task {}", task.moref)))?;

        if self.failing_operation.as_deref() == Some(stub.operation.as_str()) {
            return Err(MkvmError::remote(&stub.operation, "injected failure"));
        }
        Ok(stub.result)
    }
}

/// Affinity engine that only remembers which groups it was asked to create.
#[derive(Default)]
pub struct RecordingAffinityEngine {
    calls: Mutex<Vec<AffinityGroup>>,
    fail: bool,
}

impl RecordingAffinityEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn calls(&self) -> Vec<AffinityGroup> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl AffinityRuleEngine for RecordingAffinityEngine {
    async fn create(
        &self,
        _datacenter: &Datacenter,
        _cluster: &Cluster,
        group: &AffinityGroup,
    ) -> MkvmResult<()> {
        self.calls.lock().push(group.clone());
        if self.fail {
            return Err(MkvmError::remote(
                "ReconfigureComputeResource_Task",
                "injected failure",
            ));
        }
        Ok(())
    }
}

