use async_trait::async_trait;
use std::path::Path;

use crate::clone_spec::CloneSpec;
use crate::datastore::DatastoreCandidate;
use crate::devices::{DeviceChange, VirtualDevice, VmCreateSpec};
use crate::error::MkvmResult;
use crate::network::NetworkInfo;
use crate::types::{
    Cluster, Datacenter, ManagedObjectRef, TaskHandle, VmHandle, VmQuestion,
};

/// Session against a virtualization management server
///
/// A connected implementation is handed to the provisioner, which drives it
/// strictly in sequence. Operations that start work on the server return a
/// [`TaskHandle`]; nothing that depends on that work may run until
/// [`ManagementClient::wait_for_task`] has returned for it.
///
/// Lookups return `Ok(None)` for a name that does not exist and reserve `Err`
/// for failures talking to the server.
#[async_trait]
pub trait ManagementClient: Send + Sync {
    async fn find_datacenter(&self, name: &str) -> MkvmResult<Option<Datacenter>>;

    async fn list_clusters(&self, datacenter: &Datacenter) -> MkvmResult<Vec<Cluster>>;

    async fn list_datastores(&self, datacenter: &Datacenter)
        -> MkvmResult<Vec<DatastoreCandidate>>;

    /// Distributed portgroups visible in the datacenter.
    async fn list_networks(&self, datacenter: &Datacenter) -> MkvmResult<Vec<NetworkInfo>>;

    async fn find_vm(&self, datacenter: &Datacenter, name: &str) -> MkvmResult<Option<VmHandle>>;

    async fn vm_devices(&self, vm: &VmHandle) -> MkvmResult<Vec<VirtualDevice>>;

    /// Names of the datastores backing the VM.
    async fn vm_datastores(&self, vm: &VmHandle) -> MkvmResult<Vec<String>>;

    async fn create_vm(
        &self,
        folder: &ManagedObjectRef,
        spec: &VmCreateSpec,
        pool: &ManagedObjectRef,
    ) -> MkvmResult<TaskHandle>;

    async fn clone_vm(
        &self,
        vm: &VmHandle,
        folder: &ManagedObjectRef,
        name: &str,
        spec: &CloneSpec,
    ) -> MkvmResult<TaskHandle>;

    async fn reconfigure_vm(
        &self,
        vm: &VmHandle,
        changes: &[DeviceChange],
    ) -> MkvmResult<TaskHandle>;

    async fn power_on_vm(&self, vm: &VmHandle) -> MkvmResult<TaskHandle>;

    async fn pending_question(&self, vm: &VmHandle) -> MkvmResult<Option<VmQuestion>>;

    async fn answer_question(
        &self,
        vm: &VmHandle,
        question_id: &str,
        choice: &str,
    ) -> MkvmResult<()>;

    /// Copy a local file onto `datastore` at `remote_path`.
    async fn upload_file(
        &self,
        datacenter: &Datacenter,
        datastore: &str,
        remote_path: &str,
        local_path: &Path,
    ) -> MkvmResult<()>;

    /// Block until the task finishes, returning the object it produced, if any.
    async fn wait_for_task(&self, task: &TaskHandle) -> MkvmResult<Option<ManagedObjectRef>>;
}
