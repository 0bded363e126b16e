//! vSphere session over the VI/JSON API
//!
//! Managed objects are addressed as `/sdk/vim25/<release>/<Type>/<id>/<member>`.
//! Properties are read with `GET` and methods are invoked with `POST`; every
//! request after login carries the session id header.

use async_trait::async_trait;
use mkvm_core::clone_spec::CloneSpec;
use mkvm_core::datastore::DatastoreCandidate;
use mkvm_core::devices::{DeviceChange, VirtualDevice, VmCreateSpec};
use mkvm_core::error::{MkvmError, MkvmResult};
use mkvm_core::management::ManagementClient;
use mkvm_core::network::NetworkInfo;
use mkvm_core::types::{
    Cluster, Credentials, Datacenter, ManagedObjectRef, TaskHandle, VmHandle, VmQuestion,
};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::wire::{self, TaskState};

/// API release the request paths are pinned to.
pub const API_RELEASE: &str = "8.0.1.0";
pub const SESSION_HEADER: &str = "vmware-api-session-id";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub username: String,
    pub password: String,
    /// Accept self-signed server certificates.
    pub insecure: bool,
    pub poll_interval: Duration,
}

impl ConnectOptions {
    pub fn from_credentials(credentials: &Credentials, poll_interval: Duration) -> MkvmResult<Self> {
        let password = credentials
            .password
            .clone()
            .ok_or_else(|| MkvmError::configuration("No password given; pass -p/--password"))?;
        Ok(Self {
            host: credentials.host.clone(),
            username: credentials.username.clone(),
            password,
            insecure: credentials.insecure,
            poll_interval,
        })
    }
}

fn transport(operation: impl Into<String>) -> impl FnOnce(reqwest::Error) -> MkvmError {
    let operation = operation.into();
    move |e| MkvmError::remote(operation, e)
}

pub struct VsphereClient {
    http: reqwest::Client,
    host: String,
    base: String,
    session: String,
    session_manager: ManagedObjectRef,
    search_index: ManagedObjectRef,
    poll_interval: Duration,
}

impl VsphereClient {
    /// Open an authenticated session against `options.host`.
    pub async fn connect(options: &ConnectOptions) -> MkvmResult<Self> {
        if options.insecure {
            debug!("Certificate verification disabled for {}", options.host);
        }
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(options.insecure)
            .build()
            .map_err(transport("connect"))?;
        let base = format!("https://{}/sdk/vim25/{}", options.host, API_RELEASE);

        let response = http
            .get(format!("{}/ServiceInstance/ServiceInstance/content", base))
            .send()
            .await
            .map_err(transport(format!("connect to {}", options.host)))?;
        let content = decode(response, "retrieve service content").await?;
        let session_manager = wire::parse_moref(&content["sessionManager"])?;
        let search_index = wire::parse_moref(&content["searchIndex"])?;

        let response = http
            .post(format!(
                "{}/SessionManager/{}/Login",
                base, session_manager.value
            ))
            .json(&json!({
                "userName": options.username,
                "password": options.password,
            }))
            .send()
            .await
            .map_err(transport("login"))?;
        if !response.status().is_success() {
            return Err(MkvmError::remote(
                "login",
                format!(
                    "{} refused the credentials for {} ({})",
                    options.host,
                    options.username,
                    response.status()
                ),
            ));
        }
        let session = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| MkvmError::remote("login", "no session id in the login response"))?;

        info!("Connected to {} as {}", options.host, options.username);

        Ok(Self {
            http,
            host: options.host.clone(),
            base,
            session,
            session_manager,
            search_index,
            poll_interval: if options.poll_interval.is_zero() {
                DEFAULT_POLL_INTERVAL
            } else {
                options.poll_interval
            },
        })
    }

    /// End the session. Failures are logged, not returned.
    pub async fn logout(&self) {
        if let Err(e) = self.invoke(&self.session_manager, "Logout", json!({})).await {
            warn!("Failed to log out of {}: {}", self.host, e);
        }
    }

    fn url(&self, object: &ManagedObjectRef, member: &str) -> String {
        format!("{}/{}/{}/{}", self.base, object.kind, object.value, member)
    }

    pub(crate) async fn property(&self, object: &ManagedObjectRef, name: &str) -> MkvmResult<Value> {
        let operation = format!("read {}.{}", object, name);
        let response = self
            .http
            .get(self.url(object, name))
            .header(SESSION_HEADER, &self.session)
            .send()
            .await
            .map_err(transport(operation.clone()))?;
        decode(response, &operation).await
    }

    pub(crate) async fn invoke(
        &self,
        object: &ManagedObjectRef,
        method: &str,
        body: Value,
    ) -> MkvmResult<Value> {
        let response = self
            .http
            .post(self.url(object, method))
            .header(SESSION_HEADER, &self.session)
            .json(&body)
            .send()
            .await
            .map_err(transport(method))?;
        decode(response, method).await
    }

    pub(crate) async fn start_task(
        &self,
        object: &ManagedObjectRef,
        method: &str,
        body: Value,
    ) -> MkvmResult<TaskHandle> {
        let task = self.invoke(object, method, body).await?;
        Ok(TaskHandle {
            operation: method.to_string(),
            moref: wire::parse_moref(&task)?,
        })
    }

    async fn name_of(&self, object: &ManagedObjectRef) -> MkvmResult<String> {
        let name = self.property(object, "name").await?;
        Ok(name.as_str().unwrap_or_default().to_string())
    }

    async fn find_by_inventory_path(&self, path: &str) -> MkvmResult<Option<ManagedObjectRef>> {
        let found = self
            .invoke(
                &self.search_index,
                "FindByInventoryPath",
                json!({ "inventoryPath": path }),
            )
            .await?;
        if found.is_null() {
            return Ok(None);
        }
        wire::parse_moref(&found).map(Some)
    }
}

async fn decode(response: reqwest::Response, operation: &str) -> MkvmResult<Value> {
    let status = response.status();
    let body = response.text().await.map_err(transport(operation))?;

    if !status.is_success() {
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|fault| fault["message"].as_str().map(str::to_string))
            .unwrap_or(body);
        return Err(MkvmError::remote(operation, format!("{}: {}", status, message)));
    }
    if status == StatusCode::NO_CONTENT || body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).map_err(|e| MkvmError::remote(operation, e))
}

#[async_trait]
impl ManagementClient for VsphereClient {
    async fn find_datacenter(&self, name: &str) -> MkvmResult<Option<Datacenter>> {
        let moref = match self.find_by_inventory_path(name).await? {
            Some(moref) if moref.kind == "Datacenter" => moref,
            _ => return Ok(None),
        };
        let vm_folder = wire::parse_moref(&self.property(&moref, "vmFolder").await?)?;
        Ok(Some(Datacenter {
            name: name.to_string(),
            moref,
            vm_folder,
        }))
    }

    async fn list_clusters(&self, datacenter: &Datacenter) -> MkvmResult<Vec<Cluster>> {
        let host_folder = wire::parse_moref(&self.property(&datacenter.moref, "hostFolder").await?)?;
        let children = wire::parse_morefs(&self.property(&host_folder, "childEntity").await?);

        let mut clusters = Vec::new();
        for moref in children
            .into_iter()
            .filter(|c| c.kind == "ClusterComputeResource")
        {
            let name = self.name_of(&moref).await?;
            let resource_pool = wire::parse_moref(&self.property(&moref, "resourcePool").await?)?;
            clusters.push(Cluster {
                name,
                moref,
                resource_pool,
            });
        }
        Ok(clusters)
    }

    async fn list_datastores(&self, datacenter: &Datacenter) -> MkvmResult<Vec<DatastoreCandidate>> {
        let stores = wire::parse_morefs(&self.property(&datacenter.moref, "datastore").await?);

        let mut candidates = Vec::with_capacity(stores.len());
        for store in stores {
            let summary = self.property(&store, "summary").await?;
            candidates.push(DatastoreCandidate {
                name: summary["name"].as_str().unwrap_or_default().to_string(),
                free_space: summary["freeSpace"].as_u64().unwrap_or_default(),
            });
        }
        Ok(candidates)
    }

    async fn list_networks(&self, datacenter: &Datacenter) -> MkvmResult<Vec<NetworkInfo>> {
        let networks = wire::parse_morefs(&self.property(&datacenter.moref, "network").await?);
        let mut switch_uuids: HashMap<String, String> = HashMap::new();

        let mut portgroups = Vec::new();
        for network in networks
            .into_iter()
            .filter(|n| n.kind == "DistributedVirtualPortgroup")
        {
            let config = self.property(&network, "config").await?;
            let switch = wire::parse_moref(&config["distributedVirtualSwitch"])?;
            let switch_uuid = match switch_uuids.get(&switch.value) {
                Some(uuid) => uuid.clone(),
                None => {
                    let uuid = self.property(&switch, "uuid").await?;
                    let uuid = uuid.as_str().unwrap_or_default().to_string();
                    switch_uuids.insert(switch.value.clone(), uuid.clone());
                    uuid
                }
            };
            portgroups.push(NetworkInfo {
                name: config["name"].as_str().unwrap_or_default().to_string(),
                switch_uuid,
                portgroup_key: config["key"].as_str().unwrap_or_default().to_string(),
            });
        }
        Ok(portgroups)
    }

    async fn find_vm(&self, datacenter: &Datacenter, name: &str) -> MkvmResult<Option<VmHandle>> {
        let path = format!("{}/vm/{}", datacenter.name, name);
        let moref = match self.find_by_inventory_path(&path).await? {
            Some(moref) if moref.kind == "VirtualMachine" => moref,
            _ => return Ok(None),
        };
        let parent = wire::parse_moref(&self.property(&moref, "parent").await?).ok();
        Ok(Some(VmHandle {
            name: name.to_string(),
            moref,
            parent,
        }))
    }

    async fn vm_devices(&self, vm: &VmHandle) -> MkvmResult<Vec<VirtualDevice>> {
        let config = self.property(&vm.moref, "config").await?;
        Ok(wire::parse_devices(&config["hardware"]["device"]))
    }

    async fn vm_datastores(&self, vm: &VmHandle) -> MkvmResult<Vec<String>> {
        let stores = wire::parse_morefs(&self.property(&vm.moref, "datastore").await?);
        let mut names = Vec::with_capacity(stores.len());
        for store in &stores {
            names.push(self.name_of(store).await?);
        }
        Ok(names)
    }

    async fn create_vm(
        &self,
        folder: &ManagedObjectRef,
        spec: &VmCreateSpec,
        pool: &ManagedObjectRef,
    ) -> MkvmResult<TaskHandle> {
        self.start_task(
            folder,
            "CreateVM_Task",
            json!({
                "config": wire::create_spec(spec),
                "pool": wire::moref(pool),
            }),
        )
        .await
    }

    async fn clone_vm(
        &self,
        vm: &VmHandle,
        folder: &ManagedObjectRef,
        name: &str,
        spec: &CloneSpec,
    ) -> MkvmResult<TaskHandle> {
        self.start_task(
            &vm.moref,
            "CloneVM_Task",
            json!({
                "folder": wire::moref(folder),
                "name": name,
                "spec": wire::clone_spec(spec),
            }),
        )
        .await
    }

    async fn reconfigure_vm(
        &self,
        vm: &VmHandle,
        changes: &[DeviceChange],
    ) -> MkvmResult<TaskHandle> {
        self.start_task(
            &vm.moref,
            "ReconfigVM_Task",
            json!({ "spec": wire::reconfigure_spec(changes) }),
        )
        .await
    }

    async fn power_on_vm(&self, vm: &VmHandle) -> MkvmResult<TaskHandle> {
        self.start_task(&vm.moref, "PowerOnVM_Task", json!({})).await
    }

    async fn pending_question(&self, vm: &VmHandle) -> MkvmResult<Option<VmQuestion>> {
        let runtime = self.property(&vm.moref, "runtime").await?;
        Ok(wire::parse_question(&runtime["question"]))
    }

    async fn answer_question(
        &self,
        vm: &VmHandle,
        question_id: &str,
        choice: &str,
    ) -> MkvmResult<()> {
        self.invoke(
            &vm.moref,
            "AnswerVM",
            json!({
                "questionId": question_id,
                "answerChoice": choice,
            }),
        )
        .await?;
        Ok(())
    }

    async fn upload_file(
        &self,
        datacenter: &Datacenter,
        datastore: &str,
        remote_path: &str,
        local_path: &Path,
    ) -> MkvmResult<()> {
        let operation = format!("upload {}", local_path.display());
        let body = tokio::fs::read(local_path).await.map_err(|e| {
            MkvmError::remote(operation.as_str(), format!("cannot read local file: {}", e))
        })?;
        debug!(
            "Uploading {} bytes to [{}] {}",
            body.len(),
            datastore,
            remote_path
        );

        let response = self
            .http
            .put(format!("https://{}/folder{}", self.host, remote_path))
            .query(&[("dcPath", datacenter.name.as_str()), ("dsName", datastore)])
            .header(SESSION_HEADER, &self.session)
            .header(
                reqwest::header::COOKIE,
                format!("vmware_soap_session=\"{}\"", self.session),
            )
            .body(body)
            .send()
            .await
            .map_err(transport(operation.clone()))?;
        decode(response, &operation).await?;
        Ok(())
    }

    async fn wait_for_task(&self, task: &TaskHandle) -> MkvmResult<Option<ManagedObjectRef>> {
        loop {
            let info = self.property(&task.moref, "info").await?;
            match wire::parse_task_info(&info) {
                TaskState::Running => tokio::time::sleep(self.poll_interval).await,
                TaskState::Success(result) => {
                    debug!("{} ({}) finished", task.operation, task.moref);
                    return Ok(result);
                }
                TaskState::Error(message) => {
                    return Err(MkvmError::remote(task.operation.as_str(), message))
                }
            }
        }
    }
}
