use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::resources::CustomSpec;

/// Reference to an object living on the management server, e.g. `VirtualMachine:vm-42`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManagedObjectRef {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl ManagedObjectRef {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }
}

impl std::fmt::Display for ManagedObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datacenter {
    pub name: String,
    pub moref: ManagedObjectRef,
    pub vm_folder: ManagedObjectRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    pub name: String,
    pub moref: ManagedObjectRef,
    pub resource_pool: ManagedObjectRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmHandle {
    pub name: String,
    pub moref: ManagedObjectRef,
    /// Folder the VM lives in; clones land next to their source.
    pub parent: Option<ManagedObjectRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    pub operation: String,
    pub moref: ManagedObjectRef,
}

/// An interactive question the platform is holding the VM on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmQuestion {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticIpSettings {
    pub ip: String,
    pub gateway: String,
    pub netmask: String,
    /// Comma separated list of DNS servers.
    pub dns: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningFlags {
    pub upload_iso: bool,
    pub make_vm: bool,
    pub power_on: bool,
}

impl Default for ProvisioningFlags {
    fn default() -> Self {
        Self {
            upload_iso: true,
            make_vm: true,
            power_on: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub host: String,
    pub username: String,
    pub password: Option<String>,
    pub insecure: bool,
}

/// Everything a single provisioning run needs, already merged from flags and config.
#[derive(Debug, Clone, Default)]
pub struct ProvisioningRequest {
    /// Fully qualified hostname; also the VM name.
    pub hostname: String,
    pub domain: String,
    pub subnet: String,
    pub ip: StaticIpSettings,
    pub template: Option<String>,
    pub custom: Option<CustomSpec>,
    /// Raw `size[,mountpath]` secondary disk request.
    pub secondary_disk: Option<String>,
    pub clone: bool,
    pub source_vm: Option<String>,
    pub flags: ProvisioningFlags,
    pub datastore_pattern: String,
    pub iso_store: String,
    pub cluster: String,
    pub datacenter: String,
    pub credentials: Credentials,
    /// Directory holding `<hostname>.iso`.
    pub outdir: PathBuf,
    /// Major OS release, only used to pick the guest identifier.
    pub major: String,
}

impl ProvisioningRequest {
    pub fn short_hostname(&self) -> &str {
        short_hostname(&self.hostname)
    }

    pub fn guest_id(&self) -> String {
        format!("rhel{}_64Guest", self.major)
    }

    pub fn iso_file_name(&self) -> String {
        format!("{}.iso", self.hostname)
    }

    pub fn local_iso_path(&self) -> PathBuf {
        self.outdir.join(self.iso_file_name())
    }

    /// A password is only needed when the run will talk to the server.
    pub fn needs_password(&self) -> bool {
        (self.flags.upload_iso && self.flags.make_vm) || self.clone
    }
}

/// Host part of a fully qualified name: `web3.example.com` -> `web3`.
pub fn short_hostname(hostname: &str) -> &str {
    hostname.split('.').next().unwrap_or(hostname)
}

/// Sizes resolved from a template or custom spec. Memory in MiB, disks in KiB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceSpec {
    pub cpu: u32,
    pub memory_mib: u64,
    pub primary_disk_kib: u64,
    pub secondary_disk: Option<SecondaryDisk>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecondaryDisk {
    pub size_kib: u64,
    /// Where the guest should mount it; informational only.
    pub mount_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_hostname() {
        assert_eq!(short_hostname("web3.example.com"), "web3");
        assert_eq!(short_hostname("standalone"), "standalone");
        assert_eq!(short_hostname(""), "");
    }

    #[test]
    fn test_needs_password() {
        let mut request = ProvisioningRequest::default();
        assert!(request.needs_password());

        request.flags.upload_iso = false;
        assert!(!request.needs_password());

        request.clone = true;
        assert!(request.needs_password());
    }

    #[test]
    fn test_guest_id_and_iso_paths() {
        let request = ProvisioningRequest {
            hostname: "app1.example.com".to_string(),
            major: "8".to_string(),
            outdir: PathBuf::from("/tmp/isos"),
            ..Default::default()
        };
        assert_eq!(request.guest_id(), "rhel8_64Guest");
        assert_eq!(
            request.local_iso_path(),
            PathBuf::from("/tmp/isos/app1.example.com.iso")
        );
    }
}
