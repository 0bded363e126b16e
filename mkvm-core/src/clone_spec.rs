//! Clone and guest customization specifications

use serde::Serialize;
use tracing::debug;

use crate::devices::{
    disk, find_by_label, DeviceBacking, DeviceChange, DiskSlot, VirtualDevice,
    SCSI_CONTROLLER_KEY, SOURCE_NETWORK_ADAPTER_LABEL,
};
use crate::error::{MkvmError, MkvmResult};
use crate::network::{switch_port, NetworkInfo};
use crate::types::{short_hostname, ManagedObjectRef, StaticIpSettings};

/// Overrides applied while duplicating a source VM.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloneSpec {
    pub pool: ManagedObjectRef,
    pub template: bool,
    pub power_on: bool,
    pub num_cpus: u32,
    pub memory_mb: u64,
    pub device_changes: Vec<DeviceChange>,
    pub customization: Option<CustomizationSpec>,
}

/// Where and how big the clone should be.
#[derive(Debug, Clone)]
pub struct CloneTarget<'a> {
    pub pool: &'a ManagedObjectRef,
    pub cpu: u32,
    pub memory_mib: u64,
    pub datastore: &'a str,
    pub portgroup: &'a str,
    pub secondary_disk_kib: Option<u64>,
}

/// Key of the source VM's SCSI controller, falling back to the default key.
/// When several devices look like SCSI controllers the last one wins.
pub fn scsi_controller_key(source_devices: &[VirtualDevice]) -> i32 {
    source_devices
        .iter()
        .rev()
        .find(|d| d.is_scsi_controller())
        .map(|d| d.key)
        .unwrap_or(SCSI_CONTROLLER_KEY)
}

pub fn build_clone_spec(
    source_devices: &[VirtualDevice],
    networks: &[NetworkInfo],
    target: &CloneTarget<'_>,
) -> MkvmResult<CloneSpec> {
    let mut card = find_by_label(source_devices, SOURCE_NETWORK_ADAPTER_LABEL)
        .cloned()
        .ok_or_else(|| {
            MkvmError::not_found(format!(
                "'{}' on the source VM",
                SOURCE_NETWORK_ADAPTER_LABEL
            ))
        })?;
    card.backing = Some(DeviceBacking::DistributedPort(switch_port(
        networks,
        target.portgroup,
    )?));

    let mut device_changes = vec![DeviceChange::Edit(card)];

    if let Some(size_kib) = target.secondary_disk_kib {
        let controller_key = scsi_controller_key(source_devices);
        debug!("Secondary disk goes on controller {}", controller_key);
        device_changes.push(DeviceChange::Add(disk(
            target.datastore,
            size_kib,
            DiskSlot::secondary(controller_key),
        )));
    }

    Ok(CloneSpec {
        pool: target.pool.clone(),
        template: false,
        power_on: false,
        num_cpus: target.cpu,
        memory_mb: target.memory_mib,
        device_changes,
        customization: None,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpSettings {
    pub ip: String,
    pub gateway: Vec<String>,
    pub subnet_mask: String,
    pub dns_domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GlobalIpSettings {
    pub dns_server_list: Vec<String>,
    pub dns_suffix_list: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinuxPrep {
    pub domain: String,
    /// Fixed short host name.
    pub host_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterMapping {
    pub adapter: IpSettings,
}

/// Guest identity and network settings applied while cloning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomizationSpec {
    pub identity: LinuxPrep,
    pub global_ip_settings: GlobalIpSettings,
    pub nic_setting_map: Vec<AdapterMapping>,
}

impl CustomizationSpec {
    pub fn short_hostname(&self) -> &str {
        &self.identity.host_name
    }
}

pub fn build_customization(
    hostname: &str,
    domain: &str,
    settings: &StaticIpSettings,
) -> CustomizationSpec {
    let adapter = IpSettings {
        ip: settings.ip.clone(),
        gateway: vec![settings.gateway.clone()],
        subnet_mask: settings.netmask.clone(),
        dns_domain: domain.to_string(),
    };

    CustomizationSpec {
        identity: LinuxPrep {
            domain: domain.to_string(),
            host_name: short_hostname(hostname).to_string(),
        },
        global_ip_settings: GlobalIpSettings {
            dns_server_list: settings
                .dns
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            dns_suffix_list: vec![domain.to_string()],
        },
        nic_setting_map: vec![AdapterMapping { adapter }],
    }
}
