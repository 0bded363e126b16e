//! Virtual hardware for VMs built from scratch
//!
//! New hardware is described by [`DeviceConfigSpec`], a closed set of the
//! devices this tool ever adds. Hardware that already exists on a VM comes back
//! from the server as a [`VirtualDevice`] and can only be edited.

use serde::{Deserialize, Serialize};

use crate::error::MkvmResult;
use crate::network::{switch_port, NetworkInfo, SwitchPortConnection};
use crate::types::ResourceSpec;

pub const SCSI_CONTROLLER_KEY: i32 = 100;
pub const CDROM_CONTROLLER_KEY: i32 = 200;
pub const CDROM_LABEL: &str = "CD/DVD drive 1";
/// Label given to the NIC of a freshly created VM.
pub const NETWORK_ADAPTER_LABEL: &str = "Network Adapter 1";
/// Label the platform reports for the first NIC of an existing VM.
pub const SOURCE_NETWORK_ADAPTER_LABEL: &str = "Network adapter 1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SharedBus {
    NoSharing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DiskMode {
    Persistent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AddressType {
    Generated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connectable {
    pub allow_guest_control: bool,
    pub connected: bool,
    pub start_connected: bool,
}

/// Controller and unit a disk is attached at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiskSlot {
    pub controller_key: i32,
    pub unit: i32,
}

impl DiskSlot {
    pub const PRIMARY: DiskSlot = DiskSlot {
        controller_key: SCSI_CONTROLLER_KEY,
        unit: 0,
    };

    pub const fn secondary(controller_key: i32) -> Self {
        Self {
            controller_key,
            unit: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "device")]
pub enum DeviceConfigSpec {
    ScsiController {
        key: i32,
        bus_number: i32,
        shared_bus: SharedBus,
    },
    Disk {
        index: i32,
        size_kib: u64,
        controller_key: i32,
        file_name: String,
        disk_mode: DiskMode,
        thin_provisioned: bool,
    },
    Cdrom {
        key: i32,
        iso_path: String,
        connectable: Connectable,
        controller_key: i32,
        unit_number: i32,
    },
    NetworkAdapter {
        key: i32,
        label: String,
        summary: String,
        port: SwitchPortConnection,
        address_type: AddressType,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DeviceBacking {
    IsoFile { file_name: String },
    DistributedPort(SwitchPortConnection),
    Other,
}

/// A device that already exists on a VM.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VirtualDevice {
    pub key: i32,
    pub label: String,
    pub summary: String,
    pub connectable: Option<Connectable>,
    pub backing: Option<DeviceBacking>,
    /// The device exactly as the server described it. Edits are applied on top
    /// of this so fields this crate does not model survive the round trip.
    pub remote: serde_json::Value,
}

impl VirtualDevice {
    pub fn new(key: i32, label: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            key,
            label: label.into(),
            summary: summary.into(),
            connectable: None,
            backing: None,
            remote: serde_json::Value::Null,
        }
    }

    pub fn is_scsi_controller(&self) -> bool {
        self.summary.contains("SCSI")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "operation", content = "spec", rename_all = "camelCase")]
pub enum DeviceChange {
    Add(DeviceConfigSpec),
    Edit(VirtualDevice),
}

/// Configuration for a VM created from scratch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VmCreateSpec {
    pub name: String,
    pub annotation: String,
    pub guest_id: String,
    /// Datastore the VM files land on, as `[datastore]`.
    pub vm_path_name: String,
    pub num_cpus: u32,
    pub memory_mb: u64,
    pub device_changes: Vec<DeviceChange>,
}

pub fn find_by_label<'a>(devices: &'a [VirtualDevice], label: &str) -> Option<&'a VirtualDevice> {
    devices.iter().find(|d| d.label == label)
}

pub fn datastore_path(datastore: &str) -> String {
    format!("[{}]", datastore)
}

pub fn iso_path(iso_store: &str, hostname: &str) -> String {
    format!("[{}] {}.iso", iso_store, hostname)
}

pub fn paravirtual_scsi_controller() -> DeviceConfigSpec {
    DeviceConfigSpec::ScsiController {
        key: SCSI_CONTROLLER_KEY,
        bus_number: 0,
        shared_bus: SharedBus::NoSharing,
    }
}

pub fn disk(datastore: &str, size_kib: u64, slot: DiskSlot) -> DeviceConfigSpec {
    DeviceConfigSpec::Disk {
        index: slot.unit,
        size_kib,
        controller_key: slot.controller_key,
        file_name: datastore_path(datastore),
        disk_mode: DiskMode::Persistent,
        thin_provisioned: false,
    }
}

pub fn cdrom(iso_store: &str, hostname: &str) -> DeviceConfigSpec {
    DeviceConfigSpec::Cdrom {
        key: -2,
        iso_path: iso_path(iso_store, hostname),
        connectable: Connectable {
            allow_guest_control: true,
            connected: true,
            start_connected: true,
        },
        controller_key: CDROM_CONTROLLER_KEY,
        unit_number: 0,
    }
}

pub fn network_adapter(portgroup: &str, port: SwitchPortConnection) -> DeviceConfigSpec {
    DeviceConfigSpec::NetworkAdapter {
        key: 0,
        label: NETWORK_ADAPTER_LABEL.to_string(),
        summary: portgroup.to_string(),
        port,
        address_type: AddressType::Generated,
    }
}

/// Device list for the create branch: controller, primary disk, optical
/// drive, NIC and, when requested, the secondary disk last.
pub fn create_device_changes(
    datastore: &str,
    resources: &ResourceSpec,
    iso_store: &str,
    hostname: &str,
    portgroup: &str,
    networks: &[NetworkInfo],
) -> MkvmResult<Vec<DeviceChange>> {
    let port = switch_port(networks, portgroup)?;

    let mut changes = vec![
        DeviceChange::Add(paravirtual_scsi_controller()),
        DeviceChange::Add(disk(datastore, resources.primary_disk_kib, DiskSlot::PRIMARY)),
        DeviceChange::Add(cdrom(iso_store, hostname)),
        DeviceChange::Add(network_adapter(portgroup, port)),
    ];

    if let Some(sdb) = &resources.secondary_disk {
        changes.push(DeviceChange::Add(disk(
            datastore,
            sdb.size_kib,
            DiskSlot::secondary(SCSI_CONTROLLER_KEY),
        )));
    }

    Ok(changes)
}

/// Edit entry pointing the optical drive at the uploaded ISO.
pub fn attach_iso(cdrom: &VirtualDevice, iso_store: &str, hostname: &str) -> DeviceChange {
    let path = iso_path(iso_store, hostname);
    let mut device = cdrom.clone();
    device.summary = format!("ISO {}", path);
    device.backing = Some(DeviceBacking::IsoFile { file_name: path });
    DeviceChange::Edit(device)
}

/// Edit entry that keeps the optical drive from connecting on the next boot.
pub fn detach_from_boot(cdrom: &VirtualDevice) -> DeviceChange {
    let mut device = cdrom.clone();
    let mut connectable = device.connectable.unwrap_or(Connectable {
        allow_guest_control: true,
        connected: true,
        start_connected: true,
    });
    connectable.start_connected = false;
    device.connectable = Some(connectable);
    DeviceChange::Edit(device)
}
