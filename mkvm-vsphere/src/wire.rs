//! VI/JSON encoding of the provisioning specs
//!
//! The vSphere JSON API expects every data object to carry a `_typeName`
//! discriminator. Core specs are translated here so that the rest of the
//! crate never builds request bodies by hand.

use mkvm_core::anti_affinity::AffinityGroup;
use mkvm_core::clone_spec::{CloneSpec, CustomizationSpec};
use mkvm_core::devices::{
    Connectable, DeviceBacking, DeviceChange, DeviceConfigSpec, VirtualDevice, VmCreateSpec,
};
use mkvm_core::error::{MkvmError, MkvmResult};
use mkvm_core::network::SwitchPortConnection;
use mkvm_core::types::{ManagedObjectRef, VmQuestion};
use serde_json::{json, Value};

pub fn moref(reference: &ManagedObjectRef) -> Value {
    json!({
        "_typeName": "ManagedObjectReference",
        "type": reference.kind,
        "value": reference.value,
    })
}

pub fn parse_moref(value: &Value) -> MkvmResult<ManagedObjectRef> {
    match (value["type"].as_str(), value["value"].as_str()) {
        (Some(kind), Some(id)) => Ok(ManagedObjectRef::new(kind, id)),
        _ => Err(MkvmError::remote(
            "decode response",
            format!("expected a managed object reference, got {}", value),
        )),
    }
}

/// Parse an array of references, ignoring entries that are not references.
pub fn parse_morefs(value: &Value) -> Vec<ManagedObjectRef> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(|v| parse_moref(v).ok()).collect())
        .unwrap_or_default()
}

fn connect_info(connectable: &Connectable) -> Value {
    json!({
        "_typeName": "VirtualDeviceConnectInfo",
        "allowGuestControl": connectable.allow_guest_control,
        "connected": connectable.connected,
        "startConnected": connectable.start_connected,
    })
}

fn port_connection(port: &SwitchPortConnection) -> Value {
    json!({
        "_typeName": "DistributedVirtualSwitchPortConnection",
        "switchUuid": port.switch_uuid,
        "portgroupKey": port.portgroup_key,
    })
}

fn port_backing(port: &SwitchPortConnection) -> Value {
    json!({
        "_typeName": "VirtualEthernetCardDistributedVirtualPortBackingInfo",
        "port": port_connection(port),
    })
}

fn iso_backing(file_name: &str) -> Value {
    json!({
        "_typeName": "VirtualCdromIsoBackingInfo",
        "fileName": file_name,
    })
}

fn new_device(spec: &DeviceConfigSpec) -> Value {
    match spec {
        DeviceConfigSpec::ScsiController {
            key,
            bus_number,
            shared_bus: _,
        } => json!({
            "_typeName": "ParaVirtualSCSIController",
            "key": key,
            "busNumber": bus_number,
            "sharedBus": "noSharing",
        }),
        DeviceConfigSpec::Disk {
            index,
            size_kib,
            controller_key,
            file_name,
            disk_mode: _,
            thin_provisioned,
        } => json!({
            "_typeName": "VirtualDisk",
            "key": index,
            "backing": {
                "_typeName": "VirtualDiskFlatVer2BackingInfo",
                "fileName": file_name,
                "diskMode": "persistent",
                "thinProvisioned": thin_provisioned,
            },
            "controllerKey": controller_key,
            "unitNumber": index,
            "capacityInKB": size_kib,
        }),
        DeviceConfigSpec::Cdrom {
            key,
            iso_path,
            connectable,
            controller_key,
            unit_number,
        } => json!({
            "_typeName": "VirtualCdrom",
            "key": key,
            "backing": iso_backing(iso_path),
            "connectable": connect_info(connectable),
            "controllerKey": controller_key,
            "unitNumber": unit_number,
        }),
        DeviceConfigSpec::NetworkAdapter {
            key,
            label,
            summary,
            port,
            address_type: _,
        } => json!({
            "_typeName": "VirtualVmxnet3",
            "key": key,
            "deviceInfo": {
                "_typeName": "Description",
                "label": label,
                "summary": summary,
            },
            "backing": port_backing(port),
            "addressType": "generated",
        }),
    }
}

/// The server's description of `device` with our edits applied on top.
fn edited_device(device: &VirtualDevice) -> Value {
    let mut value = match &device.remote {
        Value::Object(_) => device.remote.clone(),
        _ => json!({ "_typeName": "VirtualDevice", "key": device.key }),
    };

    value["deviceInfo"] = json!({
        "_typeName": "Description",
        "label": device.label,
        "summary": device.summary,
    });
    if let Some(connectable) = &device.connectable {
        value["connectable"] = connect_info(connectable);
    }
    match &device.backing {
        Some(DeviceBacking::IsoFile { file_name }) => value["backing"] = iso_backing(file_name),
        Some(DeviceBacking::DistributedPort(port)) => value["backing"] = port_backing(port),
        Some(DeviceBacking::Other) | None => {}
    }
    value
}

pub fn device_change(change: &DeviceChange) -> Value {
    match change {
        DeviceChange::Add(spec @ DeviceConfigSpec::Disk { .. }) => json!({
            "_typeName": "VirtualDeviceConfigSpec",
            "operation": "add",
            "fileOperation": "create",
            "device": new_device(spec),
        }),
        DeviceChange::Add(spec) => json!({
            "_typeName": "VirtualDeviceConfigSpec",
            "operation": "add",
            "device": new_device(spec),
        }),
        DeviceChange::Edit(device) => json!({
            "_typeName": "VirtualDeviceConfigSpec",
            "operation": "edit",
            "device": edited_device(device),
        }),
    }
}

fn device_changes(changes: &[DeviceChange]) -> Value {
    Value::Array(changes.iter().map(device_change).collect())
}

pub fn create_spec(spec: &VmCreateSpec) -> Value {
    json!({
        "_typeName": "VirtualMachineConfigSpec",
        "name": spec.name,
        "annotation": spec.annotation,
        "guestId": spec.guest_id,
        "files": {
            "_typeName": "VirtualMachineFileInfo",
            "vmPathName": spec.vm_path_name,
        },
        "numCPUs": spec.num_cpus,
        "memoryMB": spec.memory_mb,
        "deviceChange": device_changes(&spec.device_changes),
    })
}

pub fn reconfigure_spec(changes: &[DeviceChange]) -> Value {
    json!({
        "_typeName": "VirtualMachineConfigSpec",
        "deviceChange": device_changes(changes),
    })
}

fn customization(spec: &CustomizationSpec) -> Value {
    let nic_setting_map: Vec<Value> = spec
        .nic_setting_map
        .iter()
        .map(|mapping| {
            json!({
                "_typeName": "CustomizationAdapterMapping",
                "adapter": {
                    "_typeName": "CustomizationIPSettings",
                    "ip": {
                        "_typeName": "CustomizationFixedIp",
                        "ipAddress": mapping.adapter.ip,
                    },
                    "gateway": mapping.adapter.gateway,
                    "subnetMask": mapping.adapter.subnet_mask,
                    "dnsDomain": mapping.adapter.dns_domain,
                },
            })
        })
        .collect();

    json!({
        "_typeName": "CustomizationSpec",
        "identity": {
            "_typeName": "CustomizationLinuxPrep",
            "domain": spec.identity.domain,
            "hostName": {
                "_typeName": "CustomizationFixedName",
                "name": spec.identity.host_name,
            },
        },
        "globalIPSettings": {
            "_typeName": "CustomizationGlobalIPSettings",
            "dnsServerList": spec.global_ip_settings.dns_server_list,
            "dnsSuffixList": spec.global_ip_settings.dns_suffix_list,
        },
        "nicSettingMap": nic_setting_map,
    })
}

pub fn clone_spec(spec: &CloneSpec) -> Value {
    let mut value = json!({
        "_typeName": "VirtualMachineCloneSpec",
        "location": {
            "_typeName": "VirtualMachineRelocateSpec",
            "pool": moref(&spec.pool),
        },
        "template": spec.template,
        "powerOn": spec.power_on,
        "config": {
            "_typeName": "VirtualMachineConfigSpec",
            "numCPUs": spec.num_cpus,
            "memoryMB": spec.memory_mb,
            "deviceChange": device_changes(&spec.device_changes),
        },
    });
    if let Some(custom) = &spec.customization {
        value["customization"] = customization(custom);
    }
    value
}

/// Cluster reconfiguration adding or replacing one anti-affinity rule.
pub fn anti_affinity_rule(
    group: &AffinityGroup,
    members: &[ManagedObjectRef],
    existing_key: Option<i64>,
) -> Value {
    let mut info = json!({
        "_typeName": "ClusterAntiAffinityRuleSpec",
        "name": group.rule_name(),
        "enabled": true,
        "mandatory": false,
        "vm": members.iter().map(moref).collect::<Vec<_>>(),
    });
    let operation = match existing_key {
        Some(key) => {
            info["key"] = json!(key);
            "edit"
        }
        None => "add",
    };

    json!({
        "_typeName": "ClusterConfigSpecEx",
        "rulesSpec": [{
            "_typeName": "ClusterRuleSpec",
            "operation": operation,
            "info": info,
        }],
    })
}

/// Key of the cluster rule called `name` in a `configurationEx` document.
pub fn find_rule_key(configuration: &Value, name: &str) -> Option<i64> {
    configuration["rule"]
        .as_array()?
        .iter()
        .find(|rule| rule["name"].as_str() == Some(name))
        .and_then(|rule| rule["key"].as_i64())
}

fn parse_connectable(value: &Value) -> Option<Connectable> {
    if !value.is_object() {
        return None;
    }
    Some(Connectable {
        allow_guest_control: value["allowGuestControl"].as_bool().unwrap_or(false),
        connected: value["connected"].as_bool().unwrap_or(false),
        start_connected: value["startConnected"].as_bool().unwrap_or(false),
    })
}

fn parse_backing(value: &Value) -> Option<DeviceBacking> {
    if !value.is_object() {
        return None;
    }
    let backing = match value["_typeName"].as_str() {
        Some("VirtualCdromIsoBackingInfo") => DeviceBacking::IsoFile {
            file_name: value["fileName"].as_str().unwrap_or_default().to_string(),
        },
        Some("VirtualEthernetCardDistributedVirtualPortBackingInfo") => {
            DeviceBacking::DistributedPort(SwitchPortConnection {
                switch_uuid: value["port"]["switchUuid"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
                portgroup_key: value["port"]["portgroupKey"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
            })
        }
        _ => DeviceBacking::Other,
    };
    Some(backing)
}

pub fn parse_device(value: &Value) -> VirtualDevice {
    VirtualDevice {
        key: value["key"].as_i64().unwrap_or_default() as i32,
        label: value["deviceInfo"]["label"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
        summary: value["deviceInfo"]["summary"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
        connectable: parse_connectable(&value["connectable"]),
        backing: parse_backing(&value["backing"]),
        remote: value.clone(),
    }
}

pub fn parse_devices(value: &Value) -> Vec<VirtualDevice> {
    value
        .as_array()
        .map(|items| items.iter().map(parse_device).collect())
        .unwrap_or_default()
}

/// Progress of a server task as reported by `Task.info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Success(Option<ManagedObjectRef>),
    Error(String),
}

pub fn parse_task_info(info: &Value) -> TaskState {
    match info["state"].as_str() {
        Some("success") => TaskState::Success(parse_moref(&info["result"]).ok()),
        Some("error") => TaskState::Error(
            info["error"]["localizedMessage"]
                .as_str()
                .unwrap_or("task failed without a message")
                .to_string(),
        ),
        _ => TaskState::Running,
    }
}

pub fn parse_question(value: &Value) -> Option<VmQuestion> {
    let id = value["id"].as_str()?;
    Some(VmQuestion {
        id: id.to_string(),
        text: value["text"].as_str().unwrap_or_default().to_string(),
    })
}
