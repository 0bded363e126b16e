//! Subnet to portgroup mapping and distributed switch port lookup

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{MkvmError, MkvmResult};

const NETWORK_MAP_HELP: &str = "To properly configure the network interface you need a map
in ~/.mkvm.yaml for network. This structure maps subnet to dvportgroup name.
The mapping looks something like:

network:
  '192.168.20.0':
    name: 'Production'
  '192.168.30.0':
    name: 'DMZ'";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortgroupEntry {
    pub name: String,
}

/// Subnet identifier -> portgroup, as configured by the operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkMap(BTreeMap<String, PortgroupEntry>);

impl NetworkMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, subnet: impl Into<String>, portgroup: impl Into<String>) {
        self.0.insert(
            subnet.into(),
            PortgroupEntry {
                name: portgroup.into(),
            },
        );
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Portgroup name bound to `subnet`.
    pub fn portgroup_for(&self, subnet: &str) -> MkvmResult<&str> {
        if self.0.is_empty() {
            return Err(MkvmError::configuration(NETWORK_MAP_HELP));
        }
        self.0
            .get(subnet)
            .map(|entry| entry.name.as_str())
            .ok_or_else(|| {
                MkvmError::configuration(format!(
                    "Invalid subnet '{}'. Validate your subnet configuration.",
                    subnet
                ))
            })
    }
}

impl FromIterator<(String, String)> for NetworkMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (subnet, portgroup) in iter {
            map.insert(subnet, portgroup);
        }
        map
    }
}

/// A distributed portgroup as listed by the datacenter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkInfo {
    pub name: String,
    pub switch_uuid: String,
    pub portgroup_key: String,
}

/// Binding of a virtual NIC to a distributed switch portgroup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwitchPortConnection {
    pub switch_uuid: String,
    pub portgroup_key: String,
}

pub fn switch_port(networks: &[NetworkInfo], portgroup: &str) -> MkvmResult<SwitchPortConnection> {
    networks
        .iter()
        .find(|n| n.name == portgroup)
        .map(|n| SwitchPortConnection {
            switch_uuid: n.switch_uuid.clone(),
            portgroup_key: n.portgroup_key.clone(),
        })
        .ok_or_else(|| MkvmError::not_found(format!("network '{}'", portgroup)))
}
