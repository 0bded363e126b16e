//! Template and custom sizing resolution

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

use crate::error::{MkvmError, MkvmResult};
use crate::size::{convert, SizeUnit};
use crate::types::{ProvisioningRequest, ResourceSpec, SecondaryDisk};

/// A named sizing preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmTemplate {
    pub name: &'static str,
    pub cpu: u32,
    pub memory: &'static str,
    pub disk: &'static str,
}

pub const TEMPLATES: [VmTemplate; 4] = [
    VmTemplate { name: "small", cpu: 1, memory: "1G", disk: "15G" },
    VmTemplate { name: "medium", cpu: 2, memory: "2G", disk: "15G" },
    VmTemplate { name: "large", cpu: 2, memory: "4G", disk: "15G" },
    VmTemplate { name: "xlarge", cpu: 2, memory: "8G", disk: "15G" },
];

/// Size of the secondary disk when `--sdb` is given without a value.
pub const DEFAULT_SECONDARY_DISK: &str = "10G";

pub fn find_template(name: &str) -> Option<&'static VmTemplate> {
    TEMPLATES.iter().find(|t| t.name == name)
}

/// Caller supplied `cpu,memory,disk` triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomSpec {
    pub cpu: u32,
    pub memory: String,
    pub disk: String,
}

impl FromStr for CustomSpec {
    type Err = MkvmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let [cpu, memory, disk] = parts.as_slice() else {
            return Err(MkvmError::configuration(format!(
                "--custom expects cpu,mem,sda but got '{}'",
                s
            )));
        };

        let cpu: u32 = cpu
            .parse()
            .ok()
            .filter(|cpu| *cpu > 0)
            .ok_or_else(|| MkvmError::configuration(format!("Invalid CPU count '{}'", cpu)))?;

        Ok(Self {
            cpu,
            memory: memory.to_string(),
            disk: disk.to_string(),
        })
    }
}

/// Parse a `size[,mountpath]` secondary disk request.
pub fn parse_secondary_disk(raw: &str) -> MkvmResult<SecondaryDisk> {
    let mut parts = raw.splitn(2, ',');
    let size = parts.next().unwrap_or_default();
    let mount_path = parts
        .next()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string);

    Ok(SecondaryDisk {
        size_kib: convert(size, SizeUnit::K)?,
        mount_path,
    })
}

/// Resolve the request's template or custom spec into concrete sizes.
pub fn resolve(request: &ProvisioningRequest) -> MkvmResult<ResourceSpec> {
    let (cpu, memory, disk) = match (&request.template, &request.custom) {
        (Some(_), Some(_)) => {
            return Err(MkvmError::configuration(
                "-t and --custom are mutually exclusive",
            ))
        }
        (None, None) => return Err(MkvmError::configuration("-t or --custom is required")),
        (Some(name), None) => {
            let template = find_template(name).ok_or_else(|| {
                MkvmError::configuration(format!(
                    "Unknown template '{}' (expected small, medium, large or xlarge)",
                    name
                ))
            })?;
            (template.cpu, template.memory, template.disk)
        }
        (None, Some(custom)) => (custom.cpu, custom.memory.as_str(), custom.disk.as_str()),
    };

    let spec = ResourceSpec {
        cpu,
        memory_mib: convert(memory, SizeUnit::M)?,
        primary_disk_kib: convert(disk, SizeUnit::K)?,
        secondary_disk: request
            .secondary_disk
            .as_deref()
            .map(parse_secondary_disk)
            .transpose()?,
    };

    debug!("CPU: {}", spec.cpu);
    debug!("Mem: {} MiB", spec.memory_mib);
    debug!("sda: {} KiB", spec.primary_disk_kib);
    if let Some(sdb) = &spec.secondary_disk {
        debug!("sdb: {} KiB", sdb.size_kib);
        if let Some(path) = &sdb.mount_path {
            debug!("sdb_path: {}", path);
        }
    }

    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn request(template: Option<&str>, custom: Option<&str>) -> ProvisioningRequest {
        ProvisioningRequest {
            template: template.map(str::to_string),
            custom: custom.map(|c| c.parse().unwrap()),
            ..Default::default()
        }
    }

    #[test]
    fn test_medium_template() {
        let spec = resolve(&request(Some("medium"), None)).unwrap();
        assert_eq!(spec.cpu, 2);
        assert_eq!(spec.memory_mib, 2048);
        assert_eq!(spec.primary_disk_kib, 15_728_640);
        assert_eq!(spec.secondary_disk, None);
    }

    #[test]
    fn test_custom_spec() {
        let spec = resolve(&request(None, Some("4,6G,40G"))).unwrap();
        assert_eq!(spec.cpu, 4);
        assert_eq!(spec.memory_mib, 6144);
        assert_eq!(spec.primary_disk_kib, 41_943_040);
    }

    #[test]
    fn test_template_and_custom_are_exclusive() {
        let err = resolve(&request(Some("small"), Some("1,1G,10G"))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let err = resolve(&request(None, None)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_unknown_template() {
        let err = resolve(&request(Some("huge"), None)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("huge"));
    }

    #[test]
    fn test_custom_spec_parsing_errors() {
        assert!("2,4G".parse::<CustomSpec>().is_err());
        assert!("0,4G,10G".parse::<CustomSpec>().is_err());
        assert!("two,4G,10G".parse::<CustomSpec>().is_err());
        assert!("2,4G,10G,extra".parse::<CustomSpec>().is_err());
    }

    #[test]
    fn test_secondary_disk() {
        let sdb = parse_secondary_disk("20G,/pub").unwrap();
        assert_eq!(sdb.size_kib, 20_971_520);
        assert_eq!(sdb.mount_path.as_deref(), Some("/pub"));

        let sdb = parse_secondary_disk(DEFAULT_SECONDARY_DISK).unwrap();
        assert_eq!(sdb.size_kib, 10_485_760);
        assert_eq!(sdb.mount_path, None);

        let mut req = request(Some("small"), None);
        req.secondary_disk = Some("5G".to_string());
        let spec = resolve(&req).unwrap();
        assert_eq!(spec.secondary_disk.map(|d| d.size_kib), Some(5_242_880));
    }

    #[test]
    fn test_bad_secondary_disk_unit() {
        let mut req = request(Some("small"), None);
        req.secondary_disk = Some("5Q,/data".to_string());
        assert_eq!(resolve(&req).unwrap_err().kind(), ErrorKind::Configuration);
    }
}
