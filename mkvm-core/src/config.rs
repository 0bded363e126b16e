//! Operator configuration loaded from `~/.mkvm.yaml`
//!
//! Every field is optional; command line flags take precedence over anything
//! set here. A missing file simply yields the defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{MkvmError, MkvmResult};
use crate::network::NetworkMap;

pub const CONFIG_FILE_NAME: &str = ".mkvm.yaml";
pub const DEFAULT_POWER_ON_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MkvmConfig {
    pub username: Option<String>,
    pub host: Option<String>,
    pub dc: Option<String>,
    pub cluster: Option<String>,
    pub insecure: bool,
    pub ds_regex: Option<String>,
    pub iso_store: Option<String>,
    pub domain: Option<String>,
    pub gateway: Option<String>,
    pub netmask: Option<String>,
    pub dns: Option<String>,
    pub subnet: Option<String>,
    pub major: Option<String>,
    pub outdir: Option<PathBuf>,
    pub upload_iso: bool,
    pub make_vm: bool,
    pub power_on: bool,
    pub clone: bool,

    /// Pause between powering on a new VM and detaching its ISO from boot.
    #[serde(with = "humantime_serde")]
    pub power_on_grace: Duration,

    /// Interval between task status polls.
    #[serde(with = "humantime_serde")]
    pub task_poll_interval: Duration,

    pub network: NetworkMap,
}

impl Default for MkvmConfig {
    fn default() -> Self {
        Self {
            username: std::env::var("USER").ok(),
            host: None,
            dc: None,
            cluster: None,
            insecure: true,
            ds_regex: None,
            iso_store: None,
            domain: None,
            gateway: None,
            netmask: None,
            dns: None,
            subnet: None,
            major: None,
            outdir: None,
            upload_iso: true,
            make_vm: true,
            power_on: true,
            clone: false,
            power_on_grace: DEFAULT_POWER_ON_GRACE,
            task_poll_interval: Duration::from_secs(1),
            network: NetworkMap::default(),
        }
    }
}

impl MkvmConfig {
    /// `$HOME/.mkvm.yaml`, if a home directory is known.
    pub fn default_path() -> Option<PathBuf> {
        std::env::var_os("HOME").map(|home| PathBuf::from(home).join(CONFIG_FILE_NAME))
    }

    pub fn from_yaml(yaml: &str) -> MkvmResult<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            MkvmError::configuration(format!("Failed to parse configuration: {}", e))
        })
    }

    /// Load `path`, falling back to defaults when it does not exist.
    pub async fn load(path: &Path) -> MkvmResult<Self> {
        let yaml = match tokio::fs::read_to_string(path).await {
            Ok(yaml) => yaml,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No configuration at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(MkvmError::configuration(format!(
                    "Failed to read configuration file {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }

        let config = Self::from_yaml(&yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> MkvmResult<()> {
        if let Some(pattern) = &self.ds_regex {
            regex::Regex::new(pattern).map_err(|e| {
                MkvmError::configuration(format!("Invalid ds_regex '{}': {}", pattern, e))
            })?;
        }
        if self.task_poll_interval.is_zero() {
            return Err(MkvmError::configuration(
                "task_poll_interval must be greater than zero",
            ));
        }
        Ok(())
    }
}
