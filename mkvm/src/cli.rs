//! Command line interface
//!
//! Flags win over `~/.mkvm.yaml`, which wins over the built-in defaults.

use clap::Parser;
use mkvm_core::config::MkvmConfig;
use mkvm_core::error::{MkvmError, MkvmResult};
use mkvm_core::resources::{CustomSpec, DEFAULT_SECONDARY_DISK};
use mkvm_core::types::{Credentials, ProvisioningFlags, ProvisioningRequest, StaticIpSettings};
use std::path::PathBuf;

/// OS major release assumed when neither flag nor config names one.
pub const DEFAULT_MAJOR: &str = "8";

#[derive(Parser, Debug, Clone)]
#[command(name = "mkvm")]
#[command(about = "Build a vSphere VM from a sizing template or by cloning an existing VM", long_about = None)]
pub struct Cli {
    /// Fully qualified hostname of the new VM
    pub hostname: String,

    /// vSphere user name
    #[arg(short = 'u', long = "user")]
    pub username: Option<String>,

    /// vSphere password (prompted for when needed)
    #[arg(short, long)]
    pub password: Option<String>,

    /// vSphere host
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// vSphere data center
    #[arg(short = 'D', long)]
    pub dc: Option<String>,

    /// vSphere cluster
    #[arg(short = 'C', long)]
    pub cluster: Option<String>,

    /// Do not validate the vSphere SSL certificate
    #[arg(long, overrides_with = "no_insecure")]
    pub insecure: bool,
    #[arg(long, hide = true)]
    pub no_insecure: bool,

    /// Regex selecting the datastores to build on
    #[arg(long, value_name = "REGEX")]
    pub datastore: Option<String>,

    /// Datastore holding the installer ISOs
    #[arg(long)]
    pub isostore: Option<String>,

    /// VM template: small, medium, large, xlarge
    #[arg(short, long)]
    pub template: Option<String>,

    /// CPU, memory and /dev/sda size
    #[arg(long, value_name = "CPU,MEM,SDA")]
    pub custom: Option<CustomSpec>,

    /// Add /dev/sdb. Size and mount point are optional
    #[arg(long, value_name = "SIZE[,MOUNT]", num_args = 0..=1, default_missing_value = DEFAULT_SECONDARY_DISK)]
    pub sdb: Option<String>,

    /// Source VM from which to clone the new VM
    #[arg(long = "sourcevm")]
    pub source_vm: Option<String>,

    /// Upload the ISO to the ISO datastore
    #[arg(long, overrides_with = "no_upload")]
    pub upload: bool,
    #[arg(long, hide = true)]
    pub no_upload: bool,

    /// Build the VM
    #[arg(long, overrides_with = "no_vm")]
    pub vm: bool,
    #[arg(long, hide = true)]
    pub no_vm: bool,

    /// Power on the VM after building it
    #[arg(long, overrides_with = "no_power")]
    pub power: bool,
    #[arg(long, hide = true)]
    pub no_power: bool,

    /// Clone from the source VM instead of building from an ISO
    #[arg(long, overrides_with = "no_clone")]
    pub clone: bool,
    #[arg(long, hide = true)]
    pub no_clone: bool,

    /// DNS domain (defaults to the domain part of the hostname)
    #[arg(long)]
    pub domain: Option<String>,

    #[arg(long)]
    pub ip: Option<String>,

    #[arg(long)]
    pub gateway: Option<String>,

    #[arg(long)]
    pub netmask: Option<String>,

    /// Comma separated DNS servers
    #[arg(long)]
    pub dns: Option<String>,

    /// Subnet key into the network map
    #[arg(long)]
    pub subnet: Option<String>,

    /// OS major release, used for the guest identifier
    #[arg(long)]
    pub major: Option<String>,

    /// Directory holding <hostname>.iso
    #[arg(long)]
    pub outdir: Option<PathBuf>,

    /// Configuration file (default: ~/.mkvm.yaml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Verbose logging, including the assembled VM specs
    #[arg(long)]
    pub debug: bool,
}

fn toggle(on: bool, off: bool, default: bool) -> bool {
    match (on, off) {
        (true, _) => true,
        (_, true) => false,
        _ => default,
    }
}

fn missing(what: &str, flag: &str, key: &str) -> MkvmError {
    MkvmError::configuration(format!(
        "{} is required: pass {} or set '{}' in the configuration file",
        what, flag, key
    ))
}

fn required(value: Option<String>, what: &str, flag: &str, key: &str) -> MkvmResult<String> {
    value.ok_or_else(|| missing(what, flag, key))
}

impl Cli {
    /// Configuration file to read, if any.
    pub fn config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(MkvmConfig::default_path)
    }

    /// Merge flags over `config` into a single request.
    pub fn to_request(&self, config: &MkvmConfig) -> MkvmResult<ProvisioningRequest> {
        let pick = |flag: &Option<String>, configured: &Option<String>| {
            flag.clone().or_else(|| configured.clone())
        };

        let clone = toggle(self.clone, self.no_clone, config.clone);

        let domain = match pick(&self.domain, &config.domain) {
            Some(domain) => domain,
            None => self
                .hostname
                .split_once('.')
                .map(|(_, domain)| domain.to_string())
                .ok_or_else(|| {
                    MkvmError::configuration(format!(
                        "Cannot derive a domain from '{}'; pass --domain",
                        self.hostname
                    ))
                })?,
        };

        let iso_store = match pick(&self.isostore, &config.iso_store) {
            Some(store) => store,
            None if clone => String::new(),
            None => return Err(missing("An ISO datastore", "--isostore", "iso_store")),
        };

        Ok(ProvisioningRequest {
            hostname: self.hostname.clone(),
            domain,
            subnet: required(pick(&self.subnet, &config.subnet), "A subnet", "--subnet", "subnet")?,
            ip: StaticIpSettings {
                ip: self.ip.clone().unwrap_or_default(),
                gateway: pick(&self.gateway, &config.gateway).unwrap_or_default(),
                netmask: pick(&self.netmask, &config.netmask).unwrap_or_default(),
                dns: pick(&self.dns, &config.dns).unwrap_or_default(),
            },
            template: self.template.clone(),
            custom: self.custom.clone(),
            secondary_disk: self.sdb.clone(),
            clone,
            source_vm: self.source_vm.clone(),
            flags: ProvisioningFlags {
                upload_iso: toggle(self.upload, self.no_upload, config.upload_iso),
                make_vm: toggle(self.vm, self.no_vm, config.make_vm),
                power_on: toggle(self.power, self.no_power, config.power_on),
            },
            datastore_pattern: required(
                pick(&self.datastore, &config.ds_regex),
                "A datastore pattern",
                "--datastore",
                "ds_regex",
            )?,
            iso_store,
            cluster: required(pick(&self.cluster, &config.cluster), "A cluster", "-C/--cluster", "cluster")?,
            datacenter: required(pick(&self.dc, &config.dc), "A data center", "-D/--dc", "dc")?,
            credentials: Credentials {
                host: required(pick(&self.host, &config.host), "A vSphere host", "-H/--host", "host")?,
                username: required(
                    pick(&self.username, &config.username),
                    "A user name",
                    "-u/--user",
                    "username",
                )?,
                password: self.password.clone(),
                insecure: toggle(self.insecure, self.no_insecure, config.insecure),
            },
            outdir: self
                .outdir
                .clone()
                .or_else(|| config.outdir.clone())
                .unwrap_or_else(|| PathBuf::from(".")),
            major: pick(&self.major, &config.major).unwrap_or_else(|| DEFAULT_MAJOR.to_string()),
        })
    }
}
