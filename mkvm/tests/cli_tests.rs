use clap::Parser;
use mkvm::{Cli, ErrorKind, MkvmConfig};
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

fn config() -> MkvmConfig {
    MkvmConfig::from_yaml(
        r#"
username: jdoe
host: vcenter.example.com
dc: DC1
cluster: Cluster-A
ds_regex: "^prod-"
iso_store: ISOs
subnet: 192.168.20.0
network:
  '192.168.20.0':
    name: Production
"#,
    )
    .unwrap()
}

#[test]
fn test_config_fills_in_missing_flags() {
    let cli = Cli::try_parse_from(["mkvm", "app1.example.com", "-t", "small"]).unwrap();
    let request = cli.to_request(&config()).unwrap();

    assert_eq!(request.hostname, "app1.example.com");
    assert_eq!(request.domain, "example.com");
    assert_eq!(request.credentials.host, "vcenter.example.com");
    assert_eq!(request.credentials.username, "jdoe");
    assert_eq!(request.datacenter, "DC1");
    assert_eq!(request.cluster, "Cluster-A");
    assert_eq!(request.datastore_pattern, "^prod-");
    assert_eq!(request.iso_store, "ISOs");
    assert_eq!(request.major, "8");
    assert_eq!(request.outdir, PathBuf::from("."));
    assert!(request.credentials.insecure);
    assert!(request.flags.upload_iso && request.flags.make_vm && request.flags.power_on);
    assert!(!request.clone);
    assert!(request.needs_password());
}

#[test]
fn test_flags_override_config() {
    let cli = Cli::try_parse_from([
        "mkvm",
        "web3.example.com",
        "--custom",
        "4,8G,40G",
        "-H",
        "vc2.example.com",
        "--datastore",
        "VMstore",
        "--domain",
        "corp.example.com",
        "--no-upload",
        "--no-power",
        "--no-insecure",
        "--major",
        "9",
    ])
    .unwrap();
    let request = cli.to_request(&config()).unwrap();

    assert_eq!(request.credentials.host, "vc2.example.com");
    assert_eq!(request.datastore_pattern, "VMstore");
    assert_eq!(request.domain, "corp.example.com");
    assert_eq!(request.custom.as_ref().unwrap().cpu, 4);
    assert!(!request.flags.upload_iso);
    assert!(!request.flags.power_on);
    assert!(request.flags.make_vm);
    assert!(!request.credentials.insecure);
    assert_eq!(request.guest_id(), "rhel9_64Guest");
    assert!(!request.needs_password());
}

#[test]
fn test_last_toggle_wins() {
    let cli = Cli::try_parse_from(["mkvm", "a.example.com", "--no-vm", "--vm"]).unwrap();
    assert!(cli.to_request(&config()).unwrap().flags.make_vm);

    let cli = Cli::try_parse_from(["mkvm", "a.example.com", "--vm", "--no-vm"]).unwrap();
    assert!(!cli.to_request(&config()).unwrap().flags.make_vm);
}

#[test]
fn test_sdb_without_value_uses_default_size() {
    let cli = Cli::try_parse_from(["mkvm", "a.example.com", "--sdb"]).unwrap();
    assert_eq!(cli.sdb.as_deref(), Some("10G"));

    let cli = Cli::try_parse_from(["mkvm", "a.example.com", "--sdb", "50G,/pub"]).unwrap();
    assert_eq!(cli.sdb.as_deref(), Some("50G,/pub"));
}

#[test]
fn test_malformed_custom_is_rejected() {
    assert!(Cli::try_parse_from(["mkvm", "a.example.com", "--custom", "2,4G"]).is_err());
    assert!(Cli::try_parse_from(["mkvm", "a.example.com", "--custom", "0,4G,20G"]).is_err());
}

#[test]
fn test_missing_host_is_configuration_error() {
    let mut config = config();
    config.host = None;

    let cli = Cli::try_parse_from(["mkvm", "a.example.com", "-t", "small"]).unwrap();
    let err = cli.to_request(&config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains("--host"));
}

#[test]
fn test_clone_does_not_need_iso_store() {
    let mut config = config();
    config.iso_store = None;

    let cli = Cli::try_parse_from([
        "mkvm",
        "db2.example.com",
        "-t",
        "medium",
        "--clone",
        "--sourcevm",
        "dbtemplate",
        "--ip",
        "192.168.20.12",
    ])
    .unwrap();
    let request = cli.to_request(&config).unwrap();
    assert!(request.clone);
    assert_eq!(request.source_vm.as_deref(), Some("dbtemplate"));
    assert_eq!(request.ip.ip, "192.168.20.12");
    assert!(request.needs_password());

    let cli = Cli::try_parse_from(["mkvm", "db2.example.com", "-t", "medium"]).unwrap();
    assert_eq!(
        cli.to_request(&config).unwrap_err().kind(),
        ErrorKind::Configuration
    );
}

#[test]
fn test_bare_hostname_needs_domain() {
    let cli = Cli::try_parse_from(["mkvm", "standalone", "-t", "small"]).unwrap();
    assert_eq!(
        cli.to_request(&config()).unwrap_err().kind(),
        ErrorKind::Configuration
    );
}

#[tokio::test]
async fn test_config_file_flag() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "host: from-file.example.com\ndc: DC9\n").unwrap();

    let path = file.path().to_str().unwrap().to_string();
    let cli = Cli::try_parse_from(["mkvm", "a.example.com", "--config", &path]).unwrap();
    assert_eq!(cli.config_path(), Some(file.path().to_path_buf()));

    let config = MkvmConfig::load(&cli.config_path().unwrap()).await.unwrap();
    assert_eq!(config.host.as_deref(), Some("from-file.example.com"));
    assert_eq!(config.dc.as_deref(), Some("DC9"));
}
