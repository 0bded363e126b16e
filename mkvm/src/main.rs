use clap::Parser;
use std::sync::Arc;
use tracing::error;

use mkvm::{provision, Cli, MkvmConfig, MkvmError, MkvmResult};
use mkvm_core::provision::validate;
use mkvm_vsphere::{ConnectOptions, VsphereAffinityEngine, VsphereClient};

fn init_logging(debug: bool) -> MkvmResult<()> {
    let directive = if debug { "mkvm=debug" } else { "mkvm=info" };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(
        directive
            .parse()
            .map_err(|e| MkvmError::configuration(format!("Invalid log directive: {}", e)))?,
    );

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn prompt_password() -> MkvmResult<String> {
    dialoguer::Password::new()
        .with_prompt("Password")
        .interact()
        .map_err(|e| MkvmError::configuration(format!("Failed to read password: {}", e)))
}

async fn run(cli: Cli) -> MkvmResult<()> {
    let config = match cli.config_path() {
        Some(path) => MkvmConfig::load(&path).await?,
        None => MkvmConfig::default(),
    };

    let mut request = cli.to_request(&config)?;
    validate(&request, &config.network)?;

    if request.needs_password() && request.credentials.password.is_none() {
        request.credentials.password = Some(prompt_password()?);
    }

    let options = ConnectOptions::from_credentials(&request.credentials, config.task_poll_interval)?;
    let client = Arc::new(VsphereClient::connect(&options).await?);
    let affinity = Arc::new(VsphereAffinityEngine::new(client.clone()));

    let result = provision(&request, &config, client.clone(), affinity).await;
    client.logout().await;
    result.map(|_| ())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.debug) {
        eprintln!("{}", e);
        std::process::exit(e.exit_code());
    }

    if let Err(e) = run(cli).await {
        error!("{}", e);
        std::process::exit(e.exit_code());
    }
}
