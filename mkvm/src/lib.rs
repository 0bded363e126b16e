pub mod cli;

pub use cli::Cli;

// Re-export commonly used types
pub use mkvm_core::{
    config::MkvmConfig,
    error::{ErrorKind, MkvmError, MkvmResult},
    types::ProvisioningRequest,
    ProvisioningOutcome,
};

use mkvm_core::anti_affinity::AffinityRuleEngine;
use mkvm_core::management::ManagementClient;
use mkvm_core::{Provisioner, ProvisionerSettings};
use std::sync::Arc;
use tracing::info;

/// Run one provisioning request against connected collaborators.
pub async fn provision(
    request: &ProvisioningRequest,
    config: &MkvmConfig,
    client: Arc<dyn ManagementClient>,
    affinity: Arc<dyn AffinityRuleEngine>,
) -> MkvmResult<ProvisioningOutcome> {
    let mut provisioner = Provisioner::new(client, affinity, ProvisionerSettings::from(config));
    let outcome = provisioner.provision(request, &config.network).await?;

    match &outcome {
        ProvisioningOutcome::Created { vm } => info!("Built {} ({})", vm.name, vm.moref),
        ProvisioningOutcome::Cloned { vm, affinity } => {
            info!("Cloned {} ({})", vm.name, vm.moref);
            if let Some(group) = affinity {
                info!("Anti-affinity rule: {}", group.rule_name());
            }
        }
        ProvisioningOutcome::Skipped { reason } => info!("Nothing built: {}", reason),
    }
    Ok(outcome)
}
