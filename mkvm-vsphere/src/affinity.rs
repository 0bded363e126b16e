//! DRS anti-affinity rules
//!
//! A group's rule lists every member VM that already exists, from `1` up to
//! the sequence number of the host just built. Re-running for a later member
//! replaces the member list of the existing rule.

use async_trait::async_trait;
use mkvm_core::anti_affinity::{AffinityGroup, AffinityRuleEngine};
use mkvm_core::error::MkvmResult;
use mkvm_core::management::ManagementClient;
use mkvm_core::types::{Cluster, Datacenter, ManagedObjectRef};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use crate::client::VsphereClient;
use crate::wire;

/// Existing VMs of `group`, in sequence order.
pub async fn existing_members(
    client: &dyn ManagementClient,
    datacenter: &Datacenter,
    group: &AffinityGroup,
) -> MkvmResult<Vec<ManagedObjectRef>> {
    let mut members = Vec::new();
    for n in 1..=group.sequence {
        let name = group.member_name(n);
        match client.find_vm(datacenter, &name).await? {
            Some(vm) => members.push(vm.moref),
            None => debug!("{} does not exist, leaving it out of the rule", name),
        }
    }
    Ok(members)
}

pub struct VsphereAffinityEngine {
    client: Arc<VsphereClient>,
}

impl VsphereAffinityEngine {
    pub fn new(client: Arc<VsphereClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AffinityRuleEngine for VsphereAffinityEngine {
    async fn create(
        &self,
        datacenter: &Datacenter,
        cluster: &Cluster,
        group: &AffinityGroup,
    ) -> MkvmResult<()> {
        let members = existing_members(self.client.as_ref(), datacenter, group).await?;
        if members.len() < 2 {
            info!(
                "Only {} member(s) of {} exist, no rule needed",
                members.len(),
                group.rule_name()
            );
            return Ok(());
        }

        let configuration = self
            .client
            .property(&cluster.moref, "configurationEx")
            .await?;
        let existing = wire::find_rule_key(&configuration, &group.rule_name());
        info!(
            "{} rule {} with {} members",
            if existing.is_some() { "Updating" } else { "Creating" },
            group.rule_name(),
            members.len()
        );

        let task = self
            .client
            .start_task(
                &cluster.moref,
                "ReconfigureComputeResource_Task",
                json!({
                    "spec": wire::anti_affinity_rule(group, &members, existing),
                    "modify": true,
                }),
            )
            .await?;
        self.client.wait_for_task(&task).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mkvm_core::anti_affinity::plan;
    use mkvm_core::test_helpers::StubManagementClient;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_members_skip_missing_hosts() {
        let client = StubManagementClient::new()
            .with_vm("web1.example.com", vec![], vec![])
            .with_vm("web3.example.com", vec![], vec![]);
        let datacenter = client.datacenter.clone();
        let group = plan("web3.example.com", "example.com").unwrap();

        let members = existing_members(&client, &datacenter, &group).await.unwrap();
        assert_eq!(members.len(), 2);

        let group = plan("web2.example.com", "example.com").unwrap();
        let members = existing_members(&client, &datacenter, &group).await.unwrap();
        assert_eq!(members.len(), 1);
    }
}
