//! Anti-affinity planning from the hostname convention
//!
//! Hosts that share a base name and end in a sequence digit (`web2`, `web3`,
//! ...) are replicas of one another and should not share a physical host.
//! A trailing `1` starts a group and needs no rule of its own.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::MkvmResult;
use crate::types::{short_hostname, Cluster, Datacenter};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AffinityGroup {
    pub base_hostname: String,
    pub domain: String,
    pub sequence: u8,
}

impl AffinityGroup {
    /// Name of the VM at position `n` of this group.
    pub fn member_name(&self, n: u8) -> String {
        format!("{}{}.{}", self.base_hostname, n, self.domain)
    }

    pub fn rule_name(&self) -> String {
        format!("{}.{}-anti-affinity", self.base_hostname, self.domain)
    }
}

/// Work out whether `hostname` needs to join an anti-affinity group.
pub fn plan(hostname: &str, domain: &str) -> Option<AffinityGroup> {
    let short = short_hostname(hostname);
    let last = short.chars().last()?;
    let sequence = last.to_digit(10).filter(|d| (2..=9).contains(d))? as u8;

    Some(AffinityGroup {
        base_hostname: short[..short.len() - 1].to_string(),
        domain: domain.to_string(),
        sequence,
    })
}

/// Creates or extends the platform rule keeping a group's members apart.
#[async_trait]
pub trait AffinityRuleEngine: Send + Sync {
    async fn create(
        &self,
        datacenter: &Datacenter,
        cluster: &Cluster,
        group: &AffinityGroup,
    ) -> MkvmResult<()>;
}
