//! vSphere backend for mkvm
//!
//! Implements the core [`ManagementClient`](mkvm_core::management::ManagementClient)
//! and [`AffinityRuleEngine`](mkvm_core::anti_affinity::AffinityRuleEngine)
//! traits against a vCenter server.

pub mod affinity;
pub mod client;
pub mod wire;

pub use affinity::VsphereAffinityEngine;
pub use client::{ConnectOptions, VsphereClient};
