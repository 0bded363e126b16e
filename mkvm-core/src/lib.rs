pub mod anti_affinity;
pub mod clone_spec;
pub mod config;
pub mod datastore;
pub mod devices;
pub mod error;
pub mod management;
pub mod network;
pub mod provision;
pub mod resources;
pub mod size;
pub mod types;

// Stub collaborators are exposed for integration tests
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use error::{ErrorKind, MkvmError, MkvmResult, Result};
pub use provision::{Provisioner, ProvisionerSettings, ProvisioningOutcome, ProvisioningState};
