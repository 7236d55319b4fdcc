//! Startup utilities for the selenosis operator

mod crds;
mod leader;

pub use crds::{crd_manifests, ensure_crds_installed};
pub use leader::{acquire_leadership, pod_identity};
