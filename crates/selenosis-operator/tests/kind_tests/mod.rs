//! Integration tests for the selenosis operator
//!
//! These tests require a Kubernetes cluster (kind) and tell the story of how
//! a session router drives browsers through the Kubernetes API.
//!
//! - `crd_operations`: creating and reading Browser and BrowserConfig objects
//!   against the installed CRD schemas
//! - `browser_lifecycle`: the operator running in-process, turning Browsers
//!   into Pods and draining them on delete
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test -p selenosis-operator --test kind -- --ignored
//! ```

mod browser_lifecycle;
mod crd_operations;
mod helpers;
