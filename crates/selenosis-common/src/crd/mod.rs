//! Custom Resource Definitions for selenosis
//!
//! This module contains the two CRDs the operator serves: `Browser` (one
//! browser session) and `BrowserConfig` (the catalog browsers launch from).

mod browser;
mod browser_config;

pub use browser::{
    Browser, BrowserPhase, BrowserSpec, BrowserStatus, ContainerPort, ContainerStatus,
};
pub use browser_config::{
    BrowserConfig, BrowserConfigSpec, BrowserConfigStatus, BrowserVersionConfig, Sidecar,
    Template,
};
