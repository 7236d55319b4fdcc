//! Common types for selenosis: CRDs, errors, and runtime utilities

#![warn(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod leader_election;
pub mod metrics;
pub mod retry;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Finalizer guarding Browser objects until their pod is drained
pub const BROWSER_FINALIZER: &str = "browserpod.selenosis.io/finalizer";

/// Finalizer guarding BrowserConfig objects
pub const BROWSER_CONFIG_FINALIZER: &str = "browserconfig.selenosis.io/finalizer";

/// Annotation carrying per-Browser pod overrides as JSON
pub const OPTIONS_ANNOTATION: &str = "selenosis.io/options";

/// Label holding the Browser object name
pub const BROWSER_LABEL: &str = "selenosis.io/browser";

/// Label holding `spec.browserName`
pub const BROWSER_NAME_LABEL: &str = "selenosis.io/browser.name";

/// Label holding `spec.browserVersion`
pub const BROWSER_VERSION_LABEL: &str = "selenosis.io/browser.version";

/// Name of the browser container, always first in the pod
pub const BROWSER_CONTAINER_NAME: &str = "browser";

/// Sidecar whose termination is fatal for the whole Browser
pub const CRITICAL_SIDECAR_NAME: &str = "seleniferous";

/// Field manager used for every write the operator makes
pub const FIELD_MANAGER: &str = "selenosis-operator";
