//! Browser CRD types
//!
//! A `Browser` asks for one running browser of a given name and version.
//! The operator backs each Browser with exactly one Pod of the same name and
//! mirrors the Pod's state back into the Browser status.

use k8s_openapi::api::core::v1::ContainerState;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// Phase
// =============================================================================

/// Lifecycle phase of a Browser, following the Pod phase vocabulary
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum BrowserPhase {
    /// Pod requested or starting
    #[default]
    Pending,
    /// Pod is running
    Running,
    /// Pod exited successfully
    Succeeded,
    /// Browser failed terminally
    Failed,
    /// Pod state could not be determined
    Unknown,
}

impl BrowserPhase {
    /// Map a Pod's `status.phase` string onto a Browser phase.
    ///
    /// Anything the Pod API does not define maps to `Unknown`.
    pub fn from_pod_phase(phase: &str) -> Self {
        match phase {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for BrowserPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Failed => write!(f, "Failed"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

// =============================================================================
// CRD
// =============================================================================

/// A single browser session backed by one Pod
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "selenosis.io",
    version = "v1",
    kind = "Browser",
    plural = "browsers",
    shortname = "brw",
    namespaced,
    status = "BrowserStatus",
    printcolumn = r#"{"name":"Browser","type":"string","jsonPath":".spec.browserName"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.browserVersion"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"PodIP","type":"string","jsonPath":".status.podIP"}"#,
    printcolumn = r#"{"name":"StartTime","type":"date","jsonPath":".status.startTime"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BrowserSpec {
    /// Browser name as declared in a BrowserConfig (case-insensitive)
    pub browser_name: String,

    /// Browser version as declared in a BrowserConfig (case-insensitive)
    pub browser_version: String,
}

/// Observed state of a Browser
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BrowserStatus {
    /// IP address of the backing Pod
    #[serde(rename = "podIP", default, skip_serializing_if = "Option::is_none")]
    pub pod_ip: Option<String>,

    /// Current phase, unset until the controller first initializes it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<BrowserPhase>,

    /// Human-readable detail about the current phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Machine-readable reason for the current phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// When the backing Pod was started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Time>,

    /// Per-container state of the backing Pod
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub container_statuses: Vec<ContainerStatus>,
}

/// State of one container in the backing Pod
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    /// Container name
    pub name: String,

    /// Current container state (waiting, running or terminated)
    #[serde(default)]
    pub state: ContainerState,

    /// Image the container runs
    #[serde(default)]
    pub image: String,

    /// Number of container restarts
    #[serde(default)]
    pub restart_count: i32,

    /// Ports exposed by the container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,
}

/// A port exposed by a Browser container
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    /// Port name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Port number on the Pod IP
    pub container_port: i32,

    /// Protocol (TCP, UDP, SCTP)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    /// Port number on the host, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<i32>,
}

impl Browser {
    /// Current phase, `None` while uninitialized
    pub fn phase(&self) -> Option<BrowserPhase> {
        self.status.as_ref().and_then(|s| s.phase)
    }
}
