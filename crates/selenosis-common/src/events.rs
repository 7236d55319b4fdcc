//! Kubernetes Event recording for selenosis controllers.
//!
//! Events are **fire-and-forget**: failures are logged as warnings and never
//! propagate errors. A failed event must never break reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a Kubernetes Event on the given resource.
    ///
    /// * `reason` - Machine-readable reason (see [`reasons`])
    /// * `action` - What the controller did (see [`actions`])
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a new publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// No-op implementation for tests.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Well-known event reason strings.
pub mod reasons {
    /// Browser pod was created
    pub const POD_CREATED: &str = "PodCreated";
    /// Browser pod was deleted by the controller
    pub const POD_DELETED: &str = "PodDeleted";
    /// Browser moved to the Failed phase
    pub const BROWSER_FAILED: &str = "BrowserFailed";
    /// No BrowserConfig entry matched the requested browser/version
    pub const CONFIG_NOT_FOUND: &str = "ConfigNotFound";
    /// The per-instance options annotation could not be parsed
    pub const INVALID_OPTIONS: &str = "InvalidOptions";
    /// The finalizer was removed and the object can go away
    pub const FINALIZER_REMOVED: &str = "FinalizerRemoved";
}

/// Well-known event action strings.
pub mod actions {
    /// Creating a resource
    pub const CREATE: &str = "Create";
    /// Deleting a resource
    pub const DELETE: &str = "Delete";
    /// Reconciling state
    pub const RECONCILE: &str = "Reconcile";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_publisher_accepts_events() {
        let publisher = NoopEventPublisher;
        publisher
            .publish(
                &ObjectReference::default(),
                EventType::Warning,
                reasons::BROWSER_FAILED,
                actions::RECONCILE,
                Some("pod crashed".to_string()),
            )
            .await;
    }
}
