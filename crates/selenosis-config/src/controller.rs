//! BrowserConfig controller
//!
//! Guards the BrowserConfig finalizer and stamps an informational status.
//! Cached catalog entries are purged by the store's own watcher, not here.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use serde_json::json;
use tracing::{debug, error, info, instrument};

#[cfg(test)]
use mockall::automock;

use selenosis_common::crd::{BrowserConfig, BrowserConfigStatus};
use selenosis_common::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use selenosis_common::kube_utils::{
    finalizers_with, finalizers_without, has_finalizer, is_deleting,
};
use selenosis_common::metrics::observe_reconcile;
use selenosis_common::{Error, BROWSER_CONFIG_FINALIZER, FIELD_MANAGER};

/// Requeue delay after a failed reconcile
const ERROR_REQUEUE: Duration = Duration::from_secs(5);

/// Kubernetes operations the BrowserConfig controller needs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get a BrowserConfig, `None` if it does not exist
    async fn get_config(&self, name: &str, namespace: &str) -> Result<Option<BrowserConfig>, Error>;

    /// Replace the finalizer list, guarded by `resource_version`
    async fn set_finalizers(
        &self,
        name: &str,
        namespace: &str,
        resource_version: &str,
        finalizers: Vec<String>,
    ) -> Result<(), Error>;

    /// Merge-patch the status subresource
    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &BrowserConfigStatus,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_config(&self, name: &str, namespace: &str) -> Result<Option<BrowserConfig>, Error> {
        let api: Api<BrowserConfig> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(config) => Ok(Some(config)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_finalizers(
        &self,
        name: &str,
        namespace: &str,
        resource_version: &str,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        let api: Api<BrowserConfig> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({
            "metadata": {
                "resourceVersion": resource_version,
                "finalizers": finalizers
            }
        });
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &BrowserConfigStatus,
    ) -> Result<(), Error> {
        let api: Api<BrowserConfig> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({ "status": status });
        api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Shared state for the BrowserConfig controller
pub struct Context {
    /// Kubernetes operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Event sink
    pub events: Arc<dyn EventPublisher>,
}

impl Context {
    /// Create a context backed by a real client
    pub fn new(client: Client) -> Self {
        Self {
            kube: Arc::new(KubeClientImpl::new(client.clone())),
            events: Arc::new(KubeEventPublisher::new(client, "browserconfig-controller")),
        }
    }

    /// Create a context for testing with a mock client
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn KubeClient>) -> Self {
        Self {
            kube,
            events: Arc::new(selenosis_common::events::NoopEventPublisher),
        }
    }
}

/// Reconcile a BrowserConfig
#[instrument(skip(config, ctx), fields(config = %config.name_any()))]
pub async fn reconcile(config: Arc<BrowserConfig>, ctx: Arc<Context>) -> Result<Action, Error> {
    let started = Instant::now();
    let result = reconcile_inner(&config, &ctx).await;
    observe_reconcile("browserconfig", started, result.is_ok());
    result
}

async fn reconcile_inner(config: &BrowserConfig, ctx: &Context) -> Result<Action, Error> {
    let name = config.name_any();
    let namespace = config.namespace().unwrap_or_default();

    let Some(current) = ctx.kube.get_config(&name, &namespace).await? else {
        debug!("BrowserConfig already gone");
        return Ok(Action::await_change());
    };
    let resource_version = current.resource_version().unwrap_or_default();

    if is_deleting(&current.metadata) {
        if has_finalizer(&current.metadata, BROWSER_CONFIG_FINALIZER) {
            ctx.kube
                .set_finalizers(
                    &name,
                    &namespace,
                    &resource_version,
                    finalizers_without(&current.metadata, BROWSER_CONFIG_FINALIZER),
                )
                .await?;
            info!("BrowserConfig finalizer removed");
            ctx.events
                .publish(
                    &current.object_ref(&()),
                    EventType::Normal,
                    reasons::FINALIZER_REMOVED,
                    actions::DELETE,
                    None,
                )
                .await;
        }
        return Ok(Action::await_change());
    }

    if !has_finalizer(&current.metadata, BROWSER_CONFIG_FINALIZER) {
        ctx.kube
            .set_finalizers(
                &name,
                &namespace,
                &resource_version,
                finalizers_with(&current.metadata, BROWSER_CONFIG_FINALIZER),
            )
            .await?;
        debug!("BrowserConfig finalizer added");
    }

    if let Err(e) = current.spec.validate() {
        // still served: the store skips only the broken entries
        debug!(error = %e, "BrowserConfig has invalid entries");
    }

    let generation = current.metadata.generation.unwrap_or_default().to_string();
    let stamped = current.status.as_ref().and_then(|s| s.version.as_deref());
    if stamped != Some(generation.as_str()) {
        let status = BrowserConfigStatus {
            version: Some(generation),
            last_updated: Some(Time(Utc::now())),
        };
        ctx.kube.patch_status(&name, &namespace, &status).await?;
    }

    Ok(Action::await_change())
}

/// Requeue policy after a reconcile error
pub fn error_policy(config: Arc<BrowserConfig>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        config = %config.name_any(),
        "BrowserConfig reconciliation failed"
    );
    Action::requeue(ERROR_REQUEUE)
}
