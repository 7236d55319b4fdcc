//! Browser reconciliation controller
//!
//! Drives one Pod per Browser:
//! - new Browser → finalizer + identity labels → `Pending`
//! - `Pending`, no Pod → look up the resolved spec, build and create the Pod
//! - Pod exists → mirror its state into the Browser status, fail on terminal
//!   Pod conditions
//! - `Failed` → drain the Pod, drop the finalizer
//! - deleting → drain the Pod, drop the finalizer
//!
//! Every write to the Browser re-reads it and patches with the fresh
//! resourceVersion, retrying on 409 (see [`update_browser`]).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use opentelemetry::KeyValue;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use selenosis_common::crd::{Browser, BrowserPhase, BrowserStatus};
use selenosis_common::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use selenosis_common::kube_utils::{
    finalizers_with, finalizers_without, has_finalizer, is_deleting,
};
use selenosis_common::metrics::{observe_reconcile, BROWSER_FAILURES, PODS_CREATED};
use selenosis_common::retry::{retry_on_conflict, RetryConfig};
use selenosis_common::{
    Error, BROWSER_CONTAINER_NAME, BROWSER_FINALIZER, BROWSER_LABEL, BROWSER_NAME_LABEL,
    BROWSER_VERSION_LABEL, CRITICAL_SIDECAR_NAME, FIELD_MANAGER,
};
use selenosis_config::ConfigStore;

use crate::error::BrowserError;
use crate::options::parse_options;
use crate::pod::build_pod;
use crate::status::{observed_status, pod_phase};

/// Requeue delay after a failed reconcile
const MEDIUM_RETRY: Duration = Duration::from_secs(10);
/// Steady-state resync interval
const PERIODIC_RECONCILE: Duration = Duration::from_secs(30);
/// Re-check interval while a Pod is being created or removed
const QUICK_CHECK: Duration = Duration::from_secs(3);
/// How long a Pod may sit in Pending with waiting containers
const POD_CREATION_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// How long a graceful Pod deletion may take before forcing it
const POD_DELETION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Waiting reasons that mean the container is still starting normally
const STARTING_REASONS: [&str; 2] = ["ContainerCreating", "PodInitializing"];

/// `status.reason` values set when a Browser fails
pub mod failure_reasons {
    /// No BrowserConfig entry for the requested browser/version
    pub const CONFIG_NOT_FOUND: &str = "BrowserConfigNotFound";
    /// The options annotation did not parse
    pub const INVALID_OPTIONS: &str = "InvalidSelenosisOptions";
    /// A container terminated
    pub const CONTAINER_TERMINATED: &str = "ContainerTerminated";
    /// The Pod stayed Pending past the creation timeout
    pub const CREATION_TIMEOUT: &str = "PodCreationTimeout";
    /// The Pod reported phase Failed without a reason of its own
    pub const POD_FAILED: &str = "PodFailed";
    /// The Pod was deleted out from under the Browser
    pub const POD_DELETED: &str = "PodDeleted";
}

/// Kubernetes operations the Browser controller needs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get a Browser, `None` if it does not exist
    async fn get_browser(&self, name: &str, namespace: &str) -> Result<Option<Browser>, Error>;

    /// Replace finalizers and labels, guarded by `resource_version`
    async fn patch_browser_metadata(
        &self,
        name: &str,
        namespace: &str,
        resource_version: &str,
        finalizers: Vec<String>,
        labels: BTreeMap<String, String>,
    ) -> Result<(), Error>;

    /// Merge-patch the status subresource, guarded by `resource_version`
    async fn patch_browser_status(
        &self,
        name: &str,
        namespace: &str,
        resource_version: &str,
        status: &BrowserStatus,
    ) -> Result<(), Error>;

    /// Delete a Browser (not-found is success)
    async fn delete_browser(&self, name: &str, namespace: &str) -> Result<(), Error>;

    /// Get a Pod, `None` if it does not exist
    async fn get_pod(&self, name: &str, namespace: &str) -> Result<Option<Pod>, Error>;

    /// Create a Pod
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<(), Error>;

    /// Delete a Pod, `Some(0)` grace for a forced delete (not-found is success)
    async fn delete_pod(
        &self,
        name: &str,
        namespace: &str,
        grace_period_seconds: Option<u32>,
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

fn ignore_not_found(result: Result<(), kube::Error>) -> Result<(), Error> {
    match result {
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        other => other.map_err(Error::from),
    }
}

/// Every `BrowserStatus` field as it appears on the wire
const STATUS_FIELDS: [&str; 6] = [
    "podIP",
    "phase",
    "message",
    "reason",
    "startTime",
    "containerStatuses",
];

/// Merge patch for the status subresource.
///
/// Fields the status leaves unset are sent as `null` so the merge clears
/// them instead of keeping the stored value.
fn status_patch(
    resource_version: &str,
    status: &BrowserStatus,
) -> Result<serde_json::Value, Error> {
    let mut body =
        serde_json::to_value(status).map_err(|e| Error::serialization(e.to_string()))?;
    if let Some(fields) = body.as_object_mut() {
        for field in STATUS_FIELDS {
            fields.entry(field).or_insert(serde_json::Value::Null);
        }
    }
    Ok(json!({
        "metadata": { "resourceVersion": resource_version },
        "status": body
    }))
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_browser(&self, name: &str, namespace: &str) -> Result<Option<Browser>, Error> {
        let api: Api<Browser> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_browser_metadata(
        &self,
        name: &str,
        namespace: &str,
        resource_version: &str,
        finalizers: Vec<String>,
        labels: BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let api: Api<Browser> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({
            "metadata": {
                "resourceVersion": resource_version,
                "finalizers": finalizers,
                "labels": labels
            }
        });
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn patch_browser_status(
        &self,
        name: &str,
        namespace: &str,
        resource_version: &str,
        status: &BrowserStatus,
    ) -> Result<(), Error> {
        let api: Api<Browser> = Api::namespaced(self.client.clone(), namespace);
        let patch = status_patch(resource_version, status)?;
        api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn delete_browser(&self, name: &str, namespace: &str) -> Result<(), Error> {
        let api: Api<Browser> = Api::namespaced(self.client.clone(), namespace);
        ignore_not_found(api.delete(name, &DeleteParams::default()).await.map(|_| ()))
    }

    async fn get_pod(&self, name: &str, namespace: &str) -> Result<Option<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<(), Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        api.create(&params, pod).await?;
        Ok(())
    }

    async fn delete_pod(
        &self,
        name: &str,
        namespace: &str,
        grace_period_seconds: Option<u32>,
    ) -> Result<(), Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = DeleteParams {
            grace_period_seconds,
            ..Default::default()
        };
        ignore_not_found(api.delete(name, &params).await.map(|_| ()))
    }
}

/// Shared state for the Browser controller
pub struct Context {
    /// Kubernetes operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Resolved launch specs, fed by the BrowserConfig watch
    pub store: Arc<ConfigStore>,
    /// Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Backoff for optimistic Browser writes
    pub retry: RetryConfig,
}

impl Context {
    /// Create a context backed by a real client
    pub fn new(client: Client, store: Arc<ConfigStore>) -> Self {
        Self {
            kube: Arc::new(KubeClientImpl::new(client.clone())),
            store,
            events: Arc::new(KubeEventPublisher::new(client, "browser-controller")),
            retry: RetryConfig::optimistic(),
        }
    }

    /// Replace the optimistic write backoff
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Create a context for testing with a mock client and millisecond backoff
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn KubeClient>, store: Arc<ConfigStore>) -> Self {
        Self {
            kube,
            store,
            events: Arc::new(selenosis_common::events::NoopEventPublisher),
            retry: RetryConfig {
                max_attempts: 5,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
                backoff_multiplier: 2.0,
            },
        }
    }
}

/// Reconcile a Browser
#[instrument(skip(browser, ctx), fields(browser = %browser.name_any()))]
pub async fn reconcile(browser: Arc<Browser>, ctx: Arc<Context>) -> Result<Action, BrowserError> {
    let started = Instant::now();
    let result = reconcile_inner(&browser, &ctx).await;
    observe_reconcile("browser", started, result.is_ok());
    result
}

/// Requeue policy after a reconcile error
pub fn error_policy(browser: Arc<Browser>, error: &BrowserError, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        browser = %browser.name_any(),
        retryable = error.is_retryable(),
        "Browser reconciliation failed"
    );
    Action::requeue(MEDIUM_RETRY)
}

async fn reconcile_inner(browser: &Browser, ctx: &Context) -> Result<Action, BrowserError> {
    let name = browser.name_any();
    let namespace = browser.namespace().ok_or(BrowserError::MissingNamespace)?;

    let Some(mut browser) = ctx.kube.get_browser(&name, &namespace).await? else {
        debug!("Browser already gone");
        return Ok(Action::await_change());
    };

    if is_deleting(&browser.metadata) {
        return handle_deletion(&browser, ctx, &name, &namespace).await;
    }

    let mut phase = browser.phase();
    if phase == Some(BrowserPhase::Failed) {
        return handle_failed(&browser, ctx, &name, &namespace).await;
    }

    if browser.uid().is_none() {
        return Err(BrowserError::MissingUid);
    }

    let labels = identity_labels(&browser);
    let labels_missing = labels
        .iter()
        .any(|(k, v)| browser.labels().get(k) != Some(v));
    if !has_finalizer(&browser.metadata, BROWSER_FINALIZER) || labels_missing {
        update_browser(ctx, &name, &namespace, WritePath::Metadata, |b| {
            let finalizers = finalizers_with(&b.metadata, BROWSER_FINALIZER);
            b.metadata.finalizers = Some(finalizers);
            b.metadata
                .labels
                .get_or_insert_with(BTreeMap::new)
                .extend(labels.clone());
        })
        .await?;
        debug!("finalizer and identity labels set");
        browser.metadata.finalizers = Some(finalizers_with(&browser.metadata, BROWSER_FINALIZER));
        browser.metadata.labels.get_or_insert_with(BTreeMap::new).extend(labels);
    }

    if phase.is_none() {
        update_browser(ctx, &name, &namespace, WritePath::Status, |b| {
            b.status
                .get_or_insert_with(BrowserStatus::default)
                .phase
                .get_or_insert(BrowserPhase::Pending);
        })
        .await?;
        info!("Browser status set to Pending");
        phase = Some(BrowserPhase::Pending);
    }

    let Some(pod) = ctx.kube.get_pod(&name, &namespace).await? else {
        return handle_missing_pod(&browser, ctx, &name, &namespace).await;
    };

    if is_deleting(&pod.metadata) {
        info!("Browser pod is being deleted, deleting Browser");
        return fail_and_delete(
            &browser,
            ctx,
            failure_reasons::POD_DELETED,
            "browser pod was deleted".to_string(),
        )
        .await;
    }

    let now = Utc::now();
    match pod_phase(&pod) {
        BrowserPhase::Failed => {
            let status = pod.status.as_ref();
            let reason = status.and_then(|s| s.reason.clone()).unwrap_or_default();
            let message = status.and_then(|s| s.message.clone()).unwrap_or_default();
            warn!(%reason, %message, "Browser pod has failed");

            ctx.kube.delete_pod(&name, &namespace, Some(0)).await?;
            let failure_reason = if reason.is_empty() {
                failure_reasons::POD_FAILED
            } else {
                reason.as_str()
            };
            mark_failed(
                &browser,
                ctx,
                failure_reason,
                format!("pod has failed with reason: {} - {}", reason, message),
            )
            .await?;
            return Ok(Action::await_change());
        }
        BrowserPhase::Pending if phase == Some(BrowserPhase::Pending) => {
            if let Some(verdict) = check_pending(&pod, now) {
                info!(reason = verdict.reason(), "Browser pod failed to start");
                if verdict.deletes_pod() {
                    ctx.kube.delete_pod(&name, &namespace, Some(0)).await?;
                }
                mark_failed(&browser, ctx, verdict.reason(), verdict.message()).await?;
                return Ok(Action::await_change());
            }
        }
        _ => {}
    }

    if let Some(container) = critical_termination(&pod) {
        let status = pod.status.as_ref();
        let reason = status
            .and_then(|s| s.reason.clone())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| failure_reasons::CONTAINER_TERMINATED.to_string());
        let message = status
            .and_then(|s| s.message.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("pod container {} terminated", container));
        info!(%container, "critical container terminated, deleting Browser");
        return fail_and_delete(&browser, ctx, &reason, message).await;
    }

    if observed_status(browser.status.as_ref(), &pod).is_some() {
        update_browser(ctx, &name, &namespace, WritePath::Status, |b| {
            if let Some(next) = observed_status(b.status.as_ref(), &pod) {
                b.status = Some(next);
            }
        })
        .await?;
        debug!(phase = %pod_phase(&pod), "Browser status mirrored from pod");
    }

    Ok(Action::requeue(PERIODIC_RECONCILE))
}

fn identity_labels(browser: &Browser) -> BTreeMap<String, String> {
    BTreeMap::from([
        (BROWSER_LABEL.to_string(), browser.name_any()),
        (
            BROWSER_NAME_LABEL.to_string(),
            browser.spec.browser_name.clone(),
        ),
        (
            BROWSER_VERSION_LABEL.to_string(),
            browser.spec.browser_version.clone(),
        ),
    ])
}

async fn handle_missing_pod(
    browser: &Browser,
    ctx: &Context,
    name: &str,
    namespace: &str,
) -> Result<Action, BrowserError> {
    let spec = &browser.spec;
    let Some(resolved) = ctx
        .store
        .get(namespace, &spec.browser_name, &spec.browser_version)
    else {
        info!(
            browser_name = %spec.browser_name,
            browser_version = %spec.browser_version,
            "Browser config not found"
        );
        ctx.events
            .publish(
                &browser.object_ref(&()),
                EventType::Warning,
                reasons::CONFIG_NOT_FOUND,
                actions::RECONCILE,
                Some(format!(
                    "no BrowserConfig entry for {}:{}",
                    spec.browser_name, spec.browser_version
                )),
            )
            .await;
        mark_failed(
            browser,
            ctx,
            failure_reasons::CONFIG_NOT_FOUND,
            "Browser configuration not found".to_string(),
        )
        .await?;
        return Ok(Action::await_change());
    };

    let options = match parse_options(browser.annotations()) {
        Ok(options) => options,
        Err(e) => {
            warn!(error = %e, "invalid selenosis options");
            ctx.events
                .publish(
                    &browser.object_ref(&()),
                    EventType::Warning,
                    reasons::INVALID_OPTIONS,
                    actions::RECONCILE,
                    Some(e.to_string()),
                )
                .await;
            mark_failed(browser, ctx, failure_reasons::INVALID_OPTIONS, e.to_string()).await?;
            return Ok(Action::await_change());
        }
    };

    let pod = build_pod(browser, &resolved, options.as_ref());
    match ctx.kube.create_pod(namespace, &pod).await {
        Ok(()) => {}
        Err(e) if e.is_already_exists() => {
            debug!("Browser pod already exists, re-checking shortly");
            return Ok(Action::requeue(QUICK_CHECK));
        }
        Err(e) => return Err(e.into()),
    }

    PODS_CREATED.add(1, &[]);
    info!(pod = %name, has_options = options.is_some(), "Browser pod created");
    ctx.events
        .publish(
            &browser.object_ref(&()),
            EventType::Normal,
            reasons::POD_CREATED,
            actions::CREATE,
            Some(format!("Created pod {}", name)),
        )
        .await;
    Ok(Action::requeue(QUICK_CHECK))
}

/// Why a Pending pod will never start
#[derive(Debug, PartialEq)]
enum PendingVerdict {
    Terminated {
        container: String,
    },
    TimedOut,
    BadWaiting {
        container: String,
        reason: String,
        message: String,
    },
}

impl PendingVerdict {
    fn reason(&self) -> &str {
        match self {
            Self::Terminated { .. } => failure_reasons::CONTAINER_TERMINATED,
            Self::TimedOut => failure_reasons::CREATION_TIMEOUT,
            Self::BadWaiting { reason, .. } => reason.as_str(),
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Terminated { container } => format!("pod container {} terminated", container),
            Self::TimedOut => format!(
                "pod creation timeout exceeded after {}m0s",
                POD_CREATION_TIMEOUT.as_secs() / 60
            ),
            Self::BadWaiting {
                container,
                reason,
                message,
            } => format!("pod container {} failed: {} - {}", container, reason, message),
        }
    }

    fn deletes_pod(&self) -> bool {
        matches!(self, Self::BadWaiting { .. })
    }
}

fn older_than(ts: &Time, limit: Duration, now: DateTime<Utc>) -> bool {
    (now - ts.0).to_std().is_ok_and(|age| age > limit)
}

/// Inspect a Pending pod's containers for conditions it will not recover from.
fn check_pending(pod: &Pod, now: DateTime<Utc>) -> Option<PendingVerdict> {
    let timed_out = pod
        .metadata
        .creation_timestamp
        .as_ref()
        .is_some_and(|ts| older_than(ts, POD_CREATION_TIMEOUT, now));

    let statuses = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_deref())
        .unwrap_or_default();

    // unschedulable pods report no container statuses at all
    if statuses.is_empty() {
        return timed_out.then_some(PendingVerdict::TimedOut);
    }

    for cs in statuses {
        let Some(state) = cs.state.as_ref() else {
            continue;
        };
        if state.terminated.is_some() {
            return Some(PendingVerdict::Terminated {
                container: cs.name.clone(),
            });
        }
        if let Some(waiting) = &state.waiting {
            if timed_out {
                return Some(PendingVerdict::TimedOut);
            }
            let reason = waiting.reason.as_deref().unwrap_or_default();
            if !STARTING_REASONS.contains(&reason) {
                return Some(PendingVerdict::BadWaiting {
                    container: cs.name.clone(),
                    reason: reason.to_string(),
                    message: waiting.message.clone().unwrap_or_default(),
                });
            }
        }
    }
    None
}

/// Name of the first critical container that has terminated, if any.
fn critical_termination(pod: &Pod) -> Option<&str> {
    pod.status
        .as_ref()?
        .container_statuses
        .as_ref()?
        .iter()
        .find(|cs| {
            (cs.name == BROWSER_CONTAINER_NAME || cs.name == CRITICAL_SIDECAR_NAME)
                && cs.state.as_ref().is_some_and(|s| s.terminated.is_some())
        })
        .map(|cs| cs.name.as_str())
}

/// Deletion handshake: drain the pod, then release the finalizer.
async fn handle_deletion(
    browser: &Browser,
    ctx: &Context,
    name: &str,
    namespace: &str,
) -> Result<Action, BrowserError> {
    if !has_finalizer(&browser.metadata, BROWSER_FINALIZER) {
        debug!("Browser finalizer not set, nothing to clean up");
        return Ok(Action::await_change());
    }

    if let Some(action) = drain_pod(browser, ctx, name, namespace).await? {
        return Ok(action);
    }

    remove_finalizer(browser, ctx, name, namespace).await?;
    info!("Browser cleanup completed");
    Ok(Action::await_change())
}

/// Failed Browsers keep no Pod and, once it is gone, no finalizer.
async fn handle_failed(
    browser: &Browser,
    ctx: &Context,
    name: &str,
    namespace: &str,
) -> Result<Action, BrowserError> {
    if let Some(action) = drain_pod(browser, ctx, name, namespace).await? {
        return Ok(action);
    }
    if has_finalizer(&browser.metadata, BROWSER_FINALIZER) {
        remove_finalizer(browser, ctx, name, namespace).await?;
    }
    Ok(Action::await_change())
}

/// Delete the Browser's pod if there is one.
///
/// Returns `Some(action)` while the pod still exists, `None` once it is gone
/// (or cannot be read).
async fn drain_pod(
    browser: &Browser,
    ctx: &Context,
    name: &str,
    namespace: &str,
) -> Result<Option<Action>, BrowserError> {
    let pod = match ctx.kube.get_pod(name, namespace).await {
        Ok(pod) => pod,
        Err(e) => {
            warn!(error = %e, "could not read Browser pod, proceeding with cleanup");
            None
        }
    };
    let Some(pod) = pod else {
        return Ok(None);
    };

    match &pod.metadata.deletion_timestamp {
        None => {
            let grace = (pod_phase(&pod) == BrowserPhase::Failed).then_some(0);
            ctx.kube.delete_pod(name, namespace, grace).await?;
            info!(force = grace.is_some(), "deleting Browser pod");
            ctx.events
                .publish(
                    &browser.object_ref(&()),
                    EventType::Normal,
                    reasons::POD_DELETED,
                    actions::DELETE,
                    None,
                )
                .await;
        }
        Some(ts) if older_than(ts, POD_DELETION_TIMEOUT, Utc::now()) => {
            warn!("Browser pod deletion is taking too long, forcing it");
            ctx.kube.delete_pod(name, namespace, Some(0)).await?;
        }
        Some(_) => debug!("waiting for Browser pod to be deleted"),
    }
    Ok(Some(Action::requeue(QUICK_CHECK)))
}

async fn remove_finalizer(
    browser: &Browser,
    ctx: &Context,
    name: &str,
    namespace: &str,
) -> Result<(), BrowserError> {
    update_browser(ctx, name, namespace, WritePath::Metadata, |b| {
        let finalizers = finalizers_without(&b.metadata, BROWSER_FINALIZER);
        b.metadata.finalizers = Some(finalizers);
    })
    .await?;
    info!("Browser finalizer removed");
    ctx.events
        .publish(
            &browser.object_ref(&()),
            EventType::Normal,
            reasons::FINALIZER_REMOVED,
            actions::DELETE,
            None,
        )
        .await;
    Ok(())
}

/// Set the Browser to `Failed` with a reason and message.
async fn mark_failed(
    browser: &Browser,
    ctx: &Context,
    reason: &str,
    message: String,
) -> Result<(), BrowserError> {
    let name = browser.name_any();
    let namespace = browser.namespace().unwrap_or_default();
    update_browser(ctx, &name, &namespace, WritePath::Status, |b| {
        let status = b.status.get_or_insert_with(BrowserStatus::default);
        status.phase = Some(BrowserPhase::Failed);
        status.reason = Some(reason.to_string());
        status.message = Some(message.clone());
    })
    .await?;

    info!(reason, %message, "Browser status set to Failed");
    BROWSER_FAILURES.add(1, &[KeyValue::new("reason", reason.to_string())]);
    ctx.events
        .publish(
            &browser.object_ref(&()),
            EventType::Warning,
            reasons::BROWSER_FAILED,
            actions::RECONCILE,
            Some(message),
        )
        .await;
    Ok(())
}

/// Mark the Browser failed and delete it. The finalizer stays so the
/// deletion handshake still drains the pod.
async fn fail_and_delete(
    browser: &Browser,
    ctx: &Context,
    reason: &str,
    message: String,
) -> Result<Action, BrowserError> {
    if browser.phase() != Some(BrowserPhase::Failed) {
        mark_failed(browser, ctx, reason, message).await?;
    }
    let namespace = browser.namespace().unwrap_or_default();
    ctx.kube.delete_browser(&browser.name_any(), &namespace).await?;
    info!("Browser deletion requested");
    Ok(Action::await_change())
}

/// Which part of the Browser a write goes to
#[derive(Clone, Copy, Debug)]
enum WritePath {
    /// Finalizers and labels
    Metadata,
    /// Status subresource
    Status,
}

/// Fetch the Browser, apply `mutate`, and patch it back guarded by the
/// fetched resourceVersion. Conflicts re-run the whole cycle. No write is
/// made when `mutate` changes nothing or the Browser is gone.
async fn update_browser<F>(
    ctx: &Context,
    name: &str,
    namespace: &str,
    path: WritePath,
    mutate: F,
) -> Result<(), Error>
where
    F: Fn(&mut Browser) + Sync,
{
    let mutate = &mutate;
    retry_on_conflict(&ctx.retry, name, move || async move {
        let Some(mut browser) = ctx.kube.get_browser(name, namespace).await? else {
            debug!(?path, "Browser gone, skipping write");
            return Ok(());
        };
        let resource_version = browser.resource_version().unwrap_or_default();

        match path {
            WritePath::Metadata => {
                let before = browser.metadata.clone();
                mutate(&mut browser);
                if browser.metadata == before {
                    return Ok(());
                }
                ctx.kube
                    .patch_browser_metadata(
                        name,
                        namespace,
                        &resource_version,
                        browser.finalizers().to_vec(),
                        browser.labels().clone(),
                    )
                    .await
            }
            WritePath::Status => {
                let before = browser.status.clone();
                mutate(&mut browser);
                if browser.status == before {
                    return Ok(());
                }
                let status = browser.status.unwrap_or_default();
                ctx.kube
                    .patch_browser_status(name, namespace, &resource_version, &status)
                    .await
            }
        }
    })
    .await
}
