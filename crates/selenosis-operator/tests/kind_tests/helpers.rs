//! Test helpers for integration tests
//!
//! Provides utilities for managing the kind cluster and fixture objects.

use std::collections::BTreeMap;
use std::future::Future;
use std::process::Command;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use kube::api::{Api, DeleteParams, ObjectMeta};
use kube::{Client, Config};
use tokio::sync::OnceCell;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use selenosis_common::crd::{
    Browser, BrowserConfig, BrowserConfigSpec, BrowserSpec, BrowserVersionConfig, Template,
};
use selenosis_config::ConfigStore;
use selenosis_operator::controller_runner::{build_controllers, run_controllers};
use selenosis_operator::startup::ensure_crds_installed;

/// Name of the kind cluster used for integration tests
pub const TEST_CLUSTER_NAME: &str = "selenosis-integration-test";

/// Namespace every fixture lives in
pub const TEST_NAMESPACE: &str = "default";

/// Global lock to ensure cluster is created only once
static CLUSTER_INIT: OnceLock<Result<(), String>> = OnceLock::new();

/// Track if CRDs have been installed (async-safe)
static CRDS_INSTALLED: OnceCell<Result<(), String>> = OnceCell::const_new();

/// Check if a kind cluster with the given name exists
pub fn kind_cluster_exists(name: &str) -> bool {
    let output = Command::new("kind")
        .args(["get", "clusters"])
        .output()
        .expect("failed to run kind");

    let clusters = String::from_utf8_lossy(&output.stdout);
    clusters.lines().any(|line| line.trim() == name)
}

/// Create a kind cluster for testing
pub fn create_kind_cluster(name: &str) -> Result<(), String> {
    if kind_cluster_exists(name) {
        println!("Kind cluster '{name}' already exists, reusing it");
        return Ok(());
    }

    println!("Creating kind cluster '{name}'...");
    let output = Command::new("kind")
        .args(["create", "cluster", "--name", name, "--wait", "60s"])
        .output()
        .map_err(|e| format!("failed to run kind: {e}"))?;

    if !output.status.success() {
        return Err(format!(
            "failed to create kind cluster: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    println!("Kind cluster '{name}' created successfully");
    Ok(())
}

/// Create a Kubernetes client connected to the test cluster
pub async fn create_test_client() -> Result<Client, String> {
    let context_name = format!("kind-{TEST_CLUSTER_NAME}");

    let config = Config::from_kubeconfig(&kube::config::KubeConfigOptions {
        context: Some(context_name),
        ..Default::default()
    })
    .await
    .map_err(|e| format!("failed to load kubeconfig: {e}"))?;

    Client::try_from(config).map_err(|e| format!("failed to create client: {e}"))
}

/// Ensure the test cluster is ready with CRDs installed
///
/// Returns a fresh Client for each call - clients should not be shared across test threads.
pub async fn ensure_test_cluster() -> Result<Client, String> {
    let cluster_result = CLUSTER_INIT.get_or_init(|| create_kind_cluster(TEST_CLUSTER_NAME));
    cluster_result.clone()?;

    let client = create_test_client().await?;

    let crd_result = CRDS_INSTALLED
        .get_or_init(|| async {
            let client = create_test_client().await?;
            ensure_crds_installed(&client)
                .await
                .map_err(|e| format!("failed to install CRDs: {e}"))?;
            // Give the API server time to establish the new types
            sleep(Duration::from_secs(2)).await;
            Ok(())
        })
        .await;
    crd_result.clone()?;

    Ok(client)
}

/// Run the config store and both controllers in-process until the returned
/// token is cancelled.
pub async fn start_operator(client: Client) -> CancellationToken {
    let shutdown = CancellationToken::new();
    let store = Arc::new(ConfigStore::new());

    let configs: Api<BrowserConfig> = Api::all(client.clone());
    tokio::spawn(store.clone().run(configs, shutdown.clone()));
    store
        .wait_for_sync(Duration::from_secs(30))
        .await
        .expect("config store should sync");

    let controllers = build_controllers(client, store);
    let token = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = run_controllers(controllers) => {}
            _ = token.cancelled() => {}
        }
    });

    shutdown
}

/// A BrowserConfig offering `chrome` at `version` with a pause image, so the
/// pod starts quickly on kind.
pub fn sample_config(name: &str, version: &str) -> BrowserConfig {
    let mut versions = BTreeMap::new();
    versions.insert(
        version.to_string(),
        BrowserVersionConfig {
            image: "registry.k8s.io/pause:3.10".to_string(),
            ..Default::default()
        },
    );

    BrowserConfig {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: BrowserConfigSpec {
            template: Some(Template {
                labels: Some(BTreeMap::from([(
                    "app".to_string(),
                    "selenosis-browser".to_string(),
                )])),
                ..Default::default()
            }),
            browsers: BTreeMap::from([("chrome".to_string(), versions)]),
        },
        status: None,
    }
}

/// A Browser asking for `browser_name` at `version`
pub fn sample_browser(name: &str, browser_name: &str, version: &str) -> Browser {
    Browser {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: BrowserSpec {
            browser_name: browser_name.to_string(),
            browser_version: version.to_string(),
        },
        status: None,
    }
}

/// Poll `check` every 500ms until it returns true or `timeout` elapses.
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check().await {
            return true;
        }
        sleep(Duration::from_millis(500)).await;
    }
    false
}

/// Delete an object, ignoring errors
pub async fn cleanup<K>(api: &Api<K>, name: &str)
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    let _ = api.delete(name, &DeleteParams::default()).await;
}
