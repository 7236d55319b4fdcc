//! Integration tests for the Browser lifecycle
//!
//! The operator runs in-process against the kind cluster; each story creates
//! real objects and watches the controller converge them.

use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, PostParams};
use kube::ResourceExt;

use selenosis_common::crd::{Browser, BrowserConfig, BrowserPhase};
use selenosis_common::{BROWSER_FINALIZER, BROWSER_LABEL, BROWSER_NAME_LABEL};

use super::helpers::{
    cleanup, ensure_test_cluster, sample_browser, sample_config, start_operator, wait_for,
    TEST_NAMESPACE,
};

const CONVERGE_TIMEOUT: Duration = Duration::from_secs(90);

/// Story: A Browser for a catalogued version gets a labelled, owned Pod, and
/// deleting the Browser drains the Pod before the Browser disappears
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_browser_runs_and_drains_its_pod() {
    let client = ensure_test_cluster().await.expect("test cluster");
    let configs: Api<BrowserConfig> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let browsers: Api<Browser> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let pods: Api<Pod> = Api::namespaced(client.clone(), TEST_NAMESPACE);

    let config_name = "lifecycle-catalog";
    let name = "lifecycle-chrome";
    cleanup(&browsers, name).await;
    cleanup(&configs, config_name).await;

    configs
        .create(&PostParams::default(), &sample_config(config_name, "120.0"))
        .await
        .expect("create BrowserConfig");

    let shutdown = start_operator(client.clone()).await;

    browsers
        .create(&PostParams::default(), &sample_browser(name, "Chrome", "120.0"))
        .await
        .expect("create Browser");

    let (browsers_ref, pods_ref) = (&browsers, &pods);
    let running = wait_for(CONVERGE_TIMEOUT, || async move {
        matches!(
            browsers_ref.get(name).await.ok().and_then(|b| b.status).and_then(|s| s.phase),
            Some(BrowserPhase::Running)
        )
    })
    .await;
    assert!(running, "Browser should reach Running");

    let browser = browsers.get(name).await.expect("get Browser");
    assert!(browser.finalizers().iter().any(|f| f == BROWSER_FINALIZER));
    assert_eq!(browser.labels().get(BROWSER_LABEL).map(String::as_str), Some(name));
    assert_eq!(
        browser.labels().get(BROWSER_NAME_LABEL).map(String::as_str),
        Some("Chrome")
    );

    let pod = pods.get(name).await.expect("backing pod");
    assert_eq!(pod.labels().get("app").map(String::as_str), Some("selenosis-browser"));
    let owner = pod.owner_references().first().expect("owner reference");
    assert_eq!(owner.kind, "Browser");
    assert_eq!(owner.controller, Some(true));

    browsers
        .delete(name, &DeleteParams::default())
        .await
        .expect("delete Browser");

    let gone = wait_for(CONVERGE_TIMEOUT, || async move {
        browsers_ref.get_opt(name).await.ok().flatten().is_none()
            && pods_ref.get_opt(name).await.ok().flatten().is_none()
    })
    .await;
    assert!(gone, "Browser and Pod should both be removed");

    shutdown.cancel();
    cleanup(&configs, config_name).await;
}

/// Story: A Browser for an unknown version fails without creating a Pod
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_unknown_version_fails_fast() {
    let client = ensure_test_cluster().await.expect("test cluster");
    let browsers: Api<Browser> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let pods: Api<Pod> = Api::namespaced(client.clone(), TEST_NAMESPACE);

    let name = "lifecycle-missing";
    cleanup(&browsers, name).await;

    let shutdown = start_operator(client.clone()).await;

    browsers
        .create(&PostParams::default(), &sample_browser(name, "opera", "1.0"))
        .await
        .expect("create Browser");

    let browsers_ref = &browsers;
    let failed = wait_for(CONVERGE_TIMEOUT, || async move {
        matches!(
            browsers_ref.get(name).await.ok().and_then(|b| b.status).and_then(|s| s.phase),
            Some(BrowserPhase::Failed)
        )
    })
    .await;
    assert!(failed, "Browser should be marked Failed");

    let status = browsers.get(name).await.expect("get Browser").status.expect("status");
    assert_eq!(status.reason.as_deref(), Some("BrowserConfigNotFound"));
    assert!(pods.get_opt(name).await.expect("list pods").is_none());

    shutdown.cancel();
    cleanup(&browsers, name).await;
}
