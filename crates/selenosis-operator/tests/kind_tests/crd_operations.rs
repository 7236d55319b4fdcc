//! Integration tests for CRD operations
//!
//! These tests tell the story of how clients create and read Browser and
//! BrowserConfig objects through the Kubernetes API.

use kube::api::{Api, PostParams};

use selenosis_common::crd::{Browser, BrowserConfig};

use super::helpers::{cleanup, ensure_test_cluster, sample_browser, sample_config, TEST_NAMESPACE};

/// Story: An admin publishes a browser catalog and reads it back intact
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_catalog_round_trips_through_api_server() {
    let client = ensure_test_cluster().await.expect("test cluster");
    let configs: Api<BrowserConfig> = Api::namespaced(client, TEST_NAMESPACE);
    let name = "crd-ops-catalog";
    cleanup(&configs, name).await;

    let created = configs
        .create(&PostParams::default(), &sample_config(name, "120.0"))
        .await
        .expect("create BrowserConfig");
    assert!(created.metadata.uid.is_some());

    let fetched = configs.get(name).await.expect("get BrowserConfig");
    let versions = fetched.spec.browsers.get("chrome").expect("chrome entry");
    assert_eq!(versions["120.0"].image, "registry.k8s.io/pause:3.10");

    cleanup(&configs, name).await;
}

/// Story: A session router creates a Browser and the schema keeps its spec
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_browser_spec_is_preserved() {
    let client = ensure_test_cluster().await.expect("test cluster");
    let browsers: Api<Browser> = Api::namespaced(client, TEST_NAMESPACE);
    let name = "crd-ops-browser";
    cleanup(&browsers, name).await;

    browsers
        .create(&PostParams::default(), &sample_browser(name, "firefox", "125.0"))
        .await
        .expect("create Browser");

    let fetched = browsers.get(name).await.expect("get Browser");
    assert_eq!(fetched.spec.browser_name, "firefox");
    assert_eq!(fetched.spec.browser_version, "125.0");

    cleanup(&browsers, name).await;
}
