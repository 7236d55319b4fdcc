//! Controller runner - builds and runs the Browser and BrowserConfig controllers

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use selenosis_browser::controller as browser_ctrl;
use selenosis_common::crd::{Browser, BrowserConfig};
use selenosis_common::BROWSER_LABEL;
use selenosis_config::controller as config_ctrl;
use selenosis_config::ConfigStore;

/// Watch timeout in seconds - forces reconnection to detect dead connections.
/// Must be less than client read_timeout (30s) to avoid spurious errors.
const WATCH_TIMEOUT_SECS: u32 = 25;

type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Build both controllers.
///
/// The Browser controller also watches Pods carrying the Browser label so pod
/// state changes trigger a reconcile of the owning Browser.
pub fn build_controllers(client: Client, store: Arc<ConfigStore>) -> Vec<ControllerFuture> {
    let watcher_config = || WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);

    let browsers: Api<Browser> = Api::all(client.clone());
    let pods: Api<Pod> = Api::all(client.clone());
    let browser_ctx = Arc::new(browser_ctrl::Context::new(client.clone(), store));

    tracing::info!("Starting Browser controller");
    let browser_controller = Controller::new(browsers, watcher_config())
        .owns(pods, watcher_config().labels(BROWSER_LABEL))
        .shutdown_on_signal()
        .run(browser_ctrl::reconcile, browser_ctrl::error_policy, browser_ctx)
        .for_each(log_reconcile_result("Browser"));

    let configs: Api<BrowserConfig> = Api::all(client.clone());
    let config_ctx = Arc::new(config_ctrl::Context::new(client));

    tracing::info!("Starting BrowserConfig controller");
    let config_controller = Controller::new(configs, watcher_config())
        .shutdown_on_signal()
        .run(config_ctrl::reconcile, config_ctrl::error_policy, config_ctx)
        .for_each(log_reconcile_result("BrowserConfig"));

    vec![Box::pin(browser_controller), Box::pin(config_controller)]
}

/// Run the controllers until every one of them stops.
pub async fn run_controllers(controllers: Vec<ControllerFuture>) {
    futures::future::join_all(controllers).await;
    tracing::info!("All controllers stopped");
}

/// Create a closure for logging reconciliation results
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
