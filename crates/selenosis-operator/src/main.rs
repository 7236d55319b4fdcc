//! Selenosis Operator - runs browser sessions as Kubernetes pods

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::Api;
use tokio_util::sync::CancellationToken;

use selenosis_common::crd::BrowserConfig;
use selenosis_common::kube_utils::create_client;
use selenosis_common::retry::{retry_with_backoff, RetryConfig};
use selenosis_common::telemetry::{init_telemetry, TelemetryConfig};
use selenosis_config::ConfigStore;
use selenosis_operator::controller_runner::{build_controllers, run_controllers};
use selenosis_operator::health;
use selenosis_operator::startup::{acquire_leadership, crd_manifests, ensure_crds_installed};

/// Selenosis - Browser pods from BrowserConfig catalogs
#[derive(Parser, Debug)]
#[command(name = "selenosis-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Only run controllers while holding the controller Lease
    #[arg(long, env = "ENABLE_LEADER_ELECTION")]
    enable_leader_election: bool,

    /// Address the liveness/readiness probe server binds to
    #[arg(long, env = "HEALTH_PROBE_BIND_ADDRESS", default_value = "0.0.0.0:8081")]
    health_probe_bind_address: SocketAddr,

    /// Seconds to wait for the BrowserConfig store's initial list
    #[arg(long, env = "STORE_SYNC_TIMEOUT_SECS", default_value_t = 120)]
    store_sync_timeout_secs: u64,

    /// Path to a kubeconfig; in-cluster config is used when unset
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        print!("{}", crd_manifests()?);
        return Ok(());
    }

    init_telemetry(TelemetryConfig::default())
        .map_err(|e| anyhow::anyhow!("failed to initialize telemetry: {}", e))?;

    let client = create_client(cli.kubeconfig.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("failed to create kube client: {}", e))?;

    // Keep trying until the API server accepts the CRDs
    let retry = RetryConfig::default();
    retry_with_backoff(&retry, "install_crds", || {
        let client = client.clone();
        async move { ensure_crds_installed(&client).await }
    })
    .await?;

    let shutdown = CancellationToken::new();
    let store = Arc::new(ConfigStore::new());

    let health_server = tokio::spawn(health::serve(
        cli.health_probe_bind_address,
        store.clone(),
        shutdown.clone(),
    ));

    let configs: Api<BrowserConfig> = Api::all(client.clone());
    let store_watcher = tokio::spawn(store.clone().run(configs, shutdown.clone()));

    let sync_timeout = Duration::from_secs(cli.store_sync_timeout_secs);
    if let Err(e) = store.wait_for_sync(sync_timeout).await {
        shutdown.cancel();
        return Err(anyhow::anyhow!("BrowserConfig store did not sync: {}", e));
    }

    let mut guard = if cli.enable_leader_election {
        Some(acquire_leadership(&client).await?)
    } else {
        None
    };

    let controllers = build_controllers(client, store);
    let lost_leadership = match guard.as_mut() {
        Some(g) => {
            tokio::select! {
                _ = run_controllers(controllers) => false,
                _ = g.lost() => true,
            }
        }
        None => {
            run_controllers(controllers).await;
            false
        }
    };

    tracing::info!("Shutting down");
    shutdown.cancel();
    if let Err(e) = store_watcher.await {
        tracing::warn!(error = %e, "BrowserConfig store watcher task panicked");
    }
    match health_server.await {
        Ok(Err(e)) => tracing::warn!(error = %e, "Health probe server exited with error"),
        Err(e) => tracing::warn!(error = %e, "Health probe server task panicked"),
        Ok(Ok(())) => {}
    }

    if let Some(g) = guard {
        if let Err(e) = g.release_leadership().await {
            tracing::warn!(error = %e, "Failed to release leadership");
        }
    }

    if lost_leadership {
        return Err(anyhow::anyhow!("leadership lost, exiting"));
    }
    Ok(())
}
