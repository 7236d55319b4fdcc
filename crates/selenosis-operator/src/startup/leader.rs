//! Leader election wiring

use std::sync::Arc;

use kube::Client;

use selenosis_common::leader_election::{LeaderElector, LeaderGuard, LEADER_LEASE_NAME};

/// Namespace used when `POD_NAMESPACE` is unset
const DEFAULT_NAMESPACE: &str = "default";

/// Identity and namespace of this replica, from the downward API when present.
pub fn pod_identity() -> (String, String) {
    let identity = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "selenosis-operator".to_string());
    let namespace =
        std::env::var("POD_NAMESPACE").unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string());
    (identity, namespace)
}

/// Block until this replica holds the controller Lease.
pub async fn acquire_leadership(client: &Client) -> anyhow::Result<LeaderGuard> {
    let (identity, namespace) = pod_identity();
    tracing::info!(%identity, %namespace, lease = LEADER_LEASE_NAME, "Waiting for leadership");

    let elector = Arc::new(LeaderElector::new(
        client.clone(),
        LEADER_LEASE_NAME,
        &namespace,
        &identity,
    ));
    let guard = elector
        .acquire()
        .await
        .map_err(|e| anyhow::anyhow!("leader election failed: {}", e))?;

    tracing::info!(%identity, "Leadership acquired");
    Ok(guard)
}
