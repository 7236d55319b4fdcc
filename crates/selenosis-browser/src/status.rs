//! Mirroring Pod state into Browser status

use k8s_openapi::api::core::v1::{ContainerState, Pod};

use selenosis_common::crd::{BrowserPhase, BrowserStatus, ContainerPort, ContainerStatus};

/// Phase of the Pod in Browser terms.
///
/// A Pod without a reported phase has only just been admitted and counts as
/// Pending.
pub fn pod_phase(pod: &Pod) -> BrowserPhase {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .map_or(BrowserPhase::Pending, BrowserPhase::from_pod_phase)
}

/// Container statuses of `pod` as recorded on a Browser, with the ports
/// each container declares in the pod spec.
pub fn container_statuses(pod: &Pod) -> Vec<ContainerStatus> {
    let Some(statuses) = pod.status.as_ref().and_then(|s| s.container_statuses.as_ref()) else {
        return Vec::new();
    };
    statuses
        .iter()
        .map(|cs| ContainerStatus {
            name: cs.name.clone(),
            state: cs.state.clone().unwrap_or_default(),
            image: cs.image.clone(),
            restart_count: cs.restart_count,
            ports: container_ports(pod, &cs.name),
        })
        .collect()
}

fn container_ports(pod: &Pod, container: &str) -> Vec<ContainerPort> {
    pod.spec
        .iter()
        .flat_map(|spec| spec.containers.iter())
        .find(|c| c.name == container)
        .and_then(|c| c.ports.as_ref())
        .map(|ports| {
            ports
                .iter()
                .map(|p| ContainerPort {
                    name: p.name.clone(),
                    container_port: p.container_port,
                    protocol: p.protocol.clone(),
                    host_port: p.host_port,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Compare two container states by kind and the fields that matter for
/// status updates.
pub fn container_state_equal(a: &ContainerState, b: &ContainerState) -> bool {
    match (&a.running, &b.running) {
        (Some(x), Some(y)) => return x.started_at == y.started_at,
        (None, None) => {}
        _ => return false,
    }
    match (&a.terminated, &b.terminated) {
        (Some(x), Some(y)) => {
            return x.exit_code == y.exit_code
                && x.reason == y.reason
                && x.message == y.message
                && x.started_at == y.started_at
                && x.finished_at == y.finished_at
        }
        (None, None) => {}
        _ => return false,
    }
    match (&a.waiting, &b.waiting) {
        (Some(x), Some(y)) => x.reason == y.reason && x.message == y.message,
        (None, None) => true,
        _ => false,
    }
}

/// Status the Browser should carry given the observed Pod.
///
/// Returns `None` when nothing changed, so callers skip the write.
/// Message and reason are left as they are.
pub fn observed_status(current: Option<&BrowserStatus>, pod: &Pod) -> Option<BrowserStatus> {
    let empty = BrowserStatus::default();
    let current = current.unwrap_or(&empty);
    let pod_status = pod.status.as_ref();

    let phase = pod_phase(pod);
    let pod_ip = pod_status.and_then(|s| s.pod_ip.clone());
    let start_time = pod_status.and_then(|s| s.start_time.clone());

    let pod_changed = current.phase != Some(phase)
        || current.pod_ip != pod_ip
        || (start_time.is_some() && current.start_time != start_time);

    let observed = container_statuses(pod);
    let containers_changed = !observed.is_empty()
        && (observed.len() != current.container_statuses.len()
            || observed
                .iter()
                .zip(&current.container_statuses)
                .any(|(new, old)| {
                    new.restart_count != old.restart_count
                        || !container_state_equal(&new.state, &old.state)
                }));

    if !pod_changed && !containers_changed {
        return None;
    }

    let mut next = current.clone();
    next.phase = Some(phase);
    if pod_changed {
        next.pod_ip = pod_ip;
        next.start_time = start_time;
    }
    if containers_changed {
        next.container_statuses = observed;
    }
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use k8s_openapi::api::core::v1::{
        Container, ContainerPort as PodContainerPort, ContainerStateRunning,
        ContainerStateTerminated, ContainerStateWaiting, ContainerStatus as PodContainerStatus,
        PodSpec, PodStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn running_since(secs: i64) -> ContainerState {
        ContainerState {
            running: Some(ContainerStateRunning {
                started_at: Some(Time(Utc.timestamp_opt(secs, 0).unwrap())),
            }),
            ..Default::default()
        }
    }

    fn pod(phase: &str, state: ContainerState, restarts: i32) -> Pod {
        Pod {
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "browser".to_string(),
                    ports: Some(vec![PodContainerPort {
                        name: Some("vnc".to_string()),
                        container_port: 5900,
                        protocol: Some("TCP".to_string()),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                pod_ip: Some("10.0.0.7".to_string()),
                start_time: Some(Time(Utc.timestamp_opt(1_700_000_000, 0).unwrap())),
                container_statuses: Some(vec![PodContainerStatus {
                    name: "browser".to_string(),
                    image: "selenium/standalone-chrome:144.0".to_string(),
                    restart_count: restarts,
                    state: Some(state),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn first_observation_copies_everything() {
        let status = observed_status(None, &pod("Running", running_since(10), 0)).unwrap();

        assert_eq!(status.phase, Some(BrowserPhase::Running));
        assert_eq!(status.pod_ip.as_deref(), Some("10.0.0.7"));
        assert!(status.start_time.is_some());
        assert_eq!(status.container_statuses.len(), 1);
        assert_eq!(status.container_statuses[0].ports[0].container_port, 5900);
        assert_eq!(status.container_statuses[0].ports[0].name.as_deref(), Some("vnc"));
    }

    #[test]
    fn unchanged_pod_needs_no_write() {
        let observed = pod("Running", running_since(10), 0);
        let status = observed_status(None, &observed).unwrap();
        assert_eq!(observed_status(Some(&status), &observed), None);
    }

    #[test]
    fn restart_or_state_change_triggers_write() {
        let status = observed_status(None, &pod("Running", running_since(10), 0)).unwrap();

        assert!(observed_status(Some(&status), &pod("Running", running_since(10), 1)).is_some());
        assert!(observed_status(Some(&status), &pod("Running", running_since(20), 0)).is_some());
    }

    #[test]
    fn message_and_reason_survive_mirroring() {
        let mut status = observed_status(None, &pod("Pending", running_since(10), 0)).unwrap();
        status.reason = Some("Scheduled".to_string());

        let next = observed_status(Some(&status), &pod("Running", running_since(10), 0)).unwrap();
        assert_eq!(next.phase, Some(BrowserPhase::Running));
        assert_eq!(next.reason.as_deref(), Some("Scheduled"));
    }

    #[test]
    fn state_equality_compares_kind_and_details() {
        let waiting = |reason: &str| ContainerState {
            waiting: Some(ContainerStateWaiting {
                reason: Some(reason.to_string()),
                message: None,
            }),
            ..Default::default()
        };
        let terminated = |code: i32| ContainerState {
            terminated: Some(ContainerStateTerminated {
                exit_code: code,
                ..Default::default()
            }),
            ..Default::default()
        };

        assert!(container_state_equal(&waiting("ContainerCreating"), &waiting("ContainerCreating")));
        assert!(!container_state_equal(&waiting("ContainerCreating"), &waiting("ErrImagePull")));
        assert!(!container_state_equal(&waiting("ContainerCreating"), &running_since(1)));
        assert!(container_state_equal(&terminated(1), &terminated(1)));
        assert!(!container_state_equal(&terminated(1), &terminated(137)));
        assert!(container_state_equal(&ContainerState::default(), &ContainerState::default()));
    }

    #[test]
    fn pod_without_phase_is_pending() {
        assert_eq!(pod_phase(&Pod::default()), BrowserPhase::Pending);
        assert_eq!(pod_phase(&pod("Weird", running_since(1), 0)), BrowserPhase::Unknown);
    }
}
