//! Pod synthesis for a Browser
//!
//! [`build_pod`] is pure: the same Browser, resolved spec and options always
//! produce the same Pod. Layout:
//! - `browser` container first, then sidecars in catalog order
//! - init containers in catalog order
//! - labels: Browser labels, then spec labels, then option labels
//! - annotations: Browser annotations (minus the options annotation), then spec annotations

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, SecurityContext};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};

use selenosis_common::crd::{Browser, Sidecar};
use selenosis_common::{BROWSER_CONTAINER_NAME, OPTIONS_ANNOTATION};
use selenosis_config::ResolvedLaunchSpec;

use crate::options::SelenosisOptions;

const RESTART_POLICY_NEVER: &str = "Never";

/// Build the Pod backing `browser`.
pub fn build_pod(
    browser: &Browser,
    spec: &ResolvedLaunchSpec,
    options: Option<&SelenosisOptions>,
) -> Pod {
    let name = browser.name_any();

    let mut containers = Vec::with_capacity(1 + spec.sidecars.as_ref().map_or(0, Vec::len));
    containers.push(browser_container(spec));
    containers.extend(
        spec.sidecars
            .iter()
            .flatten()
            .map(|s| sidecar_container(s, spec.working_dir.as_ref())),
    );

    let init_containers = spec.init_containers.as_ref().map(|ics| {
        ics.iter()
            .map(|ic| sidecar_container(ic, spec.working_dir.as_ref()))
            .collect()
    });

    let mut pod = Pod {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: browser.namespace(),
            labels: non_empty(pod_labels(browser, spec)),
            annotations: non_empty(pod_annotations(browser, spec)),
            owner_references: browser.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers,
            init_containers,
            volumes: spec.volumes.clone(),
            node_selector: spec.node_selector.clone(),
            affinity: spec.affinity.clone(),
            tolerations: spec.tolerations.clone(),
            host_aliases: spec.host_aliases.clone(),
            image_pull_secrets: spec.image_pull_secrets.clone(),
            dns_config: spec.dns_config.clone(),
            security_context: spec.security_context.clone(),
            hostname: Some(name),
            restart_policy: Some(RESTART_POLICY_NEVER.to_string()),
            ..Default::default()
        }),
        status: None,
    };

    if let Some(options) = options {
        options.apply(&mut pod);
    }
    pod
}

fn browser_container(spec: &ResolvedLaunchSpec) -> Container {
    let security_context = spec
        .privileged
        .unwrap_or(false)
        .then(|| SecurityContext {
            privileged: Some(true),
            ..Default::default()
        });

    Container {
        name: BROWSER_CONTAINER_NAME.to_string(),
        image: Some(spec.image.clone()),
        image_pull_policy: spec.image_pull_policy.clone(),
        env: spec.env.clone(),
        resources: spec.resources.clone(),
        volume_mounts: spec.volume_mounts.clone(),
        working_dir: spec.working_dir.clone(),
        security_context,
        ..Default::default()
    }
}

fn sidecar_container(sidecar: &Sidecar, default_working_dir: Option<&String>) -> Container {
    Container {
        name: sidecar.name.clone(),
        image: Some(sidecar.image.clone()),
        image_pull_policy: sidecar.image_pull_policy.clone(),
        command: sidecar.command.clone(),
        ports: sidecar.ports.clone(),
        env: sidecar.env.clone(),
        resources: sidecar.resources.clone(),
        volume_mounts: sidecar.volume_mounts.clone(),
        working_dir: sidecar
            .working_dir
            .clone()
            .or_else(|| default_working_dir.cloned()),
        ..Default::default()
    }
}

fn pod_labels(browser: &Browser, spec: &ResolvedLaunchSpec) -> BTreeMap<String, String> {
    let mut labels = browser.labels().clone();
    if let Some(spec_labels) = &spec.labels {
        labels.extend(spec_labels.clone());
    }
    labels
}

fn pod_annotations(browser: &Browser, spec: &ResolvedLaunchSpec) -> BTreeMap<String, String> {
    let mut annotations: BTreeMap<String, String> = browser
        .annotations()
        .iter()
        .filter(|(k, _)| k.as_str() != OPTIONS_ANNOTATION)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if let Some(spec_annotations) = &spec.annotations {
        annotations.extend(spec_annotations.clone());
    }
    annotations
}

fn non_empty(map: BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    (!map.is_empty()).then_some(map)
}
