//! Template inheritance for BrowserConfig entries
//!
//! [`resolve`] folds a catalog `template` into one per-version entry and
//! returns a [`ResolvedLaunchSpec`]. The rules per field shape:
//!
//! | shape                                   | rule                                         |
//! |-----------------------------------------|----------------------------------------------|
//! | scalars, structs, resources             | version value if set, else template value    |
//! | maps (labels, annotations, nodeSelector)| union, version wins on key collision         |
//! | env, sidecars, init containers          | union by name, version entry wins            |
//! | volumes, mounts, tolerations, aliases,  | template entries, then version entries       |
//! | pull secrets                            | (no dedup)                                   |
//!
//! Within a same-named sidecar or init container the same rules apply again:
//! its ports and volume mounts concatenate, template entries first.
//!
//! A field stays `None` only when both sides are `None`; an explicit empty
//! collection on either side yields `Some`.
//!
//! Concatenation is not idempotent, so resolution runs once per observed
//! catalog revision on a fresh copy of the version entry. [`ResolvedLaunchSpec`]
//! is a separate type so a resolved value cannot be fed back into `resolve`.

use std::collections::BTreeMap;
use std::ops::Deref;

use k8s_openapi::api::core::v1::EnvVar;
use selenosis_common::crd::{BrowserVersionConfig, Sidecar, Template};

/// A version entry with template inheritance applied
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolvedLaunchSpec(BrowserVersionConfig);

impl ResolvedLaunchSpec {
    /// Take the resolved settings out of the wrapper
    pub fn into_inner(self) -> BrowserVersionConfig {
        self.0
    }
}

impl Deref for ResolvedLaunchSpec {
    type Target = BrowserVersionConfig;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Apply `template` to `version` and return the resolved launch spec.
///
/// Never fails. With no template the version entry is returned unchanged.
pub fn resolve(template: Option<&Template>, version: BrowserVersionConfig) -> ResolvedLaunchSpec {
    let Some(t) = template else {
        return ResolvedLaunchSpec(version);
    };

    let v = version;
    ResolvedLaunchSpec(BrowserVersionConfig {
        image: v.image,
        labels: merge_maps(t.labels.as_ref(), v.labels),
        annotations: merge_maps(t.annotations.as_ref(), v.annotations),
        env: merge_env(t.env.as_ref(), v.env),
        resources: v.resources.or_else(|| t.resources.clone()),
        image_pull_policy: v.image_pull_policy.or_else(|| t.image_pull_policy.clone()),
        volumes: concat(t.volumes.as_ref(), v.volumes),
        volume_mounts: concat(t.volume_mounts.as_ref(), v.volume_mounts),
        node_selector: merge_maps(t.node_selector.as_ref(), v.node_selector),
        affinity: v.affinity.or_else(|| t.affinity.clone()),
        tolerations: concat(t.tolerations.as_ref(), v.tolerations),
        host_aliases: concat(t.host_aliases.as_ref(), v.host_aliases),
        init_containers: merge_containers(t.init_containers.as_ref(), v.init_containers),
        sidecars: merge_containers(t.sidecars.as_ref(), v.sidecars),
        privileged: v.privileged.or(t.privileged),
        image_pull_secrets: concat(t.image_pull_secrets.as_ref(), v.image_pull_secrets),
        dns_config: v.dns_config.or_else(|| t.dns_config.clone()),
        security_context: v.security_context.or_else(|| t.security_context.clone()),
        working_dir: v.working_dir.or_else(|| t.working_dir.clone()),
    })
}

fn merge_maps(
    template: Option<&BTreeMap<String, String>>,
    version: Option<BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    match (template, version) {
        (None, None) => None,
        (Some(t), None) => Some(t.clone()),
        (None, Some(v)) => Some(v),
        (Some(t), Some(v)) => {
            let mut merged = t.clone();
            merged.extend(v);
            Some(merged)
        }
    }
}

fn concat<T: Clone>(template: Option<&Vec<T>>, version: Option<Vec<T>>) -> Option<Vec<T>> {
    match (template, version) {
        (None, None) => None,
        (Some(t), None) => Some(t.clone()),
        (None, Some(v)) => Some(v),
        (Some(t), Some(v)) => {
            let mut merged = t.clone();
            merged.extend(v);
            Some(merged)
        }
    }
}

/// Union of two name-keyed lists.
///
/// Template order is kept; a version entry replaces the template entry with
/// the same name in place (after `combine`), unmatched version entries are
/// appended in their own order.
fn merge_by_name<T: Clone>(
    template: Option<&Vec<T>>,
    version: Option<Vec<T>>,
    name: impl Fn(&T) -> &str,
    combine: impl Fn(&T, T) -> T,
) -> Option<Vec<T>> {
    let (t, v) = match (template, version) {
        (None, None) => return None,
        (Some(t), None) => return Some(t.clone()),
        (None, Some(v)) => return Some(v),
        (Some(t), Some(v)) => (t, v),
    };

    let mut merged: Vec<T> = t.clone();
    for entry in v {
        match merged.iter().position(|m| name(m) == name(&entry)) {
            Some(i) if i < t.len() => merged[i] = combine(&t[i], entry),
            // duplicate name within the version list: last one wins
            Some(i) => merged[i] = entry,
            None => merged.push(entry),
        }
    }
    Some(merged)
}

/// Merge env vars by name; a version var replaces the template var whole
pub fn merge_env(template: Option<&Vec<EnvVar>>, version: Option<Vec<EnvVar>>) -> Option<Vec<EnvVar>> {
    merge_by_name(template, version, |e| e.name.as_str(), |_, v| v)
}

fn merge_containers(
    template: Option<&Vec<Sidecar>>,
    version: Option<Vec<Sidecar>>,
) -> Option<Vec<Sidecar>> {
    merge_by_name(template, version, |s| s.name.as_str(), inherit_sidecar)
}

/// Version sidecar wins; unset sub-fields come from the template sidecar
fn inherit_sidecar(template: &Sidecar, version: Sidecar) -> Sidecar {
    let image = if version.image.is_empty() {
        template.image.clone()
    } else {
        version.image
    };
    Sidecar {
        name: version.name,
        image,
        command: version.command.or_else(|| template.command.clone()),
        working_dir: version.working_dir.or_else(|| template.working_dir.clone()),
        ports: concat(template.ports.as_ref(), version.ports),
        env: merge_env(template.env.as_ref(), version.env),
        volume_mounts: concat(template.volume_mounts.as_ref(), version.volume_mounts),
        image_pull_policy: version
            .image_pull_policy
            .or_else(|| template.image_pull_policy.clone()),
        resources: version.resources.or_else(|| template.resources.clone()),
    }
}
