//! Per-Browser pod overrides carried in the `selenosis.io/options` annotation
//!
//! The annotation holds a small JSON document:
//!
//! ```json
//! {"labels": {"team": "qa"}, "containers": {"browser": {"env": {"TZ": "Europe/Berlin"}}}}
//! ```
//!
//! An absent or empty annotation means no overrides. Anything that does not
//! parse is a terminal failure for the Browser.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{EnvVar, Pod};
use serde::{Deserialize, Deserializer, Serialize};

use selenosis_common::OPTIONS_ANNOTATION;

use crate::error::BrowserError;

/// Overrides applied on top of the synthesized pod
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct SelenosisOptions {
    /// Extra pod labels, applied last
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: BTreeMap<String, String>,

    /// Per-container overrides keyed by container name
    #[serde(default, deserialize_with = "null_entries_as_default")]
    pub containers: BTreeMap<String, ContainerOptions>,
}

/// Overrides for one container
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ContainerOptions {
    /// Environment variables set by name
    #[serde(default, deserialize_with = "null_as_default")]
    pub env: BTreeMap<String, String>,
}

/// `null` reads as the empty value
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// `null` for the whole map or for one container reads as empty
fn null_entries_as_default<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<String, ContainerOptions>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries: Option<BTreeMap<String, Option<ContainerOptions>>> =
        Option::deserialize(deserializer)?;
    Ok(entries
        .unwrap_or_default()
        .into_iter()
        .map(|(name, opts)| (name, opts.unwrap_or_default()))
        .collect())
}

/// Parse the options annotation, if any.
pub fn parse_options(
    annotations: &BTreeMap<String, String>,
) -> Result<Option<SelenosisOptions>, BrowserError> {
    match annotations.get(OPTIONS_ANNOTATION) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => serde_json::from_str::<Option<SelenosisOptions>>(raw)
            .map(|opts| Some(opts.unwrap_or_default()))
            .map_err(BrowserError::InvalidOptions),
    }
}

impl SelenosisOptions {
    /// Apply container env overrides and labels to a synthesized pod.
    ///
    /// Env values replace same-named variables in place and new names are
    /// appended. Labels win over everything already on the pod.
    pub fn apply(&self, pod: &mut Pod) {
        if let Some(spec) = pod.spec.as_mut() {
            for container in spec.containers.iter_mut() {
                let Some(opts) = self.containers.get(&container.name) else {
                    continue;
                };
                if opts.env.is_empty() {
                    continue;
                }
                container.env = Some(set_env(container.env.take().unwrap_or_default(), &opts.env));
            }
        }

        if !self.labels.is_empty() {
            pod.metadata
                .labels
                .get_or_insert_with(BTreeMap::new)
                .extend(self.labels.clone());
        }
    }
}

fn set_env(mut base: Vec<EnvVar>, overrides: &BTreeMap<String, String>) -> Vec<EnvVar> {
    for (name, value) in overrides {
        let var = EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            value_from: None,
        };
        match base.iter_mut().find(|e| e.name == *name) {
            Some(existing) => *existing = var,
            None => base.push(var),
        }
    }
    base
}
