//! In-memory index of resolved BrowserConfig entries
//!
//! The store is fed by a `kube` watcher on BrowserConfig objects and serves
//! lookups to the Browser reconciler. Keys are
//! `namespace/lower(browserName):lower(browserVersion)`.
//!
//! Writes come only from the single watch loop. Resolution happens before the
//! write lock is taken, so readers wait at most for a map mutation.
//!
//! Besides the entries, the store remembers which keys every BrowserConfig
//! object declared last time it was seen. That lets an update drop keys the
//! object no longer declares, and lets a relist purge objects that vanished
//! while the watch was down.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, ResourceExt};
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use selenosis_common::crd::BrowserConfig;
use selenosis_common::metrics::CONFIG_STORE_ENTRIES;
use selenosis_common::{Error, Result};

use crate::merge::{resolve, ResolvedLaunchSpec};

/// Watch timeout (seconds), below the client read timeout
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Build the lookup key for one browser version
pub fn key_for(namespace: &str, browser_name: &str, browser_version: &str) -> String {
    format!(
        "{}/{}:{}",
        namespace,
        browser_name.to_lowercase(),
        browser_version.to_lowercase()
    )
}

#[derive(Default)]
struct StoreState {
    entries: HashMap<String, ResolvedLaunchSpec>,
    /// BrowserConfig `ns/name` -> keys it declared when last applied
    declared: HashMap<String, Vec<String>>,
    /// Objects seen since the current relist started
    relist: Option<HashSet<String>>,
}

/// Concurrent cache of resolved launch specs
pub struct ConfigStore {
    state: RwLock<StoreState>,
    synced: watch::Sender<bool>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore {
    /// Create an empty, unsynced store
    pub fn new() -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            state: RwLock::new(StoreState::default()),
            synced,
        }
    }

    /// Look up the resolved spec for a browser version.
    ///
    /// Name and version are matched case-insensitively. A miss is a normal
    /// outcome: the catalog may not have been observed yet.
    pub fn get(
        &self,
        namespace: &str,
        browser_name: &str,
        browser_version: &str,
    ) -> Option<ResolvedLaunchSpec> {
        let key = key_for(namespace, browser_name, browser_version);
        self.state.read().entries.get(&key).cloned()
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Whether the store holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the initial list of BrowserConfigs has been indexed
    pub fn is_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Wait until the initial list has been indexed.
    ///
    /// Timing out is a startup failure for the whole process.
    pub async fn wait_for_sync(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.synced.subscribe();
        let outcome = tokio::time::timeout(timeout, rx.wait_for(|synced| *synced))
            .await
            .map(|r| r.map(|_| ()));
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::internal_with_context(
                "config_store",
                "sync channel closed before the store synced",
            )),
            Err(_) => Err(Error::internal_with_context(
                "config_store",
                format!("BrowserConfig cache not synced after {:?}", timeout),
            )),
        }
    }

    /// Index a BrowserConfig that was added or updated.
    ///
    /// Every (browser, version) pair is resolved against the object's
    /// template on a fresh copy, then swapped into the map. Keys the object
    /// declared previously but no longer does are removed.
    pub fn apply(&self, config: &BrowserConfig) {
        let namespace = config.namespace().unwrap_or_default();
        let object_key = format!("{}/{}", namespace, config.name_any());

        let template = config.spec.template.as_ref();
        let mut resolved = Vec::new();
        for (browser_name, versions) in &config.spec.browsers {
            for (browser_version, version_cfg) in versions {
                if version_cfg.image.trim().is_empty() {
                    warn!(
                        config = %object_key,
                        browser = %browser_name,
                        version = %browser_version,
                        "Skipping browser version without image"
                    );
                    continue;
                }
                let key = key_for(&namespace, browser_name, browser_version);
                resolved.push((key, resolve(template, version_cfg.clone())));
            }
        }

        let keys: Vec<String> = resolved.iter().map(|(k, _)| k.clone()).collect();
        let total = {
            let mut state = self.state.write();
            if let Some(previous) = state.declared.remove(&object_key) {
                for stale in previous.iter().filter(|k| !keys.contains(k)) {
                    state.entries.remove(stale);
                }
            }
            for (key, spec) in resolved {
                state.entries.insert(key, spec);
            }
            state.declared.insert(object_key.clone(), keys.clone());
            if let Some(seen) = state.relist.as_mut() {
                seen.insert(object_key.clone());
            }
            state.entries.len()
        };

        CONFIG_STORE_ENTRIES.record(total as u64, &[]);
        debug!(config = %object_key, keys = ?keys, "BrowserConfig indexed");
    }

    /// Drop every key a deleted BrowserConfig declared
    pub fn delete(&self, config: &BrowserConfig) {
        let namespace = config.namespace().unwrap_or_default();
        let object_key = format!("{}/{}", namespace, config.name_any());

        let mut keys: Vec<String> = config
            .spec
            .browsers
            .iter()
            .flat_map(|(name, versions)| {
                versions.keys().map(|v| key_for(&namespace, name, v)).collect::<Vec<_>>()
            })
            .collect();

        let total = {
            let mut state = self.state.write();
            if let Some(previous) = state.declared.remove(&object_key) {
                keys.extend(previous);
            }
            for key in &keys {
                state.entries.remove(key);
            }
            state.entries.len()
        };

        CONFIG_STORE_ENTRIES.record(total as u64, &[]);
        info!(config = %object_key, removed = keys.len(), "BrowserConfig removed from store");
    }

    /// Start of a (re)list: track which objects the list contains
    fn begin_relist(&self) {
        self.state.write().relist = Some(HashSet::new());
    }

    /// End of a (re)list: purge objects the list no longer contains, mark synced
    fn finish_relist(&self) {
        let total = {
            let mut state = self.state.write();
            let seen = state.relist.take().unwrap_or_default();
            let gone: Vec<String> = state
                .declared
                .keys()
                .filter(|k| !seen.contains(*k))
                .cloned()
                .collect();
            for object_key in gone {
                if let Some(keys) = state.declared.remove(&object_key) {
                    for key in keys {
                        state.entries.remove(&key);
                    }
                }
                info!(config = %object_key, "BrowserConfig vanished during relist, purged");
            }
            state.entries.len()
        };

        CONFIG_STORE_ENTRIES.record(total as u64, &[]);
        if !self.is_synced() {
            info!(entries = total, "BrowserConfig store synced");
        }
        self.synced.send_replace(true);
    }

    /// Apply one watcher event
    pub fn handle_event(&self, event: Event<BrowserConfig>) {
        match event {
            Event::Init => self.begin_relist(),
            Event::InitApply(config) | Event::Apply(config) => self.apply(&config),
            Event::InitDone => self.finish_relist(),
            Event::Delete(config) => self.delete(&config),
        }
    }

    /// Consume the BrowserConfig watch stream until `shutdown` fires.
    ///
    /// Watch errors are logged and the watcher backs off and re-lists.
    pub async fn run(self: Arc<Self>, api: Api<BrowserConfig>, shutdown: CancellationToken) {
        let config = watcher::Config::default().timeout(WATCH_TIMEOUT_SECS);
        let mut stream = watcher::watcher(api, config).default_backoff().boxed();

        info!("Starting BrowserConfig store watcher");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = stream.next() => match next {
                    Some(Ok(event)) => self.handle_event(event),
                    Some(Err(e)) => warn!(error = %e, "BrowserConfig watch error"),
                    None => {
                        warn!("BrowserConfig watch stream ended");
                        break;
                    }
                },
            }
        }
        info!("BrowserConfig store watcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::EnvVar;
    use selenosis_common::crd::{BrowserConfigSpec, BrowserVersionConfig, Template};

    fn version(image: &str) -> BrowserVersionConfig {
        BrowserVersionConfig {
            image: image.to_string(),
            ..Default::default()
        }
    }

    fn catalog(name: &str, entries: &[(&str, &str, &str)]) -> BrowserConfig {
        let mut browsers: BTreeMap<String, BTreeMap<String, BrowserVersionConfig>> =
            BTreeMap::new();
        for (browser, ver, image) in entries {
            browsers
                .entry(browser.to_string())
                .or_default()
                .insert(ver.to_string(), version(image));
        }
        let mut config = BrowserConfig::new(
            name,
            BrowserConfigSpec {
                template: None,
                browsers,
            },
        );
        config.metadata.namespace = Some("selenosis".to_string());
        config
    }

    #[test]
    fn key_is_lowercased() {
        assert_eq!(key_for("ns", "Chrome", "144.0-Beta"), "ns/chrome:144.0-beta");
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let store = ConfigStore::new();
        store.apply(&catalog("browsers", &[("Chrome", "144.0", "chrome:144")]));

        let spec = store.get("selenosis", "chrome", "144.0").unwrap();
        assert_eq!(spec.image, "chrome:144");
        assert!(store.get("selenosis", "CHROME", "144.0").is_some());
        assert!(store.get("other-ns", "chrome", "144.0").is_none());
    }

    #[test]
    fn delete_removes_every_declared_version() {
        let store = ConfigStore::new();
        let config = catalog(
            "browsers",
            &[("chrome", "144.0", "chrome:144"), ("firefox", "120.0", "firefox:120")],
        );
        store.apply(&config);
        assert_eq!(store.len(), 2);

        store.delete(&config);
        assert!(store.get("selenosis", "chrome", "144.0").is_none());
        assert!(store.get("selenosis", "firefox", "120.0").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn update_drops_versions_no_longer_declared() {
        let store = ConfigStore::new();
        store.apply(&catalog(
            "browsers",
            &[("chrome", "143.0", "chrome:143"), ("chrome", "144.0", "chrome:144")],
        ));
        store.apply(&catalog("browsers", &[("chrome", "144.0", "chrome:144.1")]));

        assert!(store.get("selenosis", "chrome", "143.0").is_none());
        assert_eq!(
            store.get("selenosis", "chrome", "144.0").unwrap().image,
            "chrome:144.1"
        );
    }

    #[test]
    fn stored_entries_are_isolated_from_the_source_object() {
        let store = ConfigStore::new();
        let mut config = catalog("browsers", &[("chrome", "144.0", "chrome:144")]);
        store.apply(&config);

        if let Some(v) = config
            .spec
            .browsers
            .get_mut("chrome")
            .and_then(|versions| versions.get_mut("144.0"))
        {
            v.image = "mutated".to_string();
        }

        assert_eq!(store.get("selenosis", "chrome", "144.0").unwrap().image, "chrome:144");
    }

    #[test]
    fn reapplying_the_same_revision_does_not_duplicate_lists() {
        let store = ConfigStore::new();
        let mut config = catalog("browsers", &[("chrome", "144.0", "chrome:144")]);
        config.spec.template = Some(Template {
            env: Some(vec![EnvVar {
                name: "TZ".to_string(),
                value: Some("UTC".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        });

        store.apply(&config);
        store.apply(&config);

        let spec = store.get("selenosis", "chrome", "144.0").unwrap();
        assert_eq!(spec.env.as_ref().map(|e| e.len()), Some(1));
    }

    #[test]
    fn entries_without_image_are_skipped() {
        let store = ConfigStore::new();
        store.apply(&catalog(
            "browsers",
            &[("chrome", "144.0", ""), ("firefox", "120.0", "firefox:120")],
        ));
        assert!(store.get("selenosis", "chrome", "144.0").is_none());
        assert!(store.get("selenosis", "firefox", "120.0").is_some());
    }

    #[test]
    fn relist_marks_synced_and_purges_vanished_objects() {
        let store = ConfigStore::new();
        assert!(!store.is_synced());

        store.handle_event(Event::Init);
        store.handle_event(Event::InitApply(catalog(
            "a",
            &[("chrome", "144.0", "chrome:144")],
        )));
        store.handle_event(Event::InitApply(catalog(
            "b",
            &[("firefox", "120.0", "firefox:120")],
        )));
        store.handle_event(Event::InitDone);
        assert!(store.is_synced());
        assert_eq!(store.len(), 2);

        // watch restarts; "b" was deleted while we were disconnected
        store.handle_event(Event::Init);
        store.handle_event(Event::InitApply(catalog(
            "a",
            &[("chrome", "144.0", "chrome:144")],
        )));
        store.handle_event(Event::InitDone);

        assert!(store.get("selenosis", "chrome", "144.0").is_some());
        assert!(store.get("selenosis", "firefox", "120.0").is_none());
        assert!(store.is_synced());
    }

    #[tokio::test]
    async fn wait_for_sync_times_out_when_never_synced() {
        let store = ConfigStore::new();
        let result = store.wait_for_sync(Duration::from_millis(10)).await;
        assert!(matches!(result, Err(Error::Internal { .. })));
    }

    #[tokio::test]
    async fn wait_for_sync_returns_once_initial_list_lands() {
        let store = Arc::new(ConfigStore::new());
        let feeder = store.clone();
        tokio::spawn(async move {
            feeder.handle_event(Event::Init);
            feeder.handle_event(Event::InitDone);
        });

        store
            .wait_for_sync(Duration::from_secs(5))
            .await
            .expect("store should sync");
    }

    #[test]
    fn concurrent_readers_see_completed_writes() {
        let store = Arc::new(ConfigStore::new());
        store.apply(&catalog("browsers", &[("chrome", "144.0", "chrome:144")]));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        assert!(store.get("selenosis", "chrome", "144.0").is_some());
                    }
                })
            })
            .collect();
        for r in readers {
            r.join().unwrap();
        }
    }
}
