//! CRD installation utilities
//!
//! The operator installs its own CRDs on startup using server-side apply, so
//! the stored schema always matches the running binary. `--crd` prints the
//! same manifests instead.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use selenosis_common::crd::{Browser, BrowserConfig};
use selenosis_common::FIELD_MANAGER;

/// CRD definition with name and resource
struct CrdDef {
    name: &'static str,
    crd: CustomResourceDefinition,
}

fn selenosis_crds() -> Vec<CrdDef> {
    vec![
        CrdDef {
            name: "browsers.selenosis.io",
            crd: Browser::crd(),
        },
        CrdDef {
            name: "browserconfigs.selenosis.io",
            crd: BrowserConfig::crd(),
        },
    ]
}

/// Install (or update) the Browser and BrowserConfig CRDs
pub async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for def in selenosis_crds() {
        tracing::info!("Installing {} CRD...", def.name);
        crds.patch(def.name, &params, &Patch::Apply(&def.crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", def.name, e))?;
    }

    tracing::info!("Selenosis CRDs installed/updated");
    Ok(())
}

/// Both CRDs as a multi-document YAML stream
pub fn crd_manifests() -> anyhow::Result<String> {
    let mut out = String::new();
    for def in selenosis_crds() {
        let yaml = serde_yaml::to_string(&def.crd)
            .map_err(|e| anyhow::anyhow!("failed to serialize {} CRD: {}", def.name, e))?;
        out.push_str("---\n");
        out.push_str(&yaml);
    }
    Ok(out)
}
