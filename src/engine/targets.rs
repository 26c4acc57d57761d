use crate::model::ProbeKind;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_RESOLVERS: &[&str] = &[
    "178.22.122.100",
    "185.51.200.2",
    "192.104.158.78",
    "194.104.158.48",
    "172.29.0.100",
    "172.29.2.100",
    "10.202.10.202",
    "10.202.10.102",
    "185.55.226.26",
    "185.55.225.25",
    "10.202.10.10",
    "10.202.10.11",
    "37.27.41.228",
    "87.107.52.11",
    "87.107.52.13",
    "5.202.100.100",
    "5.202.100.101",
    "94.103.125.157",
    "94.103.125.158",
    "8.8.8.8",
    "8.8.4.4",
    "1.1.1.1",
    "1.0.0.1",
    "9.9.9.9",
    "149.112.112.112",
];

const DEFAULT_REGISTRIES: &[&str] = &[
    "docker.arvancloud.ir",
    "focker.ir",
    "docker.iranserver.com",
    "docker.haiocloud.com",
    "registry.docker.ir",
    "docker.mobinhost.com",
    "hub.hamdocker.ir",
    "docker.kernel.ir",
    "mirror.gcr.io",
];

/// Targets each probe kind runs against. The list length is the expected result count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetCatalog {
    pub resolvers: Vec<String>,
    pub registries: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    resolvers: Vec<String>,
    #[serde(default)]
    registries: Vec<String>,
}

impl Default for TargetCatalog {
    fn default() -> Self {
        Self {
            resolvers: DEFAULT_RESOLVERS.iter().map(|s| s.to_string()).collect(),
            registries: DEFAULT_REGISTRIES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl TargetCatalog {
    /// Load the catalog from `path`, or from the user config dir when no path is given.
    /// A missing default file yields the built-in lists; an explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match default_catalog_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };
        if !explicit && !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("read target catalog {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("parse target catalog {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(raw)?;
        let defaults = Self::default();
        Ok(Self {
            resolvers: dedup_or(file.resolvers, defaults.resolvers),
            registries: dedup_or(file.registries, defaults.registries),
        })
    }

    pub fn targets(&self, kind: ProbeKind) -> &[String] {
        match kind {
            ProbeKind::ResolverReachability | ProbeKind::DownloadThroughput => &self.resolvers,
            ProbeKind::RegistryThroughput => &self.registries,
        }
    }

    pub fn expected_count(&self, kind: ProbeKind) -> usize {
        self.targets(kind).len()
    }
}

fn default_catalog_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("bargozin").join("targets.json"))
}

fn dedup_or(list: Vec<String>, fallback: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(list.len());
    for item in list {
        let item = item.trim().to_string();
        if !item.is_empty() && !out.contains(&item) {
            out.push(item);
        }
    }
    if out.is_empty() {
        fallback
    } else {
        out
    }
}
