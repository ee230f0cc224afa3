//! The bake file handed to `docker buildx bake`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

/// Group every run builds.
pub const DEFAULT_GROUP: &str = "default";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BakeManifest {
    #[serde(default)]
    pub group: BTreeMap<String, BakeGroup>,
    #[serde(default)]
    pub target: BTreeMap<String, BakeTarget>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BakeGroup {
    #[serde(default)]
    pub targets: Vec<String>,
}

/// One buildx target. Field order matches what bake itself prints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BakeTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
    #[serde(
        rename = "dockerfile-inline",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub dockerfile_inline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platforms: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output: Vec<String>,
}

impl BakeManifest {
    /// Manifest with an empty default group.
    pub fn new() -> Self {
        let mut group = BTreeMap::new();
        group.insert(DEFAULT_GROUP.to_string(), BakeGroup::default());
        Self {
            group,
            target: BTreeMap::new(),
        }
    }

    /// Adds a target and appends it to the default group.
    pub fn push_target(&mut self, name: String, target: BakeTarget) {
        self.group
            .entry(DEFAULT_GROUP.to_string())
            .or_default()
            .targets
            .push(name.clone());
        self.target.insert(name, target);
    }

    /// Target names in build order: group members first, in group order,
    /// then anything no group mentions.
    pub fn target_names(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut names = Vec::with_capacity(self.target.len());

        let grouped = self.group.values().flat_map(|group| group.targets.iter());
        for name in grouped.chain(self.target.keys()) {
            if self.target.contains_key(name) && seen.insert(name.as_str()) {
                names.push(name.as_str());
            }
        }
        names
    }

    /// Every registry tag across all targets, in build order.
    pub fn registry_tags(&self) -> Vec<String> {
        self.target_names()
            .into_iter()
            .filter_map(|name| self.target.get(name))
            .flat_map(|target| target.tags.iter().cloned())
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize bake manifest")
    }

    pub fn from_json(data: &str) -> Result<Self> {
        serde_json::from_str(data).context("Failed to parse bake manifest")
    }

    pub fn write_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        fs::write(path, self.to_json()?)
            .with_context(|| format!("Failed to write bake manifest {}", path.display()))
    }
}
