//! Turns a build spec into a bake manifest.
//!
//! Every variant becomes a main target named `{name}` or `{name}-{variant}`,
//! preceded by a `-test` target when testing is enabled. Specs with variants
//! also get an index target, `index-{name}`, tagged by commit and built from a
//! small JSON document listing every variant's refs.

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::config::{BuildSpec, ResolvedInstructions, API_VERSION, INDEX_VARIANT_NAME};
use crate::manifest::{BakeManifest, BakeTarget};
use crate::tag::{compute_tag, SuffixPolicy, TagMode};
use crate::vcs::RepoQuery;

pub const SCHEMA_VERSION: &str = API_VERSION;

pub const SCHEMA_VERSION_LABEL: &str = "com.github.errordeveloper.imagine.schemaVersion";
pub const BUILD_CONFIG_DATA_LABEL: &str = "com.github.errordeveloper.imagine.buildConfig.Data";
pub const BUILD_CONFIG_TREE_HASH_LABEL: &str =
    "com.github.errordeveloper.imagine.buildConfig.TreeHash";
pub const CONTEXT_TREE_HASH_LABEL: &str = "com.github.errordeveloper.imagine.context.TreeHash";
pub const INDEX_SCHEMA_VERSION_LABEL: &str =
    "com.github.errordeveloper.imagine.indexSchemaVersion";

pub const TEST_STAGE_NAME: &str = "test";
pub const TEST_TARGET_SUFFIX: &str = "-test";
pub const INDEX_TARGET_PREFIX: &str = "index-";

pub struct ImagineRecipe<R: RepoQuery> {
    /// Repository top level; context and dockerfile paths resolve against it.
    pub work_dir: PathBuf,
    pub platforms: Vec<String>,
    /// Config file path, relative to `work_dir`.
    pub config_path: String,
    /// Base64 of the raw config file.
    pub config_data: String,
    pub push: bool,
    pub export: bool,
    pub export_dir: PathBuf,
    pub spec: BuildSpec,
    pub repo: R,
    pub suffixes: SuffixPolicy,
}

/// Contents of `index.json` inside the index image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    pub schema_version: String,
    pub name: String,
    pub variants: Vec<ImageIndexEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndexEntry {
    pub name: String,
    pub target: String,
    pub registry_refs: Vec<String>,
}

/// A manifest written to a fresh `build-*` directory under the state dir.
///
/// The directory is removed on drop unless [`WrittenManifest::keep`] is called.
pub struct WrittenManifest {
    pub manifest: BakeManifest,
    pub manifest_path: PathBuf,
    pub metadata_path: PathBuf,
    dir: TempDir,
}

impl WrittenManifest {
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Leaves the directory on disk and returns its path.
    pub fn keep(self) -> PathBuf {
        self.dir.keep()
    }
}

impl<R: RepoQuery> ImagineRecipe<R> {
    pub fn new(
        work_dir: PathBuf,
        config_path: String,
        config_data: String,
        spec: BuildSpec,
        repo: R,
    ) -> Self {
        Self {
            export_dir: work_dir.clone(),
            work_dir,
            platforms: Vec::new(),
            config_path,
            config_data,
            push: false,
            export: false,
            spec,
            repo,
            suffixes: SuffixPolicy::disabled(),
        }
    }

    pub fn index_target_name(&self) -> String {
        format!("{}{}", INDEX_TARGET_PREFIX, self.spec.name)
    }

    fn index_file_name(&self) -> String {
        format!("{}.json", self.index_target_name())
    }

    fn main_target_name(&self, variant: &str) -> String {
        if variant.is_empty() {
            self.spec.name.clone()
        } else {
            format!("{}-{}", self.spec.name, variant)
        }
    }

    /// `{registry}/{name}:{tag}` for every registry, in the order given.
    pub fn registry_tags(
        &self,
        variant: &str,
        context_dir: &str,
        registries: &[String],
    ) -> Result<Vec<String>> {
        let mode = self.spec.tag_mode()?;
        self.tags_with(mode, &self.suffixes, variant, context_dir, registries)
    }

    fn tags_with(
        &self,
        mode: TagMode,
        suffixes: &SuffixPolicy,
        variant: &str,
        context_dir: &str,
        registries: &[String],
    ) -> Result<Vec<String>> {
        let tag = compute_tag(
            &self.repo,
            mode,
            suffixes,
            variant,
            &self.config_path,
            context_dir,
        )
        .with_context(|| format!("unable to make image tag for image {:?}", self.spec.name))?;

        Ok(registries
            .iter()
            .map(|registry| format!("{}/{}:{}", registry, self.spec.name, tag))
            .collect())
    }

    fn outputs(&self, target_name: &str, push: bool) -> Vec<String> {
        // buildx accepts a single output per target
        if self.export {
            let dest = self.export_dir.join(format!("image-{}.oci", target_name));
            vec![format!("type=docker,dest={}", dest.display())]
        } else {
            vec![format!("type=image,push={}", push)]
        }
    }

    fn new_target(&self, with: &ResolvedInstructions) -> BakeTarget {
        BakeTarget {
            context: Some(with.context_path(&self.work_dir).display().to_string()),
            dockerfile: with
                .dockerfile_path(&self.work_dir)
                .map(|path| path.display().to_string()),
            dockerfile_inline: Some(with.dockerfile.body.clone()).filter(|body| !body.is_empty()),
            args: with.args.clone(),
            secrets: with.secrets.iter().map(ToString::to_string).collect(),
            platforms: self.platforms.clone(),
            ..Default::default()
        }
    }

    fn variant_targets(
        &self,
        variant: &str,
        with: &ResolvedInstructions,
        registries: &[String],
    ) -> Result<Vec<(String, BakeTarget)>> {
        let main_name = self.main_target_name(variant);
        let mut main = self.new_target(with);

        if !with.untagged {
            main.tags = self.registry_tags(variant, &with.dir, registries)?;
        }
        main.target = with.target.clone();

        let mut labels = with.labels.clone();
        labels.insert(SCHEMA_VERSION_LABEL.to_string(), SCHEMA_VERSION.to_string());
        labels.insert(
            BUILD_CONFIG_DATA_LABEL.to_string(),
            self.config_data.clone(),
        );
        labels.insert(
            BUILD_CONFIG_TREE_HASH_LABEL.to_string(),
            self.repo.content_hash(&self.config_path, false)?,
        );
        labels.insert(
            CONTEXT_TREE_HASH_LABEL.to_string(),
            self.repo.content_hash(&with.dir, false)?,
        );
        main.labels = labels;

        let push = self.push && !registries.is_empty() && !with.untagged;
        main.output = self.outputs(&main_name, push);

        let mut targets = Vec::with_capacity(2);
        if with.test {
            let mut test = self.new_target(with);
            test.target = Some(TEST_STAGE_NAME.to_string());
            targets.push((format!("{}{}", main_name, TEST_TARGET_SUFFIX), test));
        }
        targets.push((main_name, main));
        Ok(targets)
    }

    fn index_target(&self, registries: &[String]) -> Result<BakeTarget> {
        let tags = self.tags_with(
            TagMode::GitCommitHash,
            &SuffixPolicy::disabled(),
            INDEX_VARIANT_NAME,
            &self.config_path,
            registries,
        )?;

        let mut labels = BTreeMap::new();
        labels.insert(SCHEMA_VERSION_LABEL.to_string(), SCHEMA_VERSION.to_string());
        labels.insert(
            BUILD_CONFIG_DATA_LABEL.to_string(),
            self.config_data.clone(),
        );
        labels.insert(
            INDEX_SCHEMA_VERSION_LABEL.to_string(),
            SCHEMA_VERSION.to_string(),
        );

        let push = self.push && !registries.is_empty();
        Ok(BakeTarget {
            context: Some(String::new()),
            dockerfile_inline: Some(format!(
                "FROM scratch\nCOPY {} /index.json\n",
                self.index_file_name()
            )),
            labels,
            tags,
            platforms: self.platforms.clone(),
            output: self.outputs(&self.index_target_name(), push),
            ..Default::default()
        })
    }

    /// Assembles the full manifest: index target first when there are
    /// variants, then each variant's test and main targets.
    pub fn to_bake_manifest(&self, registries: &[String]) -> Result<BakeManifest> {
        let variants = self.spec.resolved_variants()?;
        let mut manifest = BakeManifest::new();

        if !self.spec.variants.is_empty() {
            manifest.push_target(self.index_target_name(), self.index_target(registries)?);
        }

        for (variant, with) in &variants {
            for (name, target) in self.variant_targets(variant, with, registries)? {
                debug!("Adding target {} with {} tag(s)", name, target.tags.len());
                manifest.push_target(name, target);
            }
        }

        Ok(manifest)
    }

    /// Index document for `manifest`, or `None` when it has no index target.
    pub fn image_index(&self, manifest: &BakeManifest) -> Option<ImageIndex> {
        if !manifest.target.contains_key(&self.index_target_name()) {
            return None;
        }

        let variants = self
            .spec
            .variants
            .iter()
            .filter_map(|variant| {
                let target = self.main_target_name(&variant.name);
                manifest.target.get(&target).map(|main| ImageIndexEntry {
                    name: variant.name.clone(),
                    registry_refs: main.tags.clone(),
                    target,
                })
            })
            .collect();

        Some(ImageIndex {
            schema_version: SCHEMA_VERSION.to_string(),
            name: self.spec.name.clone(),
            variants,
        })
    }

    /// Writes `index-{name}.json` into `dir` and points the index target's
    /// context at `dir`. Manifests without an index target are left alone.
    pub fn write_index(&self, manifest: &mut BakeManifest, dir: &Path) -> Result<()> {
        let Some(index) = self.image_index(manifest) else {
            return Ok(());
        };

        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        let index_path = dir.join(self.index_file_name());
        let data = serde_json::to_string_pretty(&index).context("Failed to serialize image index")?;
        fs::write(&index_path, data)
            .with_context(|| format!("Failed to write {}", index_path.display()))?;
        debug!("Wrote image index to {}", index_path.display());

        if let Some(target) = manifest.target.get_mut(&self.index_target_name()) {
            target.context = Some(dir.display().to_string());
        }
        Ok(())
    }

    /// Writes `manifest` to `path`, with the index document beside it.
    pub fn write_manifest_file(
        &self,
        mut manifest: BakeManifest,
        path: &Path,
    ) -> Result<BakeManifest> {
        let dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        self.write_index(&mut manifest, dir)?;
        manifest.write_file(path)?;
        info!("Wrote bake manifest to {}", path.display());
        Ok(manifest)
    }

    /// Writes `buildx-{name}.json` (and `index-{name}.json` when needed) into
    /// a new `build-*` directory under `state_dir`.
    pub fn write_manifest(
        &self,
        manifest: BakeManifest,
        state_dir: &Path,
    ) -> Result<WrittenManifest> {
        fs::create_dir_all(state_dir)
            .with_context(|| format!("Failed to create directory {}", state_dir.display()))?;
        let dir = tempfile::Builder::new()
            .prefix("build-")
            .tempdir_in(state_dir)
            .context("Failed to create temporary directory")?;

        let manifest_path = dir.path().join(format!("buildx-{}.json", self.spec.name));
        let manifest = self.write_manifest_file(manifest, &manifest_path)?;

        Ok(WrittenManifest {
            manifest,
            metadata_path: dir.path().join(format!("buildx-{}.metadata.json", self.spec.name)),
            manifest_path,
            dir,
        })
    }
}
