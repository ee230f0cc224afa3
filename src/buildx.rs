//! `docker buildx` invocation and the metadata bake leaves behind.

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info, warn};
use rand::RngExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::recipe::INDEX_TARGET_PREFIX;
use crate::summary::{BuildSummary, VariantSummary, INDEX_SUMMARY_NAME};

/// Replaces `docker buildx` with another executable.
pub const BUILDX_COMMAND_ENV: &str = "IMAGINE_BUILDX_COMMAND";
pub const BUILDX_CONFIG_ENV: &str = "BUILDX_CONFIG";

const BUILDX_CONFIG_DIR: &str = "buildx_config";
const BUILDER_NAME_PREFIX: &str = "imagine_";

pub struct Buildx {
    pub builder: String,
    pub platforms: Vec<String>,
    program: Vec<OsString>,
    config_dir: PathBuf,
    managed_builder: bool,
}

impl Buildx {
    /// Uses `$IMAGINE_BUILDX_COMMAND` when set, `docker buildx` otherwise.
    pub fn new(state_dir: &Path) -> Self {
        let program = match env::var_os(BUILDX_COMMAND_ENV) {
            Some(command) if !command.is_empty() => {
                debug!("Using {:?} in place of docker buildx", command);
                vec![command]
            }
            _ => vec![OsString::from("docker"), OsString::from("buildx")],
        };
        Self::with_program(state_dir, program)
    }

    pub fn with_program(state_dir: &Path, program: Vec<OsString>) -> Self {
        Self {
            builder: String::new(),
            platforms: Vec::new(),
            program,
            config_dir: state_dir.join(BUILDX_CONFIG_DIR),
            managed_builder: false,
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    fn command(&self, subcommand: &str) -> Result<Command> {
        let (program, prefix) = self
            .program
            .split_first()
            .ok_or_else(|| anyhow!("no buildx command configured"))?;

        let mut cmd = Command::new(program);
        cmd.args(prefix).arg(subcommand);
        if self.managed_builder {
            cmd.env(BUILDX_CONFIG_ENV, &self.config_dir);
        }
        Ok(cmd)
    }

    /// Runs `cmd`, returning its exit code. Only a failure to start is an error.
    fn run(&self, mut cmd: Command) -> Result<Option<i32>> {
        debug!("Running {:?}", cmd);
        let status = cmd
            .status()
            .with_context(|| format!("Failed to execute {:?}", cmd.get_program()))?;
        Ok(status.code())
    }

    fn run_checked(&self, cmd: Command, what: &str) -> Result<()> {
        match self.run(cmd)? {
            Some(0) => Ok(()),
            Some(code) => bail!("{} failed with exit code {}", what, code),
            None => bail!("{} was terminated by a signal", what),
        }
    }

    /// Picks the builder for this run.
    ///
    /// An `existing` builder is used as is. Otherwise a builder is managed in
    /// the state dir: reused when one is there and healthy, created if not.
    pub fn init_builder(&mut self, existing: Option<&str>) -> Result<()> {
        if let Some(builder) = existing.filter(|builder| !builder.is_empty()) {
            self.builder = builder.to_string();
            return Ok(());
        }

        self.managed_builder = true;
        if self.use_existing()? {
            return Ok(());
        }

        self.builder = make_builder_name();
        self.create()
    }

    fn find_existing(&self) -> Result<Option<PathBuf>> {
        let instances = self.config_dir.join("instances");
        if !instances.is_dir() {
            debug!("No builder instances in {}", instances.display());
            return Ok(None);
        }

        let mut matches = Vec::new();
        for entry in fs::read_dir(&instances)
            .with_context(|| format!("Failed to read {}", instances.display()))?
        {
            let entry = entry?;
            if entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(BUILDER_NAME_PREFIX))
            {
                matches.push(entry.path());
            }
        }

        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop()),
            _ => bail!("found too many matching existing builders: {:?}", matches),
        }
    }

    fn use_existing(&mut self) -> Result<bool> {
        let Some(desc_path) = self.find_existing()? else {
            return Ok(false);
        };
        self.builder = desc_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string();

        let mut inspect = self.command("inspect")?;
        inspect.args(["--bootstrap", self.builder.as_str()]);
        match self.run(inspect)? {
            Some(0) => {}
            Some(1) => {
                info!(
                    "Existing builder {:?} cannot be used, replacing it",
                    self.builder
                );
                if let Err(err) = self.remove(&desc_path) {
                    warn!("Failed to clean up builder {:?}: {:#}", self.builder, err);
                }
                return Ok(false);
            }
            code => bail!(
                "failed to check if builder {:?} exists (exit code {:?})",
                self.builder,
                code
            ),
        }

        let mut use_cmd = self.command("use")?;
        use_cmd.arg(&self.builder);
        self.run_checked(use_cmd, &format!("using builder {:?}", self.builder))?;
        info!("Using existing builder {:?}", self.builder);
        Ok(true)
    }

    fn create(&self) -> Result<()> {
        let mut cmd = self.command("create")?;
        cmd.args(["--use", "--name", self.builder.as_str()]);
        if !self.platforms.is_empty() {
            cmd.args(["--platform", self.platforms.join(",").as_str()]);
        }
        self.run_checked(cmd, &format!("creating builder {:?}", self.builder))?;
        info!("Created builder {:?}", self.builder);
        Ok(())
    }

    fn remove(&self, desc_path: &Path) -> Result<()> {
        let mut cmd = self.command("rm")?;
        cmd.arg(&self.builder);
        self.run_checked(cmd, &format!("removing builder {:?}", self.builder))?;
        if desc_path.exists() {
            fs::remove_dir_all(desc_path)
                .or_else(|_| fs::remove_file(desc_path))
                .with_context(|| format!("Failed to remove {}", desc_path.display()))?;
        }
        Ok(())
    }

    /// `buildx bake --file {file} --builder {builder} {args...}`, with output
    /// going straight to the terminal.
    pub fn bake(&self, file: &Path, args: &[String]) -> Result<()> {
        let mut cmd = self.command("bake")?;
        cmd.arg("--file")
            .arg(file)
            .args(["--builder", self.builder.as_str()])
            .args(args);
        self.run_checked(cmd, "buildx bake")
    }
}

const BUILDER_NAME_HEX_LEN: usize = 12;

fn make_builder_name() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..BUILDER_NAME_HEX_LEN)
        .map(|_| format!("{:x}", rng.random_range(0..16u8)))
        .collect();
    format!("{}{}", BUILDER_NAME_PREFIX, suffix)
}

/// Per-target results from `bake --metadata-file`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BakeMetadata(pub BTreeMap<String, BakeImageMetadata>);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BakeImageMetadata {
    #[serde(rename = "containerimage.config.digest", default)]
    pub config_digest: String,
    #[serde(rename = "containerimage.digest", default)]
    pub digest: String,
    /// Comma-separated.
    #[serde(rename = "image.name", default)]
    pub registry_refs: String,
}

impl BakeMetadata {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read bake metadata {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse bake metadata {}", path.display()))
    }

    /// Summary for image `name`. Targets without an image digest, such as
    /// test targets, are left out.
    pub fn to_build_summary(&self, name: &str) -> BuildSummary {
        let mut summary = BuildSummary::new(name);
        let index_target = format!("{}{}", INDEX_TARGET_PREFIX, name);
        let variant_prefix = format!("{}-", name);

        for (target, metadata) in &self.0 {
            if metadata.digest.is_empty() {
                continue;
            }

            let variant = if *target == index_target {
                Some(INDEX_SUMMARY_NAME.to_string())
            } else if target == name {
                None
            } else {
                Some(
                    target
                        .strip_prefix(&variant_prefix)
                        .unwrap_or(target)
                        .to_string(),
                )
            };

            summary.variants.push(VariantSummary {
                name: variant,
                digest: metadata.digest.clone(),
                registry_refs: metadata
                    .registry_refs
                    .split(',')
                    .filter(|reference| !reference.is_empty())
                    .map(str::to_string)
                    .collect(),
            });
        }
        summary
    }
}
