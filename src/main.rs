use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{debug, info};
use std::env;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use imagine::config;
use imagine::{
    forced_rebuild_reason, BakeMetadata, Buildx, ConfigError, GitRepo, ImagineRecipe, Notifier,
    Rebuilder, RegistryClient, SuffixPolicy, SummaryFormat,
};

/// Where managed builders and generated manifests live, under the repository top level.
const STATE_DIR: &str = ".imagine";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Verbose mode (-v for info, -vv for debug, -vvv for trace). Also switches to text-based progress"
    )]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a bake manifest from a build config
    Generate(GenerateArgs),
    /// Build and test images from a build config, skipping images already in the registry
    Build(BuildArgs),
}

#[derive(Args)]
struct CommonArgs {
    #[arg(long, help = "Path to build config file")]
    config: PathBuf,

    #[arg(long = "registry", help = "Registry prefix to use for tags (repeatable)")]
    registries: Vec<String>,

    #[arg(
        long,
        default_value = "origin/master",
        help = "Upstream branch of the repository"
    )]
    upstream_branch: String,

    #[arg(long, help = "Exclude '-dev' and '-wip' suffixes from image tags")]
    without_tag_suffix: bool,

    #[arg(long, help = "Push images to registries (if any registries are given)")]
    push: bool,

    #[arg(long, help = "Export images to OCI tarballs named 'image-<target>.oci'")]
    export: bool,

    #[arg(long, help = "Directory for exported tarballs [default: current directory]")]
    export_dir: Option<PathBuf>,

    #[arg(
        long = "platform",
        default_value = "linux/amd64",
        help = "Platform to target (repeatable)"
    )]
    platforms: Vec<String>,

    #[arg(long, help = "Keep generated manifest files for debugging")]
    debug: bool,
}

#[derive(Args)]
struct GenerateArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long, help = "Write the manifest to this file instead of the state directory")]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct BuildArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long, help = "Use an existing buildx builder instead of a managed one")]
    builder: Option<String>,

    #[arg(long, help = "Rebuild even if images are present in the registry")]
    force: bool,

    #[arg(long, help = "Do not use the build cache")]
    no_cache: bool,

    #[arg(long, value_enum, default_value = "auto", help = "Build summary format")]
    summary_format: SummaryFormat,

    #[arg(
        long,
        default_value = "-",
        help = "Write build summary to '-' (stdout) or a file"
    )]
    summary_output: String,
}

impl CommonArgs {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.export && self.push {
            return Err(ConfigError::ExportWithPush);
        }
        Ok(())
    }

    fn suffixes(&self) -> SuffixPolicy {
        if self.without_tag_suffix {
            SuffixPolicy::disabled()
        } else {
            SuffixPolicy::new(&self.upstream_branch)
        }
    }

    /// Opens the repository around the working directory and loads the
    /// config into a recipe rooted at the repository top level.
    fn recipe(&self, notifier: &Notifier) -> Result<(ImagineRecipe<GitRepo>, PathBuf)> {
        let cwd = env::current_dir().context("Failed to get current directory")?;

        notifier.step("Opening repository");
        let repo = GitRepo::open(&cwd)?;
        let top_level = repo.top_level().to_path_buf();

        notifier.step("Loading build config");
        let config_file = cwd.join(&self.config);
        let (config, data) = config::load(&config_file)?;
        let config_path = repo.relative_path(&config_file)?;
        debug!("Loaded config {}: {:#?}", config_path, config);

        let mut recipe = ImagineRecipe::new(top_level.clone(), config_path, data, config.spec, repo);
        recipe.platforms = self.platforms.clone();
        recipe.push = self.push;
        recipe.export = self.export;
        recipe.export_dir = self.export_dir.clone().unwrap_or(cwd);
        recipe.suffixes = self.suffixes();

        Ok((recipe, top_level.join(STATE_DIR)))
    }
}

fn run_generate(args: &GenerateArgs, notifier: &Notifier) -> Result<()> {
    args.common.validate()?;
    let (recipe, state_dir) = args.common.recipe(notifier)?;
    let registries = &args.common.registries;

    notifier.step("Computing tags");
    let manifest = recipe.to_bake_manifest(registries)?;
    notifier.finish();
    println!("current registry refs: {}", manifest.registry_tags().join(", "));

    let path = match &args.output {
        Some(output) => {
            let output = env::current_dir()
                .context("Failed to get current directory")?
                .join(output);
            recipe.write_manifest_file(manifest, &output)?;
            output
        }
        None => {
            let written = recipe.write_manifest(manifest, &state_dir)?;
            let path = written.manifest_path.clone();
            written.keep();
            path
        }
    };
    println!("written manifest {}", path.display());
    Ok(())
}

fn run_build(args: &BuildArgs, notifier: &Notifier) -> Result<()> {
    let common = &args.common;
    common.validate()?;
    let (recipe, state_dir) = common.recipe(notifier)?;
    let registries = &common.registries;

    notifier.step("Computing tags");
    let manifest = recipe.to_bake_manifest(registries)?;
    println!("current registry refs: {}", manifest.registry_tags().join(", "));

    let (rebuild, reason) = match forced_rebuild_reason(args.force, common.export) {
        Some(reason) => (true, reason.to_string()),
        None => {
            notifier.step("Checking registry");
            let rebuilder = Rebuilder::new(
                RegistryClient::new()?,
                &recipe.suffixes.branched_off_suffix,
                &recipe.suffixes.work_in_progress_suffix,
            );
            rebuilder.should_rebuild(&manifest)?
        }
    };

    if !rebuild {
        notifier.finish();
        println!("no need to rebuild");
        return Ok(());
    }
    println!("{}", reason);

    let written = recipe.write_manifest(manifest, &state_dir)?;

    notifier.step("Preparing builder");
    let mut buildx = Buildx::new(&state_dir);
    buildx.platforms = common.platforms.clone();
    buildx.init_builder(args.builder.as_deref())?;

    let mut bake_args = vec![
        "--metadata-file".to_string(),
        written.metadata_path.display().to_string(),
    ];
    if args.no_cache {
        bake_args.push("--no-cache".to_string());
    }

    notifier.step("Building");
    notifier.suspend(|| buildx.bake(&written.manifest_path, &bake_args))?;
    notifier.finish();

    let summary = BakeMetadata::load(&written.metadata_path)?.to_build_summary(&recipe.spec.name);
    write_summary(&summary, args.summary_format, &args.summary_output)?;

    if common.debug {
        let dir = written.keep();
        println!("keeping {} for debugging", dir.display());
    }
    Ok(())
}

fn write_summary(
    summary: &imagine::BuildSummary,
    format: SummaryFormat,
    output: &str,
) -> Result<()> {
    if output == "-" {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        summary.write(format.resolve(None), &mut handle)?;
        return handle.flush().context("Failed to write summary");
    }

    let path = Path::new(output);
    let mut file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    summary.write(format.resolve(Some(path)), &mut file)?;
    info!("Wrote build summary to {}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let notifier = Notifier::new(cli.verbose);

    match &cli.command {
        Command::Generate(args) => run_generate(args, &notifier),
        Command::Build(args) => run_build(args, &notifier),
    }
}
