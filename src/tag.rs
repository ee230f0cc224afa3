//! Deterministic image tags derived from repository state.
//!
//! A tag is built from one of three sources, picked by [`TagMode`]:
//!
//! | mode            | unnamed variant         | variant `foo`               |
//! |-----------------|-------------------------|-----------------------------|
//! | `GitTreeHash`   | `{config6}.{context6}`  | `foo.{config6}.{context6}`  |
//! | `GitCommitHash` | `{commit6}`             | `foo.{commit6}`             |
//! | `GitTagSemVer`  | `v{version}`            | `foo.v{version}`            |
//!
//! The first two get a suffix appended when HEAD has diverged from the base
//! branch (`-dev`) and/or when the config or context has uncommitted changes
//! (`-wip`). Semver tags refuse to be made at all in that state.

use anyhow::{bail, Result};
use log::debug;
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::vcs::RepoQuery;

pub const BRANCHED_OFF_SUFFIX: &str = "-dev";
pub const WORK_IN_PROGRESS_SUFFIX: &str = "-wip";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TagMode {
    /// Content hashes of the config file and build context.
    #[default]
    GitTreeHash,
    /// Hash of the HEAD commit.
    GitCommitHash,
    /// Highest semantic version tag at HEAD.
    GitTagSemVer,
}

impl fmt::Display for TagMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TagMode::GitTreeHash => "GitTreeHash",
            TagMode::GitCommitHash => "GitCommitHash",
            TagMode::GitTagSemVer => "GitTagSemVer",
        };
        f.write_str(name)
    }
}

impl FromStr for TagMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GitTreeHash" => Ok(TagMode::GitTreeHash),
            "GitCommitHash" => Ok(TagMode::GitCommitHash),
            "GitTagSemVer" => Ok(TagMode::GitTagSemVer),
            other => Err(ConfigError::UnknownTagMode(other.to_string())),
        }
    }
}

/// Which drift markers to append to tags. An empty suffix disables its check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuffixPolicy {
    pub base_branch: String,
    pub branched_off_suffix: String,
    pub work_in_progress_suffix: String,
}

impl SuffixPolicy {
    /// `-dev` and `-wip` against `base_branch`.
    pub fn new(base_branch: &str) -> Self {
        Self {
            base_branch: base_branch.to_string(),
            branched_off_suffix: BRANCHED_OFF_SUFFIX.to_string(),
            work_in_progress_suffix: WORK_IN_PROGRESS_SUFFIX.to_string(),
        }
    }

    /// No suffixes and no repository queries for them.
    pub fn disabled() -> Self {
        Self {
            base_branch: String::new(),
            branched_off_suffix: String::new(),
            work_in_progress_suffix: String::new(),
        }
    }
}

impl Default for SuffixPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Drift suffix for a build: branched-off first, then work-in-progress.
pub fn compute_suffix<R: RepoQuery + ?Sized>(
    repo: &R,
    policy: &SuffixPolicy,
    config_path: &str,
    context_path: &str,
) -> Result<String> {
    let mut suffix = String::new();

    if !policy.branched_off_suffix.is_empty() && repo.has_diverged_from(&policy.base_branch)? {
        suffix.push_str(&policy.branched_off_suffix);
    }

    if !policy.work_in_progress_suffix.is_empty() {
        // Both are queried so neither error is hidden by the other
        let config_wip = repo.has_uncommitted_changes(config_path)?;
        let context_wip = repo.has_uncommitted_changes(context_path)?;
        if config_wip || context_wip {
            suffix.push_str(&policy.work_in_progress_suffix);
        }
    }

    Ok(suffix)
}

/// Computes the tag for `variant` (`""` for the unnamed one).
///
/// `config_path` and `context_path` are repository-relative.
pub fn compute_tag<R: RepoQuery + ?Sized>(
    repo: &R,
    mode: TagMode,
    policy: &SuffixPolicy,
    variant: &str,
    config_path: &str,
    context_path: &str,
) -> Result<String> {
    let suffix = compute_suffix(repo, policy, config_path, context_path)?;

    let base = match mode {
        TagMode::GitTreeHash => {
            let config_hash = repo.content_hash(config_path, true)?;
            let context_hash = repo.content_hash(context_path, true)?;
            format!("{}.{}", config_hash, context_hash)
        }
        TagMode::GitCommitHash => repo.revision_hash(true)?,
        TagMode::GitTagSemVer => {
            if !suffix.is_empty() {
                bail!("cannot use tag because of {:?} suffix", suffix);
            }
            format!("v{}", repo.highest_semver_tag(false)?)
        }
    };

    let tag = if variant.is_empty() {
        format!("{}{}", base, suffix)
    } else {
        format!("{}.{}{}", variant, base, suffix)
    };
    debug!("Computed {} tag {:?} for variant {:?}", mode, tag, variant);
    Ok(tag)
}
