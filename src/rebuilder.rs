use anyhow::Result;
use log::{debug, warn};

use crate::error::DigestError;
use crate::manifest::BakeManifest;
use crate::registry::DigestLookup;

/// What to do when the registry cannot say whether an image exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RegistryErrorPolicy {
    /// Treat the image as missing and rebuild.
    #[default]
    Rebuild,
    /// Fail the decision with the registry error.
    Abort,
}

/// Reason for a rebuild that no registry answer could avoid, if any.
/// `force` takes precedence over `export`.
pub fn forced_rebuild_reason(force: bool, export: bool) -> Option<&'static str> {
    if force {
        Some("forcing image rebuild due to force option being set")
    } else if export {
        Some("forcing image rebuild due to export option being set")
    } else {
        None
    }
}

/// Decides whether a fully tagged manifest needs building at all.
pub struct Rebuilder<D: DigestLookup> {
    pub registry: D,
    pub branched_off_suffix: String,
    pub work_in_progress_suffix: String,
    pub error_policy: RegistryErrorPolicy,
}

impl<D: DigestLookup> Rebuilder<D> {
    pub fn new(registry: D, branched_off_suffix: &str, work_in_progress_suffix: &str) -> Self {
        Self {
            registry,
            branched_off_suffix: branched_off_suffix.to_string(),
            work_in_progress_suffix: work_in_progress_suffix.to_string(),
            error_policy: RegistryErrorPolicy::default(),
        }
    }

    /// Most specific first, so `-dev-wip` wins over `-dev` and `-wip`.
    fn suffixes(&self) -> [String; 3] {
        [
            format!("{}{}", self.branched_off_suffix, self.work_in_progress_suffix),
            self.branched_off_suffix.clone(),
            self.work_in_progress_suffix.clone(),
        ]
    }

    /// Returns whether to rebuild and why. Tags are checked in build order and
    /// the first one that needs a rebuild decides the reason.
    pub fn should_rebuild(&self, manifest: &BakeManifest) -> Result<(bool, String)> {
        let suffixes = self.suffixes();

        for reference in manifest.registry_tags() {
            if let Some(suffix) = suffixes
                .iter()
                .find(|suffix| !suffix.is_empty() && reference.ends_with(suffix.as_str()))
            {
                return Ok((true, format!("rebuilding due to {:?} suffix", suffix)));
            }

            match self.registry.digest(&reference) {
                Ok(digest) => debug!("Remote image {} is present ({})", reference, digest),
                Err(err @ DigestError::Unavailable { .. })
                    if self.error_policy == RegistryErrorPolicy::Abort =>
                {
                    return Err(err.into());
                }
                Err(err) => {
                    if !err.is_not_found() {
                        warn!("{}; assuming image is not present", err);
                    }
                    return Ok((
                        true,
                        format!("rebuilding as remote image {:?} is not present", reference),
                    ));
                }
            }
        }

        Ok((false, String::new()))
    }
}
