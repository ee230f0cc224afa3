use anyhow::{anyhow, Result};
use log::trace;
use semver::Version;

/// Queries against the currently checked-out revision. Nothing here mutates
/// the repository.
///
/// Paths are relative to the repository top level; `""` is the root.
pub trait RepoQuery {
    /// Content identifier of the tree (or blob) at `path` in HEAD.
    /// Fails if `path` is not tracked.
    fn content_hash(&self, path: &str, short: bool) -> Result<String>;

    /// Identifier of the HEAD commit.
    fn revision_hash(&self, short: bool) -> Result<String>;

    /// Tags pointing at HEAD. Having none is an error, not an empty list.
    fn tags_at_head(&self) -> Result<Vec<String>>;

    /// Highest semantic version among the tags at HEAD.
    ///
    /// With `ignore_unparsable` unset, any tag that is not a version fails the
    /// whole query.
    fn highest_semver_tag(&self, ignore_unparsable: bool) -> Result<Version> {
        semver_from_tags(ignore_unparsable, &self.tags_at_head()?)
    }

    /// Whether tracked files under `path` differ from HEAD. Untracked files
    /// are ignored.
    fn has_uncommitted_changes(&self, path: &str) -> Result<bool>;

    /// Whether HEAD is not an ancestor of `base_branch`.
    fn has_diverged_from(&self, base_branch: &str) -> Result<bool>;
}

/// Picks the highest version out of `tags`; a leading `v` is accepted.
pub fn semver_from_tags(ignore_unparsable: bool, tags: &[String]) -> Result<Version> {
    let mut versions = Vec::with_capacity(tags.len());
    for tag in tags {
        match Version::parse(tag.strip_prefix('v').unwrap_or(tag)) {
            Ok(version) => versions.push(version),
            Err(err) if ignore_unparsable => {
                trace!("Skipping tag {:?}: {}", tag, err);
            }
            Err(err) => {
                return Err(anyhow!(err).context(format!("tag {:?} is not a semantic version", tag)))
            }
        }
    }

    versions
        .into_iter()
        .max()
        .ok_or_else(|| anyhow!("no version tags found"))
}
