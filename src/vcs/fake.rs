use anyhow::{anyhow, bail, Result};
use std::collections::HashMap;

use super::{normalize_path, shorten, RepoQuery};

/// In-memory [`RepoQuery`] for tests.
///
/// Paths are normalised the same way [`super::GitRepo`] does, so `./a/` and
/// `a` hit the same entry. The empty path is the root tree.
#[derive(Debug, Clone, Default)]
pub struct FakeRepo {
    pub content_hashes: HashMap<String, String>,
    pub revision: String,
    pub tags: Vec<String>,
    pub wip: HashMap<String, bool>,
    pub diverged: bool,
}

impl FakeRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content_hash(mut self, path: &str, hash: &str) -> Self {
        self.content_hashes
            .insert(normalize_path(path), hash.to_string());
        self
    }

    pub fn with_revision(mut self, revision: &str) -> Self {
        self.revision = revision.to_string();
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|tag| tag.to_string()).collect();
        self
    }

    pub fn with_wip(mut self, path: &str, wip: bool) -> Self {
        self.wip.insert(normalize_path(path), wip);
        self
    }

    pub fn with_diverged(mut self, diverged: bool) -> Self {
        self.diverged = diverged;
        self
    }
}

impl RepoQuery for FakeRepo {
    fn content_hash(&self, path: &str, short: bool) -> Result<String> {
        let hash = self
            .content_hashes
            .get(&normalize_path(path))
            .ok_or_else(|| anyhow!("path {:?} is not tracked at HEAD", path))?;
        Ok(if short { shorten(hash) } else { hash.clone() })
    }

    fn revision_hash(&self, short: bool) -> Result<String> {
        if self.revision.is_empty() {
            bail!("no revision set");
        }
        Ok(if short {
            shorten(&self.revision)
        } else {
            self.revision.clone()
        })
    }

    fn tags_at_head(&self) -> Result<Vec<String>> {
        if self.tags.is_empty() {
            bail!("no tags point at HEAD");
        }
        Ok(self.tags.clone())
    }

    fn has_uncommitted_changes(&self, path: &str) -> Result<bool> {
        let path = normalize_path(path);
        // A dirty root covers every path below it
        let root = self.wip.get("").copied().unwrap_or(false);
        Ok(root || self.wip.get(&path).copied().unwrap_or(false))
    }

    fn has_diverged_from(&self, _base_branch: &str) -> Result<bool> {
        Ok(self.diverged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_repo_queries() {
        let repo = FakeRepo::new()
            .with_content_hash("examples/alpine", "16c315243fd31c00b80c188123099501ae2ccf91")
            .with_revision("15b881c016c1d81f924cc0c1ae002333253f0991")
            .with_wip("./examples/alpine/", true);

        assert_eq!(
            repo.content_hash("./examples/alpine", true).unwrap(),
            "16c315"
        );
        assert!(repo.content_hash("examples/other", true).is_err());
        assert_eq!(repo.revision_hash(true).unwrap(), "15b881");
        assert!(repo.has_uncommitted_changes("examples/alpine").unwrap());
        assert!(!repo.has_uncommitted_changes("dummy.yaml").unwrap());
        assert!(repo.tags_at_head().is_err());
    }

    #[test]
    fn test_dirty_root() {
        let repo = FakeRepo::new().with_wip("", true);
        assert!(repo.has_uncommitted_changes("anything/at/all").unwrap());
    }
}
