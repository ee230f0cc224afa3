use anyhow::{anyhow, bail, Context, Result};
use git2::{Commit, DiffOptions, Repository};
use log::{debug, trace};
use std::fs;
use std::path::{Path, PathBuf};

use super::{normalize_path, shorten, RepoQuery};

/// [`RepoQuery`] over a local git checkout.
pub struct GitRepo {
    repo: Repository,
    top_level: PathBuf,
}

impl GitRepo {
    /// Opens the repository containing `path`, searching parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        let repo = Repository::discover(path)
            .with_context(|| format!("directory {} is not in git", path.display()))?;

        let workdir = repo
            .workdir()
            .ok_or_else(|| anyhow!("repository at {} has no working tree", path.display()))?;
        let top_level = fs::canonicalize(workdir)
            .with_context(|| format!("unable to resolve {}", workdir.display()))?;
        debug!("Opened git repository at {}", top_level.display());

        Ok(Self { repo, top_level })
    }

    pub fn top_level(&self) -> &Path {
        &self.top_level
    }

    /// Converts an existing path into the `a/b` form queries expect.
    pub fn relative_path(&self, path: &Path) -> Result<String> {
        let absolute = fs::canonicalize(path)
            .with_context(|| format!("unable to resolve {}", path.display()))?;
        let relative = absolute.strip_prefix(&self.top_level).map_err(|_| {
            anyhow!(
                "{} is outside of repository {}",
                absolute.display(),
                self.top_level.display()
            )
        })?;
        let relative = relative
            .to_str()
            .ok_or_else(|| anyhow!("path {} is not valid UTF-8", relative.display()))?;
        Ok(normalize_path(relative))
    }

    fn head_commit(&self) -> Result<Commit<'_>> {
        self.repo
            .head()
            .and_then(|head| head.peel_to_commit())
            .context("Failed to get head commit")
    }
}

impl RepoQuery for GitRepo {
    fn content_hash(&self, path: &str, short: bool) -> Result<String> {
        let tree = self
            .head_commit()?
            .tree()
            .context("Failed to get head tree")?;

        let relative = normalize_path(path);
        let id = if relative.is_empty() {
            tree.id()
        } else {
            tree.get_path(Path::new(&relative))
                .with_context(|| format!("path {:?} is not tracked at HEAD", path))?
                .id()
        };
        trace!("Content hash of {:?} is {}", path, id);

        let hash = id.to_string();
        Ok(if short { shorten(&hash) } else { hash })
    }

    fn revision_hash(&self, short: bool) -> Result<String> {
        let hash = self.head_commit()?.id().to_string();
        Ok(if short { shorten(&hash) } else { hash })
    }

    fn tags_at_head(&self) -> Result<Vec<String>> {
        let head = self.head_commit()?.id();
        let names = self.repo.tag_names(None).context("Failed to list tags")?;

        let mut tags = Vec::new();
        for name in names.iter().flatten() {
            let reference = self
                .repo
                .find_reference(&format!("refs/tags/{}", name))
                .with_context(|| format!("Failed to find tag {}", name))?;
            // Tags on trees or blobs never point at a commit
            if let Ok(commit) = reference.peel_to_commit() {
                if commit.id() == head {
                    tags.push(name.to_string());
                }
            }
        }

        if tags.is_empty() {
            bail!("no tags point at HEAD ({})", head);
        }
        tags.sort();
        debug!("Tags at HEAD: {}", tags.join(", "));
        Ok(tags)
    }

    fn has_uncommitted_changes(&self, path: &str) -> Result<bool> {
        // Reload from disk so stat-only differences are rechecked by content
        let mut index = self.repo.index().context("Failed to get git index")?;
        index.read(true).context("Failed to refresh git index")?;

        let tree = self
            .head_commit()?
            .tree()
            .context("Failed to get head tree")?;

        let mut opts = DiffOptions::new();
        opts.include_untracked(false).ignore_submodules(true);
        let relative = normalize_path(path);
        if !relative.is_empty() {
            opts.pathspec(relative.as_str());
        }

        let diff = self
            .repo
            .diff_tree_to_workdir_with_index(Some(&tree), Some(&mut opts))
            .with_context(|| format!("Failed to diff {:?} against HEAD", path))?;
        let changed = diff.deltas().len() > 0;
        debug!("Uncommitted changes under {:?}: {}", path, changed);
        Ok(changed)
    }

    fn has_diverged_from(&self, base_branch: &str) -> Result<bool> {
        let head = self.head_commit()?.id();
        let base = self
            .repo
            .revparse_single(base_branch)
            .and_then(|object| object.peel_to_commit())
            .with_context(|| format!("unable to resolve base branch {:?}", base_branch))?
            .id();

        if head == base {
            return Ok(false);
        }
        let is_ancestor = self
            .repo
            .graph_descendant_of(base, head)
            .context("Failed to compare HEAD with base branch")?;
        debug!("HEAD {} is ancestor of {}: {}", head, base_branch, is_ancestor);
        Ok(!is_ancestor)
    }
}
