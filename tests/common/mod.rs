//! Throwaway git repositories for integration tests.

#![allow(dead_code)]

use git2::{Commit, IndexAddOption, Oid, Repository, Signature};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const REGISTRIES: &[&str] = &["reg1.example.com/imagine", "reg2.example.org/imagine"];

pub fn registries() -> Vec<String> {
    REGISTRIES.iter().map(|r| r.to_string()).collect()
}

pub struct Fixture {
    pub dir: TempDir,
    pub repo: Repository,
}

impl Fixture {
    /// Empty repository with an initial commit of `files`.
    pub fn new(files: &[(&str, &str)]) -> Self {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let fixture = Self { dir, repo };
        for (path, contents) in files {
            fixture.write(path, contents);
        }
        fixture.commit("Initial commit");
        fixture
    }

    pub fn path(&self) -> PathBuf {
        fs::canonicalize(self.dir.path()).unwrap()
    }

    pub fn write(&self, path: &str, contents: &str) {
        let full_path = self.dir.path().join(path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(full_path, contents).unwrap();
    }

    pub fn commit(&self, message: &str) -> Oid {
        let signature = Signature::now("imagine", "imagine@example.com").unwrap();
        let mut index = self.repo.index().unwrap();
        index
            .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree = self.repo.find_tree(index.write_tree().unwrap()).unwrap();

        let parents = match self.repo.head() {
            Ok(head) => vec![head.peel_to_commit().unwrap()],
            Err(_) => vec![],
        };
        let parent_refs: Vec<&Commit> = parents.iter().collect();

        self.repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parent_refs)
            .unwrap()
    }

    pub fn tag(&self, name: &str) {
        let head = self.repo.head().unwrap().peel_to_commit().unwrap();
        self.repo
            .tag_lightweight(name, head.as_object(), false)
            .unwrap();
    }

    /// Points `refs/heads/{name}` at HEAD.
    pub fn branch_here(&self, name: &str) {
        let head = self.repo.head().unwrap().peel_to_commit().unwrap().id();
        self.repo
            .reference(&format!("refs/heads/{}", name), head, true, "test")
            .unwrap();
    }

    /// Hash of `path` in the HEAD tree.
    pub fn tree_hash(&self, path: &str) -> String {
        let tree = self.repo.head().unwrap().peel_to_tree().unwrap();
        tree.get_path(Path::new(path)).unwrap().id().to_string()
    }

    pub fn head(&self) -> String {
        self.repo.head().unwrap().peel_to_commit().unwrap().id().to_string()
    }
}
