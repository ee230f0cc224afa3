//! Read-only repository queries used for tagging and change detection.
//!
//! [`RepoQuery`] is the capability the tag engine and manifest assembler need;
//! [`GitRepo`] implements it on top of `git2`, [`FakeRepo`] in memory.

pub mod fake;
pub mod git;
pub mod query;

pub use fake::FakeRepo;
pub use git::GitRepo;
pub use query::{semver_from_tags, RepoQuery};

/// Hex digits kept by short hashes.
pub const SHORT_HASH_LEN: usize = 6;

pub(crate) fn shorten(hash: &str) -> String {
    hash.chars().take(SHORT_HASH_LEN).collect()
}

/// Normalises a repository-relative path to `a/b` form.
///
/// `./a/b/`, `a//b` and `a/b` are the same path; `""` and `"."` both mean the
/// repository root and normalise to `""`.
pub(crate) fn normalize_path(path: &str) -> String {
    path.split(['/', '\\'])
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(""), "");
        assert_eq!(normalize_path("."), "");
        assert_eq!(normalize_path("./"), "");
        assert_eq!(normalize_path("./examples/alpine/"), "examples/alpine");
        assert_eq!(normalize_path("examples//alpine"), "examples/alpine");
        assert_eq!(normalize_path("dummy.yaml"), "dummy.yaml");
    }

    #[test]
    fn test_shorten() {
        assert_eq!(shorten("613919533ebd03d6bafbd538ccad3a4acea9b761"), "613919");
        assert_eq!(shorten("abc"), "abc");
    }
}
