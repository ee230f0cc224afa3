pub mod buildx;
pub mod config;
pub mod error;
pub mod manifest;
pub mod notifier;
pub mod rebuilder;
pub mod recipe;
pub mod registry;
pub mod summary;
pub mod tag;
pub mod vcs;

// Re-exports for easy access
pub use buildx::{BakeMetadata, Buildx};
pub use config::{BuildConfig, BuildSpec, BuildVariant, WithBuildInstructions};
pub use error::{ConfigError, DigestError};
pub use manifest::{BakeManifest, BakeTarget};
pub use notifier::Notifier;
pub use rebuilder::{forced_rebuild_reason, Rebuilder, RegistryErrorPolicy};
pub use recipe::ImagineRecipe;
pub use registry::{DigestLookup, DockerConfig, FakeRegistry, RegistryClient};
pub use summary::{BuildSummary, SummaryFormat};
pub use tag::{SuffixPolicy, TagMode};
pub use vcs::{FakeRepo, GitRepo, RepoQuery};
