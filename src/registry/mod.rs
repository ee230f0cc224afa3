//! Registry digest lookups.

pub mod client;
pub mod credentials;
pub mod fake;

pub use client::RegistryClient;
pub use credentials::DockerConfig;
pub use fake::FakeRegistry;

use crate::error::DigestError;

/// Resolves a fully qualified image reference to its manifest digest.
pub trait DigestLookup {
    /// Fails with [`DigestError::NotFound`] only when the registry says the
    /// reference does not exist.
    fn digest(&self, reference: &str) -> Result<String, DigestError>;
}
