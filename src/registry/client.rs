use anyhow::{Context, Result};
use log::{debug, trace, warn};
use oci_client::errors::{OciDistributionError, OciErrorCode};
use oci_client::secrets::RegistryAuth;
use oci_client::{Client, Reference};
use std::cell::RefCell;
use std::collections::BTreeMap;
use tokio::runtime::Runtime;

use super::credentials::DockerConfig;
use super::DigestLookup;
use crate::error::DigestError;

/// [`DigestLookup`] against a live OCI registry.
///
/// Credentials come from the Docker client config, resolved once per registry
/// host. Lookups run on a private current-thread runtime, one request at a
/// time.
pub struct RegistryClient {
    client: Client,
    runtime: Runtime,
    credentials: DockerConfig,
    auths: RefCell<BTreeMap<String, RegistryAuth>>,
}

impl RegistryClient {
    /// Reads the default Docker config; an unreadable one means anonymous access.
    pub fn new() -> Result<Self> {
        let credentials = DockerConfig::load_default().unwrap_or_else(|err| {
            warn!("{:#}; registry lookups will be anonymous", err);
            DockerConfig::default()
        });
        Self::with_credentials(credentials)
    }

    pub fn with_credentials(credentials: DockerConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to create async runtime")?;

        Ok(Self {
            client: Client::default(),
            runtime,
            credentials,
            auths: RefCell::new(BTreeMap::new()),
        })
    }

    fn auth(&self, reference: &Reference) -> RegistryAuth {
        let registry = reference.resolve_registry();
        self.auths
            .borrow_mut()
            .entry(registry.to_string())
            .or_insert_with(|| self.credentials.auth_for(registry))
            .clone()
    }

    async fn fetch_digest(
        &self,
        reference: &Reference,
        auth: &RegistryAuth,
    ) -> Result<String, OciDistributionError> {
        self.client.fetch_manifest_digest(reference, auth).await
    }
}

impl DigestLookup for RegistryClient {
    fn digest(&self, reference: &str) -> Result<String, DigestError> {
        let parsed = Reference::try_from(reference).map_err(|err| DigestError::Unavailable {
            reference: reference.to_string(),
            reason: format!("invalid reference: {}", err),
        })?;

        trace!("Fetching manifest digest for {}", parsed);
        let auth = self.auth(&parsed);
        match self.runtime.block_on(self.fetch_digest(&parsed, &auth)) {
            Ok(digest) => {
                debug!("Remote image {} has digest {}", reference, digest);
                Ok(digest)
            }
            Err(err) if is_not_found(&err) => {
                debug!("Remote image {} not found: {}", reference, err);
                Err(DigestError::NotFound {
                    reference: reference.to_string(),
                })
            }
            Err(err) => Err(DigestError::Unavailable {
                reference: reference.to_string(),
                reason: err.to_string(),
            }),
        }
    }
}

fn is_not_found(err: &OciDistributionError) -> bool {
    match err {
        OciDistributionError::ImageManifestNotFoundError(_) => true,
        OciDistributionError::RegistryError { envelope, .. } => envelope.errors.iter().any(|e| {
            matches!(
                e.code,
                OciErrorCode::ManifestUnknown | OciErrorCode::NameUnknown
            )
        }),
        OciDistributionError::ServerError { code, .. } => *code == 404,
        _ => false,
    }
}
