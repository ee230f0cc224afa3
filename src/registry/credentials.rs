//! Registry credentials from the Docker client config.
//!
//! Lookup order per registry host: `credHelpers`, then `credsStore`, then
//! inline `auths` entries. Anything that cannot be resolved is anonymous.

use anyhow::{bail, Context, Result};
use base64::Engine;
use log::{debug, warn};
use oci_client::secrets::RegistryAuth;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

pub const DOCKER_CONFIG_ENV: &str = "DOCKER_CONFIG";

const DOCKER_CONFIG_FILE: &str = "config.json";
const DOCKER_HUB_REGISTRY: &str = "index.docker.io";
const DOCKER_HUB_SERVER_URL: &str = "https://index.docker.io/v1/";
const CREDENTIAL_HELPER_PREFIX: &str = "docker-credential-";
/// Helpers report identity tokens under this username.
const IDENTITY_TOKEN_USERNAME: &str = "<token>";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerConfig {
    #[serde(default)]
    pub auths: BTreeMap<String, AuthEntry>,
    #[serde(default)]
    pub creds_store: Option<String>,
    #[serde(default)]
    pub cred_helpers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthEntry {
    /// Base64 of `username:password`.
    #[serde(default)]
    pub auth: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default, rename = "identitytoken")]
    pub identity_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HelperCredential {
    username: String,
    secret: String,
}

impl DockerConfig {
    /// `$DOCKER_CONFIG/config.json`, falling back to `~/.docker/config.json`.
    pub fn load_default() -> Result<Self> {
        match default_config_dir() {
            Some(dir) => Self::load(&dir.join(DOCKER_CONFIG_FILE)),
            None => Ok(Self::default()),
        }
    }

    /// A missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No docker config at {}", path.display());
            return Ok(Self::default());
        }
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Credentials for a registry host such as `ghcr.io` or `index.docker.io`.
    pub fn auth_for(&self, registry: &str) -> RegistryAuth {
        let registry = normalize_host(registry);

        if let Some(helper) = self.cred_helpers.get(&registry) {
            return helper_auth(helper, &registry).unwrap_or(RegistryAuth::Anonymous);
        }
        if let Some(store) = &self.creds_store {
            if let Some(auth) = helper_auth(store, &registry) {
                return auth;
            }
        }

        let entry = self
            .auths
            .iter()
            .find(|(server, _)| normalize_host(server) == registry)
            .map(|(_, entry)| entry);
        match entry.map(AuthEntry::to_auth) {
            Some(Ok(Some(auth))) => {
                debug!("Using credentials from docker config for {}", registry);
                auth
            }
            Some(Err(err)) => {
                warn!("Ignoring docker config entry for {}: {:#}", registry, err);
                RegistryAuth::Anonymous
            }
            _ => RegistryAuth::Anonymous,
        }
    }
}

impl AuthEntry {
    fn to_auth(&self) -> Result<Option<RegistryAuth>> {
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            if !username.is_empty() {
                return Ok(Some(RegistryAuth::Basic(username.clone(), password.clone())));
            }
        }

        let Some(encoded) = self.auth.as_deref().filter(|auth| !auth.is_empty()) else {
            if self.identity_token.is_some() {
                debug!("Identity tokens are not supported; using anonymous access");
            }
            return Ok(None);
        };
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .context("invalid base64 in 'auth'")?;
        let decoded = String::from_utf8(decoded).context("'auth' is not UTF-8")?;
        match decoded.split_once(':') {
            Some((username, password)) if !username.is_empty() => Ok(Some(RegistryAuth::Basic(
                username.to_string(),
                password.to_string(),
            ))),
            _ => bail!("'auth' is not of the form 'username:password'"),
        }
    }
}

fn default_config_dir() -> Option<PathBuf> {
    match env::var_os(DOCKER_CONFIG_ENV) {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => env::var_os("HOME").map(|home| PathBuf::from(home).join(".docker")),
    }
}

/// `https://index.docker.io/v1/` and `docker.io` both become `index.docker.io`.
fn normalize_host(server: &str) -> String {
    let host = server
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or_default();
    match host {
        "docker.io" | "registry-1.docker.io" => DOCKER_HUB_REGISTRY.to_string(),
        host => host.to_string(),
    }
}

fn helper_auth(helper: &str, registry: &str) -> Option<RegistryAuth> {
    let server_url = if registry == DOCKER_HUB_REGISTRY {
        DOCKER_HUB_SERVER_URL
    } else {
        registry
    };
    match run_helper(helper, server_url) {
        Ok(credential) if credential.username == IDENTITY_TOKEN_USERNAME => {
            debug!("Identity tokens are not supported; using anonymous access");
            None
        }
        Ok(credential) => {
            debug!("Using credentials from {}{} for {}", CREDENTIAL_HELPER_PREFIX, helper, registry);
            Some(RegistryAuth::Basic(credential.username, credential.secret))
        }
        Err(err) => {
            debug!("No credentials from {}{}: {:#}", CREDENTIAL_HELPER_PREFIX, helper, err);
            None
        }
    }
}

fn run_helper(helper: &str, server_url: &str) -> Result<HelperCredential> {
    let program = format!("{}{}", CREDENTIAL_HELPER_PREFIX, helper);
    let mut child = Command::new(&program)
        .arg("get")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to run {}", program))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(server_url.as_bytes())
            .with_context(|| format!("Failed to write to {}", program))?;
    }
    let output = child
        .wait_with_output()
        .with_context(|| format!("Failed to wait for {}", program))?;
    if !output.status.success() {
        bail!(
            "{} exited with {}: {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stdout).trim()
        );
    }
    serde_json::from_slice(&output.stdout)
        .with_context(|| format!("Failed to parse output of {}", program))
}
