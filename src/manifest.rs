// Manifest files: several registry descriptors applied in one run
//
//   version = 1
//
//   [[registry]]
//   registry = "localhost:5000"
//   username = "ci"
//   password_env = "REGISTRY_PASSWORD"

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::credential::RegistryCredential;

#[derive(Debug, Deserialize)]
struct Manifest {
    version: Option<u32>,
    #[serde(default)]
    registry: Vec<ManifestEntry>,
}

#[derive(Deserialize)]
struct ManifestEntry {
    registry: String,
    ensure: Option<String>,
    username: Option<String>,
    password: Option<String>,
    /// Read the password from this environment variable instead
    password_env: Option<String>,
    email: Option<String>,
    local_user: Option<String>,
}

impl std::fmt::Debug for ManifestEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestEntry")
            .field("registry", &self.registry)
            .field("password_env", &self.password_env)
            .finish_non_exhaustive()
    }
}

/// Read a password from the named environment variable
pub fn password_from_env(var: &str) -> Result<String> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .with_context(|| format!("Environment variable {} is not set", var))
}

impl ManifestEntry {
    fn into_credential(self) -> Result<RegistryCredential> {
        let password = match (self.password, self.password_env) {
            (Some(_), Some(_)) => bail!(
                "Registry {}: set either password or password_env, not both",
                self.registry
            ),
            (Some(password), None) => Some(password),
            (None, Some(var)) => Some(password_from_env(&var)?),
            (None, None) => None,
        };

        let mut credential = RegistryCredential::new(self.registry);
        if let Some(ensure) = self.ensure {
            credential.ensure = ensure;
        }
        credential.username = self.username;
        credential.password = password;
        credential.email = self.email;
        credential.local_user = self.local_user;
        Ok(credential)
    }
}

/// Parse manifest text. Unknown fields are reported, not rejected.
pub fn parse_manifest(content: &str, origin: &str) -> Result<Vec<RegistryCredential>> {
    let mut unused_fields = Vec::new();
    let deserializer = toml::Deserializer::new(content);
    let manifest: Manifest = serde_ignored::deserialize(deserializer, |path| {
        unused_fields.push(path.to_string());
    })
    .with_context(|| format!("Failed to parse manifest {}", origin))?;

    for field in &unused_fields {
        warn!("Unknown manifest field in {}: {}", origin, field);
    }

    match manifest.version {
        Some(1) => {}
        Some(version) => bail!(
            "Unsupported manifest version: {}. This tool supports version 1.",
            version
        ),
        None => debug!("No version specified in {}, using latest", origin),
    }

    if manifest.registry.is_empty() {
        warn!("Manifest {} declares no registries", origin);
    }

    manifest
        .registry
        .into_iter()
        .map(ManifestEntry::into_credential)
        .collect()
}

/// Load descriptors from a manifest file
pub fn load_manifest(path: &Path) -> Result<Vec<RegistryCredential>> {
    info!("Loading manifest from {}", path.display());
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    parse_manifest(&content, &path.display().to_string())
}
