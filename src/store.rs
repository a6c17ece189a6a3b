//! Docker credential store (`~/.docker/config.json`) editing.
//!
//! Edits are structural: the file is parsed, the `auths` object is adjusted
//! for a single registry, and everything else is written back untouched and
//! in its original key order. Writes go through a temporary file in the same
//! directory followed by a rename, so a failed edit never leaves a truncated
//! store behind.

use anyhow::{bail, Context, Result};
use base64::Engine;
use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use tracing::debug;

const AUTHS_KEY: &str = "auths";

/// Summary of one stored registry entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSummary {
    pub registry: String,
    /// Username decoded from the `auth` field, if one is stored
    pub username: Option<String>,
}

fn read_root(path: &Path) -> Result<Map<String, Value>> {
    let metadata = fs::symlink_metadata(path)
        .with_context(|| format!("Failed to stat credential store {}", path.display()))?;
    if metadata.file_type().is_symlink() {
        bail!(
            "Credential store {} is a symbolic link, refusing to edit it",
            path.display()
        );
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read credential store {}", path.display()))?;

    // docker itself treats an empty file as an empty config
    if contents.trim().is_empty() {
        return Ok(Map::new());
    }

    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse credential store {}", path.display()))?;

    match value {
        Value::Object(map) => Ok(map),
        _ => bail!(
            "Credential store {} does not contain a JSON object",
            path.display()
        ),
    }
}

fn write_root(path: &Path, root: &Map<String, Value>) -> Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("Credential store {} has no parent", path.display()))?;
    let metadata = fs::symlink_metadata(path)
        .with_context(|| format!("Failed to stat credential store {}", path.display()))?;

    let mut json = serde_json::to_string_pretty(root).context("Failed to serialize store")?;
    json.push('\n');

    let mut temp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
    temp.write_all(json.as_bytes())
        .context("Failed to write temporary credential store")?;
    fs::set_permissions(temp.path(), metadata.permissions())
        .context("Failed to copy credential store permissions")?;

    if nix::unistd::geteuid().is_root() {
        nix::unistd::chown(
            temp.path(),
            Some(nix::unistd::Uid::from_raw(metadata.uid())),
            Some(nix::unistd::Gid::from_raw(metadata.gid())),
        )
        .context("Failed to copy credential store ownership")?;
    }

    temp.persist(path)
        .with_context(|| format!("Failed to replace credential store {}", path.display()))?;
    Ok(())
}

/// Make sure `auths.<registry>` exists. Returns true if the file changed.
pub fn ensure_auth_entry(path: &Path, registry: &str) -> Result<bool> {
    let mut root = read_root(path)?;

    let auths = root
        .entry(AUTHS_KEY)
        .or_insert_with(|| Value::Object(Map::new()));
    let Value::Object(auths) = auths else {
        bail!("'{}' in {} is not a JSON object", AUTHS_KEY, path.display());
    };

    if auths.contains_key(registry) {
        debug!("Auth entry for {} already present", registry);
        return Ok(false);
    }

    auths.insert(registry.to_string(), Value::Object(Map::new()));
    write_root(path, &root)?;
    Ok(true)
}

/// Remove `auths.<registry>` if present. Returns true if the file changed.
pub fn remove_auth_entry(path: &Path, registry: &str) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }

    let mut root = read_root(path)?;
    let removed = match root.get_mut(AUTHS_KEY) {
        Some(Value::Object(auths)) => auths.shift_remove(registry).is_some(),
        _ => false,
    };

    if removed {
        write_root(path, &root)?;
    }
    Ok(removed)
}

/// List the registries that have an entry in the store
pub fn list_entries(path: &Path) -> Result<Vec<AuthSummary>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let root = read_root(path)?;
    let Some(Value::Object(auths)) = root.get(AUTHS_KEY) else {
        return Ok(Vec::new());
    };

    Ok(auths
        .iter()
        .map(|(registry, entry)| AuthSummary {
            registry: registry.clone(),
            username: entry
                .get("auth")
                .and_then(Value::as_str)
                .and_then(decode_username),
        })
        .collect())
}

/// Username half of a base64 "username:password" auth string
fn decode_username(auth: &str) -> Option<String> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(auth)
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    decoded.split_once(':').map(|(user, _)| user.to_string())
}
