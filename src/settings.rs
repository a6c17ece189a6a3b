use config::{Config, ConfigError, Environment, File, FileFormat, Map};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

/// Names the settings file when `--config` is not given
pub const CONFIG_ENV: &str = "REGAUTH_CONFIG";

/// Lock file used when running as root
const ROOT_LOCK_PATH: &str = "/run/regauth.lock";

/// Tool settings, layered from defaults, an optional TOML file and
/// `REGAUTH_*` environment variables (highest precedence).
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Container CLI used for login/logout (docker or podman)
    #[serde(default = "default_docker_command")]
    pub docker_command: String,

    /// Shell that runs the login/logout command line
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Lock file that serializes `apply` runs on this host
    #[serde(default)]
    pub lock_file: Option<PathBuf>,
}

fn default_docker_command() -> String {
    "docker".to_string()
}

fn default_shell() -> String {
    "/bin/sh".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            docker_command: default_docker_command(),
            shell: default_shell(),
            lock_file: None,
        }
    }
}

impl Settings {
    /// `~/.config/regauth/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("regauth").join("config.toml"))
    }

    /// Load settings from `path`, else `$REGAUTH_CONFIG`, else the default
    /// file. An explicitly named file must exist; the default one is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_from(path, env::vars())
    }

    fn load_from(
        path: Option<&Path>,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, ConfigError> {
        // REGAUTH_CONFIG picks the file, it is not a setting itself
        let mut config_env = None;
        let mut env_source = Map::new();
        for (key, value) in vars {
            if key == CONFIG_ENV {
                config_env = Some(value).filter(|v| !v.is_empty());
            } else {
                env_source.insert(key, value);
            }
        }

        let explicit = path.map(Path::to_path_buf).or(config_env.map(PathBuf::from));
        let (file, required) = match explicit {
            Some(path) => (Some(path), true),
            None => (Self::default_path(), false),
        };

        let mut builder = Config::builder();
        if let Some(file) = &file {
            if file.exists() {
                tracing::info!("Loading config file: {}", file.display());
            } else {
                tracing::debug!("Config file not found: {}", file.display());
            }
            builder = builder.add_source(
                File::from(file.as_path())
                    .format(FileFormat::Toml)
                    .required(required),
            );
        }
        builder =
            builder.add_source(Environment::with_prefix("REGAUTH").source(Some(env_source)));

        let value: serde_json::Value = builder.build()?.try_deserialize()?;

        let mut unused_fields = Vec::new();
        let settings: Settings = serde_ignored::deserialize(value, |path| {
            unused_fields.push(path.to_string());
        })
        .map_err(|e| ConfigError::Message(format!("Failed to deserialize settings: {}", e)))?;

        for field in &unused_fields {
            tracing::warn!("Unknown configuration field: {}", field);
        }

        Ok(settings)
    }

    /// Configured lock file, else /run for root, else one in
    /// `$XDG_RUNTIME_DIR`, else in the temp dir
    pub fn lock_path(&self) -> PathBuf {
        if let Some(path) = &self.lock_file {
            return path.clone();
        }
        default_lock_path(
            nix::unistd::geteuid().is_root(),
            env::var("XDG_RUNTIME_DIR").ok(),
        )
    }
}

// Root never locks in a world-writable directory, where any user could
// pre-create and hold the file
fn default_lock_path(is_root: bool, runtime_dir: Option<String>) -> PathBuf {
    if is_root {
        return PathBuf::from(ROOT_LOCK_PATH);
    }
    runtime_dir
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(env::temp_dir)
        .join("regauth.lock")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_file_overrides_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
docker_command = "podman"
lock_file = "/var/lock/regauth.lock"
"#,
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();

        assert_eq!(settings.docker_command, "podman");
        assert_eq!(settings.shell, "/bin/sh");
        assert_eq!(settings.lock_path(), PathBuf::from("/var/lock/regauth.lock"));
    }

    #[test]
    fn test_unknown_fields_are_tolerated() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
shell = "/bin/bash"
unknown_field = "should trigger warning"
"#,
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.shell, "/bin/bash");
    }

    fn write_settings(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_config_env_names_the_settings_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_settings(&temp_dir, "env.toml", r#"docker_command = "podman""#);

        let vars = vec![(CONFIG_ENV.to_string(), path.display().to_string())];
        let settings = Settings::load_from(None, vars).unwrap();

        assert_eq!(settings.docker_command, "podman");
    }

    #[test]
    fn test_config_flag_wins_over_config_env() {
        let temp_dir = TempDir::new().unwrap();
        let from_env = write_settings(&temp_dir, "env.toml", r#"docker_command = "podman""#);
        let from_flag = write_settings(&temp_dir, "flag.toml", r#"docker_command = "nerdctl""#);

        let vars = vec![(CONFIG_ENV.to_string(), from_env.display().to_string())];
        let settings = Settings::load_from(Some(&from_flag), vars).unwrap();

        assert_eq!(settings.docker_command, "nerdctl");
    }

    #[test]
    fn test_missing_config_env_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing.toml");

        let vars = vec![(CONFIG_ENV.to_string(), missing.display().to_string())];
        assert!(Settings::load_from(None, vars).is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_settings(&temp_dir, "config.toml", r#"docker_command = "podman""#);

        let vars = vec![
            (CONFIG_ENV.to_string(), path.display().to_string()),
            ("REGAUTH_SHELL".to_string(), "/bin/dash".to_string()),
            ("REGAUTH_DOCKER_COMMAND".to_string(), "docker".to_string()),
        ];
        let settings = Settings::load_from(None, vars).unwrap();

        assert_eq!(settings.docker_command, "docker");
        assert_eq!(settings.shell, "/bin/dash");
    }

    #[test]
    fn test_root_lock_is_outside_temp_dir() {
        assert_eq!(
            default_lock_path(true, Some("/run/user/0".to_string())),
            PathBuf::from("/run/regauth.lock")
        );
        assert_eq!(
            default_lock_path(false, Some("/run/user/1000".to_string())),
            PathBuf::from("/run/user/1000/regauth.lock")
        );
        assert_eq!(
            default_lock_path(false, None),
            env::temp_dir().join("regauth.lock")
        );
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing.toml");

        assert!(Settings::load(Some(&path)).is_err());
    }
}
