// Desired-state descriptor for a registry credential

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

use crate::reconcile::ReconcileError;

/// Lifecycle state requested for a registry credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensure {
    Present,
    Absent,
}

impl fmt::Display for Ensure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ensure::Present => write!(f, "present"),
            Ensure::Absent => write!(f, "absent"),
        }
    }
}

impl FromStr for Ensure {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(Ensure::Present),
            "absent" => Ok(Ensure::Absent),
            other => Err(format!(
                "Invalid ensure value '{}'. Supported: present, absent",
                other
            )),
        }
    }
}

fn default_ensure() -> String {
    Ensure::Present.to_string()
}

/// Desired credential state for one registry.
///
/// `ensure` is kept as the caller supplied it and only parsed when a pass
/// starts, so an unrecognized value is reported as a configuration error
/// instead of failing deserialization of the whole manifest.
#[derive(Clone, Default, Deserialize)]
pub struct RegistryCredential {
    pub registry: String,
    #[serde(default = "default_ensure")]
    pub ensure: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub local_user: Option<String>,
}

impl fmt::Debug for RegistryCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredential")
            .field("registry", &self.registry)
            .field("ensure", &self.ensure)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .field("email", &self.email)
            .field("local_user", &self.local_user)
            .finish()
    }
}

impl RegistryCredential {
    /// Descriptor for `registry` with `ensure = present` and no credentials
    pub fn new(registry: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            ensure: default_ensure(),
            ..Default::default()
        }
    }

    pub fn with_ensure(mut self, ensure: impl Into<String>) -> Self {
        self.ensure = ensure.into();
        self
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn with_local_user(mut self, local_user: impl Into<String>) -> Self {
        self.local_user = Some(local_user.into());
        self
    }

    /// Parse the requested lifecycle state
    pub fn ensure(&self) -> Result<Ensure, ReconcileError> {
        self.ensure
            .parse()
            .map_err(|message| ReconcileError::Configuration {
                registry: self.registry.clone(),
                message,
            })
    }

    /// True when any of username, password or email was supplied
    pub fn has_credentials(&self) -> bool {
        self.username.is_some() || self.password.is_some() || self.email.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_parses_known_values() {
        assert_eq!("present".parse::<Ensure>().unwrap(), Ensure::Present);
        assert_eq!("absent".parse::<Ensure>().unwrap(), Ensure::Absent);
    }

    #[test]
    fn test_ensure_rejects_unknown_values() {
        for value in ["", "Present", "not present or absent", "latest"] {
            let cred = RegistryCredential::new("localhost:5000").with_ensure(value);
            let err = cred.ensure().unwrap_err();
            assert!(matches!(err, ReconcileError::Configuration { .. }));
        }
    }

    #[test]
    fn test_default_ensure_is_present() {
        let cred: RegistryCredential =
            serde_json::from_str(r#"{"registry": "localhost:5000"}"#).unwrap();
        assert_eq!(cred.ensure().unwrap(), Ensure::Present);
        assert!(!cred.has_credentials());
    }

    #[test]
    fn test_debug_masks_password() {
        let cred = RegistryCredential::new("localhost:5000").with_password("secret");
        let rendered = format!("{:?}", cred);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("********"));
    }
}
