// Step planning: desired state -> ordered list of check-then-act steps

use std::path::{Path, PathBuf};
use tracing::debug;

use super::ReconcileError;
use crate::credential::{Ensure, RegistryCredential};
use crate::exec::{ExecArg, ExecSpec};

pub const STORE_DIR_MODE: u32 = 0o700;
pub const STORE_FILE_MODE: u32 = 0o600;
pub const EMPTY_STORE: &str = "{}";

/// Environment variable that carries the password into the login call
pub const PASSWORD_ENV: &str = "password";

/// Host mutation performed by a step, guarded by its own precondition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Create the directory unless it already exists
    CreateDir {
        path: PathBuf,
        mode: u32,
        owner: Option<String>,
    },
    /// Create the file unless it already exists
    CreateFile {
        path: PathBuf,
        contents: String,
        mode: u32,
        owner: Option<String>,
    },
    EnsureAuthEntry { store: PathBuf, registry: String },
    RemoveAuthEntry { store: PathBuf, registry: String },
    /// Always runs
    Exec(ExecSpec),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub title: String,
    pub action: Action,
}

/// `<home>/.docker`
pub fn store_dir(home: &Path) -> PathBuf {
    home.join(".docker")
}

/// `<home>/.docker/config.json`
pub fn store_path(home: &Path) -> PathBuf {
    store_dir(home).join("config.json")
}

/// Compute the steps that bring `desired` about for the account whose home is
/// `home`. Touches nothing on the host.
pub fn plan(
    desired: &RegistryCredential,
    home: &Path,
    docker_command: &str,
) -> Result<Vec<Step>, ReconcileError> {
    let ensure = desired.ensure()?;
    let registry = desired.registry.as_str();
    let dir = store_dir(home);
    let store = store_path(home);

    let mut steps = Vec::with_capacity(4);

    match ensure {
        Ensure::Present => {
            steps.push(Step {
                title: format!("Create {} for {}", dir.display(), registry),
                action: Action::CreateDir {
                    path: dir.clone(),
                    mode: STORE_DIR_MODE,
                    owner: desired.local_user.clone(),
                },
            });
            steps.push(Step {
                title: format!("Create {} for {}", store.display(), registry),
                action: Action::CreateFile {
                    path: store.clone(),
                    contents: EMPTY_STORE.to_string(),
                    mode: STORE_FILE_MODE,
                    owner: desired.local_user.clone(),
                },
            });
            steps.push(Step {
                title: format!("Create config in {} for {}", home.display(), registry),
                action: Action::EnsureAuthEntry {
                    store,
                    registry: registry.to_string(),
                },
            });
            steps.push(Step {
                title: auth_title(registry),
                action: Action::Exec(login_spec(desired, docker_command)),
            });
        }
        Ensure::Absent => {
            steps.push(Step {
                title: format!("Remove auth entry in {} for {}", home.display(), registry),
                action: Action::RemoveAuthEntry {
                    store,
                    registry: registry.to_string(),
                },
            });
            steps.push(Step {
                title: auth_title(registry),
                action: Action::Exec(logout_spec(desired, docker_command)),
            });
        }
    }

    Ok(steps)
}

fn auth_title(registry: &str) -> String {
    format!("{} auth", registry)
}

fn login_spec(desired: &RegistryCredential, docker_command: &str) -> ExecSpec {
    let mut args = vec![ExecArg::literal("login")];
    let mut env = Vec::new();

    if !desired.has_credentials() {
        debug!("No credentials for {}, using bare login", desired.registry);
    }

    if let Some(username) = &desired.username {
        args.push(ExecArg::literal("-u"));
        args.push(ExecArg::literal(username));
    }
    if let Some(password) = &desired.password {
        args.push(ExecArg::literal("-p"));
        args.push(ExecArg::EnvRef(PASSWORD_ENV.to_string()));
        env.push((PASSWORD_ENV.to_string(), password.clone()));
    }
    if let Some(email) = &desired.email {
        args.push(ExecArg::literal("-e"));
        args.push(ExecArg::literal(email));
    }
    args.push(ExecArg::literal(&desired.registry));

    ExecSpec {
        title: auth_title(&desired.registry),
        program: docker_command.to_string(),
        args,
        env,
        user: desired.local_user.clone(),
    }
}

fn logout_spec(desired: &RegistryCredential, docker_command: &str) -> ExecSpec {
    ExecSpec {
        title: auth_title(&desired.registry),
        program: docker_command.to_string(),
        args: vec![
            ExecArg::literal("logout"),
            ExecArg::literal(&desired.registry),
        ],
        env: Vec::new(),
        user: desired.local_user.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec_of(steps: &[Step]) -> &ExecSpec {
        match &steps.last().unwrap().action {
            Action::Exec(spec) => spec,
            other => panic!("expected exec step, got {:?}", other),
        }
    }

    #[test]
    fn test_present_plan_order_and_titles() {
        let desired = RegistryCredential::new("localhost:5000");
        let steps = plan(&desired, Path::new("/root"), "docker").unwrap();

        let titles: Vec<&str> = steps.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(
            titles,
            [
                "Create /root/.docker for localhost:5000",
                "Create /root/.docker/config.json for localhost:5000",
                "Create config in /root for localhost:5000",
                "localhost:5000 auth",
            ]
        );
        assert_eq!(
            steps[0].action,
            Action::CreateDir {
                path: PathBuf::from("/root/.docker"),
                mode: 0o700,
                owner: None,
            }
        );
        assert_eq!(
            steps[1].action,
            Action::CreateFile {
                path: PathBuf::from("/root/.docker/config.json"),
                contents: "{}".to_string(),
                mode: 0o600,
                owner: None,
            }
        );
    }

    #[test]
    fn test_bare_login() {
        let desired = RegistryCredential::new("localhost:5000");
        let steps = plan(&desired, Path::new("/root"), "docker").unwrap();
        let spec = exec_of(&steps);

        assert_eq!(spec.argv(), ["login", "localhost:5000"]);
        assert_eq!(spec.command_line(), "docker login localhost:5000");
        assert!(spec.env.is_empty());
    }

    #[test]
    fn test_login_with_all_credentials() {
        let desired = RegistryCredential::new("localhost:5000")
            .with_username("user1")
            .with_password("secret")
            .with_email("user1@example.io");
        let steps = plan(&desired, Path::new("/root"), "docker").unwrap();
        let spec = exec_of(&steps);

        assert_eq!(
            spec.argv(),
            [
                "login",
                "-u",
                "user1",
                "-p",
                "${password}",
                "-e",
                "user1@example.io",
                "localhost:5000"
            ]
        );
        assert!(!spec.argv().iter().any(|a| a.contains("secret")));
        assert_eq!(
            spec.env,
            vec![("password".to_string(), "secret".to_string())]
        );
    }

    #[test]
    fn test_login_with_username_only() {
        let desired = RegistryCredential::new("localhost:5000").with_username("user1");
        let steps = plan(&desired, Path::new("/root"), "docker").unwrap();
        let spec = exec_of(&steps);

        assert_eq!(spec.argv(), ["login", "-u", "user1", "localhost:5000"]);
        assert!(spec.env.is_empty());
    }

    #[test]
    fn test_local_user_runs_login_and_owns_files() {
        let desired = RegistryCredential::new("localhost:5000")
            .with_username("user1")
            .with_password("secret")
            .with_local_user("testuser");
        let steps = plan(&desired, Path::new("/home/testuser"), "docker").unwrap();

        assert_eq!(exec_of(&steps).user.as_deref(), Some("testuser"));
        assert!(matches!(
            &steps[0].action,
            Action::CreateDir { owner: Some(o), .. } if o == "testuser"
        ));
        assert!(matches!(
            &steps[1].action,
            Action::CreateFile { owner: Some(o), .. } if o == "testuser"
        ));
    }

    #[test]
    fn test_absent_plan_has_no_create_steps() {
        let desired = RegistryCredential::new("localhost:5000").with_ensure("absent");
        let steps = plan(&desired, Path::new("/root"), "docker").unwrap();

        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].title, "Remove auth entry in /root for localhost:5000");
        assert_eq!(exec_of(&steps).command_line(), "docker logout localhost:5000");
    }

    #[test]
    fn test_invalid_ensure_has_no_plan() {
        let desired = RegistryCredential::new("localhost:5000").with_ensure("bogus");
        assert!(matches!(
            plan(&desired, Path::new("/root"), "docker"),
            Err(ReconcileError::Configuration { .. })
        ));
    }
}
