use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Attribute, Cell, Table};
use std::path::PathBuf;
use tracing::info;

use crate::credential::RegistryCredential;
use crate::exec::SystemRunner;
use crate::host::SystemHost;
use crate::lock::RunLock;
use crate::manifest::{load_manifest, password_from_env};
use crate::reconcile::{Action, Reconciler, Report};
use crate::settings::Settings;

/// Which registries to reconcile, from flags or a manifest file
#[derive(Debug, Clone, Args)]
pub struct TargetArgs {
    /// Registry to manage (e.g. localhost:5000)
    #[arg(required_unless_present = "manifest", conflicts_with = "manifest")]
    pub registry: Option<String>,

    /// Desired state (present or absent)
    #[arg(long, default_value = "present", conflicts_with = "manifest")]
    pub ensure: String,

    /// Registry username
    #[arg(long, short, conflicts_with = "manifest")]
    pub username: Option<String>,

    /// Environment variable holding the registry password
    #[arg(long, conflicts_with = "manifest")]
    pub password_env: Option<String>,

    /// Email passed to the login call
    #[arg(long, short, conflicts_with = "manifest")]
    pub email: Option<String>,

    /// Account whose ~/.docker/config.json is managed (defaults to the current user)
    #[arg(long, conflicts_with = "manifest")]
    pub local_user: Option<String>,

    /// TOML manifest listing several registries
    #[arg(long, short)]
    pub manifest: Option<PathBuf>,
}

impl TargetArgs {
    pub fn descriptors(&self) -> Result<Vec<RegistryCredential>> {
        if let Some(path) = &self.manifest {
            return load_manifest(path);
        }

        let registry = self
            .registry
            .clone()
            .context("A registry or --manifest is required")?;

        let mut credential = RegistryCredential::new(registry).with_ensure(&self.ensure);
        credential.username = self.username.clone();
        credential.email = self.email.clone();
        credential.local_user = self.local_user.clone();
        if let Some(var) = &self.password_env {
            credential.password = Some(password_from_env(var)?);
        }

        Ok(vec![credential])
    }
}

/// Reconcile every requested registry under the run lock
pub fn apply(settings: &Settings, target: &TargetArgs) -> Result<()> {
    let descriptors = target.descriptors()?;
    let _lock = RunLock::acquire(&settings.lock_path())?;

    let host = SystemHost;
    let runner = SystemRunner::new(&settings.shell);
    let reconciler =
        Reconciler::new(&host, &runner).with_docker_command(&settings.docker_command);

    for desired in &descriptors {
        let report = reconciler
            .reconcile(desired)
            .with_context(|| format!("Failed to reconcile registry {}", desired.registry))?;
        print_report(&report);
    }

    info!("Reconciled {} registry descriptor(s)", descriptors.len());
    Ok(())
}

/// Show the steps a run would take without touching the host
pub fn plan(settings: &Settings, target: &TargetArgs) -> Result<()> {
    let host = SystemHost;
    let runner = SystemRunner::new(&settings.shell);
    let reconciler =
        Reconciler::new(&host, &runner).with_docker_command(&settings.docker_command);

    for desired in target.descriptors()? {
        let steps = reconciler
            .plan(&desired)
            .with_context(|| format!("Failed to plan registry {}", desired.registry))?;

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new("STEP").add_attribute(Attribute::Bold),
                Cell::new("ACTION").add_attribute(Attribute::Bold),
            ]);

        for step in &steps {
            table.add_row(vec![Cell::new(&step.title), Cell::new(describe(&step.action))]);
        }

        println!("{}", table);
    }

    Ok(())
}

fn describe(action: &Action) -> String {
    match action {
        Action::CreateDir { path, mode, .. } => {
            format!("mkdir -m {:04o} {} (if missing)", mode, path.display())
        }
        Action::CreateFile { path, mode, .. } => {
            format!("write {{}} to {} mode {:04o} (if missing)", path.display(), mode)
        }
        Action::EnsureAuthEntry { registry, .. } => format!("add auths.\"{}\"", registry),
        Action::RemoveAuthEntry { registry, .. } => format!("remove auths.\"{}\"", registry),
        Action::Exec(spec) => match &spec.user {
            Some(user) => format!("{} (as {})", spec.command_line(), user),
            None => spec.command_line(),
        },
    }
}

fn print_report(report: &Report) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("STEP").add_attribute(Attribute::Bold),
            Cell::new("RESULT").add_attribute(Attribute::Bold),
        ]);

    for (title, outcome) in &report.steps {
        table.add_row(vec![Cell::new(title), Cell::new(outcome.to_string())]);
    }

    println!("{}", table);
    println!(
        "✓ {} is {} ({} step(s) applied)",
        report.registry,
        report.ensure,
        report.applied()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{ExecArg, ExecSpec};
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct TestCli {
        #[command(flatten)]
        target: TargetArgs,
    }

    fn target(registry: &str) -> TargetArgs {
        TargetArgs {
            registry: Some(registry.to_string()),
            ensure: "present".to_string(),
            username: None,
            password_env: None,
            email: None,
            local_user: None,
            manifest: None,
        }
    }

    #[test]
    fn test_descriptor_from_flags() {
        let mut args = target("localhost:5000");
        args.username = Some("user1".to_string());
        args.ensure = "absent".to_string();

        let creds = args.descriptors().unwrap();
        assert_eq!(creds.len(), 1);
        assert_eq!(creds[0].registry, "localhost:5000");
        assert_eq!(creds[0].ensure, "absent");
        assert_eq!(creds[0].username.as_deref(), Some("user1"));
        assert!(creds[0].password.is_none());
    }

    #[test]
    fn test_manifest_conflicts_with_descriptor_flags() {
        for flag in [
            ["--ensure", "absent"],
            ["--username", "user1"],
            ["--password-env", "REGISTRY_PASSWORD"],
            ["--email", "user1@example.io"],
            ["--local-user", "testuser"],
        ] {
            let err = TestCli::try_parse_from(
                ["regauth", "--manifest", "registries.toml"]
                    .into_iter()
                    .chain(flag),
            )
            .unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
        }
    }

    #[test]
    fn test_manifest_alone_parses() {
        let cli = TestCli::try_parse_from(["regauth", "--manifest", "registries.toml"]).unwrap();
        assert_eq!(cli.target.manifest, Some(PathBuf::from("registries.toml")));
        assert_eq!(cli.target.ensure, "present");

        let cli = TestCli::try_parse_from(["regauth", "localhost:5000", "-u", "user1"]).unwrap();
        assert_eq!(cli.target.registry.as_deref(), Some("localhost:5000"));
    }

    #[test]
    fn test_missing_password_env_is_an_error() {
        let mut args = target("localhost:5000");
        args.password_env = Some("REGAUTH_TEST_UNSET_PASSWORD_VAR".to_string());

        assert!(args.descriptors().is_err());
    }

    #[test]
    fn test_describe_exec_never_shows_password() {
        let spec = ExecSpec {
            title: "localhost:5000 auth".to_string(),
            program: "docker".to_string(),
            args: vec![
                ExecArg::literal("login"),
                ExecArg::literal("-p"),
                ExecArg::EnvRef("password".to_string()),
                ExecArg::literal("localhost:5000"),
            ],
            env: vec![("password".to_string(), "secret".to_string())],
            user: Some("testuser".to_string()),
        };

        let text = describe(&Action::Exec(spec));
        assert_eq!(
            text,
            "docker login -p \"${password}\" localhost:5000 (as testuser)"
        );
    }
}
