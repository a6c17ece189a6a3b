// Reconciler - applies planned steps against the host
//
// A pass validates the descriptor, resolves the target account's home
// directory, plans the ordered steps and applies them one by one. Each step
// checks its own precondition first, so a pass can be re-run at any time;
// the first failing step aborts the pass and earlier steps stay applied.

mod plan;

pub use plan::{plan, store_path, Action, Step};

use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

use crate::credential::{Ensure, RegistryCredential};
use crate::exec::CommandRunner;
use crate::host::Host;

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The descriptor can't be acted on; nothing was touched
    #[error("invalid configuration for registry '{registry}': {message}")]
    Configuration { registry: String, message: String },

    /// A host mutation failed
    #[error("step '{step}' failed")]
    Execution {
        step: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

/// What a step did during a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    Unchanged,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Applied => write!(f, "applied"),
            Outcome::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Per-step results of one reconciliation pass
#[derive(Debug, Clone)]
pub struct Report {
    pub registry: String,
    pub ensure: Ensure,
    pub steps: Vec<(String, Outcome)>,
}

impl Report {
    pub fn applied(&self) -> usize {
        self.steps
            .iter()
            .filter(|(_, outcome)| *outcome == Outcome::Applied)
            .count()
    }
}

pub struct Reconciler<'a> {
    host: &'a dyn Host,
    runner: &'a dyn CommandRunner,
    docker_command: String,
}

impl<'a> Reconciler<'a> {
    pub fn new(host: &'a dyn Host, runner: &'a dyn CommandRunner) -> Self {
        Self {
            host,
            runner,
            docker_command: "docker".to_string(),
        }
    }

    pub fn with_docker_command(mut self, docker_command: impl Into<String>) -> Self {
        self.docker_command = docker_command.into();
        self
    }

    /// Resolve the home directory and plan the pass without mutating anything
    pub fn plan(&self, desired: &RegistryCredential) -> Result<Vec<Step>, ReconcileError> {
        // Validate before any host lookup
        desired.ensure()?;

        let home = self
            .host
            .home_dir(desired.local_user.as_deref())
            .map_err(|e| ReconcileError::Configuration {
                registry: desired.registry.clone(),
                message: format!("{:#}", e),
            })?;

        plan(desired, &home, &self.docker_command)
    }

    /// Bring the host to the state described by `desired`
    pub fn reconcile(&self, desired: &RegistryCredential) -> Result<Report, ReconcileError> {
        let ensure = desired.ensure()?;
        let steps = self.plan(desired)?;

        info!("Reconciling {} (ensure={})", desired.registry, ensure);

        let mut report = Report {
            registry: desired.registry.clone(),
            ensure,
            steps: Vec::with_capacity(steps.len()),
        };

        for step in steps {
            let outcome = self
                .apply(&step.action)
                .map_err(|e| ReconcileError::Execution {
                    step: step.title.clone(),
                    source: e.into(),
                })?;

            match outcome {
                Outcome::Applied => info!("{}: applied", step.title),
                Outcome::Unchanged => debug!("{}: already in desired state", step.title),
            }
            report.steps.push((step.title, outcome));
        }

        Ok(report)
    }

    fn apply(&self, action: &Action) -> anyhow::Result<Outcome> {
        let outcome = match action {
            Action::CreateDir { path, mode, owner } => {
                if self.host.dir_exists(path) {
                    Outcome::Unchanged
                } else {
                    self.host.create_dir(path, *mode, owner.as_deref())?;
                    Outcome::Applied
                }
            }
            Action::CreateFile {
                path,
                contents,
                mode,
                owner,
            } => {
                if self.host.file_exists(path) {
                    Outcome::Unchanged
                } else {
                    self.host
                        .create_file(path, contents, *mode, owner.as_deref())?;
                    Outcome::Applied
                }
            }
            Action::EnsureAuthEntry { store, registry } => {
                changed(self.host.ensure_auth_entry(store, registry)?)
            }
            Action::RemoveAuthEntry { store, registry } => {
                if self.host.file_exists(store) {
                    changed(self.host.remove_auth_entry(store, registry)?)
                } else {
                    Outcome::Unchanged
                }
            }
            Action::Exec(spec) => {
                self.runner.run(spec)?;
                Outcome::Applied
            }
        };
        Ok(outcome)
    }
}

fn changed(changed: bool) -> Outcome {
    if changed {
        Outcome::Applied
    } else {
        Outcome::Unchanged
    }
}
