// Process execution primitive (login/logout calls)

use anyhow::{bail, Context, Result};
use nix::unistd::{Gid, Uid};
use std::ffi::CString;
use std::fmt;
use std::os::unix::process::CommandExt;
use std::process::Command;
use tracing::debug;

use crate::host::{lookup_user, UserAccount};

/// One token of a command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecArg {
    /// Passed through as-is (quoted for the shell when needed)
    Literal(String),
    /// Expanded by the shell from the invocation's environment
    EnvRef(String),
}

impl ExecArg {
    pub fn literal(value: impl Into<String>) -> Self {
        ExecArg::Literal(value.into())
    }
}

/// A single external command invocation
#[derive(Clone, PartialEq, Eq)]
pub struct ExecSpec {
    pub title: String,
    pub program: String,
    pub args: Vec<ExecArg>,
    /// Variables set only for this invocation. Values may be secrets.
    pub env: Vec<(String, String)>,
    /// Account to run as; `None` runs as the current process owner
    pub user: Option<String>,
}

impl fmt::Debug for ExecSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_names: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("ExecSpec")
            .field("title", &self.title)
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &env_names)
            .field("user", &self.user)
            .finish()
    }
}

impl ExecSpec {
    /// Literal argument values, with env references rendered as `${NAME}`
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn argv(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| match arg {
                ExecArg::Literal(value) => value.clone(),
                ExecArg::EnvRef(name) => format!("${{{}}}", name),
            })
            .collect()
    }

    /// Shell command line for this invocation. Contains no env values.
    pub fn command_line(&self) -> String {
        let mut parts = vec![shell_quote(&self.program)];
        for arg in &self.args {
            match arg {
                ExecArg::Literal(value) => parts.push(shell_quote(value)),
                ExecArg::EnvRef(name) => parts.push(format!("\"${{{}}}\"", name)),
            }
        }
        parts.join(" ")
    }
}

fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:@%+=,".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "'\\''"))
    }
}

/// Runs external commands on behalf of the reconciler
pub trait CommandRunner {
    fn run(&self, spec: &ExecSpec) -> Result<()>;
}

/// Runs commands through a POSIX shell on the local host
pub struct SystemRunner {
    shell: String,
}

impl SystemRunner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &ExecSpec) -> Result<()> {
        let line = spec.command_line();
        debug!("Executing command: {}", line);

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(&line);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        if let Some(name) = &spec.user {
            let account = lookup_user(name)?;
            if account.uid != nix::unistd::geteuid() {
                debug!("Running '{}' as user {}", spec.title, name);
                switch_user(&mut cmd, &account)?;
            }
        }

        let status = cmd
            .status()
            .with_context(|| format!("Failed to execute {}", spec.program))?;

        if !status.success() {
            bail!("{} failed with status: {}", line, status);
        }

        Ok(())
    }
}

/// Every group `account` belongs to, its primary group included
pub fn account_groups(account: &UserAccount) -> Result<Vec<Gid>> {
    let name = CString::new(account.name.as_str())
        .with_context(|| format!("Invalid user name '{}'", account.name))?;
    nix::unistd::getgrouplist(&name, account.gid)
        .with_context(|| format!("Failed to list groups of user '{}'", account.name))
}

/// Make the child run as `account` with its full group list.
///
/// `Command::uid` would clear the supplementary groups, so the switch is done
/// by hand in the forked child: groups first, then gid, then uid.
fn switch_user(cmd: &mut Command, account: &UserAccount) -> Result<()> {
    let groups = account_groups(account)?;
    let uid: Uid = account.uid;
    let gid: Gid = account.gid;

    cmd.env("HOME", &account.home).env("USER", &account.name);

    // SAFETY: the closure only issues setgroups/setgid/setuid, which are
    // async-signal-safe, on data prepared before the fork.
    unsafe {
        cmd.pre_exec(move || {
            nix::unistd::setgroups(&groups)?;
            nix::unistd::setgid(gid)?;
            nix::unistd::setuid(uid)?;
            Ok(())
        });
    }
    Ok(())
}
