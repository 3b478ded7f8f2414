/*!

Every external tool (`kubectl`, `helm`, `k3d`, `systemctl`, ...) is reached through the
[`CommandRunner`] trait. [`SystemRunner`] spawns real processes; tests substitute a scripted
runner that records each [`Invocation`].

!*/

use async_trait::async_trait;
use log::{debug, trace};
use snafu::{ensure, ResultExt, Snafu};
use std::fmt::{Display, Formatter};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Failed to launch '{}': {}", command, source))]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("Failed to write stdin of '{}': {}", command, source))]
    Stdin {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("Failed waiting for '{}': {}", command, source))]
    Wait {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("'{}' did not finish within {:?}", command, timeout))]
    Timeout { command: String, timeout: Duration },

    #[snafu(display("'{}' failed with exit code {}: {}", command, code, stderr))]
    Failed {
        command: String,
        code: i32,
        stderr: String,
    },
}

impl Error {
    /// `true` when the program could not be found at all, as opposed to running and failing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Spawn { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// A single external command: program, arguments, extra environment, optional stdin and an
/// optional timeout that overrides the runner's default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    stdin: Option<Vec<u8>>,
    timeout: Option<Duration>,
}

impl Invocation {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin<B: Into<Vec<u8>>>(mut self, input: B) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn environment(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn input(&self) -> Option<&[u8]> {
        self.stdin.as_deref()
    }

    pub fn time_limit(&self) -> Option<Duration> {
        self.timeout
    }
}

impl Display for Invocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// The captured result of a command that ran to completion. A non-zero exit code is not an
/// error at this level, callers decide with [`CommandOutput::check`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Convert a non-zero exit into [`Error::Failed`].
    pub fn check(self, invocation: &Invocation) -> Result<CommandOutput> {
        ensure!(
            self.success(),
            FailedSnafu {
                command: invocation.to_string(),
                code: self.code,
                stderr: self.stderr.trim().to_string(),
            }
        );
        Ok(self)
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `invocation` to completion. Returns `Err` only when the process could not be run or
    /// did not finish in time.
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;

    /// Run `invocation` and require a zero exit code.
    async fn run_checked(&self, invocation: &Invocation) -> Result<CommandOutput> {
        self.run(invocation).await?.check(invocation)
    }
}

/// Runs commands as real child processes on the host.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    default_timeout: Duration,
}

impl SystemRunner {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        let command = invocation.to_string();
        let timeout = invocation.time_limit().unwrap_or(self.default_timeout);
        debug!("Running '{}'", command);

        let mut child = Command::new(invocation.program())
            .args(invocation.arguments())
            .envs(invocation.environment().iter().map(|(k, v)| (k, v)))
            .stdin(if invocation.input().is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context(SpawnSnafu {
                command: command.clone(),
            })?;

        if let (Some(input), Some(mut stdin)) = (invocation.input(), child.stdin.take()) {
            stdin.write_all(input).await.context(StdinSnafu {
                command: command.clone(),
            })?;
            // Dropping stdin closes the pipe so the child sees EOF.
            drop(stdin);
        }

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::Timeout {
                command: command.clone(),
                timeout,
            })?
            .context(WaitSnafu {
                command: command.clone(),
            })?;

        let output = CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        trace!(
            "'{}' exited with {}\n{}\n{}",
            command,
            output.code,
            output.stdout,
            output.stderr
        );
        Ok(output)
    }
}
