//! Narrow process-spawning capability.
//!
//! Every external program the engine starts (interpreter provisioning, the
//! package installer, tool execution) goes through a [`ProcessRunner`], so the
//! lifecycle logic can be driven by a scripted runner in tests.

use std::ffi::OsString;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error};
use crate::error::{EngineError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Whether a child's output is captured or passed through to the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StdioMode {
    #[default]
    Capture,
    Inherit,
}

/// A fully described command: program, arguments, environment edits and limits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, OsString)>,
    pub env_remove: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub stdio: StdioMode,
}

impl CommandSpec {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
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

    pub fn env<K: Into<String>, V: Into<OsString>>(mut self, key: K, value: V) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn env_remove<K: Into<String>>(mut self, key: K) -> Self {
        self.env_remove.push(key.into());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn stdio(mut self, stdio: StdioMode) -> Self {
        self.stdio = stdio;
        self
    }

    /// The command line as one string, for log lines and error messages.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Exit code and output of a finished process. Output is empty when the
/// command ran with [`StdioMode::Inherit`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

pub trait ProcessRunner {
    /// Runs a command to completion.
    ///
    /// A non-zero exit status is reported through [`RunOutput::code`], not as an
    /// error. Errors are reserved for spawn failures and timeouts.
    fn run(&self, spec: &CommandSpec) -> Result<RunOutput>;
}

/// Runs `spec` and turns a non-zero exit into [`EngineError::CommandFailed`],
/// logging the exact command and its captured output.
pub fn run_checked(runner: &dyn ProcessRunner, spec: &CommandSpec) -> Result<RunOutput> {
    let output = runner.run(spec)?;
    if output.success() {
        return Ok(output);
    }
    error!(
        command = %spec.display(),
        code = output.code,
        stdout = %output.stdout.trim(),
        stderr = %output.stderr.trim(),
        "command failed"
    );
    Err(EngineError::CommandFailed {
        command: spec.display(),
        code: output.code,
        stdout: output.stdout,
        stderr: output.stderr,
    })
}

/// [`ProcessRunner`] backed by `std::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<RunOutput> {
        debug!(command = %spec.display(), "spawning");
        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        for key in &spec.env_remove {
            command.env_remove(key);
        }
        for (key, value) in &spec.envs {
            command.env(key, value);
        }
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        match spec.stdio {
            StdioMode::Capture => {
                command.stdin(Stdio::null());
                command.stdout(Stdio::piped());
                command.stderr(Stdio::piped());
            }
            StdioMode::Inherit => {
                command.stdin(Stdio::inherit());
                command.stdout(Stdio::inherit());
                command.stderr(Stdio::inherit());
            }
        }

        let mut child = command.spawn().map_err(|e| {
            error!(command = %spec.display(), "failed to start: {e}");
            EngineError::Io(e)
        })?;

        // Drain pipes while the child runs so a full pipe buffer can't stall it.
        let stdout_handle = child.stdout.take().map(|mut out| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = out.read_to_end(&mut buf);
                String::from_utf8_lossy(&buf).into_owned()
            })
        });
        let stderr_handle = child.stderr.take().map(|mut err| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = err.read_to_end(&mut buf);
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        let status = match spec.timeout {
            None => child.wait()?,
            Some(timeout) => {
                let start = Instant::now();
                loop {
                    if let Some(status) = child.try_wait()? {
                        break status;
                    }
                    if start.elapsed() >= timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        // Grandchildren may still hold the pipes open; leave the
                        // readers detached instead of joining them.
                        drop(stdout_handle);
                        drop(stderr_handle);
                        error!(command = %spec.display(), secs = timeout.as_secs(), "command timed out");
                        return Err(EngineError::Timeout {
                            command: spec.display(),
                            secs: timeout.as_secs(),
                        });
                    }
                    thread::sleep(POLL_INTERVAL);
                }
            }
        };

        let stdout = stdout_handle
            .map(|h| h.join().unwrap_or_default())
            .unwrap_or_default();
        let stderr = stderr_handle
            .map(|h| h.join().unwrap_or_default())
            .unwrap_or_default();

        Ok(RunOutput {
            code: status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }
}
