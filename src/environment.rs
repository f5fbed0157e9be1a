//! Per-tool isolated environments.
//!
//! One environment per tool identity lives under the environments root:
//!
//! ```text
//! <environments>/<tool>/bin/python     (Scripts\python.exe on Windows)
//! <environments>/<tool>/bin/pip
//! ```
//!
//! Nothing is tracked in memory. An environment exists when its directory and
//! its interpreter are both on disk; anything else is absent or incomplete.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use crate::config::Settings;
use crate::error::{EngineError, Result};
use crate::fs::{Filesystem, RealFs};
use crate::process::{run_checked, CommandSpec, ProcessRunner, RunOutput, StdioMode, SystemRunner};
use crate::requirement::canonical_name;
use crate::util::{env_bin_dir, env_executable, prepend_search_path, sanitize_name};

const INTERPRETER_ALIASES: &[&str] = &["python", "python3"];
const REQUIREMENT_NAME_STOPS: &[&str] = &[">=", "==", "<", ">", "~=", "!=", ";", "["];

/// Well-known paths inside one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentLayout {
    pub root: PathBuf,
    pub bin_dir: PathBuf,
    pub python: PathBuf,
    pub pip: PathBuf,
}

impl EnvironmentLayout {
    pub fn new(root: PathBuf) -> Self {
        Self {
            bin_dir: env_bin_dir(&root),
            python: env_executable(&root, "python"),
            pip: env_executable(&root, "pip"),
            root,
        }
    }
}

/// What the filesystem currently says about an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentState {
    Absent,
    /// The directory exists but has no interpreter.
    Incomplete,
    Ready,
}

/// How [`EnvironmentManager::run_in_environment`] starts a command.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub stdio: StdioMode,
    pub timeout: Option<Duration>,
    /// Treat a non-zero exit as [`EngineError::CommandFailed`].
    pub check: bool,
    pub cwd: Option<PathBuf>,
}

pub struct EnvironmentManager {
    root: PathBuf,
    python: String,
    validate_timeout: Duration,
    install_timeout: Option<Duration>,
    fs: Arc<dyn Filesystem>,
    runner: Arc<dyn ProcessRunner>,
}

impl EnvironmentManager {
    /// Creates a manager on the real filesystem that spawns real processes.
    ///
    /// # Errors
    /// Fails if the environments root can't be created.
    pub fn new(settings: &Settings) -> Result<Self> {
        Self::with_backends(settings, Arc::new(RealFs), Arc::new(SystemRunner))
    }

    pub fn with_backends(
        settings: &Settings,
        fs: Arc<dyn Filesystem>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Result<Self> {
        let root = settings.environments_dir();
        fs.create_dir_all(&root).map_err(|e| {
            error!(path = %root.display(), "cannot create environments root: {e}");
            EngineError::Io(e)
        })?;
        Ok(Self {
            root,
            python: settings.python.clone(),
            validate_timeout: settings.validate_timeout(),
            install_timeout: settings.install_timeout(),
            fs,
            runner,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layout(&self, tool: &str) -> EnvironmentLayout {
        EnvironmentLayout::new(self.root.join(sanitize_name(tool)))
    }

    pub fn state(&self, tool: &str) -> EnvironmentState {
        let layout = self.layout(tool);
        if !self.fs.is_dir(&layout.root) {
            EnvironmentState::Absent
        } else if !self.fs.exists(&layout.python) {
            EnvironmentState::Incomplete
        } else {
            EnvironmentState::Ready
        }
    }

    pub fn environment_exists(&self, tool: &str) -> bool {
        self.state(tool) == EnvironmentState::Ready
    }

    /// Builds a fresh environment, removing whatever was there before.
    ///
    /// Provisioning ends with an installer self-upgrade. If any step fails the
    /// directory is removed again, so a failed create leaves the environment
    /// absent rather than half-built.
    pub fn create(&self, tool: &str) -> Result<EnvironmentLayout> {
        let layout = self.layout(tool);
        if self.fs.exists(&layout.root) {
            info!(tool, path = %layout.root.display(), "removing existing environment");
            self.fs.remove_dir_all(&layout.root)?;
        }

        debug!(tool, "provisioning environment");
        if let Err(e) = self.provision(tool, &layout) {
            error!(tool, "failed to create environment: {e}");
            if self.fs.exists(&layout.root) {
                if let Err(cleanup) = self.fs.remove_dir_all(&layout.root) {
                    warn!(tool, "failed to clean up partial environment: {cleanup}");
                }
            }
            return Err(e);
        }

        info!(tool, path = %layout.root.display(), "created environment");
        Ok(layout)
    }

    fn provision(&self, tool: &str, layout: &EnvironmentLayout) -> Result<()> {
        let venv = CommandSpec::new(self.python.as_str())
            .args(["-m", "venv"])
            .arg(layout.root.to_string_lossy())
            .timeout(self.install_timeout);
        run_checked(self.runner.as_ref(), &venv)?;

        if !self.fs.exists(&layout.python) {
            return Err(EngineError::EnvironmentInvalid {
                tool: tool.to_string(),
                reason: format!("no interpreter at {}", layout.python.display()),
            });
        }

        let upgrade = self
            .pip_command(layout)
            .args(["install", "--upgrade", "pip"])
            .timeout(self.install_timeout);
        run_checked(self.runner.as_ref(), &upgrade)?;
        Ok(())
    }

    /// Deletes the environment. Returns `false` if there was nothing to
    /// delete or deletion failed.
    pub fn remove(&self, tool: &str) -> bool {
        let layout = self.layout(tool);
        if !self.fs.exists(&layout.root) {
            info!(tool, "no environment to remove");
            return false;
        }
        match self.fs.remove_dir_all(&layout.root) {
            Ok(()) => {
                info!(tool, "removed environment");
                true
            }
            Err(e) => {
                error!(tool, "failed to remove environment: {e}");
                false
            }
        }
    }

    /// Checks that the environment exists, its interpreter answers within the
    /// validation timeout, and every package in `required` is installed.
    ///
    /// `required` holds package names; any constraint text after the name is
    /// ignored.
    pub fn validate(&self, tool: &str, required: Option<&[String]>) -> bool {
        if !self.environment_exists(tool) {
            debug!(tool, "environment does not exist");
            return false;
        }

        let layout = self.layout(tool);
        let probe = CommandSpec::new(layout.python.to_string_lossy())
            .arg("--version")
            .timeout(Some(self.validate_timeout));
        match self.runner.run(&probe) {
            Ok(output) if output.success() => {}
            Ok(output) => {
                warn!(tool, code = output.code, "interpreter check failed");
                return false;
            }
            Err(e) => {
                warn!(tool, "interpreter check failed: {e}");
                return false;
            }
        }

        if let Some(required) = required {
            let installed = self.installed_packages(tool);
            for requirement in required {
                let name = requirement_name(requirement);
                if !installed.contains_key(&canonical_name(name)) {
                    warn!(tool, package = name, "required package not installed");
                    return false;
                }
            }
        }
        true
    }

    /// Installed packages keyed by canonical name. Empty when the environment
    /// is missing or the listing fails.
    pub fn installed_packages(&self, tool: &str) -> BTreeMap<String, String> {
        if !self.environment_exists(tool) {
            info!(tool, "environment does not exist, no installed packages");
            return BTreeMap::new();
        }
        let layout = self.layout(tool);
        let listing = self
            .pip_command(&layout)
            .args(["list", "--format=freeze"])
            .timeout(self.install_timeout);
        match run_checked(self.runner.as_ref(), &listing) {
            Ok(output) => parse_freeze(&output.stdout),
            Err(e) => {
                error!(tool, "failed to list installed packages: {e}");
                BTreeMap::new()
            }
        }
    }

    pub fn is_package_installed(&self, tool: &str, package: &str) -> bool {
        self.installed_packages(tool)
            .contains_key(&canonical_name(package))
    }

    /// Installs each requirement in order, stopping at the first failure.
    pub fn install_dependencies(&self, tool: &str, requirements: &[String]) -> Result<()> {
        if !self.environment_exists(tool) {
            return Err(EngineError::EnvironmentMissing(tool.to_string()));
        }
        let layout = self.layout(tool);
        for requirement in requirements {
            info!(tool, requirement = %requirement, "installing dependency");
            let install = self
                .pip_command(&layout)
                .args(["install", requirement.as_str()])
                .timeout(self.install_timeout);
            run_checked(self.runner.as_ref(), &install)?;
        }
        Ok(())
    }

    pub fn install_requirements_file(&self, tool: &str, file: &Path) -> Result<()> {
        if !self.environment_exists(tool) {
            return Err(EngineError::EnvironmentMissing(tool.to_string()));
        }
        if !file.is_file() {
            return Err(EngineError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("requirements file {} not found", file.display()),
            )));
        }
        let layout = self.layout(tool);
        info!(tool, file = %file.display(), "installing requirements file");
        let install = self
            .pip_command(&layout)
            .args(["install", "-r"])
            .arg(file.to_string_lossy())
            .timeout(self.install_timeout);
        run_checked(self.runner.as_ref(), &install)?;
        Ok(())
    }

    /// Installs a package archive, creating the environment first if needed.
    ///
    /// `extra_dependencies` go in before the archive. They stay installed if
    /// the archive itself then fails.
    pub fn install_archive(
        &self,
        tool: &str,
        archive: &Path,
        extra_dependencies: &[String],
    ) -> Result<()> {
        if !self.environment_exists(tool) {
            self.create(tool)?;
        }
        if !extra_dependencies.is_empty() {
            self.install_dependencies(tool, extra_dependencies)?;
        }
        let layout = self.layout(tool);
        info!(tool, archive = %archive.display(), "installing archive");
        let install = self
            .pip_command(&layout)
            .arg("install")
            .arg(archive.to_string_lossy())
            .timeout(self.install_timeout);
        run_checked(self.runner.as_ref(), &install)?;
        Ok(())
    }

    /// Runs `command` with the environment activated.
    ///
    /// The environment's executable directory goes first on `PATH`,
    /// `VIRTUAL_ENV` points at the environment and `PYTHONHOME` is dropped. A
    /// leading `python`/`python3` becomes the environment's own interpreter.
    pub fn run_in_environment(
        &self,
        tool: &str,
        command: &[String],
        options: &RunOptions,
    ) -> Result<RunOutput> {
        if !self.environment_exists(tool) {
            return Err(EngineError::EnvironmentMissing(tool.to_string()));
        }
        let (program, args) = command
            .split_first()
            .ok_or_else(|| EngineError::NoEntryPoint(tool.to_string()))?;

        let layout = self.layout(tool);
        let program = if INTERPRETER_ALIASES.contains(&program.as_str()) {
            layout.python.to_string_lossy().into_owned()
        } else {
            let local = env_executable(&layout.root, program);
            if self.fs.exists(&local) {
                local.to_string_lossy().into_owned()
            } else {
                program.clone()
            }
        };

        let path = prepend_search_path(&layout.bin_dir, std::env::var_os("PATH"))
            .map_err(|e| EngineError::Config(e.to_string()))?;
        let mut spec = CommandSpec::new(program)
            .args(args.iter().cloned())
            .env("PATH", path)
            .env("VIRTUAL_ENV", layout.root.as_os_str())
            .env_remove("PYTHONHOME")
            .timeout(options.timeout)
            .stdio(options.stdio);
        spec.cwd = options.cwd.clone();

        info!(tool, command = %spec.display(), "running in environment");
        if options.check {
            run_checked(self.runner.as_ref(), &spec)
        } else {
            self.runner.run(&spec)
        }
    }

    /// Tool identities with a ready environment, sorted.
    pub fn list_environments(&self) -> Vec<String> {
        if !self.fs.is_dir(&self.root) {
            return Vec::new();
        }
        let dirs = match self.fs.list_dirs(&self.root) {
            Ok(dirs) => dirs,
            Err(e) => {
                warn!(path = %self.root.display(), "failed to list environments: {e}");
                return Vec::new();
            }
        };
        let mut names: Vec<String> = dirs
            .iter()
            .filter_map(|dir| dir.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .filter(|name| self.environment_exists(name))
            .collect();
        names.sort();
        names
    }

    fn pip_command(&self, layout: &EnvironmentLayout) -> CommandSpec {
        CommandSpec::new(layout.pip.to_string_lossy())
    }
}

/// Package name at the front of a requirement, before any constraint.
fn requirement_name(requirement: &str) -> &str {
    let end = REQUIREMENT_NAME_STOPS
        .iter()
        .filter_map(|stop| requirement.find(stop))
        .min()
        .unwrap_or(requirement.len());
    requirement[..end].trim()
}

/// Parses `pip list --format=freeze` output into canonical name → version.
pub(crate) fn parse_freeze(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('-') && !line.contains(" @ "))
        .filter_map(|line| line.split_once("=="))
        .map(|(name, version)| (canonical_name(name.trim()), version.trim().to_string()))
        .filter(|(name, version)| !name.is_empty() && !version.is_empty())
        .collect()
}
