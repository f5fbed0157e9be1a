//! Fixtures shared by unit tests: wheel archives built on the fly and a
//! scripted process runner that fakes `venv` and `pip` against a [`MemoryFs`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;
use crate::archive::split_archive_filename;
use crate::error::{EngineError, Result};
use crate::fs::{Filesystem, MemoryFs};
use crate::process::{CommandSpec, ProcessRunner, RunOutput};
use crate::requirement::{canonical_name, parse_requirement};
use crate::util::{env_executable, has_archive_extension};

pub(crate) const SAMPLE_METADATA: &str = "Metadata-Version: 2.1
Name: sample-tool
Version: 1.2.0
Summary: A sample tool
Home-page: https://example.org
Author: Jo Doe
License: MIT
Requires-Python: >=3.9
Requires-Dist: requests>=2.0
Requires-Dist: click
Requires-Dist: pytest; extra == 'dev'

Long description body.
Name: not-a-header
";

/// Builder for a `.whl` file written into a test directory.
pub(crate) struct WheelFixture {
    name: String,
    version: String,
    file_name: Option<String>,
    metadata: Option<String>,
    requires: Vec<String>,
    entry_points: Option<String>,
    with_metadata: bool,
}

impl WheelFixture {
    pub(crate) fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            file_name: None,
            metadata: None,
            requires: Vec::new(),
            entry_points: None,
            with_metadata: true,
        }
    }

    pub(crate) fn metadata(mut self, metadata: &str) -> Self {
        self.metadata = Some(metadata.to_string());
        self
    }

    /// Adds `Requires-Dist` headers to the generated metadata.
    pub(crate) fn requires(mut self, requirements: &[&str]) -> Self {
        self.requires.extend(requirements.iter().map(|r| r.to_string()));
        self
    }

    pub(crate) fn entry_points(mut self, entry_points: &str) -> Self {
        self.entry_points = Some(entry_points.to_string());
        self
    }

    pub(crate) fn console_script(self, name: &str, target: &str) -> Self {
        let entry_points = format!("[console_scripts]\n{name} = {target}\n");
        self.entry_points(&entry_points)
    }

    pub(crate) fn without_metadata(mut self) -> Self {
        self.with_metadata = false;
        self
    }

    pub(crate) fn file_name(mut self, file_name: &str) -> Self {
        self.file_name = Some(file_name.to_string());
        self
    }

    pub(crate) fn write(&self, dir: &Path) -> PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        let file_name = self
            .file_name
            .clone()
            .unwrap_or_else(|| format!("{}-{}-py3-none-any.whl", self.name, self.version));
        let path = dir.join(file_name);
        let dist_info = format!("{}-{}.dist-info", self.name, self.version);

        let mut writer = ZipWriter::new(File::create(&path).unwrap());
        let options = SimpleFileOptions::default();

        writer.start_file(format!("{}/__init__.py", self.name), options).unwrap();
        writer.write_all(b"").unwrap();

        if self.with_metadata {
            let mut metadata = self
                .metadata
                .clone()
                .unwrap_or_else(|| format!("Name: {}\nVersion: {}\n", self.name, self.version));
            for requirement in &self.requires {
                metadata.push_str(&format!("Requires-Dist: {requirement}\n"));
            }
            writer.start_file(format!("{dist_info}/METADATA"), options).unwrap();
            writer.write_all(metadata.as_bytes()).unwrap();
        }
        if let Some(entry_points) = &self.entry_points {
            writer.start_file(format!("{dist_info}/entry_points.txt"), options).unwrap();
            writer.write_all(entry_points.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
        path
    }
}

#[derive(Default)]
struct FakeState {
    calls: Vec<CommandSpec>,
    installed: HashMap<PathBuf, BTreeMap<String, String>>,
    versions: HashMap<String, String>,
    phantoms: HashSet<String>,
    failing: Vec<(String, i32)>,
    hanging: Vec<String>,
}

/// A [`ProcessRunner`] that understands just enough of `python -m venv`,
/// `python --version` and `pip` to drive the environment lifecycle.
///
/// Interpreters exist only as files in the shared [`MemoryFs`]; running one
/// that isn't there behaves like a missing executable.
pub(crate) struct FakeRunner {
    fs: Arc<MemoryFs>,
    state: Mutex<FakeState>,
}

impl FakeRunner {
    pub(crate) fn new(fs: Arc<MemoryFs>) -> Self {
        Self {
            fs,
            state: Mutex::new(FakeState::default()),
        }
    }

    /// Version reported for `name` once installed. Defaults to `1.0.0`.
    pub(crate) fn with_version(self, name: &str, version: &str) -> Self {
        self.lock().versions.insert(canonical_name(name), version.to_string());
        self
    }

    /// `pip install name` succeeds without installing anything.
    pub(crate) fn phantom(self, name: &str) -> Self {
        self.lock().phantoms.insert(canonical_name(name));
        self
    }

    /// Commands whose command line contains `pattern` exit with `code`.
    pub(crate) fn fail_on(&self, pattern: &str, code: i32) {
        self.lock().failing.push((pattern.to_string(), code));
    }

    /// Commands whose command line contains `pattern` time out.
    pub(crate) fn hang_on(&self, pattern: &str) {
        self.lock().hanging.push(pattern.to_string());
    }

    pub(crate) fn calls(&self) -> Vec<CommandSpec> {
        self.lock().calls.clone()
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.lock().calls.iter().map(CommandSpec::display).collect()
    }

    pub(crate) fn installed_in(&self, env_root: &Path) -> BTreeMap<String, String> {
        self.lock().installed.get(env_root).cloned().unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn missing_program(spec: &CommandSpec) -> EngineError {
        EngineError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} not found", spec.program),
        ))
    }

    fn env_root(program: &str) -> PathBuf {
        Path::new(program)
            .parent()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    fn ok(stdout: &str) -> Result<RunOutput> {
        Ok(RunOutput {
            code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }

    fn install(&self, root: &Path, requirement: &str) -> Result<RunOutput> {
        let path = Path::new(requirement);
        let (name, version) = if has_archive_extension(path) {
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            match split_archive_filename(stem) {
                Some(pair) => pair,
                None => (stem.to_string(), "0.0.0".to_string()),
            }
        } else {
            let name = match parse_requirement(requirement).spec() {
                Some(spec) => spec.name.clone(),
                None => requirement.to_string(),
            };
            let version = self
                .lock()
                .versions
                .get(&canonical_name(&name))
                .cloned()
                .unwrap_or_else(|| "1.0.0".to_string());
            (name, version)
        };

        let mut state = self.lock();
        if !state.phantoms.contains(&canonical_name(&name)) {
            state
                .installed
                .entry(root.to_path_buf())
                .or_default()
                .insert(name, version);
        }
        Self::ok("Successfully installed")
    }
}

impl ProcessRunner for FakeRunner {
    fn run(&self, spec: &CommandSpec) -> Result<RunOutput> {
        let line = spec.display();
        {
            let mut state = self.lock();
            state.calls.push(spec.clone());
            if state.hanging.iter().any(|p| line.contains(p.as_str())) {
                return Err(EngineError::Timeout {
                    command: line,
                    secs: spec.timeout.map(|t| t.as_secs()).unwrap_or_default(),
                });
            }
            if let Some((_, code)) = state.failing.iter().find(|(p, _)| line.contains(p.as_str())) {
                return Ok(RunOutput {
                    code: *code,
                    stdout: String::new(),
                    stderr: "scripted failure".to_string(),
                });
            }
        }

        let args: Vec<&str> = spec.args.iter().map(String::as_str).collect();

        if let ["-m", "venv", target] = args.as_slice() {
            let root = PathBuf::from(target);
            self.fs.add_file(env_executable(&root, "python"));
            self.fs.add_file(env_executable(&root, "pip"));
            let mut packages = BTreeMap::new();
            packages.insert("pip".to_string(), "23.0".to_string());
            self.lock().installed.insert(root, packages);
            return Self::ok("");
        }

        // everything else runs an executable from inside an environment
        let program = Path::new(&spec.program);
        if program.is_absolute() && !self.fs.exists(program) {
            return Err(Self::missing_program(spec));
        }
        let root = Self::env_root(&spec.program);

        match args.as_slice() {
            ["--version"] => Self::ok("Python 3.12.1\n"),
            ["list", "--format=freeze"] => {
                let listing: String = self
                    .installed_in(&root)
                    .iter()
                    .map(|(name, version)| format!("{name}=={version}\n"))
                    .collect();
                Self::ok(&listing)
            }
            ["install", "--upgrade", "pip"] => {
                self.lock()
                    .installed
                    .entry(root)
                    .or_default()
                    .insert("pip".to_string(), "24.1".to_string());
                Self::ok("")
            }
            ["install", "-r", file] => {
                let content = std::fs::read_to_string(file)?;
                for line in content.lines().map(str::trim) {
                    if !line.is_empty() && !line.starts_with('#') {
                        self.install(&root, line)?;
                    }
                }
                Self::ok("")
            }
            ["install", requirement] => self.install(&root, requirement),
            _ => Self::ok(&format!("ran {line}\n")),
        }
    }
}
