use std::collections::BTreeMap;
use std::path::Path;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use crate::archive::ArchiveDescriptor;
use crate::error::{EngineError, Result};

const DEFAULT_VERSION: &str = "1.0.0";
const DEFAULT_PYTHON_REQUIREMENT: &str = ">=3.11";

/// How a tool is started. A configuration declares at most one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMethod {
    /// A console command installed into the environment's executable directory.
    EntryCommand(String),
    /// A module run with `python -m`.
    Module(String),
    /// A script file run with the environment's interpreter.
    Script(String),
    /// A raw command vector.
    Command(Vec<String>),
}

/// Operating systems a tool is restricted to. All false means no restriction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformRestriction {
    pub windows_only: bool,
    pub linux_only: bool,
    pub macos_only: bool,
}

impl PlatformRestriction {
    /// Whether the restriction permits the given `std::env::consts::OS` value.
    pub fn allows(&self, os: &str) -> bool {
        if !(self.windows_only || self.linux_only || self.macos_only) {
            return true;
        }
        (self.windows_only && os == "windows")
            || (self.linux_only && os == "linux")
            || (self.macos_only && os == "macos")
    }

    pub fn allows_current(&self) -> bool {
        self.allows(std::env::consts::OS)
    }
}

/// Configuration of one tool, derived from its archive or manifest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolConfiguration {
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub license: String,
    /// Interpreter constraint, e.g. `>=3.11`.
    pub python_version: String,
    pub dependencies: Vec<String>,
    pub dev_dependencies: Vec<String>,
    pub run_method: Option<RunMethod>,
    pub platform: PlatformRestriction,
    pub homepage: String,
    pub repository: String,
    pub documentation: String,
    pub keywords: Vec<String>,
    pub pre_install_commands: Vec<String>,
    pub post_install_commands: Vec<String>,
}

/// A project author, either a bare string or a `{ name, email }` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Author {
    Name(String),
    Table {
        name: Option<String>,
        email: Option<String>,
    },
}

impl Author {
    pub fn display_name(&self) -> String {
        match self {
            Author::Name(name) => name.clone(),
            Author::Table { name, .. } => name.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryPointTable {
    pub module: Option<String>,
    pub script: Option<String>,
    pub command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallTable {
    pub pre_install: Vec<String>,
    pub post_install: Vec<String>,
}

/// The `[tool.isotool]` table of a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolTable {
    pub entry_points: EntryPointTable,
    pub platform: PlatformRestriction,
    pub install: InstallTable,
}

/// Project metadata in the shape of a `pyproject.toml` `[project]` table.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestRecord {
    pub name: String,
    pub version: String,
    pub description: String,
    pub authors: Vec<Author>,
    pub license: String,
    pub homepage: String,
    pub repository: String,
    pub documentation: String,
    pub keywords: Vec<String>,
    pub python_requires: String,
    pub dependencies: Vec<String>,
    pub optional_dependencies: BTreeMap<String, Vec<String>>,
    pub console_scripts: IndexMap<String, String>,
    pub gui_scripts: IndexMap<String, String>,
    pub tool: ToolTable,
}

#[derive(Deserialize)]
struct PyProjectFile {
    project: Option<ProjectTable>,
    #[serde(default)]
    tool: ToolSection,
}

#[derive(Deserialize, Default)]
struct ToolSection {
    #[serde(rename = "isotool")]
    table: Option<ToolTable>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LicenseField {
    Text(String),
    Table {
        text: Option<String>,
        file: Option<String>,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ProjectTable {
    name: Option<String>,
    version: Option<toml::Value>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    authors: Vec<Author>,
    author: Option<String>,
    license: Option<LicenseField>,
    homepage: Option<String>,
    #[serde(default)]
    keywords: Vec<String>,
    requires_python: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    optional_dependencies: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    scripts: IndexMap<String, String>,
    #[serde(default)]
    gui_scripts: IndexMap<String, String>,
    #[serde(default)]
    entry_points: BTreeMap<String, IndexMap<String, String>>,
    #[serde(default)]
    urls: BTreeMap<String, String>,
}

impl ManifestRecord {
    /// Loads a `pyproject.toml` file.
    ///
    /// # Errors
    /// Returns an error if the file can't be read, isn't valid TOML, or lacks
    /// a `[project]` table with a name.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<ManifestRecord> {
        let content = std::fs::read_to_string(path.as_ref())?;
        ManifestRecord::parse_pyproject(&content)
    }

    /// Parses the text of a `pyproject.toml` file.
    pub fn parse_pyproject(content: &str) -> Result<ManifestRecord> {
        let file: PyProjectFile = toml::from_str(content)?;
        let project = file
            .project
            .ok_or_else(|| EngineError::InvalidManifest("no [project] table".to_string()))?;
        let name = project
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| EngineError::InvalidManifest("project name is required".to_string()))?;

        // a dynamic version (`{ attr = ... }`) can't be resolved without running code
        let version = match project.version {
            Some(toml::Value::String(version)) => version,
            _ => DEFAULT_VERSION.to_string(),
        };

        let authors = if !project.authors.is_empty() {
            project.authors
        } else {
            project.author.map(Author::Name).into_iter().collect()
        };

        let license = match project.license {
            Some(LicenseField::Text(text)) => text,
            Some(LicenseField::Table { text, file }) => text.or(file).unwrap_or_default(),
            None => String::new(),
        };

        let mut console_scripts = project.scripts;
        let mut gui_scripts = project.gui_scripts;
        if let Some(extra) = project.entry_points.get("console_scripts") {
            console_scripts.extend(extra.clone());
        }
        if let Some(extra) = project.entry_points.get("gui_scripts") {
            gui_scripts.extend(extra.clone());
        }

        let urls = project.urls;
        let homepage = urls
            .get("Homepage")
            .cloned()
            .or(project.homepage)
            .unwrap_or_default();
        let repository = urls
            .get("Repository")
            .or_else(|| urls.get("Source"))
            .cloned()
            .unwrap_or_default();
        let documentation = urls.get("Documentation").cloned().unwrap_or_default();

        Ok(ManifestRecord {
            name,
            version,
            description: project.description,
            authors,
            license,
            homepage,
            repository,
            documentation,
            keywords: project.keywords,
            python_requires: project
                .requires_python
                .unwrap_or_else(|| DEFAULT_PYTHON_REQUIREMENT.to_string()),
            dependencies: project.dependencies,
            optional_dependencies: project.optional_dependencies,
            console_scripts,
            gui_scripts,
            tool: file.tool.table.unwrap_or_default(),
        })
    }

    /// Builds a manifest record from archive metadata.
    pub fn from_descriptor(descriptor: &ArchiveDescriptor) -> ManifestRecord {
        ManifestRecord {
            name: descriptor.name.clone(),
            version: descriptor.version.clone(),
            description: descriptor.summary.clone().unwrap_or_default(),
            authors: descriptor.author.clone().map(Author::Name).into_iter().collect(),
            license: descriptor.license.clone().unwrap_or_default(),
            homepage: descriptor.homepage.clone().unwrap_or_default(),
            repository: String::new(),
            documentation: String::new(),
            keywords: Vec::new(),
            python_requires: descriptor
                .python_requirement
                .clone()
                .unwrap_or_else(|| DEFAULT_PYTHON_REQUIREMENT.to_string()),
            dependencies: descriptor.dependencies.clone(),
            optional_dependencies: BTreeMap::new(),
            console_scripts: descriptor.entry_commands.clone(),
            gui_scripts: IndexMap::new(),
            tool: ToolTable::default(),
        }
    }

    /// Checks the fields a tool can't do without. A manifest without any entry
    /// point is still valid but logged.
    pub fn validate(&self) -> bool {
        if self.name.trim().is_empty() {
            error!("tool name is required");
            return false;
        }
        if self.version.trim().is_empty() {
            error!(tool = %self.name, "tool version is required");
            return false;
        }
        let entry_points = &self.tool.entry_points;
        let has_entry_point = !self.console_scripts.is_empty()
            || !self.gui_scripts.is_empty()
            || entry_points.module.is_some()
            || entry_points.script.is_some()
            || entry_points.command.is_some();
        if !has_entry_point {
            warn!(tool = %self.name, "no entry points defined");
        }
        true
    }

    /// Converts the record into a tool configuration.
    ///
    /// The run method is the first console script if there is one, otherwise
    /// the tool table's module, script or command, in that order.
    pub fn to_tool_config(&self) -> ToolConfiguration {
        let entry_points = &self.tool.entry_points;
        let run_method = self
            .console_scripts
            .keys()
            .next()
            .map(|name| RunMethod::EntryCommand(name.clone()))
            .or_else(|| entry_points.module.clone().map(RunMethod::Module))
            .or_else(|| entry_points.script.clone().map(RunMethod::Script))
            .or_else(|| entry_points.command.clone().map(RunMethod::Command));

        ToolConfiguration {
            name: self.name.clone(),
            version: self.version.clone(),
            description: self.description.clone(),
            author: self.authors.first().map(Author::display_name).unwrap_or_default(),
            license: self.license.clone(),
            python_version: self.python_requires.clone(),
            dependencies: self.dependencies.clone(),
            dev_dependencies: self
                .optional_dependencies
                .get("dev")
                .cloned()
                .unwrap_or_default(),
            run_method,
            platform: self.tool.platform.clone(),
            homepage: self.homepage.clone(),
            repository: self.repository.clone(),
            documentation: self.documentation.clone(),
            keywords: self.keywords.clone(),
            pre_install_commands: self.tool.install.pre_install.clone(),
            post_install_commands: self.tool.install.post_install.clone(),
        }
    }
}
