use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, error, warn};
use zip::ZipArchive;
use crate::error::{EngineError, Result};
use crate::util::{has_archive_extension, sanitize_name};

const METADATA_SUFFIX: &str = "/METADATA";
const ENTRY_POINTS_SUFFIX: &str = "/entry_points.txt";
const CONSOLE_SCRIPTS_SECTION: &str = "console_scripts";

/// Value of a metadata header. Keys that occur more than once collapse into
/// an ordered list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Single(String),
    Multiple(Vec<String>),
}

impl MetadataValue {
    /// The last occurrence of the header.
    pub fn last(&self) -> &str {
        match self {
            MetadataValue::Single(value) => value,
            MetadataValue::Multiple(values) => values.last().map(String::as_str).unwrap_or(""),
        }
    }

    /// Every occurrence of the header, in file order.
    pub fn values(&self) -> Vec<String> {
        match self {
            MetadataValue::Single(value) => vec![value.clone()],
            MetadataValue::Multiple(values) => values.clone(),
        }
    }

    fn push(&mut self, value: String) {
        match self {
            MetadataValue::Single(existing) => {
                *self = MetadataValue::Multiple(vec![std::mem::take(existing), value]);
            }
            MetadataValue::Multiple(values) => values.push(value),
        }
    }

    fn append_continuation(&mut self, line: &str) {
        let target = match self {
            MetadataValue::Single(value) => value,
            MetadataValue::Multiple(values) => match values.last_mut() {
                Some(value) => value,
                None => return,
            },
        };
        target.push('\n');
        target.push_str(line);
    }
}

/// Everything the engine knows about one package archive, read straight from
/// the archive without installing it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveDescriptor {
    /// Raw package name, as encoded in the filename.
    pub name: String,
    pub version: String,
    pub filename: String,
    pub path: PathBuf,
    pub raw_metadata: BTreeMap<String, MetadataValue>,
    /// `Requires-Dist` entries in file order, duplicates kept.
    pub dependencies: Vec<String>,
    /// Console commands in declaration order.
    pub entry_commands: IndexMap<String, String>,
    pub python_requirement: Option<String>,
    pub summary: Option<String>,
    pub author: Option<String>,
    pub license: Option<String>,
    pub homepage: Option<String>,
}

impl ArchiveDescriptor {
    /// Filesystem-safe form of [`Self::name`]; the key used everywhere else.
    pub fn tool_identity(&self) -> String {
        sanitize_name(&self.name)
    }

    /// Name of the first declared entry command, if any.
    pub fn first_entry_command(&self) -> Option<&str> {
        self.entry_commands.keys().next().map(String::as_str)
    }

    fn field(&self, key: &str) -> Option<String> {
        self.raw_metadata.get(key).map(|v| v.last().to_string())
    }
}

/// Reads a package archive's metadata.
///
/// Returns `None` for anything that isn't a readable archive: a missing path,
/// a wrong extension, a corrupt zip or a missing metadata record. Failures are
/// logged, never propagated, so one bad file can't stop a scan of many.
///
/// Nothing is installed or executed; this is safe on untrusted or partially
/// downloaded files.
pub fn extract<P: AsRef<Path>>(path: P) -> Option<ArchiveDescriptor> {
    let path = path.as_ref();
    if !path.is_file() || !has_archive_extension(path) {
        return None;
    }
    match read_archive(path) {
        Ok(descriptor) => descriptor,
        Err(e) => {
            error!(path = %path.display(), "failed to extract archive metadata: {e}");
            None
        }
    }
}

fn read_archive(path: &Path) -> Result<Option<ArchiveDescriptor>> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file)?;

    let metadata_name = archive
        .file_names()
        .find(|name| name.ends_with(METADATA_SUFFIX))
        .map(str::to_string);
    let Some(metadata_name) = metadata_name else {
        warn!(path = %path.display(), "no METADATA record in archive");
        return Ok(None);
    };
    let metadata_content = read_entry(&mut archive, &metadata_name, path)?;
    let raw_metadata = parse_metadata(&metadata_content);

    let entry_points_name = archive
        .file_names()
        .find(|name| name.ends_with(ENTRY_POINTS_SUFFIX))
        .map(str::to_string);
    let entry_commands = match entry_points_name {
        Some(name) => {
            let content = read_entry(&mut archive, &name, path)?;
            parse_entry_points(&content)
        }
        None => {
            debug!(path = %path.display(), "no entry_points.txt in archive");
            IndexMap::new()
        }
    };

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let (name, version) = match split_archive_filename(&stem) {
        Some(parts) => parts,
        None => (
            raw_metadata
                .get("Name")
                .map(|v| v.last().to_string())
                .unwrap_or_else(|| stem.clone()),
            raw_metadata
                .get("Version")
                .map(|v| v.last().to_string())
                .unwrap_or_else(|| "0.0.0".to_string()),
        ),
    };

    let dependencies = raw_metadata
        .get("Requires-Dist")
        .map(MetadataValue::values)
        .unwrap_or_default();

    let mut descriptor = ArchiveDescriptor {
        name,
        version,
        filename: path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default(),
        path: path.to_path_buf(),
        raw_metadata,
        dependencies,
        entry_commands,
        python_requirement: None,
        summary: None,
        author: None,
        license: None,
        homepage: None,
    };
    descriptor.python_requirement = descriptor.field("Requires-Python");
    descriptor.summary = descriptor.field("Summary");
    descriptor.author = descriptor.field("Author");
    descriptor.license = descriptor.field("License");
    descriptor.homepage = descriptor.field("Home-page");

    debug!(
        name = %descriptor.name,
        version = %descriptor.version,
        entry_commands = descriptor.entry_commands.len(),
        "extracted archive metadata"
    );
    Ok(Some(descriptor))
}

fn read_entry(archive: &mut ZipArchive<File>, name: &str, path: &Path) -> Result<String> {
    let mut entry = archive.by_name(name)?;
    let mut content = String::new();
    entry.read_to_string(&mut content).map_err(|e| EngineError::InvalidArchive {
        path: path.to_path_buf(),
        message: format!("{name}: {e}"),
    })?;
    Ok(content)
}

/// Splits an archive stem shaped like `name-version-...` into its first two
/// segments.
pub fn split_archive_filename(stem: &str) -> Option<(String, String)> {
    let mut parts = stem.split('-');
    let name = parts.next()?;
    let version = parts.next()?;
    Some((name.to_string(), version.to_string()))
}

/// Parses an RFC822-style header block.
///
/// Repeated keys accumulate in order; indented lines continue the previous
/// value; parsing stops at the first blank line, where the message body starts.
pub fn parse_metadata(content: &str) -> BTreeMap<String, MetadataValue> {
    let mut metadata: BTreeMap<String, MetadataValue> = BTreeMap::new();
    let mut last_key: Option<String> = None;

    for line in content.lines() {
        if line.trim().is_empty() {
            break;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(value) = last_key.as_ref().and_then(|k| metadata.get_mut(k)) {
                value.append_continuation(line.trim());
            }
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            debug!(line, "skipping malformed metadata line");
            continue;
        };
        let key = key.trim().to_string();
        let value = value.trim().to_string();
        match metadata.get_mut(&key) {
            Some(existing) => existing.push(value),
            None => {
                metadata.insert(key.clone(), MetadataValue::Single(value));
            }
        }
        last_key = Some(key);
    }
    metadata
}

/// Parses the `[console_scripts]` section of an INI-style entry-points record.
/// Other sections and malformed lines are ignored.
pub fn parse_entry_points(content: &str) -> IndexMap<String, String> {
    let mut entry_points = IndexMap::new();
    let mut current_section: Option<&str> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            current_section = Some(line[1..line.len() - 1].trim());
            continue;
        }
        if current_section != Some(CONSOLE_SCRIPTS_SECTION) {
            continue;
        }
        match line.split_once('=') {
            Some((name, target)) if !name.trim().is_empty() => {
                entry_points.insert(name.trim().to_string(), target.trim().to_string());
            }
            _ => debug!(line, "skipping malformed entry point"),
        }
    }
    entry_points
}
