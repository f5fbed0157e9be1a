use std::path::Path;
use tracing::{error, info, warn};
use crate::archive::ArchiveDescriptor;
use crate::cache::{Cache, MemoryCache};
use crate::catalog::ArchiveCatalog;
use crate::error::{EngineError, Result};
use crate::manifest::{ManifestRecord, RunMethod, ToolConfiguration};
use crate::util::{has_archive_extension, sanitize_name};

/// Tool lookups on top of the catalog, with converted configurations cached
/// by tool identity.
pub struct ToolRegistry {
    catalog: ArchiveCatalog,
    configs: MemoryCache<String, ToolConfiguration>,
}

impl ToolRegistry {
    pub fn new(catalog: ArchiveCatalog) -> Self {
        Self {
            catalog,
            configs: MemoryCache::new(),
        }
    }

    pub fn catalog(&self) -> &ArchiveCatalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut ArchiveCatalog {
        &mut self.catalog
    }

    pub fn tool_exists(&mut self, name: &str) -> bool {
        self.catalog.find_by_tool_identity(name).is_some()
    }

    pub fn descriptor(&mut self, name: &str) -> Option<ArchiveDescriptor> {
        self.catalog.find_by_tool_identity(name)
    }

    /// Tool identity for `name`, which may also be a raw name or an entry
    /// command. Falls back to the sanitised query.
    pub fn identity(&mut self, name: &str) -> String {
        self.descriptor(name)
            .map(|d| d.tool_identity())
            .unwrap_or_else(|| sanitize_name(name))
    }

    pub fn load_config(&mut self, name: &str, use_cache: bool) -> Option<ToolConfiguration> {
        if use_cache {
            if let Some(config) = self.configs.get(&sanitize_name(name)) {
                return Some(config.clone());
            }
        }
        let descriptor = self.descriptor(name)?;
        let identity = descriptor.tool_identity();
        if use_cache {
            if let Some(config) = self.configs.get(&identity) {
                return Some(config.clone());
            }
        }
        let config = ManifestRecord::from_descriptor(&descriptor).to_tool_config();
        self.configs.put(identity, config.clone());
        Some(config)
    }

    /// Identities of every discoverable tool, sorted.
    pub fn list_tools(&mut self) -> Vec<String> {
        let mut tools: Vec<String> = self
            .catalog
            .discover(None)
            .iter()
            .map(ArchiveDescriptor::tool_identity)
            .collect();
        tools.sort();
        tools.dedup();
        tools
    }

    /// Checks that a tool's archive is readable, converts into a configuration
    /// and declares something to run.
    pub fn validate_tool_config(&mut self, name: &str) -> bool {
        let Some(descriptor) = self.descriptor(name) else {
            error!(tool = name, "tool not found");
            return false;
        };
        if !self.catalog.validate(&descriptor.path) {
            error!(tool = name, path = %descriptor.path.display(), "archive failed validation");
            return false;
        }
        let record = ManifestRecord::from_descriptor(&descriptor);
        if !record.validate() {
            return false;
        }
        if record.to_tool_config().run_method.is_none() {
            warn!(tool = name, "no entry point declared");
            return false;
        }
        true
    }

    /// Declared requirement strings, duplicates removed, first occurrence kept.
    pub fn tool_dependencies(&mut self, name: &str) -> Vec<String> {
        let Some(config) = self.load_config(name, true) else {
            return Vec::new();
        };
        let mut unique = Vec::with_capacity(config.dependencies.len());
        for dependency in config.dependencies {
            if !unique.contains(&dependency) {
                unique.push(dependency);
            }
        }
        unique
    }

    pub fn list_bundles(&self) -> Vec<String> {
        self.catalog.list_bundles()
    }

    /// Tool identities inside a bundle, in discovery order.
    pub fn bundle_tools(&mut self, bundle: &str) -> Vec<String> {
        self.catalog
            .get_bundle_tools(bundle)
            .iter()
            .map(ArchiveDescriptor::tool_identity)
            .collect()
    }

    /// Copies every archive directly inside `dir` into a bundle named after
    /// the directory.
    pub fn install_bundle(&mut self, dir: &Path) -> bool {
        if !dir.is_dir() {
            error!(path = %dir.display(), "bundle directory not found");
            return false;
        }
        let Some(bundle) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            error!(path = %dir.display(), "bundle directory has no name");
            return false;
        };
        let mut archives: Vec<_> = match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| path.is_file() && has_archive_extension(path))
                .collect(),
            Err(e) => {
                error!(path = %dir.display(), "failed to read bundle directory: {e}");
                return false;
            }
        };
        archives.sort();
        if archives.is_empty() {
            warn!(path = %dir.display(), "no archives in bundle directory");
            return false;
        }

        let created = self.catalog.create_bundle(&bundle, &archives);
        self.clear_cache();
        if created {
            info!(bundle = %bundle, count = archives.len(), "installed bundle");
        }
        created
    }

    pub fn clear_cache(&mut self) {
        self.configs.clear();
        self.catalog.clear_cache();
    }

    /// Command vector that starts `name`, followed by `args`.
    pub fn build_run_command(&mut self, name: &str, args: &[String]) -> Result<Vec<String>> {
        let descriptor = self
            .descriptor(name)
            .ok_or_else(|| EngineError::ToolNotFound(name.to_string()))?;
        let config = self
            .load_config(name, true)
            .ok_or_else(|| EngineError::ToolNotFound(name.to_string()))?;
        build_run_command(Some(&descriptor), &config, args)
    }
}

/// Picks how to start a tool: the archive's first entry command, otherwise
/// the run method the configuration declares. Nothing is guessed beyond that.
pub fn build_run_command(
    descriptor: Option<&ArchiveDescriptor>,
    config: &ToolConfiguration,
    args: &[String],
) -> Result<Vec<String>> {
    let mut command = match (descriptor.and_then(ArchiveDescriptor::first_entry_command), &config.run_method) {
        (Some(entry), _) => vec![entry.to_string()],
        (None, Some(RunMethod::EntryCommand(entry))) => vec![entry.clone()],
        (None, Some(RunMethod::Module(module))) => {
            vec!["python".to_string(), "-m".to_string(), module.clone()]
        }
        (None, Some(RunMethod::Script(script))) => vec!["python".to_string(), script.clone()],
        (None, Some(RunMethod::Command(command))) if !command.is_empty() => command.clone(),
        (None, _) => return Err(EngineError::NoEntryPoint(config.name.clone())),
    };
    command.extend(args.iter().cloned());
    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::WheelFixture;
    use std::path::PathBuf;
    use tempfile::{tempdir, TempDir};

    fn registry() -> (TempDir, PathBuf, ToolRegistry) {
        let dir = tempdir().unwrap();
        let wheels = dir.path().join("wheels");
        let bundles = dir.path().join("bundles");
        std::fs::create_dir_all(&wheels).unwrap();
        let catalog = ArchiveCatalog::new(vec![wheels.clone()], vec![bundles.clone()], bundles);
        (dir, wheels, ToolRegistry::new(catalog))
    }

    fn config(run_method: Option<RunMethod>) -> ToolConfiguration {
        let mut config = ManifestRecord::parse_pyproject("[project]\nname = \"demo\"\n")
            .unwrap()
            .to_tool_config();
        config.run_method = run_method;
        config
    }

    #[test]
    fn test_load_config_converts_descriptor() {
        let (_dir, wheels, mut registry) = registry();
        WheelFixture::new("fmt", "2.0")
            .requires(&["click>=8", "rich", "click>=8"])
            .console_script("fmt", "fmt.cli:main")
            .write(&wheels);

        let config = registry.load_config("fmt", true).unwrap();
        assert_eq!(config.version, "2.0");
        assert_eq!(config.run_method, Some(RunMethod::EntryCommand("fmt".to_string())));
        assert_eq!(config.python_version, ">=3.11");
        assert_eq!(registry.tool_dependencies("fmt"), vec!["click>=8", "rich"]);
        assert!(registry.tool_exists("fmt"));
        assert!(!registry.tool_exists("nope"));
        assert!(registry.load_config("nope", true).is_none());
    }

    #[test]
    fn test_load_config_is_cached_until_cleared() {
        let (_dir, wheels, mut registry) = registry();
        let path = WheelFixture::new("fmt", "2.0").write(&wheels);
        assert_eq!(registry.load_config("fmt", true).unwrap().version, "2.0");

        std::fs::remove_file(&path).unwrap();
        WheelFixture::new("fmt", "2.0")
            .metadata("Name: fmt\nVersion: 2.0\nSummary: changed\n")
            .write(&wheels);
        assert_eq!(registry.load_config("fmt", true).unwrap().description, "");

        registry.clear_cache();
        assert_eq!(registry.load_config("fmt", true).unwrap().description, "changed");
    }

    #[test]
    fn test_list_tools_and_identity() {
        let (_dir, wheels, mut registry) = registry();
        WheelFixture::new("zeta", "1.0").write(&wheels);
        WheelFixture::new("alpha", "1.0")
            .console_script("alpha-cli", "alpha:main")
            .write(&wheels);
        assert_eq!(registry.list_tools(), vec!["alpha", "zeta"]);
        assert_eq!(registry.identity("alpha-cli"), "alpha");
        assert_eq!(registry.identity("un/known"), "un_known");
    }

    #[test]
    fn test_validate_tool_config() {
        let (_dir, wheels, mut registry) = registry();
        WheelFixture::new("runnable", "1.0")
            .console_script("runnable", "runnable:main")
            .write(&wheels);
        WheelFixture::new("library", "1.0").write(&wheels);

        assert!(registry.validate_tool_config("runnable"));
        assert!(!registry.validate_tool_config("library"));
        assert!(!registry.validate_tool_config("absent"));
    }

    #[test]
    fn test_install_bundle_from_directory() {
        let (dir, _wheels, mut registry) = registry();
        let source = dir.path().join("devkit");
        WheelFixture::new("lint", "1.0").write(&source);
        WheelFixture::new("fmt", "1.0").write(&source);

        assert!(registry.install_bundle(&source));
        assert_eq!(registry.list_bundles(), vec!["devkit"]);
        assert_eq!(registry.bundle_tools("devkit"), vec!["fmt", "lint"]);
        assert!(registry.tool_exists("lint"));

        let empty = dir.path().join("empty");
        std::fs::create_dir_all(&empty).unwrap();
        assert!(!registry.install_bundle(&empty));
        assert!(!registry.install_bundle(&dir.path().join("missing")));
    }

    #[test]
    fn test_build_run_command_prefers_first_entry_command() {
        let (_dir, wheels, mut registry) = registry();
        WheelFixture::new("multi", "1.0")
            .entry_points("[console_scripts]\nfirst = m:a\nsecond = m:b\n")
            .write(&wheels);
        let args = vec!["--flag".to_string()];
        assert_eq!(registry.build_run_command("multi", &args).unwrap(), vec!["first", "--flag"]);
        assert!(matches!(
            registry.build_run_command("ghost", &args),
            Err(EngineError::ToolNotFound(_))
        ));
    }

    #[test]
    fn test_build_run_command_falls_back_to_declared_method() {
        let module = config(Some(RunMethod::Module("demo.main".to_string())));
        assert_eq!(build_run_command(None, &module, &[]).unwrap(), vec!["python", "-m", "demo.main"]);

        let script = config(Some(RunMethod::Script("run.py".to_string())));
        assert_eq!(build_run_command(None, &script, &[]).unwrap(), vec!["python", "run.py"]);

        let command = config(Some(RunMethod::Command(vec!["demo".to_string(), "serve".to_string()])));
        assert_eq!(build_run_command(None, &command, &[]).unwrap(), vec!["demo", "serve"]);
    }

    #[test]
    fn test_build_run_command_without_entry_point_is_error() {
        let err = build_run_command(None, &config(None), &[]).unwrap_err();
        assert!(matches!(err, EngineError::NoEntryPoint(ref name) if name == "demo"));

        let empty = config(Some(RunMethod::Command(Vec::new())));
        assert!(build_run_command(None, &empty, &[]).is_err());
    }
}
