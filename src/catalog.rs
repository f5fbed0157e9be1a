use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;
use crate::archive::{extract, ArchiveDescriptor};
use crate::cache::{Cache, MemoryCache};
use crate::config::Settings;
use crate::util::{has_archive_extension, sanitize_name};

/// Finds package archives in standalone and bundle locations and caches their
/// descriptors by absolute path.
///
/// The cache never expires on its own. Call [`ArchiveCatalog::clear_cache`]
/// after archives change on disk.
pub struct ArchiveCatalog {
    standalone_paths: Vec<PathBuf>,
    bundle_roots: Vec<PathBuf>,
    bundles_dir: PathBuf,
    cache: MemoryCache<String, ArchiveDescriptor>,
}

impl ArchiveCatalog {
    pub fn new(standalone_paths: Vec<PathBuf>, bundle_roots: Vec<PathBuf>, bundles_dir: PathBuf) -> Self {
        Self {
            standalone_paths,
            bundle_roots,
            bundles_dir,
            cache: MemoryCache::new(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.wheel_search_paths(),
            settings.bundle_search_paths(),
            settings.bundles_dir(),
        )
    }

    /// Locations scanned when [`ArchiveCatalog::discover`] gets no paths.
    pub fn default_search_paths(&self) -> Vec<PathBuf> {
        let mut paths = self.standalone_paths.clone();
        for root in &self.bundle_roots {
            if !paths.contains(root) {
                paths.push(root.clone());
            }
        }
        paths
    }

    pub fn bundles_dir(&self) -> &Path {
        &self.bundles_dir
    }

    /// Recursively scans `search_paths` (or the default locations) for
    /// archives.
    ///
    /// Unreadable archives are skipped. When two archives share a tool
    /// identity the first one found wins; locations are scanned in order and
    /// files within a location by name.
    pub fn discover(&mut self, search_paths: Option<&[PathBuf]>) -> Vec<ArchiveDescriptor> {
        let paths = match search_paths {
            Some(paths) => paths.to_vec(),
            None => self.default_search_paths(),
        };

        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for search_path in &paths {
            if !search_path.exists() {
                debug!(path = %search_path.display(), "search path does not exist");
                continue;
            }
            for entry in WalkDir::new(search_path).sort_by_file_name() {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(path = %search_path.display(), "skipping unreadable entry: {e}");
                        continue;
                    }
                };
                if !entry.file_type().is_file() || !has_archive_extension(entry.path()) {
                    continue;
                }
                let Some(descriptor) = self.get(entry.path(), true) else {
                    continue;
                };
                if seen.insert(descriptor.tool_identity()) {
                    found.push(descriptor);
                } else {
                    debug!(
                        tool = %descriptor.tool_identity(),
                        path = %entry.path().display(),
                        "shadowed by an earlier archive"
                    );
                }
            }
        }
        found
    }

    /// Finds a tool by identity, then by raw package name, then by one of its
    /// entry command names.
    pub fn find_by_tool_identity(&mut self, name: &str) -> Option<ArchiveDescriptor> {
        let descriptors = self.discover(None);
        let identity = sanitize_name(name);
        let found = descriptors
            .iter()
            .find(|d| d.tool_identity() == identity)
            .or_else(|| descriptors.iter().find(|d| d.name == name))
            .or_else(|| descriptors.iter().find(|d| d.entry_commands.contains_key(name)))
            .cloned();
        if found.is_none() {
            info!(tool = name, "no archive provides tool");
        }
        found
    }

    /// Re-reads an archive, bypassing the cache.
    pub fn validate(&self, path: &Path) -> bool {
        extract(path).is_some()
    }

    /// Descriptor for `path`, from the cache when allowed, otherwise freshly
    /// extracted. A fresh read replaces the cached entry.
    pub fn get(&mut self, path: &Path, use_cache: bool) -> Option<ArchiveDescriptor> {
        let key = cache_key(path);
        if use_cache {
            if let Some(descriptor) = self.cache.get(&key) {
                return Some(descriptor.clone());
            }
        }
        let descriptor = extract(path)?;
        self.cache.put(key, descriptor.clone());
        Some(descriptor)
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Names of bundle directories holding at least one archive, sorted.
    pub fn list_bundles(&self) -> Vec<String> {
        let mut bundles = Vec::new();
        for root in &self.bundle_roots {
            let Ok(entries) = std::fs::read_dir(root) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_dir() || !contains_archive(&path) {
                    continue;
                }
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    bundles.push(name.to_string());
                }
            }
        }
        bundles.sort();
        bundles.dedup();
        bundles
    }

    fn bundle_dir(&self, bundle: &str) -> Option<PathBuf> {
        let name = sanitize_name(bundle);
        self.bundle_roots
            .iter()
            .map(|root| root.join(&name))
            .find(|dir| dir.is_dir())
    }

    /// Archives inside one bundle only.
    pub fn get_bundle_tools(&mut self, bundle: &str) -> Vec<ArchiveDescriptor> {
        match self.bundle_dir(bundle) {
            Some(dir) => self.discover(Some(&[dir])),
            None => {
                info!(bundle, "bundle not found");
                Vec::new()
            }
        }
    }

    /// Copies a valid archive into a bundle under the bundles directory. An
    /// archive already present under the same file name is left alone.
    pub fn add_to_bundle(&mut self, archive: &Path, bundle: &str) -> bool {
        if !self.validate(archive) {
            error!(path = %archive.display(), "not a valid archive");
            return false;
        }
        let Some(file_name) = archive.file_name() else {
            return false;
        };
        let dir = self.bundles_dir.join(sanitize_name(bundle));
        if let Err(e) = std::fs::create_dir_all(&dir) {
            error!(path = %dir.display(), "failed to create bundle directory: {e}");
            return false;
        }

        let target = dir.join(file_name);
        if target.exists() {
            warn!(path = %target.display(), "archive already in bundle");
            return true;
        }
        if let Err(e) = std::fs::copy(archive, &target) {
            error!(path = %archive.display(), "failed to copy archive into bundle: {e}");
            return false;
        }
        self.cache.remove(&cache_key(&target));
        info!(bundle, archive = %target.display(), "added archive to bundle");
        true
    }

    /// Creates a bundle from `archives`. Succeeds if at least one was added.
    pub fn create_bundle(&mut self, bundle: &str, archives: &[PathBuf]) -> bool {
        let added = archives
            .iter()
            .filter(|archive| self.add_to_bundle(archive, bundle))
            .count();
        if added == 0 {
            error!(bundle, "no archives added to bundle");
            return false;
        }
        info!(bundle, added, "created bundle");
        true
    }

    pub fn remove_bundle(&mut self, bundle: &str) -> bool {
        let dir = self.bundles_dir.join(sanitize_name(bundle));
        if !dir.is_dir() {
            warn!(bundle, "bundle not found");
            return false;
        }
        if let Err(e) = std::fs::remove_dir_all(&dir) {
            error!(bundle, "failed to remove bundle: {e}");
            return false;
        }
        let prefix = cache_key(&dir);
        self.cache
            .retain(&mut |key: &String, _: &ArchiveDescriptor| !Path::new(key).starts_with(&prefix));
        info!(bundle, "removed bundle");
        true
    }
}

fn cache_key(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

fn contains_archive(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .any(|entry| entry.path().is_file() && has_archive_extension(&entry.path()))
        })
        .unwrap_or(false)
}
