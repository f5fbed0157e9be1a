//! Filesystem state queries used by the environment lifecycle.
//!
//! Environment state lives on disk only, so the manager asks a [`Filesystem`]
//! whether directories and interpreters exist instead of tracking anything in
//! memory. [`MemoryFs`] lets the lifecycle run without touching a real disk.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait Filesystem {
    fn exists(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    /// Removes a directory and everything below it.
    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;
    /// Immediate subdirectories of `path`.
    fn list_dirs(&self, path: &Path) -> io::Result<Vec<PathBuf>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RealFs;

impl Filesystem for RealFs {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_dir_all(path)
    }

    fn list_dirs(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                dirs.push(entry.path());
            }
        }
        Ok(dirs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    File,
    Dir,
}

/// In-memory [`Filesystem`]. Paths are stored as given, without normalisation.
#[derive(Debug, Default)]
pub struct MemoryFs {
    nodes: Mutex<BTreeMap<PathBuf, Node>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_nodes<T>(&self, f: impl FnOnce(&mut BTreeMap<PathBuf, Node>) -> T) -> T {
        let mut nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut nodes)
    }

    fn insert_ancestors(nodes: &mut BTreeMap<PathBuf, Node>, path: &Path) {
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            nodes.entry(ancestor.to_path_buf()).or_insert(Node::Dir);
        }
    }

    /// Creates a file and any missing parent directories.
    pub fn add_file<P: AsRef<Path>>(&self, path: P) {
        let path = path.as_ref();
        self.with_nodes(|nodes| {
            if let Some(parent) = path.parent() {
                Self::insert_ancestors(nodes, parent);
            }
            nodes.insert(path.to_path_buf(), Node::File);
        });
    }

    /// Removes a single file. Returns whether it existed.
    pub fn remove_file<P: AsRef<Path>>(&self, path: P) -> bool {
        self.with_nodes(|nodes| nodes.remove(path.as_ref()).is_some())
    }

    /// Every path at or below `root`.
    pub fn paths_under<P: AsRef<Path>>(&self, root: P) -> Vec<PathBuf> {
        let root = root.as_ref();
        self.with_nodes(|nodes| {
            nodes
                .keys()
                .filter(|p| p.starts_with(root))
                .cloned()
                .collect()
        })
    }
}

impl Filesystem for MemoryFs {
    fn exists(&self, path: &Path) -> bool {
        self.with_nodes(|nodes| nodes.contains_key(path))
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.with_nodes(|nodes| nodes.get(path) == Some(&Node::Dir))
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.with_nodes(|nodes| {
            if nodes.get(path) == Some(&Node::File) {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} is a file", path.display()),
                ));
            }
            Self::insert_ancestors(nodes, path);
            Ok(())
        })
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        self.with_nodes(|nodes| {
            if !nodes.contains_key(path) {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} not found", path.display()),
                ));
            }
            nodes.retain(|p, _| !p.starts_with(path));
            Ok(())
        })
    }

    fn list_dirs(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        self.with_nodes(|nodes| {
            if nodes.get(path) != Some(&Node::Dir) {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} is not a directory", path.display()),
                ));
            }
            Ok(nodes
                .iter()
                .filter(|(p, node)| **node == Node::Dir && p.parent() == Some(path))
                .map(|(p, _)| p.clone())
                .collect())
        })
    }
}
