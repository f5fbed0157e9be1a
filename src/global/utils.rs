use std::path::PathBuf;
use anyhow::{anyhow, Result};
use directories::ProjectDirs;

pub const CONFIG_FILE_NAME: &str = "config.toml";

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("org", "isotool", "isotool")
        .ok_or_else(|| anyhow!("no home directory to place isotool's config and data in"))
}

/// Returns the per-user `(config, data)` directories.
///
/// The data directory is the default `home` for environments, wheels and bundles.
pub fn get_global_dirs() -> Result<(PathBuf, PathBuf)> {
    let dirs = project_dirs()?;
    Ok((dirs.config_dir().to_path_buf(), dirs.data_dir().to_path_buf()))
}

pub fn get_global_data_dir() -> Result<PathBuf> {
    get_global_dirs().map(|(_, data)| data)
}

pub fn get_global_config_file() -> Result<PathBuf> {
    get_global_dirs().map(|(config, _)| config.join(CONFIG_FILE_NAME))
}
