use std::ffi::OsString;
use std::path::{Path, PathBuf};
use anyhow::Result;

/// File extension carried by every package archive.
pub const ARCHIVE_EXTENSION: &str = "whl";

/// Fallback identity for names that sanitise to nothing.
pub const UNNAMED_TOOL: &str = "unnamed_tool";

const INVALID_NAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

#[cfg(target_os = "windows")]
const ENV_BIN_DIR: &str = "Scripts";
#[cfg(not(target_os = "windows"))]
const ENV_BIN_DIR: &str = "bin";

#[cfg(target_os = "windows")]
const EXEC_SUFFIX: &str = ".exe";
#[cfg(not(target_os = "windows"))]
const EXEC_SUFFIX: &str = "";

/// Turns a package name into something usable as a directory name.
///
/// Characters that are invalid on common filesystems are replaced with `_`,
/// leading/trailing dots and spaces are trimmed and an empty result becomes
/// [`UNNAMED_TOOL`].
pub fn sanitize_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if INVALID_NAME_CHARS.contains(&c) { '_' } else { c })
        .collect();
    let trimmed = replaced.trim_matches(|c| c == '.' || c == ' ');
    if trimmed.is_empty() {
        UNNAMED_TOOL.to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn is_windows() -> bool {
    cfg!(target_os = "windows")
}

/// Checks whether a path carries the archive extension.
pub fn has_archive_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == ARCHIVE_EXTENSION)
}

/// Returns the executable directory inside an environment root.
pub fn env_bin_dir(env_root: &Path) -> PathBuf {
    env_root.join(ENV_BIN_DIR)
}

/// Returns the platform-specific location of an executable inside an
/// environment, e.g. `bin/python` or `Scripts\python.exe`.
pub fn env_executable(env_root: &Path, name: &str) -> PathBuf {
    if EXEC_SUFFIX.is_empty() || name.to_ascii_lowercase().ends_with(EXEC_SUFFIX) {
        return env_bin_dir(env_root).join(name);
    }
    env_bin_dir(env_root).join(format!("{name}{EXEC_SUFFIX}"))
}

/// Prepends `dir` to a `PATH`-style variable value.
pub fn prepend_search_path(dir: &Path, current: Option<OsString>) -> Result<OsString> {
    let mut entries = vec![dir.to_path_buf()];
    if let Some(current) = current {
        entries.extend(std::env::split_paths(&current));
    }
    Ok(std::env::join_paths(entries)?)
}

/// Returns the default base interpreter used to provision new environments.
pub fn default_python() -> String {
    if is_windows() {
        "python".to_string()
    } else {
        "python3".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name_replaces_invalid_chars() {
        assert_eq!(sanitize_name("my:tool/v2"), "my_tool_v2");
        assert_eq!(sanitize_name("a<b>c|d?e*f\"g\\h"), "a_b_c_d_e_f_g_h");
    }

    #[test]
    fn test_sanitize_name_trims_dots_and_spaces() {
        assert_eq!(sanitize_name("  .hidden. "), "hidden");
    }

    #[test]
    fn test_sanitize_name_empty_falls_back() {
        assert_eq!(sanitize_name(""), UNNAMED_TOOL);
        assert_eq!(sanitize_name(" . . "), UNNAMED_TOOL);
    }

    #[test]
    fn test_sanitize_name_keeps_valid_names() {
        assert_eq!(sanitize_name("black_formatter-1"), "black_formatter-1");
    }

    #[test]
    fn test_has_archive_extension() {
        assert!(has_archive_extension(Path::new("/tmp/demo-1.0-py3-none-any.whl")));
        assert!(!has_archive_extension(Path::new("/tmp/demo-1.0.tar.gz")));
        assert!(!has_archive_extension(Path::new("/tmp/whl")));
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn test_env_executable_unix_layout() {
        let root = Path::new("/envs/demo");
        assert_eq!(env_executable(root, "python"), PathBuf::from("/envs/demo/bin/python"));
        assert_eq!(env_executable(root, "pip"), PathBuf::from("/envs/demo/bin/pip"));
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn test_env_executable_keeps_dotted_names() {
        let root = Path::new("/envs/demo");
        assert_eq!(
            env_executable(root, "python3.12"),
            PathBuf::from("/envs/demo/bin/python3.12")
        );
        assert_eq!(env_executable(root, "foo.bar"), PathBuf::from("/envs/demo/bin/foo.bar"));
    }

    #[cfg(target_os = "windows")]
    #[test]
    fn test_env_executable_appends_exe_suffix() {
        let root = Path::new(r"C:\envs\demo");
        assert_eq!(env_executable(root, "foo.bar"), root.join("Scripts").join("foo.bar.exe"));
        assert_eq!(env_executable(root, "python.exe"), root.join("Scripts").join("python.exe"));
    }

    #[test]
    fn test_prepend_search_path_puts_dir_first() {
        let dir = Path::new("/envs/demo/bin");
        let current = std::env::join_paths([Path::new("/usr/bin"), Path::new("/bin")]).unwrap();
        let joined = prepend_search_path(dir, Some(current)).unwrap();
        let entries: Vec<PathBuf> = std::env::split_paths(&joined).collect();
        assert_eq!(entries[0], PathBuf::from("/envs/demo/bin"));
        assert_eq!(entries.len(), 3);
    }

    #[test]
    fn test_prepend_search_path_without_inherited_value() {
        let joined = prepend_search_path(Path::new("/envs/x/bin"), None).unwrap();
        assert_eq!(joined, OsString::from("/envs/x/bin"));
    }
}
