#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use assert_cmd::Command;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Writes `{name}-{version}-py3-none-any.whl` into `dir`.
pub fn write_wheel(
    dir: &Path,
    name: &str,
    version: &str,
    requires: &[&str],
    scripts: &[(&str, &str)],
) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(format!("{name}-{version}-py3-none-any.whl"));
    let dist_info = format!("{name}-{version}.dist-info");
    let mut writer = ZipWriter::new(File::create(&path).unwrap());
    let options = SimpleFileOptions::default();

    writer.start_file(format!("{name}/__init__.py"), options).unwrap();
    writer.write_all(b"").unwrap();

    let mut metadata = format!("Metadata-Version: 2.1\nName: {name}\nVersion: {version}\nSummary: The {name} tool\n");
    for requirement in requires {
        metadata.push_str(&format!("Requires-Dist: {requirement}\n"));
    }
    writer.start_file(format!("{dist_info}/METADATA"), options).unwrap();
    writer.write_all(metadata.as_bytes()).unwrap();

    if !scripts.is_empty() {
        let mut entry_points = String::from("[console_scripts]\n");
        for (command, target) in scripts {
            entry_points.push_str(&format!("{command} = {target}\n"));
        }
        writer.start_file(format!("{dist_info}/entry_points.txt"), options).unwrap();
        writer.write_all(entry_points.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
    path
}

/// The `isotool` binary rooted at `home`, isolated from the user's own config.
pub fn isotool(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("isotool").unwrap();
    cmd.env("ISOTOOL_HOME", home)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("XDG_DATA_HOME", home.join("data"))
        .env_remove("ISOTOOL_WHEELS_PATH")
        .env_remove("ISOTOOL_BUNDLES_PATH")
        .env_remove("ISOTOOL_ENVIRONMENTS_DIR")
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG");
    cmd
}

pub fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8_lossy(&output).into_owned()
}
