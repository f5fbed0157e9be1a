use std::path::PathBuf;
use thiserror::Error;

/// Errors raised inside the engine.
///
/// Most public operations absorb these and report `false`/`None` instead; the
/// install and run paths hand them to the caller so the failing command and its
/// output stay inspectable.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No archive provides the requested tool.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// The named bundle directory does not exist.
    #[error("Bundle not found: {0}")]
    BundleNotFound(String),

    /// The file is not a readable package archive.
    #[error("Invalid archive {path}: {message}")]
    InvalidArchive { path: PathBuf, message: String },

    /// A manifest could not be converted into a tool configuration.
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// The tool has no environment on disk.
    #[error("Environment for {0} does not exist")]
    EnvironmentMissing(String),

    /// The environment exists but failed structural validation.
    #[error("Environment for {tool} is invalid: {reason}")]
    EnvironmentInvalid { tool: String, reason: String },

    /// Requirements are still missing after the install attempt.
    #[error("Dependencies not satisfied for {tool}: {}", missing.join(", "))]
    DependenciesUnsatisfied { tool: String, missing: Vec<String> },

    /// A spawned process exited with a non-zero status.
    #[error("Command failed with exit code {code}: {command}")]
    CommandFailed {
        command: String,
        code: i32,
        stdout: String,
        stderr: String,
    },

    /// A spawned process exceeded its time budget and was killed.
    #[error("Command timed out after {secs}s: {command}")]
    Timeout { command: String, secs: u64 },

    /// Neither an entry command nor an explicit entry point is declared.
    #[error("No entry point found for {0}")]
    NoEntryPoint(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsatisfied_lists_missing_requirements() {
        let err = EngineError::DependenciesUnsatisfied {
            tool: "demo".to_string(),
            missing: vec!["requests>=2".to_string(), "click".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Dependencies not satisfied for demo: requests>=2, click"
        );
    }

    #[test]
    fn test_command_failed_shows_command() {
        let err = EngineError::CommandFailed {
            command: "pip install nope".to_string(),
            code: 1,
            stdout: String::new(),
            stderr: "no matching distribution".to_string(),
        };
        assert!(err.to_string().contains("pip install nope"));
        assert!(err.to_string().contains("exit code 1"));
    }
}
