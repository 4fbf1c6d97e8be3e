pub mod scopes;

use crate::{
    config::{check_executable, ConfigErrors},
    schema::{validate, Schema, SchemaError},
};
use serde_json::Value;
use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};
use thiserror::Error;
use tracing::{debug, error, info};

pub use scopes::Scope;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Failed to read {0}")]
    Read(PathBuf, #[source] std::io::Error),
    #[error("{0} is neither a JSON/YAML file nor an executable generator")]
    NotAGenerator(PathBuf),
    #[error("Failed to inspect {0}")]
    Inspect(PathBuf, #[source] ConfigErrors),
    #[error("Failed to spawn generator {0}")]
    Spawn(PathBuf, #[source] std::io::Error),
    #[error("Generator {path} exited with {status}: {stderr}")]
    GeneratorFailed {
        path: PathBuf,
        status: i32,
        stderr: String,
    },
    #[error("Failed to parse JSON from {0}")]
    Json(PathBuf, #[source] serde_json::Error),
    #[error("Failed to parse YAML from {0}")]
    Yaml(PathBuf, #[source] serde_yaml::Error),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

enum Source {
    Json,
    Yaml,
    Generator,
}

fn classify(path: &Path) -> Result<Source, ScenarioError> {
    match path
        .extension()
        .map(|extension| extension.to_string_lossy().to_lowercase())
        .as_deref()
    {
        Some("json") => Ok(Source::Json),
        Some("yaml") | Some("yml") => Ok(Source::Yaml),
        _ => match check_executable(path) {
            Ok(true) => Ok(Source::Generator),
            Ok(false) => Err(ScenarioError::NotAGenerator(path.to_path_buf())),
            Err(ConfigErrors::FileNotFound(_)) => Err(ScenarioError::Read(
                path.to_path_buf(),
                std::io::Error::from(std::io::ErrorKind::NotFound),
            )),
            Err(e) => Err(ScenarioError::Inspect(path.to_path_buf(), e)),
        },
    }
}

/// Load a configuration either from a JSON/YAML file or by running a generator which prints
/// the configuration as JSON to stdout
pub fn load(path: &Path) -> Result<Value, ScenarioError> {
    match classify(path)? {
        Source::Json => {
            let content =
                fs::read_to_string(path).map_err(|e| ScenarioError::Read(path.to_path_buf(), e))?;

            serde_json::from_str(&content).map_err(|e| ScenarioError::Json(path.to_path_buf(), e))
        }
        Source::Yaml => {
            let content =
                fs::read_to_string(path).map_err(|e| ScenarioError::Read(path.to_path_buf(), e))?;

            serde_yaml::from_str(&content).map_err(|e| ScenarioError::Yaml(path.to_path_buf(), e))
        }
        Source::Generator => run_generator(path),
    }
}

fn run_generator(path: &Path) -> Result<Value, ScenarioError> {
    info!(generator = ?path, "Generating configuration");

    let output = Command::new(path)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| ScenarioError::Spawn(path.to_path_buf(), e))?;
    let status = output.status;
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !status.success() {
        error!(generator = ?path, stderr = %stderr, "Generator failed");

        return Err(ScenarioError::GeneratorFailed {
            path: path.to_path_buf(),
            status: status.code().unwrap_or(-1),
            stderr,
        });
    }

    debug!("Generator output: {stdout}");

    serde_json::from_str(&stdout).map_err(|e| ScenarioError::Json(path.to_path_buf(), e))
}

/// [`load`] followed by validation against the named schema
pub fn load_validated(path: &Path, schema: Schema) -> Result<Value, ScenarioError> {
    let value = load(path)?;
    validate(&value, schema)?;

    Ok(value)
}
