mod local;

pub use local::LocalExecutor;

use crate::{
    config::BenchmarkConfig,
    ingest::IngestorError,
    project::{ProjectError, BENCHMARK_BINARY},
    report::Report,
    telemetry::TelemetryError,
};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Failed to spawn `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Benchmark exited with {status}")]
    BenchmarkFailed {
        status: i32,
        stdout: String,
        stderr: String,
    },
    #[error("Failed to parse the benchmark output")]
    Ingest(#[from] IngestorError),
    #[error("Telemetry collection failed")]
    Telemetry(#[from] TelemetryError),
    #[error("Failed to remove the backing store at {path:?}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// An installed benchmark binary together with what it needs at runtime
#[derive(Clone, Debug, Default)]
pub struct BenchmarkBinary {
    pub path: PathBuf,
    /// directories holding the engine's shared libraries
    pub library_path: Vec<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl BenchmarkBinary {
    /// Use a binary built outside of the harness, e.g. `<prefix>/pmemkv_bench` with the engine
    /// installed below `<prefix>/lib`
    pub fn prebuilt(directory: &Path) -> Result<Self, ProjectError> {
        let path = directory.join(BENCHMARK_BINARY);

        if !path.is_file() {
            return Err(ProjectError::MissingArtifact(path));
        }

        Ok(Self {
            path,
            library_path: vec![directory.join("lib"), directory.join("lib64")],
            env: BTreeMap::new(),
        })
    }

    /// directory the binary lives in, prepended to `PATH` for the run
    pub fn directory(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }
}

pub trait Executor {
    /// Run every test case of the configuration, returning one report per case
    fn execute(&mut self, config: &BenchmarkConfig) -> Result<Vec<Report>, ExecutorError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn prebuilt_binary_must_exist() {
        let dir = tempfile::tempdir().unwrap();

        assert!(matches!(
            BenchmarkBinary::prebuilt(dir.path()),
            Err(ProjectError::MissingArtifact(_))
        ));

        fs::write(dir.path().join(BENCHMARK_BINARY), "").unwrap();
        let binary = BenchmarkBinary::prebuilt(dir.path()).unwrap();

        assert_eq!(binary.directory(), dir.path());
        assert_eq!(binary.library_path[0], dir.path().join("lib"));
    }
}
