//! Builds pmemkv together with its benchmark and runs the benchmark over a matrix of test cases,
//! collecting one report per case.

pub mod config;
pub mod database;
pub mod executors;
pub mod ingest;
pub mod project;
pub mod report;
pub mod repository;
pub mod scenario;
pub mod schema;
pub mod telemetry;

use config::{BenchmarkConfig, BuildConfig, ConfigErrors, HarnessEnv};
use database::{ConnectionError, StorageAdapters};
use executors::{BenchmarkBinary, Executor, ExecutorError, LocalExecutor};
use project::{BuildTree, ProjectError};
use report::Report;
use scenario::ScenarioError;
use schema::Schema;
use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// variable holding the log filter, e.g. `LOGLEVEL=debug`
pub const LOG_VARIABLE: &str = "LOGLEVEL";

/// Log to stderr so stdout only carries the reports
pub fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_VARIABLE).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    #[error("Build failed")]
    Project(#[from] ProjectError),
    #[error("Benchmark run failed")]
    Executor(#[from] ExecutorError),
    #[error("Failed to print the reports")]
    Output(#[from] ConnectionError),
}

#[derive(Clone, Debug)]
pub struct RunOptions {
    pub build_config_path: PathBuf,
    pub benchmark_config_path: PathBuf,
    /// directory holding an already built `pmemkv_bench`, skips checkout and build
    pub prebuilt: Option<PathBuf>,
    pub emon: PathBuf,
    pub emon_timeout: Duration,
}

/// Load both configurations and check them before anything expensive happens
pub fn load_configs(
    build_path: &Path,
    benchmark_path: &Path,
    emon: &Path,
) -> Result<(serde_json::Value, BuildConfig, BenchmarkConfig), HarnessError> {
    let build_document = scenario::load_validated(build_path, Schema::Build)?;
    let build: BuildConfig =
        serde_json::from_value(build_document.clone()).map_err(ConfigErrors::from)?;

    let benchmark = BenchmarkConfig::from_value(scenario::load_validated(
        benchmark_path,
        Schema::Bench,
    )?)?;

    if benchmark.preflight_checks(emon) {
        return Err(ConfigErrors::PreflightFailed.into());
    }

    Ok((build_document, build, benchmark))
}

/// Build, run every test case and print the reports to stdout
pub fn run(options: &RunOptions) -> Result<Vec<Report>, HarnessError> {
    let (build_document, build, benchmark) = load_configs(
        &options.build_config_path,
        &options.benchmark_config_path,
        &options.emon,
    )?;
    info!("Loaded {} test cases", benchmark.len());

    let harness = HarnessEnv::from_env();

    // checkouts must outlive the benchmark runs
    let tree;
    let (binary, commits) = match options.prebuilt {
        Some(ref directory) => {
            info!(path = ?directory, "Using prebuilt benchmark");
            (BenchmarkBinary::prebuilt(directory)?, BTreeMap::new())
        }
        None => {
            tree = BuildTree::build(&build)?;
            (tree.binary()?, tree.commits())
        }
    };

    let storage =
        StorageAdapters::from_config(harness.results_dir.as_deref(), harness.mongo.as_ref());

    let reports = LocalExecutor::new(binary, build_document)
        .with_commits(commits)
        .with_emon(&options.emon, options.emon_timeout)
        .with_storage(storage)
        .execute(&benchmark)?;

    report::print_reports(&reports, io::stdout().lock())?;

    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn build_config() -> serde_json::Value {
        let project = json!({
            "repo_url": "https://github.com/pmem/pmemkv.git",
            "commit": "HEAD",
            "env": {"CC": "gcc"},
            "cmake_params": ["-DBUILD_TESTS=OFF"]
        });

        json!({
            "libpmemobjcpp": project.clone(),
            "pmemkv": project,
            "db_bench": {"repo_url": "https://github.com/pmem/pmemkv-bench.git", "commit": "HEAD", "env": {}}
        })
    }

    #[test]
    fn loads_valid_configurations() {
        let dir = tempfile::tempdir().unwrap();
        let build = dir.path().join("build.json");
        let bench = dir.path().join("bench.json");
        fs::write(&build, build_config().to_string()).unwrap();
        fs::write(
            &bench,
            json!([{"env": {}, "params": {"--engine": "cmap", "--db": "/tmp/pool"}}]).to_string(),
        )
        .unwrap();

        let (document, build, benchmark) =
            load_configs(&build, &bench, Path::new("emon")).unwrap();

        assert_eq!(document, build_config());
        assert_eq!(build.pmemkv.cmake_params, vec!["-DBUILD_TESTS=OFF"]);
        assert_eq!(benchmark.len(), 1);
    }

    #[test]
    fn failed_preflight_stops_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let build = dir.path().join("build.json");
        let bench = dir.path().join("bench.json");
        fs::write(&build, build_config().to_string()).unwrap();
        fs::write(&bench, json!([]).to_string()).unwrap();

        assert!(matches!(
            load_configs(&build, &bench, Path::new("emon")),
            Err(HarnessError::Config(ConfigErrors::PreflightFailed))
        ));
    }

    #[test]
    fn schema_violation_stops_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let build = dir.path().join("build.json");
        let bench = dir.path().join("bench.json");
        fs::write(&build, build_config().to_string()).unwrap();
        fs::write(&bench, json!([{"params": {"--engine": "cmap"}}]).to_string()).unwrap();

        assert!(matches!(
            load_configs(&build, &bench, Path::new("emon")),
            Err(HarnessError::Scenario(ScenarioError::Schema(_)))
        ));
    }
}
