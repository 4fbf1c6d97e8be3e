use super::{BenchmarkBinary, Executor, ExecutorError};
use crate::{
    config::{BenchmarkConfig, TestCase, NUMACTL},
    database::StorageAdapters,
    ingest::RunOutput,
    project::describe,
    report::Report,
    telemetry::Emon,
};
use itertools::Itertools;
use serde_json::Value;
use std::{
    collections::BTreeMap,
    env,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::{Duration, Instant},
};
use tracing::{debug, error, info, instrument, trace, warn};

fn flags(flags: &BTreeMap<String, String>) -> impl Iterator<Item = String> + '_ {
    flags.iter().map(|(name, value)| format!("{name}={value}"))
}

/// Executor running the test cases one after another on this machine
#[derive(Debug)]
pub struct LocalExecutor {
    binary: BenchmarkBinary,
    build_configuration: Value,
    commits: BTreeMap<String, String>,
    emon: PathBuf,
    emon_timeout: Duration,
    storage: Vec<StorageAdapters>,
}

impl LocalExecutor {
    pub fn new(binary: BenchmarkBinary, build_configuration: Value) -> Self {
        Self {
            binary,
            build_configuration,
            commits: BTreeMap::new(),
            emon: PathBuf::from(crate::telemetry::DEFAULT_EMON),
            emon_timeout: crate::telemetry::DEFAULT_SHUTDOWN_TIMEOUT,
            storage: Vec::new(),
        }
    }

    pub fn with_commits(mut self, commits: BTreeMap<String, String>) -> Self {
        self.commits = commits;
        self
    }

    pub fn with_emon(mut self, exec: impl Into<PathBuf>, timeout: Duration) -> Self {
        self.emon = exec.into();
        self.emon_timeout = timeout;
        self
    }

    pub fn with_storage(mut self, storage: Vec<StorageAdapters>) -> Self {
        self.storage = storage;
        self
    }

    /// `[numactl --k=v ...] <binary> --k=v ...` with the run environment applied
    pub fn command(&self, case: &TestCase) -> Command {
        let mut command = match case.numactl {
            Some(ref numactl) => {
                let mut command = Command::new(NUMACTL);
                command.args(flags(numactl)).arg(&self.binary.path);
                command
            }
            None => Command::new(&self.binary.path),
        };

        command
            .args(flags(&case.params))
            .current_dir(self.binary.directory())
            .env("PATH", self.search_path())
            .env("LD_LIBRARY_PATH", self.library_path())
            .envs(&self.binary.env)
            .envs(&case.env)
            .stdin(Stdio::null());

        command
    }

    fn search_path(&self) -> OsString {
        let inherited = env::var_os("PATH").unwrap_or_default();
        let paths = std::iter::once(self.binary.directory().to_path_buf())
            .chain(env::split_paths(&inherited))
            .collect_vec();

        env::join_paths(paths).unwrap_or(inherited)
    }

    fn library_path(&self) -> OsString {
        env::join_paths(&self.binary.library_path).unwrap_or_default()
    }

    fn run(&self, case: &TestCase) -> Result<RunOutput, ExecutorError> {
        let mut command = self.command(case);
        let description = describe(&command);
        debug!(command = %description, env = ?case.env, "Running benchmark");

        let start = Instant::now();
        let output = command.output().map_err(|source| ExecutorError::Spawn {
            command: description,
            source,
        })?;

        let run = RunOutput {
            runtime: start.elapsed().as_millis(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: output.status.code().unwrap_or(-1),
        };

        if !output.status.success() {
            error!(
                stdout = %run.stdout,
                stderr = %run.stderr,
                "Benchmark process failed with {}",
                run.status
            );

            return Err(ExecutorError::BenchmarkFailed {
                status: run.status,
                stdout: run.stdout,
                stderr: run.stderr,
            });
        }

        debug!("Finished in {} ms", run.runtime);
        trace!("Output: {}", run.stdout);

        Ok(run)
    }

    /// Run the benchmark, bracketed by telemetry collection if the case asks for it
    fn run_with_telemetry(
        &self,
        case: &TestCase,
    ) -> Result<(RunOutput, Option<String>), ExecutorError> {
        if !case.emon.enabled() {
            return Ok((self.run(case)?, None));
        }

        let mut emon = Emon::new(&self.emon, self.emon_timeout)?;
        emon.start()?;

        let result = self.run(case);
        let stopped = emon.stop();

        match (result, stopped) {
            (Ok(run), Ok(())) => Ok((run, Some(emon.data()?))),
            (Ok(_), Err(error)) => Err(error.into()),
            (Err(error), Ok(())) => Err(error),
            (Err(error), Err(telemetry)) => {
                warn!(
                    error = ?telemetry,
                    "Failed to stop telemetry after a failed run: {telemetry}"
                );
                Err(error)
            }
        }
    }

    fn cleanup(&self, case: &TestCase) -> Result<(), ExecutorError> {
        let Some(db) = case.db_path() else {
            return Ok(());
        };
        let path = Path::new(db);

        if path.is_dir() {
            warn!(path = ?path, "Backing store is a directory, leaving it in place");
        } else if path.exists() {
            fs::remove_file(path).map_err(|source| ExecutorError::Cleanup {
                path: path.to_path_buf(),
                source,
            })?;
            debug!(path = ?path, "Removed backing store");
        } else {
            warn!(path = ?path, "Backing store doesn't exist, nothing to clean up");
        }

        Ok(())
    }

    fn store(&self, report: &Report, index: usize) {
        for adapter in &self.storage {
            if let Err(error) = adapter.store(report, index) {
                error!(
                    error = ?error,
                    adapter = adapter.name(),
                    "Failed to store report {index}: {error}"
                );
            }
        }
    }
}

impl Executor for LocalExecutor {
    #[instrument(skip_all, level = "info", fields(cases = config.len()))]
    fn execute(&mut self, config: &BenchmarkConfig) -> Result<Vec<Report>, ExecutorError> {
        let total = config.len();
        let mut reports = Vec::with_capacity(total);

        for (index, (case, document)) in config.cases.iter().enumerate() {
            info!(params = ?case.params, "Starting test case {}/{total}", index + 1);

            let (run, emon) = self.run_with_telemetry(case)?;

            let mut report = Report::new(
                self.build_configuration.clone(),
                document.clone(),
                run.results()?,
            );
            report.commits = self.commits.clone();
            report.emon = emon;

            if case.cleanup.enabled() {
                self.cleanup(case)?;
            }

            self.store(&report, index);
            reports.push(report);

            info!("Done with {}/{total}", index + 1);
        }

        info!("Done with processing");

        Ok(reports)
    }
}
