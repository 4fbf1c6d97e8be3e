use crate::{database::MongoConfig, schema::SchemaError};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{
    collections::BTreeMap,
    env,
    fs::File,
    io::Error,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{error, warn};

/// Name of the CPU/NUMA binding wrapper prefixed to benchmark invocations
pub const NUMACTL: &str = "numactl";

pub const RESULTS_DIR_VARIABLE: &str = "PMEMKV_BENCH_RESULTS_DIR";
pub const DB_PATH_VARIABLE: &str = "PMEMKV_BENCH_DB_PATH";

// check if a file is executable
pub fn check_executable(path: &Path) -> Result<bool, ConfigErrors> {
    if !path.is_file() {
        Err(ConfigErrors::FileNotFound(path.to_path_buf()))
    } else {
        match File::open(path).map(|file| file.metadata()) {
            Ok(Ok(metadata)) => Ok((metadata.mode() & 0o111) != 0),
            Ok(Err(e)) | Err(e) => Err(ConfigErrors::MetadataNotFound(e)),
        }
    }
}

/// search `PATH` for an executable with the given name
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    env::var_os("PATH").and_then(|paths| {
        env::split_paths(&paths)
            .map(|dir| dir.join(name))
            .find(|candidate| matches!(check_executable(candidate), Ok(true)))
    })
}

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
    #[error("Metadata not found")]
    MetadataNotFound(#[from] Error),
    #[error("Configuration does not conform to its schema")]
    Schema(#[from] SchemaError),
    #[error("Configuration could not be deserialized: {0}")]
    Deserialize(#[from] serde_json::Error),
    #[error("Preflight checks failed, see the log for details")]
    PreflightFailed,
}

/// Boolean switch as it appears in hand written and generated configurations:
/// `true`, `1`, `"1"` and `"True"` all enable it
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Flag(pub bool);

impl Flag {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

impl<'de> Deserialize<'de> for Flag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            Number(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Bool(value) => Ok(Flag(value)),
            Raw::Number(0) => Ok(Flag(false)),
            Raw::Number(1) => Ok(Flag(true)),
            Raw::Number(other) => Err(de::Error::custom(format!(
                "flag must be 0 or 1, got {other}"
            ))),
            Raw::Text(text) => match text.to_lowercase().as_str() {
                "1" | "true" => Ok(Flag(true)),
                "0" | "false" | "" => Ok(Flag(false)),
                other => Err(de::Error::custom(format!(
                    "flag must be one of 0, 1, True or False, got '{other}'"
                ))),
            },
        }
    }
}

impl Serialize for Flag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bool(self.0)
    }
}

/// one git hosted dependency of the benchmark
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct ProjectConfig {
    pub repo_url: String,
    pub commit: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub cmake_params: Vec<String>,
}

/// libpmemobj-cpp -> pmemkv -> pmemkv_bench, built in that order
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct BuildConfig {
    pub libpmemobjcpp: ProjectConfig,
    pub pmemkv: ProjectConfig,
    pub db_bench: ProjectConfig,
}

/// a single scenario of the test matrix
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct TestCase {
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(alias = "pmemkv_bench")]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub numactl: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub emon: Flag,
    #[serde(default)]
    pub cleanup: Flag,
}

impl TestCase {
    /// path of the backing store, i.e. the `--db` parameter
    pub fn db_path(&self) -> Option<&str> {
        self.params.get("--db").map(String::as_str)
    }
}

/// test cases together with the documents they were read from, the latter end up verbatim in
/// the reports
#[derive(Clone, Debug, Default)]
pub struct BenchmarkConfig {
    pub cases: Vec<(TestCase, serde_json::Value)>,
}

impl BenchmarkConfig {
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigErrors> {
        let raw: Vec<serde_json::Value> = serde_json::from_value(value)?;
        let cases = raw
            .into_iter()
            .map(|document| {
                serde_json::from_value::<TestCase>(document.clone()).map(|case| (case, document))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { cases })
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Semantic checks that the schema cannot express. All problems are logged before returning
    /// so a user can fix a configuration in one go.
    pub fn preflight_checks(&self, emon: &Path) -> bool {
        let mut contains_error = false;

        if self.cases.is_empty() {
            error!("Benchmark configuration holds no test cases, nothing to run");
            contains_error = true;
        }

        let numactl_available = find_in_path(NUMACTL).is_some();
        let emon_available = emon.is_file() || find_in_path(&emon.to_string_lossy()).is_some();

        for (index, (case, _)) in self.cases.iter().enumerate() {
            if case.params.is_empty() {
                error!("Test case {index} has no parameters for the benchmark");
                contains_error = true;
            }

            if case.cleanup.enabled() && case.db_path().is_none() {
                error!("Test case {index} requests cleanup but doesn't define --db");
                contains_error = true;
            }

            if case.numactl.is_some() && !numactl_available {
                error!("Test case {index} requires {NUMACTL}, which was not found in PATH");
                contains_error = true;
            }

            if case.emon.enabled() && !emon_available {
                warn!(
                    "Test case {index} enables telemetry but {} was not found, starting it will fail",
                    emon.to_string_lossy()
                );
            }
        }

        contains_error
    }
}

/// settings the harness takes from its environment
#[derive(Clone, Debug, Default)]
pub struct HarnessEnv {
    pub results_dir: Option<PathBuf>,
    pub mongo: Option<MongoConfig>,
}

impl HarnessEnv {
    pub fn from_env() -> Self {
        let mongo = match MongoConfig::from_env() {
            Ok(config) => Some(config),
            Err(error) => {
                warn!("{error}, so results cannot be uploaded to the database");
                None
            }
        };

        Self {
            results_dir: env::var_os(RESULTS_DIR_VARIABLE).map(PathBuf::from),
            mongo,
        }
    }
}
