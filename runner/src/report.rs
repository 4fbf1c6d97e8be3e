use crate::{database::ConnectionError, ingest::ResultRow};
use chrono::{DateTime, Local, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

/// Everything known about a single benchmark invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub build_configuration: Value,
    pub runtime_parameters: Value,
    pub results: Vec<ResultRow>,
    /// project -> resolved commit of the build the run used
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub commits: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emon: Option<String>,
}

impl Report {
    pub fn new(
        build_configuration: Value,
        runtime_parameters: Value,
        results: Vec<ResultRow>,
    ) -> Self {
        Self {
            build_configuration,
            runtime_parameters,
            results,
            commits: BTreeMap::new(),
            host: hostname(),
            timestamp: Utc::now(),
            emon: None,
        }
    }
}

fn hostname() -> Option<String> {
    match nix::unistd::gethostname() {
        Ok(name) => Some(name.to_string_lossy().into_owned()),
        Err(error) => {
            warn!(error = ?error, "Failed to retrieve hostname: {error}");
            None
        }
    }
}

/// Rebuild every object with its keys in order. `Value` keeps insertion order once any crate in
/// the build enables serde_json's `preserve_order`.
pub fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .sorted_by(|(left, _), (right, _)| left.cmp(right))
                .map(|(key, value)| (key, sort_keys(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Pretty JSON with sorted keys, the format reports are printed and stored in
pub fn to_pretty_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&sort_keys(serde_json::to_value(value)?))
}

pub fn print_reports<W: Write>(reports: &[Report], mut output: W) -> Result<(), ConnectionError> {
    writeln!(output, "{}", to_pretty_json(&reports)?)?;

    Ok(())
}

/// `<base>/<timestamp>/` holding one JSON file per benchmark run
#[derive(Debug, Clone)]
pub struct ResultsDirectory {
    path: PathBuf,
}

impl ResultsDirectory {
    pub const TIMESTAMP_FORMAT: &'static str = "%Y-%m-%d_%H-%M-%S";

    pub fn create(base: &Path) -> io::Result<Self> {
        Self::create_at(base, Local::now())
    }

    pub fn create_at(base: &Path, time: DateTime<Local>) -> io::Result<Self> {
        let stamp = time.format(Self::TIMESTAMP_FORMAT).to_string();
        let mut path = base.join(&stamp);
        let mut suffix = 1;

        // two runs started within the same second must not share a directory
        while path.exists() {
            path = base.join(format!("{stamp}_{suffix}"));
            suffix += 1;
        }

        fs::create_dir_all(&path)?;
        debug!(path = ?path, "Created results directory");

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn report_path(&self, index: usize) -> PathBuf {
        self.path.join(format!("report_{index}.json"))
    }

    pub fn store(&self, report: &Report, index: usize) -> Result<(), ConnectionError> {
        let build_path = self.path.join("build_configuration.json");
        if !build_path.exists() {
            fs::write(&build_path, to_pretty_json(&report.build_configuration)?)?;
        }

        let path = self.report_path(index);
        fs::write(&path, to_pretty_json(report)?)?;

        if let Some(ref emon) = report.emon {
            fs::write(self.path.join(format!("emon_{index}.dat")), emon)?;
        }

        info!(path = ?path, "Saved report");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn report() -> Report {
        let mut report = Report::new(
            json!({"pmemkv": {"commit": "HEAD"}}),
            json!({"env": {}, "params": {"--engine": "cmap"}}),
            vec![ResultRow::from([("ops/sec".to_owned(), "100".to_owned())])],
        );
        report.emon = Some("sample".to_owned());
        report
    }

    #[test]
    fn directory_is_timestamped() {
        let base = tempfile::tempdir().unwrap();
        let time = Local.with_ymd_and_hms(2021, 3, 9, 12, 30, 5).unwrap();

        let first = ResultsDirectory::create_at(base.path(), time).unwrap();
        let second = ResultsDirectory::create_at(base.path(), time).unwrap();

        assert_eq!(first.path(), base.path().join("2021-03-09_12-30-05"));
        assert_eq!(second.path(), base.path().join("2021-03-09_12-30-05_1"));
    }

    #[test]
    fn stores_reports_and_telemetry() {
        let base = tempfile::tempdir().unwrap();
        let directory = ResultsDirectory::create(base.path()).unwrap();
        let report = report();

        directory.store(&report, 0).unwrap();
        directory.store(&report, 1).unwrap();

        let stored: Report =
            serde_json::from_str(&fs::read_to_string(directory.report_path(1)).unwrap()).unwrap();
        assert_eq!(stored, report);
        assert!(directory.path().join("build_configuration.json").is_file());
        assert_eq!(
            fs::read_to_string(directory.path().join("emon_0.dat")).unwrap(),
            "sample"
        );
    }

    #[test]
    fn printed_reports_have_sorted_keys() {
        let mut output = Vec::new();
        print_reports(&[report()], &mut output).unwrap();
        let text = String::from_utf8(output).unwrap();

        let build = text.find("\"build_configuration\"").unwrap();
        let results = text.find("\"results\"").unwrap();
        let runtime = text.find("\"runtime_parameters\"").unwrap();
        assert!(build < results && results < runtime);
    }

    fn positions(text: &str, keys: &[&str]) -> Vec<usize> {
        keys.iter()
            .map(|key| text.find(&format!("\"{key}\"")).unwrap())
            .collect()
    }

    #[test]
    fn nested_keys_are_sorted() {
        let runtime_parameters: Value = serde_json::from_str(
            r#"{"params": {"--num": "100", "--engine": "cmap", "--db": "/tmp/pool"}, "env": {"PMEM_IS_PMEM_FORCE": "1"}, "cleanup": 1}"#,
        )
        .unwrap();
        let report = Report::new(
            json!({"pmemkv": {"repo_url": "a", "commit": "HEAD"}, "libpmemobjcpp": {}}),
            runtime_parameters,
            vec![],
        );

        let text = to_pretty_json(&report).unwrap();

        let top = positions(
            &text,
            &["build_configuration", "results", "runtime_parameters", "timestamp"],
        );
        assert!(top.windows(2).all(|pair| pair[0] < pair[1]), "{text}");

        let nested = positions(&text, &["cleanup", "env", "params"]);
        assert!(nested.windows(2).all(|pair| pair[0] < pair[1]), "{text}");

        let params = positions(&text, &["--db", "--engine", "--num"]);
        assert!(params.windows(2).all(|pair| pair[0] < pair[1]), "{text}");

        let build = positions(&text, &["libpmemobjcpp", "pmemkv"]);
        assert!(build[0] < build[1], "{text}");
        assert!(text.find("\"commit\"").unwrap() < text.find("\"repo_url\"").unwrap());
    }

    #[test]
    fn arrays_keep_their_order() {
        let value = sort_keys(json!([{"b": 1, "a": 2}, {"d": 3, "c": 4}]));

        assert_eq!(
            serde_json::to_string(&value).unwrap(),
            r#"[{"a":2,"b":1},{"c":4,"d":3}]"#
        );
    }
}
