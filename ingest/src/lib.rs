//! Uploads a report produced outside of the harness, optionally extended with CSV result files.

use kvbench_runner::{
    database::{mongo::to_document, ConnectionError, MongoConnection},
    ingest::{parse_csv, IngestorError},
};
use serde_json::Value;
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Failed to read {0:?}")]
    Read(PathBuf, #[source] std::io::Error),
    #[error("{0:?} is not valid JSON")]
    Json(PathBuf, #[source] serde_json::Error),
    #[error("{0:?} must hold a JSON object")]
    NotAnObject(PathBuf),
    #[error("Failed to parse {0:?}")]
    Csv(PathBuf, #[source] IngestorError),
    #[error("Failed to upload the report")]
    Connection(#[from] ConnectionError),
}

pub fn load_report(path: &Path) -> Result<Value, UploadError> {
    let text = fs::read_to_string(path).map_err(|e| UploadError::Read(path.to_path_buf(), e))?;
    let report: Value =
        serde_json::from_str(&text).map_err(|e| UploadError::Json(path.to_path_buf(), e))?;

    if !report.is_object() {
        return Err(UploadError::NotAnObject(path.to_path_buf()));
    }

    Ok(report)
}

/// Add the rows of a CSV file to the report, keyed by the file's name
pub fn attach_csv(report: &mut Value, path: &Path) -> Result<(), UploadError> {
    let text = fs::read_to_string(path).map_err(|e| UploadError::Read(path.to_path_buf(), e))?;
    let rows = parse_csv(&text).map_err(|e| UploadError::Csv(path.to_path_buf(), e))?;
    let key = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());

    debug!(file = %key, rows = rows.len(), "Attaching CSV results");

    let Some(fields) = report.as_object_mut() else {
        return Err(UploadError::NotAnObject(path.to_path_buf()));
    };
    fields.insert(
        key,
        serde_json::to_value(rows).map_err(|e| UploadError::Json(path.to_path_buf(), e))?,
    );

    Ok(())
}

/// Report with all CSV files attached, ready for upload
pub fn assemble(json_path: &Path, csv_paths: &[PathBuf]) -> Result<Value, UploadError> {
    let mut report = load_report(json_path)?;

    for path in csv_paths {
        attach_csv(&mut report, path)?;
    }

    Ok(report)
}

pub fn upload(connection: &MongoConnection, report: &Value) -> Result<(), UploadError> {
    connection.insert(to_document(report)?)?;
    info!("Report uploaded");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn csv_files_are_attached_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("report.json");
        let csv_path = dir.path().join("results.csv");
        fs::write(&json_path, json!({"build_configuration": {}}).to_string()).unwrap();
        fs::write(&csv_path, "Benchmark,ops/sec\nfillseq,1000\nreadseq,2000\n").unwrap();

        let report = assemble(&json_path, &[csv_path]).unwrap();

        assert_eq!(report["results.csv"][1]["Benchmark"], "readseq");
        assert_eq!(report["build_configuration"], json!({}));
    }

    #[test]
    fn uploaded_keys_are_sanitized() {
        let report = json!({"results.csv": [{"ops/sec": "1"}], "hostname": "node"});

        let document = to_document(&report).unwrap();

        assert!(document.contains_key("results_csv"));
        assert!(document.contains_key("metric"));
    }

    #[test]
    fn report_must_be_an_object() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("report.json");
        fs::write(&json_path, "[1, 2]").unwrap();

        assert!(matches!(
            load_report(&json_path),
            Err(UploadError::NotAnObject(_))
        ));
    }

    #[test]
    fn missing_csv_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = json!({});

        assert!(matches!(
            attach_csv(&mut report, &dir.path().join("missing.csv")),
            Err(UploadError::Read(..))
        ));
    }
}
