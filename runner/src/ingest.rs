use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, error};

/// one row of the benchmark's CSV output, column name -> value
pub type ResultRow = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum IngestorError {
    #[error("Failed to read benchmark output as CSV")]
    Csv(#[from] csv::Error),
    #[error("Benchmark output has no header row")]
    MissingHeader,
}

#[derive(Debug, Clone, Default)]
/// container for information extracted from running the benchmark
pub struct RunOutput {
    pub runtime: u128,
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

impl RunOutput {
    pub fn results(&self) -> Result<Vec<ResultRow>, IngestorError> {
        parse_csv(&self.stdout)
    }
}

/// Read comma separated rows keyed by the header row
#[tracing::instrument(level = "debug", skip(input))]
pub fn parse_csv(input: &str) -> Result<Vec<ResultRow>, IngestorError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input.as_bytes());

    let headers = reader.headers()?.clone();
    if headers.is_empty() || headers.iter().all(str::is_empty) {
        error!("Benchmark output has no header row");

        return Err(IngestorError::MissingHeader);
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;

        if record.iter().all(str::is_empty) {
            continue;
        }

        rows.push(
            headers
                .iter()
                .zip(record.iter().chain(std::iter::repeat("")))
                .map(|(column, value)| (column.to_owned(), value.to_owned()))
                .collect(),
        );
    }

    debug!("Parsed {} result rows", rows.len());

    Ok(rows)
}

/// Counters reported by read workloads in the `extra_data` column, e.g.
/// `(100 of 100 found by one thread)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoundKeys {
    pub found: u64,
    pub expected: u64,
}

impl FoundKeys {
    pub const COLUMN: &'static str = "extra_data";

    pub fn parse(extra_data: &str) -> Option<Self> {
        let mut words = extra_data.split_whitespace();
        let found = words.next()?.trim_start_matches('(').parse().ok()?;
        if words.next()? != "of" {
            return None;
        }
        let expected = words.next()?.trim_end_matches(')').parse().ok()?;

        Some(Self { found, expected })
    }

    pub fn from_row(row: &ResultRow) -> Option<Self> {
        row.get(Self::COLUMN).and_then(|value| Self::parse(value))
    }
}
