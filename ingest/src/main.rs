use clap::Parser;
use kvbench_ingest::{assemble, upload, UploadError};
use kvbench_runner::{
    database::{MongoConfig, MongoConnection},
    init_logging,
    report::to_pretty_json,
};
use std::{path::PathBuf, process::ExitCode};
use tracing::{error, warn};

/// Custom uploader to the document store.
///
/// The store is configured with MONGO_ADDRESS, MONGO_PORT, MONGO_USER, MONGO_PASSWORD,
/// MONGO_DB_NAME and MONGO_DB_COLLECTION.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
struct Cli {
    /// Report to upload
    json_path: PathBuf,
    /// CSV file attached to the report under its file name, may be repeated
    #[arg(long = "csv-path", alias = "csv_path")]
    csv_paths: Vec<PathBuf>,
    /// Print the document before uploading it
    #[arg(short)]
    verbose: bool,
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let report = match assemble(&cli.json_path, &cli.csv_paths) {
        Ok(report) => report,
        Err(error) => {
            error!(error = ?error, "{error}");
            return ExitCode::FAILURE;
        }
    };

    if cli.verbose {
        match to_pretty_json(&report) {
            Ok(json) => println!("{json}"),
            Err(error) => warn!(error = ?error, "Failed to print the report: {error}"),
        }
    }

    let config = match MongoConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            error!("{error}, so results cannot be uploaded to the database");
            return ExitCode::FAILURE;
        }
    };

    let result = MongoConnection::load(&config)
        .map_err(UploadError::from)
        .and_then(|connection| upload(&connection, &report));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(error = ?error, "Upload failed: {error}");
            ExitCode::FAILURE
        }
    }
}
