use bson::Document;
use clap::Parser;
use kvbench_analysis::{
    charts::{self, ChartError, ChartLabels, DocumentSource, GenerateOptions},
    results::parse_std_results,
    DEFAULT_COLLECTION, DEFAULT_DB_NAME,
};
use kvbench_runner::{
    database::{MongoConfig, MongoConnection},
    init_logging,
    report::to_pretty_json,
};
use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};
use tracing::{error, info};

/// Connects to the document store and draws the standard set of performance charts.
///
/// The store is configured with MONGO_ADDRESS, MONGO_PORT, MONGO_USER, MONGO_PASSWORD,
/// MONGO_DB_NAME and MONGO_DB_COLLECTION.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
struct Cli {
    /// Only results from this date on, "YYYY-MM-DD [hh:mm:ss]", defaults to today
    #[arg(short, long)]
    date_from: Option<String>,
    /// Save the generated pipelines next to the charts
    #[arg(short, long)]
    save_pipeline: bool,
    /// Save the documents matched before grouping next to the charts
    #[arg(short, long)]
    raw_docs: bool,
    /// Run the pipeline from this file instead, print its results and draw a custom chart
    #[arg(short, long)]
    input_pipeline: Option<PathBuf>,
    /// Charts are written below <out-dir>/<date-from>
    #[arg(short, long, default_value = "./generated")]
    out_dir: PathBuf,
}

fn custom_chart<S: DocumentSource>(
    source: &S,
    path: &Path,
    out_dir: &Path,
) -> Result<(), ChartError> {
    let text = fs::read_to_string(path).map_err(|e| ChartError::Io(path.to_path_buf(), e))?;
    let pipeline: Vec<Document> = serde_json::from_str(&text)?;
    info!(path = ?path, stages = pipeline.len(), "Read pipeline");

    let documents = source.aggregate(pipeline)?;
    println!("{}", to_pretty_json(&documents)?);
    info!(count = documents.len(), "Results printed");

    if let Some(data) = parse_std_results(&documents, None) {
        fs::create_dir_all(out_dir).map_err(|e| ChartError::Io(out_dir.to_path_buf(), e))?;
        let labels = ChartLabels {
            title: "Custom chart".to_owned(),
            ..Default::default()
        };
        charts::draw_bar_chart(&data, &labels, &out_dir.join("custom"))?;
    }

    Ok(())
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let config = match MongoConfig::from_env_or(DEFAULT_DB_NAME, DEFAULT_COLLECTION) {
        Ok(config) => config,
        Err(error) => {
            error!("{error}, so results cannot be accessed from the database");
            return ExitCode::FAILURE;
        }
    };
    let connection = match MongoConnection::load(&config) {
        Ok(connection) => connection,
        Err(error) => {
            error!(error = ?error, "Failed to connect to the database: {error}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(ref path) = cli.input_pipeline {
        return match custom_chart(&connection, path, &cli.out_dir) {
            Ok(()) => ExitCode::SUCCESS,
            Err(error) => {
                error!(error = ?error, "Custom chart failed: {error}");
                ExitCode::FAILURE
            }
        };
    }

    let date_from = cli
        .date_from
        .unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d").to_string());
    let out_dir = cli.out_dir.join(&date_from);
    if let Err(error) = fs::create_dir_all(&out_dir) {
        error!(error = ?error, path = ?out_dir, "Failed to create the output directory: {error}");
        return ExitCode::FAILURE;
    }
    info!(path = ?out_dir, "Output dir");

    let options = GenerateOptions {
        save_pipeline: cli.save_pipeline,
        raw_docs: cli.raw_docs,
    };
    let standard = charts::standard_charts(&date_from);
    let failures = charts::generate_charts(&connection, &standard, &out_dir, options);

    if failures == 0 {
        info!("Generated {} charts", standard.len());
        ExitCode::SUCCESS
    } else {
        error!("{failures} of {} charts failed", standard.len());
        ExitCode::FAILURE
    }
}
