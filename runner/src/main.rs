use clap::Parser;
use kvbench_runner::{init_logging, run, telemetry, RunOptions};
use std::{path::PathBuf, process::ExitCode, time::Duration};
use tracing::error;

/// Build pmemkv with its benchmark and run the benchmark over a set of test cases
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Build configuration: JSON, YAML or an executable printing JSON
    build_config_path: PathBuf,
    /// Test cases: JSON, YAML or an executable printing JSON
    benchmark_config_path: PathBuf,
    /// Directory with an already built pmemkv_bench, skips checkout and build
    #[arg(long, env = "PMEMKV_BENCH_PREBUILT")]
    prebuilt: Option<PathBuf>,
    /// Telemetry collector started for test cases with emon enabled
    #[arg(long, env = "EMON", default_value = telemetry::DEFAULT_EMON)]
    emon: PathBuf,
    /// Seconds to wait for the collector to exit after a stop request
    #[arg(long, default_value_t = telemetry::DEFAULT_SHUTDOWN_TIMEOUT.as_secs())]
    emon_timeout: u64,
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let options = RunOptions {
        build_config_path: cli.build_config_path,
        benchmark_config_path: cli.benchmark_config_path,
        prebuilt: cli.prebuilt,
        emon: cli.emon,
        emon_timeout: Duration::from_secs(cli.emon_timeout),
    };

    match run(&options) {
        Ok(_) => ExitCode::SUCCESS,
        Err(error) => {
            error!(error = ?error, "{error}");
            ExitCode::FAILURE
        }
    }
}
