use clap::Parser;
use kvbench_runner::{init_logging, report::to_pretty_json, scenario::Scope};
use std::process::ExitCode;
use tracing::{error, info};

/// Print the test cases of a built-in benchmark scope as JSON
#[derive(Parser, Debug)]
#[command(author, version, about, after_help = scopes_help())]
struct Cli {
    /// One of basic, obj, memkind, dram
    scope: Scope,
    /// Backing store path, overrides PMEMKV_BENCH_DB_PATH
    #[arg(long)]
    db: Option<String>,
}

fn scopes_help() -> String {
    let mut help = String::from("Scopes:");

    for scope in Scope::ALL {
        help.push_str(&format!("\n  {:<8} {}", scope.name(), scope.description()));
    }

    help
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let db = cli.db.or_else(|| cli.scope.db_path_from_env());
    let cases = cli.scope.generate(db.as_deref());
    let count = cases.as_array().map_or(0, Vec::len);
    info!(scope = cli.scope.name(), "Generated {count} test cases");

    match to_pretty_json(&cases) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(error) => {
            error!(error = ?error, "Failed to print test cases: {error}");
            ExitCode::FAILURE
        }
    }
}
