use serde_json::{json, Value};
use std::{fs, os::unix::fs::PermissionsExt, path::Path, process::Command};

const RUN: &str = env!("CARGO_BIN_EXE_kvbench-run");
const SCENARIOS: &str = env!("CARGO_BIN_EXE_kvbench-scenarios");

#[test]
fn help_exits_successfully() {
    let output = Command::new(RUN).arg("-h").output().unwrap();

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("BUILD_CONFIG_PATH"));
}

#[test]
fn missing_arguments_fail() {
    let output = Command::new(RUN).output().unwrap();

    assert!(!output.status.success());
}

#[test]
fn missing_configuration_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = Command::new(RUN)
        .arg(dir.path().join("build.json"))
        .arg(dir.path().join("bench.json"))
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
}

/// Benchmark stand-in printing one CSV row per requested workload
const STUB_BENCH: &str = r#"#!/bin/sh
echo "Benchmark,ops/sec,threads"
for arg in "$@"; do
    case "$arg" in
        --benchmarks=*) benchmarks="${arg#--benchmarks=}" ;;
        --threads=*) threads="${arg#--threads=}" ;;
    esac
done
echo "$benchmarks,1000,$threads"
"#;

fn write_json(path: &Path, value: &Value) {
    fs::write(path, serde_json::to_string(value).unwrap()).unwrap();
}

#[test]
fn prebuilt_run_prints_one_report_per_case() {
    let dir = tempfile::tempdir().unwrap();
    let bench = dir.path().join("pmemkv_bench");
    fs::write(&bench, STUB_BENCH).unwrap();
    fs::set_permissions(&bench, fs::Permissions::from_mode(0o755)).unwrap();

    let project = json!({
        "repo_url": "https://github.com/pmem/pmemkv.git",
        "commit": "HEAD",
        "env": {},
        "cmake_params": []
    });
    let build_config = dir.path().join("build.json");
    write_json(
        &build_config,
        &json!({"libpmemobjcpp": project, "pmemkv": project, "db_bench": project}),
    );

    let cases: Vec<Value> = [("fillseq", "1"), ("readrandom", "4"), ("fillrandom", "8")]
        .into_iter()
        .map(|(benchmarks, threads)| {
            json!({
                "env": {},
                "params": {"--benchmarks": benchmarks, "--threads": threads, "--engine": "dram_vcmap"}
            })
        })
        .collect();
    let bench_config = dir.path().join("bench.json");
    write_json(&bench_config, &Value::from(cases.clone()));

    let output = Command::new(RUN)
        .arg(&build_config)
        .arg(&bench_config)
        .arg("--prebuilt")
        .arg(dir.path())
        .env_remove("PMEMKV_BENCH_RESULTS_DIR")
        .env_remove("MONGO_ADDRESS")
        .output()
        .unwrap();

    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let reports: Value = serde_json::from_slice(&output.stdout).unwrap();
    let reports = reports.as_array().unwrap();
    assert_eq!(reports.len(), 3);

    for (report, case) in reports.iter().zip(&cases) {
        assert_eq!(&report["runtime_parameters"], case);
        assert_eq!(
            report["results"][0]["Benchmark"],
            case["params"]["--benchmarks"]
        );
        assert_eq!(report["results"][0]["threads"], case["params"]["--threads"]);
    }
}

#[test]
fn scenarios_print_valid_json() {
    let output = Command::new(SCENARIOS)
        .args(["dram"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let cases: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(!cases.as_array().unwrap().is_empty());
}

#[test]
fn unknown_scope_is_rejected() {
    let output = Command::new(SCENARIOS).arg("nvme").output().unwrap();

    assert!(!output.status.success());
}

#[test]
fn scenarios_help_describes_scopes() {
    let output = Command::new(SCENARIOS).arg("--help").output().unwrap();

    assert!(output.status.success());
    let help = String::from_utf8_lossy(&output.stdout);
    assert!(help.contains("memkind"));
    assert!(help.contains("Test cases for DRAM engines."));
}
