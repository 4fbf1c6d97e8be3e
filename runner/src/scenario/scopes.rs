//! Built-in test matrices, each a cartesian product of workload, sizes, thread counts and
//! engines.

use crate::config::DB_PATH_VARIABLE;
use itertools::iproduct;
use serde_json::{json, Map, Value};
use std::{env, path::Path, str::FromStr};

const WORKLOADS: [&str; 4] = [
    "fillrandom,readrandom",
    "fillseq,readseq",
    "fillseq,readwhilewriting",
    "fillseq,readrandomwriterandom",
];
const KEY_SIZES: [u32; 1] = [8];
const VALUE_SIZES: [u32; 5] = [8, 128, 256, 512, 1024];
const MT_THREADS: [u32; 15] = [1, 4, 8, 12, 16, 20, 24, 28, 32, 36, 40, 44, 48, 52, 56];
const ELEMENTS: u64 = 10_000_000;
const DB_SIZE_IN_GB: u32 = 500;

/// single combination of the matrix dimensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Combination {
    pub benchmarks: &'static str,
    pub key_size: u32,
    pub value_size: u32,
    pub threads: u32,
    pub engine: &'static str,
}

impl From<(&&'static str, &u32, &u32, &u32, &&'static str)> for Combination {
    fn from(
        (benchmarks, key_size, value_size, threads, engine): (
            &&'static str,
            &u32,
            &u32,
            &u32,
            &&'static str,
        ),
    ) -> Self {
        Self {
            benchmarks,
            key_size: *key_size,
            value_size: *value_size,
            threads: *threads,
            engine,
        }
    }
}

fn product(
    benchmarks: &[&'static str],
    key_sizes: &[u32],
    value_sizes: &[u32],
    threads: &[u32],
    engines: &[&'static str],
) -> Vec<Combination> {
    iproduct!(benchmarks, key_sizes, value_sizes, threads, engines)
        .map(Combination::from)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// every workload against every engine, no NUMA binding
    Basic,
    /// engines backed by libpmemobj-cpp
    ObjBased,
    /// engines backed by memkind
    MemkindBased,
    /// volatile engines
    Dram,
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "basic" => Ok(Self::Basic),
            "obj" | "obj_based" => Ok(Self::ObjBased),
            "memkind" | "memkind_based" => Ok(Self::MemkindBased),
            "dram" => Ok(Self::Dram),
            other => Err(format!(
                "unknown scope '{other}', expected one of basic, obj, memkind, dram"
            )),
        }
    }
}

impl Scope {
    pub const ALL: [Scope; 4] = [Self::Basic, Self::ObjBased, Self::MemkindBased, Self::Dram];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::ObjBased => "obj",
            Self::MemkindBased => "memkind",
            Self::Dram => "dram",
        }
    }

    pub fn default_db_path(&self) -> Option<&'static str> {
        match self {
            Self::Basic | Self::MemkindBased => Some("/mnt/pmem0"),
            Self::ObjBased => Some("/mnt/pmem0/pmemkv-bench"),
            Self::Dram => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Basic => "Full matrix of workloads over the persistent engines.",
            Self::ObjBased => {
                "Test cases for libpmemobj-cpp based engines. The database path should point to \
                 the pool file."
            }
            Self::MemkindBased => {
                "Test cases for memkind based engines. The database path should point to a \
                 directory on a DAX file system."
            }
            Self::Dram => "Test cases for DRAM engines.",
        }
    }

    pub fn combinations(&self) -> Vec<Combination> {
        match self {
            Self::Basic => product(
                &[
                    "fillseq",
                    "fillrandom",
                    "fillseq,readrandom,readrandom",
                    "fillrandom,readrandom,readrandom",
                    "fillseq,readseq,readseq",
                    "fillrandom,readseq,readseq",
                    "readwhilewriting",
                    "readrandomwriterandom",
                ],
                &KEY_SIZES,
                &[8, 128],
                &[1, 4, 8, 12, 18, 24],
                &["cmap", "csmap", "radix", "stree"],
            ),
            Self::ObjBased => {
                let mut combinations = product(
                    &WORKLOADS[..2],
                    &KEY_SIZES,
                    &VALUE_SIZES,
                    &[1],
                    &["radix", "stree"],
                );
                combinations.extend(product(
                    &WORKLOADS,
                    &KEY_SIZES,
                    &VALUE_SIZES,
                    &MT_THREADS,
                    &["cmap", "csmap"],
                ));
                combinations.extend(product(&WORKLOADS, &[8], &[8], &MT_THREADS, &["robinhood"]));
                combinations
            }
            Self::MemkindBased => {
                let mut combinations =
                    product(&WORKLOADS, &KEY_SIZES, &VALUE_SIZES, &[1], &["vsmap"]);
                combinations.extend(product(
                    &WORKLOADS,
                    &KEY_SIZES,
                    &VALUE_SIZES,
                    &MT_THREADS,
                    &["vcmap"],
                ));
                combinations
            }
            Self::Dram => product(
                &WORKLOADS,
                &KEY_SIZES,
                &VALUE_SIZES,
                &MT_THREADS,
                &["blackhole", "dram_vcmap"],
            ),
        }
    }

    /// database path taken from `PMEMKV_BENCH_DB_PATH` with the scope's default as fallback
    pub fn db_path_from_env(&self) -> Option<String> {
        self.default_db_path()
            .map(|default| env::var(DB_PATH_VARIABLE).unwrap_or_else(|_| default.to_owned()))
    }

    /// Generate the benchmark configuration for this scope
    pub fn generate(&self, db_path: Option<&str>) -> Value {
        Value::Array(
            self.combinations()
                .iter()
                .map(|combination| self.test_case(combination, db_path))
                .collect(),
        )
    }

    fn test_case(&self, combination: &Combination, db_path: Option<&str>) -> Value {
        let mut params = Map::new();
        params.insert("--benchmarks".into(), combination.benchmarks.into());
        params.insert("--key_size".into(), combination.key_size.to_string().into());
        params.insert("--value_size".into(), combination.value_size.to_string().into());
        params.insert("--threads".into(), combination.threads.to_string().into());
        params.insert("--engine".into(), combination.engine.into());

        match self {
            Self::Basic => {
                params.insert("--num".into(), "100000000".into());
                params.insert("--db".into(), db_path.unwrap_or("/mnt/pmem0").into());
                params.insert("--db_size_in_gb".into(), "6".into());

                json!({"env": {}, "params": params})
            }
            Self::ObjBased | Self::MemkindBased => {
                let db_path = db_path.or(self.default_db_path()).unwrap_or_default();
                params.insert("--num".into(), ELEMENTS.to_string().into());
                params.insert("--db".into(), db_path.into());
                params.insert("--db_size_in_gb".into(), DB_SIZE_IN_GB.to_string().into());

                // the pool file lives on the device to bind to, memkind engines get a directory
                let bind_target = if *self == Self::ObjBased {
                    Path::new(db_path)
                        .parent()
                        .map(|parent| parent.to_string_lossy().into_owned())
                        .unwrap_or_default()
                } else {
                    db_path.to_owned()
                };

                json!({
                    "env": {},
                    "params": params,
                    "numactl": {"--cpubind": format!("file:{bind_target}")},
                    "emon": "True",
                })
            }
            Self::Dram => {
                params.insert("--num".into(), ELEMENTS.to_string().into());

                json!({
                    "env": {},
                    "params": params,
                    "numactl": {"--cpubind": "1"},
                    "emon": "True",
                })
            }
        }
    }
}
