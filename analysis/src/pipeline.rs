//! Aggregation pipelines selecting benchmark results out of the uploaded reports.
//!
//! Every report holds an array of result rows, the pipeline unwinds it, pulls the interesting
//! parameters up into typed fields, filters and finally averages one metric over two grouping
//! dimensions. The grouped output is projected into `{x, y, color}` documents.

use bson::{doc, Bson, Document};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TIMEZONE: &str = "Europe/Warsaw";

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_owned()
}

fn convert(input: &str, to: &str) -> Bson {
    Bson::Document(doc! {
        "$convert": { "input": input, "to": to, "onError": Bson::Null }
    })
}

/// short typed names for the fields charts group and filter by
static ADD_FIELDS: Lazy<Document> = Lazy::new(|| {
    doc! {
        "$addFields": {
            "engine": "$runtime_parameters.params.--engine",
            "threads": convert("$runtime_parameters.params.--threads", "int"),
            "num": convert("$runtime_parameters.params.--num", "int"),
            "value_size": convert("$runtime_parameters.params.--value_size", "int"),
            "key_size": convert("$runtime_parameters.params.--key_size", "int"),
            "throughput": convert("$results.throughput [MB/s]", "double"),
            "ops/sec": convert("$results.ops/sec", "double"),
            "P999": convert("$results.Percentile P99_900000 [micros/op]", "double"),
            "P9999": convert("$results.Percentile P99_990000 [micros/op]", "double"),
            "Date": convert("$results.Date", "date"),
        }
    }
});

static PROJECT: Lazy<Document> = Lazy::new(|| {
    doc! {
        "$project": {
            "y": "$__alias_0",
            "x": "$_id.__alias_1",
            "color": "$_id.__alias_2",
            "_id": 0,
        }
    }
});

static SORT: Lazy<Document> = Lazy::new(|| doc! { "$sort": { "color": 1, "x": 1 } });

/// Parameters selecting the results of one chart
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AggregationParams {
    pub engines: Vec<String>,
    pub value_sizes: Vec<i64>,
    pub key_sizes: Vec<i64>,
    pub benchmarks: Vec<String>,
    /// `YYYY-MM-DD [hh:mm:ss]`, only results from this point on are taken
    pub date_from: String,
    pub group_by_1: String,
    pub group_by_2: String,
    pub group_by_aggr: String,
    #[serde(default)]
    pub emon_enabled: Option<bool>,
    #[serde(default)]
    pub nums: Option<Vec<i64>>,
    #[serde(default)]
    pub threads: Option<Vec<i64>>,
    /// whole `--benchmarks` parameter values, e.g. `fillseq,readrandom`
    #[serde(default)]
    pub benchmarks_sets: Option<Vec<String>>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl AggregationParams {
    fn match_stage(&self) -> Document {
        let mut filters = doc! {
            "engine": { "$in": self.engines.clone() },
            "results.Benchmark": { "$in": self.benchmarks.clone() },
            "value_size": { "$in": self.value_sizes.clone() },
            "key_size": { "$in": self.key_sizes.clone() },
            "$expr": {
                "$gte": [
                    "$Date",
                    {
                        "$dateFromString": {
                            "dateString": self.date_from.as_str(),
                            "timezone": self.timezone.as_str(),
                        }
                    }
                ]
            },
        };

        // the flag is stored the way the test case spelled it
        if let Some(enabled) = self.emon_enabled {
            let spellings: Vec<Bson> = if enabled {
                vec![Bson::from("1"), Bson::Int32(1), Bson::from("True"), Bson::Boolean(true)]
            } else {
                vec![Bson::from("0"), Bson::Int32(0), Bson::from("False"), Bson::Boolean(false)]
            };
            filters.insert("runtime_parameters.emon", doc! { "$in": spellings });
        }
        if let Some(ref nums) = self.nums {
            filters.insert("num", doc! { "$in": nums.clone() });
        }
        if let Some(ref threads) = self.threads {
            filters.insert("threads", doc! { "$in": threads.clone() });
        }
        if let Some(ref sets) = self.benchmarks_sets {
            filters.insert("runtime_parameters.params.--benchmarks", doc! { "$in": sets.clone() });
        }

        doc! { "$match": filters }
    }

    fn group_stage(&self) -> Document {
        doc! {
            "$group": {
                "_id": {
                    "__alias_1": format!("${}", self.group_by_1),
                    "__alias_2": format!("${}", self.group_by_2),
                },
                "__alias_0": { "$avg": format!("${}", self.group_by_aggr) },
            }
        }
    }
}

/// Build the pipeline for a chart. `raw` stops after filtering, returning whole documents.
pub fn build_pipeline(params: &AggregationParams, raw: bool) -> Vec<Document> {
    let mut pipeline = vec![
        doc! { "$unwind": "$results" },
        ADD_FIELDS.clone(),
        params.match_stage(),
    ];

    if raw {
        return pipeline;
    }

    pipeline.push(params.group_stage());
    pipeline.push(PROJECT.clone());
    pipeline.push(SORT.clone());

    pipeline
}

/// first key of every stage, e.g. `["$unwind", "$addFields", ...]`
pub fn stage_names(pipeline: &[Document]) -> Vec<&str> {
    pipeline
        .iter()
        .filter_map(|stage| stage.keys().next().map(String::as_str))
        .collect()
}
