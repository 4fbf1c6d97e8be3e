use crate::{
    pipeline::{build_pipeline, AggregationParams, DEFAULT_TIMEZONE},
    results::{parse_std_results, ChartData},
};
use bson::Document;
use itertools::Itertools;
use kvbench_runner::database::{ConnectionError, MongoConnection};
use plotters::prelude::*;
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{error, info};

pub const CHART_WIDTH: u32 = 1000;
pub const CHART_HEIGHT: u32 = 500;
const MARGIN_LEFT: i32 = 50;
const MARGIN_RIGHT: i32 = 50;
const MARGIN_TOP: i32 = 50;
const MARGIN_BOTTOM: i32 = 75;

#[derive(Error, Debug)]
pub enum ChartError {
    #[error("No data to draw")]
    NoData,
    #[error("Failed to draw chart: {0}")]
    Draw(String),
    #[error("Failed to write {0:?}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("Failed to serialize")]
    Json(#[from] serde_json::Error),
    #[error("Query failed")]
    Connection(#[from] ConnectionError),
}

fn draw_error<E: std::fmt::Display>(error: E) -> ChartError {
    ChartError::Draw(error.to_string())
}

/// Anything able to run an aggregation pipeline
pub trait DocumentSource {
    fn aggregate(&self, pipeline: Vec<Document>) -> Result<Vec<Document>, ConnectionError>;
}

impl DocumentSource for MongoConnection {
    fn aggregate(&self, pipeline: Vec<Document>) -> Result<Vec<Document>, ConnectionError> {
        MongoConnection::aggregate(self, pipeline)
    }
}

/// Engines and value sizes keep their colour across all charts
pub fn bar_color(name: &str) -> RGBColor {
    match name {
        "cmap" => RGBColor(0x16, 0xCC, 0x62),
        "csmap" => RGBColor(0x19, 0x6E, 0xE6),
        "robinhood" => RGBColor(0xE6, 0xB2, 0x19),
        "radix" => RGBColor(0xE6, 0x19, 0x6E),
        "dram_vcmap" => RGBColor(0xE5, 0x6E, 0xA9),
        "stree" => RGBColor(0x19, 0xC3, 0xE6),
        "8" => RGBColor(0xE6, 0xB0, 0x10),
        "128" => RGBColor(0x19, 0x6D, 0xE0),
        "1024" => RGBColor(0x16, 0xCB, 0x50),
        other => {
            // FNV-1a, stable across runs and platforms
            let hash = other.bytes().fold(0x811c_9dc5_u32, |hash, byte| {
                (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193)
            });
            let [_, r, g, b] = hash.to_be_bytes();

            RGBColor(r, g, b)
        }
    }
}

/// `1234567.5` -> `1,234,567.5`
pub fn thousands(value: f64) -> String {
    let text = format!("{:.2}", value.abs());
    let (integer, fraction) = text.split_once('.').unwrap_or((text.as_str(), ""));
    let digits = integer.chars().collect_vec();
    let grouped = digits
        .rchunks(3)
        .rev()
        .map(|chunk| chunk.iter().collect::<String>())
        .join(",");
    let fraction = fraction.trim_end_matches('0');
    let sign = if value < 0.0 && text.chars().any(|c| c != '0' && c != '.') {
        "-"
    } else {
        ""
    };

    if fraction.is_empty() {
        format!("{sign}{grouped}")
    } else {
        format!("{sign}{grouped}.{fraction}")
    }
}

/// Texts around a chart
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChartLabels {
    pub title: String,
    pub x_title: String,
    pub y_title: String,
    pub legend_title: String,
}

/// Grouped bar chart, one bar per series in every x category. Written as `<path>.svg`.
pub fn draw_bar_chart(
    data: &ChartData,
    labels: &ChartLabels,
    path: &Path,
) -> Result<PathBuf, ChartError> {
    let categories = data.categories();
    if categories.is_empty() {
        return Err(ChartError::NoData);
    }

    // every category spans one slot per series plus an empty one as separator
    let width = data.series.len() as i32 + 1;
    let slots = categories.len() as i32 * width;
    let top = match data.max_value() {
        Some(max) if max > 0.0 => max * 1.1,
        _ => 1.0,
    };

    let file = path.with_extension("svg");
    let root = SVGBackend::new(&file, (CHART_WIDTH, CHART_HEIGHT)).into_drawing_area();
    root.fill(&WHITE).map_err(draw_error)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(&labels.title, ("sans-serif", 20))
        .margin_top(MARGIN_TOP / 5)
        .margin_bottom(MARGIN_BOTTOM / 5)
        .margin_left(MARGIN_LEFT / 5)
        .margin_right(MARGIN_RIGHT / 5)
        .x_label_area_size(MARGIN_BOTTOM)
        .y_label_area_size(MARGIN_LEFT * 2)
        .build_cartesian_2d((0..slots).into_segmented(), 0f64..top)
        .map_err(draw_error)?;

    let middle = (width - 1) / 2;
    let x_label = |value: &SegmentValue<i32>| match value {
        SegmentValue::Exact(slot) | SegmentValue::CenterOf(slot) if slot % width == middle => {
            categories
                .get((slot / width) as usize)
                .cloned()
                .unwrap_or_default()
        }
        _ => String::new(),
    };
    let y_label = |value: &f64| thousands(*value);

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(slots as usize)
        .x_label_formatter(&x_label)
        .y_label_formatter(&y_label)
        .x_desc(labels.x_title.as_str())
        .y_desc(labels.y_title.as_str())
        .draw()
        .map_err(draw_error)?;

    if !labels.legend_title.is_empty() {
        // an entry without a marker acts as the legend's title
        chart
            .draw_series(std::iter::empty::<Rectangle<(SegmentValue<i32>, f64)>>())
            .map_err(draw_error)?
            .label(labels.legend_title.as_str());
    }

    for (index, series) in data.series.iter().enumerate() {
        let color = bar_color(&series.name);
        let bars = series.points.iter().filter_map(|(x, y)| {
            let category = categories.iter().position(|category| category == x)? as i32;
            let slot = category * width + index as i32;

            y.map(|y| {
                Rectangle::new(
                    [(SegmentValue::Exact(slot), 0.0), (SegmentValue::Exact(slot + 1), y)],
                    color.filled(),
                )
            })
        });

        chart
            .draw_series(bars)
            .map_err(draw_error)?
            .label(series.name.as_str())
            .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], color.filled()));
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .background_style(WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(draw_error)?;

    root.present().map_err(draw_error)?;
    // the backend borrows the file path
    drop(chart);
    drop(root);
    info!(path = ?file, "File written");

    Ok(file)
}

/// One chart of the report: what to query and how to label it
#[derive(Clone, Debug, PartialEq)]
pub struct ChartSpec {
    /// file name below the output directory, without extension
    pub name: String,
    pub labels: ChartLabels,
    pub params: AggregationParams,
    pub expected_series: Option<usize>,
}

fn base_params(
    date_from: &str,
    engines: &[&str],
    group_by_1: &str,
    group_by_2: &str,
    aggr: &str,
) -> AggregationParams {
    AggregationParams {
        engines: engines.iter().map(|engine| engine.to_string()).collect(),
        value_sizes: vec![8],
        key_sizes: vec![8],
        benchmarks: Vec::new(),
        date_from: date_from.to_owned(),
        group_by_1: group_by_1.to_owned(),
        group_by_2: group_by_2.to_owned(),
        group_by_aggr: aggr.to_owned(),
        emon_enabled: Some(false),
        nums: Some(vec![10_000_000]),
        threads: None,
        benchmarks_sets: None,
        timezone: DEFAULT_TIMEZONE.to_owned(),
    }
}

fn spec(
    name: String,
    title: String,
    x_title: &str,
    y_title: &str,
    legend_title: &str,
    mut params: AggregationParams,
    bench: &str,
    expected_series: usize,
) -> ChartSpec {
    params.benchmarks = vec![bench.to_owned()];

    ChartSpec {
        name,
        labels: ChartLabels {
            title,
            x_title: x_title.to_owned(),
            y_title: y_title.to_owned(),
            legend_title: legend_title.to_owned(),
        },
        params,
        expected_series: Some(expected_series),
    }
}

const MT_BENCHMARKS: [&str; 6] = [
    "fillrandom",
    "fillseq",
    "readrandom",
    "readseq",
    "readrandomwriterandom",
    "readwhilewriting",
];
const BASIC_BENCHMARKS: [&str; 4] = ["fillrandom", "fillseq", "readrandom", "readseq"];
const OPS: &str = "ops/sec";
const LATENCY: &str = "Latency P99.9 [us] (lower is better)";

/// The performance report's chart set
pub fn standard_charts(date_from: &str) -> Vec<ChartSpec> {
    let mut charts = Vec::new();

    let mt = base_params(date_from, &["csmap", "cmap"], "threads", "engine", OPS);
    for bench in MT_BENCHMARKS {
        charts.push(spec(
            format!("MT_8_10Mil-{bench}"),
            format!("{OPS} 8b {bench} MT engines"),
            "Threads",
            OPS,
            "Engines",
            mt.clone(),
            bench,
            2,
        ));
    }

    let robinhood = base_params(
        date_from,
        &["csmap", "cmap", "robinhood"],
        "threads",
        "engine",
        OPS,
    );
    for bench in MT_BENCHMARKS {
        charts.push(spec(
            format!("MT_8_robinhood_10Mil-{bench}"),
            format!("{OPS} 8b {bench} MT engines (w/ robinhood)"),
            "Threads",
            OPS,
            "Engines",
            robinhood.clone(),
            bench,
            3,
        ));
    }

    let dram = base_params(date_from, &["csmap", "cmap", "dram_vcmap"], "threads", "engine", OPS);
    for bench in BASIC_BENCHMARKS {
        charts.push(spec(
            format!("MT_8_dram_10Mil-{bench}"),
            format!("{OPS} 8b {bench} (w/ dram_vcmap)"),
            "Threads",
            OPS,
            "Engines",
            dram.clone(),
            bench,
            3,
        ));
    }

    // dram_vcmap only has 1Mil runs without telemetry, collected since 2021-03-09
    let mut dram_1mil = base_params("2021-03-09", &["dram_vcmap"], "threads", "engine", OPS);
    dram_1mil.nums = Some(vec![1_000_000]);
    dram_1mil.emon_enabled = None;
    for bench in ["fillrandom", "fillseq"] {
        charts.push(spec(
            format!("MT_8_dram_1Mil-{bench}"),
            format!("{OPS} 8b {bench} (w/ dram_vcmap)"),
            "Threads",
            OPS,
            "Engines",
            dram_1mil.clone(),
            bench,
            1,
        ));
    }

    let mut single_thread = base_params(
        date_from,
        &["csmap", "cmap", "robinhood", "radix", "stree"],
        "value_size",
        "engine",
        OPS,
    );
    single_thread.threads = Some(vec![1]);
    single_thread.value_sizes = vec![8, 128, 1024];
    for bench in BASIC_BENCHMARKS {
        charts.push(spec(
            format!("ST_8_10Mil_values-{bench}"),
            format!("8b {bench} single thread, value_size vs {OPS}"),
            "Value sizes",
            OPS,
            "Engines",
            single_thread.clone(),
            bench,
            5,
        ));
    }

    let latency = base_params(date_from, &["csmap", "cmap"], "threads", "engine", "P999");
    for bench in BASIC_BENCHMARKS {
        charts.push(spec(
            format!("lat_P999_8_10Mil-{bench}"),
            format!("{LATENCY} 8b {bench} MT engines"),
            "Threads",
            LATENCY,
            "Engines",
            latency.clone(),
            bench,
            2,
        ));
    }

    let latency_robinhood = base_params(
        date_from,
        &["csmap", "cmap", "robinhood"],
        "threads",
        "engine",
        "P999",
    );
    for bench in BASIC_BENCHMARKS {
        charts.push(spec(
            format!("lat_P999_8_robinhood_10Mil-{bench}"),
            format!("{LATENCY} 8b {bench} MT engines (w/ robinhood)"),
            "Threads",
            LATENCY,
            "Engines",
            latency_robinhood.clone(),
            bench,
            3,
        ));
    }

    for bench in BASIC_BENCHMARKS {
        for engine in ["cmap", "csmap", "stree", "radix"] {
            let mut params = base_params(date_from, &[engine], "threads", "value_size", OPS);
            params.value_sizes = vec![8, 128, 1024];

            charts.push(spec(
                format!("engine_{engine}_8_10Mil_values-{bench}"),
                format!("{engine} engine, {bench} 8b keys, value_size vs {OPS}"),
                "Threads",
                OPS,
                "Value size [bytes]",
                params,
                bench,
                3,
            ));
        }
    }

    charts
}

#[derive(Clone, Copy, Debug, Default)]
pub struct GenerateOptions {
    /// store the pipeline as `<name>.json` next to the chart
    pub save_pipeline: bool,
    /// store the unaggregated documents as `<name>_raw_docs.json`
    pub raw_docs: bool,
}

pub fn write_json<T: serde::Serialize>(value: &T, path: &Path) -> Result<(), ChartError> {
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text).map_err(|e| ChartError::Io(path.to_path_buf(), e))
}

/// Query the data of one chart and draw it into `out_dir`
pub fn generate_chart<S: DocumentSource>(
    source: &S,
    chart: &ChartSpec,
    out_dir: &Path,
    options: GenerateOptions,
) -> Result<PathBuf, ChartError> {
    info!(chart = %chart.labels.title, "Processing chart");
    if options.raw_docs {
        let documents = source.aggregate(build_pipeline(&chart.params, true))?;
        write_json(&documents, &out_dir.join(format!("{}_raw_docs.json", chart.name)))?;
        info!(count = documents.len(), "Raw documents saved");
    }

    let pipeline = build_pipeline(&chart.params, false);
    if options.save_pipeline {
        write_json(&pipeline, &out_dir.join(format!("{}.json", chart.name)))?;
    }

    let documents = source.aggregate(pipeline)?;
    let data = parse_std_results(&documents, chart.expected_series).ok_or(ChartError::NoData)?;

    draw_bar_chart(&data, &chart.labels, &out_dir.join(&chart.name))
}

/// Draw every chart, a failing chart doesn't stop the others. Returns the number of failures.
pub fn generate_charts<S: DocumentSource>(
    source: &S,
    charts: &[ChartSpec],
    out_dir: &Path,
    options: GenerateOptions,
) -> usize {
    charts
        .iter()
        .filter(|chart| match generate_chart(source, chart, out_dir, options) {
            Ok(_) => false,
            Err(error) => {
                error!(error = ?error, chart = %chart.name, "Failed to generate chart: {error}");
                true
            }
        })
        .count()
}
