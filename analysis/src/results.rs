use bson::{Bson, Document};
use tracing::warn;

/// One bar series of a chart, named after its `color` value
#[derive(Clone, Debug, PartialEq)]
pub struct Series {
    pub name: String,
    /// `(x, y)` in the order the store returned them, `y` is absent when nothing could be averaged
    pub points: Vec<(String, Option<f64>)>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChartData {
    pub series: Vec<Series>,
}

impl ChartData {
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// distinct x values in order of first appearance
    pub fn categories(&self) -> Vec<String> {
        let mut categories: Vec<String> = Vec::new();

        for (x, _) in self.series.iter().flat_map(|series| &series.points) {
            if !categories.contains(x) {
                categories.push(x.clone());
            }
        }

        categories
    }

    pub fn max_value(&self) -> Option<f64> {
        self.series
            .iter()
            .flat_map(|series| series.points.iter().filter_map(|(_, y)| *y))
            .reduce(f64::max)
    }
}

/// printable form of a grouping value
pub fn label(value: &Bson) -> String {
    match value {
        Bson::String(text) => text.clone(),
        Bson::Int32(number) => number.to_string(),
        Bson::Int64(number) => number.to_string(),
        Bson::Double(number) if number.fract() == 0.0 => format!("{number:.0}"),
        Bson::Double(number) => number.to_string(),
        Bson::Null => "null".to_owned(),
        other => other.to_string(),
    }
}

fn number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Double(number) => Some(*number),
        Bson::Int32(number) => Some(f64::from(*number)),
        Bson::Int64(number) => Some(*number as f64),
        _ => None,
    }
}

/// Group `{x, y, color}` documents into one series per color. Returns `None` when a document is
/// missing one of the fields, such results cannot be charted.
pub fn parse_std_results(
    documents: &[Document],
    expected_series: Option<usize>,
) -> Option<ChartData> {
    let mut data = ChartData::default();

    for document in documents {
        let (color, x, y) = match (document.get("color"), document.get("x"), document.get("y")) {
            (Some(color), Some(x), Some(y)) => (label(color), label(x), number(y)),
            _ => {
                let missing = ["color", "x", "y"]
                    .into_iter()
                    .filter(|field| !document.contains_key(field))
                    .collect::<Vec<_>>();
                warn!(missing = ?missing, "Results are not suitable for charts");

                return None;
            }
        };

        match data.series.iter_mut().find(|series| series.name == color) {
            Some(series) => series.points.push((x, y)),
            None => data.series.push(Series {
                name: color,
                points: vec![(x, y)],
            }),
        }
    }

    if let Some(expected) = expected_series {
        if expected != data.series.len() {
            warn!("Expected {expected} series, got {}", data.series.len());
        }
    }

    Some(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn groups_points_by_color() {
        let documents = vec![
            doc! { "x": 1, "y": 100.0, "color": "cmap" },
            doc! { "x": 4, "y": 350.5, "color": "cmap" },
            doc! { "x": 1, "y": 90.0, "color": "csmap" },
            doc! { "x": 8, "y": Bson::Null, "color": "csmap" },
        ];

        let data = parse_std_results(&documents, Some(2)).unwrap();

        assert_eq!(data.series.len(), 2);
        assert_eq!(data.series[0].name, "cmap");
        assert_eq!(
            data.series[0].points,
            vec![("1".to_owned(), Some(100.0)), ("4".to_owned(), Some(350.5))]
        );
        assert_eq!(data.series[1].points[1], ("8".to_owned(), None));
        assert_eq!(data.categories(), vec!["1", "4", "8"]);
        assert_eq!(data.max_value(), Some(350.5));
    }

    #[test]
    fn missing_field_is_not_chartable() {
        let documents = vec![
            doc! { "x": 1, "y": 100.0, "color": "cmap" },
            doc! { "engine": "cmap", "ops/sec": 100.0 },
        ];

        assert_eq!(parse_std_results(&documents, None), None);
    }

    #[test]
    fn unexpected_series_count_still_parses() {
        let documents = vec![doc! { "x": 8, "y": 1.0, "color": 128 }];

        let data = parse_std_results(&documents, Some(3)).unwrap();

        assert_eq!(data.series[0].name, "128");
    }

    #[test]
    fn labels() {
        assert_eq!(label(&Bson::Double(1024.0)), "1024");
        assert_eq!(label(&Bson::Double(0.5)), "0.5");
        assert_eq!(label(&Bson::Int64(10_000_000)), "10000000");
        assert_eq!(label(&Bson::String("radix".to_owned())), "radix");
    }
}
