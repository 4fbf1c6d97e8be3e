//! Key rewriting for the document store, whose query language reserves `.` in field names.

use serde_json::{Map, Value};

/// Rewrite a single key: names mentioning `name` become `metric`, dots become underscores
pub fn sanitize_key(key: &str) -> String {
    if key.contains("name") {
        "metric".to_owned()
    } else {
        key.replace('.', "_")
    }
}

/// Recursively rewrite all object keys of a document
pub fn sanitize(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (sanitize_key(&key), sanitize(value)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(values) => Value::Array(values.into_iter().map(sanitize).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rewrites_nested_keys() {
        let document = json!({
            "results": [{"Percentile P99.900000 [micros/op]": "1.5", "Benchmark": "fillseq"}],
            "runtime_parameters": {"params": {"--engine": "cmap"}},
            "histogram_name": "fillseq"
        });

        assert_eq!(
            sanitize(document),
            json!({
                "results": [{"Percentile P99_900000 [micros/op]": "1.5", "Benchmark": "fillseq"}],
                "runtime_parameters": {"params": {"--engine": "cmap"}},
                "metric": "fillseq"
            })
        );
    }

    #[test]
    fn leaves_values_untouched() {
        assert_eq!(sanitize(json!(["a.b", 1.5])), json!(["a.b", 1.5]));
    }
}
