//! JSON schemas for the build and benchmark configurations.
//!
//! The schemas are embedded at compile time and compiled on first use.

use jsonschema::Validator;
use once_cell::sync::Lazy;
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error};

const BUILD_SCHEMA: &str = include_str!("../schemas/build.schema.json");
const BENCH_SCHEMA: &str = include_str!("../schemas/bench.schema.json");

static BUILD_VALIDATOR: Lazy<Result<Validator, String>> = Lazy::new(|| compile(BUILD_SCHEMA));
static BENCH_VALIDATOR: Lazy<Result<Validator, String>> = Lazy::new(|| compile(BENCH_SCHEMA));

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Schema '{schema}' failed to compile: {reason}")]
    Compile { schema: Schema, reason: String },
    #[error("Validation against '{schema}' failed at '{path}': {message}")]
    Invalid {
        schema: Schema,
        path: String,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    Build,
    Bench,
}

impl Schema {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Bench => "bench",
        }
    }

    fn validator(&self) -> Result<&'static Validator, SchemaError> {
        let compiled = match self {
            Self::Build => &*BUILD_VALIDATOR,
            Self::Bench => &*BENCH_VALIDATOR,
        };

        compiled.as_ref().map_err(|reason| SchemaError::Compile {
            schema: *self,
            reason: reason.clone(),
        })
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn compile(source: &str) -> Result<Validator, String> {
    let schema: Value = serde_json::from_str(source).map_err(|e| e.to_string())?;

    jsonschema::validator_for(&schema).map_err(|e| e.to_string())
}

/// Validate `instance` and report the first violation found
pub fn validate(instance: &Value, schema: Schema) -> Result<(), SchemaError> {
    let validator = schema.validator()?;

    match validator.iter_errors(instance).next() {
        None => {
            debug!(schema = %schema, "Configuration conforms to schema");

            Ok(())
        }
        Some(violation) => {
            let path = violation.instance_path.to_string();
            let message = violation.to_string();

            error!(schema = %schema, path = %path, "Schema violation: {message}");

            Err(SchemaError::Invalid {
                schema,
                path: if path.is_empty() { "/".to_owned() } else { path },
                message,
            })
        }
    }
}
