//! Turns uploaded benchmark reports back into comparison charts.

pub mod charts;
pub mod pipeline;
pub mod results;

/// database and collection charts read from unless `MONGO_DB_NAME`/`MONGO_DB_COLLECTION` say
/// otherwise
pub const DEFAULT_DB_NAME: &str = "pmemkv-performance";
pub const DEFAULT_COLLECTION: &str = "performance_data";
