pub mod mongo;
pub mod sanitize;

use crate::report::{Report, ResultsDirectory};
use std::env;
use thiserror::Error;
use tracing::{info, warn};

pub use mongo::MongoConnection;

pub const MONGO_ADDRESS: &str = "MONGO_ADDRESS";
pub const MONGO_PORT: &str = "MONGO_PORT";
pub const MONGO_USER: &str = "MONGO_USER";
pub const MONGO_PASSWORD: &str = "MONGO_PASSWORD";
pub const MONGO_DB_NAME: &str = "MONGO_DB_NAME";
pub const MONGO_DB_COLLECTION: &str = "MONGO_DB_COLLECTION";

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Environment variable {0} was not specified")]
    MissingVariable(&'static str),
    #[error("MONGO_PORT must be a port number, got '{0}'")]
    InvalidPort(String),
    #[error("Document store error")]
    Mongo(#[from] mongodb::error::Error),
    #[error("Failed to convert the report into a document")]
    Serialize(#[from] bson::ser::Error),
    #[error("Failed to convert the report into JSON")]
    Json(#[from] serde_json::Error),
    #[error("Report must serialize into a document, got {0}")]
    NotADocument(String),
    #[error("Failed to write the report")]
    Io(#[from] std::io::Error),
}

/// connection settings for the document store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MongoConfig {
    pub address: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub db_name: String,
    pub collection: String,
}

impl MongoConfig {
    /// Read the `MONGO_*` variables, all of them are required
    pub fn from_env() -> Result<Self, ConnectionError> {
        Self::from_lookup(|name| env::var(name).ok(), None, None)
    }

    /// `from_env` with fallbacks for the database and collection names
    pub fn from_env_or(db_name: &str, collection: &str) -> Result<Self, ConnectionError> {
        Self::from_lookup(|name| env::var(name).ok(), Some(db_name), Some(collection))
    }

    pub fn from_lookup<F: Fn(&'static str) -> Option<String>>(
        lookup: F,
        default_db_name: Option<&str>,
        default_collection: Option<&str>,
    ) -> Result<Self, ConnectionError> {
        let require =
            |name: &'static str| lookup(name).ok_or(ConnectionError::MissingVariable(name));
        let with_default = |name: &'static str, default: Option<&str>| {
            lookup(name)
                .or_else(|| default.map(str::to_owned))
                .ok_or(ConnectionError::MissingVariable(name))
        };

        let address = require(MONGO_ADDRESS)?;
        let port = require(MONGO_PORT)?;
        let port = port
            .parse()
            .map_err(|_| ConnectionError::InvalidPort(port.clone()))?;

        Ok(Self {
            address,
            port,
            user: require(MONGO_USER)?,
            password: require(MONGO_PASSWORD)?,
            db_name: with_default(MONGO_DB_NAME, default_db_name)?,
            collection: with_default(MONGO_DB_COLLECTION, default_collection)?,
        })
    }
}

/// All places a finished report can be persisted to
#[derive(Debug)]
pub enum StorageAdapters {
    Directory(ResultsDirectory),
    Mongo(MongoConnection),
}

impl StorageAdapters {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Directory(_) => "directory",
            Self::Mongo(_) => "mongodb",
        }
    }

    pub fn store(&self, report: &Report, index: usize) -> Result<(), ConnectionError> {
        match self {
            Self::Directory(directory) => directory.store(report, index),
            Self::Mongo(connection) => connection.store(report),
        }
    }

    /// Build the adapters enabled by the environment; a misconfigured adapter is skipped
    pub fn from_config(
        results_dir: Option<&std::path::Path>,
        mongo: Option<&MongoConfig>,
    ) -> Vec<Self> {
        let mut adapters = Vec::new();

        if let Some(base) = results_dir {
            match ResultsDirectory::create(base) {
                Ok(directory) => {
                    info!(path = ?directory.path(), "Writing results to directory");
                    adapters.push(Self::Directory(directory));
                }
                Err(error) => {
                    warn!(
                        error = ?error,
                        "Failed to create results directory, results won't be written: {error}"
                    );
                }
            }
        }

        if let Some(config) = mongo {
            match MongoConnection::load(config) {
                Ok(connection) => adapters.push(Self::Mongo(connection)),
                Err(error) => {
                    warn!(
                        error = ?error,
                        "Failed to connect to the database, results won't be uploaded: {error}"
                    );
                }
            }
        }

        adapters
    }
}
