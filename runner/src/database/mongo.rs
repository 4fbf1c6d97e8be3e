use super::{sanitize::sanitize, ConnectionError, MongoConfig};
use crate::report::Report;
use bson::Document;
use mongodb::{
    options::{ClientOptions, Credential, ServerAddress},
    sync::{Client, Collection},
};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info};

/// Synchronous connection to one collection of the document store
pub struct MongoConnection {
    collection: Collection<Document>,
    target: String,
}

impl fmt::Debug for MongoConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MongoConnection")
            .field("target", &self.target)
            .finish()
    }
}

/// Serialize a value into a document with store compatible keys
pub fn to_document<T: Serialize>(value: &T) -> Result<Document, ConnectionError> {
    match bson::to_bson(&sanitize(serde_json::to_value(value)?))? {
        bson::Bson::Document(document) => Ok(document),
        other => Err(ConnectionError::NotADocument(format!("{:?}", other.element_type()))),
    }
}

impl MongoConnection {
    pub fn load(config: &MongoConfig) -> Result<Self, ConnectionError> {
        let options = ClientOptions::builder()
            .hosts(vec![ServerAddress::Tcp {
                host: config.address.clone(),
                port: Some(config.port),
            }])
            .credential(
                Credential::builder()
                    .username(config.user.clone())
                    .password(config.password.clone())
                    .build(),
            )
            .build();
        let client = Client::with_options(options)?;
        let target = format!(
            "{}:{}/{}/{}",
            config.address, config.port, config.db_name, config.collection
        );

        debug!(target = %target, "Created document store client");

        Ok(Self {
            collection: client
                .database(&config.db_name)
                .collection::<Document>(&config.collection),
            target,
        })
    }

    /// insert one document per benchmark run
    pub fn store(&self, report: &Report) -> Result<(), ConnectionError> {
        self.insert(to_document(report)?)
    }

    pub fn insert(&self, document: Document) -> Result<(), ConnectionError> {
        let result = self.collection.insert_one(document).run()?;

        info!(id = %result.inserted_id, target = %self.target, "Inserted document");

        Ok(())
    }

    /// run an aggregation pipeline and collect all resulting documents
    pub fn aggregate(&self, pipeline: Vec<Document>) -> Result<Vec<Document>, ConnectionError> {
        debug!(target = %self.target, stages = pipeline.len(), "Running aggregation");

        self.collection
            .aggregate(pipeline)
            .run()?
            .map(|document| document.map_err(ConnectionError::from))
            .collect()
    }
}
