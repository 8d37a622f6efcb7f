// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

// Error types for station datastore operations

pub type Result<T> = std::result::Result<T, DsgError>;

#[derive(Debug, thiserror::Error)]
pub enum DsgError {
    #[error("External source unavailable: {locator}: {message}")]
    ExternalSourceUnavailable { locator: String, message: String },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Join key attribute '{attribute}' is missing from the vector row")]
    JoinKeyMissing { attribute: String },

    #[error("Query does not constrain the timestamp attribute '{attribute}'")]
    MissingTimestamp { attribute: String },

    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("Dataset pool exhausted for {locator}: {max_open} handles already open")]
    PoolExhausted { locator: String, max_open: usize },

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl DsgError {
    pub fn unavailable(locator: impl Into<String>, message: impl std::fmt::Display) -> Self {
        DsgError::ExternalSourceUnavailable {
            locator: locator.into(),
            message: message.to_string(),
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        DsgError::Schema(message.into())
    }

    pub fn join_key_missing(attribute: impl Into<String>) -> Self {
        DsgError::JoinKeyMissing {
            attribute: attribute.into(),
        }
    }

    pub fn missing_timestamp(attribute: impl Into<String>) -> Self {
        DsgError::MissingTimestamp {
            attribute: attribute.into(),
        }
    }

    pub fn vector_store(message: impl Into<String>) -> Self {
        DsgError::VectorStore(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        DsgError::Config(message.into())
    }
}
