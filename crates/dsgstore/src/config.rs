// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use crate::error::{DsgError, Result};
use crate::pool::PoolConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What a joining or external-only read does when the query does not pin
/// the time attribute to a single instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingTimestampPolicy {
    /// Fail the read with `DsgError::MissingTimestamp`
    Reject,
    /// Use each station's most recent sample within whatever time range
    /// the filter does impose
    #[default]
    Latest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Vector attribute holding the station key
    pub station_attribute: String,

    #[serde(default)]
    pub missing_timestamp: MissingTimestampPolicy,

    #[serde(default)]
    pub pool: PoolConfig,
}

impl StoreConfig {
    pub fn new(station_attribute: impl Into<String>) -> Self {
        Self {
            station_attribute: station_attribute.into(),
            missing_timestamp: MissingTimestampPolicy::default(),
            pool: PoolConfig::default(),
        }
    }

    #[must_use]
    pub fn with_missing_timestamp(mut self, policy: MissingTimestampPolicy) -> Self {
        self.missing_timestamp = policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.station_attribute.trim().is_empty() {
            return Err(DsgError::config("station_attribute cannot be empty"));
        }
        self.pool.validate()
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: StoreConfig = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DsgError::config(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&content)
    }
}
