// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::{Context, Result};
use dsgstore::StoreConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Describes where a `dsg` store's data lives.
///
/// ```yaml
/// vector: stations.csv
/// observations: observations.csv
/// station_attribute: id
/// missing_timestamp: latest
/// pool:
///   max_open: 8
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Station records, one CSV row per station
    pub vector: PathBuf,

    /// Observations, one CSV row per station and instant
    pub observations: PathBuf,

    /// Column of `vector` used as the feature id; rows are numbered when absent
    #[serde(default)]
    pub feature_id_column: Option<String>,

    #[serde(default = "default_time_variable")]
    pub time_variable: String,

    /// Column of `observations` holding the station key
    #[serde(default = "default_station_column")]
    pub station_column: String,

    /// Observation columns treated as labels rather than numbers
    #[serde(default)]
    pub categorical: Vec<String>,

    #[serde(flatten)]
    pub store: StoreConfig,
}

fn default_time_variable() -> String {
    "time".to_string()
}

fn default_station_column() -> String {
    "station".to_string()
}

/// Load configuration from YAML file. Relative data paths are taken
/// relative to the file's directory.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: CliConfig = serde_yaml_ng::from_str(&content)
        .with_context(|| "Failed to parse YAML configuration")?;

    if let Some(dir) = path.parent() {
        config.vector = dir.join(&config.vector);
        config.observations = dir.join(&config.observations);
    }

    validate_config(&config)?;
    Ok(config)
}

pub(crate) fn validate_config(config: &CliConfig) -> Result<()> {
    if config.time_variable.is_empty() {
        anyhow::bail!("time_variable cannot be empty");
    }
    if config.station_column.is_empty() {
        anyhow::bail!("station_column cannot be empty");
    }
    if config.station_column == config.time_variable {
        anyhow::bail!(
            "station_column and time_variable must differ (both are '{}')",
            config.time_variable
        );
    }
    config
        .store
        .validate()
        .with_context(|| "Invalid store configuration")?;
    Ok(())
}
