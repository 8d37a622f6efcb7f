// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Opening a store described by a [`CliConfig`] from CSV files

use crate::config::CliConfig;
use anyhow::{Context, Result};
use arrow_array::RecordBatch;
use arrow_csv::ReaderBuilder;
use arrow_csv::reader::Format;
use diagnostics::*;
use dsgstore::memory::{MemoryDataset, MemoryProvider, MemoryVectorStore, ObservationLayout};
use dsgstore::{DatasetPool, StationDataStore};
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

/// Rows sampled for type inference
const INFER_ROWS: usize = 100;

/// Read a CSV file with a header row, inferring column types
pub fn read_csv(path: &Path) -> Result<Vec<RecordBatch>> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

    let format = Format::default().with_header(true);
    let (schema, _) = format
        .infer_schema(&mut file, Some(INFER_ROWS))
        .with_context(|| format!("Failed to infer schema of {}", path.display()))?;
    _ = file.seek(SeekFrom::Start(0))?;

    let reader = ReaderBuilder::new(Arc::new(schema))
        .with_format(format)
        .build(file)?;
    let batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let rows: usize = batches.iter().map(RecordBatch::num_rows).sum();
    let file_name = path.display().to_string();
    debug!("Read {rows} rows from {file_name}", rows: rows, file_name: file_name);
    Ok(batches)
}

/// Build the datastore: the vector CSV becomes the vector store and the
/// observations CSV the single external dataset, registered under its path.
pub fn open_store(config: &CliConfig) -> Result<StationDataStore> {
    let vector = MemoryVectorStore::from_record_batches(
        &read_csv(&config.vector)?,
        config.feature_id_column.as_deref(),
    )
    .with_context(|| format!("Failed to load stations from {}", config.vector.display()))?;

    let layout = ObservationLayout {
        station_column: config.station_column.clone(),
        time_column: config.time_variable.clone(),
        categorical: config.categorical.clone(),
    };
    let dataset = MemoryDataset::from_record_batches(&read_csv(&config.observations)?, &layout)
        .with_context(|| {
            format!(
                "Failed to load observations from {}",
                config.observations.display()
            )
        })?;

    let locator = config.observations.display().to_string();
    let provider = MemoryProvider::new().with_dataset(&locator, dataset);
    let pool = DatasetPool::new(Arc::new(provider), config.store.pool.clone());

    Ok(StationDataStore::new(
        config.store.clone(),
        Arc::new(vector),
        pool,
        locator,
    )?)
}
