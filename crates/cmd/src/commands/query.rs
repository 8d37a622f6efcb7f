// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use super::QueryArgs;
use crate::config::load_config;
use crate::loader::open_store;
use anyhow::{Context, Result};
use arrow_cast::pretty::pretty_format_batches;
use diagnostics::*;
use dsgstore::collect_batch;
use std::path::Path;

/// Query command - runs a query and renders the result as a table
pub fn query_command<F>(config_path: &Path, args: &QueryArgs, mut handler: F) -> Result<()>
where
    F: FnMut(&str),
{
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    let schema = store.schema()?;
    let query = args.to_query(schema.time_attribute())?;

    let mut reader = store.reader(&query)?;
    let batch = collect_batch(reader.as_mut()).with_context(|| "Failed to read query results")?;
    let rows = batch.num_rows();
    info!("Query returned {rows} rows", rows: rows);

    let table = pretty_format_batches(&[batch])?;
    handler(&format!("{table}\n"));
    store.dispose();
    Ok(())
}
