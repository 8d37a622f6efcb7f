// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use super::QueryArgs;
use crate::config::load_config;
use crate::loader::open_store;
use anyhow::Result;
use std::path::Path;

/// Plan command - shows which reader a query would use, without reading
pub fn plan_command<F>(config_path: &Path, args: &QueryArgs, mut handler: F) -> Result<()>
where
    F: FnMut(&str),
{
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    let schema = store.schema()?;
    let query = args.to_query(schema.time_attribute())?;

    let plan = store.plan(&query)?;
    handler(&format!("{plan}\n"));
    store.dispose();
    Ok(())
}
