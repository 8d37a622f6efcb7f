// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use crate::config::load_config;
use crate::loader::open_store;
use anyhow::Result;
use dsgstore::{Extractor, MergedSchema, Origin};
use std::fmt::Write;
use std::path::Path;

/// Schema command - lists the merged attributes with their types and origin
pub fn schema_command<F>(config_path: &Path, mut handler: F) -> Result<()>
where
    F: FnMut(&str),
{
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    let schema = store.schema()?;
    handler(&format_schema(&schema));
    store.dispose();
    Ok(())
}

fn format_schema(schema: &MergedSchema) -> String {
    let width = schema
        .attributes()
        .iter()
        .map(|a| a.name().len())
        .max()
        .unwrap_or(0)
        .max("NAME".len());

    let mut out = String::new();
    _ = writeln!(out, "{:<width$}  {:<24}  ORIGIN", "NAME", "TYPE");
    for attribute in schema.attributes() {
        let origin = match attribute.origin() {
            Origin::Vector => "vector".to_string(),
            Origin::External {
                variable,
                extractor,
            } => {
                let kind = match extractor {
                    Extractor::TimeStamp => "time",
                    Extractor::Scalar { .. } => "scalar",
                    Extractor::Categorical { .. } => "categorical",
                };
                format!("external {} ({kind})", variable.full_name)
            }
        };
        let data_type = attribute.data_type().to_string();
        _ = writeln!(
            out,
            "{:<width$}  {data_type:<24}  {origin}",
            attribute.name()
        );
    }
    out
}
