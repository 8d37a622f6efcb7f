// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Choosing which stores a query has to read.

use crate::error::{DsgError, Result};
use crate::query::{Query, extract_timestamp, requires_attributes};
use crate::schema::MergedSchema;
use chrono::{DateTime, Utc};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ReadPlan {
    /// Only vector attributes are involved; the external dataset is never
    /// opened
    VectorOnly { projection: Vec<String> },

    /// Vector rows joined with external samples by station key
    Join {
        /// Asked of the vector store; ends with the station attribute when
        /// the caller did not project it
        vector_projection: Vec<String>,
        key_index: usize,
        key_appended: bool,
        /// External attributes to fetch, in merged-schema order
        external: Vec<String>,
        timestamp: Option<DateTime<Utc>>,
    },

    /// The projection is exactly the time attribute
    TimestampOnly,

    /// Only external attributes are involved
    ExternalOnly { attributes: Vec<String> },
}

impl ReadPlan {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ReadPlan::VectorOnly { .. } => "vector-only",
            ReadPlan::Join { .. } => "join",
            ReadPlan::TimestampOnly => "timestamp-only",
            ReadPlan::ExternalOnly { .. } => "external-only",
        }
    }
}

impl fmt::Display for ReadPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadPlan::VectorOnly { projection } => {
                write!(f, "vector-only [{}]", projection.join(", "))
            }
            ReadPlan::Join {
                vector_projection,
                key_index,
                key_appended,
                external,
                timestamp,
            } => {
                write!(
                    f,
                    "join vector [{}] key #{key_index}{} with external [{}] at ",
                    vector_projection.join(", "),
                    if *key_appended { " (appended)" } else { "" },
                    external.join(", "),
                )?;
                match timestamp {
                    Some(t) => write!(f, "{}", t.to_rfc3339()),
                    None => write!(f, "<no timestamp>"),
                }
            }
            ReadPlan::TimestampOnly => write!(f, "timestamp-only"),
            ReadPlan::ExternalOnly { attributes } => {
                write!(f, "external-only [{}]", attributes.join(", "))
            }
        }
    }
}

/// Pick the execution path for `query`.
///
/// Every projected name must exist in `schema`. Names in the returned plan
/// are the schema's spelling, not the caller's.
pub fn select_plan(
    query: &Query,
    schema: &MergedSchema,
    station_attribute: &str,
) -> Result<ReadPlan> {
    let output = schema.resolve(&query.projection)?;

    // Nothing projected: geometry only, straight from the vector store
    if query.projection.is_empty() {
        return Ok(ReadPlan::VectorOnly {
            projection: Vec::new(),
        });
    }

    let needs_vector = requires_attributes(query, schema.vector_names());
    let needs_external = requires_attributes(query, schema.external_names());

    let vector_output: Vec<String> = output
        .iter()
        .filter(|a| !a.is_external())
        .map(|a| a.name().to_string())
        .collect();

    if !needs_vector {
        let attributes: Vec<String> = output.iter().map(|a| a.name().to_string()).collect();
        if attributes.len() == 1 && attributes[0] == schema.time_attribute() {
            return Ok(ReadPlan::TimestampOnly);
        }
        return Ok(ReadPlan::ExternalOnly { attributes });
    }

    if !needs_external {
        return Ok(ReadPlan::VectorOnly {
            projection: vector_output,
        });
    }

    let key_name = schema
        .vector_attributes()
        .iter()
        .find(|a| a.name().eq_ignore_ascii_case(station_attribute))
        .map(|a| a.name().to_string())
        .ok_or_else(|| DsgError::join_key_missing(station_attribute))?;

    let mut vector_projection = vector_output;
    let (key_index, key_appended) = match vector_projection
        .iter()
        .position(|n| n.eq_ignore_ascii_case(&key_name))
    {
        Some(index) => (index, false),
        None => {
            vector_projection.push(key_name);
            (vector_projection.len() - 1, true)
        }
    };

    let external = schema
        .external_attributes()
        .iter()
        .filter(|a| output.iter().any(|o| o.name() == a.name()))
        .map(|a| a.name().to_string())
        .collect();

    Ok(ReadPlan::Join {
        vector_projection,
        key_index,
        key_appended,
        external,
        timestamp: extract_timestamp(&query.filter, schema.time_attribute()),
    })
}
