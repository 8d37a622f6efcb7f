// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

pub mod plan;
pub mod query;
pub mod schema;

pub use plan::plan_command;
pub use query::query_command;
pub use schema::schema_command;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use clap::Args;
use dsgstore::{CompareOp, Filter, Query, Value};

/// Projection and filter options shared by `plan` and `query`
#[derive(Args, Debug, Clone, Default)]
pub struct QueryArgs {
    /// Comma-separated attributes to return (default: all)
    #[arg(short, long)]
    pub select: Option<String>,

    /// Read the sample at exactly this instant (RFC3339)
    #[arg(short, long, conflicts_with_all = ["from", "to"])]
    pub time: Option<String>,

    /// Earliest instant to consider, inclusive (RFC3339)
    #[arg(long)]
    pub from: Option<String>,

    /// Latest instant to consider, inclusive (RFC3339)
    #[arg(long)]
    pub to: Option<String>,

    /// Equality condition on an attribute, as NAME=VALUE (repeatable)
    #[arg(short = 'w', long = "where", value_name = "NAME=VALUE")]
    pub conditions: Vec<String>,
}

impl QueryArgs {
    /// Build the query; `time_attribute` is the merged schema's time axis
    pub fn to_query(&self, time_attribute: &str) -> Result<Query> {
        let mut query = match &self.select {
            None => Query::all(),
            Some(list) => Query::select(
                list.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty()),
            ),
        };

        let mut filter = Filter::Include;
        if let Some(time) = &self.time {
            filter = filter.and(Filter::equals(time_attribute, parse_time(time)?));
        }
        if let Some(from) = &self.from {
            filter = filter.and(Filter::compare(
                time_attribute,
                CompareOp::GtEq,
                parse_time(from)?,
            ));
        }
        if let Some(to) = &self.to {
            filter = filter.and(Filter::compare(
                time_attribute,
                CompareOp::LtEq,
                parse_time(to)?,
            ));
        }
        for condition in &self.conditions {
            let (name, value) = condition
                .split_once('=')
                .ok_or_else(|| anyhow!("Expected NAME=VALUE, got '{condition}'"))?;
            filter = filter.and(Filter::equals(name.trim(), parse_literal(value.trim())));
        }

        query = query.with_filter(filter);
        Ok(query)
    }
}

fn parse_time(text: &str) -> Result<DateTime<Utc>> {
    Value::from(text)
        .to_timestamp()
        .ok_or_else(|| anyhow!("Invalid timestamp '{text}'"))
}

/// Numbers compare as numbers; anything else is a string
fn parse_literal(text: &str) -> Value {
    if let Ok(i) = text.parse::<i64>() {
        return Value::Int64(i);
    }
    if let Ok(x) = text.parse::<f64>() {
        return Value::Float64(x);
    }
    Value::from(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use dsgstore::{Projection, extract_timestamp};

    #[test]
    fn test_default_query_selects_everything() {
        let query = QueryArgs::default().to_query("time").unwrap();
        assert_eq!(query, Query::all());
    }

    #[test]
    fn test_select_and_time() {
        let args = QueryArgs {
            select: Some("name, temperature,".to_string()),
            time: Some("2024-01-01T00:00:00Z".to_string()),
            ..QueryArgs::default()
        };
        let query = args.to_query("obs_time").unwrap();
        assert_eq!(
            query.projection,
            Projection::Names(vec!["name".to_string(), "temperature".to_string()])
        );
        assert_eq!(
            extract_timestamp(&query.filter, "obs_time"),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_range_and_conditions() {
        let args = QueryArgs {
            from: Some("2024-01-01T00:00:00Z".to_string()),
            to: Some("2024-01-02T00:00:00Z".to_string()),
            conditions: vec!["id=7".to_string(), "name = alpha".to_string()],
            ..QueryArgs::default()
        };
        let query = args.to_query("time").unwrap();
        let Filter::And(parts) = &query.filter else {
            panic!("expected a conjunction");
        };
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[2], Filter::equals("id", 7i64));
        assert_eq!(parts[3], Filter::equals("name", "alpha"));
        assert_eq!(extract_timestamp(&query.filter, "time"), None);
    }

    #[test]
    fn test_bad_input() {
        let args = QueryArgs {
            time: Some("yesterday".to_string()),
            ..QueryArgs::default()
        };
        assert!(args.to_query("time").is_err());

        let args = QueryArgs {
            conditions: vec!["name".to_string()],
            ..QueryArgs::default()
        };
        assert!(args.to_query("time").is_err());
    }
}
