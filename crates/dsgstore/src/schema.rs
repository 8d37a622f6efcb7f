// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Merged attribute schema: vector attributes followed by attributes
//! derived from the external dataset's observation variables.

use crate::error::{DsgError, Result};
use crate::extractor::Extractor;
use crate::pool::DatasetPool;
use crate::query::Projection;
use crate::store::VariableDescriptor;
use crate::value::normalize_type;
use arrow_schema::{DataType, Field};
use diagnostics::*;
use std::collections::BTreeSet;

/// Set of attribute names compared without regard to ASCII case
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeNameSet {
    names: BTreeSet<String>,
}

impl AttributeNameSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if an equal name (ignoring case) was already present
    pub fn insert(&mut self, name: &str) -> bool {
        self.names.insert(name.to_ascii_lowercase())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&name.to_ascii_lowercase())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for AttributeNameSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for name in iter {
            _ = set.insert(name.as_ref());
        }
        set
    }
}

/// Where an attribute's values come from
#[derive(Debug, Clone, PartialEq)]
pub enum Origin {
    Vector,
    External {
        variable: VariableDescriptor,
        extractor: Extractor,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDescriptor {
    name: String,
    data_type: DataType,
    origin: Origin,
}

impl AttributeDescriptor {
    #[must_use]
    pub fn vector(field: &Field) -> Self {
        Self {
            name: field.name().clone(),
            data_type: field.data_type().clone(),
            origin: Origin::Vector,
        }
    }

    /// Descriptor for an external variable, named by its short name
    #[must_use]
    pub fn external(variable: VariableDescriptor) -> Self {
        let extractor = Extractor::for_variable(&variable);
        Self {
            name: variable.short_name().to_string(),
            data_type: extractor.output_type(&variable),
            origin: Origin::External {
                variable,
                extractor,
            },
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    #[must_use]
    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    #[must_use]
    pub fn is_external(&self) -> bool {
        matches!(self.origin, Origin::External { .. })
    }

    #[must_use]
    pub fn extractor(&self) -> Option<&Extractor> {
        match &self.origin {
            Origin::Vector => None,
            Origin::External { extractor, .. } => Some(extractor),
        }
    }

    #[must_use]
    pub fn to_field(&self) -> Field {
        Field::new(&self.name, self.data_type.clone(), true)
    }
}

/// The unified schema presented to callers.
///
/// Built once per store and cached; see `StationDataStore::schema`.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedSchema {
    attributes: Vec<AttributeDescriptor>,
    vector_count: usize,
    vector_names: AttributeNameSet,
    external_names: AttributeNameSet,
    time_attribute: String,
}

impl MergedSchema {
    #[must_use]
    pub fn attributes(&self) -> &[AttributeDescriptor] {
        &self.attributes
    }

    #[must_use]
    pub fn vector_attributes(&self) -> &[AttributeDescriptor] {
        &self.attributes[..self.vector_count]
    }

    #[must_use]
    pub fn external_attributes(&self) -> &[AttributeDescriptor] {
        &self.attributes[self.vector_count..]
    }

    #[must_use]
    pub fn vector_names(&self) -> &AttributeNameSet {
        &self.vector_names
    }

    #[must_use]
    pub fn external_names(&self) -> &AttributeNameSet {
        &self.external_names
    }

    /// Name of the attribute bound to the external time axis
    #[must_use]
    pub fn time_attribute(&self) -> &str {
        &self.time_attribute
    }

    /// Case-insensitive lookup
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }

    /// Descriptors named by a projection, in projection order. `All`
    /// yields the whole schema.
    pub fn resolve(&self, projection: &Projection) -> Result<Vec<&AttributeDescriptor>> {
        match projection {
            Projection::All => Ok(self.attributes.iter().collect()),
            Projection::Names(names) => names
                .iter()
                .map(|name| {
                    self.find(name)
                        .ok_or_else(|| DsgError::UnknownAttribute(name.clone()))
                })
                .collect(),
        }
    }
}

/// Merge the vector store's attributes with the external dataset's
/// observation variables.
///
/// The dataset at `locator` is held only for the duration of the call.
/// External variables whose name collides (ignoring case) with a vector
/// attribute are dropped. The time variable always yields exactly one
/// attribute, first among the derived ones; if a vector attribute already
/// uses its name the schema cannot be built.
pub fn build_schema(
    vector_fields: &[Field],
    pool: &DatasetPool,
    locator: &str,
) -> Result<MergedSchema> {
    let vector_attributes: Vec<AttributeDescriptor> = vector_fields
        .iter()
        .map(|f| {
            AttributeDescriptor::vector(&Field::new(
                f.name(),
                normalize_type(f.data_type()),
                true,
            ))
        })
        .collect();

    let mut vector_names = AttributeNameSet::new();
    for attribute in &vector_attributes {
        if !vector_names.insert(attribute.name()) {
            return Err(DsgError::schema(format!(
                "Vector attribute '{}' is declared twice",
                attribute.name()
            )));
        }
    }

    let dataset = pool.acquire(locator)?;
    let mut variables = dataset.list_scalar_variables()?;
    let time_variable = dataset.time_variable()?;
    dataset.release();

    // Enumeration may hand back a different instance, so match by full name
    variables.retain(|v| v.full_name != time_variable.full_name);

    let time_name = time_variable.short_name().to_string();
    if vector_names.contains(&time_name) {
        return Err(DsgError::schema(format!(
            "Time variable '{time_name}' collides with a vector attribute"
        )));
    }

    let mut external_attributes = Vec::with_capacity(variables.len() + 1);
    let mut external_names = AttributeNameSet::new();
    _ = external_names.insert(&time_name);
    external_attributes.push(AttributeDescriptor::external(time_variable));

    for variable in variables {
        let name = variable.short_name().to_string();
        if vector_names.contains(&name) {
            debug!(
                "Dropping external variable {name}: a vector attribute has the same name",
                name: name
            );
            continue;
        }
        if !external_names.insert(&name) {
            debug!(
                "Dropping external variable {name}: duplicate short name",
                name: name
            );
            continue;
        }
        external_attributes.push(AttributeDescriptor::external(variable));
    }

    let vector_count = vector_attributes.len();
    let external_count = external_attributes.len();
    debug!(
        "Merged schema for {locator}: {vector_count} vector + {external_count} external attributes",
        locator: locator,
        vector_count: vector_count,
        external_count: external_count
    );

    let mut attributes = vector_attributes;
    attributes.extend(external_attributes);

    Ok(MergedSchema {
        attributes,
        vector_count,
        vector_names,
        external_names,
        time_attribute: time_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{HandleCounts, MemoryDataset, MemoryProvider};
    use crate::pool::PoolConfig;
    use crate::store::VariableShape;
    use crate::value::timestamp_type;
    use std::sync::Arc;

    fn vector_fields() -> Vec<Field> {
        vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("name", DataType::Utf8, true),
            Field::new("Depth", DataType::Float32, true),
        ]
    }

    fn dataset() -> MemoryDataset {
        MemoryDataset::new("time")
            .with_variable(VariableDescriptor::new(
                "obs/temperature",
                DataType::Float64,
                VariableShape::Scalar,
            ))
            .with_variable(VariableDescriptor::new(
                "obs/depth",
                DataType::Float64,
                VariableShape::Scalar,
            ))
            .with_variable(VariableDescriptor::new(
                "obs/quality",
                DataType::Int64,
                VariableShape::Categorical,
            ))
    }

    fn pool_with(dataset: MemoryDataset) -> (DatasetPool, HandleCounts) {
        let provider = MemoryProvider::new().with_dataset("obs.nc", dataset);
        let counts = provider.counts();
        (
            DatasetPool::new(Arc::new(provider), PoolConfig::default()),
            counts,
        )
    }

    #[test]
    fn test_build_schema_orders_and_tags() {
        let (pool, _counts) = pool_with(dataset());
        let schema = build_schema(&vector_fields(), &pool, "obs.nc").unwrap();

        let names: Vec<&str> = schema.attributes().iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["id", "name", "Depth", "time", "temperature", "quality"]);

        assert_eq!(schema.vector_attributes().len(), 3);
        assert_eq!(schema.time_attribute(), "time");
        assert_eq!(schema.find("TIME").unwrap().data_type(), &timestamp_type());
        assert_eq!(schema.find("depth").unwrap().origin(), &Origin::Vector);
        assert_eq!(schema.find("Depth").unwrap().data_type(), &DataType::Float64);
        assert_eq!(schema.find("quality").unwrap().data_type(), &DataType::Utf8);
        assert_eq!(
            schema.find("temperature").unwrap().extractor(),
            Some(&Extractor::Scalar {
                variable: "obs/temperature".into()
            })
        );

        assert!(schema.vector_names().contains("NAME"));
        assert!(!schema.vector_names().contains("temperature"));
        assert!(schema.external_names().contains("Temperature"));
        assert!(!schema.external_names().contains("depth"));
    }

    #[test]
    fn test_build_schema_names_unique_ignoring_case() {
        let (pool, _counts) = pool_with(dataset().with_variable(VariableDescriptor::new(
            "other/TEMPERATURE",
            DataType::Float64,
            VariableShape::Scalar,
        )));
        let schema = build_schema(&vector_fields(), &pool, "obs.nc").unwrap();

        let names: AttributeNameSet = schema.attributes().iter().map(|a| a.name()).collect();
        assert_eq!(names.len(), schema.attributes().len());
    }

    #[test]
    fn test_build_schema_releases_handle() {
        let (pool, counts) = pool_with(dataset());
        let _schema = build_schema(&vector_fields(), &pool, "obs.nc").unwrap();
        assert_eq!(counts.opened(), 1);
        pool.clear();
        assert_eq!(counts.closed(), 1);
    }

    #[test]
    fn test_build_schema_missing_time_variable() {
        let (pool, counts) = pool_with(dataset().without_time_variable());
        let err = build_schema(&vector_fields(), &pool, "obs.nc").unwrap_err();
        assert!(matches!(err, DsgError::Schema(_)), "{err}");
        assert_eq!(pool.stats().outstanding, 0);
        pool.clear();
        assert_eq!(counts.opened(), counts.closed());
    }

    #[test]
    fn test_build_schema_enumeration_failure_releases_handle() {
        let (pool, counts) = pool_with(dataset().with_broken_variables());
        let err = build_schema(&vector_fields(), &pool, "obs.nc").unwrap_err();
        assert!(matches!(err, DsgError::ExternalSourceUnavailable { .. }), "{err}");
        assert_eq!(pool.stats().outstanding, 0);
        pool.clear();
        assert_eq!(counts.opened(), counts.closed());
    }

    #[test]
    fn test_build_schema_unavailable() {
        let (pool, _counts) = pool_with(dataset());
        let err = build_schema(&vector_fields(), &pool, "missing.nc").unwrap_err();
        assert!(matches!(err, DsgError::ExternalSourceUnavailable { .. }));
    }

    #[test]
    fn test_time_variable_collision_is_schema_error() {
        let (pool, _counts) = pool_with(dataset());
        let mut fields = vector_fields();
        fields.push(Field::new("Time", DataType::Utf8, true));
        let err = build_schema(&fields, &pool, "obs.nc").unwrap_err();
        assert!(matches!(err, DsgError::Schema(_)));
    }

    #[test]
    fn test_resolve_projection() {
        let (pool, _counts) = pool_with(dataset());
        let schema = build_schema(&vector_fields(), &pool, "obs.nc").unwrap();

        let resolved = schema
            .resolve(&Projection::Names(vec!["TEMPERATURE".into(), "name".into()]))
            .unwrap();
        let names: Vec<&str> = resolved.iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["temperature", "name"]);

        let err = schema
            .resolve(&Projection::Names(vec!["salinity".into()]))
            .unwrap_err();
        assert!(matches!(err, DsgError::UnknownAttribute(name) if name == "salinity"));
    }
}
