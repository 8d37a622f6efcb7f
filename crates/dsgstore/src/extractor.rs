// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Strategies turning a raw external sample into one attribute value

use crate::store::{Sample, VariableDescriptor, VariableShape};
use crate::value::{Value, timestamp_type};
use arrow_schema::DataType;

#[derive(Debug, Clone, PartialEq)]
pub enum Extractor {
    /// The sample's own instant
    TimeStamp,
    /// A numeric value per timestep; NaN is treated as missing
    Scalar { variable: String },
    /// A label per timestep, always surfaced as a string
    Categorical { variable: String },
}

impl Extractor {
    /// Pick the strategy matching a variable's shape
    #[must_use]
    pub fn for_variable(variable: &VariableDescriptor) -> Self {
        match variable.shape {
            VariableShape::Time => Extractor::TimeStamp,
            VariableShape::Scalar => Extractor::Scalar {
                variable: variable.full_name.clone(),
            },
            VariableShape::Categorical => Extractor::Categorical {
                variable: variable.full_name.clone(),
            },
        }
    }

    /// Type of the values this strategy produces for `variable`
    #[must_use]
    pub fn output_type(&self, variable: &VariableDescriptor) -> DataType {
        match self {
            Extractor::TimeStamp => timestamp_type(),
            Extractor::Scalar { .. } => variable.data_type.clone(),
            Extractor::Categorical { .. } => DataType::Utf8,
        }
    }

    #[must_use]
    pub fn variable(&self) -> Option<&str> {
        match self {
            Extractor::TimeStamp => None,
            Extractor::Scalar { variable } | Extractor::Categorical { variable } => Some(variable),
        }
    }

    #[must_use]
    pub fn extract(&self, sample: &Sample) -> Value {
        match self {
            Extractor::TimeStamp => Value::Timestamp(sample.time),
            Extractor::Scalar { variable } => match sample.value(variable) {
                Some(Value::Float64(x)) if x.is_nan() => Value::Null,
                Some(value) => value.clone(),
                None => Value::Null,
            },
            Extractor::Categorical { variable } => match sample.value(variable) {
                None | Some(Value::Null) => Value::Null,
                Some(Value::Utf8(s)) => Value::Utf8(s.trim_end_matches('\0').to_string()),
                Some(other) => Value::Utf8(other.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    fn sample() -> Sample {
        let mut values = HashMap::new();
        values.insert("obs/temperature".to_string(), Value::Float64(12.5));
        values.insert("obs/missing".to_string(), Value::Float64(f64::NAN));
        values.insert("obs/quality".to_string(), Value::Int64(3));
        values.insert("obs/label".to_string(), Value::from("good\0\0"));
        Sample {
            time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            values,
        }
    }

    #[test]
    fn test_extractor_for_variable_shapes() {
        let time = VariableDescriptor::new("time", timestamp_type(), VariableShape::Time);
        assert_eq!(Extractor::for_variable(&time), Extractor::TimeStamp);

        let temp = VariableDescriptor::new("obs/temperature", DataType::Float64, VariableShape::Scalar);
        let extractor = Extractor::for_variable(&temp);
        assert_eq!(extractor.variable(), Some("obs/temperature"));
        assert_eq!(extractor.output_type(&temp), DataType::Float64);

        let quality = VariableDescriptor::new("obs/quality", DataType::Int64, VariableShape::Categorical);
        assert_eq!(Extractor::for_variable(&quality).output_type(&quality), DataType::Utf8);
    }

    #[test]
    fn test_extract_values() {
        let sample = sample();
        assert_eq!(
            Extractor::TimeStamp.extract(&sample),
            Value::Timestamp(sample.time)
        );
        assert_eq!(
            Extractor::Scalar { variable: "obs/temperature".into() }.extract(&sample),
            Value::Float64(12.5)
        );
        assert_eq!(
            Extractor::Scalar { variable: "obs/missing".into() }.extract(&sample),
            Value::Null
        );
        assert_eq!(
            Extractor::Scalar { variable: "obs/absent".into() }.extract(&sample),
            Value::Null
        );
        assert_eq!(
            Extractor::Categorical { variable: "obs/quality".into() }.extract(&sample),
            Value::from("3")
        );
        assert_eq!(
            Extractor::Categorical { variable: "obs/label".into() }.extract(&sample),
            Value::from("good")
        );
    }
}
