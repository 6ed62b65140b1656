//! Declared input shapes, validated at the dispatch boundary.

use std::fmt;
use std::num::{IntErrorKind, ParseIntError};

use serde_json::{Number, Value};

use crate::params::{parse_bool, Params};

/// Expected JSON kind of a top-level parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    Boolean,
    List,
    Structure,
    /// Accepts any value.
    Any,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::String => "string",
            FieldKind::Integer => "integer",
            FieldKind::Boolean => "boolean",
            FieldKind::List => "list",
            FieldKind::Structure => "structure",
            FieldKind::Any => "any",
        };
        f.write_str(name)
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
}

/// Why a parameter mapping does not satisfy a [`Shape`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShapeViolation {
    #[error("missing required parameter {field}")]
    Missing { field: String },
    #[error("parameter {field}: expected {expected}, found {found}")]
    WrongType {
        field: String,
        expected: FieldKind,
        found: &'static str,
    },
    /// A whole number outside the signed 64-bit range.
    #[error("parameter {field}: integer {value} is out of range")]
    OutOfRange { field: String, value: String },
}

/// The top-level parameters a handler declares.
///
/// Validation coerces stringly-typed form values into the declared kind, so
/// `MinSize=2` from a query request reaches the handler as the number `2`.
/// Parameters the shape does not mention pass through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Shape {
    fields: Vec<FieldSpec>,
}

impl Shape {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn required(mut self, name: &str, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind,
            required: true,
        });
        self
    }

    #[must_use]
    pub fn optional(mut self, name: &str, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind,
            required: false,
        });
        self
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Checks and coerces `params` in place.
    ///
    /// # Errors
    ///
    /// Returns the first violation found, in declaration order.
    pub fn validate(&self, params: &mut Params) -> Result<(), ShapeViolation> {
        for spec in &self.fields {
            match params.get_mut(&spec.name) {
                None | Some(Value::Null) => {
                    if spec.required {
                        return Err(ShapeViolation::Missing {
                            field: spec.name.clone(),
                        });
                    }
                }
                Some(value) => coerce(&spec.name, spec.kind, value)?,
            }
        }
        Ok(())
    }
}

fn coerce(field: &str, kind: FieldKind, value: &mut Value) -> Result<(), ShapeViolation> {
    let wrong = |found: &'static str| ShapeViolation::WrongType {
        field: field.to_string(),
        expected: kind,
        found,
    };
    let out_of_range = |value: String| ShapeViolation::OutOfRange {
        field: field.to_string(),
        value,
    };

    match (kind, &*value) {
        (FieldKind::Any, _)
        | (FieldKind::String, Value::String(_))
        | (FieldKind::Boolean, Value::Bool(_))
        | (FieldKind::List, Value::Array(_))
        | (FieldKind::Structure, Value::Object(_)) => Ok(()),
        (FieldKind::Integer, Value::Number(n)) => {
            if n.is_i64() {
                Ok(())
            } else if n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0) {
                Err(out_of_range(n.to_string()))
            } else {
                Err(wrong("fractional number"))
            }
        }
        (FieldKind::String, Value::Number(n)) => {
            *value = Value::String(n.to_string());
            Ok(())
        }
        (FieldKind::Integer, Value::String(s)) => {
            let text = s.trim();
            let parsed: i64 = text.parse().map_err(|e: ParseIntError| match e.kind() {
                IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => {
                    out_of_range(text.to_string())
                }
                _ => wrong("string"),
            })?;
            *value = Value::Number(Number::from(parsed));
            Ok(())
        }
        (FieldKind::Boolean, Value::String(s)) => {
            let parsed = parse_bool(s).ok_or_else(|| wrong("string"))?;
            *value = Value::Bool(parsed);
            Ok(())
        }
        // `Name=` with no members is how form protocols send an empty list.
        (FieldKind::List, Value::String(s)) if s.is_empty() => {
            *value = Value::Array(Vec::new());
            Ok(())
        }
        (_, other) => Err(wrong(json_kind(other))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "structure",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn params(value: Value) -> Params {
        Params::from_value(value).unwrap()
    }

    fn group_shape() -> Shape {
        Shape::new()
            .required("AutoScalingGroupName", FieldKind::String)
            .required("MinSize", FieldKind::Integer)
            .optional("AvailabilityZones", FieldKind::List)
            .optional("Enabled", FieldKind::Boolean)
    }

    #[test]
    fn coerces_form_strings_to_declared_kinds() {
        let mut p = params(json!({
            "AutoScalingGroupName": "g",
            "MinSize": "2",
            "Enabled": "true",
            "AvailabilityZones": "",
        }));
        group_shape().validate(&mut p).unwrap();
        assert_eq!(p.get("MinSize"), Some(&json!(2)));
        assert_eq!(p.get("Enabled"), Some(&json!(true)));
        assert_eq!(p.get("AvailabilityZones"), Some(&json!([])));
    }

    #[test]
    fn missing_required_field_is_reported() {
        let mut p = params(json!({"MinSize": 1}));
        let err = group_shape().validate(&mut p).unwrap_err();
        assert_eq!(
            err,
            ShapeViolation::Missing {
                field: "AutoScalingGroupName".to_string()
            }
        );
    }

    #[test]
    fn explicit_null_counts_as_missing() {
        let mut p = params(json!({"AutoScalingGroupName": null, "MinSize": 1}));
        assert!(matches!(
            group_shape().validate(&mut p),
            Err(ShapeViolation::Missing { .. })
        ));
    }

    #[test]
    fn non_numeric_integer_is_wrong_type() {
        let mut p = params(json!({"AutoScalingGroupName": "g", "MinSize": "lots"}));
        let err = group_shape().validate(&mut p).unwrap_err();
        assert!(matches!(
            err,
            ShapeViolation::WrongType { expected: FieldKind::Integer, found: "string", .. }
        ));
    }

    #[test]
    fn list_given_as_structure_is_wrong_type() {
        let mut p = params(json!({
            "AutoScalingGroupName": "g",
            "MinSize": 1,
            "AvailabilityZones": {"a": 1},
        }));
        let err = group_shape().validate(&mut p).unwrap_err();
        assert!(matches!(err, ShapeViolation::WrongType { found: "structure", .. }));
    }

    #[test]
    fn undeclared_parameters_pass_through() {
        let mut p = params(json!({"AutoScalingGroupName": "g", "MinSize": 1, "Extra": [1]}));
        group_shape().validate(&mut p).unwrap();
        assert_eq!(p.get("Extra"), Some(&json!([1])));
    }

    #[test]
    fn fractional_integer_is_rejected() {
        let mut p = params(json!({"AutoScalingGroupName": "g", "MinSize": 1.5}));
        assert!(matches!(
            group_shape().validate(&mut p),
            Err(ShapeViolation::WrongType { found: "fractional number", .. })
        ));
    }

    #[test]
    fn integers_beyond_i64_are_out_of_range() {
        let too_big = u64::MAX;
        let mut p = params(json!({"AutoScalingGroupName": "g", "MinSize": too_big}));
        assert_eq!(
            group_shape().validate(&mut p).unwrap_err(),
            ShapeViolation::OutOfRange {
                field: "MinSize".to_string(),
                value: too_big.to_string(),
            }
        );

        let mut p = params(json!({"AutoScalingGroupName": "g", "MinSize": 1e20}));
        assert!(matches!(
            group_shape().validate(&mut p),
            Err(ShapeViolation::OutOfRange { .. })
        ));

        let mut p = params(json!({
            "AutoScalingGroupName": "g",
            "MinSize": "-99999999999999999999",
        }));
        assert_eq!(
            group_shape().validate(&mut p).unwrap_err().to_string(),
            "parameter MinSize: integer -99999999999999999999 is out of range"
        );
    }
}
