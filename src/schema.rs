//! Argument schemas and validation.
//!
//! One [`ArgumentSchema`] is the single source of truth for a capability's
//! parameters: it is published in listings (`inputSchema`, prompt
//! `arguments`) and enforced on every invocation.

use std::fmt;
use std::sync::Arc;

use jsonschema::error::ValidationErrorKind;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// A compiled JSON Schema plus the raw document it came from.
#[derive(Clone)]
pub struct ArgumentSchema {
    raw: Value,
    validator: Arc<jsonschema::Validator>,
}

impl ArgumentSchema {
    /// Compile a schema document.
    pub fn new(raw: Value) -> Result<Self> {
        let validator = jsonschema::validator_for(&raw)
            .map_err(|e| Error::composition(format!("invalid argument schema: {}", e)))?;
        Ok(Self {
            raw,
            validator: Arc::new(validator),
        })
    }

    /// Derive the schema of `T` with schemars.
    pub fn for_type<T: JsonSchema>() -> Result<Self> {
        let schema = schemars::schema_for!(T);
        Self::new(serde_json::to_value(schema)?)
    }

    /// Object schema whose properties are all strings, as used by prompt
    /// arguments and URI template variables.
    pub fn string_fields<'a, I>(fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, Option<&'a str>, bool)>,
    {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for (name, description, is_required) in fields {
            let mut property = serde_json::json!({ "type": "string" });
            if let Some(description) = description {
                property["description"] = Value::String(description.to_string());
            }
            properties.insert(name.to_string(), property);
            if is_required {
                required.push(Value::String(name.to_string()));
            }
        }
        Self::new(serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }))
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Every way `args` fails the schema. Empty means valid.
    pub fn issues(&self, args: &Value) -> Vec<ValidationIssue> {
        self.validator
            .iter_errors(args)
            .map(|error| {
                let base = error.instance_path.to_string();
                let path = match &error.kind {
                    ValidationErrorKind::Required { property } => match property.as_str() {
                        Some(name) => format!("{}/{}", base, name),
                        None => base,
                    },
                    _ => base,
                };
                ValidationIssue {
                    path,
                    message: error.to_string(),
                }
            })
            .collect()
    }

    /// Top-level parameters, in the order of the schema's `properties`.
    ///
    /// Descriptions come from each property's `description`; requiredness
    /// from the schema's `required` array.
    pub fn parameters(&self) -> Vec<ParameterInfo> {
        let required: Vec<&str> = self
            .raw
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let Some(properties) = self.raw.get("properties").and_then(Value::as_object) else {
            return Vec::new();
        };

        properties
            .iter()
            .map(|(name, property)| ParameterInfo {
                name: name.clone(),
                description: property
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                required: required.contains(&name.as_str()),
            })
            .collect()
    }
}

impl fmt::Debug for ArgumentSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArgumentSchema")
            .field("raw", &self.raw)
            .finish()
    }
}

/// One top-level parameter as described by a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterInfo {
    pub name: String,
    pub description: Option<String>,
    pub required: bool,
}

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// JSON Pointer to the offending field; empty for the whole object
    pub path: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Validate raw arguments against an optional schema.
///
/// Without a schema the arguments pass through unchanged. With one, a
/// missing (`null`) argument object is treated as `{}` before validation.
pub fn validate(
    schema: Option<&ArgumentSchema>,
    raw: Value,
) -> std::result::Result<Value, Vec<ValidationIssue>> {
    let Some(schema) = schema else {
        return Ok(raw);
    };

    let args = if raw.is_null() {
        Value::Object(Default::default())
    } else {
        raw
    };

    let issues = schema.issues(&args);
    if issues.is_empty() {
        Ok(args)
    } else {
        Err(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct ForecastInput {
        /// City to forecast
        city: String,
        days: Option<u8>,
    }

    #[test]
    fn test_missing_required_field() {
        let schema = ArgumentSchema::for_type::<ForecastInput>().unwrap();
        let issues = validate(Some(&schema), json!({})).unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "/city");
        assert!(issues[0].message.contains("city"));
    }

    #[test]
    fn test_wrong_type_reports_field_path() {
        let schema = ArgumentSchema::for_type::<ForecastInput>().unwrap();
        let issues = validate(Some(&schema), json!({"city": "Oslo", "days": "three"})).unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "/days");
    }

    #[test]
    fn test_valid_args_pass_through() {
        let schema = ArgumentSchema::for_type::<ForecastInput>().unwrap();
        let args = validate(Some(&schema), json!({"city": "Oslo", "days": 3})).unwrap();
        assert_eq!(args, json!({"city": "Oslo", "days": 3}));
    }

    #[test]
    fn test_null_args_become_empty_object() {
        let schema = ArgumentSchema::new(json!({"type": "object"})).unwrap();
        assert_eq!(validate(Some(&schema), Value::Null).unwrap(), json!({}));
    }

    #[test]
    fn test_no_schema_passes_raw() {
        assert_eq!(validate(None, json!([1, 2])).unwrap(), json!([1, 2]));
        assert_eq!(validate(None, Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn test_parameters_follow_schema() {
        let schema = ArgumentSchema::for_type::<ForecastInput>().unwrap();
        let params = schema.parameters();
        let city = params.iter().find(|p| p.name == "city").unwrap();
        assert!(city.required);
        assert_eq!(city.description.as_deref(), Some("City to forecast"));
        let days = params.iter().find(|p| p.name == "days").unwrap();
        assert!(!days.required);
    }

    #[test]
    fn test_string_fields() {
        let schema = ArgumentSchema::string_fields([
            ("topic", Some("What to write about"), true),
            ("tone", None, false),
        ])
        .unwrap();
        assert!(validate(Some(&schema), json!({"topic": "rust"})).is_ok());
        assert!(validate(Some(&schema), json!({"tone": "dry"})).is_err());
        assert!(validate(Some(&schema), json!({"topic": 1})).is_err());
    }

    #[test]
    fn test_invalid_schema_is_composition_error() {
        let err = ArgumentSchema::new(json!({"type": 12})).unwrap_err();
        assert!(matches!(err, Error::Composition(_)));
    }
}
