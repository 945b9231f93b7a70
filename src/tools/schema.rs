//! Declarative input schemas for tools.
//!
//! An [`InputSchema`] is an ordered set of named parameters, each described
//! by a [`ParamSpec`]: its type, whether it is required, an optional default,
//! and constraints (length, numeric bounds, enumerated values, pattern).
//!
//! The dispatch bridge interprets the schema in [`InputSchema::validate`]:
//!
//! 1. Missing optional fields receive their declared default
//! 2. Present values are coerced to the declared type
//! 3. Required fields must be present
//! 4. Constraints are checked
//!
//! Every violation is collected so that a single validation failure reports
//! all of them. The same schema is rendered as JSON Schema for `tools/list`.

use indexmap::IndexMap;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::error::FieldIssue;

/// JSON Schema dialect advertised in rendered schemas.
const JSON_SCHEMA_DIALECT: &str = "http://json-schema.org/draft-07/schema#";

/// The declared type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    /// UTF-8 text.
    String,
    /// Signed 64-bit integer.
    Integer,
}

impl ParamType {
    /// Returns the JSON Schema type name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
        }
    }
}

/// Description of one named parameter.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    kind: ParamType,
    description: String,
    required: bool,
    default: Option<Value>,
    min_length: Option<usize>,
    minimum: Option<f64>,
    maximum: Option<f64>,
    allowed: Option<Vec<String>>,
    pattern: Option<Regex>,
}

impl ParamSpec {
    fn new(kind: ParamType, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            required: false,
            default: None,
            min_length: None,
            minimum: None,
            maximum: None,
            allowed: None,
            pattern: None,
        }
    }

    /// An optional string parameter.
    #[must_use]
    pub fn string(description: impl Into<String>) -> Self {
        Self::new(ParamType::String, description)
    }

    /// An optional integer parameter.
    #[must_use]
    pub fn integer(description: impl Into<String>) -> Self {
        Self::new(ParamType::Integer, description)
    }

    /// Marks the parameter as required.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Sets the value used when the parameter is absent.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Minimum length in characters (strings only).
    #[must_use]
    pub const fn min_length(mut self, len: usize) -> Self {
        self.min_length = Some(len);
        self
    }

    /// Inclusive lower bound (integers only).
    #[must_use]
    pub const fn minimum(mut self, min: f64) -> Self {
        self.minimum = Some(min);
        self
    }

    /// Inclusive upper bound (integers only).
    #[must_use]
    pub const fn maximum(mut self, max: f64) -> Self {
        self.maximum = Some(max);
        self
    }

    /// Restricts the value to an enumerated set.
    #[must_use]
    pub fn one_of<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Requires string values to match `pattern`.
    #[must_use]
    pub fn pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Coerces `value` to the declared type.
    #[allow(clippy::cast_possible_truncation)] // integral floats are range-checked first
    fn coerce(&self, value: &Value) -> Result<Value, String> {
        let expected = || format!("expected {}", self.kind.as_str());
        match self.kind {
            ParamType::String => match value {
                Value::String(_) => Ok(value.clone()),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                Value::Bool(b) => Ok(Value::String(b.to_string())),
                _ => Err(expected()),
            },
            ParamType::Integer => {
                let parsed = match value {
                    Value::Number(n) => n.as_i64().or_else(|| {
                        n.as_f64()
                            .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
                            .map(|f| f as i64)
                    }),
                    Value::String(s) => s.trim().parse::<i64>().ok(),
                    _ => None,
                };
                parsed.map(Value::from).ok_or_else(expected)
            }
        }
    }

    /// Checks constraints on an already-coerced value.
    fn check(&self, value: &Value) -> Vec<String> {
        let mut problems = Vec::new();

        if let Value::String(s) = value {
            if let Some(min) = self.min_length {
                if s.chars().count() < min {
                    problems.push(format!("must contain at least {min} character(s)"));
                }
            }
            if let Some(ref pattern) = self.pattern {
                if !pattern.is_match(s) {
                    problems.push(format!("must match pattern {}", pattern.as_str()));
                }
            }
            if let Some(ref allowed) = self.allowed {
                if !allowed.iter().any(|a| a == s) {
                    problems.push(format!("must be one of: {}", allowed.join(", ")));
                }
            }
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = self.minimum {
                if n < min {
                    problems.push(format!("must be at least {}", render_bound(min)));
                }
            }
            if let Some(max) = self.maximum {
                if n > max {
                    problems.push(format!("must be at most {}", render_bound(max)));
                }
            }
        }

        problems
    }

    /// Renders this parameter as a JSON Schema property.
    fn to_json_schema(&self) -> Value {
        let mut prop = Map::new();
        prop.insert("type".into(), json!(self.kind.as_str()));
        if let Some(ref allowed) = self.allowed {
            prop.insert("enum".into(), json!(allowed));
        }
        if let Some(min) = self.min_length {
            prop.insert("minLength".into(), json!(min));
        }
        if let Some(min) = self.minimum {
            prop.insert("minimum".into(), render_bound(min));
        }
        if let Some(max) = self.maximum {
            prop.insert("maximum".into(), render_bound(max));
        }
        if let Some(ref pattern) = self.pattern {
            prop.insert("pattern".into(), json!(pattern.as_str()));
        }
        if let Some(ref default) = self.default {
            prop.insert("default".into(), default.clone());
        }
        prop.insert("description".into(), json!(self.description));
        Value::Object(prop)
    }
}

/// Bounds apply to integer parameters only and are declared as whole numbers.
#[allow(clippy::cast_possible_truncation)]
fn render_bound(bound: f64) -> Value {
    Value::from(bound as i64)
}

/// An ordered set of named parameters.
#[derive(Debug, Clone, Default)]
pub struct InputSchema {
    params: IndexMap<String, ParamSpec>,
}

impl InputSchema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter. A later declaration with the same name replaces the
    /// earlier one in place.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, spec: ParamSpec) -> Self {
        self.params.insert(name.into(), spec);
        self
    }

    /// Validates raw call arguments and returns the normalised input.
    ///
    /// `null` and absent arguments are treated alike. Fields not declared in
    /// the schema are dropped.
    ///
    /// # Errors
    ///
    /// Returns every violation found, in declaration order.
    pub fn validate(&self, arguments: &Value) -> Result<Map<String, Value>, Vec<FieldIssue>> {
        let empty = Map::new();
        let raw = match arguments {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => {
                return Err(vec![FieldIssue::new(
                    "arguments",
                    "expected an object of named arguments",
                )])
            }
        };

        let mut normalised = Map::new();
        let mut issues = Vec::new();

        for (name, spec) in &self.params {
            let supplied = raw.get(name).filter(|v| !v.is_null());

            let Some(value) = supplied else {
                if let Some(ref default) = spec.default {
                    normalised.insert(name.clone(), default.clone());
                } else if spec.required {
                    issues.push(FieldIssue::new(name, "is required"));
                }
                continue;
            };

            match spec.coerce(value) {
                Ok(coerced) => {
                    let problems = spec.check(&coerced);
                    if problems.is_empty() {
                        normalised.insert(name.clone(), coerced);
                    } else {
                        issues.extend(problems.into_iter().map(|p| FieldIssue::new(name, p)));
                    }
                }
                Err(problem) => issues.push(FieldIssue::new(name, problem)),
            }
        }

        if issues.is_empty() {
            Ok(normalised)
        } else {
            Err(issues)
        }
    }

    /// Renders the schema as a JSON Schema object for `tools/list`.
    #[must_use]
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|(name, spec)| (name.clone(), spec.to_json_schema()))
            .collect();
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(name, _)| name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
            "$schema": JSON_SCHEMA_DIALECT,
        })
    }
}
