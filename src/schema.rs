//! Typed input/output field schemas.
//!
//! A task declares an ordered list of [`FieldSpec`]s for its inputs and
//! optionally for its outputs. Raw payloads are validated against these
//! specs before a task record is ever inserted; outputs are validated
//! when the task body saves them.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    String,
    Number,
    Moment,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "string"),
            FieldType::Number => write!(f, "number"),
            FieldType::Moment => write!(f, "moment"),
        }
    }
}

/// A single typed field in an input or output schema.
///
/// Defaults are stored as raw values and resolved at validation time, so
/// a moment default may be an expression like `(date "1920-5-20")`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    name: String,
    ftype: FieldType,
    default: Option<Value>,
}

pub fn string(name: impl Into<String>) -> FieldSpec {
    FieldSpec::new(name, FieldType::String)
}

pub fn number(name: impl Into<String>) -> FieldSpec {
    FieldSpec::new(name, FieldType::Number)
}

pub fn moment(name: impl Into<String>) -> FieldSpec {
    FieldSpec::new(name, FieldType::Moment)
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, ftype: FieldType) -> Self {
        Self {
            name: name.into(),
            ftype,
            default: None,
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> FieldType {
        self.ftype
    }
}

/// Validate a raw input payload against a declared schema.
///
/// Omitted keys fall back to the field's default (if any); present values
/// are coerced to the declared type. Unknown keys and type mismatches are
/// rejected with an error naming the offending field. Moments normalize
/// to RFC 3339 strings in the validated payload.
pub fn validate_input(fields: &[FieldSpec], raw: &Value) -> Result<Map<String, Value>> {
    let raw_map = match raw {
        Value::Null => Map::new(),
        Value::Object(map) => map.clone(),
        other => {
            return Err(EngineError::InputValidation {
                field: "<payload>".to_string(),
                reason: format!("expected an object, got {}", type_name(other)),
            })
        }
    };

    for key in raw_map.keys() {
        if !fields.iter().any(|f| f.name == *key) {
            return Err(EngineError::InputValidation {
                field: key.clone(),
                reason: "unexpected field".to_string(),
            });
        }
    }

    let mut validated = Map::new();
    for field in fields {
        let value = raw_map
            .get(&field.name)
            .cloned()
            .or_else(|| field.default.clone());
        // A field without a value and without a default is simply omitted.
        if let Some(value) = value {
            validated.insert(field.name.clone(), coerce(field, value)?);
        }
    }
    Ok(validated)
}

/// Validate a task output against its declared schema.
///
/// With a schema, the value must be an object whose keys match the
/// declared fields exactly. Without one, the value is passed through
/// opaquely.
pub fn validate_output(fields: Option<&[FieldSpec]>, value: &Value) -> Result<Value> {
    let fields = match fields {
        Some(fields) => fields,
        None => return Ok(value.clone()),
    };

    let map = match value {
        Value::Object(map) => map,
        other => {
            return Err(EngineError::OutputValidation(format!(
                "expected an object, got {}",
                type_name(other)
            )))
        }
    };

    for key in map.keys() {
        if !fields.iter().any(|f| f.name == *key) {
            return Err(EngineError::OutputValidation(format!(
                "unexpected output field `{key}`"
            )));
        }
    }

    let mut validated = Map::new();
    for field in fields {
        let value = map.get(&field.name).ok_or_else(|| {
            EngineError::OutputValidation(format!("missing output field `{}`", field.name))
        })?;
        let coerced = coerce(field, value.clone()).map_err(|e| match e {
            EngineError::InputValidation { field, reason } => {
                EngineError::OutputValidation(format!("field `{field}`: {reason}"))
            }
            other => other,
        })?;
        validated.insert(field.name.clone(), coerced);
    }
    Ok(Value::Object(validated))
}

fn coerce(field: &FieldSpec, value: Value) -> Result<Value> {
    match field.ftype {
        FieldType::String => match value {
            Value::String(_) => Ok(value),
            other => Err(mismatch(field, &other)),
        },
        FieldType::Number => match value {
            Value::Number(_) => Ok(value),
            other => Err(mismatch(field, &other)),
        },
        FieldType::Moment => match value {
            Value::String(raw) => {
                let parsed =
                    parse_moment(&raw).map_err(|reason| EngineError::InputValidation {
                        field: field.name.clone(),
                        reason,
                    })?;
                Ok(Value::String(parsed.to_rfc3339()))
            }
            other => Err(mismatch(field, &other)),
        },
    }
}

fn mismatch(field: &FieldSpec, value: &Value) -> EngineError {
    EngineError::InputValidation {
        field: field.name.clone(),
        reason: format!("expected {}, got {}", field.ftype, type_name(value)),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Parse a moment from its accepted spellings: RFC 3339, a calendar date
/// or datetime, or the `(date "...")` expression form.
fn parse_moment(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    let raw = raw.trim();

    let inner = if raw.starts_with('(') {
        parse_date_expression(raw)?
    } else {
        raw.to_string()
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(&inner) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(&inner, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(&inner, "%Y-%m-%d") {
        let naive = date.and_hms_opt(0, 0, 0).expect("midnight is always valid");
        return Ok(Utc.from_utc_datetime(&naive));
    }
    Err(format!("`{inner}` is not a recognized moment"))
}

/// Extract the quoted literal from a `(date "...")` expression.
fn parse_date_expression(raw: &str) -> std::result::Result<String, String> {
    let body = raw
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| format!("malformed expression `{raw}`"))?
        .trim();
    let args = body
        .strip_prefix("date")
        .ok_or_else(|| format!("unsupported expression `{raw}`"))?
        .trim();
    let literal = args
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(|| format!("expected a quoted date in `{raw}`"))?;
    Ok(literal.to_string())
}
