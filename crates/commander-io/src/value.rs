//! Typed parameter values.
//!
//! A [`ParameterValue`] is what callers hand to `submit` and what they get
//! back from a parsed reply. A [`Parameter`] pairs a value with the wire
//! string it was marshalled to; it is built once and never mutated.

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use serde_json::Value;

/// A value of one of the parameter types.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Byte(i8),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Boolean(bool),
    Char(char),
    /// Used for both `string` and `token` parameters
    String(String),
    Date(DateTime<FixedOffset>),
    /// Non-textual reply of an RPC transport, passed through untouched
    Opaque(Value),
}

impl ParameterValue {
    /// Numeric view used by interval range checks.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Byte(v) => Some(f64::from(*v)),
            Self::Int(v) => Some(f64::from(*v)),
            Self::Long(v) => Some(*v as f64),
            Self::Float(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Byte(v) => Some(i64::from(*v)),
            Self::Int(v) => Some(i64::from(*v)),
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_char(&self) -> Option<char> {
        match self {
            Self::Char(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<&DateTime<FixedOffset>> {
        match self {
            Self::Date(v) => Some(v),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Byte(_) => "byte",
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::Boolean(_) => "boolean",
            Self::Char(_) => "char",
            Self::String(_) => "string",
            Self::Date(_) => "date",
            Self::Opaque(_) => "opaque",
        }
    }

    /// JSON form used as a positional RPC call argument.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Byte(v) => Value::from(*v),
            Self::Int(v) => Value::from(*v),
            Self::Long(v) => Value::from(*v),
            Self::Float(v) => Value::from(f64::from(*v)),
            Self::Double(v) => Value::from(*v),
            Self::Boolean(v) => Value::Bool(*v),
            Self::Char(v) => Value::String(v.to_string()),
            Self::String(v) => Value::String(v.clone()),
            Self::Date(v) => Value::String(v.to_rfc3339()),
            Self::Opaque(v) => v.clone(),
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Byte(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Long(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::Boolean(v) => write!(f, "{}", v),
            Self::Char(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{}", v),
            Self::Date(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S %:z")),
            Self::Opaque(v) => write!(f, "{}", v),
        }
    }
}

impl From<i8> for ParameterValue {
    fn from(v: i8) -> Self {
        Self::Byte(v)
    }
}

impl From<i32> for ParameterValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<f32> for ParameterValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<bool> for ParameterValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<char> for ParameterValue {
    fn from(v: char) -> Self {
        Self::Char(v)
    }
}

impl From<String> for ParameterValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<DateTime<FixedOffset>> for ParameterValue {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Self::Date(v)
    }
}

/// A marshalled value: the typed value plus its wire string.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    value: ParameterValue,
    wire: String,
}

impl Parameter {
    pub(crate) fn new(value: ParameterValue, wire: String) -> Self {
        Self { value, wire }
    }

    pub fn value(&self) -> &ParameterValue {
        &self.value
    }

    /// Text sent to or received from the instrument.
    pub fn wire(&self) -> &str {
        &self.wire
    }

    pub fn into_value(self) -> ParameterValue {
        self.value
    }
}

impl std::fmt::Display for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.wire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversions() {
        assert_eq!(ParameterValue::from(42i32).as_f64(), Some(42.0));
        assert_eq!(ParameterValue::from(-3i8).as_i64(), Some(-3));
        assert_eq!(ParameterValue::from("abc").as_str(), Some("abc"));
        assert_eq!(ParameterValue::from(true).as_bool(), Some(true));
        assert_eq!(ParameterValue::from('x').as_char(), Some('x'));
        assert_eq!(ParameterValue::from("abc").as_f64(), None);
    }

    #[test]
    fn test_value_display() {
        assert_eq!(ParameterValue::Double(292.286).to_string(), "292.286");
        assert_eq!(ParameterValue::Boolean(false).to_string(), "false");
        assert_eq!(ParameterValue::Char('A').to_string(), "A");
    }

    #[test]
    fn test_value_to_json() {
        assert_eq!(ParameterValue::Int(7).to_json(), serde_json::json!(7));
        assert_eq!(ParameterValue::Char('q').to_json(), serde_json::json!("q"));
        assert_eq!(
            ParameterValue::Opaque(serde_json::json!({"a": 1})).to_json(),
            serde_json::json!({"a": 1})
        );
    }

    #[test]
    fn test_parameter_displays_wire_string() {
        let p = Parameter::new(ParameterValue::Double(1.5), "1.500000".to_string());
        assert_eq!(p.to_string(), "1.500000");
        assert_eq!(p.value(), &ParameterValue::Double(1.5));
    }
}
