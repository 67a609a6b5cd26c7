//! Parameter definitions: typed values <-> wire strings.
//!
//! A [`ParameterDefinition`] is resolved once at schema load. Its
//! [`ParameterKind`] drives parsing, formatting, range checks and the
//! regular expression used to find values of that type in replies.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use crate::date_format::DateFormat;
use crate::error::{CommanderError, CommanderResult, ParameterError};
use crate::range::ValueRange;
use crate::schema::ParameterSpec;
use crate::value::{Parameter, ParameterValue};
use crate::wire_format::WireFormat;

/// The closed set of parameter types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterKind {
    Byte,
    Int,
    Long,
    Float,
    Double,
    Boolean,
    Char,
    String,
    /// A single whitespace-free word
    Token,
    Date,
}

impl ParameterKind {
    pub const ALL: [ParameterKind; 10] = [
        Self::Byte,
        Self::Int,
        Self::Long,
        Self::Float,
        Self::Double,
        Self::Boolean,
        Self::Char,
        Self::String,
        Self::Token,
        Self::Date,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Byte => "byte",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::Boolean => "boolean",
            Self::Char => "char",
            Self::String => "string",
            Self::Token => "token",
            Self::Date => "date",
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, Self::Byte | Self::Int | Self::Long)
    }

    pub fn is_floating(self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_floating()
    }

    /// Wire format used when the schema does not give one.
    pub fn default_format(self) -> &'static str {
        match self {
            Self::Byte | Self::Int | Self::Long => "%d",
            Self::Float | Self::Double => "%f",
            Self::Char => "%1s",
            Self::Boolean | Self::String | Self::Token => "%s",
            Self::Date => crate::date_format::DEFAULT_DATE_FORMAT,
        }
    }

    /// Regex fragment (no capturing groups) for values of this type.
    /// Dates depend on their format and are handled by the definition.
    fn match_fragment(self) -> &'static str {
        match self {
            Self::Byte | Self::Int | Self::Long => r"[+\-]?\d+",
            Self::Float | Self::Double => r"[+\-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+\-]?\d+)?",
            Self::Boolean => "(?i:true|false)",
            Self::Char => r"\S",
            Self::Token => r"\S+",
            Self::String | Self::Date => ".+",
        }
    }

    fn accepts(self, value: &ParameterValue) -> bool {
        matches!(
            (self, value),
            (Self::Byte, ParameterValue::Byte(_))
                | (Self::Int, ParameterValue::Int(_))
                | (Self::Long, ParameterValue::Long(_))
                | (Self::Float, ParameterValue::Float(_))
                | (Self::Double, ParameterValue::Double(_))
                | (Self::Boolean, ParameterValue::Boolean(_))
                | (Self::Char, ParameterValue::Char(_))
                | (Self::String, ParameterValue::String(_))
                | (Self::Token, ParameterValue::String(_))
                | (Self::Date, ParameterValue::Date(_))
        )
    }
}

impl FromStr for ParameterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.name() == lower)
            .ok_or_else(|| format!("unknown parameter type \"{}\"", s))
    }
}

impl std::fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How a definition renders values on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
enum WireEncoding {
    Printf(WireFormat),
    Date(DateFormat),
}

/// Immutable description of one named value type.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDefinition {
    name: String,
    kind: ParameterKind,
    range: Option<ValueRange>,
    /// Range as written in the schema
    range_text: Option<String>,
    encoding: WireEncoding,
    /// Explicit wire format, `None` when the type default applies
    format_text: Option<String>,
    description: Option<String>,
}

impl ParameterDefinition {
    /// Definition with the type's default wire format and no range.
    pub fn new(name: impl Into<String>, kind: ParameterKind) -> Self {
        let encoding = match kind {
            ParameterKind::Date => WireEncoding::Date(DateFormat::default()),
            _ => match WireFormat::parse(kind.default_format()) {
                Ok(f) => WireEncoding::Printf(f),
                // default formats are static and always parse
                Err(_) => unreachable!("default wire format for {} is invalid", kind),
            },
        };
        Self {
            name: name.into(),
            kind,
            range: None,
            range_text: None,
            encoding,
            format_text: None,
            description: None,
        }
    }

    /// Build a definition from its schema entry.
    pub fn from_spec(name: &str, spec: &ParameterSpec) -> CommanderResult<Self> {
        if let Some(inner) = spec.name.as_deref() {
            if inner != name {
                return Err(CommanderError::config(format!(
                    "parameter \"{}\" is declared under key \"{}\"",
                    inner, name
                )));
            }
        }
        let kind = ParameterKind::from_str(&spec.kind).map_err(|e| {
            CommanderError::config(format!("Invalid type for parameter {}: {}", name, e))
        })?;

        let mut def = Self::new(name, kind);
        if let Some(range) = spec.range.as_deref().filter(|r| !r.trim().is_empty()) {
            def = def.with_range(range)?;
        }
        if let Some(format) = spec.wire_format.as_deref().filter(|f| !f.is_empty()) {
            def = def.with_wire_format(format)?;
        }
        if let Some(description) = spec.description.as_deref() {
            def = def.with_description(description);
        }
        Ok(def)
    }

    /// Schema entry for this definition.
    pub fn to_spec(&self) -> ParameterSpec {
        ParameterSpec {
            name: Some(self.name.clone()),
            kind: self.kind.name().to_string(),
            range: self.range_text.clone(),
            wire_format: self.format_text.clone(),
            description: self.description.clone(),
        }
    }

    pub fn with_range(mut self, range: &str) -> CommanderResult<Self> {
        let parsed = ValueRange::parse(range).map_err(|e| {
            CommanderError::config(format!("Invalid range for parameter {}: {}", self.name, e))
        })?;
        if parsed.is_interval() && !self.kind.is_numeric() {
            return Err(CommanderError::config(format!(
                "Interval range was found for non-numerical parameter {}",
                self.name
            )));
        }
        self.range = Some(parsed);
        self.range_text = Some(range.to_string());
        Ok(self)
    }

    pub fn with_wire_format(mut self, format: &str) -> CommanderResult<Self> {
        let invalid = |e: String| {
            CommanderError::config(format!(
                "Invalid format for parameter {}: {}",
                self.name, e
            ))
        };
        self.encoding = match self.kind {
            ParameterKind::Date => {
                WireEncoding::Date(DateFormat::parse(format).map_err(|e| invalid(e.to_string()))?)
            }
            kind => {
                let parsed = WireFormat::parse(format).map_err(|e| invalid(e.to_string()))?;
                parsed
                    .check_kind(kind)
                    .map_err(|e| invalid(e.to_string()))?;
                WireEncoding::Printf(parsed)
            }
        };
        self.format_text = Some(format.to_string());
        Ok(self)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ParameterKind {
        self.kind
    }

    pub fn range(&self) -> Option<&ValueRange> {
        self.range.as_ref()
    }

    /// Effective wire format, explicit or default.
    pub fn wire_format(&self) -> &str {
        match &self.encoding {
            WireEncoding::Printf(f) => f.as_str(),
            WireEncoding::Date(f) => f.as_str(),
        }
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Marshal a typed value: type check, range check, then format.
    pub fn marshal(&self, value: &ParameterValue) -> Result<Parameter, ParameterError> {
        if !self.kind.accepts(value) {
            return Err(ParameterError::TypeMismatch {
                parameter: self.name.clone(),
                expected: self.kind,
                actual: value.type_name(),
            });
        }
        if self.kind == ParameterKind::Token {
            if let ParameterValue::String(s) = value {
                if s.is_empty() || s.chars().any(char::is_whitespace) {
                    return Err(self.parse_error(s));
                }
            }
        }
        self.check_range(value)?;
        let wire = self.format(value)?;
        Ok(Parameter::new(value.clone(), wire))
    }

    /// Wire string of a typed value.
    pub fn to_wire_string(&self, value: &ParameterValue) -> Result<String, ParameterError> {
        self.marshal(value).map(|p| p.wire().to_string())
    }

    /// Demarshal a wire string: parse, range check, and re-render.
    pub fn from_wire_string(&self, input: &str) -> Result<Parameter, ParameterError> {
        let value = self.parse_value(input)?;
        self.check_range(&value)?;
        let wire = self.format(&value)?;
        Ok(Parameter::new(value, wire))
    }

    /// Parse a wire string into a typed value without range validation.
    pub fn parse_value(&self, input: &str) -> Result<ParameterValue, ParameterError> {
        if input.is_empty() {
            return Err(self.parse_error(input));
        }
        let trimmed = input.trim();
        let value = match self.kind {
            ParameterKind::Byte => trimmed.parse().map(ParameterValue::Byte).ok(),
            ParameterKind::Int => trimmed.parse().map(ParameterValue::Int).ok(),
            ParameterKind::Long => trimmed.parse().map(ParameterValue::Long).ok(),
            ParameterKind::Float => trimmed.parse().map(ParameterValue::Float).ok(),
            ParameterKind::Double => trimmed.parse().map(ParameterValue::Double).ok(),
            ParameterKind::Boolean => {
                if trimmed.eq_ignore_ascii_case("true") {
                    Some(ParameterValue::Boolean(true))
                } else if trimmed.eq_ignore_ascii_case("false") {
                    Some(ParameterValue::Boolean(false))
                } else {
                    None
                }
            }
            ParameterKind::Char => {
                let mut chars = input.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Some(ParameterValue::Char(c)),
                    _ => None,
                }
            }
            ParameterKind::String => Some(ParameterValue::String(input.to_string())),
            ParameterKind::Token => {
                if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
                    None
                } else {
                    Some(ParameterValue::String(trimmed.to_string()))
                }
            }
            ParameterKind::Date => match &self.encoding {
                WireEncoding::Date(f) => f.parse_value(input).ok().map(ParameterValue::Date),
                WireEncoding::Printf(_) => None,
            },
        };
        value.ok_or_else(|| self.parse_error(input))
    }

    /// Range validation; always passes when no range is declared.
    pub fn check_range(&self, value: &ParameterValue) -> Result<(), ParameterError> {
        let Some(range) = &self.range else {
            return Ok(());
        };
        let within = if range.is_interval() || self.kind.is_numeric() {
            range_number(value)
                .map(|v| range.contains_number(v))
                .unwrap_or(false)
        } else {
            range.contains_text(&value.to_string())
        };
        if within {
            Ok(())
        } else {
            Err(ParameterError::OutOfRange {
                parameter: self.name.clone(),
                value: value.to_string(),
                range: self
                    .range_text
                    .clone()
                    .unwrap_or_else(|| range.to_string()),
            })
        }
    }

    /// Regex fragment (no capturing groups) matching this parameter's
    /// wire representation in a reply.
    pub fn match_pattern(&self) -> String {
        match &self.encoding {
            WireEncoding::Date(f) => f.to_regex(),
            WireEncoding::Printf(_) => format!("(?:{})", self.kind.match_fragment()),
        }
    }

    fn format(&self, value: &ParameterValue) -> Result<String, ParameterError> {
        let mismatch = || ParameterError::TypeMismatch {
            parameter: self.name.clone(),
            expected: self.kind,
            actual: value.type_name(),
        };
        match (&self.encoding, value) {
            (WireEncoding::Date(f), ParameterValue::Date(d)) => f.format(d).map_err(|_| mismatch()),
            (WireEncoding::Printf(f), v) => f.apply(v).map_err(|_| mismatch()),
            _ => Err(mismatch()),
        }
    }

    fn parse_error(&self, input: &str) -> ParameterError {
        ParameterError::Parse {
            parameter: self.name.clone(),
            input: input.to_string(),
            kind: self.kind,
        }
    }
}

/// Numeric view for range checks. A float is widened through its shortest
/// decimal form so that `0.1f32` compares equal to the bound `0.1`.
fn range_number(value: &ParameterValue) -> Option<f64> {
    match value {
        ParameterValue::Float(v) => v.to_string().parse().ok(),
        other => other.as_f64(),
    }
}

impl std::fmt::Display for ParameterDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parameter: {} ({})", self.name, self.kind)?;
        if let Some(description) = &self.description {
            write!(f, "\n{}", description)?;
        }
        if let Some(range) = &self.range_text {
            write!(f, "\nRange : {}", range)?;
        }
        Ok(())
    }
}

/// Immutable set of parameter definitions shared by reference.
///
/// [`ParameterRegistry::builtin`] holds one default definition per type,
/// named after the type, so templates can say `(int)` or `(double)`
/// without declaring a parameter.
#[derive(Debug, Clone, Default)]
pub struct ParameterRegistry {
    definitions: BTreeMap<String, Arc<ParameterDefinition>>,
}

impl ParameterRegistry {
    pub fn builtin() -> Self {
        Self::from_definitions(ParameterKind::ALL.iter().map(|kind| {
            ParameterDefinition::new(kind.name(), *kind)
                .with_description(format!("Default {} parameter", kind))
        }))
    }

    pub fn from_definitions(definitions: impl IntoIterator<Item = ParameterDefinition>) -> Self {
        Self {
            definitions: definitions
                .into_iter()
                .map(|d| (d.name().to_string(), Arc::new(d)))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ParameterDefinition>> {
        self.definitions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<ParameterDefinition>)> {
        self.definitions.iter()
    }
}
