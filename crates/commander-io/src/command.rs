//! Command templates.
//!
//! A [`Command`] is compiled once from its schema entry: placeholders are
//! resolved to parameter definitions and the response template is turned
//! into the "happy" regular expression. Nothing is computed lazily and a
//! `Command` is never mutated after construction.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use tracing::trace;

use crate::error::{CommanderError, CommanderResult, ParameterError};
use crate::parameter::ParameterDefinition;
use crate::schema::CommandSpec;
use crate::value::{Parameter, ParameterValue};

/// `(name)`: an opening parenthesis, a non-blank run, a closing parenthesis.
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(([^\s()]+)\)").expect("placeholder pattern is valid"));

/// Placeholder names of `template` in order of appearance.
pub fn extract_placeholders(template: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(template)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Compile a reply pattern with multi-line and dot-matches-newline semantics.
pub(crate) fn compile_pattern(source: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(source)
        .multi_line(true)
        .dot_matches_new_line(true)
        .build()
}

/// A named command template with its compiled reply patterns.
#[derive(Debug, Clone)]
pub struct Command {
    name: String,
    description: Option<String>,
    template: String,
    response_template: Option<String>,
    /// Command-specific failure pattern as written in the schema
    failure_source: Option<String>,
    parameters: Vec<Arc<ParameterDefinition>>,
    responses: Vec<Arc<ParameterDefinition>>,
    happy: Option<Regex>,
    /// Failure pattern in effect: command-specific, else device-wide
    sad: Option<Regex>,
}

impl Command {
    /// Compile a command from its schema entry.
    ///
    /// `lookup` resolves placeholder names; every name of both templates
    /// must resolve. `device_failure` is the instrument-wide failure
    /// pattern inherited when the command declares none.
    pub fn compile<F>(
        name: &str,
        spec: &CommandSpec,
        lookup: F,
        device_failure: Option<&str>,
    ) -> CommanderResult<Self>
    where
        F: Fn(&str) -> Option<Arc<ParameterDefinition>>,
    {
        let resolve = |placeholder: &str, role: &str| {
            lookup(placeholder).ok_or_else(|| {
                CommanderError::config(format!(
                    "unknown parameter \"{}\" {} in command \"{}\"",
                    placeholder, role, name
                ))
            })
        };

        let parameters = extract_placeholders(&spec.command_template)
            .iter()
            .map(|p| resolve(p, "required"))
            .collect::<CommanderResult<Vec<_>>>()?;

        let response_template = spec
            .response_template
            .clone()
            .filter(|t| !t.is_empty());

        let (responses, happy) = match &response_template {
            Some(template) => {
                let responses = extract_placeholders(template)
                    .iter()
                    .map(|p| resolve(p, "expected"))
                    .collect::<CommanderResult<Vec<_>>>()?;
                let source = happy_pattern(template, &responses);
                trace!("Command '{}' happy pattern: {}", name, source);
                let regex = compile_pattern(&source).map_err(|e| {
                    CommanderError::config(format!(
                        "response template of command \"{}\" does not compile: {}",
                        name, e
                    ))
                })?;
                (responses, Some(regex))
            }
            None => (Vec::new(), None),
        };

        let failure_source = spec.failure_pattern.clone().filter(|p| !p.is_empty());
        let sad = match failure_source.as_deref().or(device_failure.filter(|p| !p.is_empty())) {
            Some(source) => Some(compile_pattern(source).map_err(|e| {
                CommanderError::config(format!(
                    "failure pattern of command \"{}\" does not compile: {}",
                    name, e
                ))
            })?),
            None => None,
        };

        Ok(Self {
            name: name.to_string(),
            description: spec.description.clone(),
            template: spec.command_template.clone(),
            response_template,
            failure_source,
            parameters,
            responses,
            happy,
            sad,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn response_template(&self) -> Option<&str> {
        self.response_template.as_deref()
    }

    /// Definitions bound to the command placeholders, in order.
    pub fn parameters(&self) -> &[Arc<ParameterDefinition>] {
        &self.parameters
    }

    /// Definitions bound to the response placeholders, in order.
    pub fn responses(&self) -> &[Arc<ParameterDefinition>] {
        &self.responses
    }

    pub fn parameter_names(&self) -> Vec<&str> {
        self.parameters.iter().map(|p| p.name()).collect()
    }

    pub fn response_names(&self) -> Vec<&str> {
        self.responses.iter().map(|p| p.name()).collect()
    }

    pub fn happy_pattern(&self) -> Option<&Regex> {
        self.happy.as_ref()
    }

    pub fn sad_pattern(&self) -> Option<&Regex> {
        self.sad.as_ref()
    }

    /// A command expects a reply when it has a response template or a
    /// failure pattern is in effect.
    pub fn expects_reply(&self) -> bool {
        self.happy.is_some() || self.sad.is_some()
    }

    fn check_arity(&self, actual: usize) -> Result<(), ParameterError> {
        if actual != self.parameters.len() {
            return Err(ParameterError::ArityMismatch {
                command: self.name.clone(),
                expected: self.parameters.len(),
                actual,
            });
        }
        Ok(())
    }

    /// Marshal typed arguments positionally.
    pub fn marshal(&self, args: &[ParameterValue]) -> Result<Vec<Parameter>, ParameterError> {
        self.check_arity(args.len())?;
        self.parameters
            .iter()
            .zip(args)
            .map(|(def, value)| def.marshal(value))
            .collect()
    }

    /// Demarshal wire-string arguments positionally.
    pub fn demarshal<S: AsRef<str>>(&self, args: &[S]) -> Result<Vec<Parameter>, ParameterError> {
        self.check_arity(args.len())?;
        self.parameters
            .iter()
            .zip(args)
            .map(|(def, s)| def.from_wire_string(s.as_ref()))
            .collect()
    }

    /// Render the command string, substituting each placeholder in order.
    pub fn render(&self, args: &[Parameter]) -> Result<String, ParameterError> {
        self.check_arity(args.len())?;
        let mut out = String::with_capacity(self.template.len());
        let mut last = 0;
        for (m, arg) in PLACEHOLDER.find_iter(&self.template).zip(args) {
            out.push_str(&self.template[last..m.start()]);
            out.push_str(arg.wire());
            last = m.end();
        }
        out.push_str(&self.template[last..]);
        Ok(out)
    }

    /// Rows of typed values for every happy-pattern match in `reply`.
    pub fn match_happy(&self, reply: &str) -> Result<Vec<Vec<ParameterValue>>, ParameterError> {
        let Some(happy) = &self.happy else {
            return Ok(Vec::new());
        };
        let mut rows = Vec::new();
        for caps in happy.captures_iter(reply) {
            let mut row = Vec::with_capacity(self.responses.len());
            for (def, group) in self.responses.iter().zip(caps.iter().skip(1)) {
                let text = group.map(|m| m.as_str()).unwrap_or_default();
                row.push(def.from_wire_string(text)?.into_value());
            }
            rows.push(row);
        }
        Ok(rows)
    }

    /// Rows for every failure-pattern match in `reply`: the marker followed
    /// by the captured groups as raw strings.
    pub fn match_sad(&self, reply: &str, marker: &str) -> Vec<Vec<ParameterValue>> {
        let Some(sad) = &self.sad else {
            return Vec::new();
        };
        sad.captures_iter(reply)
            .map(|caps| {
                std::iter::once(ParameterValue::String(marker.to_string()))
                    .chain(caps.iter().skip(1).map(|g| {
                        ParameterValue::String(g.map(|m| m.as_str()).unwrap_or_default().to_string())
                    }))
                    .collect()
            })
            .collect()
    }

    /// Schema entry for this command; derived state is omitted.
    pub fn to_spec(&self) -> CommandSpec {
        CommandSpec {
            name: Some(self.name.clone()),
            command_template: self.template.clone(),
            response_template: self.response_template.clone(),
            failure_pattern: self.failure_source.clone(),
            description: self.description.clone(),
        }
    }
}

/// Escape literal text and replace each placeholder by a capturing group
/// around its definition's match fragment.
fn happy_pattern(template: &str, responses: &[Arc<ParameterDefinition>]) -> String {
    let mut out = String::new();
    let mut last = 0;
    for (m, def) in PLACEHOLDER.find_iter(template).zip(responses) {
        out.push_str(&regex::escape(&template[last..m.start()]));
        out.push('(');
        out.push_str(&def.match_pattern());
        out.push(')');
        last = m.end();
    }
    out.push_str(&regex::escape(&template[last..]));
    out
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Command: {}", self.name)?;
        if let Some(description) = &self.description {
            write!(f, "\n{}", description)?;
        }
        if !self.parameters.is_empty() {
            write!(f, "\nParameters : [{}]", self.parameter_names().join(", "))?;
        }
        if !self.responses.is_empty() {
            write!(f, "\nResponse : [{}]", self.response_names().join(", "))?;
        }
        Ok(())
    }
}
