//! Payload formatting for outgoing MQTT messages.
//!
//! Configured as a template string. `{value}` is replaced by the value's plain
//! string form, `{value.some.field}` by a field of a JSON value (string values
//! are parsed as JSON first). `{{` and `}}` produce literal braces, so JSON
//! payloads can be written directly:
//!
//! ```text
//! {{"state": "{value}", "brightness": {value.level}}}
//! ```

use super::ConfigError;
use crate::error::Error;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

type FormatFn = dyn Fn(&Value) -> Result<String, String> + Send + Sync;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Value(Vec<String>),
}

#[derive(Clone)]
enum Kind {
    Template(Vec<Segment>),
    Custom(Arc<FormatFn>),
}

/// Single-argument value to payload transform.
#[derive(Clone)]
pub struct PayloadFormatter {
    kind: Kind,
}

impl fmt::Debug for PayloadFormatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Template(segments) => f.debug_tuple("Template").field(segments).finish(),
            Kind::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl PayloadFormatter {
    /// Compile a template string.
    pub fn template(template: &str) -> Result<Self, ConfigError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut placeholder = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => placeholder.push(c),
                            None => {
                                return Err(ConfigError::InvalidFormatter(format!(
                                    "unclosed placeholder in '{}'",
                                    template
                                )));
                            }
                        }
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Value(parse_placeholder(placeholder.trim())?));
                }
                '}' => {
                    return Err(ConfigError::InvalidFormatter(format!(
                        "unmatched '}}' in '{}'",
                        template
                    )));
                }
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            kind: Kind::Template(segments),
        })
    }

    /// Wrap an arbitrary formatting function.
    pub fn from_fn(f: impl Fn(&Value) -> Result<String, String> + Send + Sync + 'static) -> Self {
        Self {
            kind: Kind::Custom(Arc::new(f)),
        }
    }

    pub fn format(&self, value: &Value) -> Result<String, Error> {
        match &self.kind {
            Kind::Custom(f) => f(value).map_err(Error::Formatter),
            Kind::Template(segments) => {
                let mut out = String::new();
                for segment in segments {
                    match segment {
                        Segment::Literal(text) => out.push_str(text),
                        Segment::Value(path) => out.push_str(&lookup(value, path)?),
                    }
                }
                Ok(out)
            }
        }
    }
}

fn parse_placeholder(placeholder: &str) -> Result<Vec<String>, ConfigError> {
    let mut parts = placeholder.split('.');
    if parts.next() != Some("value") {
        return Err(ConfigError::InvalidFormatter(format!(
            "unknown placeholder '{{{}}}'",
            placeholder
        )));
    }

    let path: Vec<String> = parts.map(str::to_string).collect();
    if path.iter().any(String::is_empty) {
        return Err(ConfigError::InvalidFormatter(format!(
            "empty field in placeholder '{{{}}}'",
            placeholder
        )));
    }
    Ok(path)
}

/// Plain string form of a value: strings without quotes, everything else as JSON.
pub(crate) fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn lookup(value: &Value, path: &[String]) -> Result<String, Error> {
    if path.is_empty() {
        return Ok(value_to_string(value));
    }

    let parsed;
    let mut current = match value {
        Value::String(s) => {
            parsed = serde_json::from_str::<Value>(s)
                .map_err(|e| Error::Formatter(format!("value is not JSON: {}", e)))?;
            &parsed
        }
        other => other,
    };

    for key in path {
        let next = match current {
            Value::Object(map) => map.get(key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        current = next.ok_or_else(|| {
            Error::Formatter(format!("field '{}' not found in {}", path.join("."), value))
        })?;
    }

    Ok(value_to_string(current))
}
