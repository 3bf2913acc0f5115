//! Parsing of user supplied accessory configuration.
//!
//! Config values arrive as raw JSON whose shape is up to the user: a URL may be
//! a plain string, an object or a list of either. The parsers here validate
//! those shapes field by field and turn them into immutable descriptors. A
//! descriptor is only ever returned fully built; any validation error aborts
//! the whole entry.

mod formatter;
mod mqtt;
mod url;

pub use formatter::PayloadFormatter;
pub(crate) use formatter::value_to_string;
pub use mqtt::{
    LastWill, MqttBrokerOptions, MqttPublishDescriptor, MqttSubscribeDescriptor, MqttSubscription,
    parse_mqtt_get_topic_property, parse_mqtt_options, parse_mqtt_set_topic_property,
    parse_mqtt_subscriptions, parse_multiple_mqtt_set_topics_property, parse_pattern,
};
pub use url::{Credentials, UrlDescriptor, parse_multiple_url_property, parse_url_property};

use rumqttc::QoS;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("property has an unsupported data type. Expected {0}")]
    UnsupportedType(&'static str),

    #[error("property cannot be an array!")]
    ArrayNotAllowed,

    #[error("array cannot be empty")]
    EmptyArray,

    #[error("Wrong data type. Expected string or object")]
    WrongElementType,

    #[error("undefined 'url' property!")]
    UndefinedUrl,

    #[error("'{0}' is required!")]
    Missing(&'static str),

    #[error("'{field}' must be {expected}!")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("'auth.username' and/or 'auth.password' was not set!")]
    IncompleteAuth,

    #[error("'headers' {0}")]
    InvalidHeaders(&'static str),

    #[error("Unsupported type for pattern")]
    UnsupportedPattern,

    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Invalid payload formatter: {0}")]
    InvalidFormatter(String),

    #[error("error caught on array element at index {index}: {source}")]
    ArrayElement {
        index: usize,
        #[source]
        source: Box<ConfigError>,
    },
}

impl ConfigError {
    fn at_index(index: usize) -> impl FnOnce(ConfigError) -> ConfigError {
        move |source| ConfigError::ArrayElement {
            index,
            source: Box::new(source),
        }
    }
}

/// Field accessors that treat an explicit `null` like an absent field.
fn field<'a>(object: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    object.get(name).filter(|v| !v.is_null())
}

fn optional_str<'a>(
    object: &'a Map<String, Value>,
    name: &str,
    field_name: &'static str,
) -> Result<Option<&'a str>, ConfigError> {
    match field(object, name) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(ConfigError::WrongType {
            field: field_name,
            expected: "a string",
        }),
    }
}

fn optional_number(
    object: &Map<String, Value>,
    name: &str,
    field_name: &'static str,
) -> Result<Option<f64>, ConfigError> {
    match field(object, name) {
        None => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(_) => Err(ConfigError::WrongType {
            field: field_name,
            expected: "a number",
        }),
    }
}

fn optional_bool(
    object: &Map<String, Value>,
    name: &str,
    field_name: &'static str,
) -> Result<Option<bool>, ConfigError> {
    match field(object, name) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(ConfigError::WrongType {
            field: field_name,
            expected: "a boolean",
        }),
    }
}

/// JavaScript-style truthiness, used where a field is only honoured if "set".
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Fold an arbitrary number into the valid QoS range with `abs(value % 3)`.
pub(crate) fn fold_qos(value: f64, field_name: &str) -> QoS {
    let raw = value.trunc() as i64;
    let folded = (raw % 3).abs();
    if folded != raw {
        log::warn!(
            "'{}' value {} is out of range, using QoS {} instead",
            field_name,
            value,
            folded
        );
    }
    match folded {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}
