//! MQTT broker options, subscriptions and publish topics.

use super::formatter::PayloadFormatter;
use super::{
    ConfigError, field, fold_qos, optional_bool, optional_number, optional_str,
};
use regex::Regex;
use rumqttc::QoS;
use serde_json::{Map, Value};

const DEFAULT_PORT: u16 = 1883;
const DEFAULT_PROTOCOL: &str = "mqtt";

/// Subscription of a characteristic to a topic, as configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSubscription {
    pub topic: String,
    pub characteristic: String,
    pub qos: QoS,
    /// When absent the whole payload is used as value.
    pub message_pattern: Option<String>,
    pub pattern_group_to_extract: usize,
}

/// Topic to read a single characteristic from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSubscribeDescriptor {
    pub topic: String,
    pub qos: QoS,
    pub message_pattern: Option<String>,
    pub pattern_group_to_extract: usize,
}

impl MqttSubscribeDescriptor {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            qos: QoS::AtMostOnce,
            message_pattern: None,
            pattern_group_to_extract: 1,
        }
    }
}

/// Topic to publish characteristic writes to.
#[derive(Debug, Clone)]
pub struct MqttPublishDescriptor {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub dup: Option<bool>,
    pub payload_formatter: Option<PayloadFormatter>,
}

impl MqttPublishDescriptor {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            qos: QoS::AtMostOnce,
            retain: false,
            dup: None,
            payload_formatter: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}

/// Broker connection options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttBrokerOptions {
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keepalive_secs: Option<u64>,
    pub clean: Option<bool>,
    pub reconnect_period_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub client_id: Option<String>,
    pub reject_unauthorized: Option<bool>,
    pub will: Option<LastWill>,
    pub subscriptions: Vec<MqttSubscription>,
}

impl MqttBrokerOptions {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            protocol: DEFAULT_PROTOCOL.to_string(),
            username: None,
            password: None,
            keepalive_secs: None,
            clean: None,
            reconnect_period_ms: None,
            connect_timeout_ms: None,
            client_id: None,
            reject_unauthorized: None,
            will: None,
            subscriptions: Vec::new(),
        }
    }
}

pub fn parse_pattern(property: &Value) -> Result<Regex, ConfigError> {
    match property {
        Value::String(pattern) => Ok(Regex::new(pattern)?),
        _ => Err(ConfigError::UnsupportedPattern),
    }
}

fn non_negative(value: f64) -> u64 {
    if value > 0.0 { value as u64 } else { 0 }
}

fn port_number(value: f64) -> Result<u16, ConfigError> {
    if value.fract() == 0.0 && value >= 1.0 && value <= f64::from(u16::MAX) {
        Ok(value as u16)
    } else {
        Err(ConfigError::WrongType {
            field: "port",
            expected: "an integer between 1 and 65535",
        })
    }
}

fn pattern_group(value: f64, field_name: &'static str) -> Result<usize, ConfigError> {
    if value.fract() == 0.0 && value >= 0.0 {
        Ok(value as usize)
    } else {
        Err(ConfigError::WrongType {
            field: field_name,
            expected: "a non-negative integer",
        })
    }
}

pub fn parse_mqtt_options(property: &Value) -> Result<MqttBrokerOptions, ConfigError> {
    let Value::Object(object) = property else {
        return Err(ConfigError::UnsupportedType("object"));
    };

    let Some(Value::String(host)) = object.get("host") else {
        return Err(ConfigError::WrongType {
            field: "host",
            expected: "a string",
        });
    };
    let port = optional_number(object, "port", "port")?
        .map(port_number)
        .transpose()?;
    let protocol = optional_str(object, "protocol", "protocol")?;
    let credentials = parse_credentials(object)?;
    let keepalive = optional_number(object, "keepalive", "keepalive")?;
    let clean = optional_bool(object, "clean", "clean")?;
    let reconnect_period = optional_number(object, "reconnectPeriod", "reconnectPeriod")?;
    let connect_timeout = optional_number(object, "connectTimeout", "connectTimeout")?;
    let client_id = optional_str(object, "clientId", "clientId")?;
    let reject_unauthorized = optional_bool(object, "rejectUnauthorized", "rejectUnauthorized")?;
    let will = parse_will(object)?;
    let subscriptions = match field(object, "subscriptions") {
        Some(subscriptions) => parse_mqtt_subscriptions(subscriptions)?,
        None => Vec::new(),
    };

    let mut options = MqttBrokerOptions::new(host.as_str());
    if let Some(port) = port {
        options.port = port;
    }
    if let Some(protocol) = protocol.filter(|p| !p.is_empty()) {
        options.protocol = protocol.to_string();
    }
    if let Some((username, password)) = credentials {
        options.username = Some(username);
        options.password = password;
    }
    options.keepalive_secs = keepalive.map(non_negative);
    options.clean = clean;
    options.reconnect_period_ms = reconnect_period.map(non_negative);
    options.connect_timeout_ms = connect_timeout.map(non_negative);
    options.client_id = client_id.map(str::to_string);
    options.reject_unauthorized = reject_unauthorized;
    options.will = will;
    options.subscriptions = subscriptions;

    Ok(options)
}

fn parse_credentials(
    object: &Map<String, Value>,
) -> Result<Option<(String, Option<String>)>, ConfigError> {
    let Some(credentials) = field(object, "credentials") else {
        return Ok(None);
    };
    let Value::Object(credentials) = credentials else {
        return Err(ConfigError::WrongType {
            field: "credentials",
            expected: "an object",
        });
    };

    let username = match field(credentials, "username") {
        None => return Err(ConfigError::Missing("credentials.username")),
        Some(Value::String(username)) => username.clone(),
        Some(_) => {
            return Err(ConfigError::WrongType {
                field: "credentials.username",
                expected: "a string",
            });
        }
    };
    let password = optional_str(credentials, "password", "credentials.password")?
        .filter(|p| !p.is_empty())
        .map(str::to_string);

    Ok(Some((username, password)))
}

fn parse_will(object: &Map<String, Value>) -> Result<Option<LastWill>, ConfigError> {
    let Some(will) = field(object, "will") else {
        return Ok(None);
    };
    let Value::Object(will) = will else {
        return Err(ConfigError::WrongType {
            field: "will",
            expected: "an object",
        });
    };

    if field(will, "topic").is_none() {
        return Err(ConfigError::Missing("will.topic"));
    }
    if field(will, "payload").is_none() {
        return Err(ConfigError::Missing("will.payload"));
    }
    let topic = optional_str(will, "topic", "will.topic")?.unwrap_or_default();
    let payload = optional_str(will, "payload", "will.payload")?.unwrap_or_default();
    let qos = optional_number(will, "qos", "will.qos")?;
    let retain = optional_bool(will, "retain", "will.retain")?;

    Ok(Some(LastWill {
        topic: topic.to_string(),
        payload: payload.to_string(),
        qos: qos.map_or(QoS::AtMostOnce, |q| fold_qos(q, "will.qos")),
        retain: retain.unwrap_or(false),
    }))
}

/// Parse one subscription object or an array of them.
pub fn parse_mqtt_subscriptions(property: &Value) -> Result<Vec<MqttSubscription>, ConfigError> {
    match property {
        Value::Object(object) => Ok(vec![parse_subscription_object(object)?]),
        Value::Array(elements) => elements
            .iter()
            .enumerate()
            .map(|(index, element)| {
                let subscription = match element {
                    Value::Object(object) => parse_subscription_object(object),
                    _ => Err(ConfigError::WrongType {
                        field: "subscriptions",
                        expected: "an object",
                    }),
                };
                subscription.map_err(ConfigError::at_index(index))
            })
            .collect(),
        _ => Err(ConfigError::UnsupportedType("object or array")),
    }
}

fn parse_subscription_object(object: &Map<String, Value>) -> Result<MqttSubscription, ConfigError> {
    if field(object, "topic").is_none() {
        return Err(ConfigError::Missing("subscriptions.topic"));
    }
    if field(object, "characteristic").is_none() {
        return Err(ConfigError::Missing("subscriptions.characteristic"));
    }

    let topic = optional_str(object, "topic", "subscriptions.topic")?.unwrap_or_default();
    let characteristic =
        optional_str(object, "characteristic", "subscriptions.characteristic")?.unwrap_or_default();
    let qos = optional_number(object, "qos", "subscriptions.qos")?;
    let message_pattern = optional_str(object, "messagePattern", "subscriptions.messagePattern")?;
    let group = optional_number(
        object,
        "patternGroupToExtract",
        "subscriptions.patternGroupToExtract",
    )?
    .map(|g| pattern_group(g, "subscriptions.patternGroupToExtract"))
    .transpose()?;

    if let Some(pattern) = message_pattern {
        Regex::new(pattern)?;
    }

    Ok(MqttSubscription {
        topic: topic.to_string(),
        characteristic: characteristic.to_string(),
        qos: qos.map_or(QoS::AtLeastOnce, |q| fold_qos(q, "subscriptions.qos")),
        message_pattern: message_pattern.map(str::to_string),
        pattern_group_to_extract: group.unwrap_or(1),
    })
}

/// Parse the topic a single characteristic reads from.
pub fn parse_mqtt_get_topic_property(property: &Value) -> Result<MqttSubscribeDescriptor, ConfigError> {
    let object = match property {
        Value::String(topic) => return Ok(MqttSubscribeDescriptor::new(topic.as_str())),
        Value::Array(_) => return Err(ConfigError::ArrayNotAllowed),
        Value::Object(object) => object,
        _ => return Err(ConfigError::UnsupportedType("string or object")),
    };

    if field(object, "topic").is_none() {
        return Err(ConfigError::Missing("topic"));
    }
    let topic = optional_str(object, "topic", "topic")?.unwrap_or_default();
    let qos = optional_number(object, "qos", "qos")?;
    let message_pattern = optional_str(object, "messagePattern", "messagePattern")?;
    let group = optional_number(object, "patternGroupToExtract", "patternGroupToExtract")?
        .map(|g| pattern_group(g, "patternGroupToExtract"))
        .transpose()?;

    if let Some(pattern) = message_pattern {
        Regex::new(pattern)?;
    }

    let mut descriptor = MqttSubscribeDescriptor::new(topic);
    if let Some(qos) = qos {
        descriptor.qos = fold_qos(qos, "qos");
    }
    descriptor.message_pattern = message_pattern.map(str::to_string);
    if let Some(group) = group {
        descriptor.pattern_group_to_extract = group;
    }
    Ok(descriptor)
}

/// Parse a single publish topic from a string or object.
pub fn parse_mqtt_set_topic_property(property: &Value) -> Result<MqttPublishDescriptor, ConfigError> {
    if property.is_array() {
        return Err(ConfigError::ArrayNotAllowed);
    }

    let mut descriptors = parse_multiple_mqtt_set_topics_property(property)?;
    Ok(descriptors.remove(0))
}

/// Parse a string, an object or a non-empty array of publish topics.
pub fn parse_multiple_mqtt_set_topics_property(
    property: &Value,
) -> Result<Vec<MqttPublishDescriptor>, ConfigError> {
    match property {
        Value::String(topic) => Ok(vec![MqttPublishDescriptor::new(topic.as_str())]),
        Value::Object(object) => Ok(vec![parse_publish_object(object)?]),
        Value::Array(elements) => {
            if elements.is_empty() {
                return Err(ConfigError::EmptyArray);
            }

            elements
                .iter()
                .enumerate()
                .map(|(index, element)| {
                    let descriptor = match element {
                        Value::String(topic) => Ok(MqttPublishDescriptor::new(topic.as_str())),
                        Value::Object(object) => parse_publish_object(object),
                        _ => Err(ConfigError::WrongElementType),
                    };
                    descriptor.map_err(ConfigError::at_index(index))
                })
                .collect()
        }
        _ => Err(ConfigError::UnsupportedType("string, object or array")),
    }
}

fn parse_publish_object(object: &Map<String, Value>) -> Result<MqttPublishDescriptor, ConfigError> {
    if field(object, "topic").is_none() {
        return Err(ConfigError::Missing("topic"));
    }
    let topic = optional_str(object, "topic", "topic")?.unwrap_or_default();
    let qos = optional_number(object, "qos", "qos")?;
    let retain = optional_bool(object, "retain", "retain")?;
    let dup = optional_bool(object, "dup", "dup")?;
    let formatter = optional_str(object, "payloadFormatter", "payloadFormatter")?
        .map(PayloadFormatter::template)
        .transpose()?;

    let mut descriptor = MqttPublishDescriptor::new(topic);
    if let Some(qos) = qos {
        descriptor.qos = fold_qos(qos, "qos");
    }
    descriptor.retain = retain.unwrap_or(false);
    descriptor.dup = dup;
    descriptor.payload_formatter = formatter;
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minimal_options() {
        let options = parse_mqtt_options(&json!({"host": "h"})).unwrap();
        assert_eq!(options.host, "h");
        assert_eq!(options.port, 1883);
        assert_eq!(options.protocol, "mqtt");
        assert!(options.username.is_none());
        assert!(options.will.is_none());
        assert!(options.subscriptions.is_empty());
    }

    #[test]
    fn test_host_required() {
        let err = parse_mqtt_options(&json!({"port": 1883})).unwrap_err();
        assert_eq!(err.to_string(), "'host' must be a string!");
        assert!(matches!(
            parse_mqtt_options(&json!("h")),
            Err(ConfigError::UnsupportedType("object"))
        ));
    }

    #[test]
    fn test_will_qos_is_folded() {
        let options = parse_mqtt_options(&json!({
            "host": "h",
            "will": {"topic": "t", "payload": "p", "qos": 5}
        }))
        .unwrap();
        let will = options.will.unwrap();
        assert_eq!(will.topic, "t");
        assert_eq!(will.payload, "p");
        assert_eq!(will.qos, QoS::ExactlyOnce);
        assert!(!will.retain);
    }

    #[test]
    fn test_will_requires_topic_and_payload() {
        let err = parse_mqtt_options(&json!({"host": "h", "will": {"payload": "p"}})).unwrap_err();
        assert_eq!(err.to_string(), "'will.topic' is required!");
        let err = parse_mqtt_options(&json!({"host": "h", "will": {"topic": "t"}})).unwrap_err();
        assert_eq!(err.to_string(), "'will.payload' is required!");
    }

    #[test]
    fn test_credentials() {
        let options = parse_mqtt_options(&json!({
            "host": "h",
            "credentials": {"username": "user", "password": "secret"}
        }))
        .unwrap();
        assert_eq!(options.username.as_deref(), Some("user"));
        assert_eq!(options.password.as_deref(), Some("secret"));

        let err =
            parse_mqtt_options(&json!({"host": "h", "credentials": {"password": "x"}})).unwrap_err();
        assert_eq!(err.to_string(), "'credentials.username' is required!");
    }

    #[test]
    fn test_optional_fields_are_type_checked() {
        let cases = [
            (json!({"host": "h", "port": "1883"}), "'port' must be a number!"),
            (json!({"host": "h", "keepalive": "60"}), "'keepalive' must be a number!"),
            (json!({"host": "h", "clean": 1}), "'clean' must be a boolean!"),
            (json!({"host": "h", "clientId": 7}), "'clientId' must be a string!"),
            (
                json!({"host": "h", "rejectUnauthorized": "no"}),
                "'rejectUnauthorized' must be a boolean!",
            ),
        ];
        for (config, message) in cases {
            assert_eq!(parse_mqtt_options(&config).unwrap_err().to_string(), message);
        }
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        for port in [json!(0), json!(65536), json!(-1), json!(1883.5)] {
            let err = parse_mqtt_options(&json!({"host": "h", "port": port})).unwrap_err();
            assert_eq!(err.to_string(), "'port' must be an integer between 1 and 65535!");
        }
        assert_eq!(
            parse_mqtt_options(&json!({"host": "h", "port": 65535})).unwrap().port,
            65535
        );

        let err = parse_mqtt_subscriptions(
            &json!({"topic": "t", "characteristic": "On", "patternGroupToExtract": -1}),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "'subscriptions.patternGroupToExtract' must be a non-negative integer!"
        );
        let err =
            parse_mqtt_get_topic_property(&json!({"topic": "t", "patternGroupToExtract": -2}))
                .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::WrongType { field: "patternGroupToExtract", .. }
        ));
    }

    #[test]
    fn test_full_options() {
        let options = parse_mqtt_options(&json!({
            "host": "broker.local",
            "port": 8883,
            "protocol": "mqtts",
            "keepalive": 30,
            "clean": false,
            "reconnectPeriod": 2000,
            "connectTimeout": 5000,
            "clientId": "accessory",
            "subscriptions": [
                {"topic": "a", "characteristic": "On"},
                {"topic": "b", "characteristic": "CurrentTemperature", "qos": 2, "messagePattern": "t=(\\d+)", "patternGroupToExtract": 1}
            ]
        }))
        .unwrap();
        assert_eq!(options.port, 8883);
        assert_eq!(options.protocol, "mqtts");
        assert_eq!(options.keepalive_secs, Some(30));
        assert_eq!(options.clean, Some(false));
        assert_eq!(options.reconnect_period_ms, Some(2000));
        assert_eq!(options.connect_timeout_ms, Some(5000));
        assert_eq!(options.client_id.as_deref(), Some("accessory"));
        assert_eq!(options.subscriptions.len(), 2);
        assert_eq!(options.subscriptions[0].qos, QoS::AtLeastOnce);
        assert_eq!(options.subscriptions[0].pattern_group_to_extract, 1);
        assert_eq!(options.subscriptions[1].qos, QoS::ExactlyOnce);
    }

    #[test]
    fn test_subscription_errors() {
        let err = parse_mqtt_subscriptions(&json!([{"characteristic": "On"}])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "error caught on array element at index 0: 'subscriptions.topic' is required!"
        );
        let err = parse_mqtt_subscriptions(&json!({"topic": "t"})).unwrap_err();
        assert_eq!(err.to_string(), "'subscriptions.characteristic' is required!");
        let err = parse_mqtt_subscriptions(&json!([{"topic": "t", "characteristic": "On", "qos": "1"}]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ArrayElement { index: 0, .. }));
        assert!(parse_mqtt_subscriptions(&json!("t")).is_err());
        let err = parse_mqtt_subscriptions(
            &json!({"topic": "t", "characteristic": "On", "messagePattern": "(unclosed"}),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern(_)));
    }

    #[test]
    fn test_subscription_qos_folded() {
        let subscriptions =
            parse_mqtt_subscriptions(&json!({"topic": "t", "characteristic": "On", "qos": -4}))
                .unwrap();
        assert_eq!(subscriptions[0].qos, QoS::AtLeastOnce);
    }

    #[test]
    fn test_get_topic() {
        let descriptor = parse_mqtt_get_topic_property(&json!("home/light")).unwrap();
        assert_eq!(descriptor.topic, "home/light");
        assert_eq!(descriptor.qos, QoS::AtMostOnce);
        assert_eq!(descriptor.pattern_group_to_extract, 1);

        let descriptor = parse_mqtt_get_topic_property(&json!({
            "topic": "home/light",
            "qos": 1,
            "messagePattern": "ON|OFF",
            "patternGroupToExtract": 0
        }))
        .unwrap();
        assert_eq!(descriptor.qos, QoS::AtLeastOnce);
        assert_eq!(descriptor.message_pattern.as_deref(), Some("ON|OFF"));
        assert_eq!(descriptor.pattern_group_to_extract, 0);

        assert!(matches!(
            parse_mqtt_get_topic_property(&json!(["a"])),
            Err(ConfigError::ArrayNotAllowed)
        ));
        assert!(matches!(
            parse_mqtt_get_topic_property(&json!({"qos": 1})),
            Err(ConfigError::Missing("topic"))
        ));
    }

    #[test]
    fn test_set_topics() {
        let descriptor = parse_mqtt_set_topic_property(&json!({
            "topic": "home/light/set",
            "qos": 1,
            "retain": true,
            "dup": false,
            "payloadFormatter": "{value}"
        }))
        .unwrap();
        assert_eq!(descriptor.qos, QoS::AtLeastOnce);
        assert!(descriptor.retain);
        assert_eq!(descriptor.dup, Some(false));
        assert!(descriptor.payload_formatter.is_some());

        let descriptors =
            parse_multiple_mqtt_set_topics_property(&json!(["a", {"topic": "b"}])).unwrap();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[1].topic, "b");
        assert!(!descriptors[1].retain);

        assert!(matches!(
            parse_multiple_mqtt_set_topics_property(&json!([])),
            Err(ConfigError::EmptyArray)
        ));
        assert!(matches!(
            parse_mqtt_set_topic_property(&json!(["a"])),
            Err(ConfigError::ArrayNotAllowed)
        ));
        let err = parse_multiple_mqtt_set_topics_property(&json!(["a", {"topic": "b", "retain": 1}]))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "error caught on array element at index 1: 'retain' must be a boolean!"
        );
    }

    #[test]
    fn test_parse_pattern() {
        assert!(parse_pattern(&json!("^ON$")).unwrap().is_match("ON"));
        assert!(matches!(
            parse_pattern(&json!(5)),
            Err(ConfigError::UnsupportedPattern)
        ));
    }
}
