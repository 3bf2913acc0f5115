//! URL descriptors for HTTP backed characteristics.

use super::{ConfigError, field, is_truthy, optional_bool, optional_number, optional_str};
use serde_json::{Map, Value};

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 20_000;

/// Basic auth credentials for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Send credentials with the first request instead of waiting for a 401 challenge.
    pub send_immediately: bool,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            send_immediately: true,
        }
    }
}

/// A fully validated HTTP request description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlDescriptor {
    pub url: String,
    pub method: String,
    pub body: String,
    /// How often the request is issued in a row, at least 1.
    pub repeat: u32,
    pub delay_before_execution_ms: u64,
    pub auth: Credentials,
    /// Header name/value pairs in configuration order.
    pub headers: Vec<(String, String)>,
    pub strict_ssl: bool,
    pub request_timeout_ms: u64,
}

impl UrlDescriptor {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            body: String::new(),
            repeat: 1,
            delay_before_execution_ms: 0,
            auth: Credentials::default(),
            headers: Vec::new(),
            strict_ssl: false,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

/// Parse a single URL from a string or object.
pub fn parse_url_property(property: &Value) -> Result<UrlDescriptor, ConfigError> {
    if let Value::Array(elements) = property {
        if elements.is_empty() {
            return Err(ConfigError::EmptyArray);
        }
        return Err(ConfigError::ArrayNotAllowed);
    }

    let mut descriptors = parse_multiple_url_property(property)?;
    Ok(descriptors.remove(0))
}

/// Parse a string, an object or a non-empty array of strings and objects.
pub fn parse_multiple_url_property(property: &Value) -> Result<Vec<UrlDescriptor>, ConfigError> {
    match property {
        Value::String(url) => Ok(vec![UrlDescriptor::new(url.as_str())]),
        Value::Object(object) => Ok(vec![parse_url_object(object)?]),
        Value::Array(elements) => {
            if elements.is_empty() {
                return Err(ConfigError::EmptyArray);
            }

            elements
                .iter()
                .enumerate()
                .map(|(index, element)| {
                    let descriptor = match element {
                        Value::String(url) => Ok(UrlDescriptor::new(url.as_str())),
                        Value::Object(object) => parse_url_object(object),
                        _ => Err(ConfigError::WrongElementType),
                    };
                    descriptor.map_err(ConfigError::at_index(index))
                })
                .collect()
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => Err(ConfigError::UnsupportedType(
            "string, object or array",
        )),
    }
}

fn parse_url_object(object: &Map<String, Value>) -> Result<UrlDescriptor, ConfigError> {
    let url = match object.get("url") {
        Some(value) if is_truthy(value) => value,
        _ => return Err(ConfigError::UndefinedUrl),
    };
    let Value::String(url) = url else {
        return Err(ConfigError::WrongType {
            field: "url",
            expected: "a string",
        });
    };

    let method = optional_str(object, "method", "method")?;
    let repeat = optional_number(object, "repeat", "repeat")?;
    let delay = optional_number(object, "delayBeforeExecution", "delayBeforeExecution")?;
    let auth = parse_auth(object)?;
    let headers = parse_headers(object)?;
    let strict_ssl = optional_bool(object, "strictSSL", "strictSSL")?;
    let request_timeout = optional_number(object, "requestTimeout", "requestTimeout")?;
    let body = parse_body(object);

    let mut descriptor = UrlDescriptor::new(url.as_str());

    if let Some(method) = method.filter(|m| !m.is_empty()) {
        descriptor.method = method.to_string();
    }
    descriptor.body = body;
    if let Some(repeat) = repeat.filter(|r| *r != 0.0) {
        descriptor.repeat = repeat.max(1.0) as u32;
    }
    if let Some(delay) = delay.filter(|d| *d > 0.0) {
        descriptor.delay_before_execution_ms = delay as u64;
    }
    if let Some(auth) = auth {
        descriptor.auth = auth;
    }
    if let Some(headers) = headers {
        descriptor.headers = headers;
    }
    descriptor.strict_ssl = strict_ssl.unwrap_or(false);
    if let Some(timeout) = request_timeout.filter(|t| *t > 0.0) {
        descriptor.request_timeout_ms = timeout as u64;
    }

    Ok(descriptor)
}

fn parse_body(object: &Map<String, Value>) -> String {
    match object.get("body") {
        Some(Value::String(body)) => body.clone(),
        Some(body) if is_truthy(body) => body.to_string(),
        _ => String::new(),
    }
}

fn parse_auth(object: &Map<String, Value>) -> Result<Option<Credentials>, ConfigError> {
    let Some(auth) = field(object, "auth") else {
        return Ok(None);
    };

    let credential = |name: &str| {
        auth.get(name)
            .filter(|v| is_truthy(v))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    let (Some(username), Some(password)) = (credential("username"), credential("password")) else {
        return Err(ConfigError::IncompleteAuth);
    };

    let send_immediately = auth
        .get("sendImmediately")
        .and_then(Value::as_bool)
        .unwrap_or(true);

    Ok(Some(Credentials {
        username: Some(username),
        password: Some(password),
        send_immediately,
    }))
}

/// Headers come either as a legacy `{"Name": "value"}` map or as a list of
/// `{"key": "Name", "value": "value"}` pairs.
fn parse_headers(object: &Map<String, Value>) -> Result<Option<Vec<(String, String)>>, ConfigError> {
    let Some(headers) = field(object, "headers") else {
        return Ok(None);
    };

    match headers {
        Value::Object(map) => map
            .iter()
            .map(|(name, value)| match value {
                Value::String(value) => Ok((name.clone(), value.clone())),
                _ => Err(ConfigError::InvalidHeaders(
                    "must only contain key-value pairs of type string!",
                )),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Value::Array(pairs) => pairs
            .iter()
            .map(|pair| {
                let key = pair.get("key").and_then(Value::as_str);
                let value = pair.get("value").and_then(Value::as_str);
                match (key, value) {
                    (Some(key), Some(value)) => Ok((key.to_string(), value.to_string())),
                    _ => Err(ConfigError::InvalidHeaders(
                        "must only contain key-value pairs in proper object format!",
                    )),
                }
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        _ => Err(ConfigError::InvalidHeaders("must be an object")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_simple_string_url() {
        let descriptor = parse_url_property(&json!("http://x")).unwrap();
        assert_eq!(descriptor.url, "http://x");
        assert_eq!(descriptor.method, "GET");
        assert_eq!(descriptor.repeat, 1);
        assert!(!descriptor.strict_ssl);
        assert_eq!(descriptor.body, "");
        assert_eq!(descriptor.request_timeout_ms, 20_000);
        assert!(descriptor.auth.send_immediately);
    }

    #[test]
    fn test_rejects_unsupported_type() {
        let err = parse_url_property(&json!(123)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "property has an unsupported data type. Expected string, object or array"
        );
        assert!(matches!(
            parse_url_property(&Value::Null),
            Err(ConfigError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_single_parser_rejects_arrays() {
        let err = parse_url_property(&json!([])).unwrap_err();
        assert_eq!(err.to_string(), "array cannot be empty");

        let err = parse_url_property(&json!(["https://localhost:8080"])).unwrap_err();
        assert_eq!(err.to_string(), "property cannot be an array!");
    }

    #[test]
    fn test_repeat_is_clamped() {
        let descriptor = parse_url_property(&json!({"url": "http://x", "repeat": -5})).unwrap();
        assert_eq!(descriptor.repeat, 1);

        let descriptor = parse_url_property(&json!({"url": "http://x", "repeat": 0})).unwrap();
        assert_eq!(descriptor.repeat, 1);

        let descriptor = parse_url_property(&json!({"url": "http://x", "repeat": 3})).unwrap();
        assert_eq!(descriptor.repeat, 3);
    }

    #[test]
    fn test_array_of_strings_and_objects() {
        let descriptors = parse_multiple_url_property(&json!([
            "https://localhost:8080",
            {"url": "https://localhost:8081", "method": "POST"}
        ]))
        .unwrap();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].url, "https://localhost:8080");
        assert_eq!(descriptors[1].url, "https://localhost:8081");
        assert_eq!(descriptors[1].method, "POST");
    }

    #[test]
    fn test_array_errors_name_the_index() {
        let err = parse_multiple_url_property(&json!(["https://localhost:8080", 1237123])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "error caught on array element at index 1: Wrong data type. Expected string or object"
        );

        let err = parse_multiple_url_property(&json!([{"url": "a"}, {"method": "GET"}])).unwrap_err();
        assert!(matches!(err, ConfigError::ArrayElement { index: 1, .. }));

        let err = parse_multiple_url_property(&json!([])).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyArray));
    }

    #[test]
    fn test_url_validation() {
        assert!(matches!(
            parse_url_property(&json!({})),
            Err(ConfigError::UndefinedUrl)
        ));
        assert!(matches!(
            parse_url_property(&json!({"url": ""})),
            Err(ConfigError::UndefinedUrl)
        ));
        let err = parse_url_property(&json!({"url": 5})).unwrap_err();
        assert_eq!(err.to_string(), "'url' must be a string!");
        let err = parse_url_property(&json!({"url": "http://x", "method": 1})).unwrap_err();
        assert_eq!(err.to_string(), "'method' must be a string!");
        let err = parse_url_property(&json!({"url": "http://x", "repeat": "2"})).unwrap_err();
        assert_eq!(err.to_string(), "'repeat' must be a number!");
        let err = parse_url_property(&json!({"url": "http://x", "strictSSL": "yes"})).unwrap_err();
        assert_eq!(err.to_string(), "'strictSSL' must be a boolean!");
        let err =
            parse_url_property(&json!({"url": "http://x", "requestTimeout": true})).unwrap_err();
        assert_eq!(err.to_string(), "'requestTimeout' must be a number!");
    }

    #[test]
    fn test_validation_order() {
        // method is checked before auth
        let err = parse_url_property(&json!({
            "url": "http://x",
            "method": 1,
            "auth": {"username": "admin"}
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::WrongType { field: "method", .. }));
    }

    #[test]
    fn test_incomplete_auth() {
        let err = parse_url_property(&json!({"url": "http://x", "auth": {"username": "admin"}}))
            .unwrap_err();
        assert!(matches!(err, ConfigError::IncompleteAuth));
    }

    #[test]
    fn test_maxed_out_object() {
        let descriptor = parse_url_property(&json!({
            "url": "https://localhost:8080",
            "method": "POST",
            "body": "foo",
            "repeat": -1,
            "delayBeforeExecution": 100,
            "auth": {
                "username": "admin",
                "password": "123456",
                "sendImmediately": false
            },
            "headers": {
                "Content-Type": "text/html",
                "Content-Encoding": "gzip"
            },
            "strictSSL": true,
            "requestTimeout": 1234
        }))
        .unwrap();

        assert_eq!(descriptor.method, "POST");
        assert_eq!(descriptor.body, "foo");
        assert_eq!(descriptor.repeat, 1);
        assert_eq!(descriptor.delay_before_execution_ms, 100);
        assert_eq!(descriptor.auth.username.as_deref(), Some("admin"));
        assert_eq!(descriptor.auth.password.as_deref(), Some("123456"));
        assert!(!descriptor.auth.send_immediately);
        assert_eq!(
            descriptor.headers,
            vec![
                ("Content-Type".to_string(), "text/html".to_string()),
                ("Content-Encoding".to_string(), "gzip".to_string()),
            ]
        );
        assert!(descriptor.strict_ssl);
        assert_eq!(descriptor.request_timeout_ms, 1234);
    }

    #[test]
    fn test_object_body_keeps_key_order() {
        let descriptor = parse_url_property(&json!({
            "url": "https://google.com",
            "method": "POST",
            "body": {
                "here": "is a string",
                "and": ["a", {"nested": "object"}]
            }
        }))
        .unwrap();
        assert_eq!(
            descriptor.body,
            r#"{"here":"is a string","and":["a",{"nested":"object"}]}"#
        );
    }

    #[test]
    fn test_header_pairs_normalize_like_legacy_map() {
        let from_pairs = parse_url_property(&json!({
            "url": "https://google.com",
            "headers": [
                {"key": "Content-Type", "value": "text/html"},
                {"key": "Content-Encoding", "value": "gzip"}
            ]
        }))
        .unwrap();
        let from_map = parse_url_property(&json!({
            "url": "https://google.com",
            "headers": {"Content-Type": "text/html", "Content-Encoding": "gzip"}
        }))
        .unwrap();
        assert_eq!(from_pairs.headers, from_map.headers);
    }

    #[test]
    fn test_malformed_headers() {
        let err = parse_url_property(&json!({
            "url": "http://x",
            "headers": {"Content-Type": 5}
        }))
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "'headers' must only contain key-value pairs of type string!"
        );

        let err = parse_url_property(&json!({
            "url": "http://x",
            "headers": [{"key": "Content-Type"}]
        }))
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "'headers' must only contain key-value pairs in proper object format!"
        );

        let err = parse_url_property(&json!({"url": "http://x", "headers": "a: b"})).unwrap_err();
        assert_eq!(err.to_string(), "'headers' must be an object");
    }
}
