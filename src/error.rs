use crate::config_parser::ConfigError;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(
        "'subscriptions.characteristics' specified an illegal characteristic for this service ({0} was specified)!"
    )]
    IllegalCharacteristic(String),

    #[error("Invalid message pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Pattern didn't match (value: '{value}', pattern: '{pattern}')")]
    PatternMismatch { value: String, pattern: String },

    #[error(
        "Couldn't find any group which can be extracted. The specified group {group} was out of bounds"
    )]
    GroupOutOfBounds { group: usize },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Empty urlObject array")]
    EmptyRequestList,

    #[error(transparent)]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("MQTT client is not connected")]
    NotConnected,

    #[error("Empty mqttSetTopic array")]
    EmptyPublishList,

    #[error("Unsupported MQTT protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("Payload formatter failed: {0}")]
    Formatter(String),

    #[error("Pull failed: {0}")]
    Pull(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
