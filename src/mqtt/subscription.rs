//! Topic to subscriber routing table.

use crate::error::Result;
use crate::utils::extract_value_from_pattern;
use regex::Regex;
use rumqttc::QoS;
use serde_json::Value;

/// A characteristic listening on a topic.
#[derive(Debug, Clone)]
pub(crate) struct Subscriber {
    pub characteristic: String,
    pub qos: QoS,
    pub pattern: Option<Regex>,
    pub group: usize,
    pub is_bool: bool,
}

impl Subscriber {
    /// Derive the characteristic value from a raw message.
    ///
    /// Boolean characteristics with a pattern get whether the pattern matched.
    /// Everything else gets the configured capture group, or the whole
    /// message without a pattern.
    pub fn derive_value(&self, message: &str) -> Result<Value> {
        match &self.pattern {
            None => Ok(Value::String(message.to_string())),
            Some(pattern) if self.is_bool => Ok(Value::Bool(pattern.is_match(message))),
            Some(pattern) => extract_value_from_pattern(pattern, message, self.group).map(Value::String),
        }
    }
}

/// Subscribers grouped by topic, both kept in insertion order.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionTable {
    topics: Vec<(String, Vec<Subscriber>)>,
}

impl SubscriptionTable {
    /// Add a subscriber. Returns true if the topic was not known before.
    pub fn insert(&mut self, topic: &str, subscriber: Subscriber) -> bool {
        match self.topics.iter_mut().find(|(t, _)| t == topic) {
            Some((_, subscribers)) => {
                subscribers.push(subscriber);
                false
            }
            None => {
                self.topics.push((topic.to_string(), vec![subscriber]));
                true
            }
        }
    }

    pub fn subscribers(&self, topic: &str) -> Option<&[Subscriber]> {
        self.topics
            .iter()
            .find(|(t, _)| t == topic)
            .map(|(_, subscribers)| subscribers.as_slice())
    }

    /// Every topic with the QoS of its first subscriber.
    pub fn topics(&self) -> Vec<(String, QoS)> {
        self.topics
            .iter()
            .filter_map(|(topic, subscribers)| subscribers.first().map(|s| (topic.clone(), s.qos)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }
}
