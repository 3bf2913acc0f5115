//! MQTT bridge onto service characteristics.
//!
//! Incoming messages are routed to every characteristic subscribed to their
//! topic. Several characteristics may share a topic; the first one registered
//! decides the QoS used on the wire.

mod bridge;
mod subscription;

pub use bridge::{BridgeEvent, ConnectionState, MqttBridge, OverrideHook, UpdateOverride};
