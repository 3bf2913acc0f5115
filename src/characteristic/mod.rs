//! Characteristic registry of the hosting accessory.
//!
//! The MQTT bridge and pull timers never own device state. They look up named
//! characteristics on a [`Service`] and push values into them. Hosts implement
//! these traits over their own accessory model; [`MemoryService`] is a simple
//! in-process implementation.

pub mod memory;

pub use memory::{MemoryCharacteristic, MemoryService};

use serde_json::Value;
use std::sync::Arc;

/// Declared value format of a characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum CharacteristicFormat {
    Bool,
    Int,
    Float,
    String,
    Data,
}

/// A single named, typed property of a device service.
pub trait Characteristic: Send + Sync {
    /// Display name as shown to the user (may contain spaces).
    fn display_name(&self) -> &str;

    fn format(&self) -> CharacteristicFormat;

    /// Push a new value reported by the device.
    fn update_value(&self, value: Value);
}

/// Characteristic lookup on a device service.
pub trait Service: Send + Sync {
    /// Return the characteristic whose space-stripped display name equals `name`.
    fn get_characteristic(&self, name: &str) -> Option<Arc<dyn Characteristic>>;

    fn test_characteristic(&self, name: &str) -> bool {
        self.get_characteristic(name).is_some()
    }
}
