//! In-memory characteristic state.
//!
//! Thread-safe values that can be updated from MQTT messages or pull results
//! and read back by the host. Every update bumps a version counter so readers
//! can detect changes cheaply.

use super::{Characteristic, CharacteristicFormat, Service};
use crate::utils::strip_spaces;
use log::debug;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Callback invoked after a characteristic received a new value.
pub type ChangeListener = Box<dyn Fn(&str, &Value) + Send + Sync>;

pub struct MemoryCharacteristic {
    display_name: String,
    format: CharacteristicFormat,
    value: RwLock<Value>,
    version: AtomicU32,
    listener: RwLock<Option<ChangeListener>>,
}

impl MemoryCharacteristic {
    pub fn new(display_name: impl Into<String>, format: CharacteristicFormat, initial: Value) -> Self {
        Self {
            display_name: display_name.into(),
            format,
            value: RwLock::new(initial),
            version: AtomicU32::new(0),
            listener: RwLock::new(None),
        }
    }

    /// Get the current value.
    pub fn value(&self) -> Value {
        self.value.read().clone()
    }

    /// Number of updates received so far.
    pub fn version(&self) -> u32 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn set_listener(&self, listener: ChangeListener) {
        *self.listener.write() = Some(listener);
    }
}

impl Characteristic for MemoryCharacteristic {
    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn format(&self) -> CharacteristicFormat {
        self.format
    }

    fn update_value(&self, value: Value) {
        debug!("{} <- {}", self.display_name, value);
        *self.value.write() = value.clone();
        self.version.fetch_add(1, Ordering::SeqCst);

        if let Some(listener) = self.listener.read().as_ref() {
            listener(&self.display_name, &value);
        }
    }
}

/// A service holding a fixed set of in-memory characteristics.
#[derive(Default)]
pub struct MemoryService {
    characteristics: Vec<Arc<MemoryCharacteristic>>,
}

impl MemoryService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_characteristic(mut self, characteristic: MemoryCharacteristic) -> Self {
        self.characteristics.push(Arc::new(characteristic));
        self
    }

    /// Typed access for the host side, by space-stripped name.
    pub fn characteristic(&self, name: &str) -> Option<Arc<MemoryCharacteristic>> {
        self.characteristics
            .iter()
            .find(|c| strip_spaces(&c.display_name) == name)
            .cloned()
    }
}

impl Service for MemoryService {
    fn get_characteristic(&self, name: &str) -> Option<Arc<dyn Characteristic>> {
        self.characteristic(name)
            .map(|c| c as Arc<dyn Characteristic>)
    }
}
