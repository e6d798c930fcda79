//! Free-form per-session metadata.

use crate::error::Result;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// String-keyed JSON values attached to a session, e.g. a chat nickname.
///
/// Tags belong to the session, not to a connection, so they survive
/// reconnects.
#[derive(Debug, Default)]
pub struct TagBag {
    values: Mutex<HashMap<String, Value>>,
}

impl TagBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }

    /// Read a tag as `T`. `Ok(None)` if it is not set.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Store a tag, returning the previous value.
    pub fn set(&self, key: impl Into<String>, value: impl Serialize) -> Result<Option<Value>> {
        let value = serde_json::to_value(value)?;
        Ok(self.values.lock().insert(key.into(), value))
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.values.lock().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.lock().contains_key(key)
    }

    pub fn clear(&self) {
        self.values.lock().clear();
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.values.lock().clone()
    }
}
