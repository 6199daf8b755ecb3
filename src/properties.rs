//! Engine-persisted runtime properties for a single resource instance.
//!
//! The orchestration engine owns the storage; this crate reads and writes
//! the bag through [`RuntimeProperties`] and never assumes it starts empty.
//! The bag serialises to a flat JSON object so it survives process restarts.
//!
//! | Key                   | Written by                      |
//! |-----------------------|---------------------------------|
//! | `server_id`           | server create / adopt           |
//! | `networks`, `ip`      | server state observation        |
//! | `external_id`         | floating IP acquire, security group create/adopt |
//! | `ip_address`          | floating IP create (both paths) |
//! | `floating_ip_address` | floating IP create (both paths) |
//! | `enable_deletion`     | floating IP create (both paths) |

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProvisionError;

/// Provider identifier of the server owned by the instance.
pub const SERVER_ID: &str = "server_id";
/// Provider identifier of a floating IP or security group.
pub const EXTERNAL_ID: &str = "external_id";
/// Address recorded for a floating IP, on either entry path.
pub const IP_ADDRESS: &str = "ip_address";
/// Address of the floating IP, read by attach and detach.
pub const FLOATING_IP_ADDRESS: &str = "floating_ip_address";
/// Persisted acquired-by-this-system flag.
pub const ENABLE_DELETION: &str = "enable_deletion";
/// Private and public address lists of an active server.
pub const NETWORKS: &str = "networks";
/// First private address of an active server.
pub const IP: &str = "ip";

/// Mutable key/value bag scoped to one resource instance.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RuntimeProperties {
    values: BTreeMap<String, Value>,
}

impl RuntimeProperties {
    /// Creates an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the raw value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Returns `true` when `key` holds a value.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Returns a non-empty string stored under `key`.
    ///
    /// Null and empty strings read as absent.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Property`] when the stored value is not a
    /// string.
    pub fn get_str(&self, key: &str) -> Result<Option<&str>, ProvisionError> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(text)) if text.is_empty() => Ok(None),
            Some(Value::String(text)) => Ok(Some(text.as_str())),
            Some(other) => Err(Self::type_error(key, "string", other)),
        }
    }

    /// Returns a flag stored under `key`, treating absence as `false`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Property`] when the stored value is not a
    /// boolean.
    pub fn get_flag(&self, key: &str) -> Result<bool, ProvisionError> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(flag)) => Ok(*flag),
            Some(other) => Err(Self::type_error(key, "boolean", other)),
        }
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_owned(), value.into());
    }

    /// Removes `key`, returning its previous value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` when no keys are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn type_error(key: &str, expected: &str, found: &Value) -> ProvisionError {
        ProvisionError::Property {
            key: key.to_owned(),
            message: format!("expected {expected}, found {found}"),
        }
    }
}

impl FromIterator<(String, Value)> for RuntimeProperties {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
