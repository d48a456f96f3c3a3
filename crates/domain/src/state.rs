//! Device state: the last known state of a hub entity.

use serde::{Deserialize, Serialize};

use crate::entity_id::EntityId;
use crate::time::Timestamp;

/// State reported by the hub for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub entity_id: EntityId,
    /// The raw state value (`on`, `off`, `21.5`, `unavailable`, …).
    #[serde(rename = "state")]
    pub value: String,
    pub last_changed: Timestamp,
    pub last_updated: Timestamp,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<StateContext>,
}

impl DeviceState {
    /// Whether the entity reports the literal state `on`.
    #[must_use]
    pub fn is_on(&self) -> bool {
        self.value == "on"
    }

    /// Parse the state value as a number (sensor readings).
    #[must_use]
    pub fn numeric_value(&self) -> Option<f64> {
        self.value.trim().parse().ok()
    }
}

/// Well-known attributes plus everything else the hub sends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_features: Option<i64>,
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

/// Hub context attached to states and events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateContext {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}
