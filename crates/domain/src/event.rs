//! Event: an immutable record of something that happened on the hub.
//!
//! Mirrors the `event` object of the hub's websocket protocol. Only the
//! fields the automation needs are typed; `data` keeps the triggering
//! entity and the old/new states of `state_changed` events.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity_id::EntityId;
use crate::state::{DeviceState, StateContext};
use crate::time::Timestamp;

/// Hub event type, e.g. `state_changed` or `xiaomi_aqara.motion`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(String);

impl EventType {
    /// Generic state change of any entity.
    pub const STATE_CHANGED: &'static str = "state_changed";
    /// Native motion event of Aqara motion sensors.
    pub const XIAOMI_MOTION: &'static str = "xiaomi_aqara.motion";

    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn state_changed() -> Self {
        Self::new(Self::STATE_CHANGED)
    }

    #[must_use]
    pub fn xiaomi_motion() -> Self {
        Self::new(Self::XIAOMI_MOTION)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_state_changed(&self) -> bool {
        self.0 == Self::STATE_CHANGED
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A hub event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    #[serde(default)]
    pub origin: String,
    pub time_fired: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<StateContext>,
    #[serde(default)]
    pub data: EventData,
}

impl Event {
    /// Create an event of the given type about `entity_id`, fired now.
    #[must_use]
    pub fn new(event_type: EventType, entity_id: EntityId) -> Self {
        Self {
            event_type,
            origin: "LOCAL".to_string(),
            time_fired: crate::time::now(),
            context: None,
            data: EventData {
                entity_id: Some(entity_id),
                ..EventData::default()
            },
        }
    }

    /// Attach the new state (for `state_changed` events).
    #[must_use]
    pub fn with_new_state(mut self, state: DeviceState) -> Self {
        self.data.new_state = Some(state);
        self
    }

    /// The entity this event is about, if any.
    #[must_use]
    pub fn entity_id(&self) -> Option<&EntityId> {
        self.data.entity_id.as_ref()
    }

    /// The new state value carried by a `state_changed` event.
    #[must_use]
    pub fn new_state_value(&self) -> Option<&str> {
        self.data.new_state.as_ref().map(|s| s.value.as_str())
    }
}

/// Payload of an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    #[serde(default)]
    pub entity_id: Option<EntityId>,
    #[serde(default)]
    pub new_state: Option<DeviceState>,
    #[serde(default)]
    pub old_state: Option<DeviceState>,
}
