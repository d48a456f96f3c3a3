//! Service: a command the hub exposes for a device domain.
//!
//! Examples: `light.turn_on`, `switch.turn_off`, `scene.turn_on`.
//! Each (service, domain) pair accepts a fixed set of service-data keys;
//! [`filter_service_data`] strips everything else before a call is sent.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity_id::{EntityId, domains};

/// Free-form service data as sent to the hub.
pub type ServiceData = serde_json::Map<String, serde_json::Value>;

/// Switching services the daemon calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    TurnOn,
    TurnOff,
    Toggle,
}

impl Service {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TurnOn => "turn_on",
            Self::TurnOff => "turn_off",
            Self::Toggle => "toggle",
        }
    }

    /// State value a light or switch reports after this service succeeded.
    ///
    /// `Toggle` has no predictable result.
    #[must_use]
    pub fn resulting_state(self) -> Option<&'static str> {
        match self {
            Self::TurnOn => Some("on"),
            Self::TurnOff => Some("off"),
            Self::Toggle => None,
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const LIGHT_TURN_ON_KEYS: &[&str] = &[
    "transition",
    "rgb_color",
    "rgbw_color",
    "rgbww_color",
    "color_name",
    "hs_color",
    "xy_color",
    "color_temp",
    "kelvin",
    "brightness",
    "brightness_pct",
    "brightness_step",
    "brightness_step_pct",
    "white",
    "profile",
    "flash",
    "effect",
];

const LIGHT_TURN_OFF_KEYS: &[&str] = &["transition", "flash"];

const SCENE_TURN_ON_KEYS: &[&str] = &["transition"];

/// Service-data keys the hub accepts for `service` on entities of `domain`.
///
/// Unknown domains accept nothing.
#[must_use]
pub fn allowed_keys(service: Service, domain: &str) -> &'static [&'static str] {
    match (service, domain) {
        (Service::TurnOn | Service::Toggle, domains::LIGHT) => LIGHT_TURN_ON_KEYS,
        (Service::TurnOff, domains::LIGHT) => LIGHT_TURN_OFF_KEYS,
        (Service::TurnOn, domains::SCENE) => SCENE_TURN_ON_KEYS,
        _ => &[],
    }
}

/// Keep only the keys allowed for `service` on `target`.
///
/// Returns the filtered data and the names of the dropped keys.
#[must_use]
pub fn filter_service_data(
    data: &ServiceData,
    service: Service,
    target: &EntityId,
) -> (ServiceData, Vec<String>) {
    let allowed = allowed_keys(service, target.domain());
    let mut kept = ServiceData::new();
    let mut dropped = Vec::new();
    for (key, value) in data {
        if allowed.contains(&key.as_str()) {
            kept.insert(key.clone(), value.clone());
        } else {
            dropped.push(key.clone());
        }
    }
    (kept, dropped)
}

/// A single service invocation against one target entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCall {
    pub domain: String,
    pub service: Service,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub service_data: ServiceData,
    pub target: EntityId,
}

impl ServiceCall {
    /// Build a call on `target`, using the target's domain.
    #[must_use]
    pub fn new(service: Service, target: EntityId, service_data: ServiceData) -> Self {
        Self {
            domain: target.domain().to_string(),
            service,
            service_data,
            target,
        }
    }
}
