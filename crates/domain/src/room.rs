//! Room: a group of lights switched by motion sensors.
//!
//! [`RoomSettings`] is the immutable, validated configuration of a room.
//! Runtime state (active daytime, debounce timer, switch timestamps) lives
//! in the application layer.

use std::time::Duration;

use crate::daytime::{DaytimeBuilder, DaytimeSchedule, LightDefaults};
use crate::entity_id::EntityId;
use crate::error::ValidationError;
use crate::event::{Event, EventType};

/// Validated configuration of one room.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSettings {
    pub name: String,
    pub lights: Vec<EntityId>,
    pub motion_sensors: Vec<EntityId>,
    /// State value of a motion sensor that means "motion detected".
    pub motion_state_on: Option<String>,
    /// State value of a motion sensor that means "motion cleared".
    pub motion_state_off: Option<String>,
    pub humidity_sensors: Vec<EntityId>,
    /// Lights stay on while any humidity sensor reads above this value.
    pub humidity_threshold: Option<u8>,
    pub schedule: DaytimeSchedule,
}

/// The humidity sensor with the highest reading above the threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct HumidityReading {
    pub sensor: EntityId,
    pub value: f64,
}

impl RoomSettings {
    /// Create a builder for constructing [`RoomSettings`].
    #[must_use]
    pub fn builder(name: impl Into<String>) -> RoomSettingsBuilder {
        RoomSettingsBuilder {
            name: name.into(),
            ..RoomSettingsBuilder::default()
        }
    }

    /// Event types that can trigger this room.
    ///
    /// The native motion event always; `state_changed` only when both the
    /// on and off trigger states are configured.
    #[must_use]
    pub fn trigger_events(&self) -> Vec<EventType> {
        let mut events = vec![EventType::xiaomi_motion()];
        if self.motion_state_on.is_some() && self.motion_state_off.is_some() {
            events.push(EventType::state_changed());
        }
        events
    }

    /// Whether `event` signals motion in this room.
    ///
    /// Native motion events always qualify; a `state_changed` event only
    /// when its new value equals the configured "on" state.
    #[must_use]
    pub fn is_motion(&self, event: &Event) -> bool {
        if !event.event_type.is_state_changed() {
            return true;
        }
        match (&self.motion_state_on, event.new_state_value()) {
            (Some(on), Some(value)) => on == value,
            _ => false,
        }
    }

    /// The sensor driving the humidity above the threshold, if any.
    ///
    /// `reading` looks up the current numeric value of a sensor; sensors
    /// without a readable value are ignored.
    pub fn humidity_above_threshold(
        &self,
        reading: impl Fn(&EntityId) -> Option<f64>,
    ) -> Option<HumidityReading> {
        let threshold = f64::from(self.humidity_threshold?);
        self.humidity_sensors
            .iter()
            .filter_map(|sensor| reading(sensor).map(|value| (sensor, value)))
            .filter(|(_, value)| value.is_finite())
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .filter(|(_, value)| *value > threshold)
            .map(|(sensor, value)| HumidityReading {
                sensor: sensor.clone(),
                value,
            })
    }
}

/// Step-by-step builder for [`RoomSettings`].
#[derive(Debug, Default)]
pub struct RoomSettingsBuilder {
    name: String,
    lights: Vec<EntityId>,
    motion_sensors: Vec<EntityId>,
    motion_state_on: Option<String>,
    motion_state_off: Option<String>,
    humidity_sensors: Vec<EntityId>,
    humidity_threshold: Option<u8>,
    delay: Option<Duration>,
    defaults: LightDefaults,
    daytimes: Vec<DaytimeBuilder>,
}

impl RoomSettingsBuilder {
    #[must_use]
    pub fn light(mut self, light: EntityId) -> Self {
        self.lights.push(light);
        self
    }

    #[must_use]
    pub fn lights(mut self, lights: impl IntoIterator<Item = EntityId>) -> Self {
        self.lights.extend(lights);
        self
    }

    #[must_use]
    pub fn motion_sensor(mut self, sensor: EntityId) -> Self {
        self.motion_sensors.push(sensor);
        self
    }

    #[must_use]
    pub fn motion_sensors(mut self, sensors: impl IntoIterator<Item = EntityId>) -> Self {
        self.motion_sensors.extend(sensors);
        self
    }

    #[must_use]
    pub fn motion_state_on(mut self, state: impl Into<String>) -> Self {
        self.motion_state_on = Some(state.into()).filter(|s: &String| !s.is_empty());
        self
    }

    #[must_use]
    pub fn motion_state_off(mut self, state: impl Into<String>) -> Self {
        self.motion_state_off = Some(state.into()).filter(|s: &String| !s.is_empty());
        self
    }

    #[must_use]
    pub fn humidity_sensors(mut self, sensors: impl IntoIterator<Item = EntityId>) -> Self {
        self.humidity_sensors.extend(sensors);
        self
    }

    #[must_use]
    pub fn humidity_threshold(mut self, threshold: u8) -> Self {
        self.humidity_threshold = Some(threshold);
        self
    }

    /// Room-wide delay, overriding the global default.
    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Global defaults the room's daytimes inherit.
    #[must_use]
    pub fn defaults(mut self, defaults: LightDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    #[must_use]
    pub fn daytime(mut self, daytime: DaytimeBuilder) -> Self {
        self.daytimes.push(daytime);
        self
    }

    /// Validate and return [`RoomSettings`].
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] when:
    /// - the name is blank ([`ValidationError::EmptyName`])
    /// - no lights are configured ([`ValidationError::NoLights`])
    /// - no motion sensors are configured ([`ValidationError::NoMotionSensors`])
    /// - no daytimes are configured ([`ValidationError::NoDaytimes`])
    /// - a daytime is invalid
    pub fn build(self) -> Result<RoomSettings, ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if self.lights.is_empty() {
            return Err(ValidationError::NoLights { room: self.name });
        }
        if self.motion_sensors.is_empty() {
            return Err(ValidationError::NoMotionSensors { room: self.name });
        }

        let defaults = LightDefaults {
            delay: self.delay.unwrap_or(self.defaults.delay),
            ..self.defaults
        };
        let daytimes = self
            .daytimes
            .into_iter()
            .map(|d| d.build(&self.lights, &defaults))
            .collect::<Result<Vec<_>, _>>()?;
        let schedule = DaytimeSchedule::new(&self.name, daytimes)?;

        Ok(RoomSettings {
            name: self.name,
            lights: self.lights,
            motion_sensors: self.motion_sensors,
            motion_state_on: self.motion_state_on,
            motion_state_off: self.motion_state_off,
            humidity_sensors: self.humidity_sensors,
            humidity_threshold: self.humidity_threshold,
            schedule,
        })
    }
}
