//! Daytime: a time-of-day scoped light configuration.
//!
//! Every room owns a [`DaytimeSchedule`]: daytimes sorted by start time,
//! where the active one is the latest that already started today, wrapping
//! around midnight to the last one.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::entity_id::EntityId;
use crate::error::ValidationError;
use crate::service::ServiceData;

/// Light flash mode for turn-on/turn-off calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flash {
    Short,
    Long,
}

impl Flash {
    /// Parse an optional flash setting where the empty string means "none".
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidFlash`] for anything other than
    /// `""`, `short` or `long`.
    pub fn parse_optional(raw: &str) -> Result<Option<Self>, ValidationError> {
        if raw.trim().is_empty() {
            return Ok(None);
        }
        raw.parse().map(Some)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Long => "long",
        }
    }
}

impl FromStr for Flash {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "short" => Ok(Self::Short),
            "long" => Ok(Self::Long),
            _ => Err(ValidationError::InvalidFlash(s.to_string())),
        }
    }
}

impl fmt::Display for Flash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fallback values a daytime inherits when it does not set its own.
#[derive(Debug, Clone, PartialEq)]
pub struct LightDefaults {
    pub delay: Duration,
    pub transition: Duration,
    pub flash: Option<Flash>,
}

impl Default for LightDefaults {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(337),
            transition: Duration::from_secs(2),
            flash: None,
        }
    }
}

/// A named light configuration that becomes active at `start` every day.
#[derive(Debug, Clone, PartialEq)]
pub struct Daytime {
    pub name: String,
    pub start: NaiveTime,
    pub targets: Vec<EntityId>,
    /// No-motion time after which the room's lights are turned off.
    pub delay: Duration,
    pub transition: Duration,
    pub flash: Option<Flash>,
    /// Brightness in percent, `Some(0)` disables turning on.
    pub brightness_pct: Option<u8>,
    /// Service data sent with `turn_on`, including the derived
    /// `transition` and `brightness_pct` keys.
    pub service_data: ServiceData,
}

impl Daytime {
    /// Create a builder for a daytime starting at `start`.
    #[must_use]
    pub fn builder(name: impl Into<String>, start: NaiveTime) -> DaytimeBuilder {
        DaytimeBuilder {
            name: name.into(),
            start,
            targets: Vec::new(),
            delay: None,
            transition: None,
            flash: None,
            brightness: None,
            service_data: ServiceData::new(),
        }
    }

    /// Whether this daytime's configuration means "do not turn on".
    ///
    /// An explicit brightness of 0 disables; otherwise targets, a positive
    /// brightness or custom service data each enable.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        match self.brightness_pct {
            Some(0) => true,
            Some(_) => false,
            None => self.targets.is_empty() && self.service_data.is_empty(),
        }
    }

    /// Service data for `turn_off`: transition seconds plus the flash mode.
    #[must_use]
    pub fn turn_off_service_data(&self) -> ServiceData {
        let mut data = ServiceData::new();
        data.insert(
            "transition".to_string(),
            serde_json::json!(self.transition.as_secs_f64()),
        );
        if let Some(flash) = self.flash {
            data.insert("flash".to_string(), serde_json::json!(flash.as_str()));
        }
        data
    }
}

/// Step-by-step builder for [`Daytime`].
#[derive(Debug)]
pub struct DaytimeBuilder {
    name: String,
    start: NaiveTime,
    targets: Vec<EntityId>,
    delay: Option<Duration>,
    transition: Option<Duration>,
    flash: Option<Flash>,
    brightness: Option<u32>,
    service_data: ServiceData,
}

impl DaytimeBuilder {
    #[must_use]
    pub fn target(mut self, target: EntityId) -> Self {
        self.targets.push(target);
        self
    }

    #[must_use]
    pub fn targets(mut self, targets: impl IntoIterator<Item = EntityId>) -> Self {
        self.targets.extend(targets);
        self
    }

    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    #[must_use]
    pub fn transition(mut self, transition: Duration) -> Self {
        self.transition = Some(transition);
        self
    }

    #[must_use]
    pub fn flash(mut self, flash: Flash) -> Self {
        self.flash = Some(flash);
        self
    }

    /// Brightness percent; values above 100 are clamped.
    #[must_use]
    pub fn brightness(mut self, brightness: u32) -> Self {
        self.brightness = Some(brightness);
        self
    }

    #[must_use]
    pub fn service_data(mut self, data: ServiceData) -> Self {
        self.service_data = data;
        self
    }

    /// Fill derived defaults and return a [`Daytime`].
    ///
    /// Targets fall back to `room_lights`; delay, transition and flash fall
    /// back to `defaults`. `transition` and `brightness_pct` are added to the
    /// service data unless it already carries them.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyName`] when the name is blank.
    pub fn build(
        self,
        room_lights: &[EntityId],
        defaults: &LightDefaults,
    ) -> Result<Daytime, ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }

        let targets = if self.targets.is_empty() {
            room_lights.to_vec()
        } else {
            self.targets
        };
        let transition = self.transition.unwrap_or(defaults.transition);
        let brightness_pct = self
            .brightness
            .map(|b| u8::try_from(b.min(100)).unwrap_or(100));

        let mut service_data = self.service_data;
        service_data
            .entry("transition")
            .or_insert_with(|| serde_json::json!(transition.as_secs_f64()));
        if let Some(pct) = brightness_pct.filter(|pct| *pct > 0) {
            service_data
                .entry("brightness_pct")
                .or_insert_with(|| serde_json::json!(pct));
        }

        Ok(Daytime {
            name: self.name,
            start: self.start,
            targets,
            delay: self.delay.unwrap_or(defaults.delay),
            transition,
            flash: self.flash.or(defaults.flash),
            brightness_pct,
            service_data,
        })
    }
}

/// Daytimes of one room, sorted by start time ascending. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct DaytimeSchedule {
    daytimes: Vec<Daytime>,
}

impl DaytimeSchedule {
    /// Sort `daytimes` by start time.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::NoDaytimes`] when `daytimes` is empty.
    pub fn new(room: &str, mut daytimes: Vec<Daytime>) -> Result<Self, ValidationError> {
        if daytimes.is_empty() {
            return Err(ValidationError::NoDaytimes {
                room: room.to_string(),
            });
        }
        daytimes.sort_by_key(|d| d.start);
        Ok(Self { daytimes })
    }

    /// Index of the daytime active at `now`: the latest one whose start is
    /// `<= now`, or the last one when `now` is before every start.
    #[must_use]
    pub fn active_index(&self, now: NaiveTime) -> usize {
        self.daytimes
            .iter()
            .rposition(|d| d.start <= now)
            .unwrap_or(self.daytimes.len() - 1)
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Daytime> {
        self.daytimes.get(index)
    }

    /// Daytime at `index`, falling back to the first one.
    #[must_use]
    pub fn get_or_first(&self, index: usize) -> &Daytime {
        self.daytimes.get(index).unwrap_or(&self.daytimes[0])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Daytime> {
        self.daytimes.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.daytimes.len()
    }

    /// Always `false`; kept for API symmetry with [`len`](Self::len).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.daytimes.is_empty()
    }
}
