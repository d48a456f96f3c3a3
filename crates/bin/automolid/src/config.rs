//! Configuration loading: TOML file with environment variable overrides.
//!
//! Reads `automoli.toml` from the working directory, or the file named by
//! `AUTOMOLI_CONFIG`. Every section has defaults; only the hub connection and
//! at least one room are required. Environment variables take precedence
//! over file values.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use automoli_adapter_homeassistant::HomeAssistantConfig;
use automoli_app::engine::EngineSettings;
use automoli_domain::daytime::{Daytime, Flash, LightDefaults};
use automoli_domain::disabled_by::DisabledBy;
use automoli_domain::entity_id::EntityId;
use automoli_domain::error::ValidationError;
use automoli_domain::room::RoomSettings;
use automoli_domain::service::ServiceData;
use automoli_domain::time::parse_time_of_day;

const DEFAULT_PATH: &str = "automoli.toml";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Hub connection.
    pub homeassistant: HomeAssistantConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Values rooms and daytimes inherit.
    pub defaults: DefaultsConfig,
    /// Entity → states that pause all automation while the entity is in one.
    pub disabled_by: BTreeMap<String, Vec<String>>,
    /// One entry per room.
    pub rooms: Vec<RoomConfig>,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "automolid=info,automoli=info".to_string(),
        }
    }
}

/// Global defaults.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub delay_secs: u64,
    pub transition_secs: u64,
    /// `""`, `"short"` or `"long"`.
    pub flash: String,
    pub relax_after_turn_on_ms: u64,
    pub stats_interval_secs: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            delay_secs: 337,
            transition_secs: 2,
            flash: String::new(),
            relax_after_turn_on_ms: 1337,
            stats_interval_secs: 817,
        }
    }
}

/// One room as written in the file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    pub name: String,
    pub lights: Vec<String>,
    pub motion_sensors: Vec<String>,
    pub motion_state_on: Option<String>,
    pub motion_state_off: Option<String>,
    pub humidity_sensors: Vec<String>,
    pub humidity_threshold: Option<u8>,
    pub delay_secs: Option<u64>,
    pub daytimes: Vec<DaytimeConfig>,
}

/// One daytime of a room.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DaytimeConfig {
    pub name: String,
    /// `HH:MM` local time.
    pub start: String,
    pub brightness: Option<u32>,
    pub targets: Vec<String>,
    pub delay_secs: Option<u64>,
    pub transition_secs: Option<u64>,
    pub flash: Option<String>,
    pub service_data: ServiceData,
}

impl Config {
    /// Load configuration from `AUTOMOLI_CONFIG` or `automoli.toml` (if
    /// present) then apply environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is malformed, or when no room
    /// is configured.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("AUTOMOLI_CONFIG").unwrap_or_else(|_| DEFAULT_PATH.to_string());
        let mut config = Self::from_file(&path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("AUTOMOLI_HA_URL") {
            self.homeassistant.url = val;
        }
        if let Ok(val) = std::env::var("AUTOMOLI_HA_TOKEN") {
            self.homeassistant.token = val;
        }
        if let Ok(val) = std::env::var("AUTOMOLI_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.rooms.is_empty() {
            return Err(ConfigError::Validation("no rooms configured".to_string()));
        }
        Ok(())
    }

    /// Defaults every daytime inherits.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidFlash`] for an unknown flash mode.
    pub fn light_defaults(&self) -> Result<LightDefaults, ValidationError> {
        Ok(LightDefaults {
            delay: Duration::from_secs(self.defaults.delay_secs),
            transition: Duration::from_secs(self.defaults.transition_secs),
            flash: Flash::parse_optional(&self.defaults.flash)?,
        })
    }

    #[must_use]
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            relax_after_turn_on: Duration::from_millis(self.defaults.relax_after_turn_on_ms),
            stats_interval: Duration::from_secs(self.defaults.stats_interval_secs.max(1)),
        }
    }

    /// The global disabling rules.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for an invalid entity id.
    pub fn disabled_by(&self) -> Result<DisabledBy, ValidationError> {
        let mut rules = DisabledBy::new();
        for (entity, states) in &self.disabled_by {
            rules = rules.with_rule(EntityId::parse(entity.as_str())?, states.iter().cloned());
        }
        Ok(rules)
    }
}

impl RoomConfig {
    /// Validate into [`RoomSettings`], filling daytime defaults.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found in the room or one of its
    /// daytimes.
    pub fn to_settings(&self, defaults: &LightDefaults) -> Result<RoomSettings, ValidationError> {
        let mut builder = RoomSettings::builder(self.name.as_str())
            .lights(parse_ids(&self.lights)?)
            .motion_sensors(parse_ids(&self.motion_sensors)?)
            .humidity_sensors(parse_ids(&self.humidity_sensors)?)
            .defaults(defaults.clone());
        if let Some(state) = &self.motion_state_on {
            builder = builder.motion_state_on(state.as_str());
        }
        if let Some(state) = &self.motion_state_off {
            builder = builder.motion_state_off(state.as_str());
        }
        if let Some(threshold) = self.humidity_threshold {
            builder = builder.humidity_threshold(threshold);
        }
        if let Some(secs) = self.delay_secs {
            builder = builder.delay(Duration::from_secs(secs));
        }
        for daytime in &self.daytimes {
            builder = builder.daytime(daytime.to_builder()?);
        }
        builder.build()
    }
}

impl DaytimeConfig {
    fn to_builder(&self) -> Result<automoli_domain::daytime::DaytimeBuilder, ValidationError> {
        let mut builder = Daytime::builder(self.name.as_str(), parse_time_of_day(&self.start)?)
            .targets(parse_ids(&self.targets)?)
            .service_data(self.service_data.clone());
        if let Some(brightness) = self.brightness {
            builder = builder.brightness(brightness);
        }
        if let Some(secs) = self.delay_secs {
            builder = builder.delay(Duration::from_secs(secs));
        }
        if let Some(secs) = self.transition_secs {
            builder = builder.transition(Duration::from_secs(secs));
        }
        if let Some(flash) = self.flash.as_deref().map(Flash::parse_optional).transpose()?.flatten() {
            builder = builder.flash(flash);
        }
        Ok(builder)
    }
}

fn parse_ids(raw: &[String]) -> Result<Vec<EntityId>, ValidationError> {
    raw.iter().map(|id| EntityId::parse(id.as_str())).collect()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
