//! # automolid: automatic motion lights daemon
//!
//! Composition root that wires the Home Assistant adapter to the automation
//! engine.
//!
//! ## Responsibilities
//! - Parse configuration (config file, env vars)
//! - Validate rooms; an invalid room is skipped, no valid room is fatal
//! - Connect to the hub and fill the state cache
//! - Build the engine, subscribe to every trigger event type and run
//! - Log startup and periodic stats reports
//! - Handle graceful shutdown (SIGINT)
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer; no automation logic belongs here.

mod config;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use automoli_adapter_homeassistant::HomeAssistant;
use automoli_app::daytime_scheduler::local_now;
use automoli_app::engine::Engine;
use automoli_app::ports::report::Report;
use automoli_app::report_bus::{ReportBus, ReportStream};
use automoli_app::state_cache::StateCache;
use automoli_domain::daytime::LightDefaults;
use automoli_domain::entity_id::EntityId;
use automoli_domain::room::RoomSettings;

use crate::config::{Config, ConfigError};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.logging.filter).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Rooms
    let defaults = config.light_defaults()?;
    let rooms = valid_rooms(&config, &defaults)?;
    let disabled_by = config.disabled_by()?;
    if !disabled_by.is_empty() {
        let entities: Vec<_> = disabled_by.entities().map(EntityId::as_str).collect();
        tracing::info!(?entities, "automation can be disabled by");
    }

    // Hub
    let settings = config.homeassistant.settings()?;
    tracing::info!(url = %settings.url, rooms = rooms.len(), "starting automolid");
    let cache = Arc::new(StateCache::new());
    let (hub, events) = HomeAssistant::connect(settings, cache.clone()).await?;

    // Reports
    let bus = Arc::new(ReportBus::new(16));
    let reports = tokio::spawn(log_reports(bus.subscribe()));

    // Engine
    let engine = Engine::new(
        rooms,
        disabled_by,
        cache,
        hub.clone(),
        bus,
        &config.engine_settings(),
        local_now().time(),
    );
    for event_type in engine.trigger_events() {
        if let Err(err) = hub.subscribe(event_type.clone()).await {
            tracing::warn!(%err, %event_type, "subscription failed, retrying after reconnect");
        }
    }

    tokio::select! {
        () = engine.run(events) => tracing::warn!("event stream ended"),
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                tracing::error!(%err, "failed to listen for shutdown signal");
            }
            tracing::info!("shutting down");
        }
    }

    hub.shutdown().await;
    reports.abort();
    Ok(())
}

/// Validate every configured room, skipping the invalid ones.
fn valid_rooms(config: &Config, defaults: &LightDefaults) -> Result<Vec<RoomSettings>, ConfigError> {
    let rooms: Vec<RoomSettings> = config
        .rooms
        .iter()
        .filter_map(|room| match room.to_settings(defaults) {
            Ok(settings) => Some(settings),
            Err(err) => {
                tracing::error!(room = %room.name, %err, "room disabled by invalid configuration");
                None
            }
        })
        .collect();
    if rooms.is_empty() {
        return Err(ConfigError::Validation("no valid room configured".to_string()));
    }
    Ok(rooms)
}

async fn log_reports(mut reports: ReportStream) {
    while let Some(report) = reports.next().await {
        match report {
            Report::Startup(summary) => tracing::info!(
                rooms = summary.rooms,
                lights = summary.lights,
                sensors = summary.sensors,
                fingerprint = %summary.fingerprint,
                "automation started"
            ),
            Report::Stats(stats) => {
                tracing::info!(
                    events = stats.total_events,
                    events_per_minute = stats.events_per_minute,
                    "stats"
                );
                for room in &stats.rooms {
                    tracing::info!(
                        room = %room.name,
                        events = room.events,
                        events_per_minute = room.events_per_minute,
                        lights_on = room.lights_on,
                        "room stats"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_skip_invalid_rooms_when_at_least_one_is_valid() {
        let config: Config = toml::from_str(
            r#"
            [[rooms]]
            name = "broken"
            lights = ["light.broken"]

            [[rooms]]
            name = "hall"
            lights = ["light.hall"]
            motion_sensors = ["binary_sensor.hall"]

            [[rooms.daytimes]]
            name = "day"
            start = "07:00"
            "#,
        )
        .unwrap();

        let rooms = valid_rooms(&config, &LightDefaults::default()).unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].name, "hall");
    }

    #[test]
    fn should_fail_when_no_room_is_valid() {
        let config: Config = toml::from_str(
            r#"
            [[rooms]]
            name = "broken"
            "#,
        )
        .unwrap();

        assert!(matches!(
            valid_rooms(&config, &LightDefaults::default()),
            Err(ConfigError::Validation(_))
        ));
    }
}
