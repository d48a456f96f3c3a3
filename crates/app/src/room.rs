//! Room automation: turns a room's lights on for motion and off again once
//! the debounce timer expires without further motion.
//!
//! Every qualifying motion event re-arms the timer first, then the turn-on
//! preconditions are evaluated under the room lock so that near-simultaneous
//! triggers issue at most one `turn_on`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use automoli_domain::daytime::Daytime;
use automoli_domain::disabled_by::DisabledBy;
use automoli_domain::entity_id::EntityId;
use automoli_domain::event::Event;
use automoli_domain::room::RoomSettings;
use automoli_domain::service::Service;
use automoli_domain::summary::{RoomStats, events_per_minute};

use crate::actuator::{Actuator, SwitchReport};
use crate::ports::ServiceCaller;
use crate::state_cache::StateCache;
use crate::timer::DebounceTimer;

/// Why a room did not switch. These are expected outcomes, not failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SkipReason {
    #[error("{event_type} to non-trigger state {state:?}")]
    NotMotion { event_type: String, state: Option<String> },

    #[error("disabled by {entities:?}")]
    Disabled { entities: Vec<EntityId> },

    #[error("disabled by daytime {daytime}")]
    DaytimeDisabled { daytime: String },

    #[error("lights already on: {lights:?}")]
    AlreadyOn { lights: Vec<EntityId> },

    #[error("lights just turned on {since:?} ago")]
    JustTurnedOn { since: Duration },

    #[error("lights already off")]
    AlreadyOff,

    #[error("state of {lights:?} unknown")]
    StateUnknown { lights: Vec<EntityId> },

    #[error("humidity {value}% at {sensor} above threshold")]
    HumidityAboveThreshold { sensor: EntityId, value: f64 },
}

#[derive(Debug, Default)]
struct SwitchTimes {
    last_on: Option<Instant>,
    last_off: Option<Instant>,
}

/// Shared, read-only collaborators of every room.
pub struct RoomContext<C> {
    pub caller: C,
    pub cache: Arc<StateCache>,
    pub disabled_by: Arc<DisabledBy>,
    /// Grace period after a turn-on during which new motion is ignored.
    pub relax_after_turn_on: Duration,
}

/// Runtime state of one room.
pub struct Room<C> {
    settings: RoomSettings,
    active_daytime: AtomicUsize,
    timer: DebounceTimer,
    switched: Mutex<SwitchTimes>,
    events: AtomicU64,
    actuator: Actuator<C>,
    cache: Arc<StateCache>,
    disabled_by: Arc<DisabledBy>,
    relax_after_turn_on: Duration,
}

impl<C: ServiceCaller> Room<C> {
    /// Create a room with its daytime selected for `now`.
    pub fn new(settings: RoomSettings, context: RoomContext<C>, now: chrono::NaiveTime) -> Self {
        let active = settings.schedule.active_index(now);
        Self {
            settings,
            active_daytime: AtomicUsize::new(active),
            timer: DebounceTimer::new(),
            switched: Mutex::new(SwitchTimes::default()),
            events: AtomicU64::new(0),
            actuator: Actuator::new(context.caller, context.cache.clone()),
            cache: context.cache,
            disabled_by: context.disabled_by,
            relax_after_turn_on: context.relax_after_turn_on,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.settings.name
    }

    #[must_use]
    pub fn settings(&self) -> &RoomSettings {
        &self.settings
    }

    #[must_use]
    pub fn timer(&self) -> &DebounceTimer {
        &self.timer
    }

    #[must_use]
    pub fn active_daytime(&self) -> &Daytime {
        self.settings
            .schedule
            .get_or_first(self.active_daytime.load(Ordering::Acquire))
    }

    /// Make the daytime at `index` the active one.
    pub fn switch_daytime(&self, index: usize) {
        let Some(daytime) = self.settings.schedule.get(index) else {
            tracing::warn!(room = %self.name(), index, "unknown daytime index");
            return;
        };
        self.active_daytime.store(index, Ordering::Release);
        tracing::info!(
            room = %self.name(),
            daytime = %daytime.name,
            delay = ?daytime.delay,
            brightness_pct = ?daytime.brightness_pct,
            "daytime switched"
        );
    }

    /// Number of events routed to this room.
    #[must_use]
    pub fn events_received(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }

    /// Lights of this room currently reported as `on`.
    #[must_use]
    pub fn lights_on(&self) -> Vec<EntityId> {
        self.settings
            .lights
            .iter()
            .filter(|light| self.cache.get(light).is_ok_and(|s| s.is_on()))
            .cloned()
            .collect()
    }

    /// Lights of this room with no cached state, e.g. while a reconnect
    /// refills the cache. Unknown is never treated as off.
    #[must_use]
    pub fn lights_unknown(&self) -> Vec<EntityId> {
        self.settings
            .lights
            .iter()
            .filter(|light| self.cache.value(light).is_none())
            .cloned()
            .collect()
    }

    fn disabling_entities(&self) -> Vec<EntityId> {
        self.disabled_by
            .active(|id| self.cache.value(id))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Arm the timer if any light is already on, so it is eventually
    /// turned off even without motion.
    pub fn arm_if_lights_on(&self) -> bool {
        if self.lights_on().is_empty() {
            return false;
        }
        let delay = self.active_daytime().delay;
        self.timer.arm(delay);
        tracing::info!(room = %self.name(), ?delay, "lights on at startup, timer armed");
        true
    }

    /// React to an event routed to this room.
    ///
    /// # Errors
    ///
    /// Returns the [`SkipReason`] when the event does not lead to a turn-on.
    pub async fn handle_event(&self, event: &Event) -> Result<SwitchReport, SkipReason> {
        self.events.fetch_add(1, Ordering::Relaxed);

        if !self.settings.is_motion(event) {
            return Err(SkipReason::NotMotion {
                event_type: event.event_type.to_string(),
                state: event.new_state_value().map(str::to_string),
            });
        }

        let delay = self.active_daytime().delay;
        self.timer.arm(delay);
        tracing::debug!(room = %self.name(), ?delay, "timer armed");

        let mut switched = self.switched.lock().await;
        self.can_turn_on(&switched)?;

        let daytime = self.active_daytime();
        let report = self
            .actuator
            .switch(Service::TurnOn, &daytime.targets, &daytime.service_data)
            .await;
        let off_for = switched.last_off.map(|off| off.elapsed());
        if report.any_succeeded() {
            switched.last_on = Some(Instant::now());
        }

        let latency = (automoli_domain::time::now() - event.time_fired)
            .to_std()
            .unwrap_or_default();
        tracing::info!(
            room = %self.name(),
            daytime = %daytime.name,
            trigger = %event.event_type,
            entity_id = ?event.entity_id().map(EntityId::as_str),
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            ?latency,
            ?off_for,
            "turned on"
        );
        Ok(report)
    }

    fn can_turn_on(&self, switched: &SwitchTimes) -> Result<(), SkipReason> {
        let entities = self.disabling_entities();
        if !entities.is_empty() {
            return Err(SkipReason::Disabled { entities });
        }

        let daytime = self.active_daytime();
        if daytime.is_disabled() {
            return Err(SkipReason::DaytimeDisabled {
                daytime: daytime.name.clone(),
            });
        }

        let lights = self.lights_on();
        if !lights.is_empty() {
            return Err(SkipReason::AlreadyOn { lights });
        }

        let lights = self.lights_unknown();
        if !lights.is_empty() {
            return Err(SkipReason::StateUnknown { lights });
        }

        if let Some(last_on) = switched.last_on {
            let since = last_on.elapsed();
            if since < self.relax_after_turn_on {
                return Err(SkipReason::JustTurnedOn { since });
            }
        }

        Ok(())
    }

    /// Re-validate and turn all lights off after the timer expired.
    ///
    /// The timer is not re-armed on a skip; the next motion does that.
    /// Only when no light is known to be on but some have no cached state
    /// is the timer re-armed, so the check repeats once the cache is filled.
    ///
    /// # Errors
    ///
    /// Returns the [`SkipReason`] when the lights stay as they are.
    pub async fn on_timer_expired(&self) -> Result<SwitchReport, SkipReason> {
        let mut switched = self.switched.lock().await;

        if self.lights_on().is_empty() {
            let lights = self.lights_unknown();
            if lights.is_empty() {
                return Err(SkipReason::AlreadyOff);
            }
            self.timer.arm(self.active_daytime().delay);
            return Err(SkipReason::StateUnknown { lights });
        }

        let entities = self.disabling_entities();
        if !entities.is_empty() {
            return Err(SkipReason::Disabled { entities });
        }

        if let Some(reading) = self.humidity_above_threshold() {
            return Err(SkipReason::HumidityAboveThreshold {
                sensor: reading.sensor,
                value: reading.value,
            });
        }

        let daytime = self.active_daytime();
        let report = self
            .actuator
            .switch(
                Service::TurnOff,
                &self.settings.lights,
                &daytime.turn_off_service_data(),
            )
            .await;
        let now = Instant::now();
        let on_for = switched.last_on.map(|on| now.duration_since(on));
        switched.last_off = Some(now);

        tracing::info!(
            room = %self.name(),
            delay = ?daytime.delay,
            ?on_for,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "no motion, turned off"
        );
        Ok(report)
    }

    /// The humidity sensor keeping the lights on, if any.
    #[must_use]
    pub fn humidity_above_threshold(&self) -> Option<automoli_domain::room::HumidityReading> {
        self.settings.humidity_above_threshold(|sensor| {
            let state = self.cache.get(sensor).ok()?;
            let value = state.numeric_value();
            if value.is_none() {
                tracing::warn!(
                    room = %self.name(),
                    entity_id = %sensor,
                    state = %state.value,
                    "invalid humidity value"
                );
            }
            value
        })
    }

    /// Wait for timer expiries forever, turning the lights off each time.
    pub async fn run_timer(&self) {
        loop {
            self.timer.expired().await;
            match self.on_timer_expired().await {
                Ok(_) => {}
                Err(SkipReason::AlreadyOff) => {
                    tracing::info!(room = %self.name(), "lights already off");
                }
                Err(reason @ SkipReason::StateUnknown { .. }) => {
                    tracing::info!(room = %self.name(), %reason, "timer re-armed until states are known");
                }
                Err(reason) => {
                    tracing::info!(room = %self.name(), %reason, "turn_off prevented");
                }
            }
        }
    }

    /// Statistics for this room over `elapsed`.
    #[must_use]
    pub fn stats(&self, elapsed: Duration) -> RoomStats {
        let events = self.events_received();
        RoomStats {
            name: self.name().to_string(),
            events,
            events_per_minute: events_per_minute(events, elapsed.as_secs_f64()),
            lights_on: !self.lights_on().is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveTime;

    use automoli_domain::daytime::{Daytime, LightDefaults};
    use automoli_domain::event::EventType;
    use automoli_domain::state::DeviceState;

    use super::*;
    use crate::actuator::tests::SpyCaller;
    use crate::state_cache::tests::state;

    fn id(raw: &str) -> EntityId {
        EntityId::parse(raw).unwrap()
    }

    fn settings() -> RoomSettings {
        RoomSettings::builder("bathroom")
            .lights([id("light.bath"), id("light.mirror")])
            .motion_sensor(id("binary_sensor.bath_motion"))
            .motion_state_on("on")
            .motion_state_off("off")
            .humidity_sensors([id("sensor.bath_humidity")])
            .humidity_threshold(60)
            .defaults(LightDefaults {
                delay: Duration::from_secs(120),
                ..LightDefaults::default()
            })
            .daytime(Daytime::builder("day", NaiveTime::MIN).brightness(80))
            .daytime(
                Daytime::builder("night", NaiveTime::from_hms_opt(22, 0, 0).unwrap())
                    .brightness(0),
            )
            .build()
            .unwrap()
    }

    struct Fixture {
        room: Arc<Room<Arc<SpyCaller>>>,
        spy: Arc<SpyCaller>,
        cache: Arc<StateCache>,
    }

    fn fixture_with(disabled_by: DisabledBy) -> Fixture {
        let spy = Arc::new(SpyCaller::default());
        let cache = Arc::new(StateCache::new());
        cache.replace_all([
            state("light.bath", "off"),
            state("light.mirror", "off"),
            state("sensor.bath_humidity", "45"),
            state("input_boolean.automoli", "on"),
        ]);
        let context = RoomContext {
            caller: spy.clone(),
            cache: cache.clone(),
            disabled_by: Arc::new(disabled_by),
            relax_after_turn_on: Duration::from_millis(1337),
        };
        let room = Arc::new(Room::new(
            settings(),
            context,
            NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
        ));
        Fixture { room, spy, cache }
    }

    fn fixture() -> Fixture {
        fixture_with(DisabledBy::new().with_rule(id("input_boolean.automoli"), ["off"]))
    }

    fn motion() -> Event {
        Event::new(EventType::xiaomi_motion(), id("binary_sensor.bath_motion"))
    }

    fn state_changed(value: &str) -> Event {
        let new_state: DeviceState = state("binary_sensor.bath_motion", value);
        Event::new(EventType::state_changed(), id("binary_sensor.bath_motion"))
            .with_new_state(new_state)
    }

    #[tokio::test(start_paused = true)]
    async fn should_turn_on_and_arm_timer_when_motion_detected() {
        let f = fixture();
        let report = f.room.handle_event(&motion()).await.unwrap();

        assert_eq!(report.succeeded, vec![id("light.bath"), id("light.mirror")]);
        assert!(f.room.timer().deadline().is_some());
        let calls = f.spy.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.service == Service::TurnOn));
        assert_eq!(
            calls[0].service_data.get("brightness_pct"),
            Some(&serde_json::json!(80))
        );
        assert_eq!(f.cache.value(&id("light.bath")).as_deref(), Some("on"));
    }

    #[tokio::test(start_paused = true)]
    async fn should_ignore_state_change_to_non_trigger_state() {
        let f = fixture();
        let result = f.room.handle_event(&state_changed("off")).await;

        assert!(matches!(result, Err(SkipReason::NotMotion { .. })));
        assert!(f.room.timer().deadline().is_none());
        assert_eq!(f.room.events_received(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn should_turn_on_when_state_changes_to_trigger_state() {
        let f = fixture();
        assert!(f.room.handle_event(&state_changed("on")).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn should_skip_but_rearm_when_disabled() {
        let f = fixture();
        f.cache.apply_optimistic(&id("input_boolean.automoli"), "off");

        let result = f.room.handle_event(&motion()).await;

        assert_eq!(
            result,
            Err(SkipReason::Disabled {
                entities: vec![id("input_boolean.automoli")]
            })
        );
        assert!(f.room.timer().deadline().is_some());
        assert!(f.spy.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn should_skip_when_daytime_disables_lights() {
        let f = fixture();
        f.room.switch_daytime(1);

        let result = f.room.handle_event(&motion()).await;

        assert_eq!(
            result,
            Err(SkipReason::DaytimeDisabled {
                daytime: "night".to_string()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn should_skip_when_lights_already_on() {
        let f = fixture();
        f.cache.apply_optimistic(&id("light.mirror"), "on");

        let result = f.room.handle_event(&motion()).await;

        assert_eq!(
            result,
            Err(SkipReason::AlreadyOn {
                lights: vec![id("light.mirror")]
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn should_skip_when_lights_just_turned_on() {
        let f = fixture();
        f.room.handle_event(&motion()).await.unwrap();
        // the hub reverted the optimistic update before confirming
        f.cache.apply_optimistic(&id("light.bath"), "off");
        f.cache.apply_optimistic(&id("light.mirror"), "off");

        let result = f.room.handle_event(&motion()).await;
        assert!(matches!(result, Err(SkipReason::JustTurnedOn { .. })));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(f.room.handle_event(&motion()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn should_issue_single_turn_on_when_triggers_race() {
        let f = fixture();
        let a = tokio::spawn({
            let room = f.room.clone();
            async move { room.handle_event(&motion()).await }
        });
        let b = tokio::spawn({
            let room = f.room.clone();
            async move { room.handle_event(&motion()).await }
        });

        let results = [a.await.unwrap(), b.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(SkipReason::AlreadyOn { .. })))
        );
        assert_eq!(f.spy.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn should_turn_all_lights_off_when_timer_expires() {
        let f = fixture();
        f.room.handle_event(&motion()).await.unwrap();

        let report = f.room.on_timer_expired().await.unwrap();

        assert_eq!(report.succeeded.len(), 2);
        let off: Vec<_> = f
            .spy
            .calls()
            .into_iter()
            .filter(|c| c.service == Service::TurnOff)
            .collect();
        assert_eq!(off.len(), 2);
        assert_eq!(
            off[0].service_data.get("transition"),
            Some(&serde_json::json!(2.0))
        );
        assert!(f.room.lights_on().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn should_do_nothing_when_lights_already_off_at_expiry() {
        let f = fixture();
        assert_eq!(f.room.on_timer_expired().await, Err(SkipReason::AlreadyOff));
        assert!(f.spy.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn should_skip_turn_off_when_humidity_above_threshold() {
        let f = fixture();
        f.room.handle_event(&motion()).await.unwrap();
        f.cache.apply_event(state("sensor.bath_humidity", "72.5"));

        let result = f.room.on_timer_expired().await;

        assert_eq!(
            result,
            Err(SkipReason::HumidityAboveThreshold {
                sensor: id("sensor.bath_humidity"),
                value: 72.5
            })
        );
        assert!(
            f.spy
                .calls()
                .iter()
                .all(|c| c.service == Service::TurnOn)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn should_skip_turn_off_when_disabled() {
        let f = fixture();
        f.room.handle_event(&motion()).await.unwrap();
        f.cache.apply_optimistic(&id("input_boolean.automoli"), "off");

        let result = f.room.on_timer_expired().await;
        assert!(matches!(result, Err(SkipReason::Disabled { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn should_turn_off_after_delay_when_timer_task_runs() {
        let f = fixture();
        let timer_task = tokio::spawn({
            let room = f.room.clone();
            async move { room.run_timer().await }
        });

        f.room.handle_event(&motion()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(121)).await;

        assert!(f.room.lights_on().is_empty());
        assert!(
            f.spy
                .calls()
                .iter()
                .any(|c| c.service == Service::TurnOff)
        );
        timer_task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn should_turn_off_once_states_reload_when_cache_empty_at_expiry() {
        let f = fixture();
        let timer_task = tokio::spawn({
            let room = f.room.clone();
            async move { room.run_timer().await }
        });

        f.room.handle_event(&motion()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(119)).await;
        // reconnect: cache emptied, refilled after the deadline passed
        f.cache.clear();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(f.spy.calls().iter().all(|c| c.service == Service::TurnOn));
        assert!(f.room.timer().deadline().is_some());

        f.cache.replace_all([
            state("light.bath", "on"),
            state("light.mirror", "on"),
            state("sensor.bath_humidity", "45"),
            state("input_boolean.automoli", "on"),
        ]);
        tokio::time::sleep(Duration::from_secs(3600)).await;

        let off = f
            .spy
            .calls()
            .iter()
            .filter(|c| c.service == Service::TurnOff)
            .count();
        assert_eq!(off, 2);
        assert!(f.room.lights_on().is_empty());
        assert!(f.room.timer().deadline().is_none());
        timer_task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn should_report_unknown_state_when_expiring_with_empty_cache() {
        let f = fixture();
        f.cache.clear();

        let result = f.room.on_timer_expired().await;

        assert_eq!(
            result,
            Err(SkipReason::StateUnknown {
                lights: vec![id("light.bath"), id("light.mirror")]
            })
        );
        assert!(f.room.timer().deadline().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn should_skip_turn_on_when_light_state_unknown() {
        let f = fixture();
        f.cache.clear();
        f.cache.apply_event(state("light.bath", "off"));

        let result = f.room.handle_event(&motion()).await;

        assert_eq!(
            result,
            Err(SkipReason::StateUnknown {
                lights: vec![id("light.mirror")]
            })
        );
        assert!(f.room.timer().deadline().is_some());
        assert!(f.spy.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn should_arm_timer_when_lights_on_at_startup() {
        let f = fixture();
        assert!(!f.room.arm_if_lights_on());

        f.cache.apply_event(state("light.bath", "on"));
        assert!(f.room.arm_if_lights_on());
        assert!(f.room.timer().deadline().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn should_report_stats_with_lights_on_flag() {
        let f = fixture();
        f.room.handle_event(&motion()).await.unwrap();

        let stats = f.room.stats(Duration::from_secs(60));
        assert_eq!(stats.name, "bathroom");
        assert_eq!(stats.events, 1);
        assert!(stats.lights_on);
    }
}
