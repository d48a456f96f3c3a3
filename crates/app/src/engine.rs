//! Automation engine: wires rooms, router, timers, scheduler and stats.
//!
//! The engine consumes the hub's event stream, counts every event, routes it
//! to the owning room's bounded queue and lets each room evaluate it on its
//! own task.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::NaiveTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use automoli_domain::disabled_by::DisabledBy;
use automoli_domain::event::{Event, EventType};
use automoli_domain::room::RoomSettings;
use automoli_domain::summary::{HouseSummary, StatsReport, events_per_minute};

use crate::daytime_scheduler;
use crate::ports::report::Report;
use crate::ports::{ReportPublisher, ServiceCaller};
use crate::room::{Room, RoomContext, SkipReason};
use crate::router::{EventRouter, ROOM_QUEUE_CAPACITY, RouteOutcome};
use crate::state_cache::StateCache;

/// Tunables shared by all rooms.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub relax_after_turn_on: Duration,
    pub stats_interval: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            relax_after_turn_on: Duration::from_millis(1337),
            stats_interval: Duration::from_secs(13 * 60 + 37),
        }
    }
}

/// Owns the rooms and the immutable routing table.
pub struct Engine<C, P> {
    rooms: Vec<Arc<Room<C>>>,
    queues: Vec<mpsc::Receiver<Event>>,
    router: EventRouter,
    publisher: Arc<P>,
    summary: HouseSummary,
    stats_interval: Duration,
    total_events: Arc<AtomicU64>,
}

impl<C, P> Engine<C, P>
where
    C: ServiceCaller + Clone + Send + Sync + 'static,
    P: ReportPublisher + Send + Sync + 'static,
{
    /// Build the rooms and the routing table.
    ///
    /// `now` selects every room's initial daytime.
    pub fn new(
        rooms: Vec<RoomSettings>,
        disabled_by: DisabledBy,
        cache: Arc<StateCache>,
        caller: C,
        publisher: P,
        settings: &EngineSettings,
        now: NaiveTime,
    ) -> Self {
        let summary = HouseSummary::from_rooms(&rooms);
        let disabled_by = Arc::new(disabled_by);

        let mut router = EventRouter::builder();
        let mut built = Vec::with_capacity(rooms.len());
        let mut queues = Vec::with_capacity(rooms.len());
        for room in rooms {
            let (tx, rx) = mpsc::channel(ROOM_QUEUE_CAPACITY);
            router = router.room(&room, &tx);
            let context = RoomContext {
                caller: caller.clone(),
                cache: cache.clone(),
                disabled_by: disabled_by.clone(),
                relax_after_turn_on: settings.relax_after_turn_on,
            };
            built.push(Arc::new(Room::new(room, context, now)));
            queues.push(rx);
        }

        Self {
            rooms: built,
            queues,
            router: router.build(),
            publisher: Arc::new(publisher),
            summary,
            stats_interval: settings.stats_interval,
            total_events: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Every event type some room can be triggered by.
    #[must_use]
    pub fn trigger_events(&self) -> Vec<EventType> {
        self.router.event_types()
    }

    #[must_use]
    pub fn summary(&self) -> &HouseSummary {
        &self.summary
    }

    #[must_use]
    pub fn rooms(&self) -> &[Arc<Room<C>>] {
        &self.rooms
    }

    /// Run until `events` is closed.
    ///
    /// Call this after the state cache was filled, so rooms whose lights are
    /// already on can arm their timers.
    pub async fn run(mut self, mut events: mpsc::Receiver<Event>) {
        if let Err(err) = self
            .publisher
            .publish(Report::Startup(self.summary.clone()))
            .await
        {
            tracing::warn!(%err, "failed to publish startup summary");
        }

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        for (room, queue) in self.rooms.iter().zip(std::mem::take(&mut self.queues)) {
            room.arm_if_lights_on();
            tasks.push(tokio::spawn(consume_room_queue(room.clone(), queue)));
            tasks.push(tokio::spawn({
                let room = room.clone();
                async move { room.run_timer().await }
            }));
        }
        tasks.extend(daytime_scheduler::spawn_all(&self.rooms));
        tasks.push(tokio::spawn(report_stats(
            self.rooms.clone(),
            self.publisher.clone(),
            self.total_events.clone(),
            self.stats_interval,
        )));

        tracing::info!(
            rooms = self.summary.rooms,
            lights = self.summary.lights,
            sensors = self.summary.sensors,
            fingerprint = %self.summary.fingerprint,
            "engine started"
        );

        while let Some(event) = events.recv().await {
            self.total_events.fetch_add(1, Ordering::Relaxed);
            if self.router.route(event) == RouteOutcome::Unrouted {
                tracing::trace!("event for no room");
            }
        }

        tracing::info!("event stream closed, stopping engine");
        for task in tasks {
            task.abort();
        }
    }
}

/// Hand every queued event to its own task so a slow hub call never blocks
/// the queue.
async fn consume_room_queue<C>(room: Arc<Room<C>>, mut queue: mpsc::Receiver<Event>)
where
    C: ServiceCaller + Send + Sync + 'static,
{
    while let Some(event) = queue.recv().await {
        let room = room.clone();
        tokio::spawn(async move {
            match room.handle_event(&event).await {
                Ok(_) => {}
                Err(reason @ SkipReason::NotMotion { .. }) => {
                    tracing::debug!(room = %room.name(), %reason, "ignoring event");
                }
                Err(reason) => {
                    tracing::info!(room = %room.name(), %reason, "turn_on prevented");
                }
            }
        });
    }
}

async fn report_stats<C, P>(
    rooms: Vec<Arc<Room<C>>>,
    publisher: Arc<P>,
    total_events: Arc<AtomicU64>,
    interval: Duration,
) where
    C: ServiceCaller,
    P: ReportPublisher,
{
    let started = Instant::now();
    let mut ticker = tokio::time::interval_at(started + interval, interval);
    loop {
        ticker.tick().await;
        let elapsed = started.elapsed();
        let total = total_events.load(Ordering::Relaxed);
        let report = StatsReport {
            total_events: total,
            events_per_minute: events_per_minute(total, elapsed.as_secs_f64()),
            rooms: rooms.iter().map(|room| room.stats(elapsed)).collect(),
        };
        tracing::info!(
            total_events = report.total_events,
            events_per_minute = report.events_per_minute,
            "stats"
        );
        if let Err(err) = publisher.publish(Report::Stats(report)).await {
            tracing::warn!(%err, "failed to publish stats");
        }
    }
}

#[cfg(test)]
mod tests {
    use automoli_domain::daytime::Daytime;
    use automoli_domain::entity_id::EntityId;
    use automoli_domain::service::Service;

    use super::*;
    use crate::actuator::tests::SpyCaller;
    use crate::report_bus::ReportBus;
    use crate::state_cache::tests::state;

    fn id(raw: &str) -> EntityId {
        EntityId::parse(raw).unwrap()
    }

    fn kitchen() -> RoomSettings {
        RoomSettings::builder("kitchen")
            .light(id("light.kitchen"))
            .motion_sensor(id("binary_sensor.kitchen_motion"))
            .motion_state_on("on")
            .motion_state_off("off")
            .daytime(Daytime::builder("day", NaiveTime::MIN).brightness(70))
            .build()
            .unwrap()
    }

    struct Fixture {
        engine: Engine<Arc<SpyCaller>, Arc<ReportBus>>,
        spy: Arc<SpyCaller>,
        bus: Arc<ReportBus>,
        cache: Arc<StateCache>,
    }

    fn fixture() -> Fixture {
        let spy = Arc::new(SpyCaller::default());
        let bus = Arc::new(ReportBus::new(16));
        let cache = Arc::new(StateCache::new());
        cache.replace_all([state("light.kitchen", "off")]);
        let engine = Engine::new(
            vec![kitchen()],
            DisabledBy::new(),
            cache.clone(),
            spy.clone(),
            bus.clone(),
            &EngineSettings {
                relax_after_turn_on: Duration::from_millis(1337),
                stats_interval: Duration::from_secs(60),
            },
            NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
        );
        Fixture {
            engine,
            spy,
            bus,
            cache,
        }
    }

    #[test]
    fn should_expose_trigger_events_and_summary() {
        let f = fixture();
        assert_eq!(
            f.engine.trigger_events(),
            vec![EventType::state_changed(), EventType::xiaomi_motion()]
        );
        assert_eq!(f.engine.summary(), &HouseSummary::new(1, 1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn should_turn_on_lights_when_motion_event_received() {
        let f = fixture();
        let mut reports = f.bus.subscribe();
        let (tx, rx) = mpsc::channel(16);
        let run = tokio::spawn(f.engine.run(rx));

        tx.send(Event::new(
            EventType::xiaomi_motion(),
            id("binary_sensor.kitchen_motion"),
        ))
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let calls = f.spy.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].service, Service::TurnOn);
        assert_eq!(f.cache.value(&id("light.kitchen")).as_deref(), Some("on"));
        assert!(matches!(reports.next().await.unwrap(), Report::Startup(_)));

        drop(tx);
        run.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn should_turn_off_after_delay_without_motion() {
        let f = fixture();
        let (tx, rx) = mpsc::channel(16);
        let run = tokio::spawn(f.engine.run(rx));

        tx.send(Event::new(
            EventType::xiaomi_motion(),
            id("binary_sensor.kitchen_motion"),
        ))
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_secs(338)).await;

        assert_eq!(f.cache.value(&id("light.kitchen")).as_deref(), Some("off"));
        assert!(
            f.spy
                .calls()
                .iter()
                .any(|c| c.service == Service::TurnOff)
        );

        drop(tx);
        run.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn should_ignore_events_for_unknown_sensors() {
        let f = fixture();
        let (tx, rx) = mpsc::channel(16);
        let run = tokio::spawn(f.engine.run(rx));

        tx.send(Event::new(EventType::xiaomi_motion(), id("binary_sensor.garage")))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(f.spy.calls().is_empty());
        drop(tx);
        run.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn should_publish_stats_counting_every_event() {
        let f = fixture();
        let mut reports = f.bus.subscribe();
        let (tx, rx) = mpsc::channel(16);
        let run = tokio::spawn(f.engine.run(rx));

        tx.send(Event::new(
            EventType::xiaomi_motion(),
            id("binary_sensor.kitchen_motion"),
        ))
        .await
        .unwrap();
        tx.send(Event::new(EventType::xiaomi_motion(), id("binary_sensor.garage")))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert!(matches!(reports.next().await.unwrap(), Report::Startup(_)));
        let Report::Stats(stats) = reports.next().await.unwrap() else {
            panic!("expected stats report");
        };
        assert_eq!(stats.total_events, 2);
        assert_eq!(stats.rooms.len(), 1);
        assert_eq!(stats.rooms[0].events, 1);
        assert!(stats.rooms[0].lights_on);

        drop(tx);
        run.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn should_arm_timer_for_rooms_with_lights_on_at_start() {
        let f = fixture();
        f.cache.apply_event(state("light.kitchen", "on"));
        let room = f.engine.rooms()[0].clone();
        let (tx, rx) = mpsc::channel::<Event>(16);
        let run = tokio::spawn(f.engine.run(rx));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(room.timer().deadline().is_some());

        drop(tx);
        run.await.unwrap();
    }
}
