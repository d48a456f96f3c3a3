//! Event router: demultiplexes hub events onto the owning room's queue.
//!
//! The routing table maps `(sensor, event type)` to a room and is built once
//! at startup; it is never mutated afterwards.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use automoli_domain::entity_id::EntityId;
use automoli_domain::event::{Event, EventType};
use automoli_domain::room::RoomSettings;

/// Capacity of every room's event queue.
pub const ROOM_QUEUE_CAPACITY: usize = 16;

/// Outcome of routing a single event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered,
    /// The room's queue is full or closed; the event was dropped.
    Dropped,
    /// No room listens for this sensor and event type.
    Unrouted,
}

#[derive(Debug, Clone)]
struct RoomRoute {
    room: String,
    queue: mpsc::Sender<Event>,
}

/// Immutable `(sensor, event type) → room queue` table.
#[derive(Debug, Default)]
pub struct EventRouter {
    routes: HashMap<EntityId, HashMap<EventType, RoomRoute>>,
}

impl EventRouter {
    #[must_use]
    pub fn builder() -> EventRouterBuilder {
        EventRouterBuilder::default()
    }

    /// Push `event` onto the queue of the room that owns its sensor.
    ///
    /// Never blocks: a full queue means the room is stuck, so the event is
    /// dropped with a warning.
    pub fn route(&self, event: Event) -> RouteOutcome {
        let Some(route) = event
            .entity_id()
            .and_then(|id| self.routes.get(id))
            .and_then(|by_type| by_type.get(&event.event_type))
        else {
            return RouteOutcome::Unrouted;
        };

        match route.queue.try_send(event) {
            Ok(()) => RouteOutcome::Delivered,
            Err(TrySendError::Full(event)) => {
                tracing::warn!(
                    room = %route.room,
                    event_type = %event.event_type,
                    "room queue full, dropping event"
                );
                RouteOutcome::Dropped
            }
            Err(TrySendError::Closed(event)) => {
                tracing::warn!(
                    room = %route.room,
                    event_type = %event.event_type,
                    "room queue closed, dropping event"
                );
                RouteOutcome::Dropped
            }
        }
    }

    /// Every event type any room listens for.
    #[must_use]
    pub fn event_types(&self) -> Vec<EventType> {
        let mut types: Vec<_> = self
            .routes
            .values()
            .flat_map(HashMap::keys)
            .cloned()
            .collect();
        types.sort();
        types.dedup();
        types
    }
}

/// Collects routes before freezing them into an [`EventRouter`].
#[derive(Debug, Default)]
pub struct EventRouterBuilder {
    routes: HashMap<EntityId, HashMap<EventType, RoomRoute>>,
}

impl EventRouterBuilder {
    /// Route every trigger event of `room`'s motion sensors to `queue`.
    ///
    /// A later room claiming the same `(sensor, event type)` pair wins.
    #[must_use]
    pub fn room(mut self, room: &RoomSettings, queue: &mpsc::Sender<Event>) -> Self {
        for sensor in &room.motion_sensors {
            for event_type in room.trigger_events() {
                let previous = self.routes.entry(sensor.clone()).or_default().insert(
                    event_type.clone(),
                    RoomRoute {
                        room: room.name.clone(),
                        queue: queue.clone(),
                    },
                );
                if let Some(previous) = previous {
                    tracing::warn!(
                        entity_id = %sensor,
                        %event_type,
                        previous = %previous.room,
                        room = %room.name,
                        "sensor already routed to another room"
                    );
                }
            }
        }
        self
    }

    #[must_use]
    pub fn build(self) -> EventRouter {
        EventRouter {
            routes: self.routes,
        }
    }
}
