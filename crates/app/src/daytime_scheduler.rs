//! Daytime scheduler: switches each room's active daytime at its local
//! wall-clock start time, every day.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime, NaiveTime, TimeDelta};
use tokio::task::JoinHandle;

use crate::ports::ServiceCaller;
use crate::room::Room;

/// Current local wall-clock time.
#[must_use]
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Time from `now` until the next occurrence of `start`.
///
/// A start equal to `now` is scheduled for the next day.
#[must_use]
pub fn duration_until(start: NaiveTime, now: NaiveDateTime) -> Duration {
    let mut next = now.date().and_time(start);
    if next <= now {
        next += TimeDelta::days(1);
    }
    (next - now).to_std().unwrap_or_default()
}

/// Activate daytime `index` of `room` every day at its start time.
pub async fn run_daytime_switch<C, F>(room: Arc<Room<C>>, index: usize, clock: F)
where
    C: ServiceCaller,
    F: Fn() -> NaiveDateTime,
{
    let Some(daytime) = room.settings().schedule.get(index) else {
        return;
    };
    let start = daytime.start;
    tracing::debug!(room = %room.name(), daytime = %daytime.name, %start, "daytime switch scheduled");

    loop {
        tokio::time::sleep(duration_until(start, clock())).await;
        room.switch_daytime(index);
    }
}

/// Spawn one switch task per daytime of every room.
pub fn spawn_all<C>(rooms: &[Arc<Room<C>>]) -> Vec<JoinHandle<()>>
where
    C: ServiceCaller + Send + Sync + 'static,
{
    rooms
        .iter()
        .flat_map(|room| {
            (0..room.settings().schedule.len()).map(move |index| {
                tokio::spawn(run_daytime_switch(room.clone(), index, local_now))
            })
        })
        .collect()
}
