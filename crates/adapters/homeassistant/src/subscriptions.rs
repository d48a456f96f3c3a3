//! Event subscription bookkeeping.
//!
//! `desired` survives reconnects; `active` only lives as long as the
//! connection epoch that acknowledged it and is cleared at teardown.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use automoli_domain::event::EventType;

use crate::error::HubError;

#[derive(Debug, Default)]
struct SubscriptionSet {
    desired: BTreeSet<EventType>,
    active: BTreeSet<EventType>,
}

/// Tracks which event types should be and currently are subscribed.
#[derive(Debug, Default)]
pub struct Subscriptions {
    sets: Mutex<SubscriptionSet>,
    /// Serializes subscribe requests so one type is never subscribed twice
    /// within an epoch.
    ensure_lock: tokio::sync::Mutex<()>,
}

impl Subscriptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sets(&self) -> MutexGuard<'_, SubscriptionSet> {
        self.sets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make sure `event_type` is subscribed.
    ///
    /// The type is remembered as desired even when subscribing fails, so the
    /// next resync retries it. Returns `true` when a subscribe request was
    /// acknowledged, `false` when the type was already active.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `subscribe`.
    pub async fn ensure<F, Fut>(&self, event_type: EventType, subscribe: F) -> Result<bool, HubError>
    where
        F: FnOnce(EventType) -> Fut,
        Fut: Future<Output = Result<(), HubError>>,
    {
        let _guard = self.ensure_lock.lock().await;
        {
            let mut sets = self.sets();
            sets.desired.insert(event_type.clone());
            if sets.active.contains(&event_type) {
                return Ok(false);
            }
        }

        subscribe(event_type.clone()).await?;
        self.sets().active.insert(event_type.clone());
        tracing::info!(%event_type, "subscribed to events");
        Ok(true)
    }

    /// Re-subscribe every desired type that is not active.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first failure.
    pub async fn resync<F, Fut>(&self, subscribe: F) -> Result<usize, HubError>
    where
        F: Fn(EventType) -> Fut,
        Fut: Future<Output = Result<(), HubError>>,
    {
        let mut count = 0;
        for event_type in self.pending() {
            if self.ensure(event_type, &subscribe).await? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Forget the acknowledged subscriptions of a finished epoch.
    pub fn clear_active(&self) {
        self.sets().active.clear();
    }

    #[must_use]
    pub fn is_desired(&self, event_type: &EventType) -> bool {
        self.sets().desired.contains(event_type)
    }

    #[must_use]
    pub fn desired(&self) -> Vec<EventType> {
        self.sets().desired.iter().cloned().collect()
    }

    #[must_use]
    pub fn active(&self) -> Vec<EventType> {
        self.sets().active.iter().cloned().collect()
    }

    /// Desired types without an active subscription.
    #[must_use]
    pub fn pending(&self) -> Vec<EventType> {
        let sets = self.sets();
        sets.desired.difference(&sets.active).cloned().collect()
    }
}
