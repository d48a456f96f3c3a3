//! Last known state of every hub entity.
//!
//! Filled by a full snapshot after every (re)connect, patched by incoming
//! `state_changed` events and optimistically after successful switch calls.
//! A read right after a call may see either the optimistic value or the
//! authoritative one that arrives moments later.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use automoli_domain::entity_id::EntityId;
use automoli_domain::error::NotFoundError;
use automoli_domain::state::DeviceState;

/// Shared entity-state cache guarded by a single reader/writer lock.
#[derive(Debug, Default)]
pub struct StateCache {
    states: RwLock<HashMap<EntityId, DeviceState>>,
}

impl StateCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<EntityId, DeviceState>> {
        self.states.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<EntityId, DeviceState>> {
        self.states.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError`] when the entity is not cached.
    pub fn get(&self, id: &EntityId) -> Result<DeviceState, NotFoundError> {
        self.read().get(id).cloned().ok_or_else(|| NotFoundError {
            entity: "State",
            id: id.to_string(),
        })
    }

    /// Current state value of `id`, if cached.
    #[must_use]
    pub fn value(&self, id: &EntityId) -> Option<String> {
        self.read().get(id).map(|s| s.value.clone())
    }

    /// Friendly name of `id`, falling back to the raw id.
    #[must_use]
    pub fn friendly_name(&self, id: &EntityId) -> String {
        self.read()
            .get(id)
            .and_then(|s| s.attributes.friendly_name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Replace the whole cache with a fresh snapshot.
    pub fn replace_all(&self, states: impl IntoIterator<Item = DeviceState>) {
        let fresh: HashMap<_, _> = states
            .into_iter()
            .map(|s| (s.entity_id.clone(), s))
            .collect();
        *self.write() = fresh;
    }

    /// Patch one entry from a `state_changed` event.
    pub fn apply_event(&self, new_state: DeviceState) {
        self.write().insert(new_state.entity_id.clone(), new_state);
    }

    /// Set the state value of `id` ahead of the hub's confirmation.
    ///
    /// Entities that are not cached yet are left alone.
    pub fn apply_optimistic(&self, id: &EntityId, value: &str) {
        let mut states = self.write();
        match states.get_mut(id) {
            Some(state) => {
                state.value = value.to_string();
                let now = automoli_domain::time::now();
                state.last_changed = now;
                state.last_updated = now;
            }
            None => {
                tracing::debug!(entity_id = %id, value, "optimistic update for uncached entity skipped");
            }
        }
    }

    /// Forget every cached state.
    pub fn clear(&self) {
        self.write().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
