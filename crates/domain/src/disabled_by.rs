//! Global kill switches: entities whose state disables all automation.

use std::collections::{BTreeMap, BTreeSet};

use crate::entity_id::EntityId;

/// Entities and the state values in which they disable the daemon.
///
/// Built once at startup and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisabledBy {
    rules: BTreeMap<EntityId, BTreeSet<String>>,
}

impl DisabledBy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable whenever `entity` is in one of `states`.
    #[must_use]
    pub fn with_rule(
        mut self,
        entity: EntityId,
        states: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.rules
            .entry(entity)
            .or_default()
            .extend(states.into_iter().map(Into::into));
        self
    }

    /// The rules currently in effect, as `(entity, current state)` pairs.
    ///
    /// `state` looks up the current state value of an entity; entities with
    /// no known state never disable.
    pub fn active<'a>(
        &'a self,
        state: impl Fn(&EntityId) -> Option<String> + 'a,
    ) -> impl Iterator<Item = (&'a EntityId, String)> + 'a {
        self.rules.iter().filter_map(move |(entity, disabling)| {
            state(entity)
                .filter(|value| disabling.contains(value))
                .map(|value| (entity, value))
        })
    }

    /// Entities watched by the rules.
    pub fn entities(&self) -> impl Iterator<Item = &EntityId> {
        self.rules.keys()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
