//! Validated `domain.name` identifier for hub entities.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Entity domains the daemon treats specially.
pub mod domains {
    pub const LIGHT: &str = "light";
    pub const SCENE: &str = "scene";
    pub const SWITCH: &str = "switch";
}

/// Identifier of a hub entity, e.g. `light.kitchen_ceiling`.
///
/// Invariant: exactly one separating `.` is located by splitting on the
/// first dot, and both the domain and the name are non-empty. Equality and
/// hashing use the full string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId {
    raw: String,
    dot: usize,
}

impl EntityId {
    /// Parse and validate a raw `domain.name` string.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyEntityId`] for an empty string and
    /// [`ValidationError::InvalidEntityId`] when the delimiter is missing or
    /// either side of it is empty.
    pub fn parse(raw: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(ValidationError::EmptyEntityId);
        }
        match raw.split_once('.') {
            Some((domain, name)) if !domain.is_empty() && !name.is_empty() => {
                let dot = domain.len();
                Ok(Self { raw, dot })
            }
            _ => Err(ValidationError::InvalidEntityId(raw)),
        }
    }

    /// The part before the first dot (`light` in `light.kitchen`).
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.raw[..self.dot]
    }

    /// The part after the first dot (`kitchen` in `light.kitchen`).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.raw[self.dot + 1..]
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the entity can be switched and reports `on`/`off` as its state.
    #[must_use]
    pub fn is_switchable(&self) -> bool {
        matches!(self.domain(), domains::LIGHT | domains::SWITCH)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for EntityId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EntityId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<EntityId> for String {
    fn from(value: EntityId) -> Self {
        value.raw
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}
