//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts into
//! [`AutomoliError`] via `#[from]` (or an explicit `into_domain`) when the
//! error has to cross a port boundary.

/// Top-level error crossing crate boundaries.
#[derive(Debug, thiserror::Error)]
pub enum AutomoliError {
    #[error("validation error")]
    Validation(#[from] ValidationError),

    #[error("not found")]
    NotFound(#[from] NotFoundError),

    /// The hub could not be reached or rejected the request.
    #[error("hub error")]
    Hub(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Configuration and invariant violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("entity id must not be empty")]
    EmptyEntityId,

    #[error("invalid entity id {0:?}, expected \"domain.name\"")]
    InvalidEntityId(String),

    #[error("name must not be empty")]
    EmptyName,

    #[error("invalid time of day {0:?}, expected \"HH:MM\"")]
    InvalidTimeOfDay(String),

    #[error("invalid flash {0:?}, expected \"short\" or \"long\"")]
    InvalidFlash(String),

    #[error("room {room} has no lights")]
    NoLights { room: String },

    #[error("room {room} has no motion sensors")]
    NoMotionSensors { room: String },

    #[error("room {room} has no daytimes")]
    NoDaytimes { room: String },

    #[error("hub url must not be empty")]
    EmptyUrl,

    #[error("invalid hub url {0:?}")]
    InvalidUrl(String),

    #[error("hub token must not be empty")]
    EmptyToken,
}

/// A lookup did not find the requested item.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} {id} not found")]
pub struct NotFoundError {
    pub entity: &'static str,
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_convert_validation_error_into_automoli_error() {
        let err: AutomoliError = ValidationError::EmptyName.into();
        assert!(matches!(
            err,
            AutomoliError::Validation(ValidationError::EmptyName)
        ));
    }

    #[test]
    fn should_display_not_found_error_with_entity_and_id() {
        let err = NotFoundError {
            entity: "State",
            id: "light.kitchen".to_string(),
        };
        assert_eq!(err.to_string(), "State light.kitchen not found");
    }

    #[test]
    fn should_display_room_name_in_room_errors() {
        let err = ValidationError::NoLights {
            room: "kitchen".to_string(),
        };
        assert_eq!(err.to_string(), "room kitchen has no lights");
    }
}
