//! # automoli-domain
//!
//! Pure domain model for the automoli light automation daemon.
//!
//! ## Responsibilities
//! - Foundational types: validated entity identifiers, error conventions, timestamps
//! - Mirror the hub's **states** and **events** (`state_changed`, motion events, …)
//! - Define **services** (`turn_on`, `turn_off`, `toggle`) and their per-domain
//!   service-data whitelists
//! - Define **daytimes** (time-scoped light configurations) and the circular
//!   daytime schedule
//! - Define **rooms** (lights, motion and humidity sensors) and the global
//!   disabled-by rules
//! - Contain all invariant enforcement and decision predicates that need no IO
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod time;

pub mod daytime;
pub mod disabled_by;
pub mod entity_id;
pub mod event;
pub mod room;
pub mod service;
pub mod state;
pub mod summary;
