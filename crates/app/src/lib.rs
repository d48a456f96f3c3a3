//! # automoli-app
//!
//! Application layer: the automation core and **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement (driven/outbound ports):
//!   - `ServiceCaller`: invoke `turn_on` / `turn_off` on the hub
//!   - `ReportPublisher`: emit startup summaries and periodic stats
//! - Keep the **state cache** the hub adapter fills and the rooms read
//! - Route hub events to rooms, run the per-room **debounce timers** and the
//!   **daytime scheduler**
//! - Fan reports out to in-process listeners (report bus)
//!
//! ## Dependency rule
//! Depends on `automoli-domain` only (plus `tokio` for tasks, channels and time).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod actuator;
pub mod daytime_scheduler;
pub mod engine;
pub mod ports;
pub mod report_bus;
pub mod room;
pub mod router;
pub mod state_cache;
pub mod timer;
