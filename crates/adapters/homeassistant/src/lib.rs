//! # automoli-adapter-homeassistant
//!
//! Home Assistant adapter: a supervised websocket client for the hub's
//! `/api/websocket` endpoint.
//!
//! ## How it works
//!
//! 1. Dial, wait for `auth_required`, answer with the access token and wait
//!    for `auth_ok`.
//! 2. Spawn the reader, load the full state snapshot (`get_states`) into the
//!    shared [`StateCache`](automoli_app::state_cache::StateCache) and
//!    resubscribe every desired event type.
//! 3. Route `result` frames to the waiting caller, patch the cache from
//!    `state_changed` events and forward events of subscribed types to the
//!    engine.
//! 4. When the reader stops or the watchdog sees no frame for too long,
//!    tear down and reconnect with exponential backoff.
//!
//! [`HomeAssistant`] implements the `ServiceCaller` port so rooms can switch
//! lights through it.
//!
//! ## Dependency rule
//!
//! Same as other adapters: depends on `automoli-app` and `automoli-domain`.

mod config;
mod connection;
pub mod correlator;
mod error;
pub mod messages;
pub mod subscriptions;

pub use config::{ConnectionSettings, HomeAssistantConfig, websocket_url};
pub use connection::{HomeAssistant, backoff_delay};
pub use error::HubError;
