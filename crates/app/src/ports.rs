//! Port definitions: traits that adapters implement.
//!
//! Ports are the boundaries between the automation core and the outside world.
//! They are defined here (in `app`) so that both the engine and the adapter
//! layer can depend on them without creating circular dependencies.

pub mod report;
pub mod service_caller;

pub use report::ReportPublisher;
pub use service_caller::ServiceCaller;
