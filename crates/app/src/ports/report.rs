//! Report port: publish plain data reports for display.

use std::future::Future;

use automoli_domain::error::AutomoliError;
use automoli_domain::summary::{HouseSummary, StatsReport};

/// A report the engine emits for whoever renders it.
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    /// Emitted once when the engine starts.
    Startup(HouseSummary),
    /// Emitted every stats interval.
    Stats(StatsReport),
}

/// Publishes reports to interested subscribers.
pub trait ReportPublisher {
    /// Publish a report to all current subscribers.
    fn publish(&self, report: Report) -> impl Future<Output = Result<(), AutomoliError>> + Send;
}

impl<T: ReportPublisher + Send + Sync> ReportPublisher for std::sync::Arc<T> {
    fn publish(&self, report: Report) -> impl Future<Output = Result<(), AutomoliError>> + Send {
        (**self).publish(report)
    }
}
