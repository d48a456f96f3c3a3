//! Report bus: fans engine reports out to in-process listeners.
//!
//! The startup summary is kept, so a listener attaching after the engine
//! started still sees it before any stats report.

use std::future::Future;
use std::sync::{Mutex, PoisonError};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use automoli_domain::error::AutomoliError;
use automoli_domain::summary::HouseSummary;

use crate::ports::ReportPublisher;
use crate::ports::report::Report;

pub struct ReportBus {
    sender: broadcast::Sender<Report>,
    startup: Mutex<Option<HouseSummary>>,
}

impl ReportBus {
    /// `capacity` bounds how many stats reports a slow listener may lag.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            startup: Mutex::new(None),
        }
    }

    /// Attach a listener.
    #[must_use]
    pub fn subscribe(&self) -> ReportStream {
        // same lock as `publish`, so the summary is neither missed nor doubled
        let startup = self.startup.lock().unwrap_or_else(PoisonError::into_inner);
        ReportStream {
            replay: startup.clone().map(Report::Startup),
            receiver: self.sender.subscribe(),
        }
    }
}

impl ReportPublisher for ReportBus {
    fn publish(&self, report: Report) -> impl Future<Output = Result<(), AutomoliError>> + Send {
        let mut startup = self.startup.lock().unwrap_or_else(PoisonError::into_inner);
        if let Report::Startup(summary) = &report {
            *startup = Some(summary.clone());
        }
        if self.sender.send(report).is_err() {
            tracing::trace!("no report listener");
        }
        drop(startup);
        async { Ok(()) }
    }
}

/// Reports as seen by one listener.
pub struct ReportStream {
    replay: Option<Report>,
    receiver: broadcast::Receiver<Report>,
}

impl ReportStream {
    /// Next report, or `None` once the bus is gone.
    ///
    /// Reports lost to lagging are skipped.
    pub async fn next(&mut self) -> Option<Report> {
        if let Some(report) = self.replay.take() {
            return Some(report);
        }
        loop {
            match self.receiver.recv().await {
                Ok(report) => return Some(report),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "report listener lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use automoli_domain::summary::StatsReport;

    use super::*;

    fn stats(total: u64) -> Report {
        Report::Stats(StatsReport {
            total_events: total,
            events_per_minute: 0.0,
            rooms: Vec::new(),
        })
    }

    #[tokio::test]
    async fn should_replay_startup_summary_when_listener_attaches_late() {
        let bus = ReportBus::new(4);
        let summary = HouseSummary::new(2, 3, 2);
        bus.publish(Report::Startup(summary.clone())).await.unwrap();
        bus.publish(stats(5)).await.unwrap();

        let mut reports = bus.subscribe();
        bus.publish(stats(9)).await.unwrap();

        assert_eq!(reports.next().await, Some(Report::Startup(summary)));
        assert_eq!(reports.next().await, Some(stats(9)));
    }

    #[tokio::test]
    async fn should_deliver_startup_once_when_listener_attached_early() {
        let bus = ReportBus::new(4);
        let mut reports = bus.subscribe();
        let summary = HouseSummary::new(1, 1, 1);

        bus.publish(Report::Startup(summary.clone())).await.unwrap();
        bus.publish(stats(1)).await.unwrap();

        assert_eq!(reports.next().await, Some(Report::Startup(summary)));
        assert_eq!(reports.next().await, Some(stats(1)));
    }

    #[tokio::test]
    async fn should_skip_lost_reports_when_listener_lags() {
        let bus = ReportBus::new(2);
        let mut reports = bus.subscribe();
        for total in 0..5 {
            bus.publish(stats(total)).await.unwrap();
        }

        assert_eq!(reports.next().await, Some(stats(3)));
        assert_eq!(reports.next().await, Some(stats(4)));
    }

    #[tokio::test]
    async fn should_end_stream_when_bus_dropped() {
        let bus = Arc::new(ReportBus::new(4));
        let mut reports = bus.subscribe();
        drop(bus);

        assert_eq!(reports.next().await, None);
    }

    #[tokio::test]
    async fn should_succeed_when_nobody_listens() {
        let bus = ReportBus::new(4);
        assert!(bus.publish(stats(1)).await.is_ok());
    }
}
