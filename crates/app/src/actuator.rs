//! Switch a set of targets through the [`ServiceCaller`] port.

use std::sync::Arc;

use futures::future::join_all;

use automoli_domain::entity_id::EntityId;
use automoli_domain::service::{Service, ServiceCall, ServiceData, filter_service_data};

use crate::ports::ServiceCaller;
use crate::state_cache::StateCache;

/// Per-target outcome of a switch operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitchReport {
    pub succeeded: Vec<EntityId>,
    pub failed: Vec<EntityId>,
}

impl SwitchReport {
    #[must_use]
    pub fn any_succeeded(&self) -> bool {
        !self.succeeded.is_empty()
    }
}

/// Issues one service call per target, concurrently, and patches the cache
/// for every light or switch that was switched successfully.
pub struct Actuator<C> {
    caller: C,
    cache: Arc<StateCache>,
}

impl<C: ServiceCaller> Actuator<C> {
    pub fn new(caller: C, cache: Arc<StateCache>) -> Self {
        Self { caller, cache }
    }

    /// Call `service` on every target with its whitelisted share of `data`.
    ///
    /// Failing targets are logged and reported; they never abort siblings.
    pub async fn switch(
        &self,
        service: Service,
        targets: &[EntityId],
        data: &ServiceData,
    ) -> SwitchReport {
        let calls = targets.iter().map(|target| async move {
            let (filtered, dropped) = filter_service_data(data, service, target);
            if !dropped.is_empty() {
                tracing::warn!(
                    entity_id = %target,
                    %service,
                    ?dropped,
                    "dropping service data not supported by target"
                );
            }
            let result = self
                .caller
                .call_service(ServiceCall::new(service, target.clone(), filtered))
                .await;
            (target, result)
        });

        let mut report = SwitchReport::default();
        for (target, result) in join_all(calls).await {
            match result {
                Ok(()) => {
                    tracing::info!(
                        entity_id = %target,
                        name = %self.cache.friendly_name(target),
                        %service,
                        "service call succeeded"
                    );
                    if target.is_switchable()
                        && let Some(value) = service.resulting_state()
                    {
                        self.cache.apply_optimistic(target, value);
                    }
                    report.succeeded.push(target.clone());
                }
                Err(err) => {
                    tracing::warn!(
                        entity_id = %target,
                        name = %self.cache.friendly_name(target),
                        %service,
                        error = %err,
                        "service call failed"
                    );
                    report.failed.push(target.clone());
                }
            }
        }
        report
    }
}
