//! Service caller port: invoke device services on the hub.

use std::future::Future;

use automoli_domain::error::AutomoliError;
use automoli_domain::service::ServiceCall;

/// Issues service calls (`light.turn_on`, …) and waits for the hub's result.
pub trait ServiceCaller {
    /// Call a service on a single target.
    ///
    /// Resolves once the hub acknowledged the call. A hub-side failure
    /// (`success: false`) or a lost connection is returned as an error.
    fn call_service(
        &self,
        call: ServiceCall,
    ) -> impl Future<Output = Result<(), AutomoliError>> + Send;
}

impl<T: ServiceCaller + Send + Sync> ServiceCaller for std::sync::Arc<T> {
    fn call_service(
        &self,
        call: ServiceCall,
    ) -> impl Future<Output = Result<(), AutomoliError>> + Send {
        (**self).call_service(call)
    }
}
