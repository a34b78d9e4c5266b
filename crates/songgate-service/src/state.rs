//! Application state.

use std::sync::Arc;

use songgate_store::Store;

use crate::config::ServiceConfig;
use crate::ledger::Ledger;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend, used directly only by the health check.
    pub store: Arc<dyn Store>,

    /// The ledger engine every handler goes through.
    pub ledger: Ledger,

    /// Service configuration.
    pub config: ServiceConfig,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        let ledger = Ledger::new(Arc::clone(&store), config.store_timeout());

        if config.service_api_key.is_none() {
            tracing::warn!("SERVICE_API_KEY not configured - pipeline endpoints will reject");
        }
        if config.stripe_webhook_secret.is_none() {
            tracing::warn!("Stripe webhook secret not configured - signatures will not be verified");
        }

        Self {
            store,
            ledger,
            config,
        }
    }
}
