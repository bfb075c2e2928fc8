//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::ServerConfig;
use crate::db::PgLeadStore;
use crate::payments::{PayPalClient, PaymentError, StripeClient};
use crate::services::LeadService;

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ServerConfig,
    leads: LeadService,
}

impl AppState {
    /// Build state around an already wired [`LeadService`].
    #[must_use]
    pub fn new(config: ServerConfig, leads: LeadService) -> Self {
        Self {
            inner: Arc::new(AppStateInner { config, leads }),
        }
    }

    /// Wire the production store and gateway clients.
    ///
    /// # Errors
    ///
    /// Returns an error if a gateway HTTP client cannot be built.
    pub fn from_pool(config: ServerConfig, pool: PgPool) -> Result<Self, PaymentError> {
        let store = Arc::new(PgLeadStore::new(pool));
        let stripe = Arc::new(StripeClient::new(&config.stripe, &config.base_url)?);

        let mut leads = LeadService::new(store, stripe, config.stripe.checkout_host.clone());
        if let Some(paypal) = &config.paypal {
            leads = leads.with_paypal(Arc::new(PayPalClient::new(paypal, &config.base_url)?));
            tracing::info!("PayPal orders enabled");
        }

        Ok(Self::new(config, leads))
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn leads(&self) -> &LeadService {
        &self.inner.leads
    }
}
