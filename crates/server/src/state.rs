//! Application state shared across handlers.

use std::sync::Arc;

use thiserror::Error;

use crate::checkout::{CheckoutService, RedirectUrls};
use crate::config::ServerConfig;
use crate::sanity::{ContentError, SanityClient};
use crate::settlement::SettlementReconciler;
use crate::stripe::{StripeClient, StripeError, WebhookVerifier};

/// Error building application state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("content store client: {0}")]
    Content(#[from] ContentError),
    #[error("stripe client: {0}")]
    Stripe(#[from] StripeError),
}

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`; both services share one content store
/// client so reservation and settlement observe the same store.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ServerConfig,
    checkout: CheckoutService<SanityClient, StripeClient>,
    reconciler: SettlementReconciler<SanityClient>,
    verifier: WebhookVerifier,
}

impl AppState {
    /// Create a new application state from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if either HTTP client fails to build.
    pub fn new(config: ServerConfig) -> Result<Self, StateError> {
        let store = Arc::new(SanityClient::new(&config.sanity)?);
        let gateway = Arc::new(StripeClient::new(&config.stripe)?);
        let urls = RedirectUrls::from_base_url(&config.base_url);

        let checkout = CheckoutService::new(Arc::clone(&store), gateway, urls);
        let reconciler = SettlementReconciler::new(store);
        let verifier = WebhookVerifier::new(config.stripe.webhook_secret.clone());

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                checkout,
                reconciler,
                verifier,
            }),
        })
    }

    /// Get a reference to the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Get a reference to the checkout reservation service.
    #[must_use]
    pub fn checkout(&self) -> &CheckoutService<SanityClient, StripeClient> {
        &self.inner.checkout
    }

    /// Get a reference to the settlement reconciler.
    #[must_use]
    pub fn reconciler(&self) -> &SettlementReconciler<SanityClient> {
        &self.inner.reconciler
    }

    /// Get a reference to the webhook signature verifier.
    #[must_use]
    pub fn verifier(&self) -> &WebhookVerifier {
        &self.inner.verifier
    }
}
