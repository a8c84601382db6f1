//! HTTP route handlers.

pub mod checkout;
pub mod webhook;

use axum::{Router, routing::get, routing::post};

use crate::state::AppState;

/// Build the application router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/checkout-session", post(checkout::create_checkout_session))
        .route("/api/stripe-webhook", post(webhook::stripe_webhook))
}

/// Liveness probe.
async fn health() -> &'static str {
    "ok"
}
