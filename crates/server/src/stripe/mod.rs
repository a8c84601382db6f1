//! Stripe payment processor client and webhook verification.
//!
//! Two halves:
//! - [`StripeClient`] creates Checkout Sessions from catalog price
//!   references, round-tripping the order id through session metadata. That
//!   metadata field is the only linkage between the shop and the processor.
//! - [`webhook`] verifies inbound event signatures against the raw payload
//!   and parses the two event types settlement cares about.

mod client;
pub mod webhook;

pub use client::{CheckoutSession, PaymentGateway, SessionLineItem, SessionRequest, StripeClient};
pub use webhook::{SignatureError, WebhookEvent, WebhookVerifier};

use thiserror::Error;

/// Errors that can occur when interacting with the Stripe API.
#[derive(Debug, Error)]
pub enum StripeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Failed to parse a response or payload.
    #[error("parse error: {0}")]
    Parse(String),
}
