//! Stripe Checkout Session client.

use async_trait::async_trait;
use ecometal_core::OrderId;
use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::instrument;

use crate::config::StripeConfig;

use super::StripeError;

/// Stripe API base URL.
const BASE_URL: &str = "https://api.stripe.com/v1";

/// One line of a checkout session, referencing a catalog-synced price.
///
/// Only price references are accepted here; there is deliberately no way to
/// submit an ad-hoc amount. Prices resolved from the catalog are the only
/// trust domain settlement will honor.
#[derive(Debug, Clone)]
pub struct SessionLineItem {
    pub price_id: String,
    pub quantity: u32,
}

/// Request to create a checkout session.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    /// Order id round-tripped through session metadata; the webhook returns
    /// it verbatim and it is the only linkage between the two systems.
    pub order_id: OrderId,
    pub line_items: Vec<SessionLineItem>,
    pub customer_email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
}

/// A created checkout session.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    /// Session id (`cs_...`).
    pub id: String,
    /// Hosted checkout page the customer is redirected to.
    pub url: String,
}

/// Creates payment sessions with the payment processor.
///
/// The seam exists so protocol tests can run the checkout flow without
/// talking to Stripe.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a hosted checkout session.
    async fn create_checkout_session(
        &self,
        request: &SessionRequest,
    ) -> Result<CheckoutSession, StripeError>;
}

/// Client for the Stripe API.
#[derive(Clone)]
pub struct StripeClient {
    client: reqwest::Client,
}

impl StripeClient {
    /// Create a new Stripe API client.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret key is not a valid header value or
    /// the HTTP client fails to build.
    pub fn new(config: &StripeConfig) -> Result<Self, StripeError> {
        let mut headers = HeaderMap::new();
        let auth_value = format!("Bearer {}", config.secret_key.expose_secret());
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&auth_value)
                .map_err(|e| StripeError::Parse(format!("invalid secret key: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PaymentGateway for StripeClient {
    #[instrument(skip_all, fields(order_id = %request.order_id, lines = request.line_items.len()))]
    async fn create_checkout_session(
        &self,
        request: &SessionRequest,
    ) -> Result<CheckoutSession, StripeError> {
        let mut form: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("success_url".into(), request.success_url.clone()),
            ("cancel_url".into(), request.cancel_url.clone()),
            (
                "metadata[orderId]".into(),
                request.order_id.as_str().to_string(),
            ),
        ];

        if let Some(email) = &request.customer_email {
            form.push(("customer_email".into(), email.clone()));
        }

        for (i, line) in request.line_items.iter().enumerate() {
            form.push((format!("line_items[{i}][price]"), line.price_id.clone()));
            form.push((format!("line_items[{i}][quantity]"), line.quantity.to_string()));
        }

        let url = format!("{BASE_URL}/checkout/sessions");
        let response = self.client.post(&url).form(&form).send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StripeError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| StripeError::Parse(e.to_string()))
    }
}
