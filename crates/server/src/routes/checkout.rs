//! Checkout session endpoint.

use axum::{Json, extract::State};
use ecometal_core::VariantId;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::checkout::CheckoutItem;
use crate::error::Result;
use crate::state::AppState;

/// Request body for `POST /api/checkout-session`.
#[derive(Debug, Deserialize)]
pub struct CheckoutSessionRequest {
    pub items: Vec<CheckoutSessionItem>,
    #[serde(default)]
    pub customer_email: Option<String>,
}

/// One requested line: a catalog variant and a quantity.
#[derive(Debug, Deserialize)]
pub struct CheckoutSessionItem {
    pub variant_id: String,
    pub quantity: u32,
}

/// Response body: where to send the customer to pay.
#[derive(Debug, Serialize)]
pub struct CheckoutSessionResponse {
    pub url: String,
}

/// Create a payment session for the requested items.
///
/// Validates quantities against a live stock snapshot and creates a pending
/// order; stock is not held until settlement.
#[instrument(skip_all, fields(items = request.items.len()))]
pub async fn create_checkout_session(
    State(state): State<AppState>,
    Json(request): Json<CheckoutSessionRequest>,
) -> Result<Json<CheckoutSessionResponse>> {
    let items: Vec<CheckoutItem> = request
        .items
        .iter()
        .map(|item| CheckoutItem {
            variant_id: VariantId::new(item.variant_id.clone()),
            quantity: item.quantity,
        })
        .collect();

    let redirect = state
        .checkout()
        .create_session(&items, request.customer_email)
        .await?;

    Ok(Json(CheckoutSessionResponse { url: redirect.url }))
}
