//! Stripe webhook endpoint.
//!
//! The body is taken as raw bytes and the signature is verified against
//! those exact bytes before anything is parsed. Once an event is verified,
//! every business outcome acknowledges with 2xx - a non-success response is
//! reserved for auth and store faults, where a redelivery can actually help.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use crate::error::{AppError, Result};
use crate::orders::PaymentRefs;
use crate::state::AppState;
use crate::stripe::{WebhookEvent, webhook};

/// Header carrying the payload signature.
const SIGNATURE_HEADER: &str = "stripe-signature";

/// Handle a webhook delivery.
#[instrument(skip_all)]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>> {
    // Fail closed: no signature header, no parsing
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing stripe-signature header".into()))?;

    state.verifier().verify(&body, signature)?;

    // Only now is the payload trusted enough to parse. A verified payload
    // that still fails to parse is acknowledged: redelivering the same
    // bytes cannot help, and non-success is reserved for faults a retry
    // can fix.
    let event = match webhook::parse_event(&body) {
        Ok(event) => event,
        Err(error) => {
            warn!(%error, "verified payload failed to parse, acknowledging");
            return Ok(Json(json!({ "received": true })));
        }
    };

    match event {
        WebhookEvent::Completed {
            session_id,
            payment_status,
            order_id,
            payment_intent,
        } => {
            // Completed sessions that were never paid settle nothing
            if payment_status.as_deref() != Some("paid") {
                info!(%session_id, ?payment_status, "completed event without payment, ignoring");
                return Ok(Json(json!({ "received": true })));
            }

            let Some(order_id) = order_id else {
                warn!(%session_id, "completed event without orderId metadata");
                return Ok(Json(json!({ "received": true })));
            };

            let refs = PaymentRefs {
                checkout_session_id: Some(session_id),
                payment_intent,
            };
            let outcome = state.reconciler().settle_completed(&order_id, &refs).await?;
            info!(%order_id, ?outcome, "completed event processed");
        }
        WebhookEvent::Expired {
            session_id,
            order_id,
        } => {
            if let Some(order_id) = order_id {
                let outcome = state.reconciler().settle_expired(&order_id).await?;
                info!(%order_id, ?outcome, "expired event processed");
            } else {
                info!(%session_id, "expired event without orderId metadata, ignoring");
            }
        }
        WebhookEvent::Other(event_type) => {
            info!(%event_type, "unhandled event type, ignoring");
        }
    }

    Ok(Json(json!({ "received": true })))
}
