//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures errors to Sentry before
//! responding to the client. All route handlers return `Result<T, AppError>`.
//!
//! The mapping encodes the settlement contract from two sides: reservation
//! failures surface synchronously to the caller, while webhook handling only
//! returns non-success for transport and auth faults so the processor
//! redelivers - business outcomes like out-of-stock are recorded, not
//! rejected.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::checkout::CheckoutError;
use crate::sanity::ContentError;
use crate::stripe::{SignatureError, StripeError};

/// Application-level error type for the server.
#[derive(Debug, Error)]
pub enum AppError {
    /// Checkout reservation failed.
    #[error("Checkout error: {0}")]
    Checkout(#[from] CheckoutError),

    /// Content store operation failed.
    #[error("Content store error: {0}")]
    Content(#[from] ContentError),

    /// Stripe API operation failed.
    #[error("Stripe error: {0}")]
    Stripe(#[from] StripeError),

    /// Webhook signature rejected.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<SignatureError> for AppError {
    fn from(err: SignatureError) -> Self {
        Self::Unauthorized(err.to_string())
    }
}

impl AppError {
    const fn is_server_fault(&self) -> bool {
        match self {
            Self::Content(_) | Self::Stripe(_) | Self::Internal(_) => true,
            Self::Checkout(err) => matches!(
                err,
                CheckoutError::Content(_)
                    | CheckoutError::Payment(_)
                    | CheckoutError::InvalidPrice { .. }
            ),
            Self::Unauthorized(_) | Self::BadRequest(_) => false,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Capture server faults to Sentry
        if self.is_server_fault() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        let status = match &self {
            Self::Checkout(err) => match err {
                CheckoutError::InvalidRequest(_) | CheckoutError::NotPurchasable(_) => {
                    StatusCode::BAD_REQUEST
                }
                CheckoutError::InsufficientStock { .. } => StatusCode::CONFLICT,
                CheckoutError::InvalidPrice { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                CheckoutError::Content(_) | CheckoutError::Payment(_) => StatusCode::BAD_GATEWAY,
            },
            Self::Content(_) | Self::Stripe(_) => StatusCode::BAD_GATEWAY,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Don't expose internal error details to clients
        let message = match &self {
            Self::Content(_) | Self::Stripe(_) | Self::Internal(_) => {
                "Internal server error".to_string()
            }
            Self::Checkout(err) => match err {
                CheckoutError::Content(_) | CheckoutError::Payment(_) => {
                    "External service error".to_string()
                }
                CheckoutError::InvalidPrice { .. } => "Internal server error".to_string(),
                _ => err.to_string(),
            },
            _ => self.to_string(),
        };

        (status, message).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;
