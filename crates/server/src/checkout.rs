//! Checkout reservation service.
//!
//! Validates a requested cart against live inventory and opens a payment
//! session for it. The stock check here is a point-in-time snapshot, not a
//! reservation: nothing is held or decremented until settlement re-validates
//! against whatever stock is left at payment time. A pending order carries
//! no stock liability, so an order orphaned by a failed session creation is
//! harmless.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use ecometal_core::{OrderId, PriceError, VariantId};
use thiserror::Error;
use tracing::{instrument, warn};

use crate::orders::OrderLedger;
use crate::sanity::{ContentError, ContentStore, NewOrder, NewOrderItem, VariantSnapshot};
use crate::stripe::{PaymentGateway, SessionLineItem, SessionRequest, StripeError};

/// Errors returned from checkout session creation.
///
/// `InvalidRequest`, `InsufficientStock`, and `NotPurchasable` are
/// client/business rejections with no side effects; `InvalidPrice` is a
/// catalog data fault; `Content` and `Payment` are upstream faults.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Malformed input: empty cart, zero quantity, or unknown variant.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Requested more than the current snapshot has.
    #[error("insufficient stock for {variant_id}: requested {requested}, available {available}")]
    InsufficientStock {
        variant_id: VariantId,
        requested: u32,
        available: i64,
    },

    /// Variant has no payment processor price reference.
    #[error("variant {0} is not purchasable")]
    NotPurchasable(VariantId),

    /// Catalog price failed plausibility checks; the variant document needs
    /// fixing before it can be sold.
    #[error("invalid catalog price on {variant_id}: {source}")]
    InvalidPrice {
        variant_id: VariantId,
        source: PriceError,
    },

    /// Content store failure.
    #[error(transparent)]
    Content(#[from] ContentError),

    /// Payment processor failure.
    #[error(transparent)]
    Payment(#[from] StripeError),
}

/// One requested cart line.
#[derive(Debug, Clone)]
pub struct CheckoutItem {
    pub variant_id: VariantId,
    pub quantity: u32,
}

/// A validated checkout, ready for redirect.
#[derive(Debug, Clone)]
pub struct CheckoutRedirect {
    pub order_id: OrderId,
    pub url: String,
}

/// Redirect targets passed to the payment processor.
#[derive(Debug, Clone)]
pub struct RedirectUrls {
    pub success_url: String,
    pub cancel_url: String,
}

impl RedirectUrls {
    /// Build the shop's standard redirect targets from its public base URL.
    #[must_use]
    pub fn from_base_url(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            success_url: format!("{base}/pago-exitoso?session_id={{CHECKOUT_SESSION_ID}}"),
            cancel_url: format!("{base}/pago-cancelado"),
        }
    }
}

/// Validates carts and opens payment sessions.
pub struct CheckoutService<S, P> {
    store: Arc<S>,
    ledger: OrderLedger<S>,
    gateway: Arc<P>,
    urls: RedirectUrls,
}

impl<S: ContentStore, P: PaymentGateway> CheckoutService<S, P> {
    /// Create the service.
    pub fn new(store: Arc<S>, gateway: Arc<P>, urls: RedirectUrls) -> Self {
        let ledger = OrderLedger::new(Arc::clone(&store));
        Self {
            store,
            ledger,
            gateway,
            urls,
        }
    }

    /// Validate the requested items and open a checkout session.
    ///
    /// Lines repeating the same variant are merged, so stock is checked
    /// against the cart's total quantity per variant.
    ///
    /// On success a `pending` order exists with denormalized line data and
    /// the session id recorded, and the returned URL is where the customer
    /// pays. All failures before order creation leave no writes behind.
    ///
    /// # Errors
    ///
    /// See [`CheckoutError`].
    #[instrument(skip_all, fields(items = items.len()))]
    pub async fn create_session(
        &self,
        items: &[CheckoutItem],
        customer_email: Option<String>,
    ) -> Result<CheckoutRedirect, CheckoutError> {
        if items.is_empty() {
            return Err(CheckoutError::InvalidRequest("no items provided".into()));
        }
        if let Some(item) = items.iter().find(|item| item.quantity < 1) {
            return Err(CheckoutError::InvalidRequest(format!(
                "quantity must be at least 1 for {}",
                item.variant_id
            )));
        }

        // A cart may repeat a variant across lines; merge them so stock is
        // validated against the total, not per line
        let mut merged: Vec<CheckoutItem> = Vec::with_capacity(items.len());
        let mut positions: HashMap<VariantId, usize> = HashMap::new();
        for item in items {
            if let Some(&at) = positions.get(&item.variant_id) {
                if let Some(line) = merged.get_mut(at) {
                    line.quantity += item.quantity;
                }
            } else {
                positions.insert(item.variant_id.clone(), merged.len());
                merged.push(item.clone());
            }
        }

        // One snapshot query for every requested variant
        let ids: Vec<VariantId> = merged.iter().map(|item| item.variant_id.clone()).collect();
        let snapshots: HashMap<VariantId, VariantSnapshot> = self
            .store
            .variant_snapshots(&ids)
            .await?
            .into_iter()
            .map(|snapshot| (snapshot.id.clone(), snapshot))
            .collect();

        let mut order_items = Vec::with_capacity(merged.len());
        let mut line_items = Vec::with_capacity(merged.len());

        for item in &merged {
            let snapshot = snapshots.get(&item.variant_id).ok_or_else(|| {
                CheckoutError::InvalidRequest(format!("unknown variant {}", item.variant_id))
            })?;

            if snapshot.stock < i64::from(item.quantity) {
                return Err(CheckoutError::InsufficientStock {
                    variant_id: item.variant_id.clone(),
                    requested: item.quantity,
                    available: snapshot.stock,
                });
            }

            let Some(price_id) = &snapshot.stripe_price_id else {
                return Err(CheckoutError::NotPurchasable(item.variant_id.clone()));
            };

            // Refuse to sell against a miskeyed catalog price (negative, or
            // centavos typed into the major-unit field)
            snapshot.unit_price().to_minor_units().map_err(|source| {
                CheckoutError::InvalidPrice {
                    variant_id: item.variant_id.clone(),
                    source,
                }
            })?;

            order_items.push(NewOrderItem {
                variant_id: item.variant_id.clone(),
                quantity: item.quantity,
                stripe_price_id: price_id.clone(),
                title: snapshot.title.clone(),
                format: snapshot.format.clone(),
            });
            line_items.push(SessionLineItem {
                price_id: price_id.clone(),
                quantity: item.quantity,
            });
        }

        let order = NewOrder {
            customer_email: customer_email.clone(),
            created_at: Utc::now(),
            items: order_items,
        };
        let order_id = self.ledger.create_pending(&order).await?;

        let session = self
            .gateway
            .create_checkout_session(&SessionRequest {
                order_id: order_id.clone(),
                line_items,
                customer_email,
                success_url: self.urls.success_url.clone(),
                cancel_url: self.urls.cancel_url.clone(),
            })
            .await?;

        // Losing this write only loses a back-reference; the webhook carries
        // the session id again at settlement time.
        if let Err(error) = self.ledger.record_session(&order_id, &session.id).await {
            warn!(%order_id, %error, "failed to record session id on order");
        }

        Ok(CheckoutRedirect {
            order_id,
            url: session.url,
        })
    }
}
