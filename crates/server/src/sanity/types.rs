//! Data shapes exchanged with the content store.

use chrono::{DateTime, Utc};
use ecometal_core::{CurrencyCode, OrderId, OrderStatus, Revision, UnitPrice, VariantId};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Map, Value, json};

/// Point-in-time view of a variant, read at reservation time.
///
/// Valid only until the next write to the variant; the revision ties the
/// snapshot to the state it was read from.
#[derive(Debug, Clone, Deserialize)]
pub struct VariantSnapshot {
    #[serde(rename = "_id")]
    pub id: VariantId,
    #[serde(rename = "_rev")]
    pub revision: Revision,
    #[serde(default)]
    pub stock: i64,
    pub price: Decimal,
    pub currency: CurrencyCode,
    /// Payment processor price reference. Absent means the variant has not
    /// been synced to the processor and cannot be purchased.
    #[serde(rename = "stripePriceId")]
    pub stripe_price_id: Option<String>,
    /// Product display name, dereferenced from the product document.
    pub title: String,
    pub format: Option<String>,
}

impl VariantSnapshot {
    /// The variant's unit price.
    #[must_use]
    pub const fn unit_price(&self) -> UnitPrice {
        UnitPrice::new(self.price, self.currency)
    }
}

/// An order line as stored on the order document.
///
/// Price id, title, and format are denormalized copies taken from the
/// variant snapshot at reservation time, so later catalog edits do not
/// change what the customer bought.
#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub variant_id: VariantId,
    pub quantity: u32,
    pub stripe_price_id: String,
    pub title: String,
    pub format: Option<String>,
}

/// A new order document, created in `pending`.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub customer_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub items: Vec<NewOrderItem>,
}

impl NewOrder {
    /// Serialize into the store's create-mutation document shape.
    #[must_use]
    pub fn to_document(&self) -> Value {
        let items: Vec<Value> = self
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                json!({
                    "_type": "orderItem",
                    "_key": format!("item-{i}"),
                    "variant": { "_type": "reference", "_ref": item.variant_id.as_str() },
                    "quantity": item.quantity,
                    "stripePriceId": item.stripe_price_id,
                    "title": item.title,
                    "format": item.format,
                })
            })
            .collect();

        json!({
            "_type": "order",
            "status": OrderStatus::Pending.as_str(),
            "createdAt": self.created_at.to_rfc3339(),
            "customerEmail": self.customer_email,
            "items": items,
        })
    }
}

/// Order revision and status, as read by [`super::ContentStore::order_status`].
#[derive(Debug, Clone, Deserialize)]
pub struct OrderStatusView {
    #[serde(rename = "_rev")]
    pub revision: Revision,
    pub status: OrderStatus,
}

/// Live stock and revision of a variant referenced by an order item.
#[derive(Debug, Clone, Deserialize)]
pub struct VariantStockRef {
    #[serde(rename = "_id")]
    pub id: VariantId,
    #[serde(rename = "_rev")]
    pub revision: Revision,
    #[serde(default)]
    pub stock: i64,
}

/// One order item joined with its variant's live stock.
#[derive(Debug, Clone, Deserialize)]
pub struct SettlementItem {
    pub quantity: u32,
    /// `None` when the referenced variant was deleted from the catalog;
    /// settlement treats that as zero stock.
    pub variant: Option<VariantStockRef>,
}

/// Single consistent read of an order plus the live inventory it touches.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderSettlementView {
    #[serde(rename = "_id")]
    pub id: OrderId,
    #[serde(rename = "_rev")]
    pub revision: Revision,
    pub status: OrderStatus,
    #[serde(default)]
    pub items: Vec<SettlementItem>,
}

/// Field updates for an order document.
///
/// Only the fields that are `Some` are written.
#[derive(Debug, Clone, Default)]
pub struct OrderPatch {
    pub status: Option<OrderStatus>,
    pub paid_at: Option<DateTime<Utc>>,
    pub stripe_checkout_session_id: Option<String>,
    pub stripe_payment_intent: Option<String>,
}

impl OrderPatch {
    /// The `set` object for the store's patch mutation.
    #[must_use]
    pub fn to_set_fields(&self) -> Map<String, Value> {
        let mut set = Map::new();
        if let Some(status) = self.status {
            set.insert("status".into(), json!(status.as_str()));
        }
        if let Some(paid_at) = self.paid_at {
            set.insert("paidAt".into(), json!(paid_at.to_rfc3339()));
        }
        if let Some(session_id) = &self.stripe_checkout_session_id {
            set.insert("stripeCheckoutSessionId".into(), json!(session_id));
        }
        if let Some(intent) = &self.stripe_payment_intent {
            set.insert("stripePaymentIntent".into(), json!(intent));
        }
        set
    }
}

/// One revision-guarded patch inside a [`Transaction`].
#[derive(Debug, Clone)]
pub struct ConditionalPatch {
    /// Target document id (order or variant).
    pub document_id: String,
    /// Revision the document must still carry for the patch to apply.
    pub expected_revision: Revision,
    /// Fields to set.
    pub set: Map<String, Value>,
    /// Numeric fields to decrement, e.g. `{"stock": 2}`.
    pub dec: Map<String, Value>,
}

/// An atomic multi-document transaction of conditional patches.
///
/// All-or-nothing: one failed revision guard rejects the whole commit.
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    pub patches: Vec<ConditionalPatch>,
}

impl Transaction {
    /// Add a revision-guarded stock decrement for a variant.
    pub fn dec_stock(&mut self, id: &VariantId, revision: &Revision, by: u32) {
        let mut dec = Map::new();
        dec.insert("stock".into(), json!(by));
        self.patches.push(ConditionalPatch {
            document_id: id.as_str().to_string(),
            expected_revision: revision.clone(),
            set: Map::new(),
            dec,
        });
    }

    /// Add a revision-guarded field update for an order.
    pub fn set_order(&mut self, id: &OrderId, revision: &Revision, patch: &OrderPatch) {
        self.patches.push(ConditionalPatch {
            document_id: id.as_str().to_string(),
            expected_revision: revision.clone(),
            set: patch.to_set_fields(),
            dec: Map::new(),
        });
    }
}
