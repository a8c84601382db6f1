//! In-memory [`ContentStore`] with real revision bookkeeping.
//!
//! Backs the protocol tests. Semantics match the hosted store where it
//! matters for the settlement protocol: every write bumps the document
//! revision, conditional writes compare-and-reject, and a transaction is
//! all-or-nothing. [`MemoryStore::fail_commits`] additionally forces the
//! next *n* transactions to report a conflict, which makes write races
//! deterministic to reproduce in tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ecometal_core::{CurrencyCode, OrderId, OrderStatus, Revision, VariantId};
use rust_decimal::Decimal;
use serde_json::{Map, Value};

use super::types::{
    NewOrder, NewOrderItem, OrderPatch, OrderSettlementView, OrderStatusView, SettlementItem,
    Transaction, VariantSnapshot, VariantStockRef,
};
use super::{ContentError, ContentStore};

/// A variant document seeded into the store.
#[derive(Debug, Clone)]
pub struct SeedVariant {
    pub id: VariantId,
    pub stock: i64,
    pub price: Decimal,
    pub currency: CurrencyCode,
    pub stripe_price_id: Option<String>,
    pub title: String,
    pub format: Option<String>,
}

impl SeedVariant {
    /// A purchasable variant with a derived price reference.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>, stock: i64, price: i64) -> Self {
        let id = VariantId::new(id);
        let stripe_price_id = Some(format!("price_{id}"));
        Self {
            id,
            stock,
            price: Decimal::from(price),
            currency: CurrencyCode::Mxn,
            stripe_price_id,
            title: title.into(),
            format: None,
        }
    }

    /// Remove the payment processor price reference, making the variant
    /// unpurchasable.
    #[must_use]
    pub fn without_price_id(mut self) -> Self {
        self.stripe_price_id = None;
        self
    }
}

#[derive(Debug, Clone)]
struct VariantDoc {
    revision: Revision,
    stock: i64,
    price: Decimal,
    currency: CurrencyCode,
    stripe_price_id: Option<String>,
    title: String,
    format: Option<String>,
}

/// An order document as held by the store, exposed for test assertions.
#[derive(Debug, Clone)]
pub struct StoredOrder {
    pub revision: Revision,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub customer_email: Option<String>,
    pub items: Vec<NewOrderItem>,
    pub stripe_checkout_session_id: Option<String>,
    pub stripe_payment_intent: Option<String>,
}

#[derive(Default)]
struct Inner {
    variants: HashMap<VariantId, VariantDoc>,
    orders: HashMap<OrderId, StoredOrder>,
    rev_counter: u64,
    id_counter: u64,
}

impl Inner {
    fn next_revision(&mut self) -> Revision {
        self.rev_counter += 1;
        Revision::new(format!("rev-{}", self.rev_counter))
    }
}

/// In-memory content store for tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    forced_conflicts: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a variant document.
    pub fn add_variant(&self, seed: SeedVariant) {
        let mut inner = self.lock();
        let revision = inner.next_revision();
        inner.variants.insert(
            seed.id,
            VariantDoc {
                revision,
                stock: seed.stock,
                price: seed.price,
                currency: seed.currency,
                stripe_price_id: seed.stripe_price_id,
                title: seed.title,
                format: seed.format,
            },
        );
    }

    /// Bump a variant's revision without changing its data, simulating an
    /// unrelated catalog edit racing with settlement.
    pub fn touch_variant(&self, id: &VariantId) {
        let mut inner = self.lock();
        let revision = inner.next_revision();
        if let Some(doc) = inner.variants.get_mut(id) {
            doc.revision = revision;
        }
    }

    /// Force the next `n` transaction commits to fail with a conflict,
    /// regardless of their revision guards.
    pub fn fail_commits(&self, n: usize) {
        self.forced_conflicts.store(n, Ordering::SeqCst);
    }

    /// Current stock of a variant.
    #[must_use]
    pub fn stock_of(&self, id: &VariantId) -> Option<i64> {
        self.lock().variants.get(id).map(|doc| doc.stock)
    }

    /// Snapshot of an order document.
    #[must_use]
    pub fn order(&self, id: &OrderId) -> Option<StoredOrder> {
        self.lock().orders.get(id).cloned()
    }

    fn take_forced_conflict(&self) -> bool {
        self.forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Apply a commit's `set` fields to an order document.
fn apply_set_to_order(order: &mut StoredOrder, set: &Map<String, Value>) -> Result<(), ContentError> {
    for (field, value) in set {
        match field.as_str() {
            "status" => {
                order.status = serde_json::from_value(value.clone())
                    .map_err(|e| ContentError::Parse(e.to_string()))?;
            }
            "paidAt" => {
                let raw = value
                    .as_str()
                    .ok_or_else(|| ContentError::Parse("paidAt must be a string".to_string()))?;
                let parsed = DateTime::parse_from_rfc3339(raw)
                    .map_err(|e| ContentError::Parse(e.to_string()))?;
                order.paid_at = Some(parsed.with_timezone(&Utc));
            }
            "stripeCheckoutSessionId" => {
                order.stripe_checkout_session_id = value.as_str().map(String::from);
            }
            "stripePaymentIntent" => {
                order.stripe_payment_intent = value.as_str().map(String::from);
            }
            other => {
                return Err(ContentError::Parse(format!("unknown order field: {other}")));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn variant_snapshots(
        &self,
        ids: &[VariantId],
    ) -> Result<Vec<VariantSnapshot>, ContentError> {
        let inner = self.lock();
        Ok(ids
            .iter()
            .filter_map(|id| {
                inner.variants.get(id).map(|doc| VariantSnapshot {
                    id: id.clone(),
                    revision: doc.revision.clone(),
                    stock: doc.stock,
                    price: doc.price,
                    currency: doc.currency,
                    stripe_price_id: doc.stripe_price_id.clone(),
                    title: doc.title.clone(),
                    format: doc.format.clone(),
                })
            })
            .collect())
    }

    async fn create_order(&self, order: &NewOrder) -> Result<OrderId, ContentError> {
        let mut inner = self.lock();
        inner.id_counter += 1;
        let id = OrderId::new(format!("order-{}", inner.id_counter));
        let revision = inner.next_revision();
        inner.orders.insert(
            id.clone(),
            StoredOrder {
                revision,
                status: OrderStatus::Pending,
                created_at: order.created_at,
                paid_at: None,
                customer_email: order.customer_email.clone(),
                items: order.items.clone(),
                stripe_checkout_session_id: None,
                stripe_payment_intent: None,
            },
        );
        Ok(id)
    }

    async fn order_for_settlement(
        &self,
        id: &OrderId,
    ) -> Result<Option<OrderSettlementView>, ContentError> {
        let inner = self.lock();
        let Some(order) = inner.orders.get(id) else {
            return Ok(None);
        };

        let items = order
            .items
            .iter()
            .map(|item| SettlementItem {
                quantity: item.quantity,
                variant: inner
                    .variants
                    .get(&item.variant_id)
                    .map(|doc| VariantStockRef {
                        id: item.variant_id.clone(),
                        revision: doc.revision.clone(),
                        stock: doc.stock,
                    }),
            })
            .collect();

        Ok(Some(OrderSettlementView {
            id: id.clone(),
            revision: order.revision.clone(),
            status: order.status,
            items,
        }))
    }

    async fn order_status(&self, id: &OrderId) -> Result<Option<OrderStatusView>, ContentError> {
        let inner = self.lock();
        Ok(inner.orders.get(id).map(|order| OrderStatusView {
            revision: order.revision.clone(),
            status: order.status,
        }))
    }

    async fn patch_order(
        &self,
        id: &OrderId,
        expected: Option<&Revision>,
        patch: OrderPatch,
    ) -> Result<(), ContentError> {
        let mut inner = self.lock();
        let revision = inner.next_revision();
        let order = inner
            .orders
            .get_mut(id)
            .ok_or_else(|| ContentError::NotFound(id.to_string()))?;

        if let Some(expected) = expected
            && *expected != order.revision
        {
            return Err(ContentError::Conflict);
        }

        apply_set_to_order(order, &patch.to_set_fields())?;
        order.revision = revision;
        Ok(())
    }

    async fn commit(&self, tx: Transaction) -> Result<(), ContentError> {
        if self.take_forced_conflict() {
            return Err(ContentError::Conflict);
        }

        let mut inner = self.lock();

        // Validate every revision guard before applying anything
        for patch in &tx.patches {
            let variant_id = VariantId::new(patch.document_id.clone());
            let order_id = OrderId::new(patch.document_id.clone());

            let current = inner
                .variants
                .get(&variant_id)
                .map(|doc| &doc.revision)
                .or_else(|| inner.orders.get(&order_id).map(|o| &o.revision))
                .ok_or_else(|| ContentError::NotFound(patch.document_id.clone()))?;

            if *current != patch.expected_revision {
                return Err(ContentError::Conflict);
            }
        }

        for patch in &tx.patches {
            let revision = inner.next_revision();
            let variant_id = VariantId::new(patch.document_id.clone());
            if let Some(doc) = inner.variants.get_mut(&variant_id) {
                if let Some(by) = patch.dec.get("stock").and_then(Value::as_i64) {
                    doc.stock -= by;
                }
                doc.revision = revision;
                continue;
            }

            let order_id = OrderId::new(patch.document_id.clone());
            if let Some(order) = inner.orders.get_mut(&order_id) {
                apply_set_to_order(order, &patch.set)?;
                order.revision = revision;
            }
        }

        Ok(())
    }
}
