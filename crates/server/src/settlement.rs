//! Settlement reconciler - commits payment against live inventory.
//!
//! This is the authority the soft reservation in `checkout` defers to. The
//! store has no "decrement only if stock >= n" primitive, so settlement is
//! built from the one concurrency primitive it does have, revision-guarded
//! writes:
//!
//! 1. read the order and every referenced variant's stock in one query,
//!    capturing all revisions;
//! 2. re-validate stock against the quantities ordered;
//! 3. commit one all-or-nothing transaction of decrements and the paid
//!    status write, each conditioned on the revision read in step 1.
//!
//! A concurrent settlement or catalog edit between steps 1 and 3 fails the
//! commit; the whole sequence is then retried exactly once with fresh
//! revisions. The single retry absorbs the common one-writer collision
//! while keeping webhook latency bounded; an order that still cannot commit
//! is closed as `out_of_stock` rather than retried indefinitely.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use ecometal_core::{OrderId, OrderStatus, VariantId};
use tracing::{info, instrument, warn};

use crate::orders::{OrderLedger, PaymentRefs, TerminalWrite};
use crate::sanity::{ContentError, ContentStore, OrderSettlementView};

/// Conflict retries after the initial attempt.
///
/// A policy constant, not a protocol limit; kept at one so a synchronous
/// webhook handler never loops under contention.
pub const MAX_CONFLICT_RETRIES: usize = 1;

/// How a settlement attempt concluded. Every variant is an acknowledged
/// business outcome, not an error; only store faults propagate as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// Stock decremented and order marked paid.
    Paid,
    /// Stock was gone (or the commit kept conflicting); order closed as
    /// out of stock.
    OutOfStock,
    /// Order already in a terminal state; duplicate delivery absorbed.
    AlreadySettled(OrderStatus),
    /// Event referenced an order this shop does not know.
    UnknownOrder,
    /// Order marked expired.
    Expired,
}

/// Reconciles verified payment events against orders and inventory.
pub struct SettlementReconciler<S> {
    store: Arc<S>,
    ledger: OrderLedger<S>,
}

impl<S: ContentStore> SettlementReconciler<S> {
    /// Create a reconciler over a content store.
    pub fn new(store: Arc<S>) -> Self {
        let ledger = OrderLedger::new(Arc::clone(&store));
        Self { store, ledger }
    }

    /// Settle a `completed` payment event.
    ///
    /// Idempotent: unknown orders and orders already in a terminal state are
    /// no-ops, so processor-level redeliveries are safe.
    ///
    /// # Errors
    ///
    /// Only store faults; business outcomes are in [`SettlementOutcome`].
    #[instrument(skip(self, refs))]
    pub async fn settle_completed(
        &self,
        order_id: &OrderId,
        refs: &PaymentRefs,
    ) -> Result<SettlementOutcome, ContentError> {
        for attempt in 0..=MAX_CONFLICT_RETRIES {
            let Some(view) = self.store.order_for_settlement(order_id).await? else {
                info!(%order_id, "completed event for unknown order, ignoring");
                return Ok(SettlementOutcome::UnknownOrder);
            };

            if view.status.is_terminal() {
                info!(%order_id, status = %view.status, "order already settled, ignoring");
                return Ok(SettlementOutcome::AlreadySettled(view.status));
            }

            // Stock may have been consumed by a concurrent order between
            // reservation and settlement; expected, not an error.
            if let Some((variant_id, available, requested)) = stock_shortfall(&view) {
                info!(
                    %order_id, %variant_id, available, requested,
                    "stock consumed before settlement, closing order"
                );
                self.close_out_of_stock(order_id, refs).await?;
                return Ok(SettlementOutcome::OutOfStock);
            }

            match self.ledger.settle_paid(&view, refs, Utc::now()).await {
                Ok(()) => {
                    info!(%order_id, "order settled");
                    return Ok(SettlementOutcome::Paid);
                }
                Err(ContentError::Conflict) => {
                    warn!(%order_id, attempt, "settlement commit conflicted");
                }
                Err(error) => return Err(error),
            }
        }

        // Retry budget spent; close the order instead of looping under
        // contention. Starvation here is an accepted trade-off.
        warn!(%order_id, "settlement still conflicting after retry, closing order");
        self.close_out_of_stock(order_id, refs).await?;
        Ok(SettlementOutcome::OutOfStock)
    }

    /// Settle an `expired` session event: status-only write, no stock read.
    ///
    /// # Errors
    ///
    /// Only store faults.
    #[instrument(skip(self))]
    pub async fn settle_expired(&self, order_id: &OrderId) -> Result<SettlementOutcome, ContentError> {
        match self
            .ledger
            .mark_terminal(order_id, OrderStatus::Expired, &PaymentRefs::default())
            .await?
        {
            TerminalWrite::Applied => {
                info!(%order_id, "order expired");
                Ok(SettlementOutcome::Expired)
            }
            TerminalWrite::AlreadyTerminal(status) => {
                Ok(SettlementOutcome::AlreadySettled(status))
            }
            TerminalWrite::Missing => Ok(SettlementOutcome::UnknownOrder),
        }
    }

    async fn close_out_of_stock(
        &self,
        order_id: &OrderId,
        refs: &PaymentRefs,
    ) -> Result<(), ContentError> {
        self.ledger
            .mark_terminal(order_id, OrderStatus::OutOfStock, refs)
            .await?;
        Ok(())
    }
}

/// A variant whose stock cannot cover the total quantity ordered, summed
/// across items in case the order repeats a variant.
///
/// A deleted variant counts as zero stock.
fn stock_shortfall(view: &OrderSettlementView) -> Option<(VariantId, i64, u32)> {
    let mut totals: HashMap<&VariantId, (i64, u32)> = HashMap::new();
    for item in &view.items {
        let Some(variant) = &item.variant else {
            return Some((VariantId::new("<deleted>"), 0, item.quantity));
        };
        let entry = totals.entry(&variant.id).or_insert((variant.stock, 0));
        entry.1 += item.quantity;
    }

    totals
        .into_iter()
        .find(|&(_, (stock, requested))| stock < i64::from(requested))
        .map(|(id, (stock, requested))| (id.clone(), stock, requested))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanity::{MemoryStore, NewOrder, NewOrderItem, SeedVariant};
    use ecometal_core::VariantId;

    async fn seed_order(store: &Arc<MemoryStore>, variant: &str, quantity: u32) -> OrderId {
        let order = NewOrder {
            customer_email: None,
            created_at: Utc::now(),
            items: vec![NewOrderItem {
                variant_id: VariantId::new(variant),
                quantity,
                stripe_price_id: format!("price_{variant}"),
                title: "Painkiller".into(),
                format: Some("Vinyl".into()),
            }],
        };
        store.create_order(&order).await.expect("create")
    }

    fn refs(session: &str) -> PaymentRefs {
        PaymentRefs {
            checkout_session_id: Some(session.to_string()),
            payment_intent: Some("pi_1".to_string()),
        }
    }

    #[tokio::test]
    async fn test_settles_and_decrements_stock() {
        let store = Arc::new(MemoryStore::new());
        store.add_variant(SeedVariant::new("variant-1", "Painkiller", 5, 450));
        let order_id = seed_order(&store, "variant-1", 2).await;
        let reconciler = SettlementReconciler::new(Arc::clone(&store));

        let outcome = reconciler
            .settle_completed(&order_id, &refs("cs_1"))
            .await
            .expect("settle");

        assert_eq!(outcome, SettlementOutcome::Paid);
        assert_eq!(store.stock_of(&VariantId::new("variant-1")), Some(3));
        let order = store.order(&order_id).expect("stored");
        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.stripe_checkout_session_id.as_deref(), Some("cs_1"));
    }

    #[tokio::test]
    async fn test_unknown_order_ignored() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = SettlementReconciler::new(store);

        let outcome = reconciler
            .settle_completed(&OrderId::new("order-ghost"), &refs("cs_1"))
            .await
            .expect("settle");
        assert_eq!(outcome, SettlementOutcome::UnknownOrder);
    }

    #[tokio::test]
    async fn test_duplicate_completed_event_is_noop() {
        let store = Arc::new(MemoryStore::new());
        store.add_variant(SeedVariant::new("variant-1", "Painkiller", 5, 450));
        let order_id = seed_order(&store, "variant-1", 1).await;
        let reconciler = SettlementReconciler::new(Arc::clone(&store));

        let first = reconciler
            .settle_completed(&order_id, &refs("cs_1"))
            .await
            .expect("settle");
        assert_eq!(first, SettlementOutcome::Paid);

        let second = reconciler
            .settle_completed(&order_id, &refs("cs_1"))
            .await
            .expect("settle");
        assert_eq!(second, SettlementOutcome::AlreadySettled(OrderStatus::Paid));

        // Paid exactly once: stock decremented exactly once
        assert_eq!(store.stock_of(&VariantId::new("variant-1")), Some(4));
    }

    #[tokio::test]
    async fn test_stock_shortfall_closes_order_without_decrement() {
        let store = Arc::new(MemoryStore::new());
        store.add_variant(SeedVariant::new("variant-1", "Painkiller", 1, 450));
        let order_id = seed_order(&store, "variant-1", 2).await;
        let reconciler = SettlementReconciler::new(Arc::clone(&store));

        let outcome = reconciler
            .settle_completed(&order_id, &refs("cs_1"))
            .await
            .expect("settle");

        assert_eq!(outcome, SettlementOutcome::OutOfStock);
        assert_eq!(store.stock_of(&VariantId::new("variant-1")), Some(1));
        let order = store.order(&order_id).expect("stored");
        assert_eq!(order.status, OrderStatus::OutOfStock);
        assert_eq!(order.stripe_checkout_session_id.as_deref(), Some("cs_1"));
    }

    async fn seed_order_with_repeated_variant(
        store: &Arc<MemoryStore>,
        variant: &str,
        quantities: &[u32],
    ) -> OrderId {
        let order = NewOrder {
            customer_email: None,
            created_at: Utc::now(),
            items: quantities
                .iter()
                .map(|&quantity| NewOrderItem {
                    variant_id: VariantId::new(variant),
                    quantity,
                    stripe_price_id: format!("price_{variant}"),
                    title: "Painkiller".into(),
                    format: Some("Vinyl".into()),
                })
                .collect(),
        };
        store.create_order(&order).await.expect("create")
    }

    #[tokio::test]
    async fn test_repeated_variant_items_checked_against_total() {
        let store = Arc::new(MemoryStore::new());
        store.add_variant(SeedVariant::new("variant-1", "Painkiller", 4, 450));
        // Each item fits on its own; together they exceed stock
        let order_id = seed_order_with_repeated_variant(&store, "variant-1", &[3, 3]).await;
        let reconciler = SettlementReconciler::new(Arc::clone(&store));

        let outcome = reconciler
            .settle_completed(&order_id, &refs("cs_1"))
            .await
            .expect("settle");

        assert_eq!(outcome, SettlementOutcome::OutOfStock);
        assert_eq!(store.stock_of(&VariantId::new("variant-1")), Some(4));
        assert_eq!(
            store.order(&order_id).expect("stored").status,
            OrderStatus::OutOfStock
        );
    }

    #[tokio::test]
    async fn test_repeated_variant_items_decrement_once() {
        let store = Arc::new(MemoryStore::new());
        store.add_variant(SeedVariant::new("variant-1", "Painkiller", 5, 450));
        let order_id = seed_order_with_repeated_variant(&store, "variant-1", &[2, 2]).await;
        let reconciler = SettlementReconciler::new(Arc::clone(&store));

        let outcome = reconciler
            .settle_completed(&order_id, &refs("cs_1"))
            .await
            .expect("settle");

        assert_eq!(outcome, SettlementOutcome::Paid);
        assert_eq!(store.stock_of(&VariantId::new("variant-1")), Some(1));
    }

    #[tokio::test]
    async fn test_deleted_variant_counts_as_zero_stock() {
        let store = Arc::new(MemoryStore::new());
        // Order references a variant that no longer exists
        let order_id = seed_order(&store, "variant-gone", 1).await;
        let reconciler = SettlementReconciler::new(Arc::clone(&store));

        let outcome = reconciler
            .settle_completed(&order_id, &refs("cs_1"))
            .await
            .expect("settle");
        assert_eq!(outcome, SettlementOutcome::OutOfStock);
    }

    #[tokio::test]
    async fn test_single_conflict_retried_and_settled() {
        let store = Arc::new(MemoryStore::new());
        store.add_variant(SeedVariant::new("variant-1", "Painkiller", 5, 450));
        let order_id = seed_order(&store, "variant-1", 1).await;
        let reconciler = SettlementReconciler::new(Arc::clone(&store));

        // An unrelated write lands between read and commit exactly once
        store.fail_commits(1);

        let outcome = reconciler
            .settle_completed(&order_id, &refs("cs_1"))
            .await
            .expect("settle");

        assert_eq!(outcome, SettlementOutcome::Paid);
        assert_eq!(store.stock_of(&VariantId::new("variant-1")), Some(4));
    }

    #[tokio::test]
    async fn test_repeated_conflicts_close_order() {
        let store = Arc::new(MemoryStore::new());
        store.add_variant(SeedVariant::new("variant-1", "Painkiller", 5, 450));
        let order_id = seed_order(&store, "variant-1", 1).await;
        let reconciler = SettlementReconciler::new(Arc::clone(&store));

        // Initial attempt and the single retry both conflict
        store.fail_commits(2);

        let outcome = reconciler
            .settle_completed(&order_id, &refs("cs_1"))
            .await
            .expect("settle");

        assert_eq!(outcome, SettlementOutcome::OutOfStock);
        // Bounded retry: stock untouched, order closed
        assert_eq!(store.stock_of(&VariantId::new("variant-1")), Some(5));
        assert_eq!(
            store.order(&order_id).expect("stored").status,
            OrderStatus::OutOfStock
        );
    }

    #[tokio::test]
    async fn test_expired_transitions_pending_order() {
        let store = Arc::new(MemoryStore::new());
        store.add_variant(SeedVariant::new("variant-1", "Painkiller", 5, 450));
        let order_id = seed_order(&store, "variant-1", 1).await;
        let reconciler = SettlementReconciler::new(Arc::clone(&store));

        let outcome = reconciler
            .settle_expired(&order_id)
            .await
            .expect("settle");
        assert_eq!(outcome, SettlementOutcome::Expired);
        assert_eq!(
            store.order(&order_id).expect("stored").status,
            OrderStatus::Expired
        );
        // No stock coupling
        assert_eq!(store.stock_of(&VariantId::new("variant-1")), Some(5));
    }

    #[tokio::test]
    async fn test_expired_never_touches_paid_order() {
        let store = Arc::new(MemoryStore::new());
        store.add_variant(SeedVariant::new("variant-1", "Painkiller", 5, 450));
        let order_id = seed_order(&store, "variant-1", 1).await;
        let reconciler = SettlementReconciler::new(Arc::clone(&store));

        reconciler
            .settle_completed(&order_id, &refs("cs_1"))
            .await
            .expect("settle");

        let outcome = reconciler
            .settle_expired(&order_id)
            .await
            .expect("settle");
        assert_eq!(outcome, SettlementOutcome::AlreadySettled(OrderStatus::Paid));
        assert_eq!(
            store.order(&order_id).expect("stored").status,
            OrderStatus::Paid
        );
    }
}
