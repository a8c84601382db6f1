//! Order ledger - owns all Order lifecycle writes.
//!
//! Every status change an order can undergo goes through this module, which
//! is what keeps the state machine in [`OrderStatus`] honest: the paid
//! transition only ever happens inside a revision-guarded transaction, and
//! the status-only terminal transitions check the live status first so a
//! terminal order is never rewritten.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ecometal_core::{OrderId, OrderStatus, Revision, VariantId};
use tracing::instrument;

use crate::sanity::{
    ContentError, ContentStore, NewOrder, OrderPatch, OrderSettlementView, Transaction,
};

/// Payment processor references recorded on an order at settlement time.
#[derive(Debug, Clone, Default)]
pub struct PaymentRefs {
    /// Checkout session id from the completed event.
    pub checkout_session_id: Option<String>,
    /// Payment intent reference, when the event carried one.
    pub payment_intent: Option<String>,
}

/// Result of a status-only terminal write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalWrite {
    /// The transition was applied.
    Applied,
    /// The order was already in a terminal state; nothing was written.
    AlreadyTerminal(OrderStatus),
    /// No such order.
    Missing,
}

/// Creates and mutates order documents in the content store.
#[derive(Clone)]
pub struct OrderLedger<S> {
    store: Arc<S>,
}

impl<S: ContentStore> OrderLedger<S> {
    /// Create a ledger over a content store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Create a new order in `pending`.
    ///
    /// The item list is immutable from here on; it carries denormalized
    /// price ids and titles copied from the reservation-time snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the create.
    #[instrument(skip_all, fields(items = order.items.len()))]
    pub async fn create_pending(&self, order: &NewOrder) -> Result<OrderId, ContentError> {
        self.store.create_order(order).await
    }

    /// Record the payment session id on an order after session creation.
    ///
    /// Unguarded status-free write; nothing else has touched the order yet
    /// and a lost race here only loses a reference, not money or stock.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the patch.
    #[instrument(skip(self))]
    pub async fn record_session(&self, id: &OrderId, session_id: &str) -> Result<(), ContentError> {
        let patch = OrderPatch {
            stripe_checkout_session_id: Some(session_id.to_string()),
            ..OrderPatch::default()
        };
        self.store.patch_order(id, None, patch).await
    }

    /// Transition an order to a terminal status with a status-only write.
    ///
    /// Used for `expired` and `out_of_stock`. Reads the live status first:
    /// if the order is already terminal the call is a no-op, which is what
    /// makes duplicate webhook deliveries safe. The write itself is not
    /// revision-guarded; it carries no stock coupling.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read or write fails.
    #[instrument(skip(self, refs))]
    pub async fn mark_terminal(
        &self,
        id: &OrderId,
        status: OrderStatus,
        refs: &PaymentRefs,
    ) -> Result<TerminalWrite, ContentError> {
        debug_assert!(status.is_terminal(), "mark_terminal takes terminal states");

        let Some(current) = self.store.order_status(id).await? else {
            return Ok(TerminalWrite::Missing);
        };
        if !current.status.can_transition_to(status) {
            return Ok(TerminalWrite::AlreadyTerminal(current.status));
        }

        let patch = OrderPatch {
            status: Some(status),
            stripe_checkout_session_id: refs.checkout_session_id.clone(),
            stripe_payment_intent: refs.payment_intent.clone(),
            ..OrderPatch::default()
        };
        self.store.patch_order(id, None, patch).await?;
        Ok(TerminalWrite::Applied)
    }

    /// Atomically decrement stock for every item and mark the order paid.
    ///
    /// Builds one all-or-nothing transaction: each variant's decrement is
    /// conditioned on the revision captured in `view`, and the paid status
    /// write is conditioned on the order's revision. Any concurrent write to
    /// any of those documents fails the whole commit with
    /// [`ContentError::Conflict`], and nothing is applied.
    ///
    /// Items whose variant is missing from the view are skipped; callers
    /// must have re-validated stock (a missing variant counts as zero) before
    /// getting here.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::Conflict`] when a revision guard fails, or
    /// another [`ContentError`] for store faults.
    #[instrument(skip_all, fields(order_id = %view.id))]
    pub async fn settle_paid(
        &self,
        view: &OrderSettlementView,
        refs: &PaymentRefs,
        paid_at: DateTime<Utc>,
    ) -> Result<(), ContentError> {
        let mut tx = Transaction::default();

        // Quantities are summed per variant so a repeated variant gets one
        // decrement; two guards on the same revision would double-apply.
        let mut decrements: HashMap<&VariantId, (&Revision, u32)> = HashMap::new();
        for item in &view.items {
            if let Some(variant) = &item.variant {
                let entry = decrements
                    .entry(&variant.id)
                    .or_insert((&variant.revision, 0));
                entry.1 += item.quantity;
            }
        }
        for (id, (revision, quantity)) in decrements {
            tx.dec_stock(id, revision, quantity);
        }

        let patch = OrderPatch {
            status: Some(OrderStatus::Paid),
            paid_at: Some(paid_at),
            stripe_checkout_session_id: refs.checkout_session_id.clone(),
            stripe_payment_intent: refs.payment_intent.clone(),
        };
        tx.set_order(&view.id, &view.revision, &patch);

        self.store.commit(tx).await
    }
}
