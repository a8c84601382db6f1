//! Settlement protocol tests: oversell races, idempotence, retry bounds.

use std::sync::Arc;

use chrono::Utc;
use ecometal_core::{OrderId, OrderStatus, VariantId};
use ecometal_integration_tests::store_with_variant;
use ecometal_server::orders::PaymentRefs;
use ecometal_server::sanity::{ContentStore, MemoryStore, NewOrder, NewOrderItem};
use ecometal_server::settlement::{SettlementOutcome, SettlementReconciler};

async fn pending_order(store: &Arc<MemoryStore>, variant: &str, quantity: u32) -> OrderId {
    let order = NewOrder {
        customer_email: None,
        created_at: Utc::now(),
        items: vec![NewOrderItem {
            variant_id: VariantId::new(variant),
            quantity,
            stripe_price_id: format!("price_{variant}"),
            title: "Seasons in the Abyss".into(),
            format: Some("Vinyl".into()),
        }],
    };
    store.create_order(&order).await.expect("create order")
}

fn refs(session: &str) -> PaymentRefs {
    PaymentRefs {
        checkout_session_id: Some(session.to_string()),
        payment_intent: None,
    }
}

// =============================================================================
// Oversell Race
// =============================================================================

/// Stock 2, two orders each wanting 2. Reservation lets both through (the
/// check is point-in-time), settlement must let exactly one win.
#[tokio::test]
async fn test_two_orders_race_for_the_last_units() {
    let store = store_with_variant("variant-1", 2);
    let order_a = pending_order(&store, "variant-1", 2).await;
    let order_b = pending_order(&store, "variant-1", 2).await;
    let reconciler = Arc::new(SettlementReconciler::new(Arc::clone(&store)));

    let refs_a = refs("cs_a");
    let refs_b = refs("cs_b");
    let (outcome_a, outcome_b) = tokio::join!(
        reconciler.settle_completed(&order_a, &refs_a),
        reconciler.settle_completed(&order_b, &refs_b),
    );
    let outcome_a = outcome_a.expect("settle a");
    let outcome_b = outcome_b.expect("settle b");

    let outcomes = [outcome_a, outcome_b];
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == SettlementOutcome::Paid)
            .count(),
        1,
        "exactly one order wins the stock"
    );
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == SettlementOutcome::OutOfStock)
            .count(),
        1,
        "the loser is closed as out of stock"
    );

    // The loser's settlement changed nothing
    assert_eq!(store.stock_of(&VariantId::new("variant-1")), Some(0));
}

/// The same race run sequentially, matching the webhook delivery order.
#[tokio::test]
async fn test_second_settlement_sees_consumed_stock() {
    let store = store_with_variant("variant-1", 2);
    let order_a = pending_order(&store, "variant-1", 2).await;
    let order_b = pending_order(&store, "variant-1", 2).await;
    let reconciler = SettlementReconciler::new(Arc::clone(&store));

    let outcome_a = reconciler
        .settle_completed(&order_a, &refs("cs_a"))
        .await
        .expect("settle a");
    assert_eq!(outcome_a, SettlementOutcome::Paid);
    assert_eq!(store.stock_of(&VariantId::new("variant-1")), Some(0));

    let outcome_b = reconciler
        .settle_completed(&order_b, &refs("cs_b"))
        .await
        .expect("settle b");
    assert_eq!(outcome_b, SettlementOutcome::OutOfStock);

    assert_eq!(store.stock_of(&VariantId::new("variant-1")), Some(0));
    assert_eq!(
        store.order(&order_a).expect("order a").status,
        OrderStatus::Paid
    );
    assert_eq!(
        store.order(&order_b).expect("order b").status,
        OrderStatus::OutOfStock
    );
}

/// Many concurrent settlements on one variant: stock never goes negative,
/// and every paid order accounts for exactly its quantity.
#[tokio::test]
async fn test_stock_never_negative_under_contention() {
    let store = store_with_variant("variant-1", 5);
    let reconciler = Arc::new(SettlementReconciler::new(Arc::clone(&store)));

    let mut order_ids = Vec::new();
    for _ in 0..10 {
        order_ids.push(pending_order(&store, "variant-1", 1).await);
    }

    let mut handles = Vec::new();
    for (i, order_id) in order_ids.iter().cloned().enumerate() {
        let reconciler = Arc::clone(&reconciler);
        handles.push(tokio::spawn(async move {
            reconciler
                .settle_completed(&order_id, &refs(&format!("cs_{i}")))
                .await
        }));
    }

    let mut paid = 0;
    for handle in handles {
        let outcome = handle.await.expect("join").expect("settle");
        if outcome == SettlementOutcome::Paid {
            paid += 1;
        }
    }

    let stock = store.stock_of(&VariantId::new("variant-1")).expect("stock");
    assert!(stock >= 0, "stock must never go negative, got {stock}");
    assert_eq!(
        stock,
        5 - i64::from(paid),
        "every paid order accounts for exactly one unit"
    );
    // The retry bound may close orders early under this much contention,
    // but never more than stock allows
    assert!(paid <= 5);
}

// =============================================================================
// Idempotence
// =============================================================================

#[tokio::test]
async fn test_duplicate_completed_deliveries_settle_once() {
    let store = store_with_variant("variant-1", 5);
    let order_id = pending_order(&store, "variant-1", 2).await;
    let reconciler = SettlementReconciler::new(Arc::clone(&store));

    let first = reconciler
        .settle_completed(&order_id, &refs("cs_1"))
        .await
        .expect("settle");
    assert_eq!(first, SettlementOutcome::Paid);

    // The processor redelivers; both must be absorbed as no-ops
    for _ in 0..2 {
        let again = reconciler
            .settle_completed(&order_id, &refs("cs_1"))
            .await
            .expect("settle");
        assert_eq!(again, SettlementOutcome::AlreadySettled(OrderStatus::Paid));
    }

    assert_eq!(store.stock_of(&VariantId::new("variant-1")), Some(3));
}

#[tokio::test]
async fn test_expired_only_moves_pending_orders() {
    let store = store_with_variant("variant-1", 5);
    let paid_order = pending_order(&store, "variant-1", 1).await;
    let abandoned_order = pending_order(&store, "variant-1", 1).await;
    let reconciler = SettlementReconciler::new(Arc::clone(&store));

    reconciler
        .settle_completed(&paid_order, &refs("cs_paid"))
        .await
        .expect("settle");

    // Expiry lands on both; only the pending one moves
    let expired_paid = reconciler
        .settle_expired(&paid_order)
        .await
        .expect("expire");
    let expired_abandoned = reconciler
        .settle_expired(&abandoned_order)
        .await
        .expect("expire");

    assert_eq!(
        expired_paid,
        SettlementOutcome::AlreadySettled(OrderStatus::Paid)
    );
    assert_eq!(expired_abandoned, SettlementOutcome::Expired);
    assert_eq!(
        store.order(&paid_order).expect("paid").status,
        OrderStatus::Paid
    );
    assert_eq!(
        store.order(&abandoned_order).expect("abandoned").status,
        OrderStatus::Expired
    );
    // Expiry has no stock coupling
    assert_eq!(store.stock_of(&VariantId::new("variant-1")), Some(4));
}

// =============================================================================
// Conflict Retry Bound
// =============================================================================

/// An unrelated catalog edit bumps a revision between settlement's read and
/// its commit. The single retry re-reads and succeeds.
#[tokio::test]
async fn test_one_conflict_absorbed_by_retry() {
    let store = store_with_variant("variant-1", 5);
    let order_id = pending_order(&store, "variant-1", 1).await;
    let reconciler = SettlementReconciler::new(Arc::clone(&store));

    store.fail_commits(1);

    let outcome = reconciler
        .settle_completed(&order_id, &refs("cs_1"))
        .await
        .expect("settle");

    assert_eq!(outcome, SettlementOutcome::Paid);
    assert_eq!(store.stock_of(&VariantId::new("variant-1")), Some(4));
    assert!(
        store.order(&order_id).expect("order").paid_at.is_some(),
        "paid orders carry a settlement timestamp"
    );
}

/// Both the initial attempt and the retry conflict: the order closes as out
/// of stock instead of looping, and no stock moves.
#[tokio::test]
async fn test_retry_budget_exhausted_closes_order() {
    let store = store_with_variant("variant-1", 5);
    let order_id = pending_order(&store, "variant-1", 1).await;
    let reconciler = SettlementReconciler::new(Arc::clone(&store));

    store.fail_commits(2);

    let outcome = reconciler
        .settle_completed(&order_id, &refs("cs_1"))
        .await
        .expect("settle");

    assert_eq!(outcome, SettlementOutcome::OutOfStock);
    assert_eq!(store.stock_of(&VariantId::new("variant-1")), Some(5));
    let order = store.order(&order_id).expect("order");
    assert_eq!(order.status, OrderStatus::OutOfStock);
    assert_eq!(order.stripe_checkout_session_id.as_deref(), Some("cs_1"));
}
