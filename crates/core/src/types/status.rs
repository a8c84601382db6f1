//! Order lifecycle status.
//!
//! The status values and their serialized names match the `order` documents
//! in the content store, so a status read from a document deserializes
//! directly into [`OrderStatus`].

use serde::{Deserialize, Serialize};

/// Order lifecycle status.
///
/// The lifecycle is a small state machine:
///
/// ```text
/// pending ──> paid
///    │──────> expired
///    └──────> out_of_stock
/// ```
///
/// `pending` is the only non-terminal state. `paid` and `out_of_stock` are
/// only reachable from settlement; `expired` comes from a session-expired
/// event. No transition ever leaves a terminal state, which is what makes
/// duplicate webhook deliveries safe to absorb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Paid,
    Expired,
    OutOfStock,
}

impl OrderStatus {
    /// Whether this status is terminal (no further transitions allowed).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Whether a transition from `self` to `next` is allowed.
    ///
    /// Only `pending` has outgoing edges; self-transitions are not
    /// transitions at all and return `false`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(self, Self::Pending) && !matches!(next, Self::Pending)
    }

    /// The serialized (store) name of this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Expired => "expired",
            Self::OutOfStock => "out_of_stock",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_is_only_non_terminal_state() {
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(OrderStatus::Paid.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
        assert!(OrderStatus::OutOfStock.is_terminal());
    }

    #[test]
    fn test_valid_transitions() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Paid));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Expired));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::OutOfStock));
    }

    #[test]
    fn test_no_transition_leaves_a_terminal_state() {
        let terminal = [
            OrderStatus::Paid,
            OrderStatus::Expired,
            OrderStatus::OutOfStock,
        ];
        let all = [
            OrderStatus::Pending,
            OrderStatus::Paid,
            OrderStatus::Expired,
            OrderStatus::OutOfStock,
        ];

        for from in terminal {
            for to in all {
                assert!(
                    !from.can_transition_to(to),
                    "{from} -> {to} must be rejected"
                );
            }
        }
    }

    #[test]
    fn test_self_transition_is_not_a_transition() {
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Pending));
    }

    #[test]
    fn test_serde_names_match_store_values() {
        assert_eq!(
            serde_json::to_string(&OrderStatus::OutOfStock).expect("serialize"),
            "\"out_of_stock\""
        );
        let status: OrderStatus = serde_json::from_str("\"paid\"").expect("deserialize");
        assert_eq!(status, OrderStatus::Paid);
    }
}
