//! Sanity content store client.
//!
//! The content store is the source of truth for variants (inventory) and
//! orders. It is a revision-stamped document store: every document carries
//! an opaque `_rev` token that changes on each write, and writes can be
//! conditioned on an expected revision. There is no native
//! "decrement-if-available" primitive, so all stock accounting is built from
//! revision-guarded reads and conditional patches (see the `settlement`
//! module for the protocol).
//!
//! # Architecture
//!
//! - [`ContentStore`] is the trait the rest of the crate programs against.
//! - [`SanityClient`] implements it over the Sanity HTTP API with `reqwest`.
//! - [`MemoryStore`] implements it in memory with real revision bookkeeping,
//!   for protocol tests.

mod client;
mod memory;
pub mod types;

pub use client::SanityClient;
pub use memory::{MemoryStore, SeedVariant, StoredOrder};
pub use types::*;

use async_trait::async_trait;
use ecometal_core::{OrderId, Revision, VariantId};
use thiserror::Error;

/// Errors that can occur when talking to the content store.
#[derive(Debug, Error)]
pub enum ContentError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Store returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// A conditional write was rejected because the expected revision no
    /// longer matches. Distinct from [`ContentError::NotFound`]: the
    /// document exists but was written by someone else in between.
    #[error("revision mismatch on conditional write")]
    Conflict,

    /// Document not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Failed to parse a store response.
    #[error("parse error: {0}")]
    Parse(String),
}

/// Read and write operations against the content store.
///
/// Reads return the document revision alongside the data so callers can
/// issue conditional writes against the state they observed. The snapshots
/// are only valid until the next write to the same document.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Fetch current stock, price, and payment references for a set of
    /// variants in a single query.
    ///
    /// Variants that do not exist are simply absent from the result.
    async fn variant_snapshots(
        &self,
        ids: &[VariantId],
    ) -> Result<Vec<VariantSnapshot>, ContentError>;

    /// Create an order document and return the store-assigned id.
    async fn create_order(&self, order: &NewOrder) -> Result<OrderId, ContentError>;

    /// Fetch an order together with the live stock and revision of every
    /// referenced variant, in one consistent read.
    async fn order_for_settlement(
        &self,
        id: &OrderId,
    ) -> Result<Option<OrderSettlementView>, ContentError>;

    /// Fetch just an order's revision and status.
    async fn order_status(&self, id: &OrderId) -> Result<Option<OrderStatusView>, ContentError>;

    /// Patch an order document.
    ///
    /// When `expected` is given the patch only applies if the document still
    /// carries that revision; a mismatch fails with
    /// [`ContentError::Conflict`].
    async fn patch_order(
        &self,
        id: &OrderId,
        expected: Option<&Revision>,
        patch: OrderPatch,
    ) -> Result<(), ContentError>;

    /// Commit an all-or-nothing transaction of conditional patches.
    ///
    /// If any patch's revision guard fails, nothing is applied and the call
    /// fails with [`ContentError::Conflict`].
    async fn commit(&self, tx: Transaction) -> Result<(), ContentError>;
}
