//! Ecometal Core - Shared domain types.
//!
//! This crate provides common types used across all Ecometal components:
//! - `server` - Checkout and payment settlement service
//! - `integration-tests` - Protocol tests
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no HTTP clients, no store
//! access. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for type-safe IDs, revisions, prices, and
//!   the order status state machine

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
