//! Core types for Ecometal.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod id;
pub mod price;
pub mod status;

pub use id::*;
pub use price::{CurrencyCode, PriceError, UnitPrice};
pub use status::OrderStatus;
