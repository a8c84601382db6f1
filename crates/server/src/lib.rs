//! Ecometal server library.
//!
//! This crate provides the checkout and settlement functionality as a
//! library, allowing it to be tested and reused.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod checkout;
pub mod config;
pub mod error;
pub mod orders;
pub mod routes;
pub mod sanity;
pub mod settlement;
pub mod state;
pub mod stripe;
