//! Protocol tests for Ecometal.
//!
//! The settlement protocol's interesting behavior is concurrent, so these
//! tests run checkout and settlement against the in-memory content store,
//! which keeps real revision bookkeeping and can inject write conflicts
//! deterministically.
//!
//! # Test Categories
//!
//! - `settlement_protocol` - Oversell races, duplicate deliveries, conflict
//!   retry bounds
//! - `checkout_flow` - Reservation-to-settlement paths through the public
//!   services
//! - `webhook_auth` - Signature enforcement at the HTTP boundary

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use ecometal_server::sanity::{MemoryStore, SeedVariant};
use ecometal_server::stripe::{
    CheckoutSession, PaymentGateway, SessionRequest, StripeError,
};

/// Payment gateway double: hands out sequential session ids without talking
/// to Stripe.
#[derive(Default)]
pub struct FakeGateway {
    requests: Mutex<Vec<SessionRequest>>,
}

impl FakeGateway {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// All session requests seen so far.
    #[must_use]
    pub fn requests(&self) -> Vec<SessionRequest> {
        self.requests.lock().expect("lock").clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout_session(
        &self,
        request: &SessionRequest,
    ) -> Result<CheckoutSession, StripeError> {
        let mut requests = self.requests.lock().expect("lock");
        requests.push(request.clone());
        let n = requests.len();
        Ok(CheckoutSession {
            id: format!("cs_test_{n}"),
            url: format!("https://checkout.example/cs_test_{n}"),
        })
    }
}

/// A store seeded with one purchasable variant.
#[must_use]
pub fn store_with_variant(id: &str, stock: i64) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.add_variant(SeedVariant::new(id, "Seasons in the Abyss", stock, 380));
    store
}
