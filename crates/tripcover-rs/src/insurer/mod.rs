//! Insurer adapter: wire-level client, request shaping, response
//! normalization, and retries.
//!
//! Four operations against the insurer's JSON-over-HTTPS API:
//!
//! - [`InsurerApi::list_products`] — product catalog for a market.
//! - [`InsurerApi::price_firm`] — one firm-priced offer for a trip.
//! - [`InsurerApi::bind`] — convert a priced offer + insureds into a policy.
//! - [`InsurerApi::claim_requirements`] — required-document checklist.
//!
//! `price_firm`, `list_products`, and `claim_requirements` are idempotent
//! and retried on transport errors and 5xx (up to 3 attempts, base 500 ms,
//! factor 2, ±20 % jitter). `bind` is never retried here — the purchase
//! coordinator owns bind retry with the same payload.
//!
//! The adapter also exposes the insurer's [country table](countries), which
//! slot normalization uses as the canonical destination vocabulary.

pub mod client;
pub mod countries;
pub mod retry;
pub mod types;

pub use client::InsurerClient;
pub use retry::RetryConfig;
pub use types::{
    BindRequest, BoundPolicy, ClaimChecklist, InsuredParty, PriceFirmRequest, PricedOffer,
    PricedQuote, Product, PurchaseOffer, TripContext,
};

use crate::{BoxFut, Result};

/// The insurer wire seam.
///
/// The pricing service and purchase coordinator depend on this trait, not
/// on the concrete client, so tests can fake the insurer.
pub trait InsurerApi: Send + Sync {
    /// List products available in a market.
    fn list_products<'a>(&'a self, market: &'a str) -> BoxFut<'a, Result<Vec<Product>>>;

    /// Request one firm-priced offer for a trip.
    fn price_firm<'a>(&'a self, request: &'a PriceFirmRequest) -> BoxFut<'a, Result<PricedQuote>>;

    /// Bind a priced offer into a policy. Not retried at this layer.
    fn bind<'a>(&'a self, request: &'a BindRequest) -> BoxFut<'a, Result<BoundPolicy>>;

    /// Required-document checklist for a claim type.
    fn claim_requirements<'a>(&'a self, claim_type: &'a str)
    -> BoxFut<'a, Result<ClaimChecklist>>;
}
