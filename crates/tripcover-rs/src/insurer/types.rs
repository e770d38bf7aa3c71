//! Wire types for the insurer API: request shaping and response
//! normalization.
//!
//! The upstream speaks camelCase JSON. Normalized types flatten the
//! category/offer nesting and keep the raw payloads for debugging; the raw
//! values are never forwarded back upstream in `bind`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ── price_firm request ─────────────────────────────────────────────

/// Trip context inside a pricing request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TripContext {
    /// `"RT"` for return trips, `"OW"` for one-way.
    pub trip_type: String,
    /// ISO-8601 calendar date.
    pub departure_date: String,
    /// ISO-8601 calendar date. Equal to `departure_date` for one-way trips.
    pub return_date: String,
    /// ISO alpha-2 code of the departure country.
    pub departure_country: String,
    /// ISO alpha-2 code of the (first) destination country.
    pub arrival_country: String,
    pub adults_count: u32,
    pub children_count: u32,
}

/// Request body for `price_firm`.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PriceFirmRequest {
    pub market: String,
    pub language_code: String,
    pub channel: String,
    pub device_type: String,
    pub context: TripContext,
}

// ── price_firm response ────────────────────────────────────────────

/// Raw upstream pricing response.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RawQuoteResponse {
    pub id: String,
    #[serde(default)]
    pub offer_categories: Vec<RawOfferCategory>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RawOfferCategory {
    pub product_type: String,
    #[serde(default)]
    pub offers: Vec<RawOffer>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RawOffer {
    pub id: String,
    pub product_code: String,
    pub unit_price: Decimal,
    pub currency: String,
    #[serde(default)]
    pub coverage_details: serde_json::Value,
}

/// One normalized offer.
#[derive(Debug, Clone, Serialize)]
pub struct PricedOffer {
    pub offer_id: String,
    pub product_code: String,
    pub product_type: String,
    pub unit_price: Decimal,
    pub currency: String,
    pub coverage_details: serde_json::Value,
    /// The untouched upstream offer, kept for debugging only.
    #[serde(skip)]
    pub raw_offer: serde_json::Value,
}

/// Normalized pricing result.
#[derive(Debug, Clone, Serialize)]
pub struct PricedQuote {
    pub quote_id: String,
    pub offers: Vec<PricedOffer>,
    /// The untouched upstream response, kept for debugging only.
    #[serde(skip)]
    pub raw_response: serde_json::Value,
}

impl PricedQuote {
    /// Normalize an upstream response, flattening offer categories.
    pub fn from_raw(raw: RawQuoteResponse, raw_value: serde_json::Value) -> Self {
        let offers = raw
            .offer_categories
            .iter()
            .flat_map(|category| {
                category.offers.iter().map(|offer| PricedOffer {
                    offer_id: offer.id.clone(),
                    product_code: offer.product_code.clone(),
                    product_type: category.product_type.clone(),
                    unit_price: offer.unit_price,
                    currency: offer.currency.clone(),
                    coverage_details: offer.coverage_details.clone(),
                    raw_offer: serde_json::to_value(RawOfferEcho::from(offer))
                        .unwrap_or_default(),
                })
            })
            .collect();
        Self {
            quote_id: raw.id,
            offers,
            raw_response: raw_value,
        }
    }
}

/// Serialization helper so `raw_offer` preserves the upstream field names.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RawOfferEcho<'a> {
    id: &'a str,
    product_code: &'a str,
    unit_price: Decimal,
    currency: &'a str,
    coverage_details: &'a serde_json::Value,
}

impl<'a> From<&'a RawOffer> for RawOfferEcho<'a> {
    fn from(offer: &'a RawOffer) -> Self {
        Self {
            id: &offer.id,
            product_code: &offer.product_code,
            unit_price: offer.unit_price,
            currency: &offer.currency,
            coverage_details: &offer.coverage_details,
        }
    }
}

// ── bind ───────────────────────────────────────────────────────────

/// Echo of a priced offer inside a purchase. Must match the priced offer
/// byte-exact: offer id, product code, unit price.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOffer {
    pub offer_id: String,
    pub product_code: String,
    pub unit_price: Decimal,
}

/// Minimal insured identity. Additional traveler fields are optional
/// upstream and omitted here entirely.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InsuredParty {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

/// Request body for `bind`.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BindRequest {
    pub quote_id: String,
    pub purchase_offers: Vec<PurchaseOffer>,
    pub insureds: Vec<InsuredParty>,
    pub main_contact: InsuredParty,
}

/// Normalized bind result.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BoundPolicy {
    pub policy_id: String,
    #[serde(default)]
    pub coverage_snapshot: serde_json::Value,
}

// ── Catalog & claims ───────────────────────────────────────────────

/// One product row from `list_products`.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub product_code: String,
    pub name: String,
    pub product_type: String,
}

/// Required-document checklist for a claim type.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ClaimChecklist {
    pub claim_type: String,
    #[serde(default)]
    pub required_documents: Vec<String>,
}
