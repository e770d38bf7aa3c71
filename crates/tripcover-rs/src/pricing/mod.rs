//! Pricing service: input validation, insurer call, three-tier derivation.
//!
//! The insurer prices exactly one firm offer per trip; that offer becomes
//! the `elite` tier and the other two tiers are derived from it by
//! configurable ratios ([`TierRatios`]). When the trip involves adventure
//! sports the `standard` tier is excluded and `elite` becomes the
//! recommendation.
//!
//! No side effects beyond the insurer call — quotes are values; the
//! orchestrator owns writing them into session state.

use crate::insurer::countries::{canonical_country, country_code};
use crate::insurer::{InsurerApi, PriceFirmRequest, TripContext};
use crate::{Error, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Age at and above which a traveler counts as an adult on the wire.
const ADULT_AGE: u32 = 18;

// ── Tiers ──────────────────────────────────────────────────────────

/// A named price point. Ordering is coverage ordering: standard < elite
/// < premier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Standard,
    Elite,
    Premier,
}

impl Tier {
    pub fn label(&self) -> &'static str {
        match self {
            Tier::Standard => "standard",
            Tier::Elite => "elite",
            Tier::Premier => "premier",
        }
    }

    /// Parse a tier name from user text (case-insensitive substring).
    pub fn from_user_text(text: &str) -> Option<Tier> {
        let lower = text.to_lowercase();
        // Scan in reverse coverage order so "premier" beats the "e" of
        // elite in mixed sentences.
        for tier in [Tier::Premier, Tier::Elite, Tier::Standard] {
            if lower.contains(tier.label()) {
                return Some(tier);
            }
        }
        None
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-tier coverage limits. Table values are configuration; only the
/// relative medical ordering across tiers is an invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageLimits {
    pub medical: Decimal,
    pub trip_cancellation: Decimal,
    pub baggage: Decimal,
}

/// Coverage-limit templates per tier.
#[derive(Debug, Clone)]
pub struct CoverageTemplates {
    pub standard: CoverageLimits,
    pub elite: CoverageLimits,
    pub premier: CoverageLimits,
}

impl Default for CoverageTemplates {
    fn default() -> Self {
        Self {
            standard: CoverageLimits {
                medical: Decimal::new(250_000, 0),
                trip_cancellation: Decimal::new(5_000, 0),
                baggage: Decimal::new(3_000, 0),
            },
            elite: CoverageLimits {
                medical: Decimal::new(500_000, 0),
                trip_cancellation: Decimal::new(10_000, 0),
                baggage: Decimal::new(5_000, 0),
            },
            premier: CoverageLimits {
                medical: Decimal::new(1_000_000, 0),
                trip_cancellation: Decimal::new(15_000, 0),
                baggage: Decimal::new(8_000, 0),
            },
        }
    }
}

impl CoverageTemplates {
    fn for_tier(&self, tier: Tier) -> &CoverageLimits {
        match tier {
            Tier::Standard => &self.standard,
            Tier::Elite => &self.elite,
            Tier::Premier => &self.premier,
        }
    }

    /// Medical limits must be non-decreasing across the tier ordering.
    pub fn medical_ordering_holds(&self) -> bool {
        self.standard.medical <= self.elite.medical && self.elite.medical <= self.premier.medical
    }
}

/// Tier price ratios relative to the insurer's single priced offer.
/// A product decision, isolated here so per-destination dynamic ratios
/// stay a pricing-only change.
#[derive(Debug, Clone)]
pub struct TierRatios {
    /// `standard = elite / standard_divisor`.
    pub standard_divisor: Decimal,
    /// `premier = elite × premier_multiplier`.
    pub premier_multiplier: Decimal,
}

impl Default for TierRatios {
    fn default() -> Self {
        Self {
            standard_divisor: Decimal::new(18, 1),
            premier_multiplier: Decimal::new(139, 2),
        }
    }
}

// ── Quote ──────────────────────────────────────────────────────────

/// The insurer-reference 4-tuple (plus currency) that must survive
/// byte-exact from pricing to binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsurerReference {
    pub quote_id: String,
    pub offer_id: String,
    pub product_code: String,
    pub unit_price: Decimal,
    pub currency: String,
}

/// One tier's priced offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierOffer {
    pub price: Decimal,
    pub currency: String,
    pub coverage: CoverageLimits,
}

/// A three-tier (or two-tier, for adventure trips) quote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    /// Stable hash of destinations, dates, age vector, adventure flag.
    pub fingerprint: String,
    pub insurer_reference: InsurerReference,
    pub tiers: BTreeMap<Tier, TierOffer>,
    pub recommended_tier: Tier,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Quote {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn has_tier(&self, tier: Tier) -> bool {
        self.tiers.contains_key(&tier)
    }
}

// ── Inputs ─────────────────────────────────────────────────────────

/// Whether the trip returns to the departure country.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripType {
    OneWay,
    Return,
}

impl TripType {
    /// Wire code used by the insurer.
    pub fn wire_code(&self) -> &'static str {
        match self {
            TripType::OneWay => "OW",
            TripType::Return => "RT",
        }
    }
}

/// Fully-resolved trip facts. The orchestrator builds this only once all
/// required slots are present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripFacts {
    /// Canonical country names, first-seen order.
    pub destinations: Vec<String>,
    pub departure_date: NaiveDate,
    pub return_date: NaiveDate,
    pub trip_type: TripType,
}

impl TripFacts {
    pub fn duration_days(&self) -> i64 {
        (self.return_date - self.departure_date).num_days()
    }
}

/// Deterministic fingerprint over the quote inputs, used to detect
/// equivalent re-quotes.
pub fn quote_fingerprint(trip: &TripFacts, ages: &[u32], adventure_sports: bool) -> String {
    let mut hasher = Sha256::new();
    hasher.update(trip.destinations.join(",").as_bytes());
    hasher.update(b"|");
    hasher.update(trip.departure_date.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(trip.return_date.to_string().as_bytes());
    hasher.update(b"|ages:");
    for age in ages {
        hasher.update(age.to_string().as_bytes());
        hasher.update(b",");
    }
    hasher.update(b"|adv:");
    hasher.update([u8::from(adventure_sports)]);
    hex::encode(hasher.finalize())
}

// ── Service ────────────────────────────────────────────────────────

/// The pricing service: thin protocol shim plus tier derivation.
pub struct PricingService {
    insurer: Arc<dyn InsurerApi>,
    pub market: String,
    pub language_code: String,
    pub departure_country: String,
    pub ratios: TierRatios,
    pub templates: CoverageTemplates,
    pub max_trip_days: i64,
    pub ttl: Duration,
}

impl PricingService {
    pub fn new(insurer: Arc<dyn InsurerApi>, market: &str, language_code: &str) -> Self {
        Self {
            insurer,
            market: market.to_string(),
            language_code: language_code.to_string(),
            departure_country: market.to_string(),
            ratios: TierRatios::default(),
            templates: CoverageTemplates::default(),
            max_trip_days: 182,
            ttl: Duration::hours(24),
        }
    }

    /// Validate inputs, price through the insurer, and derive tiers.
    pub async fn quote(
        &self,
        trip: &TripFacts,
        ages: &[u32],
        adventure_sports: bool,
        now: DateTime<Utc>,
    ) -> Result<Quote> {
        self.validate(trip, ages, now)?;

        let arrival = trip
            .destinations
            .first()
            .and_then(|name| country_code(name))
            .ok_or_else(|| Error::InvalidInput("no quotable destination".into()))?;

        let adults = ages.iter().filter(|&&age| age >= ADULT_AGE).count() as u32;
        let children = ages.len() as u32 - adults;

        let request = PriceFirmRequest {
            market: self.market.clone(),
            language_code: self.language_code.clone(),
            channel: "assistant".to_string(),
            device_type: "web".to_string(),
            context: TripContext {
                trip_type: trip.trip_type.wire_code().to_string(),
                departure_date: trip.departure_date.to_string(),
                return_date: trip.return_date.to_string(),
                departure_country: self.departure_country.clone(),
                arrival_country: arrival.to_string(),
                adults_count: adults,
                children_count: children,
            },
        };

        let priced = self.insurer.price_firm(&request).await?;
        let offer = priced.offers.first().ok_or(Error::NoOffers)?;

        let reference = InsurerReference {
            quote_id: priced.quote_id.clone(),
            offer_id: offer.offer_id.clone(),
            product_code: offer.product_code.clone(),
            unit_price: offer.unit_price,
            currency: offer.currency.clone(),
        };

        let quote = self.derive_tiers(reference, adventure_sports, trip, ages, now);
        info!(
            "quote {}: {} tiers, recommended={}, expires {}",
            quote.fingerprint,
            quote.tiers.len(),
            quote.recommended_tier,
            quote.expires_at
        );
        Ok(quote)
    }

    fn validate(&self, trip: &TripFacts, ages: &[u32], now: DateTime<Utc>) -> Result<()> {
        if trip.destinations.is_empty() {
            return Err(Error::InvalidInput("at least one destination required".into()));
        }
        for destination in &trip.destinations {
            if canonical_country(destination).is_none() {
                return Err(Error::InvalidInput(format!(
                    "unknown destination: {destination}"
                )));
            }
        }
        let today = now.date_naive();
        if trip.departure_date < today {
            return Err(Error::InvalidInput("departure date is in the past".into()));
        }
        if trip.return_date < trip.departure_date {
            return Err(Error::InvalidInput(
                "return date is before departure date".into(),
            ));
        }
        let duration = trip.duration_days();
        if duration > self.max_trip_days {
            return Err(Error::InvalidInput(format!(
                "trip duration {duration} days exceeds maximum of {}",
                self.max_trip_days
            )));
        }
        if ages.is_empty() {
            return Err(Error::InvalidInput("at least one traveler required".into()));
        }
        if let Some(bad) = ages.iter().find(|&&age| age >= 120) {
            return Err(Error::InvalidInput(format!("implausible age: {bad}")));
        }
        Ok(())
    }

    /// Derive the tier table from the single priced offer.
    fn derive_tiers(
        &self,
        reference: InsurerReference,
        adventure_sports: bool,
        trip: &TripFacts,
        ages: &[u32],
        now: DateTime<Utc>,
    ) -> Quote {
        let elite_price = reference.unit_price;
        let currency = reference.currency.clone();

        let mut tiers = BTreeMap::new();
        if !adventure_sports {
            tiers.insert(
                Tier::Standard,
                TierOffer {
                    price: (elite_price / self.ratios.standard_divisor).round_dp(2),
                    currency: currency.clone(),
                    coverage: self.templates.for_tier(Tier::Standard).clone(),
                },
            );
        }
        tiers.insert(
            Tier::Elite,
            TierOffer {
                price: elite_price,
                currency: currency.clone(),
                coverage: self.templates.for_tier(Tier::Elite).clone(),
            },
        );
        tiers.insert(
            Tier::Premier,
            TierOffer {
                price: (elite_price * self.ratios.premier_multiplier).round_dp(2),
                currency,
                coverage: self.templates.for_tier(Tier::Premier).clone(),
            },
        );

        let recommended_tier = if adventure_sports {
            Tier::Elite
        } else {
            Tier::Standard
        };

        Quote {
            fingerprint: quote_fingerprint(trip, ages, adventure_sports),
            insurer_reference: reference,
            tiers,
            recommended_tier,
            issued_at: now,
            expires_at: now + self.ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insurer::types::{PricedOffer, PricedQuote};
    use crate::BoxFut;
    use std::str::FromStr;

    /// Insurer fake returning one fixed-price offer.
    struct FixedInsurer {
        unit_price: Decimal,
    }

    impl InsurerApi for FixedInsurer {
        fn list_products<'a>(
            &'a self,
            _market: &'a str,
        ) -> BoxFut<'a, Result<Vec<crate::insurer::Product>>> {
            Box::pin(async { Ok(vec![]) })
        }

        fn price_firm<'a>(
            &'a self,
            _request: &'a PriceFirmRequest,
        ) -> BoxFut<'a, Result<PricedQuote>> {
            let unit_price = self.unit_price;
            Box::pin(async move {
                Ok(PricedQuote {
                    quote_id: "q-1".into(),
                    offers: vec![PricedOffer {
                        offer_id: "off-1".into(),
                        product_code: "TRV".into(),
                        product_type: "TRAVEL".into(),
                        unit_price,
                        currency: "SGD".into(),
                        coverage_details: serde_json::Value::Null,
                        raw_offer: serde_json::Value::Null,
                    }],
                    raw_response: serde_json::Value::Null,
                })
            })
        }

        fn bind<'a>(
            &'a self,
            _request: &'a crate::insurer::BindRequest,
        ) -> BoxFut<'a, Result<crate::insurer::BoundPolicy>> {
            Box::pin(async { Err(Error::NoOffers) })
        }

        fn claim_requirements<'a>(
            &'a self,
            _claim_type: &'a str,
        ) -> BoxFut<'a, Result<crate::insurer::ClaimChecklist>> {
            Box::pin(async { Err(Error::NoOffers) })
        }
    }

    fn service(unit_price: &str) -> PricingService {
        PricingService::new(
            Arc::new(FixedInsurer {
                unit_price: Decimal::from_str(unit_price).unwrap(),
            }),
            "SG",
            "en",
        )
    }

    fn trip() -> TripFacts {
        TripFacts {
            destinations: vec!["Thailand".into()],
            departure_date: NaiveDate::from_ymd_opt(2025, 11, 16).unwrap(),
            return_date: NaiveDate::from_ymd_opt(2025, 11, 23).unwrap(),
            trip_type: TripType::Return,
        }
    }

    fn now() -> DateTime<Utc> {
        "2025-08-01T12:00:00Z".parse().unwrap()
    }

    #[tokio::test]
    async fn derives_three_tiers_from_single_offer() {
        let quote = service("51.21").quote(&trip(), &[32], false, now()).await.unwrap();

        assert_eq!(
            quote.tiers[&Tier::Standard].price,
            Decimal::from_str("28.45").unwrap()
        );
        assert_eq!(
            quote.tiers[&Tier::Elite].price,
            Decimal::from_str("51.21").unwrap()
        );
        assert_eq!(
            quote.tiers[&Tier::Premier].price,
            Decimal::from_str("71.18").unwrap()
        );
        assert_eq!(quote.recommended_tier, Tier::Standard);
        assert_eq!(quote.insurer_reference.unit_price, quote.tiers[&Tier::Elite].price);
    }

    #[tokio::test]
    async fn adventure_excludes_standard_and_recommends_elite() {
        let quote = service("102.42")
            .quote(&trip(), &[32, 32], true, now())
            .await
            .unwrap();

        assert!(!quote.has_tier(Tier::Standard));
        assert_eq!(
            quote.tiers[&Tier::Elite].price,
            Decimal::from_str("102.42").unwrap()
        );
        assert_eq!(
            quote.tiers[&Tier::Premier].price,
            Decimal::from_str("142.36").unwrap()
        );
        assert_eq!(quote.recommended_tier, Tier::Elite);
    }

    #[tokio::test]
    async fn quote_expires_24_hours_after_issue() {
        let issued = now();
        let quote = service("51.21").quote(&trip(), &[32], false, issued).await.unwrap();

        assert_eq!(quote.expires_at - quote.issued_at, Duration::hours(24));
        assert!(!quote.is_expired(issued + Duration::hours(24)));
        assert!(quote.is_expired(issued + Duration::hours(24) + Duration::seconds(1)));
    }

    #[tokio::test]
    async fn duration_boundary_182_accepted_183_rejected() {
        let svc = service("51.21");
        let mut long_trip = trip();
        long_trip.departure_date = NaiveDate::from_ymd_opt(2025, 9, 1).unwrap();
        long_trip.return_date = long_trip.departure_date + Duration::days(182);
        assert!(svc.quote(&long_trip, &[32], false, now()).await.is_ok());

        long_trip.return_date = long_trip.departure_date + Duration::days(183);
        let err = svc.quote(&long_trip, &[32], false, now()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn past_departure_rejected() {
        let mut past = trip();
        past.departure_date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        past.return_date = NaiveDate::from_ymd_opt(2025, 1, 8).unwrap();
        let err = service("51.21").quote(&past, &[32], false, now()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn return_before_departure_rejected() {
        let mut backwards = trip();
        backwards.return_date = backwards.departure_date - Duration::days(1);
        let err = service("51.21")
            .quote(&backwards, &[32], false, now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn unknown_destination_rejected() {
        let mut bad = trip();
        bad.destinations = vec!["Atlantis".into()];
        let err = service("51.21").quote(&bad, &[32], false, now()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn fingerprint_is_stable_and_input_sensitive() {
        let base = trip();
        let a = quote_fingerprint(&base, &[32], false);
        let b = quote_fingerprint(&base, &[32], false);
        assert_eq!(a, b);

        let c = quote_fingerprint(&base, &[32], true);
        assert_ne!(a, c);

        let d = quote_fingerprint(&base, &[32, 8], false);
        assert_ne!(a, d);
    }

    #[test]
    fn tier_parse_from_user_text() {
        assert_eq!(Tier::from_user_text("I'll take the Elite one"), Some(Tier::Elite));
        assert_eq!(Tier::from_user_text("premier please"), Some(Tier::Premier));
        assert_eq!(Tier::from_user_text("standard"), Some(Tier::Standard));
        assert_eq!(Tier::from_user_text("the cheapest?"), None);
    }

    #[test]
    fn default_templates_keep_medical_ordering() {
        assert!(CoverageTemplates::default().medical_ordering_holds());
    }
}
