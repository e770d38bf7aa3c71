//! Purchase coordinator: payment-intent creation, idempotent binding on
//! payment confirmation, and the polling contract.
//!
//! The coordinator is the only writer of the `checkout` slot and the only
//! producer of [`Policy`] records. Idempotency is enforced at the store —
//! a uniqueness constraint on `payment_ref` — so webhook replays and
//! concurrent deliveries are safe without careful callers.

use crate::insurer::{BindRequest, InsurerApi, InsuredParty, PurchaseOffer, RetryConfig};
use crate::pricing::{InsurerReference, Tier};
use crate::session::{
    Checkout, CheckoutStatus, HandoffRequest, SessionStore, UserProfile,
};
use crate::{BoxFut, Error, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

// ── Payment gateway seam ───────────────────────────────────────────

/// A created checkout.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CheckoutHandle {
    pub payment_ref: String,
    pub redirect_url: String,
}

/// Payment processor seam: create-checkout only. Webhook events arrive
/// through [`PurchaseCoordinator::on_payment_event`].
pub trait PaymentGateway: Send + Sync {
    fn create_checkout<'a>(
        &'a self,
        session_id: &'a str,
        amount: &'a rust_decimal::Decimal,
        currency: &'a str,
    ) -> BoxFut<'a, Result<CheckoutHandle>>;
}

/// Reqwest-backed payment processor client.
pub struct PaymentClient {
    http: reqwest::Client,
    base_url: String,
    secret: String,
}

impl PaymentClient {
    pub fn new(base_url: impl Into<String>, secret: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("tripcover/0.1")
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| Error::DownstreamUnavailable {
                service: "payment",
                detail: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            secret: secret.into(),
        })
    }
}

impl PaymentGateway for PaymentClient {
    fn create_checkout<'a>(
        &'a self,
        session_id: &'a str,
        amount: &'a rust_decimal::Decimal,
        currency: &'a str,
    ) -> BoxFut<'a, Result<CheckoutHandle>> {
        Box::pin(async move {
            let body = serde_json::json!({
                "amount": amount,
                "currency": currency,
                "reference": session_id,
            });
            let resp = self
                .http
                .post(format!("{}/checkout/sessions", self.base_url))
                .header("Authorization", format!("Bearer {}", self.secret))
                .json(&body)
                .send()
                .await
                .map_err(|e| Error::DownstreamUnavailable {
                    service: "payment",
                    detail: format!("request failed: {e}"),
                })?;

            let status = resp.status();
            if status.is_server_error() {
                return Err(Error::DownstreamUnavailable {
                    service: "payment",
                    detail: format!("HTTP {status}"),
                });
            }
            if !status.is_success() {
                return Err(Error::DownstreamRejected {
                    service: "payment",
                    detail: format!("HTTP {status}"),
                });
            }
            resp.json()
                .await
                .map_err(|e| Error::Parse(format!("checkout response: {e}")))
        })
    }
}

// ── Payment events ─────────────────────────────────────────────────

/// Webhook event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEventKind {
    Confirmed,
    Canceled,
    Failed,
}

/// A verified payment event (signature checking happens at the HTTP
/// layer before this type is constructed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub payment_ref: String,
    pub event: PaymentEventKind,
}

// ── Policy store ───────────────────────────────────────────────────

/// A bound policy. Self-contained: the insurer reference is a snapshot,
/// not a pointer back into the insurer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub policy_id: String,
    pub payment_ref: String,
    pub session_id: String,
    pub user_id: String,
    pub bound_at: DateTime<Utc>,
    pub insurer_reference: InsurerReference,
    pub insureds: Vec<InsuredParty>,
    pub main_contact: InsuredParty,
    pub coverage_snapshot: serde_json::Value,
}

/// In-memory policy store with a uniqueness constraint on `payment_ref`.
#[derive(Default)]
pub struct PolicyStore {
    by_payment_ref: DashMap<String, Policy>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a policy iff no policy exists for its payment_ref.
    pub fn insert_unique(&self, policy: Policy) -> Result<()> {
        match self.by_payment_ref.entry(policy.payment_ref.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::BindConflict {
                payment_ref: policy.payment_ref,
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(policy);
                Ok(())
            }
        }
    }

    pub fn get_by_payment_ref(&self, payment_ref: &str) -> Option<Policy> {
        self.by_payment_ref
            .get(payment_ref)
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.by_payment_ref.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_payment_ref.is_empty()
    }
}

// ── Coordinator ────────────────────────────────────────────────────

/// Drives checkout → payment confirmation → bind.
pub struct PurchaseCoordinator {
    sessions: Arc<SessionStore>,
    insurer: Arc<dyn InsurerApi>,
    gateway: Arc<dyn PaymentGateway>,
    policies: Arc<PolicyStore>,
    bind_retry: RetryConfig,
    /// payment_ref → session_id, populated at checkout creation.
    payment_index: DashMap<String, String>,
}

impl PurchaseCoordinator {
    pub fn new(
        sessions: Arc<SessionStore>,
        insurer: Arc<dyn InsurerApi>,
        gateway: Arc<dyn PaymentGateway>,
        policies: Arc<PolicyStore>,
    ) -> Self {
        Self {
            sessions,
            insurer,
            gateway,
            policies,
            bind_retry: RetryConfig::bind_schedule(3),
            payment_index: DashMap::new(),
        }
    }

    pub fn policies(&self) -> &PolicyStore {
        &self.policies
    }

    /// Create a payment checkout for the selected tier.
    ///
    /// Preconditions: the session holds a non-expired quote and the tier is
    /// present in it. Transitions the checkout slot to `initiated`.
    pub async fn start_checkout(
        &self,
        session_id: &str,
        tier: Tier,
        now: DateTime<Utc>,
    ) -> Result<CheckoutHandle> {
        let handle = self.sessions.get(session_id)?;
        let mut session = handle.lock().await;
        self.start_checkout_in(&mut session, tier, now).await
    }

    /// Checkout creation against an already-locked session (the
    /// orchestrator holds the per-session lock for the whole turn).
    pub(crate) async fn start_checkout_in(
        &self,
        session: &mut crate::session::Session,
        tier: Tier,
        now: DateTime<Utc>,
    ) -> Result<CheckoutHandle> {
        let session_id = session.id.clone();
        let quote = session
            .state
            .quote
            .as_ref()
            .ok_or(Error::InvalidState {
                action: "start_checkout",
                state: "no quote".into(),
            })?;
        if quote.is_expired(now) {
            return Err(Error::QuoteExpired);
        }
        let offer = quote.tiers.get(&tier).ok_or_else(|| Error::InvalidState {
            action: "start_checkout",
            state: format!("tier {tier} not offered"),
        })?;
        let amount = offer.price;
        let currency = offer.currency.clone();

        let checkout = self
            .gateway
            .create_checkout(&session_id, &amount, &currency)
            .await?;

        self.payment_index
            .insert(checkout.payment_ref.clone(), session_id.clone());
        session.state.selected_tier = Some(tier);
        session.state.checkout = Some(Checkout {
            payment_ref: checkout.payment_ref.clone(),
            redirect_url: checkout.redirect_url.clone(),
            status: CheckoutStatus::Initiated,
            tier,
        });
        info!(
            "checkout initiated: session={session_id}, tier={tier}, payment_ref={}",
            checkout.payment_ref
        );
        Ok(checkout)
    }

    /// Consume a payment event. Idempotent on `payment_ref`: replays and
    /// duplicates are no-ops once a policy exists.
    pub async fn on_payment_event(&self, event: &PaymentEvent, now: DateTime<Utc>) -> Result<()> {
        let session_id = self
            .payment_index
            .get(&event.payment_ref)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::SessionNotFound(format!("payment_ref {}", event.payment_ref)))?;

        let handle = self.sessions.get(&session_id)?;
        let mut session = handle.lock().await;

        // Store-enforced idempotency: a policy already bound for this
        // payment_ref makes any further event a no-op.
        if let Some(existing) = self.policies.get_by_payment_ref(&event.payment_ref) {
            if let Some(quote) = &session.state.quote
                && existing.insurer_reference != quote.insurer_reference
            {
                error!(
                    "policy {} insurer reference no longer matches session {session_id}",
                    existing.policy_id
                );
            }
            info!("duplicate payment event for {}: no-op", event.payment_ref);
            return Ok(());
        }

        let Some(checkout) = session.state.checkout.as_mut() else {
            return Err(Error::InvalidState {
                action: "on_payment_event",
                state: "no checkout".into(),
            });
        };
        if checkout.payment_ref != event.payment_ref {
            return Err(Error::IntegrityViolation(format!(
                "event payment_ref {} does not match session checkout {}",
                event.payment_ref, checkout.payment_ref
            )));
        }

        match event.event {
            PaymentEventKind::Canceled => {
                checkout.status = CheckoutStatus::Canceled;
                info!("payment {} canceled", event.payment_ref);
                Ok(())
            }
            PaymentEventKind::Failed => {
                checkout.status = CheckoutStatus::Failed;
                info!("payment {} failed", event.payment_ref);
                Ok(())
            }
            PaymentEventKind::Confirmed => {
                checkout.status = CheckoutStatus::Confirmed;
                self.bind_confirmed(&mut session, &event.payment_ref, now)
                    .await
            }
        }
    }

    /// Cancel an initiated checkout from the conversation (the user backed
    /// out before paying). No-op for checkouts past initiation.
    pub(crate) fn cancel_checkout_in(&self, session: &mut crate::session::Session) -> bool {
        match session.state.checkout.as_mut() {
            Some(checkout) if checkout.status == CheckoutStatus::Initiated => {
                checkout.status = CheckoutStatus::Canceled;
                info!("checkout {} canceled by user", checkout.payment_ref);
                true
            }
            _ => false,
        }
    }

    /// The polling contract: the checkout status, for UIs that cannot
    /// receive async events.
    pub async fn poll_payment(&self, session_id: &str) -> Result<CheckoutStatus> {
        let handle = self.sessions.get(session_id)?;
        let session = handle.lock().await;
        session
            .state
            .checkout
            .as_ref()
            .map(|checkout| checkout.status)
            .ok_or(Error::InvalidState {
                action: "poll_payment",
                state: "no checkout".into(),
            })
    }

    /// Bind after the first confirmation of a payment_ref. Retries
    /// transport/5xx up to the bind budget; 4xx is terminal.
    async fn bind_confirmed(
        &self,
        session: &mut crate::session::Session,
        payment_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let quote = match session.state.quote.clone() {
            Some(quote) => quote,
            None => {
                return Err(Error::IntegrityViolation(
                    "payment confirmed but session holds no quote".into(),
                ));
            }
        };

        if quote.is_expired(now) {
            // Payment is kept, no refund here; the conversation offers a
            // re-quote with the same inputs.
            if let Some(checkout) = session.state.checkout.as_mut() {
                checkout.status = CheckoutStatus::NeedsReissue;
            }
            warn!(
                "payment {payment_ref} confirmed after quote expiry — marked needs_reissue"
            );
            return Ok(());
        }

        let request = bind_request_for(&quote.insurer_reference, &session.user);

        let mut last_err: Option<Error> = None;
        for attempt in 0..self.bind_retry.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.bind_retry.delay_for_attempt(attempt - 1)).await;
            }
            match self.insurer.bind(&request).await {
                Ok(bound) => {
                    let policy = Policy {
                        policy_id: bound.policy_id.clone(),
                        payment_ref: payment_ref.to_string(),
                        session_id: session.id.clone(),
                        user_id: session.user.user_id.clone(),
                        bound_at: now,
                        insurer_reference: quote.insurer_reference.clone(),
                        insureds: request.insureds.clone(),
                        main_contact: request.main_contact.clone(),
                        coverage_snapshot: bound.coverage_snapshot,
                    };
                    match self.policies.insert_unique(policy) {
                        Ok(()) => {}
                        Err(Error::BindConflict { .. }) => {
                            // A concurrent delivery won the race; that
                            // policy is the policy.
                            info!("policy already bound for {payment_ref}");
                        }
                        Err(other) => return Err(other),
                    }
                    session.state.policy_id = Some(bound.policy_id.clone());
                    if let Some(checkout) = session.state.checkout.as_mut() {
                        checkout.status = CheckoutStatus::Confirmed;
                    }
                    session.terminal = true;
                    info!("bound policy {} for payment {payment_ref}", bound.policy_id);
                    return Ok(());
                }
                Err(err) if err.is_retryable() && attempt + 1 < self.bind_retry.max_attempts => {
                    warn!(
                        "bind attempt {}/{} failed: {err}",
                        attempt + 1,
                        self.bind_retry.max_attempts
                    );
                    last_err = Some(err);
                }
                Err(err) => {
                    last_err = Some(err);
                    break;
                }
            }
        }

        // Terminal failure: the payment reference is never lost, the
        // checkout is marked and a handoff handle produced.
        if let Some(checkout) = session.state.checkout.as_mut() {
            checkout.status = CheckoutStatus::BindFailed;
        }
        session.state.handoff = Some(HandoffRequest {
            session_id: session.id.clone(),
            reason: format!("bind failed after confirmed payment {payment_ref}"),
            requested_at: now,
        });
        let err = last_err.unwrap_or(Error::DownstreamUnavailable {
            service: "insurer",
            detail: "bind retry budget exhausted".into(),
        });
        error!("bind failed terminally for payment {payment_ref}: {err}");
        Err(err)
    }
}

/// The minimal bind payload: byte-exact insurer reference plus the
/// authenticated user as single insured and main contact.
pub fn bind_request_for(reference: &InsurerReference, user: &UserProfile) -> BindRequest {
    let party = InsuredParty {
        id: user.user_id.clone(),
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        email: user.email.clone(),
    };
    BindRequest {
        quote_id: reference.quote_id.clone(),
        purchase_offers: vec![PurchaseOffer {
            offer_id: reference.offer_id.clone(),
            product_code: reference.product_code.clone(),
            unit_price: reference.unit_price,
        }],
        insureds: vec![party.clone()],
        main_contact: party,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insurer::types::{BoundPolicy, PricedQuote, PriceFirmRequest};
    use crate::insurer::{ClaimChecklist, Product};
    use crate::pricing::{CoverageTemplates, Quote, TierOffer};
    use crate::session::Role;
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeGateway;

    impl PaymentGateway for FakeGateway {
        fn create_checkout<'a>(
            &'a self,
            session_id: &'a str,
            _amount: &'a Decimal,
            _currency: &'a str,
        ) -> BoxFut<'a, Result<CheckoutHandle>> {
            let payment_ref = format!("pay-{session_id}");
            Box::pin(async move {
                Ok(CheckoutHandle {
                    redirect_url: format!("https://pay.example/{payment_ref}"),
                    payment_ref,
                })
            })
        }
    }

    /// Insurer fake whose bind fails `failures` times before succeeding
    /// (or always, when `failures` is large).
    struct FlakyInsurer {
        failures: AtomicU32,
        bind_calls: AtomicU32,
        permanent: bool,
    }

    impl FlakyInsurer {
        fn failing(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                bind_calls: AtomicU32::new(0),
                permanent: false,
            }
        }

        fn rejecting() -> Self {
            Self {
                failures: AtomicU32::new(0),
                bind_calls: AtomicU32::new(0),
                permanent: true,
            }
        }
    }

    impl InsurerApi for FlakyInsurer {
        fn list_products<'a>(&'a self, _market: &'a str) -> BoxFut<'a, Result<Vec<Product>>> {
            Box::pin(async { Ok(vec![]) })
        }

        fn price_firm<'a>(
            &'a self,
            _request: &'a PriceFirmRequest,
        ) -> BoxFut<'a, Result<PricedQuote>> {
            Box::pin(async { Err(Error::NoOffers) })
        }

        fn bind<'a>(&'a self, request: &'a BindRequest) -> BoxFut<'a, Result<BoundPolicy>> {
            self.bind_calls.fetch_add(1, Ordering::SeqCst);
            let fail = if self.permanent {
                2
            } else if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                1
            } else {
                0
            };
            let quote_id = request.quote_id.clone();
            Box::pin(async move {
                match fail {
                    1 => Err(Error::DownstreamUnavailable {
                        service: "insurer",
                        detail: "HTTP 503".into(),
                    }),
                    2 => Err(Error::DownstreamRejected {
                        service: "insurer",
                        detail: "HTTP 422".into(),
                    }),
                    _ => Ok(BoundPolicy {
                        policy_id: format!("pol-{quote_id}"),
                        coverage_snapshot: serde_json::json!({"medical": 500000}),
                    }),
                }
            })
        }

        fn claim_requirements<'a>(
            &'a self,
            _claim_type: &'a str,
        ) -> BoxFut<'a, Result<ClaimChecklist>> {
            Box::pin(async {
                Ok(ClaimChecklist {
                    claim_type: "medical".into(),
                    required_documents: vec![],
                })
            })
        }
    }

    fn now() -> DateTime<Utc> {
        "2025-08-01T12:00:00Z".parse().unwrap()
    }

    fn profile() -> UserProfile {
        UserProfile {
            user_id: "u-1".into(),
            first_name: "Ana".into(),
            last_name: "Lim".into(),
            email: "ana@example.com".into(),
        }
    }

    fn quote() -> Quote {
        let mut tiers = BTreeMap::new();
        for (tier, price) in [
            (Tier::Standard, "28.45"),
            (Tier::Elite, "51.21"),
            (Tier::Premier, "71.18"),
        ] {
            tiers.insert(
                tier,
                TierOffer {
                    price: Decimal::from_str(price).unwrap(),
                    currency: "SGD".into(),
                    coverage: CoverageTemplates::default().elite.clone(),
                },
            );
        }
        Quote {
            fingerprint: "fp".into(),
            insurer_reference: InsurerReference {
                quote_id: "q-1".into(),
                offer_id: "off-1".into(),
                product_code: "TRV".into(),
                unit_price: Decimal::from_str("51.21").unwrap(),
                currency: "SGD".into(),
            },
            tiers,
            recommended_tier: Tier::Standard,
            issued_at: now(),
            expires_at: now() + chrono::Duration::hours(24),
        }
    }

    async fn coordinator_with(
        insurer: FlakyInsurer,
    ) -> (PurchaseCoordinator, Arc<SessionStore>, String) {
        let sessions = Arc::new(SessionStore::new());
        let (session_id, handle) = sessions.create(profile(), now());
        {
            let mut session = handle.lock().await;
            session.push_message(Role::User, "quote please", None, now());
            session.state.quote = Some(quote());
        }
        let coordinator = PurchaseCoordinator::new(
            sessions.clone(),
            Arc::new(insurer),
            Arc::new(FakeGateway),
            Arc::new(PolicyStore::new()),
        );
        (coordinator, sessions, session_id)
    }

    #[tokio::test]
    async fn start_checkout_initiates_payment() {
        let (coordinator, sessions, session_id) = coordinator_with(FlakyInsurer::failing(0)).await;

        let checkout = coordinator
            .start_checkout(&session_id, Tier::Elite, now())
            .await
            .unwrap();
        assert!(checkout.redirect_url.contains(&checkout.payment_ref));

        let handle = sessions.get(&session_id).unwrap();
        let session = handle.lock().await;
        let stored = session.state.checkout.as_ref().unwrap();
        assert_eq!(stored.status, CheckoutStatus::Initiated);
        assert_eq!(stored.tier, Tier::Elite);
        drop(session);
        assert_eq!(
            coordinator.poll_payment(&session_id).await.unwrap(),
            CheckoutStatus::Initiated
        );
    }

    #[tokio::test]
    async fn start_checkout_requires_offered_tier() {
        let (coordinator, sessions, session_id) = coordinator_with(FlakyInsurer::failing(0)).await;
        {
            let handle = sessions.get(&session_id).unwrap();
            let mut session = handle.lock().await;
            session
                .state
                .quote
                .as_mut()
                .unwrap()
                .tiers
                .remove(&Tier::Standard);
        }
        let err = coordinator
            .start_checkout(&session_id, Tier::Standard, now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[tokio::test]
    async fn start_checkout_rejects_expired_quote() {
        let (coordinator, _, session_id) = coordinator_with(FlakyInsurer::failing(0)).await;
        let late = now() + chrono::Duration::hours(25);
        let err = coordinator
            .start_checkout(&session_id, Tier::Elite, late)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QuoteExpired));
    }

    #[tokio::test]
    async fn confirmed_event_binds_exactly_once() {
        let (coordinator, sessions, session_id) = coordinator_with(FlakyInsurer::failing(0)).await;
        let checkout = coordinator
            .start_checkout(&session_id, Tier::Elite, now())
            .await
            .unwrap();

        let event = PaymentEvent {
            payment_ref: checkout.payment_ref.clone(),
            event: PaymentEventKind::Confirmed,
        };
        coordinator.on_payment_event(&event, now()).await.unwrap();
        assert_eq!(coordinator.policies().len(), 1);

        // Replay: no new policy, no error.
        coordinator.on_payment_event(&event, now()).await.unwrap();
        coordinator.on_payment_event(&event, now()).await.unwrap();
        assert_eq!(coordinator.policies().len(), 1);

        let handle = sessions.get(&session_id).unwrap();
        let session = handle.lock().await;
        assert!(session.terminal);
        assert!(session.state.policy_id.is_some());
        let policy = coordinator
            .policies()
            .get_by_payment_ref(&checkout.payment_ref)
            .unwrap();
        assert_eq!(policy.insurer_reference.quote_id, "q-1");
        assert_eq!(policy.insureds.len(), 1);
        assert_eq!(policy.main_contact.email, "ana@example.com");
    }

    #[tokio::test(start_paused = true)]
    async fn transient_bind_failures_are_retried() {
        let (coordinator, _, session_id) = coordinator_with(FlakyInsurer::failing(2)).await;
        let checkout = coordinator
            .start_checkout(&session_id, Tier::Elite, now())
            .await
            .unwrap();

        let event = PaymentEvent {
            payment_ref: checkout.payment_ref,
            event: PaymentEventKind::Confirmed,
        };
        coordinator.on_payment_event(&event, now()).await.unwrap();
        assert_eq!(coordinator.policies().len(), 1);
    }

    #[tokio::test]
    async fn rejection_marks_bind_failed_with_handoff() {
        let (coordinator, sessions, session_id) = coordinator_with(FlakyInsurer::rejecting()).await;
        let checkout = coordinator
            .start_checkout(&session_id, Tier::Elite, now())
            .await
            .unwrap();

        let event = PaymentEvent {
            payment_ref: checkout.payment_ref,
            event: PaymentEventKind::Confirmed,
        };
        let err = coordinator.on_payment_event(&event, now()).await.unwrap_err();
        assert!(matches!(err, Error::DownstreamRejected { .. }));
        assert!(coordinator.policies().is_empty());

        let handle = sessions.get(&session_id).unwrap();
        let session = handle.lock().await;
        assert_eq!(
            session.state.checkout.as_ref().unwrap().status,
            CheckoutStatus::BindFailed
        );
        // The payment reference survives terminal failure.
        assert!(!session.state.checkout.as_ref().unwrap().payment_ref.is_empty());
        assert!(session.state.handoff.is_some());
    }

    #[tokio::test]
    async fn expired_quote_at_confirmation_needs_reissue() {
        let (coordinator, sessions, session_id) = coordinator_with(FlakyInsurer::failing(0)).await;
        let checkout = coordinator
            .start_checkout(&session_id, Tier::Elite, now())
            .await
            .unwrap();

        let late = now() + chrono::Duration::hours(25);
        let event = PaymentEvent {
            payment_ref: checkout.payment_ref,
            event: PaymentEventKind::Confirmed,
        };
        coordinator.on_payment_event(&event, late).await.unwrap();

        assert!(coordinator.policies().is_empty());
        let handle = sessions.get(&session_id).unwrap();
        let session = handle.lock().await;
        assert_eq!(
            session.state.checkout.as_ref().unwrap().status,
            CheckoutStatus::NeedsReissue
        );
        drop(session);
        assert_eq!(
            coordinator.poll_payment(&session_id).await.unwrap(),
            CheckoutStatus::NeedsReissue
        );
    }

    #[tokio::test]
    async fn cancel_event_reopens_tier_selection() {
        let (coordinator, _, session_id) = coordinator_with(FlakyInsurer::failing(0)).await;
        let checkout = coordinator
            .start_checkout(&session_id, Tier::Elite, now())
            .await
            .unwrap();

        let event = PaymentEvent {
            payment_ref: checkout.payment_ref,
            event: PaymentEventKind::Canceled,
        };
        coordinator.on_payment_event(&event, now()).await.unwrap();
        assert_eq!(
            coordinator.poll_payment(&session_id).await.unwrap(),
            CheckoutStatus::Canceled
        );
        assert!(coordinator.policies().is_empty());
    }

    #[tokio::test]
    async fn unknown_payment_ref_is_an_error() {
        let (coordinator, _, _) = coordinator_with(FlakyInsurer::failing(0)).await;
        let event = PaymentEvent {
            payment_ref: "pay-unknown".into(),
            event: PaymentEventKind::Confirmed,
        };
        let err = coordinator.on_payment_event(&event, now()).await.unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
    }

    #[test]
    fn policy_store_enforces_uniqueness() {
        let store = PolicyStore::new();
        let policy = Policy {
            policy_id: "pol-1".into(),
            payment_ref: "pay-1".into(),
            session_id: "sess-1".into(),
            user_id: "u-1".into(),
            bound_at: now(),
            insurer_reference: quote().insurer_reference,
            insureds: vec![],
            main_contact: InsuredParty {
                id: "u-1".into(),
                first_name: "Ana".into(),
                last_name: "Lim".into(),
                email: "ana@example.com".into(),
            },
            coverage_snapshot: serde_json::Value::Null,
        };
        store.insert_unique(policy.clone()).unwrap();
        let err = store.insert_unique(policy).unwrap_err();
        assert!(matches!(err, Error::BindConflict { .. }));
        assert_eq!(store.len(), 1);
    }
}
