//! The conversation orchestrator.
//!
//! [`Assistant::handle_turn`] is the single entry point for a user turn:
//! it appends the message, folds in any uploaded document, classifies
//! intent, fills slots, and drives the quote → checkout → bind flow. Every
//! turn runs under the per-session lock with a hard wall-clock budget;
//! state commits only when the turn body completes, so an abandoned or
//! timed-out turn leaves no partial writes.
//!
//! The orchestrator is also the only place error kinds become user-facing
//! words (see [`replies`]).

pub mod intent;
pub mod merge;
mod pool;
pub mod replies;

use crate::config::AppConfig;
use crate::docs::{DocumentBlob, DocumentPipeline, DocumentType, ExtractedDocument, OcrEngine};
use crate::insurer::InsurerApi;
use crate::pricing::{PricingService, Quote, Tier, TripFacts, TripType, quote_fingerprint};
use crate::purchase::{PaymentGateway, PolicyStore, PurchaseCoordinator};
use crate::rag::{ChunkStore, EmbeddingBackend, Retriever, SearchHit};
use crate::session::{
    CheckoutStatus, DialogueState, HandoffRequest, Intent, Role, Session, SessionState,
    SessionStore,
};
use crate::slots::SlotExtractor;
use crate::voice::{SpeechBackend, VoiceService};
use crate::{
    ChatMessage, ChatRequest, Error, LlmBackend, PREPROCESSING_MAX_TOKENS, Result,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Result of one conversation turn.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TurnOutcome {
    pub assistant_text: String,
    /// Snapshot of the session state after the turn, for UI copilots.
    pub state: SessionState,
    /// The live quote, when one is on the table.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote: Option<Quote>,
    /// The structured record for a document processed this turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_data: Option<ExtractedDocument>,
}

/// External collaborators, injected so tests can fake every wire.
pub struct Backends {
    pub llm: Arc<dyn LlmBackend>,
    pub ocr: Arc<dyn OcrEngine>,
    pub embedder: Arc<dyn EmbeddingBackend>,
    pub insurer: Arc<dyn InsurerApi>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub speech: Arc<dyn SpeechBackend>,
}

/// The assistant: owns the session store and wires every component
/// together.
pub struct Assistant {
    config: AppConfig,
    llm: Arc<dyn LlmBackend>,
    sessions: Arc<SessionStore>,
    documents: DocumentPipeline,
    slots: SlotExtractor,
    pricing: PricingService,
    insurer: Arc<dyn InsurerApi>,
    purchase: PurchaseCoordinator,
    retriever: Retriever,
    voice: VoiceService,
    /// document id → session id, for the document-update endpoint.
    document_index: DashMap<String, String>,
}

impl Assistant {
    /// Wire an assistant from a config and a set of backends.
    ///
    /// OCR, LLM, and embedding backends are gated behind one bounded
    /// worker pool so heavy external work never blocks the event loop.
    pub fn new(config: AppConfig, backends: Backends) -> Self {
        let workers = Arc::new(Semaphore::new(config.worker_permits));
        let llm: Arc<dyn LlmBackend> =
            Arc::new(pool::PooledLlm::new(backends.llm, workers.clone()));
        let ocr: Arc<dyn OcrEngine> = Arc::new(pool::PooledOcr::new(backends.ocr, workers.clone()));
        let embedder: Arc<dyn EmbeddingBackend> =
            Arc::new(pool::PooledEmbedder::new(backends.embedder, workers));

        let sessions = Arc::new(SessionStore::new());
        let documents = DocumentPipeline::new(
            llm.clone(),
            ocr,
            config.llm_model.clone(),
            config.document_max_bytes(),
        );
        let slots = SlotExtractor::new(llm.clone(), config.llm_model.clone());
        let mut pricing =
            PricingService::new(backends.insurer.clone(), &config.market, &config.language_code);
        pricing.max_trip_days = config.trip_duration_max_days;
        pricing.ttl = chrono::Duration::hours(config.quote_ttl_hours);
        let purchase = PurchaseCoordinator::new(
            sessions.clone(),
            backends.insurer.clone(),
            backends.gateway,
            Arc::new(PolicyStore::new()),
        );
        let retriever = Retriever::new(embedder, Arc::new(ChunkStore::new()));
        let voice = VoiceService::new(
            backends.speech,
            config.audio_max_bytes(),
            config.tts_max_chars,
            config.default_voice_id.clone(),
        );
        Self {
            llm,
            sessions,
            documents,
            slots,
            pricing,
            insurer: backends.insurer,
            purchase,
            retriever,
            voice,
            document_index: DashMap::new(),
            config,
        }
    }

    /// Wire an assistant against the real external services.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let backends = Backends {
            llm: Arc::new(crate::LlmClient::new(
                config.llm_api_key.clone(),
                config.llm_base_url.clone(),
            )?),
            ocr: Arc::new(crate::docs::ocr::OcrBinary::new(config.ocr_binary.clone())),
            embedder: Arc::new(crate::rag::EmbeddingClient::new(
                config.embedding_base_url.clone(),
                config.embedding_api_key.clone(),
                config.embedding_model.clone(),
            )?),
            insurer: Arc::new(crate::insurer::InsurerClient::with_retry(
                config.insurer_base_url.clone(),
                config.insurer_api_key.clone(),
                crate::insurer::RetryConfig {
                    max_attempts: config.retry_max_attempts,
                    ..Default::default()
                },
            )?),
            gateway: Arc::new(crate::purchase::PaymentClient::new(
                config.payment_base_url.clone(),
                config.payment_secret.clone(),
            )?),
            speech: Arc::new(crate::voice::SpeechClient::new(
                config.embedding_base_url.clone(),
                config.embedding_api_key.clone(),
            )?),
        };
        Ok(Self::new(config, backends))
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn purchase(&self) -> &PurchaseCoordinator {
        &self.purchase
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn voice(&self) -> &VoiceService {
        &self.voice
    }

    /// Open a new session for a user.
    pub fn open_session(&self, user: crate::session::UserProfile) -> String {
        let (session_id, _) = self.sessions.create(user, Utc::now());
        info!("opened session {session_id}");
        session_id
    }

    /// The insurer's product catalog for the configured market.
    pub async fn list_products(&self) -> Result<Vec<crate::insurer::Product>> {
        self.insurer.list_products(&self.config.market).await
    }

    // ── The turn ───────────────────────────────────────────────────

    /// Process one user turn under the per-session lock.
    ///
    /// The turn body runs against a working copy with a hard wall-clock
    /// budget; the copy commits only on completion, so a timed-out turn
    /// leaves the session untouched and returns an apology.
    pub async fn handle_turn(
        &self,
        session_id: &str,
        user_input: &str,
        attachment: Option<DocumentBlob>,
    ) -> Result<TurnOutcome> {
        let handle = self.sessions.get(session_id)?;
        let mut session = handle.lock().await;
        let now = Utc::now();
        let budget = Duration::from_secs(self.config.turn_deadline_secs);

        let mut working = session.clone();
        match tokio::time::timeout(
            budget,
            self.turn_body(&mut working, user_input, attachment, now),
        )
        .await
        {
            Ok(outcome) => {
                let outcome = outcome?;
                *session = working;
                Ok(outcome)
            }
            Err(_) => {
                warn!(
                    "turn exceeded {}s budget for session {session_id}; state not committed",
                    self.config.turn_deadline_secs
                );
                Ok(TurnOutcome {
                    assistant_text: replies::timeout_apology(),
                    state: session.state.clone(),
                    quote: None,
                    extracted_data: None,
                })
            }
        }
    }

    async fn turn_body(
        &self,
        session: &mut Session,
        user_input: &str,
        attachment: Option<DocumentBlob>,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome> {
        let is_first_turn = session.messages.is_empty();
        session.push_message(
            Role::User,
            user_input,
            attachment.as_ref().map(|blob| blob.filename.clone()),
            now,
        );

        let mut preamble: Vec<String> = Vec::new();
        let mut extracted_data = None;

        // ── Document intake ──
        if let Some(blob) = attachment {
            match self.documents.process(&blob, now).await {
                Ok(document) => {
                    self.document_index
                        .insert(document.id.clone(), session.id.clone());
                    session.state.document_data.push(document.clone());
                    if document.document_type == DocumentType::Unknown {
                        preamble.push(replies::document_unreadable());
                    } else {
                        let outcome = merge::merge_document(&mut session.state, &document, now);
                        preamble.extend(outcome.notices);
                        if session.state.intent == Intent::Unknown {
                            session.state.intent = Intent::Quote;
                        }
                        if session.state.pending_review.is_some() {
                            let reply =
                                join_reply(&preamble, replies::review_document(&document));
                            extracted_data = Some(document);
                            return Ok(self.finish(session, reply, extracted_data, now));
                        }
                    }
                    extracted_data = Some(document);
                }
                Err(Error::InputTooLarge { limit, .. }) => {
                    preamble.push(format!(
                        "That file is over the {} MB limit — could you send a smaller one?",
                        limit / (1024 * 1024)
                    ));
                }
                Err(err) => {
                    warn!("document processing failed: {err}");
                    preamble.push(replies::document_unreadable());
                }
            }
        }

        // ── Pending document review ──
        if session.state.pending_review.is_some() && !user_input.trim().is_empty() {
            self.resolve_review(session, user_input, now, &mut preamble);
        }

        // ── Intent ──
        let derived = DialogueState::derive(session, now);
        let state_constrained = matches!(
            derived,
            DialogueState::AwaitingPayment | DialogueState::Binding
        );
        if !user_input.trim().is_empty() {
            match intent::classify(self.llm.as_ref(), &self.config.llm_model, &session.messages)
                .await
            {
                Ok((classified, confidence))
                    if confidence >= intent::INTENT_CONFIDENCE_FLOOR
                        && classified != Intent::Unknown =>
                {
                    if state_constrained {
                        // The state wins mid-payment; a soft clarifier is
                        // appended instead of switching flows.
                        if classified != Intent::Quote {
                            preamble.push(replies::mid_payment_clarifier());
                        }
                    } else {
                        session.state.intent = classified;
                    }
                }
                Ok(_) => {}
                Err(err) => warn!("intent classification failed: {err}"),
            }
        }

        // ── Route ──
        let reply = match DialogueState::derive(session, now) {
            DialogueState::AwaitingPayment => {
                if wants_cancel(user_input) && self.purchase.cancel_checkout_in(session) {
                    replies::payment_canceled()
                } else {
                    replies::awaiting_payment()
                }
            }
            DialogueState::Binding => {
                "Your payment is confirmed — I'm issuing the policy now, one moment.".to_string()
            }
            DialogueState::ErrorRecovery => self.recovery_reply(session),
            DialogueState::Bound => self.bound_reply(session, user_input).await,
            _ => match session.state.intent {
                Intent::Quote => self.quote_flow(session, user_input, now, &mut preamble).await,
                Intent::PolicyQa => self.policy_answer(session, user_input).await,
                Intent::ClaimQa => self.claim_answer(user_input).await,
                Intent::HumanHandoff => {
                    session.state.handoff = Some(HandoffRequest {
                        session_id: session.id.clone(),
                        reason: "user requested a human".into(),
                        requested_at: now,
                    });
                    replies::handoff_confirmed()
                }
                Intent::Smalltalk => self.smalltalk(session).await,
                Intent::Unknown => {
                    if is_first_turn {
                        replies::greeting()
                    } else {
                        replies::clarify_intent()
                    }
                }
            },
        };

        let reply = join_reply(&preamble, reply);
        Ok(self.finish(session, reply, extracted_data, now))
    }

    fn finish(
        &self,
        session: &mut Session,
        reply: String,
        extracted_data: Option<ExtractedDocument>,
        now: DateTime<Utc>,
    ) -> TurnOutcome {
        session.push_message(Role::Assistant, reply.clone(), None, now);
        let quote = session.state.live_quote(now).cloned();
        TurnOutcome {
            assistant_text: reply,
            state: session.state.clone(),
            quote,
            extracted_data,
        }
    }

    // ── Quote flow ─────────────────────────────────────────────────

    async fn quote_flow(
        &self,
        session: &mut Session,
        user_input: &str,
        now: DateTime<Utc>,
        preamble: &mut Vec<String>,
    ) -> String {
        // Tier selection against a live quote.
        if let Some(quote) = session.state.live_quote(now).cloned()
            && let Some(tier) = Tier::from_user_text(user_input)
        {
            if quote.has_tier(tier) {
                return match self.purchase.start_checkout_in(session, tier, now).await {
                    Ok(checkout) => replies::checkout_started(tier, &checkout.redirect_url),
                    Err(err) => {
                        warn!("checkout failed: {err}");
                        "I couldn't start the payment just now — give it another try in a \
                         moment?"
                            .to_string()
                    }
                };
            }
            return format!(
                "The {tier} tier isn't available for this trip — adventure-sports cover \
                 starts at elite. Elite or premier?"
            );
        }

        // Slot fill from the conversation.
        let window_start = session.messages.len().saturating_sub(6);
        let window = session.messages.get(window_start..).unwrap_or_default().to_vec();
        let patches = self
            .slots
            .extract(&window, &session.state, now.date_naive())
            .await;
        merge::apply_user_patches(&mut session.state, &patches, now);
        preamble.extend(patches.notes);

        if !session.state.quote_slots_complete() {
            return replies::ask_missing_slots(&session.state);
        }

        let trip = match trip_facts(&session.state) {
            Ok(trip) => trip,
            Err(Error::InvalidInput(detail)) => return replies::invalid_trip(&detail),
            Err(err) => {
                warn!("trip assembly failed: {err}");
                return replies::pricing_unavailable();
            }
        };
        let ages = session.state.travelers.ages.clone();
        let adventure = session.state.preferences.adventure_sports.unwrap_or(false);

        // A payment that landed after quote expiry forces a re-price of the
        // same inputs; tell the user why they're seeing fresh numbers.
        if session
            .state
            .checkout
            .as_ref()
            .is_some_and(|checkout| checkout.status == CheckoutStatus::NeedsReissue)
            && session.state.live_quote(now).is_none()
        {
            preamble.push(replies::quote_needs_reissue());
        }

        // An unexpired quote for identical inputs is simply re-offered.
        if let Some(quote) = session.state.live_quote(now)
            && quote.fingerprint == quote_fingerprint(&trip, &ages, adventure)
        {
            return replies::offer_tiers(quote);
        }

        match self.pricing.quote(&trip, &ages, adventure, now).await {
            Ok(quote) => {
                // A previously selected tier must exist in the fresh quote.
                if let Some(tier) = session.state.selected_tier
                    && !quote.has_tier(tier)
                {
                    session.state.selected_tier = None;
                }
                let reply = replies::offer_tiers(&quote);
                session.state.quote = Some(quote);
                session.state.recovery = None;
                reply
            }
            Err(Error::InvalidInput(detail)) => replies::invalid_trip(&detail),
            Err(Error::NoOffers) => {
                "The insurer has no offers for this trip — a specialist may still be able \
                 to help. Want me to hand you over?"
                    .to_string()
            }
            Err(err) => {
                // Transient or rejected: apologize, offer retry/handoff,
                // and leave state without a half-formed quote.
                warn!("pricing failed: {err}");
                replies::pricing_unavailable()
            }
        }
    }

    // ── Q&A flows ──────────────────────────────────────────────────

    async fn policy_answer(&self, session: &Session, question: &str) -> String {
        let product_code = session
            .state
            .quote
            .as_ref()
            .map(|quote| quote.insurer_reference.product_code.clone());

        let hits = match self
            .retriever
            .search(question, product_code.as_deref(), 3)
            .await
        {
            Ok(hits) => hits,
            Err(err) => {
                warn!("policy search failed: {err}");
                return "I can't look that up right now — try again in a moment?".to_string();
            }
        };
        if hits.is_empty() {
            return replies::not_covered();
        }

        match self.cited_answer(question, &hits).await {
            Ok(answer) => answer,
            Err(err) => {
                warn!("answer assembly failed: {err}");
                replies::not_covered()
            }
        }
    }

    /// Answer strictly from the supplied chunks, citing locators.
    async fn cited_answer(&self, question: &str, hits: &[SearchHit]) -> Result<String> {
        let sources = hits
            .iter()
            .map(|hit| format!("[{}] {}\n{}", hit.citation_locator, hit.heading, hit.text))
            .collect::<Vec<_>>()
            .join("\n\n");
        let system = "You answer questions about a travel-insurance policy. Answer ONLY \
            from the supplied extracts; every assertion must cite its extract's locator \
            in parentheses, e.g. (§3.4, p.11). If the extracts do not answer the \
            question, reply exactly: not covered in the policy I have";
        let user = format!("Extracts:\n{sources}\n\nQuestion: {question}");

        let request = ChatRequest {
            model: self.config.llm_model.clone(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(&user)],
            max_tokens: PREPROCESSING_MAX_TOKENS,
            temperature: 0.2,
            response_format: None,
        };
        let answer = self.llm.complete(request).await?;

        if answer.contains("not covered in the policy I have") {
            return Ok(replies::not_covered());
        }
        // The contract requires a citation on every assertion; if the model
        // cited nothing, pin the top source.
        if !hits.iter().any(|hit| answer.contains(&hit.citation_locator)) {
            return Ok(format!("{answer} ({})", hits[0].citation_locator));
        }
        Ok(answer)
    }

    async fn claim_answer(&self, user_input: &str) -> String {
        let claim_type = claim_type_from(user_input);
        match self.insurer.claim_requirements(claim_type).await {
            Ok(checklist) => replies::claim_checklist(&checklist),
            Err(err) => {
                warn!("claim requirements failed: {err}");
                "I can't pull up the claims checklist right now — want me to connect you \
                 with the claims team directly?"
                    .to_string()
            }
        }
    }

    async fn smalltalk(&self, session: &Session) -> String {
        let last = session
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let request = ChatRequest {
            model: self.config.llm_model.clone(),
            messages: vec![
                ChatMessage::system(
                    "You are a friendly travel-insurance assistant. Reply briefly and warmly, \
                     and offer to help with a quote or a coverage question.",
                ),
                ChatMessage::user(&last),
            ],
            max_tokens: 256,
            temperature: 0.7,
            response_format: None,
        };
        match self.llm.complete(request).await {
            Ok(reply) => reply,
            Err(_) => replies::greeting(),
        }
    }

    // ── Recovery & bound ───────────────────────────────────────────

    fn recovery_reply(&self, session: &Session) -> String {
        match session.state.checkout.as_ref().map(|c| c.status) {
            Some(CheckoutStatus::BindFailed) => replies::bind_failed_payment_safe(),
            _ => replies::pricing_unavailable(),
        }
    }

    async fn bound_reply(&self, session: &Session, user_input: &str) -> String {
        match session.state.intent {
            Intent::PolicyQa => self.policy_answer(session, user_input).await,
            Intent::ClaimQa => self.claim_answer(user_input).await,
            _ => {
                let policy_id = session.state.policy_id.as_deref().unwrap_or("—");
                replies::bound(policy_id)
            }
        }
    }

    // ── Documents ──────────────────────────────────────────────────

    fn resolve_review(
        &self,
        session: &mut Session,
        user_input: &str,
        now: DateTime<Utc>,
        preamble: &mut Vec<String>,
    ) {
        let Some(review) = session.state.pending_review.clone() else {
            return;
        };
        let lower = user_input.trim().to_lowercase();
        let confirmed = ["confirm", "yes", "correct", "looks good", "that's right"]
            .iter()
            .any(|k| lower.contains(k));
        let rejected =
            ["discard", "reject", "ignore", "wrong", "no"].iter().any(|k| lower == *k)
                || lower.starts_with("no,")
                || lower.starts_with("discard");

        session.state.pending_review = None;
        if confirmed {
            let merged =
                merge::confirm_reviewed_fields(&mut session.state, &review.document_id, now);
            if !merged.is_empty() {
                preamble.push("Thanks — I've locked those in.".to_string());
            }
        } else if rejected {
            preamble.push("Okay, I've set those values aside.".to_string());
        }
        // Anything else is treated as corrections: the slot extractor picks
        // them up from this message in the quote flow.
    }

    /// Apply a user's field patch to a processed document and re-bucket.
    /// Used by the document-update endpoint.
    pub async fn update_document(
        &self,
        document_id: &str,
        fields_patch: &serde_json::Value,
    ) -> Result<ExtractedDocument> {
        let session_id = self
            .document_index
            .get(document_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::InvalidInput(format!("unknown document {document_id}")))?;
        let handle = self.sessions.get(&session_id)?;
        let mut session = handle.lock().await;

        let document = session
            .state
            .document_data
            .iter_mut()
            .find(|d| d.id == document_id)
            .ok_or_else(|| Error::IntegrityViolation(format!(
                "document {document_id} indexed but missing from session {session_id}"
            )))?;
        crate::docs::apply_field_patch(document, fields_patch);
        Ok(document.clone())
    }

    // ── Voice ──────────────────────────────────────────────────────

    /// One voice round trip: transcribe, run the turn, synthesize the
    /// reply, persist the transcript.
    pub async fn voice_turn(
        &self,
        session_id: &str,
        audio: &[u8],
    ) -> Result<(TurnOutcome, String, Vec<u8>)> {
        let transcription = self.voice.transcribe(audio).await?;
        let outcome = self
            .handle_turn(session_id, &transcription.text, None)
            .await?;

        let speech_text: String = outcome
            .assistant_text
            .chars()
            .take(self.config.tts_max_chars)
            .collect();
        let audio_reply = self.voice.synthesize(&speech_text, None).await?;
        self.voice.save_transcript(
            session_id,
            &transcription.text,
            &outcome.assistant_text,
            transcription.duration_seconds,
            Utc::now(),
        );
        Ok((outcome, transcription.text, audio_reply))
    }
}

// ── Helpers ────────────────────────────────────────────────────────

fn join_reply(preamble: &[String], reply: String) -> String {
    if preamble.is_empty() {
        reply
    } else {
        format!("{}\n{reply}", preamble.join("\n"))
    }
}

fn wants_cancel(user_input: &str) -> bool {
    let lower = user_input.to_lowercase();
    lower.contains("cancel") || lower.contains("different tier") || lower.contains("go back")
}

fn claim_type_from(user_input: &str) -> &'static str {
    let lower = user_input.to_lowercase();
    for (keyword, claim_type) in [
        ("medical", "medical"),
        ("hospital", "medical"),
        ("baggage", "baggage"),
        ("luggage", "baggage"),
        ("cancel", "trip_cancellation"),
        ("delay", "travel_delay"),
        ("theft", "theft"),
        ("stolen", "theft"),
    ] {
        if lower.contains(keyword) {
            return claim_type;
        }
    }
    "general"
}

/// Build fully-resolved trip facts from completed slots.
fn trip_facts(state: &SessionState) -> Result<TripFacts> {
    let departure_date = state
        .trip
        .departure_date
        .ok_or_else(|| Error::InvalidInput("departure date missing".into()))?;
    let return_date = state
        .trip
        .return_date
        .ok_or_else(|| Error::InvalidInput("return date missing".into()))?;
    Ok(TripFacts {
        destinations: state.trip.destinations.clone(),
        departure_date,
        return_date,
        trip_type: state.trip.trip_type.unwrap_or(TripType::Return),
    })
}
