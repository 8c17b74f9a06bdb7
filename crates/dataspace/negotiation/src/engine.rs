use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dataspace_policy::{assess_offer, OfferAssessment, PolicyDigest, UsagePolicy};
use dataspace_store::{
    Agreement, ContractStore, IllegalTransition, LocalRole, Negotiation, NegotiationOutcome,
    NegotiationState, Offer, RejectReason, StoreError,
};
use dataspace_transport::{Envelope, NegotiationMessage, Transport};
use dataspace_types::{
    AgreementId, AuditRecord, AuditSink, Clock, NegotiationId, OfferId, Party, ResourceRef,
    SystemClock, TracingAuditSink,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::catalogue::{AcceptancePolicySource, StaticCatalogue};
use crate::config::NegotiationConfig;
use crate::error::NegotiationError;
use crate::handled::{DropReason, Handled};
use crate::strategy::{AcceptAny, CounterOfferStrategy, CounterResponse};

/// One connector's side of the contract negotiation protocol.
///
/// The engine owns no shared state with its counterparts: every party keeps
/// its own [`Negotiation`] copy in its own [`ContractStore`] and the copies
/// stay in step through the messages exchanged. Work on one negotiation is
/// serialized by a per-negotiation lock; different negotiations proceed in
/// parallel.
pub struct NegotiationEngine {
    party: Party,
    store: Arc<ContractStore>,
    transport: Arc<dyn Transport>,
    catalogue: Arc<dyn AcceptancePolicySource>,
    strategy: Arc<dyn CounterOfferStrategy>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    config: NegotiationConfig,
    locks: DashMap<NegotiationId, Arc<Mutex<()>>>,
}

impl NegotiationEngine {
    /// Create an engine with an empty catalogue, the [`AcceptAny`]
    /// strategy, tracing audit output and the system clock.
    pub fn new(party: Party, store: Arc<ContractStore>, transport: Arc<dyn Transport>) -> Self {
        Self {
            party,
            store,
            transport,
            catalogue: Arc::new(StaticCatalogue::new()),
            strategy: Arc::new(AcceptAny),
            audit: Arc::new(TracingAuditSink),
            clock: Arc::new(SystemClock),
            config: NegotiationConfig::default(),
            locks: DashMap::new(),
        }
    }

    pub fn with_catalogue(mut self, catalogue: Arc<dyn AcceptancePolicySource>) -> Self {
        self.catalogue = catalogue;
        self
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn CounterOfferStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: NegotiationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn party(&self) -> &Party {
        &self.party
    }

    pub fn store(&self) -> &Arc<ContractStore> {
        &self.store
    }

    pub fn config(&self) -> &NegotiationConfig {
        &self.config
    }

    pub fn negotiation(&self, id: NegotiationId) -> Result<Negotiation, NegotiationError> {
        self.load(id)
    }

    pub fn agreement_for(&self, id: NegotiationId) -> Option<Arc<Agreement>> {
        self.store.agreement_for(id)
    }

    // ── Consumer operations ─────────────────────────────────────────

    /// Open a negotiation with `provider` for `resource`. Nothing is sent
    /// until the first [`propose`](Self::propose).
    pub fn initiate(
        &self,
        provider: Party,
        resource: ResourceRef,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<NegotiationId, NegotiationError> {
        if provider == self.party {
            return Err(NegotiationError::SelfNegotiation(provider));
        }
        let now = self.clock.now();
        let deadline = deadline.unwrap_or_else(|| self.config.deadline_from(now));
        let negotiation = Negotiation::new(
            NegotiationId::new(),
            self.party.clone(),
            provider,
            resource,
            LocalRole::Consumer,
            deadline,
            now,
        );
        let id = negotiation.negotiation_id;

        info!(
            negotiation_id = %id,
            consumer = %negotiation.consumer,
            provider = %negotiation.provider,
            resource = %negotiation.resource,
            deadline = %deadline,
            "Negotiation initiated"
        );
        self.store.put_negotiation(negotiation);
        Ok(id)
    }

    /// Send the first offer, or re-propose after a counter-offer.
    pub async fn propose(
        &self,
        negotiation_id: NegotiationId,
        policy: UsagePolicy,
    ) -> Result<OfferId, NegotiationError> {
        policy.validate()?;
        let lock = self.known_lock(negotiation_id)?;
        let _guard = lock.lock().await;

        let mut negotiation = self.load(negotiation_id)?;
        if negotiation.local_role != LocalRole::Consumer {
            return Err(NegotiationError::WrongRole {
                negotiation_id,
                expected: LocalRole::Consumer,
            });
        }

        let now = self.clock.now();
        let next = match negotiation.state() {
            NegotiationState::Initiated => NegotiationState::Offered,
            _ => NegotiationState::CounterOffered,
        };
        self.ensure_live(&mut negotiation, next, now)?;

        if self.would_exhaust(&negotiation) {
            let last = negotiation.latest_offer().map(|o| o.offer_id);
            self.reject(&mut negotiation, RejectReason::NegotiationExhausted, last, now)
                .await?;
            return Err(NegotiationError::NegotiationExhausted(negotiation_id));
        }

        let offer = Offer::new(
            negotiation_id,
            self.party.clone(),
            policy,
            negotiation.resource.clone(),
            now,
        )
        .with_deadline(negotiation.deadline);
        let offer_id = offer.offer_id;

        negotiation.record_offer(offer.clone());
        self.apply(&mut negotiation, next, now, "offer sent")?;
        self.store.put_negotiation(negotiation.clone());
        self.send(&negotiation, NegotiationMessage::Offer { offer })
            .await?;
        Ok(offer_id)
    }

    /// [`initiate`](Self::initiate) followed by [`propose`](Self::propose).
    pub async fn request(
        &self,
        provider: Party,
        resource: ResourceRef,
        policy: UsagePolicy,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<(NegotiationId, OfferId), NegotiationError> {
        let negotiation_id = self.initiate(provider, resource, deadline)?;
        let offer_id = self.propose(negotiation_id, policy).await?;
        Ok((negotiation_id, offer_id))
    }

    /// Accept the counterpart's latest offer. Used after a strategy held a
    /// counter-offer for review.
    pub async fn accept(&self, negotiation_id: NegotiationId) -> Result<AgreementId, NegotiationError> {
        let lock = self.known_lock(negotiation_id)?;
        let _guard = lock.lock().await;

        let mut negotiation = self.load(negotiation_id)?;
        let now = self.clock.now();
        self.ensure_live(&mut negotiation, NegotiationState::Accepted, now)?;

        let offer = negotiation
            .latest_offer()
            .filter(|o| o.proposer != self.party)
            .cloned()
            .ok_or(NegotiationError::NoOfferToAccept(negotiation_id))?;
        let agreement = self.accept_offer(&mut negotiation, &offer, now).await?;
        Ok(agreement.agreement_id)
    }

    /// Abandon a negotiation. Either party may withdraw while it is open.
    pub async fn withdraw(&self, negotiation_id: NegotiationId) -> Result<(), NegotiationError> {
        let lock = self.known_lock(negotiation_id)?;
        let _guard = lock.lock().await;

        let mut negotiation = self.load(negotiation_id)?;
        let now = self.clock.now();
        self.ensure_live(&mut negotiation, NegotiationState::Withdrawn, now)?;

        self.apply(&mut negotiation, NegotiationState::Withdrawn, now, "withdrawn")?;
        negotiation.outcome = Some(NegotiationOutcome::Withdrawn {
            by: self.party.clone(),
        });
        self.store.put_negotiation(negotiation.clone());
        self.send(&negotiation, NegotiationMessage::Withdraw { negotiation_id })
            .await
    }

    /// Move every open negotiation whose deadline has passed to `Expired`.
    pub async fn expire_stale(&self) -> Vec<NegotiationId> {
        let now = self.clock.now();
        let mut expired = Vec::new();

        let candidates: Vec<NegotiationId> = self
            .store
            .negotiations()
            .into_iter()
            .filter(|n| !n.state().is_terminal() && n.is_overdue(now))
            .map(|n| n.negotiation_id)
            .collect();

        for id in candidates {
            let lock = self.lock_for(id);
            let _guard = lock.lock().await;
            let Ok(mut negotiation) = self.store.negotiation(id) else {
                continue;
            };
            if negotiation.state().is_terminal() || !negotiation.is_overdue(now) {
                continue;
            }
            if self.expire(&mut negotiation, now).is_ok() {
                expired.push(id);
            }
        }
        expired
    }

    // ── Inbound messages ────────────────────────────────────────────

    /// Process one inbound envelope.
    ///
    /// Protocol anomalies (tampered envelopes, messages for unknown or
    /// finished negotiations, stale offers, illegal transitions) are logged
    /// and reported as [`Handled::Dropped`]; replays are
    /// [`Handled::Duplicate`]. Errors are reserved for local failures and
    /// for a settled policy that diverges from the counterpart's.
    pub async fn handle(&self, envelope: Envelope) -> Result<Handled, NegotiationError> {
        if !envelope.verify_integrity() {
            warn!(
                envelope_id = %envelope.envelope_id,
                party = %self.party,
                "Integrity verification failed, dropping envelope"
            );
            return Ok(Handled::Dropped(DropReason::IntegrityFailure));
        }
        if envelope.to != self.party {
            return Ok(self.dropped(&envelope, DropReason::Misaddressed));
        }
        if envelope.from == self.party {
            return Ok(self.dropped(&envelope, DropReason::NotAParty));
        }

        let negotiation_id = envelope.message.negotiation_id();
        let lock = match &envelope.message {
            NegotiationMessage::Offer { offer } => {
                if offer.proposer != envelope.from {
                    return Ok(self.dropped(&envelope, DropReason::NotAParty));
                }
                if let Err(e) = offer.policy.validate() {
                    return Ok(self.dropped(&envelope, DropReason::InvalidPolicy(e)));
                }
                self.lock_for(negotiation_id)
            }
            _ => match self.known_lock(negotiation_id) {
                Ok(lock) => lock,
                Err(_) => return Ok(self.dropped(&envelope, DropReason::UnknownNegotiation)),
            },
        };
        let _guard = lock.lock().await;
        let now = self.clock.now();

        let from = envelope.from.clone();
        let handled = match envelope.message.clone() {
            NegotiationMessage::Offer { offer } => self.on_offer(from, offer, now).await?,
            NegotiationMessage::Accept {
                negotiation_id,
                offer_id,
                agreement_id,
                digest,
            } => {
                self.on_accept(from, negotiation_id, offer_id, agreement_id, digest, now)
                    .await?
            }
            NegotiationMessage::Reject {
                negotiation_id,
                reason,
                ..
            } => self.on_reject(from, negotiation_id, reason, now)?,
            NegotiationMessage::Withdraw { negotiation_id } => {
                self.on_withdraw(from, negotiation_id, now)?
            }
        };

        match &handled {
            Handled::Dropped(reason) => {
                return Ok(self.dropped(&envelope, reason.clone()));
            }
            Handled::Duplicate => debug!(
                negotiation_id = %negotiation_id,
                kind = envelope.message.kind(),
                "Duplicate message ignored"
            ),
            Handled::Applied(state) => debug!(
                negotiation_id = %negotiation_id,
                kind = envelope.message.kind(),
                state = %state,
                "Message applied"
            ),
        }
        Ok(handled)
    }

    async fn on_offer(
        &self,
        from: Party,
        offer: Offer,
        now: DateTime<Utc>,
    ) -> Result<Handled, NegotiationError> {
        if offer.proposer != from {
            return Ok(Handled::Dropped(DropReason::NotAParty));
        }

        let existing = self.store.negotiation(offer.negotiation_id).ok();
        if let Some(n) = &existing {
            if n.has_offer(offer.offer_id) {
                return Ok(Handled::Duplicate);
            }
            if n.state().is_terminal() {
                return Ok(Handled::Dropped(DropReason::Terminal(n.state())));
            }
            if n.counterpart() != &from {
                return Ok(Handled::Dropped(DropReason::NotAParty));
            }
            if n.resource != offer.resource {
                return Ok(Handled::Dropped(DropReason::ResourceMismatch));
            }
        }
        if let Err(e) = offer.policy.validate() {
            return Ok(Handled::Dropped(DropReason::InvalidPolicy(e)));
        }

        let mut negotiation = match existing {
            Some(n) => n,
            None => {
                let deadline = offer
                    .deadline
                    .unwrap_or_else(|| self.config.deadline_from(now));
                let n = Negotiation::new(
                    offer.negotiation_id,
                    from.clone(),
                    self.party.clone(),
                    offer.resource.clone(),
                    LocalRole::Provider,
                    deadline,
                    now,
                );
                info!(
                    negotiation_id = %n.negotiation_id,
                    consumer = %n.consumer,
                    resource = %n.resource,
                    deadline = %deadline,
                    "Negotiation opened by consumer"
                );
                self.store.put_negotiation(n.clone());
                n
            }
        };

        if negotiation.is_overdue(now) {
            self.expire(&mut negotiation, now)?;
            return Ok(Handled::Dropped(DropReason::Expired));
        }

        if self.would_exhaust(&negotiation) {
            self.reject(
                &mut negotiation,
                RejectReason::NegotiationExhausted,
                Some(offer.offer_id),
                now,
            )
            .await?;
            return Ok(Handled::Applied(negotiation.state()));
        }

        let next = match negotiation.state() {
            NegotiationState::Initiated => NegotiationState::Offered,
            _ => NegotiationState::CounterOffered,
        };
        negotiation.record_offer(offer.clone());
        if let Err(e) = self.apply(&mut negotiation, next, now, "offer received") {
            return Ok(Handled::Dropped(DropReason::InvalidTransition(e)));
        }
        self.store.put_negotiation(negotiation.clone());

        match negotiation.local_role {
            LocalRole::Provider => self.answer_as_provider(&mut negotiation, &offer, now).await?,
            LocalRole::Consumer => self.answer_as_consumer(&mut negotiation, &offer, now).await?,
        }
        Ok(Handled::Applied(negotiation.state()))
    }

    async fn answer_as_provider(
        &self,
        negotiation: &mut Negotiation,
        offer: &Offer,
        now: DateTime<Utc>,
    ) -> Result<(), NegotiationError> {
        let Some(acceptance) = self.catalogue.acceptance_policy(&negotiation.resource) else {
            return self
                .reject(negotiation, RejectReason::UnknownResource, Some(offer.offer_id), now)
                .await;
        };

        match assess_offer(&offer.policy, &acceptance) {
            Ok(OfferAssessment::Acceptable) => {
                self.accept_offer(negotiation, offer, now).await?;
                Ok(())
            }
            Ok(OfferAssessment::Negotiable { counter }) => {
                self.counter(negotiation, counter, now).await
            }
            Ok(OfferAssessment::NonNegotiable(reason)) => {
                self.reject(negotiation, reason.into(), Some(offer.offer_id), now)
                    .await
            }
            Err(e) => {
                warn!(
                    negotiation_id = %negotiation.negotiation_id,
                    error = %e,
                    "Counter-policy could not be built"
                );
                self.reject(
                    negotiation,
                    RejectReason::NothingGrantable,
                    Some(offer.offer_id),
                    now,
                )
                .await
            }
        }
    }

    async fn answer_as_consumer(
        &self,
        negotiation: &mut Negotiation,
        offer: &Offer,
        now: DateTime<Utc>,
    ) -> Result<(), NegotiationError> {
        match self.strategy.respond(negotiation, offer) {
            CounterResponse::Accept => {
                self.accept_offer(negotiation, offer, now).await?;
                Ok(())
            }
            CounterResponse::Counter(policy) => self.counter(negotiation, policy, now).await,
            CounterResponse::Reject(reason) => {
                self.reject(negotiation, reason, Some(offer.offer_id), now)
                    .await
            }
            CounterResponse::Hold => {
                info!(
                    negotiation_id = %negotiation.negotiation_id,
                    offer_id = %offer.offer_id,
                    "Counter-offer held for review"
                );
                Ok(())
            }
        }
    }

    async fn on_accept(
        &self,
        from: Party,
        negotiation_id: NegotiationId,
        offer_id: OfferId,
        agreement_id: AgreementId,
        digest: PolicyDigest,
        now: DateTime<Utc>,
    ) -> Result<Handled, NegotiationError> {
        let Ok(mut negotiation) = self.store.negotiation(negotiation_id) else {
            return Ok(Handled::Dropped(DropReason::UnknownNegotiation));
        };
        if negotiation.counterpart() != &from {
            return Ok(Handled::Dropped(DropReason::NotAParty));
        }
        if negotiation.state() == NegotiationState::Accepted
            && negotiation.accepted_offer == Some(offer_id)
        {
            return Ok(Handled::Duplicate);
        }
        if negotiation.state().is_terminal() {
            return Ok(Handled::Dropped(DropReason::Terminal(negotiation.state())));
        }
        if negotiation.is_overdue(now) {
            self.expire(&mut negotiation, now)?;
            return Ok(Handled::Dropped(DropReason::Expired));
        }

        let Some(offer) = negotiation
            .latest_offer()
            .filter(|o| o.offer_id == offer_id && o.proposer == self.party)
            .cloned()
        else {
            return Ok(Handled::Dropped(DropReason::StaleOffer));
        };
        if agreement_id != AgreementId::for_negotiation(&negotiation_id) {
            return Ok(Handled::Dropped(DropReason::AgreementMismatch));
        }
        if !negotiation.state().can_transition_to(NegotiationState::Accepted) {
            return Ok(Handled::Dropped(DropReason::InvalidTransition(
                IllegalTransition {
                    negotiation_id,
                    from: negotiation.state(),
                    to: NegotiationState::Accepted,
                },
            )));
        }

        let agreement = self
            .store
            .settle_agreement(negotiation_id, offer.policy.clone(), now)?;
        self.apply(
            &mut negotiation,
            NegotiationState::Accepted,
            now,
            "counterpart accepted offer",
        )?;
        negotiation.accepted_offer = Some(offer_id);
        negotiation.agreement_id = Some(agreement.agreement_id);
        negotiation.outcome = Some(NegotiationOutcome::Agreed {
            agreement_id: agreement.agreement_id,
        });
        self.store.put_negotiation(negotiation);

        match self.store.reconcile(negotiation_id, digest) {
            Ok(()) => Ok(Handled::Applied(NegotiationState::Accepted)),
            Err(StoreError::PolicyConflict {
                negotiation_id,
                local,
                remote,
            }) => Err(NegotiationError::PolicyConflict {
                negotiation_id,
                local,
                remote,
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn on_reject(
        &self,
        from: Party,
        negotiation_id: NegotiationId,
        reason: RejectReason,
        now: DateTime<Utc>,
    ) -> Result<Handled, NegotiationError> {
        let Ok(mut negotiation) = self.store.negotiation(negotiation_id) else {
            return Ok(Handled::Dropped(DropReason::UnknownNegotiation));
        };
        if negotiation.counterpart() != &from {
            return Ok(Handled::Dropped(DropReason::NotAParty));
        }
        if negotiation.state() == NegotiationState::Rejected {
            return Ok(Handled::Duplicate);
        }
        if negotiation.state().is_terminal() {
            return Ok(Handled::Dropped(DropReason::Terminal(negotiation.state())));
        }
        if negotiation.is_overdue(now) {
            self.expire(&mut negotiation, now)?;
            return Ok(Handled::Dropped(DropReason::Expired));
        }

        if let Err(e) = self.apply(&mut negotiation, NegotiationState::Rejected, now, reason.code()) {
            return Ok(Handled::Dropped(DropReason::InvalidTransition(e)));
        }
        warn!(
            negotiation_id = %negotiation_id,
            by = %from,
            reason = %reason,
            "Negotiation rejected by counterpart"
        );
        negotiation.outcome = Some(NegotiationOutcome::Rejected { by: from, reason });
        self.store.put_negotiation(negotiation);
        Ok(Handled::Applied(NegotiationState::Rejected))
    }

    fn on_withdraw(
        &self,
        from: Party,
        negotiation_id: NegotiationId,
        now: DateTime<Utc>,
    ) -> Result<Handled, NegotiationError> {
        let Ok(mut negotiation) = self.store.negotiation(negotiation_id) else {
            return Ok(Handled::Dropped(DropReason::UnknownNegotiation));
        };
        if negotiation.counterpart() != &from {
            return Ok(Handled::Dropped(DropReason::NotAParty));
        }
        if negotiation.state() == NegotiationState::Withdrawn {
            return Ok(Handled::Duplicate);
        }
        if negotiation.state().is_terminal() {
            return Ok(Handled::Dropped(DropReason::Terminal(negotiation.state())));
        }
        if negotiation.is_overdue(now) {
            self.expire(&mut negotiation, now)?;
            return Ok(Handled::Dropped(DropReason::Expired));
        }

        if let Err(e) = self.apply(
            &mut negotiation,
            NegotiationState::Withdrawn,
            now,
            "counterpart withdrew",
        ) {
            return Ok(Handled::Dropped(DropReason::InvalidTransition(e)));
        }
        negotiation.outcome = Some(NegotiationOutcome::Withdrawn { by: from });
        self.store.put_negotiation(negotiation);
        Ok(Handled::Applied(NegotiationState::Withdrawn))
    }

    // ── Shared steps ────────────────────────────────────────────────

    /// Settle the agreement from `offer`, move to `Accepted` and tell the
    /// counterpart.
    async fn accept_offer(
        &self,
        negotiation: &mut Negotiation,
        offer: &Offer,
        now: DateTime<Utc>,
    ) -> Result<Arc<Agreement>, NegotiationError> {
        let negotiation_id = negotiation.negotiation_id;
        if !negotiation.state().can_transition_to(NegotiationState::Accepted) {
            return Err(IllegalTransition {
                negotiation_id,
                from: negotiation.state(),
                to: NegotiationState::Accepted,
            }
            .into());
        }

        let agreement = self
            .store
            .settle_agreement(negotiation_id, offer.policy.clone(), now)?;
        self.apply(negotiation, NegotiationState::Accepted, now, "offer accepted")?;
        negotiation.accepted_offer = Some(offer.offer_id);
        negotiation.agreement_id = Some(agreement.agreement_id);
        negotiation.outcome = Some(NegotiationOutcome::Agreed {
            agreement_id: agreement.agreement_id,
        });
        self.store.put_negotiation(negotiation.clone());

        self.send(
            negotiation,
            NegotiationMessage::Accept {
                negotiation_id,
                offer_id: offer.offer_id,
                agreement_id: agreement.agreement_id,
                digest: agreement.digest(),
            },
        )
        .await?;
        Ok(agreement)
    }

    async fn counter(
        &self,
        negotiation: &mut Negotiation,
        policy: UsagePolicy,
        now: DateTime<Utc>,
    ) -> Result<(), NegotiationError> {
        if self.would_exhaust(negotiation) {
            let last = negotiation.latest_offer().map(|o| o.offer_id);
            return self
                .reject(negotiation, RejectReason::NegotiationExhausted, last, now)
                .await;
        }

        let offer = Offer::new(
            negotiation.negotiation_id,
            self.party.clone(),
            policy,
            negotiation.resource.clone(),
            now,
        )
        .with_deadline(negotiation.deadline);
        negotiation.record_offer(offer.clone());
        self.apply(
            negotiation,
            NegotiationState::CounterOffered,
            now,
            "counter-offer sent",
        )?;
        self.store.put_negotiation(negotiation.clone());
        self.send(negotiation, NegotiationMessage::Offer { offer })
            .await
    }

    async fn reject(
        &self,
        negotiation: &mut Negotiation,
        reason: RejectReason,
        offer_id: Option<OfferId>,
        now: DateTime<Utc>,
    ) -> Result<(), NegotiationError> {
        self.apply(negotiation, NegotiationState::Rejected, now, reason.code())?;
        warn!(
            negotiation_id = %negotiation.negotiation_id,
            reason = %reason,
            "Negotiation rejected"
        );
        negotiation.outcome = Some(NegotiationOutcome::Rejected {
            by: self.party.clone(),
            reason: reason.clone(),
        });
        self.store.put_negotiation(negotiation.clone());
        self.send(
            negotiation,
            NegotiationMessage::Reject {
                negotiation_id: negotiation.negotiation_id,
                offer_id,
                reason,
            },
        )
        .await
    }

    fn expire(&self, negotiation: &mut Negotiation, now: DateTime<Utc>) -> Result<(), IllegalTransition> {
        self.apply(negotiation, NegotiationState::Expired, now, "deadline passed")?;
        negotiation.outcome = Some(NegotiationOutcome::Expired);
        self.store.put_negotiation(negotiation.clone());
        Ok(())
    }

    /// Fail unless `negotiation` may move to `next` now. An overdue
    /// negotiation is expired on the way out.
    fn ensure_live(
        &self,
        negotiation: &mut Negotiation,
        next: NegotiationState,
        now: DateTime<Utc>,
    ) -> Result<(), NegotiationError> {
        let negotiation_id = negotiation.negotiation_id;
        if negotiation.state() == NegotiationState::Expired {
            return Err(NegotiationError::NegotiationExpired(negotiation_id));
        }
        if !negotiation.state().is_terminal() && negotiation.is_overdue(now) {
            self.expire(negotiation, now)?;
            return Err(NegotiationError::NegotiationExpired(negotiation_id));
        }
        if !negotiation.state().can_transition_to(next) {
            return Err(IllegalTransition {
                negotiation_id,
                from: negotiation.state(),
                to: next,
            }
            .into());
        }
        Ok(())
    }

    /// Whether appending one more offer would exceed the counter budget.
    fn would_exhaust(&self, negotiation: &Negotiation) -> bool {
        negotiation.offers().len() > self.config.counter_offer_budget
    }

    fn apply(
        &self,
        negotiation: &mut Negotiation,
        to: NegotiationState,
        now: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), IllegalTransition> {
        let record = negotiation.transition(to, now, reason)?;
        self.audit.record(AuditRecord::transition(
            now,
            negotiation.negotiation_id,
            record.from.name(),
            record.to.name(),
            reason,
        ));
        info!(
            negotiation_id = %negotiation.negotiation_id,
            party = %self.party,
            from = %record.from,
            to = %record.to,
            reason,
            "Negotiation transition"
        );
        Ok(())
    }

    async fn send(
        &self,
        negotiation: &Negotiation,
        message: NegotiationMessage,
    ) -> Result<(), NegotiationError> {
        let envelope = Envelope::seal(
            self.party.clone(),
            negotiation.counterpart().clone(),
            self.clock.now(),
            message,
        );
        self.transport.send(envelope).await?;
        Ok(())
    }

    fn dropped(&self, envelope: &Envelope, reason: DropReason) -> Handled {
        warn!(
            envelope_id = %envelope.envelope_id,
            negotiation_id = %envelope.message.negotiation_id(),
            from = %envelope.from,
            kind = envelope.message.kind(),
            reason = %reason,
            "Message dropped"
        );
        Handled::Dropped(reason)
    }

    fn load(&self, id: NegotiationId) -> Result<Negotiation, NegotiationError> {
        self.store.negotiation(id).map_err(|e| match e {
            StoreError::NegotiationNotFound(id) => NegotiationError::NotFound(id),
            other => other.into(),
        })
    }

    fn lock_for(&self, id: NegotiationId) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(id).or_default().value())
    }

    /// Lock for a negotiation already in the store. Ids named only by a
    /// message or a caller never get an entry.
    fn known_lock(&self, id: NegotiationId) -> Result<Arc<Mutex<()>>, NegotiationError> {
        if !self.store.contains_negotiation(id) {
            return Err(NegotiationError::NotFound(id));
        }
        Ok(self.lock_for(id))
    }
}
