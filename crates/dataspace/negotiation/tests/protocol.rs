//! Two engines negotiating over the in-memory network.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use dataspace_negotiation::{
    AcceptAny, AcceptancePolicySource, CounterOfferStrategy, DropReason, Handled, HoldForReview,
    NegotiationConfig, NegotiationEngine, NegotiationError, RequireMinimum, StaticCatalogue,
};
use dataspace_policy::{Action, Duty, PolicyDigest, UsagePolicy};
use dataspace_store::{ContractStore, NegotiationOutcome, NegotiationState, RejectReason};
use dataspace_transport::{Envelope, InMemoryNetwork, Mailbox, NegotiationMessage, Transport};
use dataspace_types::{
    AgreementId, AuditSubject, ManualClock, MemoryAuditSink, NegotiationId, Party, ResourceRef,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap()
}

fn recycler() -> Party {
    Party::new("urn:dpp:recycler").unwrap()
}

fn manufacturer() -> Party {
    Party::new("urn:dpp:manufacturer").unwrap()
}

fn battery() -> ResourceRef {
    ResourceRef::new("passport:battery-42")
}

fn policy(action: Action, target: &str) -> UsagePolicy {
    UsagePolicy::builder().permit(action, target).build().unwrap()
}

fn read_only_catalogue() -> StaticCatalogue {
    StaticCatalogue::new().with(
        battery(),
        UsagePolicy::builder()
            .permit(Action::Read, "materials")
            .prohibit(Action::Delete, "materials")
            .build()
            .unwrap(),
    )
}

struct Harness {
    network: Arc<InMemoryNetwork>,
    clock: Arc<ManualClock>,
    audit: Arc<MemoryAuditSink>,
    consumer: NegotiationEngine,
    provider: NegotiationEngine,
    consumer_inbox: Mailbox,
    provider_inbox: Mailbox,
}

impl Harness {
    fn new(
        strategy: Arc<dyn CounterOfferStrategy>,
        catalogue: Arc<dyn AcceptancePolicySource>,
        config: NegotiationConfig,
    ) -> Self {
        let network = Arc::new(InMemoryNetwork::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let audit = Arc::new(MemoryAuditSink::new());
        let consumer_inbox = network.register(recycler());
        let provider_inbox = network.register(manufacturer());

        let consumer = NegotiationEngine::new(
            recycler(),
            Arc::new(ContractStore::new()),
            network.clone() as Arc<dyn Transport>,
        )
        .with_strategy(strategy)
        .with_clock(clock.clone())
        .with_audit(audit.clone())
        .with_config(config.clone());

        let provider = NegotiationEngine::new(
            manufacturer(),
            Arc::new(ContractStore::new()),
            network.clone() as Arc<dyn Transport>,
        )
        .with_catalogue(catalogue)
        .with_clock(clock.clone())
        .with_config(config);

        Self {
            network,
            clock,
            audit,
            consumer,
            provider,
            consumer_inbox,
            provider_inbox,
        }
    }

    fn standard() -> Self {
        Self::new(
            Arc::new(AcceptAny),
            Arc::new(read_only_catalogue()),
            NegotiationConfig::default(),
        )
    }

    /// Deliver queued messages until both inboxes are empty.
    async fn pump(&mut self) -> Vec<Handled> {
        let mut handled = Vec::new();
        loop {
            let mut progressed = false;
            while let Some(envelope) = self.provider_inbox.try_recv() {
                handled.push(self.provider.handle(envelope).await.unwrap());
                progressed = true;
            }
            while let Some(envelope) = self.consumer_inbox.try_recv() {
                handled.push(self.consumer.handle(envelope).await.unwrap());
                progressed = true;
            }
            if !progressed {
                return handled;
            }
        }
    }

    fn states(&self, id: NegotiationId) -> (NegotiationState, NegotiationState) {
        (
            self.consumer.negotiation(id).unwrap().state(),
            self.provider.negotiation(id).unwrap().state(),
        )
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn distribute_request_settles_read_only_agreement() {
    let mut h = Harness::standard();
    let (id, _) = h
        .consumer
        .request(manufacturer(), battery(), policy(Action::Distribute, "materials"), None)
        .await
        .unwrap();
    h.pump().await;

    assert_eq!(
        h.states(id),
        (NegotiationState::Accepted, NegotiationState::Accepted)
    );

    let mine = h.consumer.agreement_for(id).unwrap();
    let theirs = h.provider.agreement_for(id).unwrap();
    assert_eq!(mine.agreement_id, theirs.agreement_id);
    assert_eq!(mine.agreement_id, AgreementId::for_negotiation(&id));
    assert_eq!(mine.digest(), theirs.digest());

    let actions: Vec<Action> = mine.policy.permissions().map(|r| r.action()).collect();
    assert_eq!(actions, vec![Action::Read]);
    assert_eq!(h.consumer.negotiation(id).unwrap().offers().len(), 2);
}

#[tokio::test]
async fn acceptable_offer_is_accepted_without_counter() {
    let mut h = Harness::standard();
    let (id, offer_id) = h
        .consumer
        .request(manufacturer(), battery(), policy(Action::Read, "materials.composition"), None)
        .await
        .unwrap();
    h.pump().await;

    let negotiation = h.provider.negotiation(id).unwrap();
    assert_eq!(negotiation.state(), NegotiationState::Accepted);
    assert_eq!(negotiation.accepted_offer, Some(offer_id));
    assert_eq!(negotiation.offers().len(), 1);
    assert_eq!(
        h.consumer.negotiation(id).unwrap().accepted_offer,
        Some(offer_id)
    );
}

#[tokio::test]
async fn unknown_resource_is_rejected() {
    let mut h = Harness::standard();
    let (id, _) = h
        .consumer
        .request(
            manufacturer(),
            ResourceRef::new("passport:unknown"),
            policy(Action::Read, "materials"),
            None,
        )
        .await
        .unwrap();
    h.pump().await;

    assert_eq!(
        h.states(id),
        (NegotiationState::Rejected, NegotiationState::Rejected)
    );
    assert_eq!(
        h.consumer.negotiation(id).unwrap().outcome,
        Some(NegotiationOutcome::Rejected {
            by: manufacturer(),
            reason: RejectReason::UnknownResource,
        })
    );
}

#[tokio::test]
async fn forbidden_action_is_rejected_outright() {
    let mut h = Harness::standard();
    let (id, _) = h
        .consumer
        .request(manufacturer(), battery(), policy(Action::Delete, "materials"), None)
        .await
        .unwrap();
    h.pump().await;

    let outcome = h.consumer.negotiation(id).unwrap().outcome;
    assert_eq!(
        outcome,
        Some(NegotiationOutcome::Rejected {
            by: manufacturer(),
            reason: RejectReason::ForbiddenAction {
                action: Action::Delete
            },
        })
    );
    assert!(h.consumer.agreement_for(id).is_none());
}

#[tokio::test]
async fn required_obligation_reaches_agreement() {
    let catalogue = StaticCatalogue::new().with(
        battery(),
        UsagePolicy::builder()
            .permit(Action::Read, "materials")
            .oblige(Action::Read, "materials", Duty::Notify { within_hours: 48 })
            .build()
            .unwrap(),
    );
    let mut h = Harness::new(
        Arc::new(AcceptAny),
        Arc::new(catalogue),
        NegotiationConfig::default(),
    );
    let (id, _) = h
        .consumer
        .request(manufacturer(), battery(), policy(Action::Read, "materials"), None)
        .await
        .unwrap();
    h.pump().await;

    let agreement = h.consumer.agreement_for(id).unwrap();
    assert!(agreement
        .policy
        .obligations()
        .any(|o| o.duty() == Some(&Duty::Notify { within_hours: 48 })));
}

// ---------------------------------------------------------------------------
// Bounds
// ---------------------------------------------------------------------------

#[tokio::test]
async fn endless_countering_is_exhausted() {
    let wanted = policy(Action::Distribute, "materials");
    let mut h = Harness::new(
        Arc::new(RequireMinimum::new(wanted.clone())),
        Arc::new(read_only_catalogue()),
        NegotiationConfig::default(),
    );
    let (id, _) = h
        .consumer
        .request(manufacturer(), battery(), wanted, None)
        .await
        .unwrap();
    h.pump().await;

    assert_eq!(
        h.states(id),
        (NegotiationState::Rejected, NegotiationState::Rejected)
    );
    let negotiation = h.consumer.negotiation(id).unwrap();
    assert_eq!(negotiation.counter_rounds(), 5);
    assert!(matches!(
        negotiation.outcome,
        Some(NegotiationOutcome::Rejected {
            reason: RejectReason::NegotiationExhausted,
            ..
        })
    ));
    assert!(h.provider.agreement_for(id).is_none());
}

#[tokio::test]
async fn overdue_offer_expires_both_sides() {
    let mut h = Harness::standard();
    let (id, _) = h
        .consumer
        .request(
            manufacturer(),
            battery(),
            policy(Action::Read, "materials"),
            Some(t0() + Duration::seconds(1)),
        )
        .await
        .unwrap();

    h.clock.advance(Duration::seconds(2));
    let handled = h.pump().await;
    assert_eq!(handled, vec![Handled::Dropped(DropReason::Expired)]);
    assert_eq!(
        h.provider.negotiation(id).unwrap().state(),
        NegotiationState::Expired
    );

    assert_eq!(h.consumer.expire_stale().await, vec![id]);
    assert_eq!(
        h.consumer.negotiation(id).unwrap().state(),
        NegotiationState::Expired
    );
    assert!(matches!(
        h.consumer.propose(id, policy(Action::Read, "materials")).await,
        Err(NegotiationError::NegotiationExpired(_))
    ));
}

// ---------------------------------------------------------------------------
// Idempotence and integrity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn replayed_accept_is_a_duplicate() {
    let mut h = Harness::standard();
    let (id, _) = h
        .consumer
        .request(manufacturer(), battery(), policy(Action::Read, "materials"), None)
        .await
        .unwrap();

    let offer = h.provider_inbox.try_recv().unwrap();
    h.provider.handle(offer).await.unwrap();
    let accept = h.consumer_inbox.try_recv().unwrap();

    assert_eq!(
        h.consumer.handle(accept.clone()).await.unwrap(),
        Handled::Applied(NegotiationState::Accepted)
    );
    assert_eq!(h.consumer.handle(accept).await.unwrap(), Handled::Duplicate);
    assert_eq!(h.consumer.store().agreement_count(), 1);
    assert!(h.consumer.agreement_for(id).is_some());
}

#[tokio::test]
async fn duplicate_delivery_does_not_change_outcome() {
    let mut h = Harness::standard();
    h.network.set_duplicate_delivery(true);
    let (id, _) = h
        .consumer
        .request(manufacturer(), battery(), policy(Action::Distribute, "materials"), None)
        .await
        .unwrap();
    let handled = h.pump().await;

    assert!(handled.contains(&Handled::Duplicate));
    assert_eq!(
        h.states(id),
        (NegotiationState::Accepted, NegotiationState::Accepted)
    );
    assert_eq!(h.consumer.negotiation(id).unwrap().offers().len(), 2);
    assert_eq!(h.provider.store().agreement_count(), 1);
}

#[tokio::test]
async fn tampered_envelope_is_dropped() {
    let mut h = Harness::standard();
    h.consumer
        .request(manufacturer(), battery(), policy(Action::Read, "materials"), None)
        .await
        .unwrap();

    let mut envelope = h.provider_inbox.try_recv().unwrap();
    if let NegotiationMessage::Offer { offer } = &mut envelope.message {
        offer.policy = policy(Action::Distribute, "materials");
    }
    assert_eq!(
        h.provider.handle(envelope).await.unwrap(),
        Handled::Dropped(DropReason::IntegrityFailure)
    );
    assert_eq!(h.provider.store().negotiation_count(), 0);
}

#[tokio::test]
async fn divergent_digest_is_a_policy_conflict() {
    let mut h = Harness::standard();
    let (id, _) = h
        .consumer
        .request(manufacturer(), battery(), policy(Action::Read, "materials"), None)
        .await
        .unwrap();

    let offer = h.provider_inbox.try_recv().unwrap();
    h.provider.handle(offer).await.unwrap();
    let accept = h.consumer_inbox.try_recv().unwrap();

    let NegotiationMessage::Accept {
        negotiation_id,
        offer_id,
        agreement_id,
        ..
    } = accept.message
    else {
        panic!("expected accept");
    };
    let forged = Envelope::seal(
        manufacturer(),
        recycler(),
        t0(),
        NegotiationMessage::Accept {
            negotiation_id,
            offer_id,
            agreement_id,
            digest: PolicyDigest([7u8; 32]),
        },
    );

    let err = h.consumer.handle(forged).await.unwrap_err();
    assert!(matches!(err, NegotiationError::PolicyConflict { .. }));
    assert_eq!(
        h.consumer.negotiation(id).unwrap().state(),
        NegotiationState::Accepted
    );
}

// ---------------------------------------------------------------------------
// Manual decisions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn held_counter_can_be_accepted_manually() {
    let mut h = Harness::new(
        Arc::new(HoldForReview),
        Arc::new(read_only_catalogue()),
        NegotiationConfig::default(),
    );
    let (id, _) = h
        .consumer
        .request(manufacturer(), battery(), policy(Action::Distribute, "materials"), None)
        .await
        .unwrap();
    h.pump().await;
    assert_eq!(
        h.states(id),
        (NegotiationState::CounterOffered, NegotiationState::CounterOffered)
    );

    let agreement_id = h.consumer.accept(id).await.unwrap();
    h.pump().await;
    assert_eq!(
        h.states(id),
        (NegotiationState::Accepted, NegotiationState::Accepted)
    );
    assert_eq!(
        h.provider.agreement_for(id).unwrap().agreement_id,
        agreement_id
    );
}

#[tokio::test]
async fn withdrawal_propagates_and_is_final() {
    let mut h = Harness::new(
        Arc::new(HoldForReview),
        Arc::new(read_only_catalogue()),
        NegotiationConfig::default(),
    );
    let (id, _) = h
        .consumer
        .request(manufacturer(), battery(), policy(Action::Distribute, "materials"), None)
        .await
        .unwrap();
    h.pump().await;

    h.consumer.withdraw(id).await.unwrap();
    h.pump().await;
    assert_eq!(
        h.states(id),
        (NegotiationState::Withdrawn, NegotiationState::Withdrawn)
    );
    assert_eq!(
        h.provider.negotiation(id).unwrap().outcome,
        Some(NegotiationOutcome::Withdrawn { by: recycler() })
    );
    assert!(matches!(
        h.consumer.withdraw(id).await,
        Err(NegotiationError::InvalidTransition(_))
    ));
}

#[tokio::test]
async fn provider_cannot_propose() {
    let mut h = Harness::standard();
    let (id, _) = h
        .consumer
        .request(manufacturer(), battery(), policy(Action::Read, "materials"), None)
        .await
        .unwrap();
    h.pump().await;

    assert!(matches!(
        h.provider.propose(id, policy(Action::Read, "materials")).await,
        Err(NegotiationError::WrongRole { .. })
    ));
    assert!(matches!(
        h.consumer.initiate(recycler(), battery(), None),
        Err(NegotiationError::SelfNegotiation(_))
    ));
}

#[tokio::test]
async fn every_transition_is_audited() {
    let mut h = Harness::standard();
    let (id, _) = h
        .consumer
        .request(manufacturer(), battery(), policy(Action::Distribute, "materials"), None)
        .await
        .unwrap();
    h.pump().await;

    let records = h.audit.records_for(&AuditSubject::Negotiation(id));
    let steps: Vec<(String, Option<String>)> = records
        .iter()
        .map(|r| (r.from.clone(), r.to.clone()))
        .collect();
    assert_eq!(
        steps,
        vec![
            ("INITIATED".to_string(), Some("OFFERED".to_string())),
            ("OFFERED".to_string(), Some("COUNTER_OFFERED".to_string())),
            ("COUNTER_OFFERED".to_string(), Some("ACCEPTED".to_string())),
        ]
    );
    assert_eq!(
        h.consumer.negotiation(id).unwrap().transitions().len(),
        records.len()
    );
}

#[tokio::test]
async fn independent_negotiations_proceed_concurrently() {
    let mut h = Harness::standard();
    let first = h.consumer.request(
        manufacturer(),
        battery(),
        policy(Action::Read, "materials"),
        None,
    );
    let second = h.consumer.request(
        manufacturer(),
        battery(),
        policy(Action::Distribute, "materials"),
        None,
    );
    let (first, second) = tokio::join!(first, second);
    let (a, _) = first.unwrap();
    let (b, _) = second.unwrap();
    assert_ne!(a, b);

    h.pump().await;
    assert_eq!(h.states(a).0, NegotiationState::Accepted);
    assert_eq!(h.states(b).0, NegotiationState::Accepted);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_accept_and_withdraw_settle_exactly_one() {
    for _ in 0..25 {
        let mut h = Harness::new(
            Arc::new(HoldForReview),
            Arc::new(read_only_catalogue()),
            NegotiationConfig::default(),
        );
        let (id, _) = h
            .consumer
            .request(manufacturer(), battery(), policy(Action::Distribute, "materials"), None)
            .await
            .unwrap();
        h.pump().await;

        let Harness {
            consumer,
            provider,
            mut provider_inbox,
            ..
        } = h;
        let consumer = Arc::new(consumer);

        let accepting = tokio::spawn({
            let consumer = consumer.clone();
            async move { consumer.accept(id).await }
        });
        let withdrawing = tokio::spawn({
            let consumer = consumer.clone();
            async move { consumer.withdraw(id).await }
        });
        let accepted = accepting.await.unwrap();
        let withdrawn = withdrawing.await.unwrap();
        assert!(
            accepted.is_ok() != withdrawn.is_ok(),
            "accept: {:?}, withdraw: {:?}",
            accepted,
            withdrawn
        );

        let negotiation = consumer.negotiation(id).unwrap();
        let expected = if accepted.is_ok() {
            assert_eq!(consumer.store().agreement_count(), 1);
            NegotiationState::Accepted
        } else {
            assert_eq!(consumer.store().agreement_count(), 0);
            NegotiationState::Withdrawn
        };
        assert_eq!(negotiation.state(), expected);
        assert_eq!(negotiation.transitions().last().map(|t| t.to), Some(expected));

        while let Some(envelope) = provider_inbox.try_recv() {
            provider.handle(envelope).await.unwrap();
        }
        assert_eq!(provider.negotiation(id).unwrap().state(), expected);
    }
}

#[tokio::test]
async fn withdrawing_before_the_first_offer() {
    let mut h = Harness::standard();
    let id = h.consumer.initiate(manufacturer(), battery(), None).unwrap();

    h.consumer.withdraw(id).await.unwrap();
    let negotiation = h.consumer.negotiation(id).unwrap();
    assert_eq!(negotiation.state(), NegotiationState::Withdrawn);
    assert_eq!(
        negotiation.outcome,
        Some(NegotiationOutcome::Withdrawn { by: recycler() })
    );
    assert!(negotiation.offers().is_empty());

    assert_eq!(
        h.pump().await,
        vec![Handled::Dropped(DropReason::UnknownNegotiation)]
    );
    assert_eq!(h.provider.store().negotiation_count(), 0);
    assert!(matches!(
        h.consumer.propose(id, policy(Action::Read, "materials")).await,
        Err(NegotiationError::InvalidTransition(_))
    ));
}

#[tokio::test]
async fn offer_outside_the_catalogue_is_nothing_grantable() {
    let mut h = Harness::standard();
    let (id, _) = h
        .consumer
        .request(manufacturer(), battery(), policy(Action::Distribute, "logistics"), None)
        .await
        .unwrap();
    h.pump().await;

    assert_eq!(
        h.states(id),
        (NegotiationState::Rejected, NegotiationState::Rejected)
    );
    assert_eq!(
        h.consumer.negotiation(id).unwrap().outcome,
        Some(NegotiationOutcome::Rejected {
            by: manufacturer(),
            reason: RejectReason::NothingGrantable,
        })
    );
    assert!(h.provider.agreement_for(id).is_none());
}
