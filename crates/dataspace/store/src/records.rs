use chrono::{DateTime, Utc};
use dataspace_policy::{Action, PolicyDigest, Unacceptable, UsagePolicy};
use dataspace_types::{AgreementId, NegotiationId, OfferId, Party, ResourceRef};
use serde::{Deserialize, Serialize};

use crate::error::IllegalTransition;

/// A policy proposal within a negotiation. Immutable once sent; a
/// counter-offer is a new `Offer` with the same negotiation id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub offer_id: OfferId,
    pub negotiation_id: NegotiationId,
    pub proposer: Party,
    pub policy: UsagePolicy,
    pub resource: ResourceRef,
    pub created_at: DateTime<Utc>,
    /// The proposer's negotiation deadline, applied by the receiver too.
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

impl Offer {
    pub fn new(
        negotiation_id: NegotiationId,
        proposer: Party,
        policy: UsagePolicy,
        resource: ResourceRef,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            offer_id: OfferId::new(),
            negotiation_id,
            proposer,
            policy,
            resource,
            created_at,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Which side of a negotiation the local connector plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalRole {
    Consumer,
    Provider,
}

/// Negotiation lifecycle.
///
/// `Initiated` is only ever a starting state. `Accepted`, `Rejected`,
/// `Withdrawn` and `Expired` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NegotiationState {
    Initiated,
    Offered,
    CounterOffered,
    Accepted,
    Rejected,
    Withdrawn,
    Expired,
}

impl NegotiationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NegotiationState::Accepted
                | NegotiationState::Rejected
                | NegotiationState::Withdrawn
                | NegotiationState::Expired
        )
    }

    /// States reachable from `self` in one step.
    pub fn successors(&self) -> &'static [NegotiationState] {
        use NegotiationState::*;
        match self {
            Initiated => &[Offered, Withdrawn, Expired],
            Offered | CounterOffered => {
                &[CounterOffered, Accepted, Rejected, Withdrawn, Expired]
            }
            Accepted | Rejected | Withdrawn | Expired => &[],
        }
    }

    pub fn can_transition_to(&self, next: NegotiationState) -> bool {
        self.successors().contains(&next)
    }

    pub fn name(&self) -> &'static str {
        match self {
            NegotiationState::Initiated => "INITIATED",
            NegotiationState::Offered => "OFFERED",
            NegotiationState::CounterOffered => "COUNTER_OFFERED",
            NegotiationState::Accepted => "ACCEPTED",
            NegotiationState::Rejected => "REJECTED",
            NegotiationState::Withdrawn => "WITHDRAWN",
            NegotiationState::Expired => "EXPIRED",
        }
    }
}

impl std::fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Reason code carried by a rejection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum RejectReason {
    ForbiddenAction { action: Action },
    NothingGrantable,
    UnknownResource,
    NegotiationExhausted,
    ConsumerDeclined,
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::ForbiddenAction { .. } => "forbidden_action",
            RejectReason::NothingGrantable => "nothing_grantable",
            RejectReason::UnknownResource => "unknown_resource",
            RejectReason::NegotiationExhausted => "negotiation_exhausted",
            RejectReason::ConsumerDeclined => "consumer_declined",
        }
    }
}

impl From<Unacceptable> for RejectReason {
    fn from(value: Unacceptable) -> Self {
        match value {
            Unacceptable::ForbiddenAction { action } => RejectReason::ForbiddenAction { action },
            Unacceptable::NothingGrantable => RejectReason::NothingGrantable,
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::ForbiddenAction { action } => write!(f, "forbidden_action({})", action),
            other => f.write_str(other.code()),
        }
    }
}

/// How a negotiation ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NegotiationOutcome {
    Agreed { agreement_id: AgreementId },
    Rejected { by: Party, reason: RejectReason },
    Withdrawn { by: Party },
    Expired,
}

/// One entry in a negotiation's history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: NegotiationState,
    pub to: NegotiationState,
    pub at: DateTime<Utc>,
    pub reason: String,
}

/// One party's local copy of a negotiation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Negotiation {
    pub negotiation_id: NegotiationId,
    pub consumer: Party,
    pub provider: Party,
    pub resource: ResourceRef,
    pub local_role: LocalRole,
    offers: Vec<Offer>,
    state: NegotiationState,
    pub deadline: DateTime<Utc>,
    pub accepted_offer: Option<OfferId>,
    pub agreement_id: Option<AgreementId>,
    pub outcome: Option<NegotiationOutcome>,
    transitions: Vec<TransitionRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Negotiation {
    pub fn new(
        negotiation_id: NegotiationId,
        consumer: Party,
        provider: Party,
        resource: ResourceRef,
        local_role: LocalRole,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            negotiation_id,
            consumer,
            provider,
            resource,
            local_role,
            offers: Vec::new(),
            state: NegotiationState::Initiated,
            deadline,
            accepted_offer: None,
            agreement_id: None,
            outcome: None,
            transitions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn offers(&self) -> &[Offer] {
        &self.offers
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn latest_offer(&self) -> Option<&Offer> {
        self.offers.last()
    }

    pub fn offer(&self, offer_id: OfferId) -> Option<&Offer> {
        self.offers.iter().find(|o| o.offer_id == offer_id)
    }

    pub fn has_offer(&self, offer_id: OfferId) -> bool {
        self.offer(offer_id).is_some()
    }

    /// The most recent offer sent by `party`.
    pub fn latest_offer_from(&self, party: &Party) -> Option<&Offer> {
        self.offers.iter().rev().find(|o| &o.proposer == party)
    }

    /// Counter rounds so far: every offer after the first.
    pub fn counter_rounds(&self) -> usize {
        self.offers.len().saturating_sub(1)
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }

    pub fn local_party(&self) -> &Party {
        match self.local_role {
            LocalRole::Consumer => &self.consumer,
            LocalRole::Provider => &self.provider,
        }
    }

    pub fn counterpart(&self) -> &Party {
        match self.local_role {
            LocalRole::Consumer => &self.provider,
            LocalRole::Provider => &self.consumer,
        }
    }

    pub fn is_party(&self, party: &Party) -> bool {
        &self.consumer == party || &self.provider == party
    }

    /// Append an offer. Offers are never removed or edited.
    pub fn record_offer(&mut self, offer: Offer) {
        self.updated_at = self.updated_at.max(offer.created_at);
        self.offers.push(offer);
    }

    /// Move to `to`, recording the step in the history.
    pub fn transition(
        &mut self,
        to: NegotiationState,
        at: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Result<TransitionRecord, IllegalTransition> {
        if !self.state.can_transition_to(to) {
            return Err(IllegalTransition {
                negotiation_id: self.negotiation_id,
                from: self.state,
                to,
            });
        }
        let record = TransitionRecord {
            from: self.state,
            to,
            at,
            reason: reason.into(),
        };
        self.state = to;
        self.updated_at = at;
        self.transitions.push(record.clone());
        Ok(record)
    }
}

/// The settled outcome of a successful negotiation. Created once, never
/// deleted; expiry is expressed by a `validUntil` condition in the policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agreement {
    pub agreement_id: AgreementId,
    pub negotiation_id: NegotiationId,
    pub policy: UsagePolicy,
    pub consumer: Party,
    pub provider: Party,
    pub signed_at: DateTime<Utc>,
}

impl Agreement {
    pub fn is_party(&self, party: &Party) -> bool {
        &self.consumer == party || &self.provider == party
    }

    pub fn digest(&self) -> PolicyDigest {
        self.policy.digest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use dataspace_policy::Action;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap()
    }

    fn negotiation() -> Negotiation {
        Negotiation::new(
            NegotiationId::new(),
            Party::new("urn:dpp:recycler").unwrap(),
            Party::new("urn:dpp:manufacturer").unwrap(),
            ResourceRef::new("passport:battery-42"),
            LocalRole::Consumer,
            now() + Duration::minutes(5),
            now(),
        )
    }

    #[test]
    fn initiated_has_no_incoming_transitions() {
        use NegotiationState::*;
        for state in [Initiated, Offered, CounterOffered, Accepted, Rejected, Withdrawn, Expired] {
            assert!(!state.can_transition_to(Initiated), "{state} -> INITIATED");
        }
    }

    #[test]
    fn terminal_states_have_no_successors() {
        use NegotiationState::*;
        for state in [Accepted, Rejected, Withdrawn, Expired] {
            assert!(state.is_terminal());
            assert!(state.successors().is_empty());
        }
        assert!(CounterOffered.can_transition_to(CounterOffered));
        assert!(!Initiated.can_transition_to(Accepted));
    }

    #[test]
    fn transition_records_history() {
        let mut n = negotiation();
        n.transition(NegotiationState::Offered, now(), "offer sent")
            .unwrap();
        n.transition(NegotiationState::Withdrawn, now(), "consumer withdrew")
            .unwrap();

        assert_eq!(n.state(), NegotiationState::Withdrawn);
        assert_eq!(n.transitions().len(), 2);
        assert_eq!(n.transitions()[0].from, NegotiationState::Initiated);

        let err = n
            .transition(NegotiationState::Offered, now(), "too late")
            .unwrap_err();
        assert_eq!(err.from, NegotiationState::Withdrawn);
    }

    #[test]
    fn counter_rounds_exclude_first_offer() {
        let mut n = negotiation();
        assert_eq!(n.counter_rounds(), 0);
        let policy = UsagePolicy::builder()
            .permit(Action::Read, "materials")
            .build()
            .unwrap();
        for _ in 0..3 {
            n.record_offer(Offer::new(
                n.negotiation_id,
                n.consumer.clone(),
                policy.clone(),
                n.resource.clone(),
                now(),
            ));
        }
        assert_eq!(n.counter_rounds(), 2);
        assert!(n.latest_offer_from(&n.consumer).is_some());
        assert!(n.latest_offer_from(&n.provider).is_none());
    }

    #[test]
    fn overdue_only_after_deadline() {
        let n = negotiation();
        assert!(!n.is_overdue(n.deadline));
        assert!(n.is_overdue(n.deadline + Duration::seconds(1)));
    }

    #[test]
    fn reject_reason_serializes_with_code() {
        let json = serde_json::to_value(RejectReason::ForbiddenAction {
            action: Action::Delete,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "code": "forbidden_action", "action": "DELETE" })
        );
    }
}
