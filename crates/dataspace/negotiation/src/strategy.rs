//! Consumer-side reaction to a provider's counter-offer.

use dataspace_policy::{satisfies, UsagePolicy};
use dataspace_store::{Negotiation, Offer, RejectReason};

/// What a consumer does with a counter-offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterResponse {
    Accept,
    Counter(UsagePolicy),
    Reject(RejectReason),
    /// Leave the negotiation in `CounterOffered` for a manual decision.
    Hold,
}

pub trait CounterOfferStrategy: Send + Sync {
    fn respond(&self, negotiation: &Negotiation, counter: &Offer) -> CounterResponse;
}

/// Accept whatever the provider counters with.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAny;

impl CounterOfferStrategy for AcceptAny {
    fn respond(&self, _negotiation: &Negotiation, _counter: &Offer) -> CounterResponse {
        CounterResponse::Accept
    }
}

/// Accept a counter that still grants `minimum`; otherwise repeat the
/// consumer's own last proposal.
#[derive(Debug, Clone)]
pub struct RequireMinimum {
    minimum: UsagePolicy,
}

impl RequireMinimum {
    pub fn new(minimum: UsagePolicy) -> Self {
        Self { minimum }
    }
}

impl CounterOfferStrategy for RequireMinimum {
    fn respond(&self, negotiation: &Negotiation, counter: &Offer) -> CounterResponse {
        if satisfies(&counter.policy, &self.minimum) {
            return CounterResponse::Accept;
        }
        let repeat = negotiation
            .latest_offer_from(negotiation.local_party())
            .map(|own| own.policy.clone())
            .unwrap_or_else(|| self.minimum.clone());
        CounterResponse::Counter(repeat)
    }
}

/// Never decide automatically.
#[derive(Debug, Clone, Copy, Default)]
pub struct HoldForReview;

impl CounterOfferStrategy for HoldForReview {
    fn respond(&self, _negotiation: &Negotiation, _counter: &Offer) -> CounterResponse {
        CounterResponse::Hold
    }
}
