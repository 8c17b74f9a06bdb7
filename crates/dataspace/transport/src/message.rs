use dataspace_policy::PolicyDigest;
use dataspace_store::{Offer, RejectReason};
use dataspace_types::{AgreementId, NegotiationId, OfferId};
use serde::{Deserialize, Serialize};

/// Protocol messages exchanged between connector negotiation engines.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NegotiationMessage {
    /// An initial offer or a counter-offer.
    Offer { offer: Offer },
    /// The sender accepted `offer_id` and settled `agreement_id` from it.
    /// `digest` lets the receiver reconcile its own copy of the policy.
    Accept {
        negotiation_id: NegotiationId,
        offer_id: OfferId,
        agreement_id: AgreementId,
        digest: PolicyDigest,
    },
    Reject {
        negotiation_id: NegotiationId,
        #[serde(default)]
        offer_id: Option<OfferId>,
        reason: RejectReason,
    },
    Withdraw { negotiation_id: NegotiationId },
}

impl NegotiationMessage {
    pub fn negotiation_id(&self) -> NegotiationId {
        match self {
            NegotiationMessage::Offer { offer } => offer.negotiation_id,
            NegotiationMessage::Accept { negotiation_id, .. }
            | NegotiationMessage::Reject { negotiation_id, .. }
            | NegotiationMessage::Withdraw { negotiation_id } => *negotiation_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NegotiationMessage::Offer { .. } => "offer",
            NegotiationMessage::Accept { .. } => "accept",
            NegotiationMessage::Reject { .. } => "reject",
            NegotiationMessage::Withdraw { .. } => "withdraw",
        }
    }
}
