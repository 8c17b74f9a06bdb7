use dataspace_policy::PolicyDigest;
use dataspace_types::{AgreementId, NegotiationId};
use thiserror::Error;

use crate::records::NegotiationState;

/// Errors from the contract store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("negotiation not found: {0}")]
    NegotiationNotFound(NegotiationId),

    #[error("agreement not found: {0}")]
    AgreementNotFound(AgreementId),

    #[error("no agreement settled for negotiation {0}")]
    NotSettled(NegotiationId),

    #[error("negotiation {negotiation_id} already settled as {agreement_id}")]
    AlreadySettled {
        negotiation_id: NegotiationId,
        agreement_id: AgreementId,
    },

    #[error("policy conflict on {negotiation_id}: local {local} != remote {remote}")]
    PolicyConflict {
        negotiation_id: NegotiationId,
        local: PolicyDigest,
        remote: PolicyDigest,
    },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::NegotiationNotFound(_)
                | StoreError::AgreementNotFound(_)
                | StoreError::NotSettled(_)
        )
    }
}

/// A state change the transition table does not allow.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid transition for {negotiation_id}: {from} -> {to}")]
pub struct IllegalTransition {
    pub negotiation_id: NegotiationId,
    pub from: NegotiationState,
    pub to: NegotiationState,
}
