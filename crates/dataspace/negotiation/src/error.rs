use dataspace_policy::{PolicyDigest, PolicyError};
use dataspace_store::{IllegalTransition, LocalRole, StoreError};
use dataspace_transport::TransportError;
use dataspace_types::{NegotiationId, Party};
use thiserror::Error;

/// Errors from the negotiation engine.
#[derive(Error, Debug)]
pub enum NegotiationError {
    #[error("negotiation not found: {0}")]
    NotFound(NegotiationId),

    #[error("counter-offer budget exhausted for {0}")]
    NegotiationExhausted(NegotiationId),

    #[error("negotiation deadline passed: {0}")]
    NegotiationExpired(NegotiationId),

    #[error(transparent)]
    InvalidTransition(#[from] IllegalTransition),

    #[error("policy conflict on {negotiation_id}: local {local} != remote {remote}")]
    PolicyConflict {
        negotiation_id: NegotiationId,
        local: PolicyDigest,
        remote: PolicyDigest,
    },

    #[error("operation on {negotiation_id} requires the {expected:?} role")]
    WrongRole {
        negotiation_id: NegotiationId,
        expected: LocalRole,
    },

    #[error("no counterpart offer to accept in {0}")]
    NoOfferToAccept(NegotiationId),

    #[error("cannot negotiate with self: {0}")]
    SelfNegotiation(Party),

    #[error("invalid policy: {0}")]
    Policy(#[from] PolicyError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}
