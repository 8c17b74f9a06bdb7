//! Contract store for a single dataspace connector.
//!
//! Holds the local copies of negotiations (with their append-only offer
//! history and transition log) and the agreements they settled. Agreement
//! settlement is atomic per negotiation id.

#![deny(unsafe_code)]

pub mod error;
pub mod records;
pub mod store;

pub use error::{IllegalTransition, StoreError};
pub use records::{
    Agreement, LocalRole, Negotiation, NegotiationOutcome, NegotiationState, Offer, RejectReason,
    TransitionRecord,
};
pub use store::ContractStore;
