//! Core type definitions shared by every dataspace crate.
//!
//! Identifiers, stakeholder parties, the injectable clock and the audit record
//! vocabulary. No negotiation or policy logic lives here.

#![deny(unsafe_code)]

pub mod audit;
pub mod clock;
pub mod ids;
pub mod party;

pub use audit::{AuditRecord, AuditSink, AuditSubject, MemoryAuditSink, TracingAuditSink};
pub use clock::{Clock, ManualClock, SystemClock};
pub use ids::{AgreementId, EnvelopeId, NegotiationId, OfferId, PolicyId};
pub use party::{Party, PartyError, ResourceRef};
