//! Enforcement gate in front of the data-serving path.
//!
//! Every access under an agreement is looked up in the local contract store
//! and evaluated against the agreed usage policy before any data leaves the
//! connector. Each decision, including a lookup failure, is audited.

#![deny(unsafe_code)]

pub mod error;
pub mod gate;

pub use error::GateError;
pub use gate::{EnforcementGate, GateDecision, Released};
