//! Contract negotiation state machine.
//!
//! A consumer proposes a usage policy for a provider's resource; the
//! provider assesses it against its acceptance catalogue and accepts,
//! counters with a stricter policy, or rejects. Negotiations are bounded by
//! a counter-offer budget and a deadline, and an accepted negotiation
//! settles exactly one agreement on each side.
//!
//! ```text
//! Initiated → Offered → CounterOffered ⇄ CounterOffered
//!                 │             │
//!                 └──────┬──────┘
//!                        ▼
//!      Accepted | Rejected | Withdrawn | Expired
//! ```

#![deny(unsafe_code)]

pub mod catalogue;
pub mod config;
pub mod engine;
pub mod error;
pub mod handled;
pub mod strategy;

pub use catalogue::{AcceptancePolicySource, StaticCatalogue};
pub use config::NegotiationConfig;
pub use engine::NegotiationEngine;
pub use error::NegotiationError;
pub use handled::{DropReason, Handled};
pub use strategy::{AcceptAny, CounterOfferStrategy, CounterResponse, HoldForReview, RequireMinimum};
