//! Usage policy model and evaluator.
//!
//! A [`UsagePolicy`] is a set of [`PolicyRule`]s over a closed [`Action`]
//! enumeration. [`evaluate`] is a pure, total function from a policy and an
//! [`AccessRequest`] to a [`Decision`]:
//!
//! - **Deny-overrides**: a matching Prohibition beats any matching Permission.
//! - **Default-deny**: no matching Permission means DENY.
//! - **Obligations surface, never execute**: duties attached to an allowed
//!   action are returned to the caller.
//! - **No hidden clock**: time conditions read only `AccessContext::now`.
//!
//! [`assess_offer`] is the provider-side comparison of a proposed policy with
//! the policy a provider is willing to grant, producing an acceptance, a
//! stricter counter-policy, or a rejection.

#![deny(unsafe_code)]

pub mod assessment;
pub mod context;
pub mod digest;
pub mod error;
pub mod evaluator;
pub mod model;

pub use assessment::{assess_offer, satisfies, OfferAssessment, Unacceptable};
pub use context::{AccessContext, AccessRequest};
pub use digest::PolicyDigest;
pub use error::PolicyError;
pub use evaluator::{evaluate, Decision, DenyReason};
pub use model::{
    Action, Condition, Duty, PolicyRule, RuleKind, Target, UsagePolicy, UsagePolicyBuilder,
};
