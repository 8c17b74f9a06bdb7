use dataspace_policy::PolicyError;
use dataspace_store::{IllegalTransition, NegotiationState};

/// Result of handling one inbound envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    /// The message moved the local negotiation; carries the state afterwards.
    Applied(NegotiationState),
    /// The message was already processed.
    Duplicate,
    /// The message was logged and discarded.
    Dropped(DropReason),
}

impl Handled {
    pub fn is_applied(&self) -> bool {
        matches!(self, Handled::Applied(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    IntegrityFailure,
    Misaddressed,
    NotAParty,
    UnknownNegotiation,
    Terminal(NegotiationState),
    Expired,
    StaleOffer,
    ResourceMismatch,
    AgreementMismatch,
    InvalidPolicy(PolicyError),
    InvalidTransition(IllegalTransition),
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::IntegrityFailure => f.write_str("integrity check failed"),
            DropReason::Misaddressed => f.write_str("addressed to another party"),
            DropReason::NotAParty => f.write_str("sender is not the counterpart"),
            DropReason::UnknownNegotiation => f.write_str("unknown negotiation"),
            DropReason::Terminal(state) => write!(f, "negotiation already {}", state),
            DropReason::Expired => f.write_str("negotiation deadline passed"),
            DropReason::StaleOffer => f.write_str("offer is not the latest own offer"),
            DropReason::ResourceMismatch => f.write_str("offer names a different resource"),
            DropReason::AgreementMismatch => f.write_str("agreement id does not match negotiation"),
            DropReason::InvalidPolicy(e) => write!(f, "invalid policy: {}", e),
            DropReason::InvalidTransition(e) => write!(f, "{}", e),
        }
    }
}
