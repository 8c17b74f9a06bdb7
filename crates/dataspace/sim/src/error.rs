//! Error types for the simulated dataspace

use dataspace_gate::GateError;
use dataspace_negotiation::NegotiationError;
use dataspace_policy::PolicyError;
use dataspace_transport::TransportError;
use dataspace_types::{Party, PartyError};
use thiserror::Error;

/// Result alias for simulation operations
pub type SimResult<T> = Result<T, SimError>;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid policy in configuration: {0}")]
    InvalidPolicy(#[from] PolicyError),

    #[error("invalid party: {0}")]
    InvalidParty(#[from] PartyError),

    #[error("party {0} is declared more than once")]
    DuplicateParty(Party),

    #[error("no connector for party {0}")]
    UnknownParty(Party),

    #[error("unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("logging setup failed: {0}")]
    Logging(String),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
