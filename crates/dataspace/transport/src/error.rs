use dataspace_types::Party;
use thiserror::Error;

/// Errors from the transport adapter.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("no route to party: {0}")]
    UnknownParty(Party),

    #[error("mailbox closed for party: {0}")]
    Closed(Party),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
