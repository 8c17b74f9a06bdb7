//! Transport adapter between dataspace connectors.
//!
//! Engines exchange [`NegotiationMessage`]s wrapped in integrity-protected
//! [`Envelope`]s. The transport may reorder or duplicate deliveries;
//! receivers are expected to be idempotent.

#![deny(unsafe_code)]

use async_trait::async_trait;
use dataspace_types::Party;

pub mod envelope;
pub mod error;
pub mod memory;
pub mod message;

pub use envelope::Envelope;
pub use error::TransportError;
pub use memory::{InMemoryNetwork, Mailbox};
pub use message::NegotiationMessage;

/// Outbound half of the transport. Routing uses `envelope.to`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError>;
}

/// Inbound half of the transport, owned by the receiving party.
/// Undecodable or tampered frames are skipped, never surfaced.
#[async_trait]
pub trait Inbound: Send {
    fn party(&self) -> &Party;

    /// Wait for the next envelope. `None` once the route is closed.
    async fn recv(&mut self) -> Option<Envelope>;

    /// Next envelope already queued, without waiting.
    fn try_recv(&mut self) -> Option<Envelope>;
}
