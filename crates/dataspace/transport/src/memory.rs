//! In-process network for simulations and tests.
//!
//! Envelopes travel as encoded frames over unbounded channels, one per
//! registered party. Duplicate delivery can be switched on to exercise
//! receiver idempotence.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use dataspace_types::Party;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::envelope::Envelope;
use crate::error::TransportError;
use crate::{Inbound, Transport};

#[derive(Debug, Default)]
pub struct InMemoryNetwork {
    routes: DashMap<Party, mpsc::UnboundedSender<Vec<u8>>>,
    duplicate_delivery: AtomicBool,
    frames_sent: AtomicU64,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a party and return its inbound mailbox. Registering the same
    /// party again replaces the previous mailbox.
    pub fn register(&self, party: Party) -> Mailbox {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.routes.insert(party.clone(), sender);
        Mailbox { party, receiver }
    }

    /// Deliver every envelope twice while enabled.
    pub fn set_duplicate_delivery(&self, enabled: bool) {
        self.duplicate_delivery.store(enabled, Ordering::SeqCst);
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for InMemoryNetwork {
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        let frame = envelope.to_bytes()?;
        let sender = self
            .routes
            .get(&envelope.to)
            .map(|s| s.clone())
            .ok_or_else(|| TransportError::UnknownParty(envelope.to.clone()))?;

        let copies = if self.duplicate_delivery.load(Ordering::SeqCst) {
            2
        } else {
            1
        };
        for _ in 0..copies {
            sender
                .send(frame.clone())
                .map_err(|_| TransportError::Closed(envelope.to.clone()))?;
            self.frames_sent.fetch_add(1, Ordering::SeqCst);
        }

        debug!(
            envelope_id = %envelope.envelope_id,
            from = %envelope.from,
            to = %envelope.to,
            kind = envelope.message.kind(),
            copies,
            "Envelope sent"
        );
        Ok(())
    }
}

/// Inbound side of a party's route.
#[derive(Debug)]
pub struct Mailbox {
    party: Party,
    receiver: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl Mailbox {
    pub fn party(&self) -> &Party {
        &self.party
    }

    /// Wait for the next decodable envelope. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        while let Some(frame) = self.receiver.recv().await {
            if let Some(envelope) = self.decode(&frame) {
                return Some(envelope);
            }
        }
        None
    }

    /// Next decodable envelope already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        while let Ok(frame) = self.receiver.try_recv() {
            if let Some(envelope) = self.decode(&frame) {
                return Some(envelope);
            }
        }
        None
    }

    fn decode(&self, frame: &[u8]) -> Option<Envelope> {
        match Envelope::from_bytes(frame) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                warn!(party = %self.party, error = %e, "Dropping undecodable frame");
                None
            }
        }
    }
}

#[async_trait]
impl Inbound for Mailbox {
    fn party(&self) -> &Party {
        Mailbox::party(self)
    }

    async fn recv(&mut self) -> Option<Envelope> {
        Mailbox::recv(self).await
    }

    fn try_recv(&mut self) -> Option<Envelope> {
        Mailbox::try_recv(self)
    }
}
