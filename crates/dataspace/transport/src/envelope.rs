use chrono::{DateTime, Utc};
use dataspace_types::{EnvelopeId, Party};
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::message::NegotiationMessage;

/// Addressed, integrity-protected wrapper around a [`NegotiationMessage`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub envelope_id: EnvelopeId,
    pub from: Party,
    pub to: Party,
    pub sent_at: DateTime<Utc>,
    pub message: NegotiationMessage,
    /// BLAKE3 hash over every other field.
    pub integrity: [u8; 32],
}

/// The hashed portion of an envelope.
#[derive(Serialize)]
struct Sealed<'a> {
    envelope_id: &'a EnvelopeId,
    from: &'a Party,
    to: &'a Party,
    sent_at: &'a DateTime<Utc>,
    message: &'a NegotiationMessage,
}

impl Envelope {
    /// Wrap a message and compute its integrity hash.
    pub fn seal(from: Party, to: Party, sent_at: DateTime<Utc>, message: NegotiationMessage) -> Self {
        let mut envelope = Self {
            envelope_id: EnvelopeId::new(),
            from,
            to,
            sent_at,
            message,
            integrity: [0u8; 32],
        };
        envelope.integrity = envelope.compute_hash();
        envelope
    }

    pub fn compute_hash(&self) -> [u8; 32] {
        let sealed = Sealed {
            envelope_id: &self.envelope_id,
            from: &self.from,
            to: &self.to,
            sent_at: &self.sent_at,
            message: &self.message,
        };
        let bytes = serde_json::to_vec(&sealed).unwrap_or_default();
        *blake3::hash(&bytes).as_bytes()
    }

    pub fn verify_integrity(&self) -> bool {
        self.integrity == self.compute_hash()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, TransportError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TransportError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
