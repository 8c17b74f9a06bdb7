use std::sync::Arc;

use dataspace_gate::EnforcementGate;
use dataspace_negotiation::{Handled, NegotiationEngine};
use dataspace_store::ContractStore;
use dataspace_transport::Inbound;
use dataspace_types::Party;
use tracing::debug;

use crate::error::SimResult;

/// One stakeholder's process-local view of the dataspace: its negotiation
/// engine, contract store, enforcement gate and inbound route.
pub struct Connector {
    engine: NegotiationEngine,
    gate: EnforcementGate,
    inbound: Box<dyn Inbound>,
}

impl Connector {
    pub fn new(engine: NegotiationEngine, gate: EnforcementGate, inbound: Box<dyn Inbound>) -> Self {
        Self {
            engine,
            gate,
            inbound,
        }
    }

    pub fn party(&self) -> &Party {
        self.engine.party()
    }

    pub fn engine(&self) -> &NegotiationEngine {
        &self.engine
    }

    pub fn store(&self) -> &Arc<ContractStore> {
        self.engine.store()
    }

    pub fn gate(&self) -> &EnforcementGate {
        &self.gate
    }

    /// Handle every envelope already queued for this party.
    pub async fn pump(&mut self) -> SimResult<Vec<Handled>> {
        let mut handled = Vec::new();
        while let Some(envelope) = self.inbound.try_recv() {
            let kind = envelope.message.kind();
            let outcome = self.engine.handle(envelope).await?;
            debug!(party = %self.party(), kind, outcome = ?outcome, "Envelope handled");
            handled.push(outcome);
        }
        Ok(handled)
    }
}
