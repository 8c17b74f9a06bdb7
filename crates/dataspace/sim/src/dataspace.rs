use std::collections::BTreeMap;
use std::sync::Arc;

use dataspace_gate::EnforcementGate;
use dataspace_negotiation::NegotiationEngine;
use dataspace_store::ContractStore;
use dataspace_transport::{InMemoryNetwork, Transport};
use dataspace_types::{AuditSink, Clock, NegotiationId, Party, SystemClock, TracingAuditSink};
use tracing::{info, warn};

use crate::config::DataspaceConfig;
use crate::connector::Connector;
use crate::error::{SimError, SimResult};

/// Upper bound on delivery passes in [`Dataspace::run_until_quiet`].
pub const MAX_PASSES: usize = 64;

/// A set of connectors sharing one in-memory network.
pub struct Dataspace {
    network: Arc<InMemoryNetwork>,
    clock: Arc<dyn Clock>,
    connectors: BTreeMap<Party, Connector>,
}

impl Dataspace {
    /// Build with the wall clock and tracing audit sink.
    pub fn from_config(config: &DataspaceConfig) -> SimResult<Self> {
        Self::build(config, Arc::new(SystemClock), Arc::new(TracingAuditSink))
    }

    /// Build with an injected clock and audit sink shared by every connector.
    pub fn build(
        config: &DataspaceConfig,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
    ) -> SimResult<Self> {
        let network = Arc::new(InMemoryNetwork::new());
        let mut connectors = BTreeMap::new();

        for stakeholder in &config.stakeholders {
            let party = stakeholder.party.clone();
            if connectors.contains_key(&party) {
                return Err(SimError::DuplicateParty(party));
            }

            let store = Arc::new(ContractStore::new());
            let engine = NegotiationEngine::new(
                party.clone(),
                store.clone(),
                network.clone() as Arc<dyn Transport>,
            )
            .with_catalogue(Arc::new(stakeholder.catalogue()?))
            .with_strategy(stakeholder.strategy()?)
            .with_audit(audit.clone())
            .with_clock(clock.clone())
            .with_config(config.negotiation.clone());
            let gate = EnforcementGate::new(store).with_audit(audit.clone());
            let mailbox = network.register(party.clone());

            info!(
                party = %party,
                resources = stakeholder.catalogue.len(),
                "Connector registered"
            );
            connectors.insert(party, Connector::new(engine, gate, Box::new(mailbox)));
        }

        Ok(Self {
            network,
            clock,
            connectors,
        })
    }

    pub fn network(&self) -> &Arc<InMemoryNetwork> {
        &self.network
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn parties(&self) -> impl Iterator<Item = &Party> {
        self.connectors.keys()
    }

    pub fn connector(&self, party: &Party) -> SimResult<&Connector> {
        self.connectors
            .get(party)
            .ok_or_else(|| SimError::UnknownParty(party.clone()))
    }

    /// Deliver messages until a full pass over every connector handles
    /// nothing. Returns the number of envelopes handled.
    pub async fn run_until_quiet(&mut self) -> SimResult<usize> {
        let mut total = 0;
        for _ in 0..MAX_PASSES {
            let mut handled = 0;
            for connector in self.connectors.values_mut() {
                handled += connector.pump().await?.len();
            }
            if handled == 0 {
                return Ok(total);
            }
            total += handled;
        }
        warn!(
            passes = MAX_PASSES,
            handled = total,
            "Dataspace still busy after pass limit"
        );
        Ok(total)
    }

    /// Expire overdue negotiations on every connector.
    pub async fn expire_stale(&self) -> Vec<(Party, NegotiationId)> {
        let mut expired = Vec::new();
        for (party, connector) in &self.connectors {
            for id in connector.engine().expire_stale().await {
                expired.push((party.clone(), id));
            }
        }
        expired
    }
}
