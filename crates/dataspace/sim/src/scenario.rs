//! Scripted scenarios run by the `dataspace-sim` binary.

use dataspace_gate::GateError;
use dataspace_policy::{AccessContext, Action, Duty, UsagePolicy};
use dataspace_store::NegotiationState;
use dataspace_types::{AgreementId, Clock, NegotiationId, Party, ResourceRef};
use serde::Serialize;
use tracing::info;

use crate::config::{DataspaceConfig, StakeholderConfig};
use crate::dataspace::Dataspace;
use crate::error::{SimError, SimResult};

pub const BATTERY_PASSPORT: &str = "battery-passport";

pub const MANUFACTURER: &str = "urn:dpp:manufacturer";
pub const RECYCLER: &str = "urn:dpp:recycler";
pub const BATTERY: &str = "passport:battery-42";

/// What a scenario run ended with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub negotiation_id: NegotiationId,
    pub state: NegotiationState,
    pub counter_rounds: usize,
    pub agreement_id: Option<AgreementId>,
    pub read_allowed: bool,
    pub distribute_allowed: bool,
    pub obligations: Vec<Duty>,
    pub envelopes_handled: usize,
}

/// Manufacturer catalogue and recycler consumer used when the loaded
/// configuration declares no stakeholders.
pub fn battery_passport_config() -> SimResult<DataspaceConfig> {
    let grant = UsagePolicy::builder()
        .permit(Action::Read, "materials")
        .prohibit(Action::Delete, "materials")
        .oblige(Action::Read, "materials", Duty::Log)
        .build()?;

    Ok(DataspaceConfig {
        stakeholders: vec![
            StakeholderConfig::new(Party::new(MANUFACTURER)?)
                .offering(ResourceRef::new(BATTERY), &grant),
            StakeholderConfig::new(Party::new(RECYCLER)?),
        ],
        ..DataspaceConfig::default()
    })
}

pub async fn run(name: &str, dataspace: &mut Dataspace) -> SimResult<ScenarioReport> {
    match name {
        BATTERY_PASSPORT => battery_passport(dataspace).await,
        other => Err(SimError::UnknownScenario(other.to_string())),
    }
}

/// The recycler asks to DISTRIBUTE the battery's material data, is
/// countered with READ only, accepts, then reads through the
/// manufacturer's gate.
pub async fn battery_passport(dataspace: &mut Dataspace) -> SimResult<ScenarioReport> {
    let manufacturer = Party::new(MANUFACTURER)?;
    let recycler = Party::new(RECYCLER)?;

    let wanted = UsagePolicy::builder()
        .permit(Action::Distribute, "materials")
        .build()?;
    let (negotiation_id, _) = dataspace
        .connector(&recycler)?
        .engine()
        .request(manufacturer.clone(), ResourceRef::new(BATTERY), wanted, None)
        .await?;

    let envelopes_handled = dataspace.run_until_quiet().await?;

    let negotiation = dataspace
        .connector(&recycler)?
        .engine()
        .negotiation(negotiation_id)?;

    let mut report = ScenarioReport {
        scenario: BATTERY_PASSPORT.to_string(),
        negotiation_id,
        state: negotiation.state(),
        counter_rounds: negotiation.counter_rounds(),
        agreement_id: negotiation.agreement_id,
        read_allowed: false,
        distribute_allowed: false,
        obligations: Vec::new(),
        envelopes_handled,
    };

    if let Some(agreement_id) = negotiation.agreement_id {
        let gate = dataspace.connector(&manufacturer)?.gate();
        let now = dataspace.clock().now();
        let context = || AccessContext::at(now).with_party(recycler.clone());

        match gate.release(
            agreement_id,
            Action::Read,
            "materials.composition",
            context(),
            "cathode: NMC811",
        ) {
            Ok(released) => {
                report.read_allowed = true;
                report.obligations = released.obligations;
            }
            Err(GateError::Denied { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        report.distribute_allowed = gate
            .authorize(agreement_id, Action::Distribute, "materials", context())?
            .is_allowed();
    }

    info!(
        scenario = %report.scenario,
        negotiation_id = %report.negotiation_id,
        state = %report.state,
        counter_rounds = report.counter_rounds,
        agreement_id = ?report.agreement_id,
        read_allowed = report.read_allowed,
        distribute_allowed = report.distribute_allowed,
        obligations = report.obligations.len(),
        "Scenario complete"
    );
    Ok(report)
}
