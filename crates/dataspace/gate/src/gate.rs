use std::sync::Arc;

use chrono::{DateTime, Utc};
use dataspace_policy::{
    evaluate, AccessContext, AccessRequest, Action, Decision, DenyReason, Duty, PolicyDigest,
    Target,
};
use dataspace_store::{ContractStore, StoreError};
use dataspace_types::{AgreementId, AuditRecord, AuditSink, TracingAuditSink};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::GateError;

/// Outcome of one authorization, as recorded for audit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    pub agreement_id: AgreementId,
    pub decision: Decision,
    pub reason: String,
    pub decided_at: DateTime<Utc>,
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        self.decision.is_allowed()
    }

    pub fn obligations(&self) -> &[Duty] {
        self.decision.obligations()
    }
}

/// A payload cleared for release, with the duties the caller must discharge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Released<T> {
    pub payload: T,
    pub obligations: Vec<Duty>,
    pub decision: GateDecision,
}

/// Checks every data access against the agreement it claims to rely on.
///
/// Fails closed: a missing agreement is an error, never a default policy,
/// and anything but an allow blocks [`release`](Self::release). The gate
/// reads time only from the access context.
pub struct EnforcementGate {
    store: Arc<ContractStore>,
    audit: Arc<dyn AuditSink>,
}

impl EnforcementGate {
    pub fn new(store: Arc<ContractStore>) -> Self {
        Self {
            store,
            audit: Arc::new(TracingAuditSink),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Evaluate an access attempt under `agreement_id`.
    pub fn authorize(
        &self,
        agreement_id: AgreementId,
        action: Action,
        target: impl Into<Target>,
        context: AccessContext,
    ) -> Result<GateDecision, GateError> {
        let decided_at = context.now;
        let agreement = match self.store.agreement(agreement_id) {
            Ok(agreement) => agreement,
            Err(StoreError::AgreementNotFound(_)) => {
                warn!(agreement_id = %agreement_id, action = %action, "No such agreement");
                self.audit.record(AuditRecord::decision(
                    decided_at,
                    agreement_id,
                    "NO_SUCH_AGREEMENT",
                    "agreement not found",
                ));
                return Err(GateError::NoSuchAgreement(agreement_id));
            }
            Err(e) => return Err(e.into()),
        };

        let request = AccessRequest::new(action, target, context).under_agreement(agreement_id);

        let decision = match &request.requesting_party {
            Some(party) if !agreement.is_party(party) => Decision::deny(DenyReason::NotAParty {
                party: party.clone(),
            }),
            _ => evaluate(&agreement.policy, &request),
        };

        let reason = match &decision {
            Decision::Allow => "permitted".to_string(),
            Decision::AllowWithObligations { obligations } => {
                format!("permitted with {} obligation(s)", obligations.len())
            }
            Decision::Deny { reason } => reason.to_string(),
        };

        self.audit.record(AuditRecord::decision(
            decided_at,
            agreement_id,
            decision.label(),
            reason.clone(),
        ));

        if decision.is_allowed() {
            info!(
                agreement_id = %agreement_id,
                action = %request.action,
                target = %request.target,
                decision = decision.label(),
                obligations = decision.obligations().len(),
                "Access authorized"
            );
        } else {
            warn!(
                agreement_id = %agreement_id,
                action = %request.action,
                target = %request.target,
                reason = %reason,
                "Access denied"
            );
        }

        Ok(GateDecision {
            agreement_id,
            decision,
            reason,
            decided_at,
        })
    }

    /// Authorize, then hand back `payload` only if access is allowed.
    pub fn release<T>(
        &self,
        agreement_id: AgreementId,
        action: Action,
        target: impl Into<Target>,
        context: AccessContext,
        payload: T,
    ) -> Result<Released<T>, GateError> {
        let decision = self.authorize(agreement_id, action, target, context)?;
        match &decision.decision {
            Decision::Deny { reason } => Err(GateError::Denied {
                agreement_id,
                reason: reason.clone(),
            }),
            allowed => Ok(Released {
                payload,
                obligations: allowed.obligations().to_vec(),
                decision,
            }),
        }
    }

    /// Check the locally settled policy against a counterpart's digest.
    pub fn verify_consistency(
        &self,
        agreement_id: AgreementId,
        remote: PolicyDigest,
    ) -> Result<(), GateError> {
        let agreement = self.store.agreement(agreement_id).map_err(|e| match e {
            StoreError::AgreementNotFound(id) => GateError::NoSuchAgreement(id),
            other => other.into(),
        })?;
        self.store.reconcile(agreement.negotiation_id, remote)?;
        Ok(())
    }
}
