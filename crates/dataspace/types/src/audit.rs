use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ids::{AgreementId, NegotiationId};

/// What an audit record is about.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSubject {
    Negotiation(NegotiationId),
    Agreement(AgreementId),
}

impl std::fmt::Display for AuditSubject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditSubject::Negotiation(id) => write!(f, "{}", id),
            AuditSubject::Agreement(id) => write!(f, "{}", id),
        }
    }
}

/// One auditable event: a negotiation transition or an enforcement decision.
///
/// For transitions `from`/`to` are state names; for enforcement decisions
/// `from` is the decision and `to` is empty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub subject: AuditSubject,
    pub from: String,
    pub to: Option<String>,
    pub reason: String,
}

impl AuditRecord {
    pub fn transition(
        timestamp: DateTime<Utc>,
        negotiation_id: NegotiationId,
        from: impl Into<String>,
        to: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            subject: AuditSubject::Negotiation(negotiation_id),
            from: from.into(),
            to: Some(to.into()),
            reason: reason.into(),
        }
    }

    pub fn decision(
        timestamp: DateTime<Utc>,
        agreement_id: AgreementId,
        decision: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            subject: AuditSubject::Agreement(agreement_id),
            from: decision.into(),
            to: None,
            reason: reason.into(),
        }
    }
}

/// Sink for audit records. Implementations must not block for long; they
/// are called while a negotiation is locked.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord);
}

/// Emits every record as a structured `tracing` event on the `audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: AuditRecord) {
        info!(
            target: "audit",
            timestamp = %record.timestamp.to_rfc3339(),
            subject = %record.subject,
            from = %record.from,
            to = record.to.as_deref().unwrap_or(""),
            reason = %record.reason,
            "audit record"
        );
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Records about a single subject, oldest first.
    pub fn records_for(&self, subject: &AuditSubject) -> Vec<AuditRecord> {
        self.records()
            .into_iter()
            .filter(|r| &r.subject == subject)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: AuditRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_filters_by_subject() {
        let sink = MemoryAuditSink::new();
        let a = NegotiationId::new();
        let b = NegotiationId::new();
        sink.record(AuditRecord::transition(Utc::now(), a, "Initiated", "Offered", "offer sent"));
        sink.record(AuditRecord::transition(Utc::now(), b, "Initiated", "Withdrawn", "cancel"));

        assert_eq!(sink.len(), 2);
        let only_a = sink.records_for(&AuditSubject::Negotiation(a));
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].to.as_deref(), Some("Offered"));
    }

    #[test]
    fn decision_records_have_no_target_state() {
        let nid = NegotiationId::new();
        let record = AuditRecord::decision(
            Utc::now(),
            AgreementId::for_negotiation(&nid),
            "DENY",
            "no permission",
        );
        assert!(record.to.is_none());
        assert_eq!(record.from, "DENY");
    }
}
