use dataspace_policy::DenyReason;
use dataspace_store::StoreError;
use dataspace_types::AgreementId;
use thiserror::Error;

/// Errors from the enforcement gate. Every variant blocks release.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("no such agreement: {0}")]
    NoSuchAgreement(AgreementId),

    #[error("access denied under {agreement_id}: {reason}")]
    Denied {
        agreement_id: AgreementId,
        reason: DenyReason,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
