use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use dataspace_types::{AgreementId, Party};
use serde::{Deserialize, Serialize};

use crate::model::{Action, Target};

/// Facts about an access attempt that conditions are evaluated against.
///
/// `now` is mandatory so that time-bounded conditions never read the wall
/// clock implicitly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessContext {
    pub now: DateTime<Utc>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub requesting_party: Option<Party>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl AccessContext {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            role: None,
            purpose: None,
            requesting_party: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    pub fn with_party(mut self, party: Party) -> Self {
        self.requesting_party = Some(party);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// An access attempt. Built by the enforcement gate at evaluation time and
/// never stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub requesting_party: Option<Party>,
    pub agreement_id: Option<AgreementId>,
    pub action: Action,
    pub target: Target,
    pub context: AccessContext,
}

impl AccessRequest {
    pub fn new(action: Action, target: impl Into<Target>, context: AccessContext) -> Self {
        Self {
            requesting_party: context.requesting_party.clone(),
            agreement_id: None,
            action,
            target: target.into(),
            context,
        }
    }

    pub fn under_agreement(mut self, agreement_id: AgreementId) -> Self {
        self.agreement_id = Some(agreement_id);
        self
    }
}
