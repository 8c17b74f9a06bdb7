use dataspace_types::Party;
use serde::{Deserialize, Serialize};

use crate::context::AccessRequest;
use crate::model::{Action, Duty, PolicyRule, RuleKind, Target, UsagePolicy};

/// Outcome of evaluating a policy against an access request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Allow,
    AllowWithObligations { obligations: Vec<Duty> },
    Deny { reason: DenyReason },
}

/// Why a request was denied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum DenyReason {
    /// A matching Prohibition overrides any Permission.
    Prohibited {
        action: Action,
        target: Option<Target>,
    },
    /// No matching Permission grants the action.
    NotPermitted { action: Action, target: Target },
    /// The requester is not a party to the governing agreement.
    NotAParty { party: Party },
}

impl Decision {
    pub fn deny(reason: DenyReason) -> Self {
        Decision::Deny { reason }
    }

    pub fn is_allowed(&self) -> bool {
        !matches!(self, Decision::Deny { .. })
    }

    /// Duties the caller must discharge; empty unless allowed with obligations.
    pub fn obligations(&self) -> &[Duty] {
        match self {
            Decision::AllowWithObligations { obligations } => obligations,
            _ => &[],
        }
    }

    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match self {
            Decision::Deny { reason } => Some(reason),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Decision::Allow => "ALLOW",
            Decision::AllowWithObligations { .. } => "ALLOW_WITH_OBLIGATIONS",
            Decision::Deny { .. } => "DENY",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Allow => f.write_str("ALLOW"),
            Decision::AllowWithObligations { obligations } => {
                let duties: Vec<String> = obligations.iter().map(|d| d.to_string()).collect();
                write!(f, "ALLOW_WITH_OBLIGATIONS [{}]", duties.join("; "))
            }
            Decision::Deny { reason } => write!(f, "DENY ({})", reason),
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenyReason::Prohibited {
                action,
                target: Some(target),
            } => write!(f, "{} on {} is prohibited", action, target),
            DenyReason::Prohibited {
                action,
                target: None,
            } => write!(f, "{} is prohibited on every target", action),
            DenyReason::NotPermitted { action, target } => {
                write!(f, "no permission grants {} on {}", action, target)
            }
            DenyReason::NotAParty { party } => {
                write!(f, "{} is not a party to the agreement", party)
            }
        }
    }
}

/// Evaluate `policy` against `request`.
///
/// Rules whose target covers the request target and whose condition holds
/// are considered, restricted to the requested action. Any such Prohibition
/// denies; otherwise any such Permission allows, carrying the matching
/// Obligations' duties; otherwise the request is denied by default.
pub fn evaluate(policy: &UsagePolicy, request: &AccessRequest) -> Decision {
    let applicable = |rule: &&PolicyRule| {
        rule.action() == request.action && rule.matches(&request.target, &request.context)
    };

    if let Some(prohibition) = policy
        .rules()
        .iter()
        .filter(|r| r.kind() == RuleKind::Prohibition)
        .find(applicable)
    {
        return Decision::deny(DenyReason::Prohibited {
            action: request.action,
            target: prohibition.target().cloned(),
        });
    }

    let permitted = policy
        .rules()
        .iter()
        .filter(|r| r.kind() == RuleKind::Permission)
        .any(|r| applicable(&r));
    if !permitted {
        return Decision::deny(DenyReason::NotPermitted {
            action: request.action,
            target: request.target.clone(),
        });
    }

    let mut obligations: Vec<Duty> = Vec::new();
    for duty in policy
        .rules()
        .iter()
        .filter(applicable)
        .filter_map(PolicyRule::duty)
    {
        if !obligations.contains(duty) {
            obligations.push(duty.clone());
        }
    }

    if obligations.is_empty() {
        Decision::Allow
    } else {
        Decision::AllowWithObligations { obligations }
    }
}

impl UsagePolicy {
    /// Shorthand for [`evaluate`].
    pub fn evaluate(&self, request: &AccessRequest) -> Decision {
        evaluate(self, request)
    }
}
