use chrono::{DateTime, Utc};
use dataspace_types::PolicyId;
use serde::{Deserialize, Serialize};

use crate::context::AccessContext;
use crate::digest::PolicyDigest;
use crate::error::PolicyError;

/// Closed set of usage actions a rule can govern.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Read,
    Modify,
    Distribute,
    Delete,
    Derive,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::Read,
        Action::Modify,
        Action::Distribute,
        Action::Delete,
        Action::Derive,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Action::Read => "READ",
            Action::Modify => "MODIFY",
            Action::Distribute => "DISTRIBUTE",
            Action::Delete => "DELETE",
            Action::Derive => "DERIVE",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Resource class a rule applies to, e.g. `materials` or
/// `materials.composition`.
///
/// A target covers itself and every dotted sub-path below it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(String);

impl Target {
    pub fn new(target: impl Into<String>) -> Self {
        let raw = target.into();
        Self(raw.trim().trim_matches('.').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this target is `other` or an ancestor of it.
    pub fn covers(&self, other: &Target) -> bool {
        if self.0 == other.0 {
            return true;
        }
        other
            .0
            .strip_prefix(self.0.as_str())
            .is_some_and(|rest| rest.starts_with('.'))
    }
}

impl From<&str> for Target {
    fn from(value: &str) -> Self {
        Target::new(value)
    }
}

impl From<String> for Target {
    fn from(value: String) -> Self {
        Target::new(value)
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key/value predicate over the access context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Condition {
    Role(String),
    Purpose(String),
    ValidUntil(DateTime<Utc>),
    ValidFrom(DateTime<Utc>),
    Attribute { key: String, value: String },
    All(Vec<Condition>),
}

impl Condition {
    /// Evaluate against a context. Time predicates read only `context.now`.
    pub fn holds(&self, context: &AccessContext) -> bool {
        match self {
            Condition::Role(role) => context.role.as_deref() == Some(role.as_str()),
            Condition::Purpose(purpose) => context.purpose.as_deref() == Some(purpose.as_str()),
            Condition::ValidUntil(until) => context.now <= *until,
            Condition::ValidFrom(from) => context.now >= *from,
            Condition::Attribute { key, value } => context.attributes.get(key) == Some(value),
            Condition::All(conditions) => conditions.iter().all(|c| c.holds(context)),
        }
    }

    /// Flatten nested conjunctions into their atomic predicates.
    pub fn atoms(&self) -> Vec<&Condition> {
        match self {
            Condition::All(conditions) => conditions.iter().flat_map(|c| c.atoms()).collect(),
            atom => vec![atom],
        }
    }

    /// Order-free form of the condition: atoms flattened, deduplicated and
    /// sorted by their JSON encoding. An empty conjunction has no canonical
    /// form and a single atom stays unwrapped.
    pub fn canonical(&self) -> Option<Condition> {
        let mut atoms: Vec<(Vec<u8>, Condition)> = self
            .atoms()
            .into_iter()
            .map(|atom| (serde_json::to_vec(atom).unwrap_or_default(), atom.clone()))
            .collect();
        atoms.sort_by(|a, b| a.0.cmp(&b.0));
        atoms.dedup_by(|a, b| a.0 == b.0);

        let mut atoms: Vec<Condition> = atoms.into_iter().map(|(_, atom)| atom).collect();
        match atoms.len() {
            0 => None,
            1 => atoms.pop(),
            _ => Some(Condition::All(atoms)),
        }
    }

    /// Whether every context satisfying `self` also satisfies `other`.
    ///
    /// Conservative: only recognises syntactic containment plus tighter
    /// validity bounds.
    pub fn implies(&self, other: &Condition) -> bool {
        let mine = self.atoms();
        other
            .atoms()
            .into_iter()
            .all(|theirs| mine.iter().any(|m| atom_implies(m, theirs)))
    }

    fn validate(&self, rule: usize) -> Result<(), PolicyError> {
        let mut latest_start: Option<DateTime<Utc>> = None;
        let mut earliest_end: Option<DateTime<Utc>> = None;

        for atom in self.atoms() {
            match atom {
                Condition::Role(role) if role.trim().is_empty() => {
                    return Err(PolicyError::EmptyPredicate {
                        rule,
                        predicate: "role",
                    })
                }
                Condition::Purpose(purpose) if purpose.trim().is_empty() => {
                    return Err(PolicyError::EmptyPredicate {
                        rule,
                        predicate: "purpose",
                    })
                }
                Condition::Attribute { key, .. } if key.trim().is_empty() => {
                    return Err(PolicyError::EmptyPredicate {
                        rule,
                        predicate: "attribute",
                    })
                }
                Condition::ValidFrom(from) => {
                    latest_start = Some(latest_start.map_or(*from, |s| s.max(*from)));
                }
                Condition::ValidUntil(until) => {
                    earliest_end = Some(earliest_end.map_or(*until, |e| e.min(*until)));
                }
                _ => {}
            }
        }

        match (latest_start, earliest_end) {
            (Some(start), Some(end)) if start > end => {
                Err(PolicyError::EmptyValidityWindow { rule })
            }
            _ => Ok(()),
        }
    }
}

fn atom_implies(mine: &Condition, theirs: &Condition) -> bool {
    match (mine, theirs) {
        (Condition::ValidUntil(a), Condition::ValidUntil(b)) => a <= b,
        (Condition::ValidFrom(a), Condition::ValidFrom(b)) => a >= b,
        _ => mine == theirs,
    }
}

/// Duty an Obligation attaches to an allowed action.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Duty {
    Log,
    #[serde(rename_all = "camelCase")]
    Notify { within_hours: u32 },
    DeleteAfter { days: u32 },
    Custom(String),
}

impl std::fmt::Display for Duty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Duty::Log => f.write_str("must log access"),
            Duty::Notify { within_hours } => {
                write!(f, "must notify provider within {} hours", within_hours)
            }
            Duty::DeleteAfter { days } => write!(f, "must delete after {} days", days),
            Duty::Custom(text) => f.write_str(text),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleKind {
    Permission,
    Prohibition,
    Obligation,
}

/// A single usage rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PolicyRule {
    Permission {
        action: Action,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<Target>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<Condition>,
    },
    Prohibition {
        action: Action,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<Target>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<Condition>,
    },
    Obligation {
        action: Action,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<Target>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<Condition>,
        duty: Duty,
    },
}

impl PolicyRule {
    pub fn permission(action: Action) -> Self {
        PolicyRule::Permission {
            action,
            target: None,
            condition: None,
        }
    }

    pub fn prohibition(action: Action) -> Self {
        PolicyRule::Prohibition {
            action,
            target: None,
            condition: None,
        }
    }

    pub fn obligation(action: Action, duty: Duty) -> Self {
        PolicyRule::Obligation {
            action,
            target: None,
            condition: None,
            duty,
        }
    }

    /// Restrict the rule to a target.
    pub fn on(mut self, target: impl Into<Target>) -> Self {
        *self.scope_mut().0 = Some(target.into());
        self
    }

    /// Attach a condition.
    pub fn when(mut self, condition: Condition) -> Self {
        *self.scope_mut().1 = Some(condition);
        self
    }

    /// Copy of the rule with its condition in canonical form.
    pub(crate) fn canonical(&self) -> PolicyRule {
        let mut rule = self.clone();
        let slot = rule.scope_mut().1;
        *slot = slot.as_ref().and_then(Condition::canonical);
        rule
    }

    pub fn kind(&self) -> RuleKind {
        match self {
            PolicyRule::Permission { .. } => RuleKind::Permission,
            PolicyRule::Prohibition { .. } => RuleKind::Prohibition,
            PolicyRule::Obligation { .. } => RuleKind::Obligation,
        }
    }

    pub fn action(&self) -> Action {
        match self {
            PolicyRule::Permission { action, .. }
            | PolicyRule::Prohibition { action, .. }
            | PolicyRule::Obligation { action, .. } => *action,
        }
    }

    pub fn target(&self) -> Option<&Target> {
        match self {
            PolicyRule::Permission { target, .. }
            | PolicyRule::Prohibition { target, .. }
            | PolicyRule::Obligation { target, .. } => target.as_ref(),
        }
    }

    pub fn condition(&self) -> Option<&Condition> {
        match self {
            PolicyRule::Permission { condition, .. }
            | PolicyRule::Prohibition { condition, .. }
            | PolicyRule::Obligation { condition, .. } => condition.as_ref(),
        }
    }

    pub fn duty(&self) -> Option<&Duty> {
        match self {
            PolicyRule::Obligation { duty, .. } => Some(duty),
            _ => None,
        }
    }

    /// Whether the rule's target covers `target` and its condition holds.
    pub fn matches(&self, target: &Target, context: &AccessContext) -> bool {
        let target_matches = self.target().map_or(true, |t| t.covers(target));
        target_matches && self.condition().map_or(true, |c| c.holds(context))
    }

    fn scope_mut(&mut self) -> (&mut Option<Target>, &mut Option<Condition>) {
        match self {
            PolicyRule::Permission {
                target, condition, ..
            }
            | PolicyRule::Prohibition {
                target, condition, ..
            }
            | PolicyRule::Obligation {
                target, condition, ..
            } => (target, condition),
        }
    }

    fn validate(&self, index: usize) -> Result<(), PolicyError> {
        if self.target().is_some_and(|t| t.as_str().is_empty()) {
            return Err(PolicyError::EmptyTarget { rule: index });
        }
        if let Some(Duty::Custom(text)) = self.duty() {
            if text.trim().is_empty() {
                return Err(PolicyError::EmptyDuty { rule: index });
            }
        }
        if let Some(condition) = self.condition() {
            condition.validate(index)?;
        }
        Ok(())
    }
}

/// An immutable set of usage rules with a stable id.
///
/// There are no mutating methods: every change yields a new policy with a
/// fresh [`PolicyId`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsagePolicy {
    policy_id: PolicyId,
    rules: Vec<PolicyRule>,
}

impl UsagePolicy {
    /// Build a validated policy with a fresh id.
    pub fn new(rules: Vec<PolicyRule>) -> Result<Self, PolicyError> {
        let policy = Self {
            policy_id: PolicyId::new(),
            rules,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn builder() -> UsagePolicyBuilder {
        UsagePolicyBuilder::default()
    }

    pub fn id(&self) -> PolicyId {
        self.policy_id
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn permissions(&self) -> impl Iterator<Item = &PolicyRule> {
        self.of_kind(RuleKind::Permission)
    }

    pub fn prohibitions(&self) -> impl Iterator<Item = &PolicyRule> {
        self.of_kind(RuleKind::Prohibition)
    }

    pub fn obligations(&self) -> impl Iterator<Item = &PolicyRule> {
        self.of_kind(RuleKind::Obligation)
    }

    /// Content hash of the rules; independent of rule order and policy id.
    pub fn digest(&self) -> PolicyDigest {
        PolicyDigest::of(self)
    }

    /// Check every rule. Policies deserialized from configuration or the
    /// wire should be validated before use.
    pub fn validate(&self) -> Result<(), PolicyError> {
        self.rules
            .iter()
            .enumerate()
            .try_for_each(|(index, rule)| rule.validate(index))
    }

    fn of_kind(&self, kind: RuleKind) -> impl Iterator<Item = &PolicyRule> {
        self.rules.iter().filter(move |r| r.kind() == kind)
    }
}

/// Builder for [`UsagePolicy`].
#[derive(Clone, Debug, Default)]
pub struct UsagePolicyBuilder {
    rules: Vec<PolicyRule>,
}

impl UsagePolicyBuilder {
    pub fn rule(mut self, rule: PolicyRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn permit(self, action: Action, target: impl Into<Target>) -> Self {
        self.rule(PolicyRule::permission(action).on(target))
    }

    pub fn prohibit(self, action: Action, target: impl Into<Target>) -> Self {
        self.rule(PolicyRule::prohibition(action).on(target))
    }

    pub fn oblige(self, action: Action, target: impl Into<Target>, duty: Duty) -> Self {
        self.rule(PolicyRule::obligation(action, duty).on(target))
    }

    pub fn build(self) -> Result<UsagePolicy, PolicyError> {
        UsagePolicy::new(self.rules)
    }
}

// ── Scope helpers shared with offer assessment ──────────────────────

/// Whether a rule scoped to `grant` applies to everything scoped to `asked`.
pub(crate) fn scope_covers(grant: Option<&Target>, asked: Option<&Target>) -> bool {
    match (grant, asked) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(g), Some(a)) => g.covers(a),
    }
}

pub(crate) fn scopes_overlap(a: Option<&Target>, b: Option<&Target>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.covers(b) || b.covers(a),
        _ => true,
    }
}

/// The more specific of two overlapping scopes.
pub(crate) fn narrower_scope(a: Option<&Target>, b: Option<&Target>) -> Option<Target> {
    match (a, b) {
        (None, other) | (other, None) => other.cloned(),
        (Some(a), Some(b)) => {
            if a.covers(b) {
                Some(b.clone())
            } else {
                Some(a.clone())
            }
        }
    }
}

/// Whether `stricter` admits no context that `weaker` rejects.
pub(crate) fn condition_implies(stricter: Option<&Condition>, weaker: Option<&Condition>) -> bool {
    match (stricter, weaker) {
        (_, None) => true,
        (None, Some(w)) => w.atoms().is_empty(),
        (Some(s), Some(w)) => s.implies(w),
    }
}

/// Conjunction of two optional conditions with duplicate atoms removed.
pub(crate) fn conjoin(a: Option<&Condition>, b: Option<&Condition>) -> Option<Condition> {
    let mut atoms: Vec<Condition> = Vec::new();
    for atom in a.into_iter().chain(b).flat_map(|c| c.atoms()) {
        if !atoms.contains(atom) {
            atoms.push(atom.clone());
        }
    }
    match atoms.len() {
        0 => None,
        1 => atoms.pop(),
        _ => Some(Condition::All(atoms)),
    }
}
