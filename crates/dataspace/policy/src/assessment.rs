//! Provider-side comparison of a proposed policy with an acceptance policy.

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;
use crate::model::{
    condition_implies, conjoin, narrower_scope, scope_covers, scopes_overlap, Action, PolicyRule,
    RuleKind, UsagePolicy,
};

/// Why a proposal cannot be negotiated at all.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum Unacceptable {
    /// The proposal asks for an action the provider unconditionally prohibits.
    ForbiddenAction { action: Action },
    /// The provider grants nothing on any requested target.
    NothingGrantable,
}

impl std::fmt::Display for Unacceptable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unacceptable::ForbiddenAction { action } => {
                write!(f, "{} is forbidden by the provider", action)
            }
            Unacceptable::NothingGrantable => f.write_str("nothing grantable on requested targets"),
        }
    }
}

/// Result of [`assess_offer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OfferAssessment {
    /// The proposal is no more permissive than the acceptance policy.
    Acceptable,
    /// The proposal is too permissive; `counter` is a stricter alternative.
    Negotiable { counter: UsagePolicy },
    NonNegotiable(Unacceptable),
}

/// Compare a proposed policy with what a provider is willing to grant.
///
/// A proposal is acceptable when every proposed Permission is covered by an
/// acceptance Permission for the same action (wider target, weaker or equal
/// condition) and every Obligation and conditional Prohibition the provider
/// attaches to those actions is already present. A proposed Permission whose
/// whole target the provider unconditionally prohibits for that action is
/// non-negotiable. Anything else yields a counter-policy that keeps granted
/// permissions, replaces ungranted ones with what the provider grants on the
/// same targets, and adds the provider's duties and restrictions. The counter
/// is itself acceptable against the same acceptance policy.
pub fn assess_offer(
    proposed: &UsagePolicy,
    acceptance: &UsagePolicy,
) -> Result<OfferAssessment, PolicyError> {
    let mut granted: Vec<PolicyRule> = Vec::new();
    let mut changed = false;

    for asked in proposed.permissions() {
        if let Some(action) = forbidden(asked, acceptance) {
            return Ok(OfferAssessment::NonNegotiable(Unacceptable::ForbiddenAction {
                action,
            }));
        }

        let same_action: Vec<&PolicyRule> = acceptance
            .permissions()
            .filter(|g| g.action() == asked.action() && scopes_overlap(g.target(), asked.target()))
            .collect();

        let covered = same_action.iter().any(|g| {
            scope_covers(g.target(), asked.target())
                && condition_implies(asked.condition(), g.condition())
        });

        if covered {
            push_unique(&mut granted, asked.clone());
            continue;
        }

        changed = true;
        let substitutes: Vec<&PolicyRule> = if same_action.is_empty() {
            acceptance
                .permissions()
                .filter(|g| scopes_overlap(g.target(), asked.target()))
                .collect()
        } else {
            same_action
        };
        for grant in substitutes {
            let offered = narrowed(grant, asked);
            if forbidden(&offered, acceptance).is_none() {
                push_unique(&mut granted, offered);
            }
        }
    }

    if granted.is_empty() {
        return Ok(OfferAssessment::NonNegotiable(Unacceptable::NothingGrantable));
    }

    let mut counter_rules = granted.clone();

    // Duties and conditional restrictions the provider attaches to what it grants.
    for required in acceptance
        .rules()
        .iter()
        .filter(|r| r.kind() != RuleKind::Permission)
    {
        for grant in granted
            .iter()
            .filter(|g| g.action() == required.action() && scopes_overlap(required.target(), g.target()))
        {
            let requirement = narrowed(required, grant);
            if !already_present(proposed, &requirement) {
                changed = true;
            }
            push_unique(&mut counter_rules, requirement);
        }
    }

    if !changed {
        return Ok(OfferAssessment::Acceptable);
    }

    for restriction in proposed
        .rules()
        .iter()
        .filter(|r| r.kind() != RuleKind::Permission)
    {
        push_unique(&mut counter_rules, restriction.clone());
    }

    Ok(OfferAssessment::Negotiable {
        counter: UsagePolicy::new(counter_rules)?,
    })
}

/// Whether `offered` grants at least what `required` asks for.
///
/// Used by a consumer to check a counter-offer against its minimum needs:
/// every required Permission must be covered by an offered Permission with a
/// condition no stricter than the required one, and must not be cut back by an
/// unconditional offered Prohibition.
pub fn satisfies(offered: &UsagePolicy, required: &UsagePolicy) -> bool {
    required.permissions().all(|need| {
        let granted = offered.permissions().any(|p| {
            p.action() == need.action()
                && scope_covers(p.target(), need.target())
                && condition_implies(need.condition(), p.condition())
        });
        let cut_back = offered.prohibitions().any(|x| {
            x.action() == need.action()
                && x.condition().is_none()
                && scopes_overlap(x.target(), need.target())
        });
        granted && !cut_back
    })
}

fn forbidden(asked: &PolicyRule, acceptance: &UsagePolicy) -> Option<Action> {
    acceptance
        .prohibitions()
        .find(|x| {
            x.action() == asked.action()
                && x.condition().is_none()
                && scope_covers(x.target(), asked.target())
        })
        .map(PolicyRule::action)
}

/// `rule` restricted to the scope it shares with `within`, with both
/// conditions conjoined.
fn narrowed(rule: &PolicyRule, within: &PolicyRule) -> PolicyRule {
    let target = narrower_scope(rule.target(), within.target());
    let condition = conjoin(rule.condition(), within.condition());
    match rule {
        PolicyRule::Permission { action, .. } => PolicyRule::Permission {
            action: *action,
            target,
            condition,
        },
        PolicyRule::Prohibition { action, .. } => PolicyRule::Prohibition {
            action: *action,
            target,
            condition: rule.condition().cloned(),
        },
        PolicyRule::Obligation { action, duty, .. } => PolicyRule::Obligation {
            action: *action,
            target,
            condition,
            duty: duty.clone(),
        },
    }
}

/// Whether `proposed` already carries a rule at least as strong as `requirement`.
fn already_present(proposed: &UsagePolicy, requirement: &PolicyRule) -> bool {
    proposed.rules().iter().any(|r| {
        r.kind() == requirement.kind()
            && r.action() == requirement.action()
            && r.duty() == requirement.duty()
            && scope_covers(r.target(), requirement.target())
            && condition_implies(requirement.condition(), r.condition())
    })
}

fn push_unique(rules: &mut Vec<PolicyRule>, rule: PolicyRule) {
    if !rules.contains(&rule) {
        rules.push(rule);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Condition, Duty, Target};

    fn read_only_materials() -> UsagePolicy {
        UsagePolicy::builder()
            .permit(Action::Read, "materials")
            .build()
            .unwrap()
    }

    #[test]
    fn subset_is_acceptable() {
        let proposed = UsagePolicy::builder()
            .permit(Action::Read, "materials.composition")
            .build()
            .unwrap();
        assert_eq!(
            assess_offer(&proposed, &read_only_materials()).unwrap(),
            OfferAssessment::Acceptable
        );
    }

    #[test]
    fn ungranted_action_is_countered_with_grantable_one() {
        let proposed = UsagePolicy::builder()
            .permit(Action::Distribute, "materials")
            .build()
            .unwrap();

        let OfferAssessment::Negotiable { counter } =
            assess_offer(&proposed, &read_only_materials()).unwrap()
        else {
            panic!("expected a counter-offer");
        };

        assert_ne!(counter.id(), proposed.id());
        let actions: Vec<Action> = counter.permissions().map(|r| r.action()).collect();
        assert_eq!(actions, vec![Action::Read]);
        assert_eq!(
            assess_offer(&counter, &read_only_materials()).unwrap(),
            OfferAssessment::Acceptable
        );
    }

    #[test]
    fn wider_target_is_narrowed() {
        let acceptance = UsagePolicy::builder()
            .permit(Action::Read, "materials.composition")
            .build()
            .unwrap();
        let proposed = UsagePolicy::builder()
            .permit(Action::Read, "materials")
            .build()
            .unwrap();

        let OfferAssessment::Negotiable { counter } = assess_offer(&proposed, &acceptance).unwrap()
        else {
            panic!("expected a counter-offer");
        };
        let targets: Vec<Option<&Target>> = counter.permissions().map(|r| r.target()).collect();
        assert_eq!(targets, vec![Some(&Target::new("materials.composition"))]);
    }

    #[test]
    fn missing_obligation_is_added() {
        let acceptance = UsagePolicy::builder()
            .permit(Action::Read, "materials")
            .oblige(Action::Read, "materials", Duty::Notify { within_hours: 48 })
            .build()
            .unwrap();
        let proposed = read_only_materials();

        let OfferAssessment::Negotiable { counter } = assess_offer(&proposed, &acceptance).unwrap()
        else {
            panic!("expected a counter-offer");
        };
        assert!(counter
            .obligations()
            .any(|o| o.duty() == Some(&Duty::Notify { within_hours: 48 })));
        assert_eq!(
            assess_offer(&counter, &acceptance).unwrap(),
            OfferAssessment::Acceptable
        );
    }

    #[test]
    fn condition_on_grant_is_carried_into_counter() {
        let acceptance = UsagePolicy::new(vec![PolicyRule::permission(Action::Read)
            .on("materials")
            .when(Condition::Role("Recycler".into()))])
        .unwrap();
        let proposed = read_only_materials();

        let OfferAssessment::Negotiable { counter } = assess_offer(&proposed, &acceptance).unwrap()
        else {
            panic!("expected a counter-offer");
        };
        assert_eq!(
            counter.permissions().next().and_then(|r| r.condition()),
            Some(&Condition::Role("Recycler".into()))
        );
    }

    #[test]
    fn unconditionally_prohibited_action_is_non_negotiable() {
        let acceptance = UsagePolicy::builder()
            .permit(Action::Read, "materials")
            .prohibit(Action::Delete, "materials")
            .build()
            .unwrap();
        let proposed = UsagePolicy::builder()
            .permit(Action::Delete, "materials.composition")
            .build()
            .unwrap();
        assert_eq!(
            assess_offer(&proposed, &acceptance).unwrap(),
            OfferAssessment::NonNegotiable(Unacceptable::ForbiddenAction {
                action: Action::Delete
            })
        );
    }

    #[test]
    fn disjoint_target_is_non_negotiable() {
        let proposed = UsagePolicy::builder()
            .permit(Action::Read, "repair_history")
            .build()
            .unwrap();
        assert_eq!(
            assess_offer(&proposed, &read_only_materials()).unwrap(),
            OfferAssessment::NonNegotiable(Unacceptable::NothingGrantable)
        );
    }

    #[test]
    fn satisfies_checks_minimum_needs() {
        let need = UsagePolicy::builder()
            .permit(Action::Read, "materials.composition")
            .build()
            .unwrap();
        assert!(satisfies(&read_only_materials(), &need));

        let distribute = UsagePolicy::builder()
            .permit(Action::Distribute, "materials")
            .build()
            .unwrap();
        assert!(!satisfies(&read_only_materials(), &distribute));

        let cut_back = UsagePolicy::builder()
            .permit(Action::Read, "materials")
            .prohibit(Action::Read, "materials.composition")
            .build()
            .unwrap();
        assert!(!satisfies(&cut_back, &need));
    }
}
