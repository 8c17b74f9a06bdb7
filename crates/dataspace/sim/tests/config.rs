//! Loading dataspace configuration from files.

use std::io::Write;

use dataspace_policy::{Action, Duty, RuleKind};
use dataspace_sim::{DataspaceConfig, StrategyConfig};
use dataspace_types::{Party, ResourceRef};

const TWO_PARTIES: &str = r#"
[negotiation]
counter_offer_budget = 3
default_deadline_secs = 60

[logging]
level = "debug"
json = true

[[stakeholders]]
party = "urn:dpp:manufacturer"

[[stakeholders.catalogue]]
resource = "passport:battery-42"
rules = [
  { kind = "permission", action = "READ", target = "materials" },
  { kind = "prohibition", action = "DELETE", target = "materials" },
  { kind = "obligation", action = "READ", target = "materials", duty = "log" },
]

[[stakeholders]]
party = "urn:dpp:recycler"
strategy = { type = "hold_for_review" }
"#;

#[test]
fn loads_stakeholders_from_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(TWO_PARTIES.as_bytes()).unwrap();

    let config = DataspaceConfig::load(file.path().to_str()).unwrap();
    assert_eq!(config.negotiation.counter_offer_budget, 3);
    assert_eq!(config.negotiation.default_deadline_secs, 60);
    assert_eq!(config.logging.level, "debug");
    assert!(config.logging.json);
    assert_eq!(config.stakeholders.len(), 2);

    let manufacturer = config
        .stakeholder(&Party::new("urn:dpp:manufacturer").unwrap())
        .unwrap();
    let catalogue = manufacturer.catalogue().unwrap();
    let resources: Vec<&ResourceRef> = catalogue.resources().collect();
    assert_eq!(resources, vec![&ResourceRef::new("passport:battery-42")]);

    let rules = &manufacturer.catalogue[0].rules;
    let kinds: Vec<RuleKind> = rules.iter().map(|r| r.kind()).collect();
    assert_eq!(
        kinds,
        vec![RuleKind::Permission, RuleKind::Prohibition, RuleKind::Obligation]
    );
    assert_eq!(rules[1].action(), Action::Delete);
    assert_eq!(rules[2].duty(), Some(&Duty::Log));

    let recycler = config
        .stakeholder(&Party::new("urn:dpp:recycler").unwrap())
        .unwrap();
    assert!(matches!(recycler.strategy, StrategyConfig::HoldForReview));
    assert!(recycler.catalogue.is_empty());
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let config = DataspaceConfig::load(Some("/nonexistent/dataspace.toml")).unwrap();
    assert_eq!(config.negotiation.counter_offer_budget, 5);
    assert_eq!(config.logging.level, "info");
    assert!(config.stakeholders.is_empty());
}

#[test]
fn inline_toml_overrides_defaults_partially() {
    let config = DataspaceConfig::from_toml("[negotiation]\ncounter_offer_budget = 2\n").unwrap();
    assert_eq!(config.negotiation.counter_offer_budget, 2);
    assert_eq!(config.negotiation.default_deadline_secs, 300);
    assert!(!config.logging.json);
}

#[test]
fn invalid_party_is_a_config_error() {
    let result = DataspaceConfig::from_toml("[[stakeholders]]\nparty = \"has space\"\n");
    assert!(result.is_err());
}
