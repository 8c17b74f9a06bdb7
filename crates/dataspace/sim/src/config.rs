//! Configuration for the simulated dataspace

use std::sync::Arc;

use dataspace_negotiation::{
    AcceptAny, CounterOfferStrategy, HoldForReview, NegotiationConfig, RequireMinimum,
    StaticCatalogue,
};
use dataspace_policy::{PolicyError, PolicyRule, UsagePolicy};
use dataspace_types::{Party, ResourceRef};
use serde::{Deserialize, Serialize};

/// Environment variable prefix, e.g. `DATASPACE_LOGGING__LEVEL=debug`.
pub const ENV_PREFIX: &str = "DATASPACE";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataspaceConfig {
    /// Limits shared by every connector's negotiation engine
    #[serde(default)]
    pub negotiation: NegotiationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// One entry per connector
    #[serde(default)]
    pub stakeholders: Vec<StakeholderConfig>,
}

/// A stakeholder connector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakeholderConfig {
    pub party: Party,

    /// How this party answers counter-offers when acting as consumer
    #[serde(default)]
    pub strategy: StrategyConfig,

    /// Resources this party provides and the policy it is willing to grant
    #[serde(default)]
    pub catalogue: Vec<CatalogueEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogueEntry {
    pub resource: ResourceRef,
    pub rules: Vec<PolicyRule>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    #[default]
    AcceptAny,
    HoldForReview,
    RequireMinimum { rules: Vec<PolicyRule> },
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DataspaceConfig {
    /// Load configuration: defaults, then the optional file, then
    /// `DATASPACE_`-prefixed environment variables.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = Self::defaults()?;

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        Self::finish(builder)
    }

    /// Load from TOML text layered over the defaults and environment.
    pub fn from_toml(contents: &str) -> Result<Self, config::ConfigError> {
        let builder = Self::defaults()?
            .add_source(config::File::from_str(contents, config::FileFormat::Toml));
        Self::finish(builder)
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError>
    {
        Ok(config::Config::builder()
            .add_source(config::Config::try_from(&DataspaceConfig::default())?))
    }

    fn finish(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, config::ConfigError> {
        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn stakeholder(&self, party: &Party) -> Option<&StakeholderConfig> {
        self.stakeholders.iter().find(|s| &s.party == party)
    }
}

impl StakeholderConfig {
    pub fn new(party: Party) -> Self {
        Self {
            party,
            strategy: StrategyConfig::default(),
            catalogue: Vec::new(),
        }
    }

    pub fn offering(mut self, resource: ResourceRef, policy: &UsagePolicy) -> Self {
        self.catalogue.push(CatalogueEntry {
            resource,
            rules: policy.rules().to_vec(),
        });
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyConfig) -> Self {
        self.strategy = strategy;
        self
    }

    /// Build the acceptance catalogue, validating every policy.
    pub fn catalogue(&self) -> Result<StaticCatalogue, PolicyError> {
        self.catalogue
            .iter()
            .try_fold(StaticCatalogue::new(), |catalogue, entry| {
                let policy = UsagePolicy::new(entry.rules.clone())?;
                Ok(catalogue.with(entry.resource.clone(), policy))
            })
    }

    pub fn strategy(&self) -> Result<Arc<dyn CounterOfferStrategy>, PolicyError> {
        Ok(match &self.strategy {
            StrategyConfig::AcceptAny => Arc::new(AcceptAny),
            StrategyConfig::HoldForReview => Arc::new(HoldForReview),
            StrategyConfig::RequireMinimum { rules } => {
                Arc::new(RequireMinimum::new(UsagePolicy::new(rules.clone())?))
            }
        })
    }
}
