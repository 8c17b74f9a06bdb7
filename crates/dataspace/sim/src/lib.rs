//! Simulated dataspace
//!
//! Wires one connector per configured stakeholder onto a shared in-memory
//! network and drives scripted scenarios through negotiation and
//! enforcement.

#![deny(unsafe_code)]

pub mod config;
pub mod connector;
pub mod dataspace;
pub mod error;
pub mod logging;
pub mod scenario;

pub use config::{CatalogueEntry, DataspaceConfig, LoggingConfig, StakeholderConfig, StrategyConfig};
pub use connector::Connector;
pub use dataspace::Dataspace;
pub use error::{SimError, SimResult};
pub use scenario::ScenarioReport;
