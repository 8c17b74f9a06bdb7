use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable identifier of a stakeholder connector (e.g. `urn:dpp:recycler`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Party(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PartyError {
    #[error("party identifier cannot be empty")]
    Empty,

    #[error("party identifier contains whitespace: {0:?}")]
    Whitespace(String),
}

impl Party {
    pub fn new(id: impl Into<String>) -> Result<Self, PartyError> {
        let id = id.into();
        if id.is_empty() {
            return Err(PartyError::Empty);
        }
        if id.chars().any(char::is_whitespace) {
            return Err(PartyError::Whitespace(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Party {
    type Error = PartyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Party::new(value)
    }
}

impl From<Party> for String {
    fn from(party: Party) -> Self {
        party.0
    }
}

impl std::fmt::Display for Party {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to a resource offered in the dataspace, e.g. a passport id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef(pub String);

impl ResourceRef {
    pub fn new(resource: impl Into<String>) -> Self {
        Self(resource.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
