//! Negotiation engine configuration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Limits applied to every negotiation an engine takes part in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationConfig {
    /// Counter rounds allowed before the negotiation is rejected as exhausted
    #[serde(default = "default_counter_offer_budget")]
    pub counter_offer_budget: usize,

    /// Deadline applied when neither the caller nor the incoming offer sets one
    #[serde(default = "default_deadline_secs")]
    pub default_deadline_secs: u64,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            counter_offer_budget: default_counter_offer_budget(),
            default_deadline_secs: default_deadline_secs(),
        }
    }
}

impl NegotiationConfig {
    pub fn default_deadline(&self) -> chrono::Duration {
        let secs = i64::try_from(self.default_deadline_secs)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 1000);
        chrono::Duration::seconds(secs)
    }

    /// Deadline for a negotiation opened at `now` without an explicit one.
    pub fn deadline_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.default_deadline())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

fn default_counter_offer_budget() -> usize {
    5
}

fn default_deadline_secs() -> u64 {
    300
}
