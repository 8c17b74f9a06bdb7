use serde::{Deserialize, Serialize};

use crate::model::UsagePolicy;

const DIGEST_DOMAIN_TAG: &[u8] = b"dataspace/policy-digest/v1";

/// BLAKE3 content hash of a policy's rules.
///
/// Each rule is serialized to canonical JSON with its condition in canonical
/// form, the encodings are sorted, and the sorted sequence is hashed with
/// length prefixes. The digest therefore ignores rule order, conjunct order
/// and the policy id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyDigest(pub [u8; 32]);

impl PolicyDigest {
    pub fn of(policy: &UsagePolicy) -> Self {
        let mut encoded: Vec<Vec<u8>> = policy
            .rules()
            .iter()
            .map(|rule| serde_json::to_vec(&rule.canonical()).unwrap_or_default())
            .collect();
        encoded.sort();

        let mut hasher = blake3::Hasher::new();
        hasher.update(DIGEST_DOMAIN_TAG);
        for rule in &encoded {
            hasher.update(&(rule.len() as u64).to_le_bytes());
            hasher.update(rule);
        }
        Self(*hasher.finalize().as_bytes())
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl std::fmt::Display for PolicyDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for PolicyDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PolicyDigest({})", &self.to_hex()[..16])
    }
}
