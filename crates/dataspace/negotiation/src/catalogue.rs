use std::collections::HashMap;

use dataspace_policy::UsagePolicy;
use dataspace_types::ResourceRef;

/// Where a provider looks up what it is willing to grant for a resource.
pub trait AcceptancePolicySource: Send + Sync {
    fn acceptance_policy(&self, resource: &ResourceRef) -> Option<UsagePolicy>;
}

/// Fixed resource → acceptance policy table.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalogue {
    policies: HashMap<ResourceRef, UsagePolicy>,
}

impl StaticCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, resource: ResourceRef, policy: UsagePolicy) -> Self {
        self.insert(resource, policy);
        self
    }

    pub fn insert(&mut self, resource: ResourceRef, policy: UsagePolicy) {
        self.policies.insert(resource, policy);
    }

    pub fn resources(&self) -> impl Iterator<Item = &ResourceRef> {
        self.policies.keys()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl AcceptancePolicySource for StaticCatalogue {
    fn acceptance_policy(&self, resource: &ResourceRef) -> Option<UsagePolicy> {
        self.policies.get(resource).cloned()
    }
}
