use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use dataspace_policy::{PolicyDigest, UsagePolicy};
use dataspace_types::{AgreementId, NegotiationId};
use tracing::{debug, error, info};

use crate::error::StoreError;
use crate::records::{Agreement, Negotiation};

/// One connector's view of its negotiations and agreements.
///
/// Each party keeps its own store; nothing here is shared across
/// connectors. Agreements are write-once and handed out behind `Arc` so
/// enforcement never holds a map guard while evaluating.
#[derive(Debug, Default)]
pub struct ContractStore {
    negotiations: DashMap<NegotiationId, Negotiation>,
    agreements: DashMap<AgreementId, Arc<Agreement>>,
    by_negotiation: DashMap<NegotiationId, AgreementId>,
}

impl ContractStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the local copy of a negotiation.
    pub fn put_negotiation(&self, negotiation: Negotiation) {
        self.negotiations
            .insert(negotiation.negotiation_id, negotiation);
    }

    pub fn negotiation(&self, id: NegotiationId) -> Result<Negotiation, StoreError> {
        self.negotiations
            .get(&id)
            .map(|n| n.clone())
            .ok_or(StoreError::NegotiationNotFound(id))
    }

    pub fn contains_negotiation(&self, id: NegotiationId) -> bool {
        self.negotiations.contains_key(&id)
    }

    /// All negotiations, oldest first.
    pub fn negotiations(&self) -> Vec<Negotiation> {
        let mut all: Vec<Negotiation> = self.negotiations.iter().map(|n| n.clone()).collect();
        all.sort_by_key(|n| n.created_at);
        all
    }

    pub fn agreement(&self, id: AgreementId) -> Result<Arc<Agreement>, StoreError> {
        self.agreements
            .get(&id)
            .map(|a| Arc::clone(a.value()))
            .ok_or(StoreError::AgreementNotFound(id))
    }

    pub fn agreement_for(&self, negotiation_id: NegotiationId) -> Option<Arc<Agreement>> {
        let agreement_id = *self.by_negotiation.get(&negotiation_id)?;
        self.agreements.get(&agreement_id).map(|a| Arc::clone(a.value()))
    }

    pub fn agreements(&self) -> Vec<Arc<Agreement>> {
        self.agreements.iter().map(|a| Arc::clone(a.value())).collect()
    }

    /// Materialize the agreement for a negotiation.
    ///
    /// Write-once: the negotiation's index slot is claimed through a single
    /// map entry, so of any number of concurrent callers exactly one
    /// succeeds and the rest see `AlreadySettled`.
    pub fn settle_agreement(
        &self,
        negotiation_id: NegotiationId,
        policy: UsagePolicy,
        signed_at: DateTime<Utc>,
    ) -> Result<Arc<Agreement>, StoreError> {
        let (consumer, provider) = {
            let negotiation = self
                .negotiations
                .get(&negotiation_id)
                .ok_or(StoreError::NegotiationNotFound(negotiation_id))?;
            (negotiation.consumer.clone(), negotiation.provider.clone())
        };

        match self.by_negotiation.entry(negotiation_id) {
            Entry::Occupied(existing) => Err(StoreError::AlreadySettled {
                negotiation_id,
                agreement_id: *existing.get(),
            }),
            Entry::Vacant(slot) => {
                let agreement_id = AgreementId::for_negotiation(&negotiation_id);
                let agreement = Arc::new(Agreement {
                    agreement_id,
                    negotiation_id,
                    policy,
                    consumer,
                    provider,
                    signed_at,
                });
                self.agreements
                    .insert(agreement_id, Arc::clone(&agreement));
                slot.insert(agreement_id);

                info!(
                    negotiation_id = %negotiation_id,
                    agreement_id = %agreement_id,
                    digest = %agreement.digest(),
                    "Agreement settled"
                );
                Ok(agreement)
            }
        }
    }

    /// Digest of the policy settled for a negotiation.
    pub fn policy_digest(&self, negotiation_id: NegotiationId) -> Result<PolicyDigest, StoreError> {
        self.agreement_for(negotiation_id)
            .map(|a| a.digest())
            .ok_or(StoreError::NotSettled(negotiation_id))
    }

    /// Compare the locally settled policy with the counterpart's digest.
    ///
    /// A mismatch is reported, never repaired.
    pub fn reconcile(
        &self,
        negotiation_id: NegotiationId,
        remote: PolicyDigest,
    ) -> Result<(), StoreError> {
        let local = self.policy_digest(negotiation_id)?;
        if local != remote {
            error!(
                negotiation_id = %negotiation_id,
                local = %local,
                remote = %remote,
                "Settled policy diverges from counterpart"
            );
            return Err(StoreError::PolicyConflict {
                negotiation_id,
                local,
                remote,
            });
        }
        debug!(negotiation_id = %negotiation_id, "Settled policy reconciled");
        Ok(())
    }

    pub fn negotiation_count(&self) -> usize {
        self.negotiations.len()
    }

    pub fn agreement_count(&self) -> usize {
        self.agreements.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::LocalRole;
    use chrono::{Duration, TimeZone};
    use dataspace_policy::Action;
    use dataspace_types::{Party, ResourceRef};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap()
    }

    fn read_materials() -> UsagePolicy {
        UsagePolicy::builder()
            .permit(Action::Read, "materials")
            .build()
            .unwrap()
    }

    fn store_with_negotiation() -> (ContractStore, NegotiationId) {
        let store = ContractStore::new();
        let id = NegotiationId::new();
        store.put_negotiation(Negotiation::new(
            id,
            Party::new("urn:dpp:recycler").unwrap(),
            Party::new("urn:dpp:manufacturer").unwrap(),
            ResourceRef::new("passport:battery-42"),
            LocalRole::Consumer,
            now() + Duration::minutes(5),
            now(),
        ));
        (store, id)
    }

    #[test]
    fn unknown_negotiation_is_not_found() {
        let store = ContractStore::new();
        let id = NegotiationId::new();
        assert_eq!(
            store.negotiation(id).unwrap_err(),
            StoreError::NegotiationNotFound(id)
        );
        assert!(store.settle_agreement(id, read_materials(), now()).unwrap_err().is_not_found());
    }

    #[test]
    fn settle_is_write_once() {
        let (store, id) = store_with_negotiation();
        let first = store.settle_agreement(id, read_materials(), now()).unwrap();
        assert_eq!(first.agreement_id, AgreementId::for_negotiation(&id));

        let err = store
            .settle_agreement(id, read_materials(), now())
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::AlreadySettled {
                negotiation_id: id,
                agreement_id: first.agreement_id,
            }
        );
        assert_eq!(store.agreement_count(), 1);
        assert_eq!(store.agreement_for(id).unwrap().agreement_id, first.agreement_id);
    }

    #[test]
    fn concurrent_settlement_has_exactly_one_winner() {
        let (store, id) = store_with_negotiation();
        let store = Arc::new(store);

        let results: Vec<Result<Arc<Agreement>, StoreError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    let store = Arc::clone(&store);
                    scope.spawn(move || store.settle_agreement(id, read_materials(), now()))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, StoreError::AlreadySettled { .. })));
        assert_eq!(store.agreement_count(), 1);
    }

    #[test]
    fn reconcile_detects_divergent_policy() {
        let (store, id) = store_with_negotiation();
        store.settle_agreement(id, read_materials(), now()).unwrap();

        // Same rules under another policy id still reconcile.
        let same = UsagePolicy::new(read_materials().rules().to_vec()).unwrap();
        assert!(store.reconcile(id, same.digest()).is_ok());

        let other = UsagePolicy::builder()
            .permit(Action::Distribute, "materials")
            .build()
            .unwrap();
        assert!(matches!(
            store.reconcile(id, other.digest()),
            Err(StoreError::PolicyConflict { .. })
        ));
    }

    #[test]
    fn digest_requires_settlement() {
        let (store, id) = store_with_negotiation();
        assert_eq!(store.policy_digest(id).unwrap_err(), StoreError::NotSettled(id));
    }

    #[test]
    fn negotiations_listed_oldest_first() {
        let store = ContractStore::new();
        for offset in [3, 1, 2] {
            store.put_negotiation(Negotiation::new(
                NegotiationId::new(),
                Party::new("urn:dpp:recycler").unwrap(),
                Party::new("urn:dpp:manufacturer").unwrap(),
                ResourceRef::new("passport:battery-42"),
                LocalRole::Consumer,
                now() + Duration::minutes(5),
                now() + Duration::seconds(offset),
            ));
        }
        let created: Vec<_> = store.negotiations().iter().map(|n| n.created_at).collect();
        let mut sorted = created.clone();
        sorted.sort();
        assert_eq!(created, sorted);
        assert_eq!(store.negotiation_count(), 3);
    }
}
