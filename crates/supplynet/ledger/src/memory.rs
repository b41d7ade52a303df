//! In-memory ledger backend.
//!
//! Deterministic and test-friendly. Transactions are serialized through a
//! single writer lock and stage their writes in an overlay that is applied
//! atomically on commit. Production deployments should use the PostgreSQL
//! backend.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use supplynet_types::{
    Allocation, Commitment, CommitmentId, CompanyId, Lot, LotId, LotOrigin, LotRelationship,
    LotStatus, PlanId,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::snapshot::LedgerSnapshot;
use crate::traits::{GraphSource, LedgerReader, LedgerStore, LedgerTx};
use crate::{LedgerError, LedgerResult};

#[derive(Default)]
struct LedgerState {
    commitments: HashMap<CommitmentId, Commitment>,
    lots: HashMap<LotId, Lot>,
    relationships: Vec<LotRelationship>,
    allocations: Vec<Allocation>,
}

/// In-memory ledger store.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<RwLock<LedgerState>>,
    writer: Arc<Mutex<()>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a ledger from a snapshot, e.g. one exported by `snapshot()`.
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        let state = LedgerState {
            commitments: snapshot
                .commitments
                .into_iter()
                .map(|c| (c.id, c))
                .collect(),
            lots: snapshot.lots.into_iter().map(|l| (l.id, l)).collect(),
            relationships: snapshot.relationships,
            allocations: snapshot.allocations,
        };
        Self {
            state: Arc::new(RwLock::new(state)),
            writer: Arc::new(Mutex::new(())),
        }
    }

    fn read(&self) -> LedgerResult<RwLockReadGuard<'_, LedgerState>> {
        read_state(&self.state)
    }
}

fn read_state(state: &RwLock<LedgerState>) -> LedgerResult<RwLockReadGuard<'_, LedgerState>> {
    state
        .read()
        .map_err(|_| LedgerError::Backend("ledger lock poisoned".to_string()))
}

fn write_state(state: &RwLock<LedgerState>) -> LedgerResult<RwLockWriteGuard<'_, LedgerState>> {
    state
        .write()
        .map_err(|_| LedgerError::Backend("ledger lock poisoned".to_string()))
}

#[async_trait]
impl LedgerReader for InMemoryLedger {
    async fn get_commitment(&self, id: &CommitmentId) -> LedgerResult<Option<Commitment>> {
        Ok(self.read()?.commitments.get(id).cloned())
    }

    async fn get_lot(&self, id: &LotId) -> LedgerResult<Option<Lot>> {
        Ok(self.read()?.lots.get(id).cloned())
    }

    async fn allocations_for_demand(&self, id: &CommitmentId) -> LedgerResult<Vec<Allocation>> {
        let guard = self.read()?;
        let mut out: Vec<Allocation> = guard
            .allocations
            .iter()
            .filter(|a| a.demand_commitment_id == *id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn relationships_for_child(&self, id: &LotId) -> LedgerResult<Vec<LotRelationship>> {
        let guard = self.read()?;
        Ok(guard
            .relationships
            .iter()
            .filter(|r| r.child_lot_id == *id)
            .cloned()
            .collect())
    }

    async fn lots_delivered_for(&self, commitment_id: &CommitmentId) -> LedgerResult<Vec<Lot>> {
        let guard = self.read()?;
        let mut out: Vec<Lot> = guard
            .lots
            .values()
            .filter(|l| {
                matches!(&l.origin, LotOrigin::Delivered { commitment_id: c } if c == commitment_id)
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn open_commitments_for_seller(
        &self,
        seller: &CompanyId,
    ) -> LedgerResult<Vec<Commitment>> {
        let guard = self.read()?;
        let mut out: Vec<Commitment> = guard
            .commitments
            .values()
            .filter(|c| c.seller == *seller && c.fulfillment_state.accepts_allocations())
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn active_lots_for_owner(&self, owner: &CompanyId) -> LedgerResult<Vec<Lot>> {
        let guard = self.read()?;
        let mut out: Vec<Lot> = guard
            .lots
            .values()
            .filter(|l| l.owner == *owner && l.status == LotStatus::Active)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn snapshot(&self) -> LedgerResult<LedgerSnapshot> {
        let guard = self.read()?;
        Ok(LedgerSnapshot::new(
            guard.commitments.values().cloned().collect(),
            guard.lots.values().cloned().collect(),
            guard.relationships.clone(),
            guard.allocations.clone(),
        ))
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTx>> {
        let guard = self.writer.clone().lock_owned().await;
        Ok(Box::new(InMemoryTx {
            state: self.state.clone(),
            _writer: guard,
            staged: Overlay::default(),
        }))
    }

    fn backend_label(&self) -> &'static str {
        "memory"
    }
}

#[derive(Default)]
struct Overlay {
    commitments: HashMap<CommitmentId, Commitment>,
    lots: HashMap<LotId, Lot>,
    relationships: Vec<LotRelationship>,
    allocations: Vec<Allocation>,
}

/// Transaction over [`InMemoryLedger`]. Holds the writer lock until commit or
/// drop.
struct InMemoryTx {
    state: Arc<RwLock<LedgerState>>,
    _writer: OwnedMutexGuard<()>,
    staged: Overlay,
}

impl InMemoryTx {
    fn current_commitment(&self, id: &CommitmentId) -> LedgerResult<Option<Commitment>> {
        if let Some(c) = self.staged.commitments.get(id) {
            return Ok(Some(c.clone()));
        }
        Ok(read_state(&self.state)?.commitments.get(id).cloned())
    }

    fn current_lot(&self, id: &LotId) -> LedgerResult<Option<Lot>> {
        if let Some(l) = self.staged.lots.get(id) {
            return Ok(Some(l.clone()));
        }
        Ok(read_state(&self.state)?.lots.get(id).cloned())
    }

    fn matching_allocations(
        &self,
        predicate: impl Fn(&Allocation) -> bool,
    ) -> LedgerResult<Vec<Allocation>> {
        let guard = read_state(&self.state)?;
        let mut out: Vec<Allocation> = guard
            .allocations
            .iter()
            .chain(self.staged.allocations.iter())
            .filter(|a| predicate(a))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }
}

#[async_trait]
impl GraphSource for InMemoryTx {
    async fn commitment(&mut self, id: &CommitmentId) -> LedgerResult<Option<Commitment>> {
        self.current_commitment(id)
    }

    async fn lot(&mut self, id: &LotId) -> LedgerResult<Option<Lot>> {
        self.current_lot(id)
    }

    async fn allocations_for_demand(
        &mut self,
        id: &CommitmentId,
    ) -> LedgerResult<Vec<Allocation>> {
        self.matching_allocations(|a| a.demand_commitment_id == *id)
    }

    async fn relationships_for_child(&mut self, id: &LotId) -> LedgerResult<Vec<LotRelationship>> {
        let guard = read_state(&self.state)?;
        Ok(guard
            .relationships
            .iter()
            .chain(self.staged.relationships.iter())
            .filter(|r| r.child_lot_id == *id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LedgerTx for InMemoryTx {
    // The writer lock already excludes every other transaction.
    async fn lock_commitment(&mut self, id: &CommitmentId) -> LedgerResult<Option<Commitment>> {
        self.current_commitment(id)
    }

    async fn lock_lot(&mut self, id: &LotId) -> LedgerResult<Option<Lot>> {
        self.current_lot(id)
    }

    async fn allocations_for_plan(&mut self, plan_id: &PlanId) -> LedgerResult<Vec<Allocation>> {
        self.matching_allocations(|a| a.plan_id == *plan_id)
    }

    async fn insert_commitment(&mut self, commitment: &Commitment) -> LedgerResult<()> {
        if self.current_commitment(&commitment.id)?.is_some() {
            return Err(LedgerError::Conflict(format!(
                "commitment {} already exists",
                commitment.id
            )));
        }
        self.staged
            .commitments
            .insert(commitment.id, commitment.clone());
        Ok(())
    }

    async fn update_commitment(&mut self, commitment: &Commitment) -> LedgerResult<()> {
        if self.current_commitment(&commitment.id)?.is_none() {
            return Err(LedgerError::NotFound(commitment.id.to_string()));
        }
        self.staged
            .commitments
            .insert(commitment.id, commitment.clone());
        Ok(())
    }

    async fn insert_lot(&mut self, lot: &Lot) -> LedgerResult<()> {
        if self.current_lot(&lot.id)?.is_some() {
            return Err(LedgerError::Conflict(format!("lot {} already exists", lot.id)));
        }
        self.staged.lots.insert(lot.id, lot.clone());
        Ok(())
    }

    async fn update_lot(&mut self, lot: &Lot) -> LedgerResult<()> {
        if self.current_lot(&lot.id)?.is_none() {
            return Err(LedgerError::NotFound(lot.id.to_string()));
        }
        self.staged.lots.insert(lot.id, lot.clone());
        Ok(())
    }

    async fn insert_relationship(&mut self, relationship: &LotRelationship) -> LedgerResult<()> {
        self.staged.relationships.push(relationship.clone());
        Ok(())
    }

    async fn insert_allocation(&mut self, allocation: &Allocation) -> LedgerResult<()> {
        let duplicate = !self
            .matching_allocations(|a| a.id == allocation.id)?
            .is_empty();
        if duplicate {
            return Err(LedgerError::Conflict(format!(
                "allocation {} already exists",
                allocation.id
            )));
        }
        self.staged.allocations.push(allocation.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> LedgerResult<()> {
        let InMemoryTx {
            state,
            _writer,
            staged,
        } = *self;
        let mut guard = write_state(&state)?;
        debug!(
            commitments = staged.commitments.len(),
            lots = staged.lots.len(),
            relationships = staged.relationships.len(),
            allocations = staged.allocations.len(),
            "committing in-memory transaction"
        );
        guard.commitments.extend(staged.commitments);
        guard.lots.extend(staged.lots);
        guard.relationships.extend(staged.relationships);
        guard.allocations.extend(staged.allocations);
        drop(guard);
        drop(_writer);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use supplynet_types::{ActorId, FulfillmentState, LifecycleStatus, ProductId};

    fn commitment() -> Commitment {
        let now = Utc::now();
        Commitment {
            id: CommitmentId::new(),
            buyer: CompanyId::new("brand"),
            seller: CompanyId::new("trader"),
            product: ProductId::new("cotton"),
            quantity: 100,
            unit: "kg".into(),
            delivery_date: now.date_naive(),
            lifecycle_status: LifecycleStatus::Confirmed,
            fulfillment_state: FulfillmentState::Open,
            fulfilled_quantity: 0,
            parent_commitment_id: None,
            created_by: ActorId::new("ops"),
            updated_by: ActorId::new("ops"),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn committed_writes_become_visible() {
        let ledger = InMemoryLedger::new();
        let c = commitment();

        let mut tx = ledger.begin().await.unwrap();
        tx.insert_commitment(&c).await.unwrap();
        assert!(ledger.get_commitment(&c.id).await.unwrap().is_none());
        assert!(tx.commitment(&c.id).await.unwrap().is_some());
        tx.commit().await.unwrap();

        assert_eq!(ledger.get_commitment(&c.id).await.unwrap(), Some(c));
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let ledger = InMemoryLedger::new();
        let c = commitment();
        {
            let mut tx = ledger.begin().await.unwrap();
            tx.insert_commitment(&c).await.unwrap();
        }
        assert!(ledger.get_commitment(&c.id).await.unwrap().is_none());
        // Writer lock was released by the drop.
        let tx = ledger.begin().await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_insert_conflicts() {
        let ledger = InMemoryLedger::new();
        let c = commitment();
        let mut tx = ledger.begin().await.unwrap();
        tx.insert_commitment(&c).await.unwrap();
        let err = tx.insert_commitment(&c).await.unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_seed() {
        let ledger = InMemoryLedger::new();
        let mut tx = ledger.begin().await.unwrap();
        tx.insert_commitment(&commitment()).await.unwrap();
        tx.insert_commitment(&commitment()).await.unwrap();
        tx.commit().await.unwrap();

        let snapshot = ledger.snapshot().await.unwrap();
        let seeded = InMemoryLedger::from_snapshot(snapshot.clone());
        assert_eq!(seeded.snapshot().await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn open_commitments_exclude_fulfilled() {
        let ledger = InMemoryLedger::new();
        let open = commitment();
        let mut done = commitment();
        done.fulfilled_quantity = 100;
        done.refresh_state();

        let mut tx = ledger.begin().await.unwrap();
        tx.insert_commitment(&open).await.unwrap();
        tx.insert_commitment(&done).await.unwrap();
        tx.commit().await.unwrap();

        let found = ledger
            .open_commitments_for_seller(&CompanyId::new("trader"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, open.id);
    }
}
