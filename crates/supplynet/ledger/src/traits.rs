use async_trait::async_trait;
use supplynet_types::{
    Allocation, Commitment, CommitmentId, CompanyId, Lot, LotId, LotRelationship, PlanId,
};

use crate::snapshot::LedgerSnapshot;
use crate::LedgerResult;

/// Read access needed to walk the demand/supply graph.
///
/// Implemented by transactions (reads see the transaction's own staged
/// writes) and by [`ReadView`] over a plain reader.
#[async_trait]
pub trait GraphSource: Send {
    async fn commitment(&mut self, id: &CommitmentId) -> LedgerResult<Option<Commitment>>;

    async fn lot(&mut self, id: &LotId) -> LedgerResult<Option<Lot>>;

    /// Allocations where `id` is the demand side.
    async fn allocations_for_demand(&mut self, id: &CommitmentId)
        -> LedgerResult<Vec<Allocation>>;

    /// Relationship edges whose child is `id` (its parents).
    async fn relationships_for_child(&mut self, id: &LotId) -> LedgerResult<Vec<LotRelationship>>;
}

/// One serializable unit of ledger work.
///
/// `lock_*` re-read a record and hold it against concurrent writers until the
/// transaction ends. Dropping the transaction without `commit` rolls back.
#[async_trait]
pub trait LedgerTx: GraphSource {
    async fn lock_commitment(&mut self, id: &CommitmentId) -> LedgerResult<Option<Commitment>>;

    async fn lock_lot(&mut self, id: &LotId) -> LedgerResult<Option<Lot>>;

    async fn allocations_for_plan(&mut self, plan_id: &PlanId) -> LedgerResult<Vec<Allocation>>;

    async fn insert_commitment(&mut self, commitment: &Commitment) -> LedgerResult<()>;

    /// Write back counters, state and status of an existing commitment.
    async fn update_commitment(&mut self, commitment: &Commitment) -> LedgerResult<()>;

    async fn insert_lot(&mut self, lot: &Lot) -> LedgerResult<()>;

    async fn update_lot(&mut self, lot: &Lot) -> LedgerResult<()>;

    async fn insert_relationship(&mut self, relationship: &LotRelationship) -> LedgerResult<()>;

    async fn insert_allocation(&mut self, allocation: &Allocation) -> LedgerResult<()>;

    async fn commit(self: Box<Self>) -> LedgerResult<()>;
}

/// Non-transactional reads. May observe a slightly stale view; used by the
/// tracer and option queries, never by allocation admission.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    async fn get_commitment(&self, id: &CommitmentId) -> LedgerResult<Option<Commitment>>;

    async fn get_lot(&self, id: &LotId) -> LedgerResult<Option<Lot>>;

    async fn allocations_for_demand(&self, id: &CommitmentId) -> LedgerResult<Vec<Allocation>>;

    async fn relationships_for_child(&self, id: &LotId) -> LedgerResult<Vec<LotRelationship>>;

    /// Lots received against `commitment_id`.
    async fn lots_delivered_for(&self, commitment_id: &CommitmentId) -> LedgerResult<Vec<Lot>>;

    /// Commitments where `seller` is the seller and the state still accepts
    /// allocations.
    async fn open_commitments_for_seller(&self, seller: &CompanyId)
        -> LedgerResult<Vec<Commitment>>;

    /// Active lots owned by `owner`.
    async fn active_lots_for_owner(&self, owner: &CompanyId) -> LedgerResult<Vec<Lot>>;

    /// Full, deterministically ordered copy of every table.
    async fn snapshot(&self) -> LedgerResult<LedgerSnapshot>;
}

/// A ledger backend: reads plus transactions.
#[async_trait]
pub trait LedgerStore: LedgerReader {
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTx>>;

    fn backend_label(&self) -> &'static str;
}

/// Adapts a [`LedgerReader`] to [`GraphSource`] for read-only walks.
pub struct ReadView<'a> {
    reader: &'a dyn LedgerReader,
}

impl<'a> ReadView<'a> {
    pub fn new(reader: &'a dyn LedgerReader) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl<'a> GraphSource for ReadView<'a> {
    async fn commitment(&mut self, id: &CommitmentId) -> LedgerResult<Option<Commitment>> {
        self.reader.get_commitment(id).await
    }

    async fn lot(&mut self, id: &LotId) -> LedgerResult<Option<Lot>> {
        self.reader.get_lot(id).await
    }

    async fn allocations_for_demand(
        &mut self,
        id: &CommitmentId,
    ) -> LedgerResult<Vec<Allocation>> {
        self.reader.allocations_for_demand(id).await
    }

    async fn relationships_for_child(&mut self, id: &LotId) -> LedgerResult<Vec<LotRelationship>> {
        self.reader.relationships_for_child(id).await
    }
}
