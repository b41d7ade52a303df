use chrono::Utc;
use supplynet_types::{
    ActorId, Allocation, AllocationId, AllocationSource, CommitmentId, PlanId, ReasonCode,
};
use tracing::debug;

use crate::traits::LedgerTx;
use crate::{LedgerError, LedgerResult};

/// Allocation Ledger operations. Append-only: rows are never updated or
/// removed.
pub struct AllocationLedger;

impl AllocationLedger {
    /// Append one allocation row. Counter updates on either side are the
    /// caller's job and must happen in the same transaction.
    #[allow(clippy::too_many_arguments)]
    pub async fn append(
        tx: &mut dyn LedgerTx,
        plan_id: PlanId,
        demand_commitment_id: CommitmentId,
        source: AllocationSource,
        quantity: i64,
        unit: &str,
        actor: &ActorId,
    ) -> LedgerResult<Allocation> {
        if quantity <= 0 {
            return Err(LedgerError::InvalidInput(format!(
                "allocation quantity must be positive, got {quantity}"
            )));
        }
        if source.commitment_id() == Some(&demand_commitment_id) {
            return Err(LedgerError::InvalidInput(format!(
                "commitment {demand_commitment_id} cannot allocate from itself"
            )));
        }

        let allocation = Allocation {
            id: AllocationId::new(),
            plan_id,
            demand_commitment_id,
            reason: ReasonCode::from(source.kind()),
            source,
            quantity,
            unit: unit.to_string(),
            created_by: actor.clone(),
            created_at: Utc::now(),
        };
        tx.insert_allocation(&allocation).await?;

        debug!(
            allocation_id = %allocation.id,
            plan_id = %plan_id,
            demand = %demand_commitment_id,
            source = allocation.source.kind().label(),
            quantity,
            "allocation appended"
        );
        Ok(allocation)
    }

    /// Commitments whose `fulfilled_quantity` an allocation counts toward:
    /// always the demand, plus the source when it draws on existing slack.
    /// Chain children start at zero and are fulfilled on their own.
    pub fn counted_commitments(allocation: &Allocation) -> Vec<CommitmentId> {
        match &allocation.source {
            AllocationSource::Commitment { commitment_id } => {
                vec![allocation.demand_commitment_id, *commitment_id]
            }
            AllocationSource::Inventory { .. } | AllocationSource::Chain { .. } => {
                vec![allocation.demand_commitment_id]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryLedger;
    use crate::traits::{GraphSource, LedgerStore};
    use supplynet_types::LotId;

    #[tokio::test]
    async fn append_records_reason_from_source() {
        let ledger = InMemoryLedger::new();
        let demand = CommitmentId::new();
        let mut tx = ledger.begin().await.unwrap();
        let allocation = AllocationLedger::append(
            tx.as_mut(),
            PlanId::new(),
            demand,
            AllocationSource::Inventory {
                lot_id: LotId::new(),
            },
            150,
            "kg",
            &ActorId::new("ops"),
        )
        .await
        .unwrap();
        assert_eq!(allocation.reason, ReasonCode::StockShipment);
        assert_eq!(tx.allocations_for_demand(&demand).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn self_allocation_is_rejected() {
        let ledger = InMemoryLedger::new();
        let demand = CommitmentId::new();
        let mut tx = ledger.begin().await.unwrap();
        let err = AllocationLedger::append(
            tx.as_mut(),
            PlanId::new(),
            demand,
            AllocationSource::Commitment {
                commitment_id: demand,
            },
            10,
            "kg",
            &ActorId::new("ops"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
    }

    #[test]
    fn chain_source_counts_only_the_demand() {
        let demand = CommitmentId::new();
        let child = CommitmentId::new();
        let allocation = Allocation {
            id: AllocationId::new(),
            plan_id: PlanId::new(),
            demand_commitment_id: demand,
            source: AllocationSource::Chain {
                commitment_id: child,
            },
            quantity: 150,
            unit: "kg".into(),
            reason: ReasonCode::ChainedSupply,
            created_by: ActorId::new("ops"),
            created_at: Utc::now(),
        };
        assert_eq!(AllocationLedger::counted_commitments(&allocation), vec![demand]);
    }
}
