use chrono::Utc;
use supplynet_types::{
    ActorId, Commitment, CommitmentId, CompanyId, FulfillmentState, NewCommitment,
};
use tracing::{debug, info};

use crate::traits::{LedgerReader, LedgerTx};
use crate::{LedgerError, LedgerResult};

/// Commitment Ledger operations.
///
/// `fulfillment_state` is never written directly: every counter change goes
/// through [`CommitmentLedger::record_fulfillment`], which re-derives it.
pub struct CommitmentLedger;

impl CommitmentLedger {
    pub async fn create(
        tx: &mut dyn LedgerTx,
        input: NewCommitment,
        actor: &ActorId,
    ) -> LedgerResult<Commitment> {
        if input.quantity <= 0 {
            return Err(LedgerError::InvalidInput(format!(
                "commitment quantity must be positive, got {}",
                input.quantity
            )));
        }
        if input.unit.trim().is_empty() {
            return Err(LedgerError::InvalidInput("commitment unit is empty".into()));
        }
        if input.buyer == input.seller {
            return Err(LedgerError::InvalidInput(format!(
                "buyer and seller are both {}",
                input.buyer
            )));
        }
        if let Some(parent) = &input.parent_commitment_id {
            if tx.commitment(parent).await?.is_none() {
                return Err(LedgerError::NotFound(parent.to_string()));
            }
        }

        let now = Utc::now();
        let commitment = Commitment {
            id: CommitmentId::new(),
            buyer: input.buyer,
            seller: input.seller,
            product: input.product,
            quantity: input.quantity,
            unit: input.unit,
            delivery_date: input.delivery_date,
            lifecycle_status: input.lifecycle_status,
            fulfillment_state: FulfillmentState::Open,
            fulfilled_quantity: 0,
            parent_commitment_id: input.parent_commitment_id,
            created_by: actor.clone(),
            updated_by: actor.clone(),
            created_at: now,
            updated_at: now,
        };
        tx.insert_commitment(&commitment).await?;

        info!(
            commitment_id = %commitment.id,
            buyer = %commitment.buyer,
            seller = %commitment.seller,
            quantity = commitment.quantity,
            "commitment created"
        );
        Ok(commitment)
    }

    /// Add `delta` to the commitment's fulfilled counter and re-derive its
    /// state. Rejects anything that would push the counter past the
    /// requested quantity.
    pub async fn record_fulfillment(
        tx: &mut dyn LedgerTx,
        id: &CommitmentId,
        delta: i64,
        actor: &ActorId,
    ) -> LedgerResult<Commitment> {
        if delta <= 0 {
            return Err(LedgerError::InvalidInput(format!(
                "fulfillment delta must be positive, got {delta}"
            )));
        }
        let mut commitment = tx
            .lock_commitment(id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;

        if !commitment.fulfillment_state.accepts_allocations() {
            return Err(LedgerError::InvalidTransition {
                id: id.to_string(),
                from: commitment.fulfillment_state.label().to_string(),
                to: "fulfilled".to_string(),
            });
        }
        let available = commitment.available();
        if delta > available {
            return Err(LedgerError::InsufficientCapacity {
                commitment: id.to_string(),
                requested: delta,
                available,
            });
        }

        let from = commitment.fulfillment_state;
        commitment.fulfilled_quantity += delta;
        commitment.refresh_state();
        commitment.updated_by = actor.clone();
        commitment.updated_at = Utc::now();
        tx.update_commitment(&commitment).await?;

        debug!(
            commitment_id = %id,
            delta,
            fulfilled = commitment.fulfilled_quantity,
            from = from.label(),
            to = commitment.fulfillment_state.label(),
            "fulfillment recorded"
        );
        Ok(commitment)
    }

    /// `Fulfilled -> Closed`. Every other source state is rejected.
    pub async fn close(
        tx: &mut dyn LedgerTx,
        id: &CommitmentId,
        actor: &ActorId,
    ) -> LedgerResult<Commitment> {
        let mut commitment = tx
            .lock_commitment(id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;

        if commitment.fulfillment_state != FulfillmentState::Fulfilled {
            return Err(LedgerError::InvalidTransition {
                id: id.to_string(),
                from: commitment.fulfillment_state.label().to_string(),
                to: FulfillmentState::Closed.label().to_string(),
            });
        }
        commitment.fulfillment_state = FulfillmentState::Closed;
        commitment.updated_by = actor.clone();
        commitment.updated_at = Utc::now();
        tx.update_commitment(&commitment).await?;

        info!(commitment_id = %id, actor = %actor, "commitment closed");
        Ok(commitment)
    }

    /// Commitments sold by `seller` that still have spare capacity.
    pub async fn spare_capacity(
        reader: &dyn LedgerReader,
        seller: &CompanyId,
    ) -> LedgerResult<Vec<Commitment>> {
        let commitments = reader.open_commitments_for_seller(seller).await?;
        Ok(commitments
            .into_iter()
            .filter(|c| c.available() > 0)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryLedger;
    use crate::traits::LedgerStore;
    use chrono::NaiveDate;
    use supplynet_types::{LifecycleStatus, ProductId};

    fn new_commitment(quantity: i64) -> NewCommitment {
        NewCommitment {
            buyer: CompanyId::new("brand"),
            seller: CompanyId::new("trader"),
            product: ProductId::new("cotton"),
            quantity,
            unit: "kg".into(),
            delivery_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            parent_commitment_id: None,
            lifecycle_status: LifecycleStatus::Confirmed,
        }
    }

    async fn created(ledger: &InMemoryLedger, quantity: i64) -> Commitment {
        let mut tx = ledger.begin().await.unwrap();
        let c = CommitmentLedger::create(tx.as_mut(), new_commitment(quantity), &ActorId::new("ops"))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        c
    }

    #[tokio::test]
    async fn create_starts_open() {
        let ledger = InMemoryLedger::new();
        let c = created(&ledger, 1000).await;
        assert_eq!(c.fulfillment_state, FulfillmentState::Open);
        assert_eq!(c.fulfilled_quantity, 0);
    }

    #[tokio::test]
    async fn create_rejects_non_positive_quantity() {
        let ledger = InMemoryLedger::new();
        let mut tx = ledger.begin().await.unwrap();
        let err = CommitmentLedger::create(tx.as_mut(), new_commitment(0), &ActorId::new("ops"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn create_rejects_unknown_parent() {
        let ledger = InMemoryLedger::new();
        let mut input = new_commitment(10);
        input.parent_commitment_id = Some(CommitmentId::new());
        let mut tx = ledger.begin().await.unwrap();
        let err = CommitmentLedger::create(tx.as_mut(), input, &ActorId::new("ops"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[tokio::test]
    async fn fulfillment_walks_states() {
        let ledger = InMemoryLedger::new();
        let c = created(&ledger, 1000).await;

        let mut tx = ledger.begin().await.unwrap();
        let partial = CommitmentLedger::record_fulfillment(tx.as_mut(), &c.id, 300, &ActorId::new("ops"))
            .await
            .unwrap();
        assert_eq!(partial.fulfillment_state, FulfillmentState::PartiallyFulfilled);
        let full = CommitmentLedger::record_fulfillment(tx.as_mut(), &c.id, 700, &ActorId::new("ops"))
            .await
            .unwrap();
        assert_eq!(full.fulfillment_state, FulfillmentState::Fulfilled);
        tx.commit().await.unwrap();

        let mut tx = ledger.begin().await.unwrap();
        let err = CommitmentLedger::record_fulfillment(tx.as_mut(), &c.id, 1, &ActorId::new("ops"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn fulfillment_never_exceeds_requested() {
        let ledger = InMemoryLedger::new();
        let c = created(&ledger, 100).await;
        let mut tx = ledger.begin().await.unwrap();
        let err = CommitmentLedger::record_fulfillment(tx.as_mut(), &c.id, 101, &ActorId::new("ops"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientCapacity {
                requested: 101,
                available: 100,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn close_requires_fulfilled() {
        let ledger = InMemoryLedger::new();
        let c = created(&ledger, 50).await;
        let closer = ActorId::new("closer");

        let mut tx = ledger.begin().await.unwrap();
        let err = CommitmentLedger::close(tx.as_mut(), &c.id, &closer).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));

        CommitmentLedger::record_fulfillment(tx.as_mut(), &c.id, 50, &ActorId::new("ops"))
            .await
            .unwrap();
        let closed = CommitmentLedger::close(tx.as_mut(), &c.id, &closer).await.unwrap();
        assert_eq!(closed.fulfillment_state, FulfillmentState::Closed);
        assert_eq!(closed.created_by, ActorId::new("ops"));
        assert_eq!(closed.updated_by, closer);

        let err = CommitmentLedger::close(tx.as_mut(), &c.id, &closer).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn spare_capacity_skips_exhausted() {
        let ledger = InMemoryLedger::new();
        let open = created(&ledger, 500).await;
        let used = created(&ledger, 200).await;
        let mut tx = ledger.begin().await.unwrap();
        CommitmentLedger::record_fulfillment(tx.as_mut(), &used.id, 200, &ActorId::new("ops"))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let spare = CommitmentLedger::spare_capacity(&ledger, &CompanyId::new("trader"))
            .await
            .unwrap();
        assert_eq!(spare.len(), 1);
        assert_eq!(spare[0].id, open.id);
    }
}
