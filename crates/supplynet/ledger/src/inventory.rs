use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use supplynet_types::{
    ActorId, CommitmentId, CompanyId, Lot, LotId, LotOrigin, LotRelationship, LotStatus, NewLot,
    RelationshipId, RelationshipKind,
};
use tracing::{debug, info};

use crate::traits::{LedgerReader, LedgerTx};
use crate::{LedgerError, LedgerResult};

/// Lot received against a commitment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeliveryLot {
    pub quantity: i64,
    pub unit: String,
    pub production_date: NaiveDate,
    pub transparency_score: f64,
}

/// Inventory Ledger operations.
pub struct InventoryLedger;

impl InventoryLedger {
    /// Record a produced lot. Lots with `inputs` consume the contributed
    /// quantity from each parent and get one relationship edge per input.
    pub async fn record_lot(
        tx: &mut dyn LedgerTx,
        input: NewLot,
        actor: &ActorId,
    ) -> LedgerResult<Lot> {
        validate_quantity(input.quantity, &input.unit)?;
        validate_score(input.transparency_score)?;

        let mut balanced = 0i64;
        let mut needs_balance = false;
        for lot_input in &input.inputs {
            if lot_input.quantity <= 0 {
                return Err(LedgerError::InvalidInput(format!(
                    "input from {} must contribute a positive quantity",
                    lot_input.parent_lot_id
                )));
            }
            if lot_input.kind.requires_input_balance() {
                needs_balance = true;
                balanced = balanced.checked_add(lot_input.quantity).ok_or_else(|| {
                    LedgerError::InvalidInput("input quantities overflow".into())
                })?;
            }
        }
        if needs_balance && input.input_quantity != Some(balanced) {
            return Err(LedgerError::InvalidInput(format!(
                "merge/transformation inputs contribute {balanced}, declared input is {:?}",
                input.input_quantity
            )));
        }

        let now = Utc::now();
        let origin = if input.inputs.is_empty() {
            LotOrigin::Produced
        } else {
            LotOrigin::Derived
        };
        let lot = Lot {
            id: LotId::new(),
            owner: input.owner,
            product: input.product,
            quantity: input.quantity,
            quantity_claimed: 0,
            unit: input.unit,
            production_date: input.production_date,
            transparency_score: input.transparency_score,
            input_quantity: input.input_quantity,
            origin,
            status: LotStatus::Active,
            created_by: actor.clone(),
            updated_by: actor.clone(),
            created_at: now,
            updated_at: now,
        };
        tx.insert_lot(&lot).await?;

        for lot_input in input.inputs {
            Self::claim(tx, &lot_input.parent_lot_id, lot_input.quantity, actor).await?;
            let relationship = LotRelationship {
                id: RelationshipId::new(),
                parent_lot_id: lot_input.parent_lot_id,
                child_lot_id: lot.id,
                kind: lot_input.kind,
                quantity: lot_input.quantity,
                yield_percentage: lot_input.yield_percentage,
                quality_impact: lot_input.quality_impact,
                created_by: actor.clone(),
                created_at: now,
            };
            tx.insert_relationship(&relationship).await?;
        }

        info!(
            lot_id = %lot.id,
            owner = %lot.owner,
            quantity = lot.quantity,
            origin = ?lot.origin,
            "lot recorded"
        );
        Ok(lot)
    }

    /// Record the lot the buyer receives against `commitment_id`.
    pub async fn record_delivery(
        tx: &mut dyn LedgerTx,
        commitment_id: &CommitmentId,
        delivery: DeliveryLot,
        actor: &ActorId,
    ) -> LedgerResult<Lot> {
        validate_quantity(delivery.quantity, &delivery.unit)?;
        validate_score(delivery.transparency_score)?;

        let commitment = tx
            .commitment(commitment_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(commitment_id.to_string()))?;
        if delivery.quantity > commitment.quantity {
            return Err(LedgerError::InvalidInput(format!(
                "delivery of {} exceeds commitment {} quantity {}",
                delivery.quantity, commitment_id, commitment.quantity
            )));
        }

        let now = Utc::now();
        let lot = Lot {
            id: LotId::new(),
            owner: commitment.buyer,
            product: commitment.product,
            quantity: delivery.quantity,
            quantity_claimed: 0,
            unit: delivery.unit,
            production_date: delivery.production_date,
            transparency_score: delivery.transparency_score,
            input_quantity: None,
            origin: LotOrigin::Delivered {
                commitment_id: *commitment_id,
            },
            status: LotStatus::Active,
            created_by: actor.clone(),
            updated_by: actor.clone(),
            created_at: now,
            updated_at: now,
        };
        tx.insert_lot(&lot).await?;

        info!(lot_id = %lot.id, commitment_id = %commitment_id, "delivery lot recorded");
        Ok(lot)
    }

    /// Claim `quantity` of a lot's available stock.
    pub async fn claim(
        tx: &mut dyn LedgerTx,
        lot_id: &LotId,
        quantity: i64,
        actor: &ActorId,
    ) -> LedgerResult<Lot> {
        if quantity <= 0 {
            return Err(LedgerError::InvalidInput(format!(
                "claim quantity must be positive, got {quantity}"
            )));
        }
        let mut lot = tx
            .lock_lot(lot_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(lot_id.to_string()))?;

        let available = if lot.status == LotStatus::Active {
            lot.available()
        } else {
            0
        };
        if quantity > available {
            return Err(LedgerError::InsufficientInventory {
                lot: lot_id.to_string(),
                requested: quantity,
                available,
            });
        }

        lot.quantity_claimed += quantity;
        lot.refresh_status();
        lot.updated_by = actor.clone();
        lot.updated_at = Utc::now();
        tx.update_lot(&lot).await?;

        debug!(
            lot_id = %lot_id,
            quantity,
            claimed = lot.quantity_claimed,
            status = lot.status.label(),
            "lot claimed"
        );
        Ok(lot)
    }

    /// Add a relationship edge to an existing child lot and consume the
    /// contribution from the parent. Callers check acyclicity first.
    pub async fn link_lots(
        tx: &mut dyn LedgerTx,
        parent_lot_id: &LotId,
        child_lot_id: &LotId,
        kind: RelationshipKind,
        quantity: i64,
        actor: &ActorId,
    ) -> LedgerResult<LotRelationship> {
        if parent_lot_id == child_lot_id {
            return Err(LedgerError::InvalidInput(format!(
                "lot {parent_lot_id} cannot be its own parent"
            )));
        }
        let mut child = tx
            .lock_lot(child_lot_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(child_lot_id.to_string()))?;
        if matches!(child.origin, LotOrigin::Delivered { .. }) {
            return Err(LedgerError::InvalidInput(format!(
                "lot {child_lot_id} was delivered against a commitment and cannot take parents"
            )));
        }

        let input_quantity = if kind.requires_input_balance() {
            let total = child
                .input_quantity
                .unwrap_or(0)
                .checked_add(quantity)
                .ok_or_else(|| {
                    LedgerError::InvalidInput(format!("input quantity of {child_lot_id} overflows"))
                })?;
            Some(total)
        } else {
            child.input_quantity
        };

        Self::claim(tx, parent_lot_id, quantity, actor).await?;

        child.origin = LotOrigin::Derived;
        child.input_quantity = input_quantity;
        child.updated_by = actor.clone();
        child.updated_at = Utc::now();
        tx.update_lot(&child).await?;

        let relationship = LotRelationship {
            id: RelationshipId::new(),
            parent_lot_id: *parent_lot_id,
            child_lot_id: *child_lot_id,
            kind,
            quantity,
            yield_percentage: None,
            quality_impact: None,
            created_by: actor.clone(),
            created_at: Utc::now(),
        };
        tx.insert_relationship(&relationship).await?;

        info!(
            parent = %parent_lot_id,
            child = %child_lot_id,
            kind = kind.label(),
            quantity,
            "lots linked"
        );
        Ok(relationship)
    }

    /// Active lots owned by `owner` with stock left to allocate.
    pub async fn spare_capacity(
        reader: &dyn LedgerReader,
        owner: &CompanyId,
    ) -> LedgerResult<Vec<Lot>> {
        let lots = reader.active_lots_for_owner(owner).await?;
        Ok(lots.into_iter().filter(Lot::is_allocatable).collect())
    }
}

fn validate_quantity(quantity: i64, unit: &str) -> LedgerResult<()> {
    if quantity <= 0 {
        return Err(LedgerError::InvalidInput(format!(
            "lot quantity must be positive, got {quantity}"
        )));
    }
    if unit.trim().is_empty() {
        return Err(LedgerError::InvalidInput("lot unit is empty".into()));
    }
    Ok(())
}

fn validate_score(score: f64) -> LedgerResult<()> {
    if !(0.0..=100.0).contains(&score) {
        return Err(LedgerError::InvalidInput(format!(
            "transparency score {score} outside [0, 100]"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryLedger;
    use crate::traits::LedgerStore;
    use supplynet_types::{LotInput, ProductId};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 15).unwrap()
    }

    fn new_lot(quantity: i64) -> NewLot {
        NewLot {
            owner: CompanyId::new("grower"),
            product: ProductId::new("cotton"),
            quantity,
            unit: "kg".into(),
            production_date: date(),
            transparency_score: 80.0,
            input_quantity: None,
            inputs: Vec::new(),
        }
    }

    async fn recorded(ledger: &InMemoryLedger, input: NewLot) -> LedgerResult<Lot> {
        let mut tx = ledger.begin().await?;
        let lot = InventoryLedger::record_lot(tx.as_mut(), input, &ActorId::new("ops")).await?;
        tx.commit().await?;
        Ok(lot)
    }

    #[tokio::test]
    async fn claim_decrements_available() {
        let ledger = InMemoryLedger::new();
        let lot = recorded(&ledger, new_lot(200)).await.unwrap();

        let picker = ActorId::new("picker");

        let mut tx = ledger.begin().await.unwrap();
        let claimed = InventoryLedger::claim(tx.as_mut(), &lot.id, 150, &picker).await.unwrap();
        assert_eq!(claimed.available(), 50);
        assert_eq!(claimed.created_by, ActorId::new("ops"));
        assert_eq!(claimed.updated_by, picker);

        let err = InventoryLedger::claim(tx.as_mut(), &lot.id, 51, &picker).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientInventory {
                requested: 51,
                available: 50,
                ..
            }
        ));

        let last = InventoryLedger::claim(tx.as_mut(), &lot.id, 50, &picker).await.unwrap();
        assert_eq!(last.status, LotStatus::Exhausted);
    }

    #[tokio::test]
    async fn merge_requires_balanced_inputs() {
        let ledger = InMemoryLedger::new();
        let a = recorded(&ledger, new_lot(100)).await.unwrap();
        let b = recorded(&ledger, new_lot(100)).await.unwrap();

        let mut merged = new_lot(180);
        merged.input_quantity = Some(150);
        merged.inputs = vec![
            LotInput {
                parent_lot_id: a.id,
                kind: RelationshipKind::Merge,
                quantity: 100,
                yield_percentage: None,
                quality_impact: None,
            },
            LotInput {
                parent_lot_id: b.id,
                kind: RelationshipKind::Merge,
                quantity: 60,
                yield_percentage: None,
                quality_impact: None,
            },
        ];
        let err = recorded(&ledger, merged.clone()).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));

        merged.input_quantity = Some(160);
        let child = recorded(&ledger, merged).await.unwrap();
        assert_eq!(child.origin, LotOrigin::Derived);
        assert_eq!(ledger.get_lot(&a.id).await.unwrap().unwrap().available(), 0);
        assert_eq!(ledger.get_lot(&b.id).await.unwrap().unwrap().available(), 40);
        assert_eq!(ledger.relationships_for_child(&child.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn over_contributing_input_rolls_back() {
        let ledger = InMemoryLedger::new();
        let parent = recorded(&ledger, new_lot(50)).await.unwrap();
        let before = ledger.snapshot().await.unwrap();

        let mut split = new_lot(80);
        split.inputs = vec![LotInput {
            parent_lot_id: parent.id,
            kind: RelationshipKind::Split,
            quantity: 80,
            yield_percentage: None,
            quality_impact: None,
        }];
        let err = recorded(&ledger, split).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientInventory { .. }));
        assert_eq!(ledger.snapshot().await.unwrap(), before);
    }

    #[tokio::test]
    async fn score_must_be_in_range() {
        let ledger = InMemoryLedger::new();
        let mut input = new_lot(10);
        input.transparency_score = 120.0;
        let err = recorded(&ledger, input).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn link_lots_turns_child_derived() {
        let ledger = InMemoryLedger::new();
        let parent = recorded(&ledger, new_lot(100)).await.unwrap();
        let child = recorded(&ledger, new_lot(90)).await.unwrap();
        assert!(child.is_origin());

        let mut tx = ledger.begin().await.unwrap();
        InventoryLedger::link_lots(
            tx.as_mut(),
            &parent.id,
            &child.id,
            RelationshipKind::Transformation,
            100,
            &ActorId::new("spinner"),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let child = ledger.get_lot(&child.id).await.unwrap().unwrap();
        assert_eq!(child.origin, LotOrigin::Derived);
        assert_eq!(child.input_quantity, Some(100));
        assert_eq!(child.updated_by, ActorId::new("spinner"));
        let parent = ledger.get_lot(&parent.id).await.unwrap().unwrap();
        assert_eq!(parent.updated_by, ActorId::new("spinner"));
    }

    #[tokio::test]
    async fn link_lots_rejects_input_overflow() {
        let ledger = InMemoryLedger::new();
        let parent = recorded(&ledger, new_lot(100)).await.unwrap();
        let mut saturated = new_lot(90);
        saturated.input_quantity = Some(i64::MAX);
        let child = recorded(&ledger, saturated).await.unwrap();
        let before = ledger.snapshot().await.unwrap();

        let mut tx = ledger.begin().await.unwrap();
        let err = InventoryLedger::link_lots(
            tx.as_mut(),
            &parent.id,
            &child.id,
            RelationshipKind::Merge,
            10,
            &ActorId::new("ops"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
        drop(tx);
        assert_eq!(ledger.snapshot().await.unwrap(), before);
    }

    #[tokio::test]
    async fn spare_capacity_lists_allocatable_lots() {
        let ledger = InMemoryLedger::new();
        let keep = recorded(&ledger, new_lot(10)).await.unwrap();
        let drained = recorded(&ledger, new_lot(5)).await.unwrap();
        let mut tx = ledger.begin().await.unwrap();
        InventoryLedger::claim(tx.as_mut(), &drained.id, 5, &ActorId::new("ops")).await.unwrap();
        tx.commit().await.unwrap();

        let spare = InventoryLedger::spare_capacity(&ledger, &CompanyId::new("grower"))
            .await
            .unwrap();
        assert_eq!(spare.iter().map(|l| l.id).collect::<Vec<_>>(), vec![keep.id]);
    }
}
