//! Fulfillment Planner.
//!
//! A plan is applied as one ledger transaction: every request is admitted
//! by the validator first, and only then are rows written and counters
//! moved. Any failure drops the transaction, so a rejected plan leaves no
//! trace. The demand's state is derived once, after the whole plan.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use supplynet_ledger::{
    AllocationLedger, CommitmentLedger, InventoryLedger, LedgerStore, LedgerTx,
};
use supplynet_types::{
    ActorId, Allocation, AllocationRequest, AllocationSource, Commitment, FulfillmentPlan,
    FulfillmentState, NewCommitment,
};
use tracing::{info, warn};

use crate::error::{FulfillmentError, FulfillmentResult};
use crate::retry::RetryPolicy;
use crate::validator::{GraphValidator, PendingClaims};

/// Result of a committed plan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanOutcome {
    pub plan_id: supplynet_types::PlanId,
    pub commitment_id: supplynet_types::CommitmentId,
    pub allocated_total: i64,
    pub new_fulfillment_state: FulfillmentState,
    pub allocations: Vec<Allocation>,
    /// Child commitments spawned by chain requests
    pub chained_commitments: Vec<Commitment>,
    /// True when the plan had already committed and this is its record
    pub replayed: bool,
}

#[derive(Clone)]
pub struct FulfillmentPlanner {
    validator: GraphValidator,
    retry: RetryPolicy,
}

impl FulfillmentPlanner {
    pub fn new(validator: GraphValidator, retry: RetryPolicy) -> Self {
        Self { validator, retry }
    }

    /// Apply `plan` all-or-nothing, retrying ledger contention with backoff,
    /// within `timeout`. On timeout nothing has been applied unless the
    /// plan committed right at the deadline; resubmitting the same plan id
    /// then returns the committed outcome.
    pub async fn submit(
        &self,
        store: &dyn LedgerStore,
        plan: &FulfillmentPlan,
        actor: &ActorId,
        timeout: Duration,
    ) -> FulfillmentResult<PlanOutcome> {
        let attempt = self
            .retry
            .run("submit_plan", || self.attempt(store, plan, actor));

        match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(err)) => {
                warn!(
                    plan_id = %plan.plan_id,
                    commitment_id = %plan.commitment_id,
                    error = %err,
                    "fulfillment plan rejected"
                );
                Err(err)
            }
            Err(_) => {
                let timeout_ms = timeout.as_millis().min(u128::from(u64::MAX)) as u64;
                warn!(plan_id = %plan.plan_id, timeout_ms, "fulfillment plan timed out");
                Err(FulfillmentError::Timeout { timeout_ms })
            }
        }
    }

    async fn attempt(
        &self,
        store: &dyn LedgerStore,
        plan: &FulfillmentPlan,
        actor: &ActorId,
    ) -> FulfillmentResult<PlanOutcome> {
        let mut tx = store.begin().await?;

        let recorded = tx.allocations_for_plan(&plan.plan_id).await?;
        if !recorded.is_empty() {
            return replay(tx.as_mut(), plan, recorded).await;
        }

        let demand = tx
            .lock_commitment(&plan.commitment_id)
            .await?
            .ok_or_else(|| FulfillmentError::NotFound(plan.commitment_id.to_string()))?;
        if !demand.fulfillment_state.accepts_allocations() {
            return Err(FulfillmentError::InvalidTransition {
                id: demand.id.to_string(),
                from: demand.fulfillment_state.label().to_string(),
                to: FulfillmentState::PartiallyFulfilled.label().to_string(),
            });
        }

        if plan.requests.is_empty() {
            return Err(FulfillmentError::InvalidPlan("plan has no requests".into()));
        }
        for (index, request) in plan.requests.iter().enumerate() {
            if request.quantity() <= 0 {
                return Err(FulfillmentError::rejected_at(
                    index,
                    FulfillmentError::InvalidPlan(format!(
                        "quantity must be positive, got {}",
                        request.quantity()
                    )),
                ));
            }
        }
        let total = plan
            .total()
            .ok_or_else(|| FulfillmentError::InvalidPlan("plan total overflows".into()))?;
        let shortfall = demand.available();
        if total > shortfall {
            return Err(FulfillmentError::ExceedsShortfall {
                commitment: demand.id.to_string(),
                requested: total,
                shortfall,
            });
        }

        // Admission: nothing is written until every request passes.
        let mut pending = PendingClaims::default();
        for (index, request) in plan.requests.iter().enumerate() {
            self.validator
                .admit(tx.as_mut(), &demand, request, &mut pending)
                .await
                .map_err(|err| FulfillmentError::rejected_at(index, err))?;
        }

        let mut allocations = Vec::with_capacity(plan.requests.len());
        let mut chained_commitments = Vec::new();
        for request in &plan.requests {
            let (allocation, chained) = apply(tx.as_mut(), plan, &demand, request, actor).await?;
            allocations.push(allocation);
            chained_commitments.extend(chained);
        }
        let demand = CommitmentLedger::record_fulfillment(tx.as_mut(), &demand.id, total, actor).await?;

        tx.commit().await?;

        info!(
            plan_id = %plan.plan_id,
            commitment_id = %demand.id,
            allocated = total,
            requests = plan.requests.len(),
            state = demand.fulfillment_state.label(),
            "fulfillment plan committed"
        );
        Ok(PlanOutcome {
            plan_id: plan.plan_id,
            commitment_id: demand.id,
            allocated_total: total,
            new_fulfillment_state: demand.fulfillment_state,
            allocations,
            chained_commitments,
            replayed: false,
        })
    }
}

async fn apply(
    tx: &mut dyn LedgerTx,
    plan: &FulfillmentPlan,
    demand: &Commitment,
    request: &AllocationRequest,
    actor: &ActorId,
) -> FulfillmentResult<(Allocation, Option<Commitment>)> {
    match request {
        AllocationRequest::FromCommitment {
            source_commitment_id,
            quantity,
        } => {
            CommitmentLedger::record_fulfillment(tx, source_commitment_id, *quantity, actor).await?;
            let allocation = AllocationLedger::append(
                tx,
                plan.plan_id,
                demand.id,
                AllocationSource::Commitment {
                    commitment_id: *source_commitment_id,
                },
                *quantity,
                &demand.unit,
                actor,
            )
            .await?;
            Ok((allocation, None))
        }
        AllocationRequest::FromInventory {
            source_lot_id,
            quantity,
        } => {
            InventoryLedger::claim(tx, source_lot_id, *quantity, actor).await?;
            let allocation = AllocationLedger::append(
                tx,
                plan.plan_id,
                demand.id,
                AllocationSource::Inventory {
                    lot_id: *source_lot_id,
                },
                *quantity,
                &demand.unit,
                actor,
            )
            .await?;
            Ok((allocation, None))
        }
        AllocationRequest::FromNewChain {
            supplier_company_id,
            quantity,
        } => {
            let child = CommitmentLedger::create(
                tx,
                NewCommitment {
                    buyer: demand.seller.clone(),
                    seller: supplier_company_id.clone(),
                    product: demand.product.clone(),
                    quantity: *quantity,
                    unit: demand.unit.clone(),
                    delivery_date: demand.delivery_date,
                    parent_commitment_id: Some(demand.id),
                    lifecycle_status: Default::default(),
                },
                actor,
            )
            .await?;
            let allocation = AllocationLedger::append(
                tx,
                plan.plan_id,
                demand.id,
                AllocationSource::Chain {
                    commitment_id: child.id,
                },
                *quantity,
                &demand.unit,
                actor,
            )
            .await?;
            Ok((allocation, Some(child)))
        }
    }
}

/// Rebuild the outcome of a plan id that already committed.
async fn replay(
    tx: &mut dyn LedgerTx,
    plan: &FulfillmentPlan,
    allocations: Vec<Allocation>,
) -> FulfillmentResult<PlanOutcome> {
    if allocations
        .iter()
        .any(|a| a.demand_commitment_id != plan.commitment_id)
    {
        return Err(FulfillmentError::InvalidPlan(format!(
            "plan id {} was already used for another commitment",
            plan.plan_id
        )));
    }
    let demand = tx
        .commitment(&plan.commitment_id)
        .await?
        .ok_or_else(|| FulfillmentError::NotFound(plan.commitment_id.to_string()))?;

    let mut chained_commitments = Vec::new();
    for allocation in &allocations {
        if let AllocationSource::Chain { commitment_id } = &allocation.source {
            if let Some(child) = tx.commitment(commitment_id).await? {
                chained_commitments.push(child);
            }
        }
    }

    info!(plan_id = %plan.plan_id, "fulfillment plan already committed, replaying outcome");
    Ok(PlanOutcome {
        plan_id: plan.plan_id,
        commitment_id: demand.id,
        allocated_total: allocations.iter().map(|a| a.quantity).sum(),
        new_fulfillment_state: demand.fulfillment_state,
        allocations,
        chained_commitments,
        replayed: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use chrono::NaiveDate;
    use supplynet_ledger::{InMemoryLedger, LedgerReader};
    use supplynet_types::{CompanyId, LotId, NewLot, ProductId};

    fn planner() -> FulfillmentPlanner {
        FulfillmentPlanner::new(GraphValidator::new(64), RetryPolicy::new(RetryConfig::default()))
    }

    fn actor() -> ActorId {
        ActorId::new("planner-test")
    }

    async fn commitment(ledger: &InMemoryLedger, buyer: &str, seller: &str, quantity: i64) -> Commitment {
        let mut tx = ledger.begin().await.unwrap();
        let c = CommitmentLedger::create(
            tx.as_mut(),
            NewCommitment {
                buyer: CompanyId::new(buyer),
                seller: CompanyId::new(seller),
                product: ProductId::new("cotton"),
                quantity,
                unit: "kg".into(),
                delivery_date: NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
                parent_commitment_id: None,
                lifecycle_status: Default::default(),
            },
            &actor(),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
        c
    }

    async fn lot(ledger: &InMemoryLedger, quantity: i64) -> LotId {
        let mut tx = ledger.begin().await.unwrap();
        let lot = InventoryLedger::record_lot(
            tx.as_mut(),
            NewLot {
                owner: CompanyId::new("trader"),
                product: ProductId::new("cotton"),
                quantity,
                unit: "kg".into(),
                production_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                transparency_score: 75.0,
                input_quantity: None,
                inputs: vec![],
            },
            &actor(),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
        lot.id
    }

    #[tokio::test]
    async fn resubmitting_a_plan_replays_its_outcome() {
        let ledger = InMemoryLedger::new();
        let demand = commitment(&ledger, "brand", "trader", 100).await;
        let stock = lot(&ledger, 100).await;
        let plan = FulfillmentPlan::new(
            demand.id,
            vec![AllocationRequest::from_inventory(stock, 60)],
        );

        let first = planner()
            .submit(&ledger, &plan, &actor(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!first.replayed);

        let second = planner()
            .submit(&ledger, &plan, &actor(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(second.replayed);
        assert_eq!(second.allocations, first.allocations);
        assert_eq!(
            ledger.get_commitment(&demand.id).await.unwrap().unwrap().fulfilled_quantity,
            60
        );
    }

    #[tokio::test]
    async fn plan_exceeding_shortfall_is_rejected() {
        let ledger = InMemoryLedger::new();
        let demand = commitment(&ledger, "brand", "trader", 100).await;
        let stock = lot(&ledger, 500).await;
        let plan = FulfillmentPlan::new(
            demand.id,
            vec![AllocationRequest::from_inventory(stock, 101)],
        );
        let err = planner()
            .submit(&ledger, &plan, &actor(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FulfillmentError::ExceedsShortfall {
                requested: 101,
                shortfall: 100,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn same_source_twice_counts_pending_claims() {
        let ledger = InMemoryLedger::new();
        let demand = commitment(&ledger, "brand", "trader", 500).await;
        let stock = lot(&ledger, 200).await;
        let plan = FulfillmentPlan::new(
            demand.id,
            vec![
                AllocationRequest::from_inventory(stock, 150),
                AllocationRequest::from_inventory(stock, 100),
            ],
        );
        let err = planner()
            .submit(&ledger, &plan, &actor(), Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            FulfillmentError::PlanRejected { index, source } => {
                assert_eq!(index, 1);
                assert!(matches!(
                    *source,
                    FulfillmentError::InsufficientCapacity { available: 50, .. }
                ));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_plan_is_invalid() {
        let ledger = InMemoryLedger::new();
        let demand = commitment(&ledger, "brand", "trader", 10).await;
        let plan = FulfillmentPlan::new(demand.id, vec![]);
        let err = planner()
            .submit(&ledger, &plan, &actor(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::InvalidPlan(_)));
    }

    #[tokio::test]
    async fn fulfilled_demand_rejects_further_plans() {
        let ledger = InMemoryLedger::new();
        let demand = commitment(&ledger, "brand", "trader", 50).await;
        let stock = lot(&ledger, 100).await;
        let full = FulfillmentPlan::new(demand.id, vec![AllocationRequest::from_inventory(stock, 50)]);
        planner()
            .submit(&ledger, &full, &actor(), Duration::from_secs(5))
            .await
            .unwrap();

        let more = FulfillmentPlan::new(demand.id, vec![AllocationRequest::from_inventory(stock, 1)]);
        let err = planner()
            .submit(&ledger, &more, &actor(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::InvalidTransition { .. }));
    }
}
