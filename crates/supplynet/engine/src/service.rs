//! The engine's exposed operations.
//!
//! [`FulfillmentService`] is stateless apart from its read-path caches: any
//! number of calls may run concurrently against the same store. Writes go
//! through the ledger's transactions and the contention retry policy. Reads
//! use the plain reader and may be slightly stale.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use supplynet_ledger::{
    CommitmentLedger, DeliveryLot, InventoryLedger, InvariantViolation, LedgerSnapshot,
    LedgerStore, ReadView,
};
use supplynet_types::{
    ActorId, Commitment, CommitmentId, CompanyId, FulfillmentPlan, Lot, LotId, LotRelationship,
    NewCommitment, NewLot, RelationshipKind,
};
use tracing::{debug, info, warn};

use crate::cache::{fingerprint, ReadCache};
use crate::config::EngineConfig;
use crate::directory::SupplierDirectory;
use crate::error::{FulfillmentError, FulfillmentResult};
use crate::planner::{FulfillmentPlanner, PlanOutcome};
use crate::retry::RetryPolicy;
use crate::tracer::{LotTrace, Tracer};
use crate::validator::{GraphReport, GraphValidator};

/// Everything a planner UI needs to assemble a plan for one commitment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FulfillmentOptions {
    pub commitment: Commitment,
    /// Seller's other open commitments for the same goods
    pub spare_commitment_capacity: Vec<Commitment>,
    /// Seller's allocatable lots of the same goods
    pub spare_lot_capacity: Vec<Lot>,
    /// Companies the seller may chain a new commitment to
    pub eligible_suppliers: Vec<CompanyId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyCapacity {
    pub company: CompanyId,
    pub commitment_capacity_total: i64,
    pub inventory_capacity_total: i64,
}

pub struct FulfillmentService<S> {
    store: Arc<S>,
    directory: Arc<dyn SupplierDirectory>,
    config: EngineConfig,
    validator: GraphValidator,
    planner: FulfillmentPlanner,
    retry: RetryPolicy,
    tracer: Tracer,
    trace_cache: ReadCache<LotTrace>,
    capacity_cache: ReadCache<CompanyCapacity>,
}

impl<S: LedgerStore + 'static> FulfillmentService<S> {
    pub fn new(store: Arc<S>, directory: Arc<dyn SupplierDirectory>, config: EngineConfig) -> Self {
        let validator = GraphValidator::new(config.graph.max_depth);
        let retry = RetryPolicy::new(config.retry.clone());
        let planner = FulfillmentPlanner::new(validator.clone(), retry.clone());
        let tracer = Tracer::new(
            config.scoring.decay.build(),
            config.scoring.missing_branch_score,
            config.graph.max_depth,
        );

        info!(
            backend = store.backend_label(),
            max_depth = config.graph.max_depth,
            decay = ?config.scoring.decay,
            cache_ttl_secs = config.cache.ttl_secs,
            "fulfillment service ready"
        );

        Self {
            trace_cache: ReadCache::new(&config.cache),
            capacity_cache: ReadCache::new(&config.cache),
            store,
            directory,
            config,
            validator,
            planner,
            retry,
            tracer,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// GetFulfillmentOptions
    pub async fn get_fulfillment_options(
        &self,
        commitment_id: &CommitmentId,
    ) -> FulfillmentResult<FulfillmentOptions> {
        let reader = self.store.as_ref();
        let commitment = reader
            .get_commitment(commitment_id)
            .await?
            .ok_or_else(|| FulfillmentError::NotFound(commitment_id.to_string()))?;

        let mut graph = ReadView::new(reader);

        let mut spare_commitment_capacity = Vec::new();
        for candidate in CommitmentLedger::spare_capacity(reader, &commitment.seller).await? {
            if candidate.id == commitment.id || !same_goods(&commitment, &candidate.product, &candidate.unit) {
                continue;
            }
            match self
                .validator
                .check_commitment_source(&mut graph, &commitment.id, &candidate.id)
                .await
            {
                Ok(()) => spare_commitment_capacity.push(candidate),
                Err(FulfillmentError::CycleDetected { .. } | FulfillmentError::DepthExceeded { .. }) => {
                    debug!(demand = %commitment.id, candidate = %candidate.id, "cyclic candidate dropped");
                }
                Err(err) => return Err(err),
            }
        }

        let mut spare_lot_capacity = Vec::new();
        for lot in InventoryLedger::spare_capacity(reader, &commitment.seller).await? {
            if !same_goods(&commitment, &lot.product, &lot.unit) {
                continue;
            }
            match self
                .validator
                .check_lot_source(&mut graph, &commitment.id, &lot)
                .await
            {
                Ok(()) => spare_lot_capacity.push(lot),
                Err(FulfillmentError::CycleDetected { .. } | FulfillmentError::DepthExceeded { .. }) => {
                    debug!(demand = %commitment.id, lot = %lot.id, "cyclic lot dropped");
                }
                Err(err) => return Err(err),
            }
        }

        let eligible_suppliers = self
            .directory
            .eligible_suppliers(&commitment.seller, &commitment.product)
            .await?
            .into_iter()
            .filter(|supplier| *supplier != commitment.seller)
            .collect();

        Ok(FulfillmentOptions {
            commitment,
            spare_commitment_capacity,
            spare_lot_capacity,
            eligible_suppliers,
        })
    }

    /// SubmitFulfillmentPlan, bounded by the configured default timeout.
    pub async fn submit_fulfillment_plan(
        &self,
        plan: &FulfillmentPlan,
        actor: &ActorId,
    ) -> FulfillmentResult<PlanOutcome> {
        self.submit_fulfillment_plan_within(plan, actor, self.config.plan.default_timeout())
            .await
    }

    /// SubmitFulfillmentPlan with a caller-supplied timeout. On
    /// [`FulfillmentError::Timeout`] the caller may resubmit the same plan.
    pub async fn submit_fulfillment_plan_within(
        &self,
        plan: &FulfillmentPlan,
        actor: &ActorId,
        timeout: Duration,
    ) -> FulfillmentResult<PlanOutcome> {
        self.planner
            .submit(self.store.as_ref(), plan, actor, timeout)
            .await
    }

    /// GetAvailableCapacity
    pub async fn get_available_capacity(&self, company: &CompanyId) -> FulfillmentResult<CompanyCapacity> {
        let key = fingerprint("capacity", company.as_str());
        if let Some(hit) = self.capacity_cache.get(&key) {
            return Ok(hit);
        }

        let reader = self.store.as_ref();
        let commitment_capacity_total = CommitmentLedger::spare_capacity(reader, company)
            .await?
            .iter()
            .map(Commitment::available)
            .sum();
        let inventory_capacity_total = InventoryLedger::spare_capacity(reader, company)
            .await?
            .iter()
            .map(Lot::available)
            .sum();

        let capacity = CompanyCapacity {
            company: company.clone(),
            commitment_capacity_total,
            inventory_capacity_total,
        };
        self.capacity_cache.insert(key, capacity.clone());
        Ok(capacity)
    }

    /// TraceLot
    pub async fn trace_lot(&self, lot_id: &LotId) -> FulfillmentResult<LotTrace> {
        let key = fingerprint("trace", &lot_id.to_string());
        if let Some(hit) = self.trace_cache.get(&key) {
            return Ok(hit);
        }
        let trace = self.tracer.trace(self.store.as_ref(), lot_id).await?;
        self.trace_cache.insert(key, trace.clone());
        Ok(trace)
    }

    /// ValidateGraph
    pub async fn validate_graph(&self, root: &CommitmentId) -> FulfillmentResult<GraphReport> {
        let mut graph = ReadView::new(self.store.as_ref());
        let report = self.validator.validate_graph(&mut graph, root).await?;
        if !report.is_valid_dag {
            warn!(root = %root, "demand/supply graph contains a cycle");
        }
        Ok(report)
    }

    pub async fn create_commitment(
        &self,
        input: NewCommitment,
        actor: &ActorId,
    ) -> FulfillmentResult<Commitment> {
        let store = self.store.as_ref();
        let input = &input;
        self.retry
            .run("create_commitment", move || async move {
                let mut tx = store.begin().await?;
                let commitment = CommitmentLedger::create(tx.as_mut(), input.clone(), actor).await?;
                tx.commit().await?;
                Ok(commitment)
            })
            .await
    }

    /// FULFILLED -> CLOSED. Anything else is an invalid transition.
    pub async fn close_commitment(
        &self,
        commitment_id: &CommitmentId,
        actor: &ActorId,
    ) -> FulfillmentResult<Commitment> {
        let store = self.store.as_ref();
        self.retry
            .run("close_commitment", move || async move {
                let mut tx = store.begin().await?;
                let commitment = CommitmentLedger::close(tx.as_mut(), commitment_id, actor).await?;
                tx.commit().await?;
                Ok(commitment)
            })
            .await
    }

    pub async fn record_lot(&self, input: NewLot, actor: &ActorId) -> FulfillmentResult<Lot> {
        let store = self.store.as_ref();
        let input = &input;
        self.retry
            .run("record_lot", move || async move {
                let mut tx = store.begin().await?;
                let lot = InventoryLedger::record_lot(tx.as_mut(), input.clone(), actor).await?;
                tx.commit().await?;
                Ok(lot)
            })
            .await
    }

    /// Record the lot the buyer of `commitment_id` received.
    pub async fn record_delivery(
        &self,
        commitment_id: &CommitmentId,
        delivery: DeliveryLot,
        actor: &ActorId,
    ) -> FulfillmentResult<Lot> {
        let store = self.store.as_ref();
        let delivery = &delivery;
        self.retry
            .run("record_delivery", move || async move {
                let mut tx = store.begin().await?;
                let lot =
                    InventoryLedger::record_delivery(tx.as_mut(), commitment_id, delivery.clone(), actor)
                        .await?;
                tx.commit().await?;
                Ok(lot)
            })
            .await
    }

    /// Add a `child <- parent` relationship edge after a cycle check in the
    /// same transaction.
    pub async fn link_lots(
        &self,
        parent: &LotId,
        child: &LotId,
        kind: RelationshipKind,
        quantity: i64,
        actor: &ActorId,
    ) -> FulfillmentResult<LotRelationship> {
        let store = self.store.as_ref();
        let validator = &self.validator;
        self.retry
            .run("link_lots", move || async move {
                let mut tx = store.begin().await?;
                validator.check_lot_link(tx.as_mut(), parent, child).await?;
                let relationship =
                    InventoryLedger::link_lots(tx.as_mut(), parent, child, kind, quantity, actor)
                        .await?;
                tx.commit().await?;
                Ok(relationship)
            })
            .await
    }

    pub async fn snapshot(&self) -> FulfillmentResult<LedgerSnapshot> {
        Ok(self.store.snapshot().await?)
    }

    /// Re-check the structural invariants over a full snapshot.
    pub async fn audit(&self) -> FulfillmentResult<Vec<InvariantViolation>> {
        let violations = self.snapshot().await?.verify_invariants();
        if violations.is_empty() {
            debug!("ledger audit clean");
        } else {
            warn!(violations = violations.len(), "ledger audit found violations");
        }
        Ok(violations)
    }
}

fn same_goods(demand: &Commitment, product: &supplynet_types::ProductId, unit: &str) -> bool {
    demand.product == *product && demand.unit == unit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::directory::StaticSupplierDirectory;
    use chrono::NaiveDate;
    use supplynet_ledger::{InMemoryLedger, LedgerReader};
    use supplynet_types::{AllocationRequest, ProductId};

    fn service(cache_ttl_secs: u64) -> FulfillmentService<InMemoryLedger> {
        let config = EngineConfig {
            cache: CacheConfig {
                ttl_secs: cache_ttl_secs,
                max_entries: 64,
            },
            ..EngineConfig::default()
        };
        let directory = StaticSupplierDirectory::new()
            .with_supplier(CompanyId::new("trader"), CompanyId::new("spinner"));
        FulfillmentService::new(Arc::new(InMemoryLedger::new()), Arc::new(directory), config)
    }

    fn order(buyer: &str, seller: &str, product: &str, quantity: i64) -> NewCommitment {
        NewCommitment {
            buyer: CompanyId::new(buyer),
            seller: CompanyId::new(seller),
            product: ProductId::new(product),
            quantity,
            unit: "kg".into(),
            delivery_date: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
            parent_commitment_id: None,
            lifecycle_status: Default::default(),
        }
    }

    fn stock(owner: &str, product: &str, quantity: i64) -> NewLot {
        NewLot {
            owner: CompanyId::new(owner),
            product: ProductId::new(product),
            quantity,
            unit: "kg".into(),
            production_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            transparency_score: 80.0,
            input_quantity: None,
            inputs: vec![],
        }
    }

    fn actor() -> ActorId {
        ActorId::new("ops")
    }

    #[tokio::test]
    async fn options_list_same_goods_only() {
        let svc = service(0);
        let demand = svc.create_commitment(order("brand", "trader", "cotton", 1000), &actor()).await.unwrap();
        let slack = svc.create_commitment(order("retailer", "trader", "cotton", 500), &actor()).await.unwrap();
        svc.create_commitment(order("retailer", "trader", "wool", 500), &actor()).await.unwrap();
        let lot = svc.record_lot(stock("trader", "cotton", 200), &actor()).await.unwrap();
        svc.record_lot(stock("trader", "wool", 200), &actor()).await.unwrap();
        svc.record_lot(stock("mill", "cotton", 200), &actor()).await.unwrap();

        let options = svc.get_fulfillment_options(&demand.id).await.unwrap();
        assert_eq!(options.commitment.id, demand.id);
        let commitments: Vec<_> = options.spare_commitment_capacity.iter().map(|c| c.id).collect();
        assert_eq!(commitments, vec![slack.id]);
        let lots: Vec<_> = options.spare_lot_capacity.iter().map(|l| l.id).collect();
        assert_eq!(lots, vec![lot.id]);
        assert_eq!(options.eligible_suppliers, vec![CompanyId::new("spinner")]);
    }

    #[tokio::test]
    async fn options_drop_commitments_that_depend_on_the_demand() {
        let svc = service(0);
        let demand = svc.create_commitment(order("brand", "trader", "cotton", 1000), &actor()).await.unwrap();
        let dependent = svc.create_commitment(order("retailer", "trader", "cotton", 100), &actor()).await.unwrap();
        let independent = svc.create_commitment(order("outlet", "trader", "cotton", 100), &actor()).await.unwrap();

        // `dependent` is already sourced from `demand`; offering it back would close a loop.
        let plan = FulfillmentPlan::new(
            dependent.id,
            vec![AllocationRequest::from_commitment(demand.id, 50)],
        );
        svc.submit_fulfillment_plan(&plan, &actor()).await.unwrap();

        let options = svc.get_fulfillment_options(&demand.id).await.unwrap();
        let offered: Vec<_> = options.spare_commitment_capacity.iter().map(|c| c.id).collect();
        assert_eq!(offered, vec![independent.id]);
    }

    #[tokio::test]
    async fn capacity_totals_sum_available() {
        let svc = service(0);
        svc.create_commitment(order("brand", "trader", "cotton", 300), &actor()).await.unwrap();
        svc.create_commitment(order("retailer", "trader", "wool", 200), &actor()).await.unwrap();
        let lot = svc.record_lot(stock("trader", "cotton", 120), &actor()).await.unwrap();

        let capacity = svc.get_available_capacity(&CompanyId::new("trader")).await.unwrap();
        assert_eq!(capacity.commitment_capacity_total, 500);
        assert_eq!(capacity.inventory_capacity_total, 120);

        let demand = svc.create_commitment(order("brand", "trader", "cotton", 50), &actor()).await.unwrap();
        let plan = FulfillmentPlan::new(demand.id, vec![AllocationRequest::from_inventory(lot.id, 20)]);
        svc.submit_fulfillment_plan(&plan, &actor()).await.unwrap();

        let capacity = svc.get_available_capacity(&CompanyId::new("trader")).await.unwrap();
        // 300 + 200 + (50 - 20)
        assert_eq!(capacity.commitment_capacity_total, 530);
        assert_eq!(capacity.inventory_capacity_total, 100);
    }

    #[tokio::test]
    async fn cached_capacity_is_served_within_ttl() {
        let svc = service(60);
        let trader = CompanyId::new("trader");
        let first = svc.get_available_capacity(&trader).await.unwrap();
        assert_eq!(first.commitment_capacity_total, 0);

        svc.create_commitment(order("brand", "trader", "cotton", 300), &actor()).await.unwrap();
        let second = svc.get_available_capacity(&trader).await.unwrap();
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn close_requires_fulfilled() {
        let svc = service(0);
        let demand = svc.create_commitment(order("brand", "trader", "cotton", 40), &actor()).await.unwrap();
        let err = svc.close_commitment(&demand.id, &actor()).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::InvalidTransition { .. }));

        let lot = svc.record_lot(stock("trader", "cotton", 40), &actor()).await.unwrap();
        let plan = FulfillmentPlan::new(demand.id, vec![AllocationRequest::from_inventory(lot.id, 40)]);
        svc.submit_fulfillment_plan(&plan, &actor()).await.unwrap();

        let closer = ActorId::new("closer");
        let closed = svc.close_commitment(&demand.id, &closer).await.unwrap();
        assert_eq!(closed.fulfillment_state, supplynet_types::FulfillmentState::Closed);
        assert!(svc.audit().await.unwrap().is_empty());

        let stored = svc.store().get_commitment(&demand.id).await.unwrap().unwrap();
        assert_eq!(stored.updated_by, closer);
    }

    #[tokio::test]
    async fn plan_records_its_actor_on_every_source() {
        let svc = service(0);
        let planner = ActorId::new("planner");
        let demand = svc.create_commitment(order("brand", "trader", "cotton", 100), &actor()).await.unwrap();
        let slack = svc.create_commitment(order("retailer", "trader", "cotton", 100), &actor()).await.unwrap();
        let lot = svc.record_lot(stock("trader", "cotton", 100), &actor()).await.unwrap();

        let plan = FulfillmentPlan::new(
            demand.id,
            vec![
                AllocationRequest::from_commitment(slack.id, 40),
                AllocationRequest::from_inventory(lot.id, 60),
            ],
        );
        svc.submit_fulfillment_plan(&plan, &planner).await.unwrap();

        let store = svc.store();
        for id in [demand.id, slack.id] {
            let c = store.get_commitment(&id).await.unwrap().unwrap();
            assert_eq!(c.created_by, actor());
            assert_eq!(c.updated_by, planner);
        }
        assert_eq!(store.get_lot(&lot.id).await.unwrap().unwrap().updated_by, planner);
    }

    #[tokio::test]
    async fn link_lots_rejects_loops() {
        let svc = service(0);
        let a = svc.record_lot(stock("mill", "yarn", 100), &actor()).await.unwrap();
        let b = svc.record_lot(stock("mill", "yarn", 100), &actor()).await.unwrap();

        svc.link_lots(&a.id, &b.id, RelationshipKind::Split, 10, &actor())
            .await
            .unwrap();
        let err = svc
            .link_lots(&b.id, &a.id, RelationshipKind::Split, 10, &actor())
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::CycleDetected { .. }));

        let a = svc.store().get_lot(&a.id).await.unwrap().unwrap();
        assert_eq!(a.quantity_claimed, 10);
    }

    #[tokio::test]
    async fn validate_graph_reports_plan_edges() {
        let svc = service(0);
        let demand = svc.create_commitment(order("brand", "trader", "cotton", 100), &actor()).await.unwrap();
        let lot = svc.record_lot(stock("trader", "cotton", 100), &actor()).await.unwrap();
        let plan = FulfillmentPlan::new(
            demand.id,
            vec![
                AllocationRequest::from_inventory(lot.id, 50),
                AllocationRequest::from_new_chain(CompanyId::new("spinner"), 50),
            ],
        );
        svc.submit_fulfillment_plan(&plan, &actor()).await.unwrap();

        let report = svc.validate_graph(&demand.id).await.unwrap();
        assert!(report.is_valid_dag);
        assert_eq!(report.node_count, 3);
        assert_eq!(report.edge_count, 2);
        assert_eq!(report.max_depth, 1);
    }
}
