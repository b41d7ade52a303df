//! Traceability Tracer.
//!
//! Read-only. Walks a lot's upstream depth-first: relationship edges to
//! parent lots, and for lots delivered against a commitment, across the
//! Allocation Ledger to whatever that commitment was allocated from. Reads
//! go through [`LedgerReader`] and may be slightly stale.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use supplynet_ledger::LedgerReader;
use supplynet_types::{
    AllocationSource, CommitmentId, CompanyId, Lot, LotId, LotOrigin, ProductId,
    RelationshipKind, SourceKind,
};
use tracing::{debug, warn};

use crate::error::{FulfillmentError, FulfillmentResult};
use crate::scoring::{clamp_score, DecayPolicy};

/// How a hop was reached from the hop below it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "via", content = "kind", rename_all = "snake_case")]
pub enum TraceLink {
    /// The traced lot itself
    Root,
    Relationship(RelationshipKind),
    Allocation(SourceKind),
}

impl TraceLink {
    fn is_transformative(&self) -> bool {
        match self {
            TraceLink::Relationship(kind) => kind.is_transformative(),
            TraceLink::Root | TraceLink::Allocation(_) => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraceHop {
    pub lot_id: LotId,
    pub owner: CompanyId,
    pub product: ProductId,
    /// Quantity this lot contributed to the hop below it
    pub quantity: i64,
    pub link: TraceLink,
    pub is_origin: bool,
    pub depth: usize,
    /// Commitment crossed to reach this lot, for allocation links
    pub via_commitment: Option<CommitmentId>,
    /// Own score after decay
    pub transparency_score: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LotTrace {
    pub lot_id: LotId,
    /// Closest to the traced lot first
    pub hops: Vec<TraceHop>,
    pub depth: usize,
    pub is_fully_traced: bool,
    /// Branches that ended without reaching an origin lot
    pub missing_branches: usize,
    pub transparency_score: f64,
}

struct Pending {
    lot: Lot,
    link: TraceLink,
    quantity: i64,
    depth: usize,
    via_commitment: Option<CommitmentId>,
    transformations: u32,
}

#[derive(Clone)]
pub struct Tracer {
    decay: Arc<dyn DecayPolicy>,
    missing_branch_score: f64,
    max_depth: usize,
}

impl Tracer {
    pub fn new(decay: Arc<dyn DecayPolicy>, missing_branch_score: f64, max_depth: usize) -> Self {
        Self {
            decay,
            missing_branch_score: clamp_score(missing_branch_score),
            max_depth,
        }
    }

    pub async fn trace(&self, reader: &dyn LedgerReader, lot_id: &LotId) -> FulfillmentResult<LotTrace> {
        let root = reader
            .get_lot(lot_id)
            .await?
            .ok_or_else(|| FulfillmentError::NotFound(lot_id.to_string()))?;

        let mut hops: Vec<TraceHop> = Vec::new();
        let mut missing = 0usize;
        let mut visited: HashSet<LotId> = HashSet::new();
        let mut stack = vec![Pending {
            quantity: root.quantity,
            lot: root,
            link: TraceLink::Root,
            depth: 0,
            via_commitment: None,
            transformations: 0,
        }];

        while let Some(item) = stack.pop() {
            if !visited.insert(item.lot.id) {
                continue;
            }
            if item.depth > self.max_depth {
                return Err(FulfillmentError::DepthExceeded {
                    max_depth: self.max_depth,
                });
            }

            let transformations = item.transformations + u32::from(item.link.is_transformative());
            let (upstream, branch_missing) = self.upstream_of(reader, &item.lot).await?;
            missing += branch_missing;

            hops.push(TraceHop {
                lot_id: item.lot.id,
                owner: item.lot.owner.clone(),
                product: item.lot.product.clone(),
                quantity: item.quantity,
                link: item.link,
                is_origin: item.lot.is_origin() && upstream.is_empty(),
                depth: item.depth,
                via_commitment: item.via_commitment,
                transparency_score: self.decay.apply(item.lot.transparency_score, transformations),
            });

            // Reverse so the first parent is walked first.
            for (lot, link, quantity, via_commitment) in upstream.into_iter().rev() {
                stack.push(Pending {
                    lot,
                    link,
                    quantity,
                    depth: item.depth + 1,
                    via_commitment,
                    transformations,
                });
            }
        }

        hops.sort_by_key(|h| h.depth);
        let depth = hops.iter().map(|h| h.depth).max().unwrap_or(0);
        let transparency_score = self.aggregate(&hops, missing);
        let is_fully_traced = missing == 0;

        if is_fully_traced {
            debug!(lot_id = %lot_id, hops = hops.len(), depth, "lot traced");
        } else {
            warn!(lot_id = %lot_id, hops = hops.len(), missing, "partial trace");
        }

        Ok(LotTrace {
            lot_id: *lot_id,
            hops,
            depth,
            is_fully_traced,
            missing_branches: missing,
            transparency_score,
        })
    }

    /// Immediate upstream of `lot` plus the number of branches that end here
    /// without reaching an origin.
    async fn upstream_of(
        &self,
        reader: &dyn LedgerReader,
        lot: &Lot,
    ) -> FulfillmentResult<(Vec<(Lot, TraceLink, i64, Option<CommitmentId>)>, usize)> {
        let mut upstream = Vec::new();
        let mut missing = 0;

        for relationship in reader.relationships_for_child(&lot.id).await? {
            match reader.get_lot(&relationship.parent_lot_id).await? {
                Some(parent) => upstream.push((
                    parent,
                    TraceLink::Relationship(relationship.kind),
                    relationship.quantity,
                    None,
                )),
                None => missing += 1,
            }
        }

        match &lot.origin {
            LotOrigin::Produced => {}
            LotOrigin::Derived => {
                if upstream.is_empty() {
                    missing += 1;
                }
            }
            LotOrigin::Delivered { commitment_id } => {
                let allocations = reader.allocations_for_demand(commitment_id).await?;
                if allocations.is_empty() {
                    missing += 1;
                }
                for allocation in allocations {
                    let kind = allocation.source.kind();
                    match &allocation.source {
                        AllocationSource::Inventory { lot_id } => {
                            match reader.get_lot(lot_id).await? {
                                Some(source) => upstream.push((
                                    source,
                                    TraceLink::Allocation(kind),
                                    allocation.quantity,
                                    Some(*commitment_id),
                                )),
                                None => missing += 1,
                            }
                        }
                        AllocationSource::Commitment { commitment_id: src }
                        | AllocationSource::Chain { commitment_id: src } => {
                            let (supplied, unsourced) = self
                                .supplied_lots(reader, *src, kind, allocation.quantity)
                                .await?;
                            upstream.extend(supplied);
                            missing += unsourced;
                        }
                    }
                }
            }
        }

        Ok((upstream, missing))
    }

    /// Lots that supplied `commitment_id`: its recorded deliveries, or when
    /// none exist yet, whatever its own allocations drew on. Commitment and
    /// chain sources are followed down until lots are reached.
    async fn supplied_lots(
        &self,
        reader: &dyn LedgerReader,
        commitment_id: CommitmentId,
        kind: SourceKind,
        quantity: i64,
    ) -> FulfillmentResult<(Vec<(Lot, TraceLink, i64, Option<CommitmentId>)>, usize)> {
        let mut lots = Vec::new();
        let mut missing = 0;
        let mut seen: HashSet<CommitmentId> = HashSet::new();
        let mut stack = vec![(commitment_id, kind, quantity, 0usize)];

        while let Some((current, kind, quantity, hops)) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            if hops > self.max_depth {
                return Err(FulfillmentError::DepthExceeded {
                    max_depth: self.max_depth,
                });
            }

            let delivered = reader.lots_delivered_for(&current).await?;
            if !delivered.is_empty() {
                for lot in delivered {
                    let contributed = lot.quantity.min(quantity);
                    lots.push((lot, TraceLink::Allocation(kind), contributed, Some(current)));
                }
                continue;
            }

            let allocations = reader.allocations_for_demand(&current).await?;
            if allocations.is_empty() {
                missing += 1;
                continue;
            }
            for allocation in allocations {
                let contributed = allocation.quantity.min(quantity);
                match &allocation.source {
                    AllocationSource::Inventory { lot_id } => match reader.get_lot(lot_id).await? {
                        Some(lot) => lots.push((
                            lot,
                            TraceLink::Allocation(SourceKind::Inventory),
                            contributed,
                            Some(current),
                        )),
                        None => missing += 1,
                    },
                    AllocationSource::Commitment { commitment_id: next }
                    | AllocationSource::Chain { commitment_id: next } => {
                        stack.push((*next, allocation.source.kind(), contributed, hops + 1));
                    }
                }
            }
        }

        Ok((lots, missing))
    }

    fn aggregate(&self, hops: &[TraceHop], missing: usize) -> f64 {
        let count = hops.len() + missing;
        if count == 0 {
            return 0.0;
        }
        let total: f64 = hops.iter().map(|h| h.transparency_score).sum::<f64>()
            + self.missing_branch_score * missing as f64;
        clamp_score(total / count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::{MultiplicativeDecay, NoDecay};
    use chrono::NaiveDate;
    use supplynet_ledger::{InMemoryLedger, InventoryLedger, LedgerStore};
    use supplynet_types::{ActorId, LotInput, NewLot};

    fn new_lot(score: f64, inputs: Vec<LotInput>) -> NewLot {
        let input_quantity = inputs
            .iter()
            .filter(|i| i.kind.requires_input_balance())
            .map(|i| i.quantity)
            .reduce(|a, b| a + b);
        NewLot {
            owner: CompanyId::new("mill"),
            product: ProductId::new("yarn"),
            quantity: 100,
            unit: "kg".into(),
            production_date: NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
            transparency_score: score,
            input_quantity,
            inputs,
        }
    }

    fn merge_from(parent: LotId) -> LotInput {
        LotInput {
            parent_lot_id: parent,
            kind: RelationshipKind::Merge,
            quantity: 50,
            yield_percentage: None,
            quality_impact: None,
        }
    }

    async fn record(ledger: &InMemoryLedger, input: NewLot) -> Lot {
        let mut tx = ledger.begin().await.unwrap();
        let lot = InventoryLedger::record_lot(tx.as_mut(), input, &ActorId::new("ops"))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        lot
    }

    #[tokio::test]
    async fn origin_lot_traces_to_itself() {
        let ledger = InMemoryLedger::new();
        let lot = record(&ledger, new_lot(70.0, vec![])).await;
        let tracer = Tracer::new(Arc::new(NoDecay), 0.0, 64);

        let trace = tracer.trace(&ledger, &lot.id).await.unwrap();
        assert_eq!(trace.hops.len(), 1);
        assert!(trace.hops[0].is_origin);
        assert!(trace.is_fully_traced);
        assert_eq!(trace.depth, 0);
        assert_eq!(trace.transparency_score, 70.0);
    }

    #[tokio::test]
    async fn merge_returns_both_branches_with_decay() {
        let ledger = InMemoryLedger::new();
        let a = record(&ledger, new_lot(100.0, vec![])).await;
        let b = record(&ledger, new_lot(80.0, vec![])).await;
        let merged = record(&ledger, new_lot(90.0, vec![merge_from(a.id), merge_from(b.id)])).await;

        let tracer = Tracer::new(Arc::new(MultiplicativeDecay { factor: 0.5 }), 0.0, 64);
        let trace = tracer.trace(&ledger, &merged.id).await.unwrap();

        assert_eq!(trace.hops.len(), 3);
        assert_eq!(trace.hops[0].lot_id, merged.id);
        let parents: HashSet<LotId> = trace.hops[1..].iter().map(|h| h.lot_id).collect();
        assert_eq!(parents, HashSet::from([a.id, b.id]));
        assert!(trace.hops[1..].iter().all(|h| h.depth == 1 && h.is_origin));
        assert!(trace.is_fully_traced);
        // (90 + 100 * 0.5 + 80 * 0.5) / 3
        assert!((trace.transparency_score - 60.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unknown_lot_is_not_found() {
        let ledger = InMemoryLedger::new();
        let tracer = Tracer::new(Arc::new(NoDecay), 0.0, 64);
        let err = tracer.trace(&ledger, &LotId::new()).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::NotFound(_)));
    }
}
