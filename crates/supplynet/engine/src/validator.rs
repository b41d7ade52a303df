//! Graph Validator.
//!
//! The demand/supply graph has two node kinds, commitments and lots, and is
//! never stored as adjacency: edges are derived on every walk from the
//! append-only tables.
//!
//! - commitment -> commitment: an allocation whose demand is the first and
//!   whose commitment or chain source is the second
//! - commitment -> lot: an inventory allocation
//! - lot -> lot: a relationship edge, child to parent
//! - lot -> commitment: a lot delivered against that commitment
//!
//! Every walk is bounded by `max_depth`. Exceeding it is an error, never a
//! silent truncation.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use supplynet_ledger::{GraphSource, LedgerTx};
use supplynet_types::{
    AllocationRequest, AllocationSource, Commitment, CommitmentId, Lot, LotId, LotOrigin,
    LotStatus, ProductId,
};
use tracing::debug;

use crate::error::{FulfillmentError, FulfillmentResult};

/// A node of the demand/supply graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum GraphNode {
    Commitment(CommitmentId),
    Lot(LotId),
}

impl std::fmt::Display for GraphNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphNode::Commitment(id) => write!(f, "{id}"),
            GraphNode::Lot(id) => write!(f, "{id}"),
        }
    }
}

/// Result of [`GraphValidator::validate_graph`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphReport {
    pub root: CommitmentId,
    pub is_valid_dag: bool,
    /// Longest path from the root, in edges
    pub max_depth: usize,
    pub node_count: usize,
    pub edge_count: usize,
}

/// Quantities already promised to earlier requests of the plan being
/// validated, per source.
#[derive(Debug, Default)]
pub struct PendingClaims {
    commitments: HashMap<CommitmentId, i64>,
    lots: HashMap<LotId, i64>,
}

impl PendingClaims {
    fn commitment(&self, id: &CommitmentId) -> i64 {
        self.commitments.get(id).copied().unwrap_or(0)
    }

    fn lot(&self, id: &LotId) -> i64 {
        self.lots.get(id).copied().unwrap_or(0)
    }
}

#[derive(Clone, Debug)]
pub struct GraphValidator {
    max_depth: usize,
}

impl GraphValidator {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Capacity and acyclicity check for one plan request, inside the plan's
    /// transaction. Sources are locked so the capacity read stays valid until
    /// commit.
    pub async fn admit(
        &self,
        tx: &mut dyn LedgerTx,
        demand: &Commitment,
        request: &AllocationRequest,
        pending: &mut PendingClaims,
    ) -> FulfillmentResult<()> {
        match request {
            AllocationRequest::FromCommitment {
                source_commitment_id,
                quantity,
            } => {
                if *source_commitment_id == demand.id {
                    return Err(cycle(demand.id, GraphNode::Commitment(demand.id)));
                }
                let source = tx
                    .lock_commitment(source_commitment_id)
                    .await?
                    .ok_or_else(|| FulfillmentError::NotFound(source_commitment_id.to_string()))?;
                ensure_same_goods(demand, &source.product, &source.unit, &source.id.to_string())?;

                let on_hand = if source.fulfillment_state.accepts_allocations() {
                    source.available()
                } else {
                    0
                };
                let available = on_hand - pending.commitment(&source.id);
                if *quantity > available {
                    return Err(FulfillmentError::InsufficientCapacity {
                        supply: source.id.to_string(),
                        requested: *quantity,
                        available: available.max(0),
                    });
                }

                self.check_commitment_source(&mut *tx, &demand.id, &source.id)
                    .await?;
                *pending.commitments.entry(source.id).or_insert(0) += *quantity;
            }
            AllocationRequest::FromInventory {
                source_lot_id,
                quantity,
            } => {
                let lot = tx
                    .lock_lot(source_lot_id)
                    .await?
                    .ok_or_else(|| FulfillmentError::NotFound(source_lot_id.to_string()))?;
                ensure_same_goods(demand, &lot.product, &lot.unit, &lot.id.to_string())?;

                let on_hand = if lot.status == LotStatus::Active {
                    lot.available()
                } else {
                    0
                };
                let available = on_hand - pending.lot(&lot.id);
                if *quantity > available {
                    return Err(FulfillmentError::InsufficientCapacity {
                        supply: lot.id.to_string(),
                        requested: *quantity,
                        available: available.max(0),
                    });
                }

                self.check_lot_source(&mut *tx, &demand.id, &lot).await?;
                *pending.lots.entry(lot.id).or_insert(0) += *quantity;
            }
            AllocationRequest::FromNewChain {
                supplier_company_id,
                ..
            } => {
                if *supplier_company_id == demand.seller {
                    return Err(FulfillmentError::InvalidPlan(format!(
                        "chain supplier {supplier_company_id} is the seller of {}",
                        demand.id
                    )));
                }
                self.check_chain(&mut *tx, demand).await?;
            }
        }

        debug!(
            demand = %demand.id,
            kind = request.kind().label(),
            quantity = request.quantity(),
            "allocation request admitted"
        );
        Ok(())
    }

    /// Reject `demand <- source` when the demand is an ancestor of the source
    /// or already reachable from it.
    pub async fn check_commitment_source<G: GraphSource + ?Sized>(
        &self,
        graph: &mut G,
        demand: &CommitmentId,
        source: &CommitmentId,
    ) -> FulfillmentResult<()> {
        self.walk_parent_chain(graph, source, Some(demand)).await?;
        if self
            .reaches(graph, GraphNode::Commitment(*source), GraphNode::Commitment(*demand))
            .await?
        {
            return Err(cycle(*demand, GraphNode::Commitment(*source)));
        }
        Ok(())
    }

    /// Inventory sources are checked through the commitment they were
    /// delivered against, and through their own upstream.
    pub async fn check_lot_source<G: GraphSource + ?Sized>(
        &self,
        graph: &mut G,
        demand: &CommitmentId,
        lot: &Lot,
    ) -> FulfillmentResult<()> {
        if let LotOrigin::Delivered { commitment_id } = &lot.origin {
            self.walk_parent_chain(graph, commitment_id, Some(demand))
                .await
                .map_err(|err| match err {
                    FulfillmentError::CycleDetected { demand, .. } => FulfillmentError::CycleDetected {
                        demand,
                        via: lot.id.to_string(),
                    },
                    other => other,
                })?;
        }
        if self
            .reaches(graph, GraphNode::Lot(lot.id), GraphNode::Commitment(*demand))
            .await?
        {
            return Err(cycle(*demand, GraphNode::Lot(lot.id)));
        }
        Ok(())
    }

    /// A chain child hangs below the demand, so its parent chain is the
    /// demand's chain plus one. That chain must terminate within bounds.
    pub async fn check_chain<G: GraphSource + ?Sized>(
        &self,
        graph: &mut G,
        demand: &Commitment,
    ) -> FulfillmentResult<()> {
        let ancestors = self.walk_parent_chain(graph, &demand.id, None).await?;
        if ancestors + 1 > self.max_depth {
            return Err(FulfillmentError::DepthExceeded {
                max_depth: self.max_depth,
            });
        }
        Ok(())
    }

    /// Reject a `child <- parent` lot edge if the child is already upstream
    /// of the parent.
    pub async fn check_lot_link<G: GraphSource + ?Sized>(
        &self,
        graph: &mut G,
        parent: &LotId,
        child: &LotId,
    ) -> FulfillmentResult<()> {
        if parent == child
            || self
                .reaches(graph, GraphNode::Lot(*parent), GraphNode::Lot(*child))
                .await?
        {
            return Err(FulfillmentError::CycleDetected {
                demand: child.to_string(),
                via: parent.to_string(),
            });
        }
        Ok(())
    }

    /// Full DFS over the component reachable from `root`.
    pub async fn validate_graph<G: GraphSource + ?Sized>(
        &self,
        graph: &mut G,
        root: &CommitmentId,
    ) -> FulfillmentResult<GraphReport> {
        if graph.commitment(root).await?.is_none() {
            return Err(FulfillmentError::NotFound(root.to_string()));
        }

        enum Frame {
            Enter(GraphNode, usize),
            Exit(GraphNode),
        }

        enum Color {
            Gray,
            Black,
        }

        let mut colors: HashMap<GraphNode, Color> = HashMap::new();
        let mut adjacency: HashMap<GraphNode, Vec<GraphNode>> = HashMap::new();
        let mut longest: HashMap<GraphNode, usize> = HashMap::new();
        let mut edge_count = 0;
        let mut is_valid_dag = true;
        let mut stack = vec![Frame::Enter(GraphNode::Commitment(*root), 0)];

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(node, depth) => {
                    match colors.get(&node) {
                        Some(Color::Black) => continue,
                        // Still on the current path: back edge.
                        Some(Color::Gray) => {
                            is_valid_dag = false;
                            continue;
                        }
                        None => {}
                    }
                    if depth > self.max_depth {
                        return Err(FulfillmentError::DepthExceeded {
                            max_depth: self.max_depth,
                        });
                    }
                    colors.insert(node, Color::Gray);
                    let next = successors(graph, node).await?;
                    edge_count += next.len();
                    stack.push(Frame::Exit(node));
                    for succ in next.iter().rev() {
                        stack.push(Frame::Enter(*succ, depth + 1));
                    }
                    adjacency.insert(node, next);
                }
                Frame::Exit(node) => {
                    colors.insert(node, Color::Black);
                    let depth = adjacency
                        .get(&node)
                        .into_iter()
                        .flatten()
                        .filter_map(|succ| longest.get(succ))
                        .map(|d| d + 1)
                        .max()
                        .unwrap_or(0);
                    longest.insert(node, depth);
                }
            }
        }

        let report = GraphReport {
            root: *root,
            is_valid_dag,
            max_depth: longest
                .get(&GraphNode::Commitment(*root))
                .copied()
                .unwrap_or(0),
            node_count: colors.len(),
            edge_count,
        };
        debug!(
            root = %root,
            valid = report.is_valid_dag,
            nodes = report.node_count,
            edges = report.edge_count,
            depth = report.max_depth,
            "graph validated"
        );
        Ok(report)
    }

    /// Follow `parent_commitment_id` upward from `start` (inclusive). Returns
    /// the number of ancestors above `start`.
    async fn walk_parent_chain<G: GraphSource + ?Sized>(
        &self,
        graph: &mut G,
        start: &CommitmentId,
        forbidden: Option<&CommitmentId>,
    ) -> FulfillmentResult<usize> {
        let mut visited = HashSet::new();
        let mut current = Some(*start);
        let mut steps = 0usize;

        while let Some(id) = current {
            if let Some(demand) = forbidden {
                if id == *demand {
                    return Err(cycle(*demand, GraphNode::Commitment(*start)));
                }
            }
            if !visited.insert(id) {
                return Err(FulfillmentError::CycleDetected {
                    demand: start.to_string(),
                    via: id.to_string(),
                });
            }
            if steps > self.max_depth {
                return Err(FulfillmentError::DepthExceeded {
                    max_depth: self.max_depth,
                });
            }
            current = graph
                .commitment(&id)
                .await?
                .and_then(|c| c.parent_commitment_id);
            if current.is_some() {
                steps += 1;
            }
        }
        Ok(steps)
    }

    /// Breadth-first reachability from `from` to `target` along dependency
    /// edges.
    async fn reaches<G: GraphSource + ?Sized>(
        &self,
        graph: &mut G,
        from: GraphNode,
        target: GraphNode,
    ) -> FulfillmentResult<bool> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back((from, 0usize));

        while let Some((node, depth)) = queue.pop_front() {
            if node == target {
                return Ok(true);
            }
            if !visited.insert(node) {
                continue;
            }
            let next = successors(graph, node).await?;
            if !next.is_empty() && depth >= self.max_depth {
                return Err(FulfillmentError::DepthExceeded {
                    max_depth: self.max_depth,
                });
            }
            for succ in next {
                queue.push_back((succ, depth + 1));
            }
        }
        Ok(false)
    }
}

/// Outgoing dependency edges of `node`.
pub async fn successors<G: GraphSource + ?Sized>(
    graph: &mut G,
    node: GraphNode,
) -> FulfillmentResult<Vec<GraphNode>> {
    let mut out = Vec::new();
    match node {
        GraphNode::Commitment(id) => {
            for allocation in graph.allocations_for_demand(&id).await? {
                out.push(match allocation.source {
                    AllocationSource::Commitment { commitment_id }
                    | AllocationSource::Chain { commitment_id } => {
                        GraphNode::Commitment(commitment_id)
                    }
                    AllocationSource::Inventory { lot_id } => GraphNode::Lot(lot_id),
                });
            }
        }
        GraphNode::Lot(id) => {
            for relationship in graph.relationships_for_child(&id).await? {
                out.push(GraphNode::Lot(relationship.parent_lot_id));
            }
            if let Some(lot) = graph.lot(&id).await? {
                if let LotOrigin::Delivered { commitment_id } = lot.origin {
                    out.push(GraphNode::Commitment(commitment_id));
                }
            }
        }
    }
    Ok(out)
}

fn cycle(demand: CommitmentId, via: GraphNode) -> FulfillmentError {
    FulfillmentError::CycleDetected {
        demand: demand.to_string(),
        via: via.to_string(),
    }
}

fn ensure_same_goods(
    demand: &Commitment,
    product: &ProductId,
    unit: &str,
    source: &str,
) -> FulfillmentResult<()> {
    if *product != demand.product || unit != demand.unit {
        return Err(FulfillmentError::InvalidPlan(format!(
            "{source} supplies {product} in {unit}, {} needs {} in {}",
            demand.id, demand.product, demand.unit
        )));
    }
    Ok(())
}
