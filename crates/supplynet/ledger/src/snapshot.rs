use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use supplynet_types::{
    Allocation, AllocationSource, Commitment, CommitmentId, FulfillmentState, Lot, LotId,
    LotRelationship,
};

use crate::allocations::AllocationLedger;

/// Copy of all four ledger tables.
///
/// Rows are ordered by id so two snapshots of the same ledger state compare
/// equal regardless of backend or insertion order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub commitments: Vec<Commitment>,
    pub lots: Vec<Lot>,
    pub relationships: Vec<LotRelationship>,
    pub allocations: Vec<Allocation>,
}

/// A broken structural invariant found by [`LedgerSnapshot::verify_invariants`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvariantViolation {
    CounterMismatch {
        commitment: CommitmentId,
        fulfilled: i64,
        from_allocations: i64,
    },
    OverFulfilled {
        commitment: CommitmentId,
        fulfilled: i64,
        requested: i64,
    },
    StateMismatch {
        commitment: CommitmentId,
        state: FulfillmentState,
        derived: FulfillmentState,
    },
    LotOverClaimed {
        lot: LotId,
        claimed: i64,
        remaining: i64,
    },
    DanglingCommitment {
        commitment: CommitmentId,
    },
    DanglingLot {
        lot: LotId,
    },
}

impl LedgerSnapshot {
    pub fn new(
        mut commitments: Vec<Commitment>,
        mut lots: Vec<Lot>,
        mut relationships: Vec<LotRelationship>,
        mut allocations: Vec<Allocation>,
    ) -> Self {
        commitments.sort_by(|a, b| a.id.cmp(&b.id));
        lots.sort_by(|a, b| a.id.cmp(&b.id));
        relationships.sort_by(|a, b| a.id.cmp(&b.id));
        allocations.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            commitments,
            lots,
            relationships,
            allocations,
        }
    }

    pub fn commitment(&self, id: &CommitmentId) -> Option<&Commitment> {
        self.commitments.iter().find(|c| c.id == *id)
    }

    pub fn lot(&self, id: &LotId) -> Option<&Lot> {
        self.lots.iter().find(|l| l.id == *id)
    }

    /// Re-check every structural invariant and return all violations.
    pub fn verify_invariants(&self) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();

        let commitment_ids: HashSet<&CommitmentId> =
            self.commitments.iter().map(|c| &c.id).collect();
        let lot_ids: HashSet<&LotId> = self.lots.iter().map(|l| &l.id).collect();

        let mut counters: HashMap<CommitmentId, i64> = HashMap::new();
        for allocation in &self.allocations {
            for id in AllocationLedger::counted_commitments(allocation) {
                *counters.entry(id).or_insert(0) += allocation.quantity;
            }

            if !commitment_ids.contains(&allocation.demand_commitment_id) {
                violations.push(InvariantViolation::DanglingCommitment {
                    commitment: allocation.demand_commitment_id,
                });
            }
            match &allocation.source {
                AllocationSource::Commitment { commitment_id }
                | AllocationSource::Chain { commitment_id } => {
                    if !commitment_ids.contains(commitment_id) {
                        violations.push(InvariantViolation::DanglingCommitment {
                            commitment: *commitment_id,
                        });
                    }
                }
                AllocationSource::Inventory { lot_id } => {
                    if !lot_ids.contains(lot_id) {
                        violations.push(InvariantViolation::DanglingLot { lot: *lot_id });
                    }
                }
            }
        }

        for relationship in &self.relationships {
            for id in [&relationship.parent_lot_id, &relationship.child_lot_id] {
                if !lot_ids.contains(id) {
                    violations.push(InvariantViolation::DanglingLot { lot: *id });
                }
            }
        }

        for commitment in &self.commitments {
            let from_allocations = counters.get(&commitment.id).copied().unwrap_or(0);
            if commitment.fulfilled_quantity != from_allocations {
                violations.push(InvariantViolation::CounterMismatch {
                    commitment: commitment.id,
                    fulfilled: commitment.fulfilled_quantity,
                    from_allocations,
                });
            }
            if commitment.fulfilled_quantity > commitment.quantity {
                violations.push(InvariantViolation::OverFulfilled {
                    commitment: commitment.id,
                    fulfilled: commitment.fulfilled_quantity,
                    requested: commitment.quantity,
                });
            }

            let derived =
                FulfillmentState::derive(commitment.fulfilled_quantity, commitment.quantity);
            let consistent = match commitment.fulfillment_state {
                FulfillmentState::Closed => derived == FulfillmentState::Fulfilled,
                state => state == derived,
            };
            if !consistent {
                violations.push(InvariantViolation::StateMismatch {
                    commitment: commitment.id,
                    state: commitment.fulfillment_state,
                    derived,
                });
            }
        }

        for lot in &self.lots {
            if lot.quantity_claimed > lot.quantity || lot.quantity < 0 {
                violations.push(InvariantViolation::LotOverClaimed {
                    lot: lot.id,
                    claimed: lot.quantity_claimed,
                    remaining: lot.quantity,
                });
            }
        }

        violations
    }
}
