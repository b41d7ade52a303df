use serde::{Deserialize, Serialize};

use crate::allocation::SourceKind;
use crate::ids::{CommitmentId, CompanyId, LotId, PlanId};

/// One step of a fulfillment plan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AllocationRequest {
    /// Use existing supplier slack.
    FromCommitment {
        source_commitment_id: CommitmentId,
        quantity: i64,
    },
    /// Ship from stock.
    FromInventory { source_lot_id: LotId, quantity: i64 },
    /// Spawn a new child commitment to `supplier_company_id`.
    FromNewChain {
        supplier_company_id: CompanyId,
        quantity: i64,
    },
}

impl AllocationRequest {
    pub fn from_commitment(source_commitment_id: CommitmentId, quantity: i64) -> Self {
        Self::FromCommitment {
            source_commitment_id,
            quantity,
        }
    }

    pub fn from_inventory(source_lot_id: LotId, quantity: i64) -> Self {
        Self::FromInventory {
            source_lot_id,
            quantity,
        }
    }

    pub fn from_new_chain(supplier_company_id: CompanyId, quantity: i64) -> Self {
        Self::FromNewChain {
            supplier_company_id,
            quantity,
        }
    }

    pub fn quantity(&self) -> i64 {
        match self {
            AllocationRequest::FromCommitment { quantity, .. }
            | AllocationRequest::FromInventory { quantity, .. }
            | AllocationRequest::FromNewChain { quantity, .. } => *quantity,
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            AllocationRequest::FromCommitment { .. } => SourceKind::Commitment,
            AllocationRequest::FromInventory { .. } => SourceKind::Inventory,
            AllocationRequest::FromNewChain { .. } => SourceKind::Chain,
        }
    }
}

/// An ordered list of allocation requests against one demand commitment,
/// applied all-or-nothing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentPlan {
    #[serde(default)]
    pub plan_id: PlanId,
    pub commitment_id: CommitmentId,
    pub requests: Vec<AllocationRequest>,
}

impl FulfillmentPlan {
    pub fn new(commitment_id: CommitmentId, requests: Vec<AllocationRequest>) -> Self {
        Self {
            plan_id: PlanId::new(),
            commitment_id,
            requests,
        }
    }

    /// Sum of requested quantities, `None` on overflow.
    pub fn total(&self) -> Option<i64> {
        self.requests
            .iter()
            .try_fold(0i64, |acc, r| acc.checked_add(r.quantity()))
    }
}
