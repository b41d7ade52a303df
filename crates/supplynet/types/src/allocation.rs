use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ActorId, AllocationId, CommitmentId, LotId, PlanId};

/// Where an allocation drew its quantity from.
///
/// A tagged variant so that every consumer (validator, planner, tracer)
/// matches exhaustively and a new strategy cannot slip past one of them.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AllocationSource {
    /// Spare capacity of an existing commitment.
    Commitment { commitment_id: CommitmentId },
    /// Physical stock.
    Inventory { lot_id: LotId },
    /// A commitment spawned by this allocation (its parent is the demand).
    Chain { commitment_id: CommitmentId },
}

impl AllocationSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            AllocationSource::Commitment { .. } => SourceKind::Commitment,
            AllocationSource::Inventory { .. } => SourceKind::Inventory,
            AllocationSource::Chain { .. } => SourceKind::Chain,
        }
    }

    /// Commitment on the supply side, for commitment and chain sources.
    pub fn commitment_id(&self) -> Option<&CommitmentId> {
        match self {
            AllocationSource::Commitment { commitment_id }
            | AllocationSource::Chain { commitment_id } => Some(commitment_id),
            AllocationSource::Inventory { .. } => None,
        }
    }

    pub fn lot_id(&self) -> Option<&LotId> {
        match self {
            AllocationSource::Inventory { lot_id } => Some(lot_id),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Commitment,
    Inventory,
    Chain,
}

impl SourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Commitment => "commitment",
            SourceKind::Inventory => "inventory",
            SourceKind::Chain => "chain",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "commitment" => Some(SourceKind::Commitment),
            "inventory" => Some(SourceKind::Inventory),
            "chain" => Some(SourceKind::Chain),
            _ => None,
        }
    }
}

/// Why an allocation was made.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// Use existing supplier slack
    SupplierSlack,
    /// Ship from stock
    StockShipment,
    /// Cover the shortfall with a new downstream commitment
    ChainedSupply,
}

impl ReasonCode {
    pub fn label(&self) -> &'static str {
        match self {
            ReasonCode::SupplierSlack => "supplier_slack",
            ReasonCode::StockShipment => "stock_shipment",
            ReasonCode::ChainedSupply => "chained_supply",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "supplier_slack" => Some(ReasonCode::SupplierSlack),
            "stock_shipment" => Some(ReasonCode::StockShipment),
            "chained_supply" => Some(ReasonCode::ChainedSupply),
            _ => None,
        }
    }
}

impl From<SourceKind> for ReasonCode {
    fn from(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Commitment => ReasonCode::SupplierSlack,
            SourceKind::Inventory => ReasonCode::StockShipment,
            SourceKind::Chain => ReasonCode::ChainedSupply,
        }
    }
}

/// Append-only record of how a commitment was (partly) satisfied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: AllocationId,
    /// Plan that produced this allocation
    pub plan_id: PlanId,
    pub demand_commitment_id: CommitmentId,
    pub source: AllocationSource,
    pub quantity: i64,
    pub unit: String,
    pub reason: ReasonCode,
    pub created_by: ActorId,
    pub created_at: DateTime<Utc>,
}
