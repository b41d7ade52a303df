use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ActorId, CommitmentId, CompanyId, ProductId};

/// Fulfillment state of a commitment.
///
/// Derived from `fulfilled_quantity` vs the requested quantity and never set
/// directly. `Closed` is the only explicit transition, allowed from
/// `Fulfilled`, and it is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentState {
    Open,
    PartiallyFulfilled,
    Fulfilled,
    Closed,
}

impl FulfillmentState {
    /// Pure derivation: `0 -> Open`, `0 < x < requested -> PartiallyFulfilled`,
    /// `x >= requested -> Fulfilled`.
    pub fn derive(fulfilled: i64, requested: i64) -> Self {
        if fulfilled <= 0 {
            FulfillmentState::Open
        } else if fulfilled < requested {
            FulfillmentState::PartiallyFulfilled
        } else {
            FulfillmentState::Fulfilled
        }
    }

    /// Whether the commitment still has capacity that allocations may consume.
    pub fn accepts_allocations(&self) -> bool {
        matches!(
            self,
            FulfillmentState::Open | FulfillmentState::PartiallyFulfilled
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            FulfillmentState::Open => "open",
            FulfillmentState::PartiallyFulfilled => "partially_fulfilled",
            FulfillmentState::Fulfilled => "fulfilled",
            FulfillmentState::Closed => "closed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "open" => Some(FulfillmentState::Open),
            "partially_fulfilled" => Some(FulfillmentState::PartiallyFulfilled),
            "fulfilled" => Some(FulfillmentState::Fulfilled),
            "closed" => Some(FulfillmentState::Closed),
            _ => None,
        }
    }
}

/// Business lifecycle of a commitment. Orthogonal to fulfillment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Draft,
    Confirmed,
    Delivered,
    Cancelled,
}

impl LifecycleStatus {
    pub fn label(&self) -> &'static str {
        match self {
            LifecycleStatus::Draft => "draft",
            LifecycleStatus::Confirmed => "confirmed",
            LifecycleStatus::Delivered => "delivered",
            LifecycleStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "draft" => Some(LifecycleStatus::Draft),
            "confirmed" => Some(LifecycleStatus::Confirmed),
            "delivered" => Some(LifecycleStatus::Delivered),
            "cancelled" => Some(LifecycleStatus::Cancelled),
            _ => None,
        }
    }
}

impl Default for LifecycleStatus {
    fn default() -> Self {
        LifecycleStatus::Confirmed
    }
}

/// A purchase commitment between a buyer and a seller for a product.
///
/// `fulfilled_quantity` counts the quantity of this commitment that is spoken
/// for: satisfied on its demand side, or drawn as spare capacity by another
/// commitment. It only ever grows and never exceeds `quantity`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Commitment {
    pub id: CommitmentId,
    pub buyer: CompanyId,
    pub seller: CompanyId,
    pub product: ProductId,
    /// Requested quantity
    pub quantity: i64,
    pub unit: String,
    pub delivery_date: NaiveDate,
    pub lifecycle_status: LifecycleStatus,
    pub fulfillment_state: FulfillmentState,
    pub fulfilled_quantity: i64,
    /// Set when this commitment was spawned to cover another commitment's
    /// shortfall (a chain allocation).
    pub parent_commitment_id: Option<CommitmentId>,
    pub created_by: ActorId,
    /// Last actor to change the record
    pub updated_by: ActorId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Commitment {
    /// Quantity still available: requested minus fulfilled.
    pub fn available(&self) -> i64 {
        (self.quantity - self.fulfilled_quantity).max(0)
    }

    /// Recompute the derived state. `Closed` is sticky.
    pub fn refresh_state(&mut self) {
        if self.fulfillment_state != FulfillmentState::Closed {
            self.fulfillment_state = FulfillmentState::derive(self.fulfilled_quantity, self.quantity);
        }
    }
}

/// Input to `CommitmentLedger::create`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewCommitment {
    pub buyer: CompanyId,
    pub seller: CompanyId,
    pub product: ProductId,
    pub quantity: i64,
    pub unit: String,
    pub delivery_date: NaiveDate,
    #[serde(default)]
    pub parent_commitment_id: Option<CommitmentId>,
    #[serde(default)]
    pub lifecycle_status: LifecycleStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_state_boundaries() {
        assert_eq!(FulfillmentState::derive(0, 1000), FulfillmentState::Open);
        assert_eq!(
            FulfillmentState::derive(1, 1000),
            FulfillmentState::PartiallyFulfilled
        );
        assert_eq!(
            FulfillmentState::derive(999, 1000),
            FulfillmentState::PartiallyFulfilled
        );
        assert_eq!(FulfillmentState::derive(1000, 1000), FulfillmentState::Fulfilled);
    }

    #[test]
    fn derive_state_is_pure() {
        for (fulfilled, requested) in [(0, 5), (3, 5), (5, 5), (7, 10)] {
            assert_eq!(
                FulfillmentState::derive(fulfilled, requested),
                FulfillmentState::derive(fulfilled, requested)
            );
        }
    }

    #[test]
    fn labels_round_trip() {
        for state in [
            FulfillmentState::Open,
            FulfillmentState::PartiallyFulfilled,
            FulfillmentState::Fulfilled,
            FulfillmentState::Closed,
        ] {
            assert_eq!(FulfillmentState::parse(state.label()), Some(state));
        }
        assert_eq!(LifecycleStatus::parse("confirmed"), Some(LifecycleStatus::Confirmed));
        assert_eq!(LifecycleStatus::parse("shipped"), None);
    }

    #[test]
    fn closed_is_sticky_on_refresh() {
        let now = Utc::now();
        let mut commitment = Commitment {
            id: CommitmentId::new(),
            buyer: CompanyId::new("brand"),
            seller: CompanyId::new("trader"),
            product: ProductId::new("cotton"),
            quantity: 10,
            unit: "kg".into(),
            delivery_date: now.date_naive(),
            lifecycle_status: LifecycleStatus::Delivered,
            fulfillment_state: FulfillmentState::Closed,
            fulfilled_quantity: 10,
            parent_commitment_id: None,
            created_by: ActorId::new("ops"),
            updated_by: ActorId::new("ops"),
            created_at: now,
            updated_at: now,
        };
        commitment.refresh_state();
        assert_eq!(commitment.fulfillment_state, FulfillmentState::Closed);
        assert_eq!(commitment.available(), 0);
    }
}
