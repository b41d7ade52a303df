use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ActorId, CommitmentId, CompanyId, LotId, ProductId, RelationshipId};

/// Lot status. Lots are never deleted, only marked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LotStatus {
    Active,
    Exhausted,
    Withdrawn,
}

impl LotStatus {
    pub fn label(&self) -> &'static str {
        match self {
            LotStatus::Active => "active",
            LotStatus::Exhausted => "exhausted",
            LotStatus::Withdrawn => "withdrawn",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(LotStatus::Active),
            "exhausted" => Some(LotStatus::Exhausted),
            "withdrawn" => Some(LotStatus::Withdrawn),
            _ => None,
        }
    }
}

/// Provenance anchor of a lot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LotOrigin {
    /// Produced directly, no parent lots. An origin lot.
    Produced,
    /// Produced by consuming parent lot(s); the edges live in the
    /// relationship table.
    Derived,
    /// Received against a commitment. Its upstream is whatever the
    /// commitment was allocated from.
    Delivered { commitment_id: CommitmentId },
}

/// A quantity of physical, attributable inventory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lot {
    pub id: LotId,
    pub owner: CompanyId,
    pub product: ProductId,
    /// Quantity remaining on hand
    pub quantity: i64,
    /// Quantity already claimed by allocations and child lots
    pub quantity_claimed: i64,
    pub unit: String,
    pub production_date: NaiveDate,
    /// Own transparency score in [0, 100]
    pub transparency_score: f64,
    /// Declared input quantity for lots produced from parents
    pub input_quantity: Option<i64>,
    pub origin: LotOrigin,
    pub status: LotStatus,
    pub created_by: ActorId,
    /// Last actor to change the record
    pub updated_by: ActorId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lot {
    /// Available for allocation: remaining minus claimed.
    pub fn available(&self) -> i64 {
        (self.quantity - self.quantity_claimed).max(0)
    }

    pub fn is_origin(&self) -> bool {
        matches!(self.origin, LotOrigin::Produced)
    }

    pub fn is_allocatable(&self) -> bool {
        self.status == LotStatus::Active && self.available() > 0
    }

    /// Mark exhausted once every unit is claimed. Withdrawn is left alone.
    pub fn refresh_status(&mut self) {
        if self.status == LotStatus::Active && self.available() == 0 {
            self.status = LotStatus::Exhausted;
        }
    }
}

/// Kind of lot-to-lot relationship.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    InputMaterial,
    Split,
    Merge,
    Transformation,
    Sale,
}

impl RelationshipKind {
    /// Kinds whose contributions must add up to the child's declared input.
    pub fn requires_input_balance(&self) -> bool {
        matches!(self, RelationshipKind::Merge | RelationshipKind::Transformation)
    }

    /// Kinds that change the material and therefore decay transparency.
    pub fn is_transformative(&self) -> bool {
        matches!(
            self,
            RelationshipKind::InputMaterial
                | RelationshipKind::Merge
                | RelationshipKind::Transformation
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            RelationshipKind::InputMaterial => "input_material",
            RelationshipKind::Split => "split",
            RelationshipKind::Merge => "merge",
            RelationshipKind::Transformation => "transformation",
            RelationshipKind::Sale => "sale",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "input_material" => Some(RelationshipKind::InputMaterial),
            "split" => Some(RelationshipKind::Split),
            "merge" => Some(RelationshipKind::Merge),
            "transformation" => Some(RelationshipKind::Transformation),
            "sale" => Some(RelationshipKind::Sale),
            _ => None,
        }
    }
}

/// Edge recording that `child_lot_id` was produced (in part) from
/// `parent_lot_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LotRelationship {
    pub id: RelationshipId,
    pub parent_lot_id: LotId,
    pub child_lot_id: LotId,
    pub kind: RelationshipKind,
    /// Quantity of the parent consumed into the child
    pub quantity: i64,
    pub yield_percentage: Option<f64>,
    pub quality_impact: Option<String>,
    pub created_by: ActorId,
    pub created_at: DateTime<Utc>,
}

/// One parent contribution of a lot being recorded or linked.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LotInput {
    pub parent_lot_id: LotId,
    pub kind: RelationshipKind,
    pub quantity: i64,
    #[serde(default)]
    pub yield_percentage: Option<f64>,
    #[serde(default)]
    pub quality_impact: Option<String>,
}

/// Input to `InventoryLedger::record_lot`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewLot {
    pub owner: CompanyId,
    pub product: ProductId,
    pub quantity: i64,
    pub unit: String,
    pub production_date: NaiveDate,
    pub transparency_score: f64,
    #[serde(default)]
    pub input_quantity: Option<i64>,
    #[serde(default)]
    pub inputs: Vec<LotInput>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lot(quantity: i64, claimed: i64) -> Lot {
        let now = Utc::now();
        Lot {
            id: LotId::new(),
            owner: CompanyId::new("processor"),
            product: ProductId::new("yarn"),
            quantity,
            quantity_claimed: claimed,
            unit: "kg".into(),
            production_date: now.date_naive(),
            transparency_score: 80.0,
            input_quantity: None,
            origin: LotOrigin::Produced,
            status: LotStatus::Active,
            created_by: ActorId::new("ops"),
            updated_by: ActorId::new("ops"),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn available_subtracts_claims() {
        assert_eq!(lot(200, 150).available(), 50);
        assert!(lot(200, 150).is_allocatable());
        assert!(!lot(200, 200).is_allocatable());
    }

    #[test]
    fn exhausted_once_fully_claimed() {
        let mut l = lot(100, 100);
        l.refresh_status();
        assert_eq!(l.status, LotStatus::Exhausted);

        let mut withdrawn = lot(100, 100);
        withdrawn.status = LotStatus::Withdrawn;
        withdrawn.refresh_status();
        assert_eq!(withdrawn.status, LotStatus::Withdrawn);
    }

    #[test]
    fn origin_tagging() {
        let delivered = LotOrigin::Delivered {
            commitment_id: CommitmentId(uuid::Uuid::nil()),
        };
        let json = serde_json::to_value(&delivered).unwrap();
        assert_eq!(json["kind"], "delivered");
        assert!(lot(1, 0).is_origin());
    }

    #[test]
    fn relationship_kind_classes() {
        assert!(RelationshipKind::Merge.requires_input_balance());
        assert!(!RelationshipKind::Split.requires_input_balance());
        assert!(RelationshipKind::InputMaterial.is_transformative());
        assert!(!RelationshipKind::Sale.is_transformative());
        assert_eq!(
            RelationshipKind::parse(RelationshipKind::Transformation.label()),
            Some(RelationshipKind::Transformation)
        );
    }
}
