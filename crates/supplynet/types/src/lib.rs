//! # supplynet-types
//!
//! Shared vocabulary for the supply network fulfillment engine:
//!
//! - **Commitment**: a demand/supply contract between two companies, with a
//!   fulfillment state derived from its counters
//! - **Lot**: physical, attributable inventory with a provenance anchor
//! - **LotRelationship**: split/merge/transformation edge between lots
//! - **Allocation**: the append-only edge that records how a commitment was
//!   satisfied, from another commitment, from a lot, or from a new chain
//!
//! Commitments and lots never point at each other in both directions. The
//! graph is always reconstructed by walking allocations and relationships.

#![deny(unsafe_code)]

pub mod allocation;
pub mod commitment;
pub mod ids;
pub mod lot;
pub mod plan;

pub use allocation::{Allocation, AllocationSource, ReasonCode, SourceKind};
pub use commitment::{Commitment, FulfillmentState, LifecycleStatus, NewCommitment};
pub use ids::{ActorId, AllocationId, CommitmentId, CompanyId, LotId, PlanId, ProductId, RelationshipId};
pub use lot::{Lot, LotInput, LotOrigin, LotRelationship, LotStatus, NewLot, RelationshipKind};
pub use plan::{AllocationRequest, FulfillmentPlan};
