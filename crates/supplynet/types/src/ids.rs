use serde::{Deserialize, Serialize};

/// Strong typed IDs used throughout the supply network.
///
/// Ledger-owned records (commitments, lots, relationships, allocations,
/// plans) carry UUID identities. Companies, products and actors come from
/// external services and are treated as opaque strings.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub uuid::Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }

        impl From<uuid::Uuid> for $name {
            fn from(value: uuid::Uuid) -> Self {
                Self(value)
            }
        }

        /// Accepts the display form (`prefix:uuid`) or a bare UUID.
        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                let raw = raw.strip_prefix(concat!($prefix, ":")).unwrap_or(raw);
                uuid::Uuid::parse_str(raw).map(Self)
            }
        }
    };
}

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Identity of a purchase commitment.
    CommitmentId,
    "cmt"
);
uuid_id!(
    /// Identity of a physical inventory lot.
    LotId,
    "lot"
);
uuid_id!(AllocationId, "alc");
uuid_id!(RelationshipId, "rel");
uuid_id!(
    /// Idempotency key of a fulfillment plan. Every allocation written by a
    /// plan records it.
    PlanId,
    "plan"
);

opaque_id!(
    /// Company identity resolved by the reference data service.
    CompanyId
);
opaque_id!(ProductId);
opaque_id!(
    /// Acting user attached to every ledger mutation for the audit trail.
    ActorId
);
