use supplynet_ledger::LedgerError;
use thiserror::Error;

pub type FulfillmentResult<T> = Result<T, FulfillmentError>;

/// Errors surfaced by the engine operations.
#[derive(Error, Debug)]
pub enum FulfillmentError {
    // --- Deterministic validation errors, never retried ---
    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient capacity on {supply}: requested {requested}, available {available}")]
    InsufficientCapacity {
        supply: String,
        requested: i64,
        available: i64,
    },

    #[error("allocating {demand} from {via} would create a cycle")]
    CycleDetected { demand: String, via: String },

    #[error("graph walk exceeded max depth {max_depth}")]
    DepthExceeded { max_depth: usize },

    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition { id: String, from: String, to: String },

    // --- Plan-level errors ---
    #[error("plan rejected at request {index}: {source}")]
    PlanRejected {
        index: usize,
        #[source]
        source: Box<FulfillmentError>,
    },

    #[error("plan total {requested} exceeds remaining shortfall {shortfall} of {commitment}")]
    ExceedsShortfall {
        commitment: String,
        requested: i64,
        shortfall: i64,
    },

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    // --- Transient / operational ---
    #[error("capacity contention persisted after {attempts} attempts")]
    CapacityContention { attempts: u32 },

    #[error("operation timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("storage error: {0}")]
    Storage(LedgerError),
}

impl FulfillmentError {
    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            FulfillmentError::CapacityContention { .. } => true,
            FulfillmentError::Storage(e) => e.is_contention(),
            _ => false,
        }
    }

    /// Wrap a failure of plan request `index`. Transient errors pass through
    /// so the retry loop still sees them.
    pub fn rejected_at(index: usize, err: FulfillmentError) -> Self {
        if err.is_retryable() {
            err
        } else {
            FulfillmentError::PlanRejected {
                index,
                source: Box::new(err),
            }
        }
    }
}

impl From<LedgerError> for FulfillmentError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(what) => FulfillmentError::NotFound(what),
            LedgerError::InsufficientCapacity {
                commitment,
                requested,
                available,
            } => FulfillmentError::InsufficientCapacity {
                supply: commitment,
                requested,
                available,
            },
            LedgerError::InsufficientInventory {
                lot,
                requested,
                available,
            } => FulfillmentError::InsufficientCapacity {
                supply: lot,
                requested,
                available,
            },
            LedgerError::InvalidTransition { id, from, to } => {
                FulfillmentError::InvalidTransition { id, from, to }
            }
            other => FulfillmentError::Storage(other),
        }
    }
}
