use thiserror::Error;

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger and storage errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Transient: a concurrent transaction touched the same record. Safe to
    /// retry the whole transaction.
    #[error("contention: {0}")]
    Contention(String),

    #[error("insufficient inventory on {lot}: requested {requested}, available {available}")]
    InsufficientInventory {
        lot: String,
        requested: i64,
        available: i64,
    },

    #[error("insufficient capacity on {commitment}: requested {requested}, available {available}")]
    InsufficientCapacity {
        commitment: String,
        requested: i64,
        available: i64,
    },

    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl LedgerError {
    pub fn is_contention(&self) -> bool {
        matches!(self, LedgerError::Contention(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_inventory_display() {
        let err = LedgerError::InsufficientInventory {
            lot: "lot:1".into(),
            requested: 300,
            available: 200,
        };
        let s = err.to_string();
        assert!(s.contains("lot:1"));
        assert!(s.contains("300"));
        assert!(s.contains("200"));
    }

    #[test]
    fn only_contention_is_transient() {
        assert!(LedgerError::Contention("40001".into()).is_contention());
        assert!(!LedgerError::Conflict("dup".into()).is_contention());
    }
}
