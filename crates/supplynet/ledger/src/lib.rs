//! Ledgers of the supply network.
//!
//! - **Commitment Ledger**: create, record fulfillment, close
//! - **Inventory Ledger**: record lots and deliveries, claim, link lots
//! - **Allocation Ledger**: append-only join table between the two
//!
//! Every mutation runs inside a [`LedgerTx`] obtained from a [`LedgerStore`].
//! A transaction re-reads the records it changes, validates against what it
//! read, and writes in the same unit, so two writers can never both consume
//! the same unit of capacity. Dropping a transaction without committing it
//! discards every staged write.
//!
//! Backends:
//! - [`memory::InMemoryLedger`]: single writer, deterministic
//! - `postgres::PostgresLedger` (feature `postgres`): SERIALIZABLE
//!   transactions with row locks on the consumed source

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod allocations;
mod commitments;
mod error;
mod inventory;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
mod snapshot;
mod traits;

pub use allocations::AllocationLedger;
pub use commitments::CommitmentLedger;
pub use error::{LedgerError, LedgerResult};
pub use inventory::{DeliveryLot, InventoryLedger};
pub use memory::InMemoryLedger;
pub use snapshot::{InvariantViolation, LedgerSnapshot};
pub use traits::{GraphSource, LedgerReader, LedgerStore, LedgerTx, ReadView};
