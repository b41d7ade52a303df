//! # supplynet-engine
//!
//! Network fulfillment and traceability engine.
//!
//! - [`validator::GraphValidator`]: capacity and acyclicity checks on the
//!   commitment/lot graph, plus full-graph diagnostics
//! - [`planner::FulfillmentPlanner`]: applies mixed plans (commitment slack,
//!   stock, new supplier chains) all-or-nothing with bounded contention retry
//! - [`tracer::Tracer`]: upstream provenance of a lot with a pluggable
//!   transparency decay
//! - [`service::FulfillmentService`]: the exposed operations
//!
//! ```text
//! GetFulfillmentOptions ─┐
//! SubmitFulfillmentPlan ─┼─► FulfillmentService ─► Planner ─► Validator ─► LedgerTx
//! GetAvailableCapacity  ─┤                      └► Tracer / ReadCache ─► LedgerReader
//! TraceLot              ─┤
//! ValidateGraph         ─┘
//! ```

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod cache;
pub mod config;
pub mod directory;
pub mod error;
pub mod planner;
pub mod retry;
pub mod scoring;
pub mod service;
pub mod tracer;
pub mod validator;

pub use config::EngineConfig;
pub use directory::{StaticSupplierDirectory, SupplierDirectory};
pub use error::{FulfillmentError, FulfillmentResult};
pub use planner::{FulfillmentPlanner, PlanOutcome};
pub use retry::RetryPolicy;
pub use scoring::{DecayConfig, DecayPolicy, LinearDecay, MultiplicativeDecay, NoDecay};
pub use service::{CompanyCapacity, FulfillmentOptions, FulfillmentService};
pub use tracer::{LotTrace, TraceHop, TraceLink, Tracer};
pub use validator::{GraphNode, GraphReport, GraphValidator};
