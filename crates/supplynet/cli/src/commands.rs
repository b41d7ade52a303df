//! Subcommands and their execution against a [`FulfillmentService`].

use std::time::Duration;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::Subcommand;
use serde::Serialize;
use supplynet_engine::FulfillmentService;
use supplynet_ledger::{DeliveryLot, LedgerStore};
use supplynet_types::{
    ActorId, AllocationRequest, CommitmentId, CompanyId, FulfillmentPlan, LotId, LotInput,
    NewCommitment, NewLot, PlanId, ProductId, RelationshipKind,
};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Spare capacity and eligible suppliers for a commitment
    Options {
        commitment: CommitmentId,
    },

    /// Submit a fulfillment plan
    Submit {
        /// Demand commitment
        commitment: CommitmentId,

        /// Ordered requests: `commitment:<id>:<qty>`, `lot:<id>:<qty>`,
        /// `chain:<company>:<qty>`
        #[arg(short, long = "request", value_parser = parse_request, required = true)]
        requests: Vec<AllocationRequest>,

        /// Idempotency key; reuse it to resubmit after a timeout
        #[arg(long)]
        plan_id: Option<PlanId>,

        /// Overrides `engine.plan.default_timeout_ms`
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Total spare commitment and inventory capacity of a company
    Capacity {
        company: String,
    },

    /// Upstream provenance of a lot
    Trace {
        lot: LotId,
    },

    /// Walk the graph below a commitment and report its shape
    ValidateGraph {
        commitment: CommitmentId,
    },

    /// Create a commitment
    Commit {
        #[arg(long)]
        buyer: String,
        #[arg(long)]
        seller: String,
        #[arg(long)]
        product: String,
        #[arg(long)]
        quantity: i64,
        #[arg(long, default_value = "kg")]
        unit: String,
        #[arg(long)]
        delivery_date: NaiveDate,
        #[arg(long)]
        parent: Option<CommitmentId>,
    },

    /// Record a produced or derived lot
    Lot {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        product: String,
        #[arg(long)]
        quantity: i64,
        #[arg(long, default_value = "kg")]
        unit: String,
        #[arg(long)]
        production_date: NaiveDate,
        #[arg(long, default_value_t = 0.0)]
        score: f64,
        /// Parent lots: `<kind>:<lot id>:<qty>`
        #[arg(long = "input", value_parser = parse_input)]
        inputs: Vec<LotInput>,
        /// Declared input quantity; merge and transformation inputs must sum to it
        #[arg(long)]
        input_quantity: Option<i64>,
    },

    /// Record the lot received against a commitment
    Deliver {
        commitment: CommitmentId,
        #[arg(long)]
        quantity: i64,
        #[arg(long, default_value = "kg")]
        unit: String,
        #[arg(long)]
        production_date: NaiveDate,
        #[arg(long, default_value_t = 0.0)]
        score: f64,
    },

    /// Add a relationship edge from a parent lot to an existing child lot
    Link {
        parent: LotId,
        child: LotId,
        #[arg(long, value_parser = parse_kind)]
        kind: RelationshipKind,
        #[arg(long)]
        quantity: i64,
    },

    /// Close a fulfilled commitment
    Close {
        commitment: CommitmentId,
    },

    /// Re-check ledger invariants
    Audit,

    /// Dump every ledger table as JSON
    Snapshot,
}

impl Commands {
    /// Whether the command writes to the ledger.
    pub fn mutates(&self) -> bool {
        matches!(
            self,
            Commands::Submit { .. }
                | Commands::Commit { .. }
                | Commands::Lot { .. }
                | Commands::Deliver { .. }
                | Commands::Link { .. }
                | Commands::Close { .. }
        )
    }
}

pub async fn execute<S: LedgerStore + 'static>(
    command: Commands,
    service: &FulfillmentService<S>,
    actor: &ActorId,
) -> anyhow::Result<()> {
    match command {
        Commands::Options { commitment } => print(&service.get_fulfillment_options(&commitment).await?),
        Commands::Submit {
            commitment,
            requests,
            plan_id,
            timeout_ms,
        } => {
            let mut plan = FulfillmentPlan::new(commitment, requests);
            if let Some(plan_id) = plan_id {
                plan.plan_id = plan_id;
            }
            let timeout = timeout_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| service.config().plan.default_timeout());
            let outcome = service
                .submit_fulfillment_plan_within(&plan, actor, timeout)
                .await
                .with_context(|| format!("plan {} rejected", plan.plan_id))?;
            print(&outcome)
        }
        Commands::Capacity { company } => {
            print(&service.get_available_capacity(&CompanyId::new(company)).await?)
        }
        Commands::Trace { lot } => print(&service.trace_lot(&lot).await?),
        Commands::ValidateGraph { commitment } => print(&service.validate_graph(&commitment).await?),
        Commands::Commit {
            buyer,
            seller,
            product,
            quantity,
            unit,
            delivery_date,
            parent,
        } => {
            let commitment = service
                .create_commitment(
                    NewCommitment {
                        buyer: CompanyId::new(buyer),
                        seller: CompanyId::new(seller),
                        product: ProductId::new(product),
                        quantity,
                        unit,
                        delivery_date,
                        parent_commitment_id: parent,
                        lifecycle_status: Default::default(),
                    },
                    actor,
                )
                .await?;
            print(&commitment)
        }
        Commands::Lot {
            owner,
            product,
            quantity,
            unit,
            production_date,
            score,
            inputs,
            input_quantity,
        } => {
            let lot = service
                .record_lot(
                    NewLot {
                        owner: CompanyId::new(owner),
                        product: ProductId::new(product),
                        quantity,
                        unit,
                        production_date,
                        transparency_score: score,
                        input_quantity,
                        inputs,
                    },
                    actor,
                )
                .await?;
            print(&lot)
        }
        Commands::Deliver {
            commitment,
            quantity,
            unit,
            production_date,
            score,
        } => {
            let lot = service
                .record_delivery(
                    &commitment,
                    DeliveryLot {
                        quantity,
                        unit,
                        production_date,
                        transparency_score: score,
                    },
                    actor,
                )
                .await?;
            print(&lot)
        }
        Commands::Link {
            parent,
            child,
            kind,
            quantity,
        } => print(&service.link_lots(&parent, &child, kind, quantity, actor).await?),
        Commands::Close { commitment } => print(&service.close_commitment(&commitment, actor).await?),
        Commands::Audit => {
            let violations = service.audit().await?;
            print(&violations)?;
            if !violations.is_empty() {
                bail!("{} invariant violation(s)", violations.len());
            }
            Ok(())
        }
        Commands::Snapshot => print(&service.snapshot().await?),
    }
}

fn print<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// `kind:target:quantity`
fn parse_request(raw: &str) -> Result<AllocationRequest, String> {
    let (kind, rest) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected kind:target:quantity, got `{raw}`"))?;
    let (target, quantity) = split_quantity(rest)?;
    match kind {
        "commitment" => Ok(AllocationRequest::from_commitment(
            target.parse().map_err(|e| format!("bad commitment id `{target}`: {e}"))?,
            quantity,
        )),
        "lot" => Ok(AllocationRequest::from_inventory(
            target.parse().map_err(|e| format!("bad lot id `{target}`: {e}"))?,
            quantity,
        )),
        "chain" => Ok(AllocationRequest::from_new_chain(CompanyId::new(target), quantity)),
        other => Err(format!("unknown request kind `{other}`")),
    }
}

/// `kind:lot:quantity`
fn parse_input(raw: &str) -> Result<LotInput, String> {
    let (kind, rest) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected kind:lot:quantity, got `{raw}`"))?;
    let (lot, quantity) = split_quantity(rest)?;
    Ok(LotInput {
        parent_lot_id: lot.parse().map_err(|e| format!("bad lot id `{lot}`: {e}"))?,
        kind: parse_kind(kind)?,
        quantity,
        yield_percentage: None,
        quality_impact: None,
    })
}

fn parse_kind(raw: &str) -> Result<RelationshipKind, String> {
    RelationshipKind::parse(raw).ok_or_else(|| format!("unknown relationship kind `{raw}`"))
}

fn split_quantity(raw: &str) -> Result<(&str, i64), String> {
    let (target, quantity) = raw
        .rsplit_once(':')
        .ok_or_else(|| format!("missing quantity in `{raw}`"))?;
    let quantity = quantity
        .parse()
        .map_err(|e| format!("bad quantity `{quantity}`: {e}"))?;
    Ok((target, quantity))
}
