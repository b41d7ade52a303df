//! PostgreSQL ledger backend.
//!
//! Every [`LedgerTx`] is a SERIALIZABLE transaction. `lock_*` read with
//! `SELECT ... FOR UPDATE` so a second writer on the same source blocks
//! until the first commits and then re-reads the smaller available
//! quantity. Serialization failures and deadlocks surface as
//! [`LedgerError::Contention`] for the planner to retry.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{PgExecutor, Postgres, Row, Transaction};
use supplynet_types::{
    ActorId, Allocation, AllocationId, AllocationSource, Commitment, CommitmentId, CompanyId,
    FulfillmentState, LifecycleStatus, Lot, LotId, LotOrigin, LotRelationship, LotStatus, PlanId,
    ProductId, ReasonCode, RelationshipId, RelationshipKind, SourceKind,
};
use tracing::debug;
use uuid::Uuid;

use crate::snapshot::LedgerSnapshot;
use crate::traits::{GraphSource, LedgerReader, LedgerStore, LedgerTx};
use crate::{LedgerError, LedgerResult};

const COMMITMENT_COLUMNS: &str = "id, buyer, seller, product, quantity, unit, delivery_date, \
     lifecycle_status, fulfillment_state, fulfilled_quantity, parent_commitment_id, created_by, \
     updated_by, created_at, updated_at";

const LOT_COLUMNS: &str = "id, owner, product, quantity, quantity_claimed, unit, production_date, \
     transparency_score, input_quantity, origin_kind, origin_commitment_id, status, created_by, \
     updated_by, created_at, updated_at";

const RELATIONSHIP_COLUMNS: &str = "id, parent_lot_id, child_lot_id, kind, quantity, \
     yield_percentage, quality_impact, created_by, created_at";

const ALLOCATION_COLUMNS: &str = "id, plan_id, demand_commitment_id, source_kind, \
     source_commitment_id, source_lot_id, quantity, unit, reason, created_by, created_at";

/// PostgreSQL-backed ledger store.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Connect and initialize the schema.
    pub async fn connect(database_url: &str) -> LedgerResult<Self> {
        Self::connect_with_options(database_url, 10, 5).await
    }

    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> LedgerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| LedgerError::Backend(format!("failed to connect postgres: {e}")))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub async fn from_pool(pool: PgPool) -> LedgerResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> LedgerResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS sn_commitments (
                id UUID PRIMARY KEY,
                buyer TEXT NOT NULL,
                seller TEXT NOT NULL,
                product TEXT NOT NULL,
                quantity BIGINT NOT NULL CHECK (quantity > 0),
                unit TEXT NOT NULL,
                delivery_date DATE NOT NULL,
                lifecycle_status TEXT NOT NULL,
                fulfillment_state TEXT NOT NULL,
                fulfilled_quantity BIGINT NOT NULL CHECK (fulfilled_quantity >= 0),
                parent_commitment_id UUID REFERENCES sn_commitments (id),
                created_by TEXT NOT NULL,
                updated_by TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                CHECK (fulfilled_quantity <= quantity)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS sn_lots (
                id UUID PRIMARY KEY,
                owner TEXT NOT NULL,
                product TEXT NOT NULL,
                quantity BIGINT NOT NULL CHECK (quantity >= 0),
                quantity_claimed BIGINT NOT NULL CHECK (quantity_claimed >= 0),
                unit TEXT NOT NULL,
                production_date DATE NOT NULL,
                transparency_score DOUBLE PRECISION NOT NULL,
                input_quantity BIGINT,
                origin_kind TEXT NOT NULL,
                origin_commitment_id UUID REFERENCES sn_commitments (id),
                status TEXT NOT NULL,
                created_by TEXT NOT NULL,
                updated_by TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                CHECK (quantity_claimed <= quantity)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS sn_lot_relationships (
                id UUID PRIMARY KEY,
                parent_lot_id UUID NOT NULL REFERENCES sn_lots (id),
                child_lot_id UUID NOT NULL REFERENCES sn_lots (id),
                kind TEXT NOT NULL,
                quantity BIGINT NOT NULL CHECK (quantity > 0),
                yield_percentage DOUBLE PRECISION,
                quality_impact TEXT,
                created_by TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS sn_allocations (
                id UUID PRIMARY KEY,
                plan_id UUID NOT NULL,
                demand_commitment_id UUID NOT NULL REFERENCES sn_commitments (id),
                source_kind TEXT NOT NULL,
                source_commitment_id UUID REFERENCES sn_commitments (id),
                source_lot_id UUID REFERENCES sn_lots (id),
                quantity BIGINT NOT NULL CHECK (quantity > 0),
                unit TEXT NOT NULL,
                reason TEXT NOT NULL,
                created_by TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                CHECK ((source_commitment_id IS NULL) <> (source_lot_id IS NULL))
            )
            "#,
            "CREATE INDEX IF NOT EXISTS sn_commitments_seller_idx ON sn_commitments (seller)",
            "CREATE INDEX IF NOT EXISTS sn_lots_owner_idx ON sn_lots (owner)",
            "CREATE INDEX IF NOT EXISTS sn_lots_origin_idx ON sn_lots (origin_commitment_id)",
            "CREATE INDEX IF NOT EXISTS sn_lot_relationships_child_idx ON sn_lot_relationships (child_lot_id)",
            "CREATE INDEX IF NOT EXISTS sn_allocations_demand_idx ON sn_allocations (demand_commitment_id)",
            "CREATE INDEX IF NOT EXISTS sn_allocations_plan_idx ON sn_allocations (plan_id)",
        ];

        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| LedgerError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerReader for PostgresLedger {
    async fn get_commitment(&self, id: &CommitmentId) -> LedgerResult<Option<Commitment>> {
        fetch_commitment(&self.pool, id, false).await
    }

    async fn get_lot(&self, id: &LotId) -> LedgerResult<Option<Lot>> {
        fetch_lot(&self.pool, id, false).await
    }

    async fn allocations_for_demand(&self, id: &CommitmentId) -> LedgerResult<Vec<Allocation>> {
        fetch_allocations(&self.pool, "demand_commitment_id", id.0).await
    }

    async fn relationships_for_child(&self, id: &LotId) -> LedgerResult<Vec<LotRelationship>> {
        fetch_relationships(&self.pool, id).await
    }

    async fn lots_delivered_for(&self, commitment_id: &CommitmentId) -> LedgerResult<Vec<Lot>> {
        let rows = sqlx::query(&format!(
            "SELECT {LOT_COLUMNS} FROM sn_lots WHERE origin_commitment_id = $1 ORDER BY id"
        ))
        .bind(commitment_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.iter().map(lot_from_row).collect()
    }

    async fn open_commitments_for_seller(
        &self,
        seller: &CompanyId,
    ) -> LedgerResult<Vec<Commitment>> {
        let rows = sqlx::query(&format!(
            "SELECT {COMMITMENT_COLUMNS} FROM sn_commitments \
             WHERE seller = $1 AND fulfillment_state IN ('open', 'partially_fulfilled') \
             ORDER BY id"
        ))
        .bind(seller.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.iter().map(commitment_from_row).collect()
    }

    async fn active_lots_for_owner(&self, owner: &CompanyId) -> LedgerResult<Vec<Lot>> {
        let rows = sqlx::query(&format!(
            "SELECT {LOT_COLUMNS} FROM sn_lots WHERE owner = $1 AND status = 'active' ORDER BY id"
        ))
        .bind(owner.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.iter().map(lot_from_row).collect()
    }

    async fn snapshot(&self) -> LedgerResult<LedgerSnapshot> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        let commitments = sqlx::query(&format!("SELECT {COMMITMENT_COLUMNS} FROM sn_commitments"))
            .fetch_all(&mut *tx)
            .await
            .map_err(map_sqlx)?
            .iter()
            .map(commitment_from_row)
            .collect::<LedgerResult<Vec<_>>>()?;
        let lots = sqlx::query(&format!("SELECT {LOT_COLUMNS} FROM sn_lots"))
            .fetch_all(&mut *tx)
            .await
            .map_err(map_sqlx)?
            .iter()
            .map(lot_from_row)
            .collect::<LedgerResult<Vec<_>>>()?;
        let relationships =
            sqlx::query(&format!("SELECT {RELATIONSHIP_COLUMNS} FROM sn_lot_relationships"))
                .fetch_all(&mut *tx)
                .await
                .map_err(map_sqlx)?
                .iter()
                .map(relationship_from_row)
                .collect::<LedgerResult<Vec<_>>>()?;
        let allocations = sqlx::query(&format!("SELECT {ALLOCATION_COLUMNS} FROM sn_allocations"))
            .fetch_all(&mut *tx)
            .await
            .map_err(map_sqlx)?
            .iter()
            .map(allocation_from_row)
            .collect::<LedgerResult<Vec<_>>>()?;
        tx.commit().await.map_err(map_sqlx)?;

        Ok(LedgerSnapshot::new(
            commitments,
            lots,
            relationships,
            allocations,
        ))
    }
}

#[async_trait]
impl LedgerStore for PostgresLedger {
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTx>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        Ok(Box::new(PostgresTx { tx }))
    }

    fn backend_label(&self) -> &'static str {
        "postgres"
    }
}

struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl GraphSource for PostgresTx {
    async fn commitment(&mut self, id: &CommitmentId) -> LedgerResult<Option<Commitment>> {
        fetch_commitment(&mut *self.tx, id, false).await
    }

    async fn lot(&mut self, id: &LotId) -> LedgerResult<Option<Lot>> {
        fetch_lot(&mut *self.tx, id, false).await
    }

    async fn allocations_for_demand(
        &mut self,
        id: &CommitmentId,
    ) -> LedgerResult<Vec<Allocation>> {
        fetch_allocations(&mut *self.tx, "demand_commitment_id", id.0).await
    }

    async fn relationships_for_child(&mut self, id: &LotId) -> LedgerResult<Vec<LotRelationship>> {
        fetch_relationships(&mut *self.tx, id).await
    }
}

#[async_trait]
impl LedgerTx for PostgresTx {
    async fn lock_commitment(&mut self, id: &CommitmentId) -> LedgerResult<Option<Commitment>> {
        fetch_commitment(&mut *self.tx, id, true).await
    }

    async fn lock_lot(&mut self, id: &LotId) -> LedgerResult<Option<Lot>> {
        fetch_lot(&mut *self.tx, id, true).await
    }

    async fn allocations_for_plan(&mut self, plan_id: &PlanId) -> LedgerResult<Vec<Allocation>> {
        fetch_allocations(&mut *self.tx, "plan_id", plan_id.0).await
    }

    async fn insert_commitment(&mut self, c: &Commitment) -> LedgerResult<()> {
        sqlx::query(&format!(
            "INSERT INTO sn_commitments ({COMMITMENT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
        ))
        .bind(c.id.0)
        .bind(c.buyer.as_str())
        .bind(c.seller.as_str())
        .bind(c.product.as_str())
        .bind(c.quantity)
        .bind(&c.unit)
        .bind(c.delivery_date)
        .bind(c.lifecycle_status.label())
        .bind(c.fulfillment_state.label())
        .bind(c.fulfilled_quantity)
        .bind(c.parent_commitment_id.map(|p| p.0))
        .bind(c.created_by.as_str())
        .bind(c.updated_by.as_str())
        .bind(c.created_at)
        .bind(c.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn update_commitment(&mut self, c: &Commitment) -> LedgerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sn_commitments
               SET fulfilled_quantity = $2,
                   fulfillment_state = $3,
                   lifecycle_status = $4,
                   updated_by = $5,
                   updated_at = $6
             WHERE id = $1
            "#,
        )
        .bind(c.id.0)
        .bind(c.fulfilled_quantity)
        .bind(c.fulfillment_state.label())
        .bind(c.lifecycle_status.label())
        .bind(c.updated_by.as_str())
        .bind(c.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound(c.id.to_string()));
        }
        Ok(())
    }

    async fn insert_lot(&mut self, lot: &Lot) -> LedgerResult<()> {
        let (origin_kind, origin_commitment) = origin_columns(&lot.origin);
        sqlx::query(&format!(
            "INSERT INTO sn_lots ({LOT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"
        ))
        .bind(lot.id.0)
        .bind(lot.owner.as_str())
        .bind(lot.product.as_str())
        .bind(lot.quantity)
        .bind(lot.quantity_claimed)
        .bind(&lot.unit)
        .bind(lot.production_date)
        .bind(lot.transparency_score)
        .bind(lot.input_quantity)
        .bind(origin_kind)
        .bind(origin_commitment)
        .bind(lot.status.label())
        .bind(lot.created_by.as_str())
        .bind(lot.updated_by.as_str())
        .bind(lot.created_at)
        .bind(lot.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn update_lot(&mut self, lot: &Lot) -> LedgerResult<()> {
        let (origin_kind, origin_commitment) = origin_columns(&lot.origin);
        let result = sqlx::query(
            r#"
            UPDATE sn_lots
               SET quantity = $2,
                   quantity_claimed = $3,
                   input_quantity = $4,
                   origin_kind = $5,
                   origin_commitment_id = $6,
                   status = $7,
                   updated_by = $8,
                   updated_at = $9
             WHERE id = $1
            "#,
        )
        .bind(lot.id.0)
        .bind(lot.quantity)
        .bind(lot.quantity_claimed)
        .bind(lot.input_quantity)
        .bind(origin_kind)
        .bind(origin_commitment)
        .bind(lot.status.label())
        .bind(lot.updated_by.as_str())
        .bind(lot.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound(lot.id.to_string()));
        }
        Ok(())
    }

    async fn insert_relationship(&mut self, r: &LotRelationship) -> LedgerResult<()> {
        sqlx::query(&format!(
            "INSERT INTO sn_lot_relationships ({RELATIONSHIP_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(r.id.0)
        .bind(r.parent_lot_id.0)
        .bind(r.child_lot_id.0)
        .bind(r.kind.label())
        .bind(r.quantity)
        .bind(r.yield_percentage)
        .bind(r.quality_impact.as_deref())
        .bind(r.created_by.as_str())
        .bind(r.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn insert_allocation(&mut self, a: &Allocation) -> LedgerResult<()> {
        sqlx::query(&format!(
            "INSERT INTO sn_allocations ({ALLOCATION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(a.id.0)
        .bind(a.plan_id.0)
        .bind(a.demand_commitment_id.0)
        .bind(a.source.kind().label())
        .bind(a.source.commitment_id().map(|c| c.0))
        .bind(a.source.lot_id().map(|l| l.0))
        .bind(a.quantity)
        .bind(&a.unit)
        .bind(a.reason.label())
        .bind(a.created_by.as_str())
        .bind(a.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> LedgerResult<()> {
        self.tx.commit().await.map_err(map_sqlx)?;
        debug!("postgres transaction committed");
        Ok(())
    }
}

async fn fetch_commitment<'e, E: PgExecutor<'e>>(
    executor: E,
    id: &CommitmentId,
    for_update: bool,
) -> LedgerResult<Option<Commitment>> {
    let lock = if for_update { " FOR UPDATE" } else { "" };
    let row = sqlx::query(&format!(
        "SELECT {COMMITMENT_COLUMNS} FROM sn_commitments WHERE id = $1{lock}"
    ))
    .bind(id.0)
    .fetch_optional(executor)
    .await
    .map_err(map_sqlx)?;
    row.as_ref().map(commitment_from_row).transpose()
}

async fn fetch_lot<'e, E: PgExecutor<'e>>(
    executor: E,
    id: &LotId,
    for_update: bool,
) -> LedgerResult<Option<Lot>> {
    let lock = if for_update { " FOR UPDATE" } else { "" };
    let row = sqlx::query(&format!("SELECT {LOT_COLUMNS} FROM sn_lots WHERE id = $1{lock}"))
        .bind(id.0)
        .fetch_optional(executor)
        .await
        .map_err(map_sqlx)?;
    row.as_ref().map(lot_from_row).transpose()
}

async fn fetch_allocations<'e, E: PgExecutor<'e>>(
    executor: E,
    column: &'static str,
    key: Uuid,
) -> LedgerResult<Vec<Allocation>> {
    let rows = sqlx::query(&format!(
        "SELECT {ALLOCATION_COLUMNS} FROM sn_allocations WHERE {column} = $1 \
         ORDER BY created_at, id"
    ))
    .bind(key)
    .fetch_all(executor)
    .await
    .map_err(map_sqlx)?;
    rows.iter().map(allocation_from_row).collect()
}

async fn fetch_relationships<'e, E: PgExecutor<'e>>(
    executor: E,
    child: &LotId,
) -> LedgerResult<Vec<LotRelationship>> {
    let rows = sqlx::query(&format!(
        "SELECT {RELATIONSHIP_COLUMNS} FROM sn_lot_relationships WHERE child_lot_id = $1 \
         ORDER BY created_at, id"
    ))
    .bind(child.0)
    .fetch_all(executor)
    .await
    .map_err(map_sqlx)?;
    rows.iter().map(relationship_from_row).collect()
}

fn origin_columns(origin: &LotOrigin) -> (&'static str, Option<Uuid>) {
    match origin {
        LotOrigin::Produced => ("produced", None),
        LotOrigin::Derived => ("derived", None),
        LotOrigin::Delivered { commitment_id } => ("delivered", Some(commitment_id.0)),
    }
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> LedgerResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| LedgerError::Backend(format!("column {column}: {e}")))
}

fn parse_label<T>(raw: &str, parse: impl Fn(&str) -> Option<T>, what: &str) -> LedgerResult<T> {
    parse(raw).ok_or_else(|| LedgerError::Serialization(format!("unknown {what} '{raw}'")))
}

fn commitment_from_row(row: &PgRow) -> LedgerResult<Commitment> {
    let lifecycle: String = get(row, "lifecycle_status")?;
    let state: String = get(row, "fulfillment_state")?;
    Ok(Commitment {
        id: CommitmentId(get(row, "id")?),
        buyer: CompanyId::new(get::<String>(row, "buyer")?),
        seller: CompanyId::new(get::<String>(row, "seller")?),
        product: ProductId::new(get::<String>(row, "product")?),
        quantity: get(row, "quantity")?,
        unit: get(row, "unit")?,
        delivery_date: get::<NaiveDate>(row, "delivery_date")?,
        lifecycle_status: parse_label(&lifecycle, LifecycleStatus::parse, "lifecycle status")?,
        fulfillment_state: parse_label(&state, FulfillmentState::parse, "fulfillment state")?,
        fulfilled_quantity: get(row, "fulfilled_quantity")?,
        parent_commitment_id: get::<Option<Uuid>>(row, "parent_commitment_id")?.map(CommitmentId),
        created_by: ActorId::new(get::<String>(row, "created_by")?),
        updated_by: ActorId::new(get::<String>(row, "updated_by")?),
        created_at: get::<DateTime<Utc>>(row, "created_at")?,
        updated_at: get::<DateTime<Utc>>(row, "updated_at")?,
    })
}

fn lot_from_row(row: &PgRow) -> LedgerResult<Lot> {
    let origin_kind: String = get(row, "origin_kind")?;
    let origin_commitment: Option<Uuid> = get(row, "origin_commitment_id")?;
    let origin = match (origin_kind.as_str(), origin_commitment) {
        ("produced", _) => LotOrigin::Produced,
        ("derived", _) => LotOrigin::Derived,
        ("delivered", Some(c)) => LotOrigin::Delivered {
            commitment_id: CommitmentId(c),
        },
        (other, _) => {
            return Err(LedgerError::Serialization(format!(
                "invalid lot origin '{other}'"
            )))
        }
    };
    let status: String = get(row, "status")?;
    Ok(Lot {
        id: LotId(get(row, "id")?),
        owner: CompanyId::new(get::<String>(row, "owner")?),
        product: ProductId::new(get::<String>(row, "product")?),
        quantity: get(row, "quantity")?,
        quantity_claimed: get(row, "quantity_claimed")?,
        unit: get(row, "unit")?,
        production_date: get::<NaiveDate>(row, "production_date")?,
        transparency_score: get(row, "transparency_score")?,
        input_quantity: get(row, "input_quantity")?,
        origin,
        status: parse_label(&status, LotStatus::parse, "lot status")?,
        created_by: ActorId::new(get::<String>(row, "created_by")?),
        updated_by: ActorId::new(get::<String>(row, "updated_by")?),
        created_at: get::<DateTime<Utc>>(row, "created_at")?,
        updated_at: get::<DateTime<Utc>>(row, "updated_at")?,
    })
}

fn relationship_from_row(row: &PgRow) -> LedgerResult<LotRelationship> {
    let kind: String = get(row, "kind")?;
    Ok(LotRelationship {
        id: RelationshipId(get(row, "id")?),
        parent_lot_id: LotId(get(row, "parent_lot_id")?),
        child_lot_id: LotId(get(row, "child_lot_id")?),
        kind: parse_label(&kind, RelationshipKind::parse, "relationship kind")?,
        quantity: get(row, "quantity")?,
        yield_percentage: get(row, "yield_percentage")?,
        quality_impact: get(row, "quality_impact")?,
        created_by: ActorId::new(get::<String>(row, "created_by")?),
        created_at: get::<DateTime<Utc>>(row, "created_at")?,
    })
}

fn allocation_from_row(row: &PgRow) -> LedgerResult<Allocation> {
    let kind: String = get(row, "source_kind")?;
    let source_commitment: Option<Uuid> = get(row, "source_commitment_id")?;
    let source_lot: Option<Uuid> = get(row, "source_lot_id")?;
    let source = match (
        parse_label(&kind, SourceKind::parse, "source kind")?,
        source_commitment,
        source_lot,
    ) {
        (SourceKind::Commitment, Some(c), None) => AllocationSource::Commitment {
            commitment_id: CommitmentId(c),
        },
        (SourceKind::Chain, Some(c), None) => AllocationSource::Chain {
            commitment_id: CommitmentId(c),
        },
        (SourceKind::Inventory, None, Some(l)) => AllocationSource::Inventory { lot_id: LotId(l) },
        (kind, _, _) => {
            return Err(LedgerError::Serialization(format!(
                "allocation source columns do not match kind '{}'",
                kind.label()
            )))
        }
    };
    let reason: String = get(row, "reason")?;
    Ok(Allocation {
        id: AllocationId(get(row, "id")?),
        plan_id: PlanId(get(row, "plan_id")?),
        demand_commitment_id: CommitmentId(get(row, "demand_commitment_id")?),
        source,
        quantity: get(row, "quantity")?,
        unit: get(row, "unit")?,
        reason: parse_label(&reason, ReasonCode::parse, "reason code")?,
        created_by: ActorId::new(get::<String>(row, "created_by")?),
        created_at: get::<DateTime<Utc>>(row, "created_at")?,
    })
}

/// Map driver errors onto the ledger taxonomy. Serialization failures and
/// deadlocks are transient.
fn map_sqlx(err: sqlx::Error) -> LedgerError {
    if let sqlx::Error::Database(db_err) = &err {
        match db_err.code().as_deref() {
            Some("40001") | Some("40P01") | Some("55P03") => {
                return LedgerError::Contention(db_err.message().to_string())
            }
            Some("23505") => return LedgerError::Conflict(db_err.message().to_string()),
            Some("23503") | Some("23514") => {
                return LedgerError::InvalidInput(db_err.message().to_string())
            }
            _ => {}
        }
    }
    LedgerError::Backend(err.to_string())
}
