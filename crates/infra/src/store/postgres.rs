//! Postgres-backed unit store.
//!
//! Each [`UnitTransaction`] wraps one `sqlx` transaction. Dropping it without
//! calling `commit` rolls back.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Duplicate barcode, duplicate active (parent, child) edge |
//! | Database (foreign key violation) | `23503` | `Constraint` | Edge referencing a missing unit |
//! | Database (check constraint violation) | `23514` | `Constraint` | Non-positive quantity, unknown status, self-containment |
//! | Database (other) | Any other | `Unavailable` | Other database errors |
//! | PoolClosed / Io / Tls | N/A | `Unavailable` | Connectivity |
//! | ColumnDecode | N/A | `Corrupt` | Row could not be decoded |
//!
//! ## Locking
//!
//! `unit_for_update` takes a row lock (`SELECT ... FOR UPDATE`), so two
//! operations mutating the same unit are serialized by the database.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{instrument, Span};
use uuid::Uuid;

use depot_core::{ContainmentId, EventId, ItemId, UnitId, UserId};
use depot_events::{EventKind, EventPayload, LedgerEntry, NewLedgerEntry};
use depot_units::{
    Barcode, Containment, EdgeEndpoint, PhysicalUnit, Quantity, Reachability, UnitLabel, UnitStatus,
};

use crate::config::DepotConfig;

use super::query::{LedgerFilter, LedgerPage, Pagination};
use super::{StatusCounts, StoreError, UnitStore, UnitTransaction};

const UNIT_COLUMNS: &str = "id, barcode, qr_code, item_id, lot_number, expiration_date, photo_url, \
                            location, status, created_at, updated_at";

const EDGE_COLUMNS: &str =
    "id, parent_unit_id, child_unit_id, quantity, unit, effective_from, effective_to";

/// `pg_advisory_xact_lock` key serialising containment edge insertions.
const CONTAINMENT_GRAPH_LOCK: i64 = 0x6465_706f_7467_7270;

const EVENT_COLUMNS: &str = r#"id, type, unit_id, user_id, metadata, "timestamp""#;

/// Postgres-backed unit store.
///
/// Cheap to clone; `PgPool` is reference counted.
#[derive(Debug, Clone)]
pub struct PostgresUnitStore {
    pool: PgPool,
}

impl PostgresUnitStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool sized by `config.max_connections`.
    #[instrument(skip(config), fields(max_connections = config.max_connections), err)]
    pub async fn connect(config: &DepotConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        tracing::info!("connected to postgres");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl UnitStore for PostgresUnitStore {
    async fn begin(&self) -> Result<Box<dyn UnitTransaction>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        Ok(Box::new(PgUnitTransaction { tx }))
    }
}

struct PgUnitTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PgUnitTransaction {
    async fn fetch_unit(&mut self, sql: &str, id: Uuid, operation: &str) -> Result<Option<PhysicalUnit>, StoreError> {
        let row = sqlx::query(sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        row.map(|r| decode::<UnitRow>(&r).and_then(PhysicalUnit::try_from))
            .transpose()
    }

    async fn fetch_edges(
        &mut self,
        sql: &str,
        unit_id: UnitId,
        at: Option<DateTime<Utc>>,
        operation: &str,
    ) -> Result<Vec<Containment>, StoreError> {
        let mut query = sqlx::query(sql).bind(unit_id.as_uuid());
        if let Some(at) = at {
            query = query.bind(at);
        }
        let rows = query
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        rows.iter()
            .map(|r| decode::<EdgeRow>(r).and_then(Containment::try_from))
            .collect()
    }
}

#[async_trait::async_trait]
impl UnitTransaction for PgUnitTransaction {
    async fn insert_unit(&mut self, unit: &PhysicalUnit) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO physical_units
                (id, barcode, qr_code, item_id, lot_number, expiration_date, photo_url,
                 location, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(unit.id.as_uuid())
        .bind(unit.barcode.as_str())
        .bind(&unit.qr_code)
        .bind(unit.item_id.as_uuid())
        .bind(unit.lot_number.as_deref())
        .bind(unit.expiration_date)
        .bind(unit.photo_url.as_deref())
        .bind(unit.location.as_deref())
        .bind(unit.status.as_str())
        .bind(unit.created_at)
        .bind(unit.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_unit", e))?;
        Ok(())
    }

    async fn unit(&mut self, id: UnitId) -> Result<Option<PhysicalUnit>, StoreError> {
        let sql = format!("SELECT {UNIT_COLUMNS} FROM physical_units WHERE id = $1");
        self.fetch_unit(&sql, *id.as_uuid(), "unit").await
    }

    async fn unit_for_update(&mut self, id: UnitId) -> Result<Option<PhysicalUnit>, StoreError> {
        let sql = format!("SELECT {UNIT_COLUMNS} FROM physical_units WHERE id = $1 FOR UPDATE");
        self.fetch_unit(&sql, *id.as_uuid(), "unit_for_update").await
    }

    async fn unit_by_barcode(&mut self, barcode: &Barcode) -> Result<Option<PhysicalUnit>, StoreError> {
        let sql = format!("SELECT {UNIT_COLUMNS} FROM physical_units WHERE barcode = $1");
        let row = sqlx::query(&sql)
            .bind(barcode.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("unit_by_barcode", e))?;
        row.map(|r| decode::<UnitRow>(&r).and_then(PhysicalUnit::try_from))
            .transpose()
    }

    async fn units(&mut self, ids: &[UnitId]) -> Result<Vec<PhysicalUnit>, StoreError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let sql = format!("SELECT {UNIT_COLUMNS} FROM physical_units WHERE id = ANY($1)");
        let rows = sqlx::query(&sql)
            .bind(&uuids)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("units", e))?;

        let mut by_id = HashMap::with_capacity(rows.len());
        for row in &rows {
            let unit = decode::<UnitRow>(row).and_then(PhysicalUnit::try_from)?;
            by_id.insert(unit.id, unit);
        }
        // Keep the caller's order.
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    async fn update_unit_state(&mut self, unit: &PhysicalUnit) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE physical_units SET status = $2, location = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(unit.id.as_uuid())
        .bind(unit.status.as_str())
        .bind(unit.location.as_deref())
        .bind(unit.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_unit_state", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("unit {}", unit.id)));
        }
        Ok(())
    }

    async fn status_counts(&mut self, item_id: Option<ItemId>) -> Result<StatusCounts, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS total
            FROM physical_units
            WHERE ($1::uuid IS NULL OR item_id = $1)
            GROUP BY status
            "#,
        )
        .bind(item_id.map(|id| *id.as_uuid()))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("status_counts", e))?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(corrupt)?;
            let total: i64 = row.try_get("total").map_err(corrupt)?;
            let status: UnitStatus = status.parse().map_err(|e| StoreError::Corrupt(format!("{e}")))?;
            counts.add(status, u64::try_from(total).unwrap_or_default());
        }
        Ok(counts)
    }

    async fn insert_edge(&mut self, edge: &Containment) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO containments
                (id, parent_unit_id, child_unit_id, quantity, unit, effective_from, effective_to)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(edge.id.as_uuid())
        .bind(edge.parent_unit_id.as_uuid())
        .bind(edge.child_unit_id.as_uuid())
        .bind(edge.quantity.value())
        .bind(edge.unit.as_str())
        .bind(edge.effective_from)
        .bind(edge.effective_to)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_edge", e))?;
        Ok(())
    }

    #[instrument(
        level = "debug",
        skip(self),
        fields(unit_id = %unit_id, closed = tracing::field::Empty),
        err
    )]
    async fn close_edges(
        &mut self,
        unit_id: UnitId,
        endpoint: EdgeEndpoint,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let endpoint_clause = match endpoint {
            EdgeEndpoint::Parent => "parent_unit_id = $1",
            EdgeEndpoint::Child => "child_unit_id = $1",
            EdgeEndpoint::Either => "(parent_unit_id = $1 OR child_unit_id = $1)",
        };
        let sql = format!(
            "UPDATE containments SET effective_to = GREATEST($2, effective_from) \
             WHERE effective_to IS NULL AND {endpoint_clause}"
        );
        let result = sqlx::query(&sql)
            .bind(unit_id.as_uuid())
            .bind(at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("close_edges", e))?;

        Span::current().record("closed", result.rows_affected());
        Ok(result.rows_affected())
    }

    async fn active_children_of(&mut self, unit_id: UnitId) -> Result<Vec<Containment>, StoreError> {
        let sql = format!(
            "SELECT {EDGE_COLUMNS} FROM containments \
             WHERE parent_unit_id = $1 AND effective_to IS NULL ORDER BY effective_from, id"
        );
        self.fetch_edges(&sql, unit_id, None, "active_children_of").await
    }

    async fn active_parents_of(&mut self, unit_id: UnitId) -> Result<Vec<Containment>, StoreError> {
        let sql = format!(
            "SELECT {EDGE_COLUMNS} FROM containments \
             WHERE child_unit_id = $1 AND effective_to IS NULL ORDER BY effective_from, id"
        );
        self.fetch_edges(&sql, unit_id, None, "active_parents_of").await
    }

    async fn children_as_of(
        &mut self,
        unit_id: UnitId,
        at: DateTime<Utc>,
    ) -> Result<Vec<Containment>, StoreError> {
        let sql = format!(
            "SELECT {EDGE_COLUMNS} FROM containments \
             WHERE parent_unit_id = $1 AND effective_from <= $2 \
               AND (effective_to IS NULL OR effective_to > $2) \
             ORDER BY effective_from, id"
        );
        self.fetch_edges(&sql, unit_id, Some(at), "children_as_of").await
    }

    async fn parents_as_of(
        &mut self,
        unit_id: UnitId,
        at: DateTime<Utc>,
    ) -> Result<Vec<Containment>, StoreError> {
        let sql = format!(
            "SELECT {EDGE_COLUMNS} FROM containments \
             WHERE child_unit_id = $1 AND effective_from <= $2 \
               AND (effective_to IS NULL OR effective_to > $2) \
             ORDER BY effective_from, id"
        );
        self.fetch_edges(&sql, unit_id, Some(at), "parents_as_of").await
    }

    async fn lock_containment_graph(&mut self) -> Result<(), StoreError> {
        // Released at commit or rollback.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(CONTAINMENT_GRAPH_LOCK)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_containment_graph", e))?;
        Ok(())
    }

    #[instrument(level = "debug", skip(self), fields(from = %from, to = %to), err)]
    async fn reaches(
        &mut self,
        from: UnitId,
        to: UnitId,
        max_depth: u32,
    ) -> Result<Reachability, StoreError> {
        if max_depth == 0 {
            let has_children: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM containments \
                 WHERE parent_unit_id = $1 AND child_unit_id <> $1 AND effective_to IS NULL)",
            )
            .bind(from.as_uuid())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("reaches", e))?;
            return Ok(if has_children {
                Reachability::DepthExceeded
            } else {
                Reachability::Unreachable
            });
        }
        let depth = i32::try_from(max_depth).unwrap_or(i32::MAX);
        let row = sqlx::query(
            r#"
            WITH RECURSIVE walk(unit_id, depth) AS (
                SELECT child_unit_id, 1
                FROM containments
                WHERE parent_unit_id = $1 AND effective_to IS NULL
                UNION
                SELECT c.child_unit_id, w.depth + 1
                FROM containments c
                JOIN walk w ON c.parent_unit_id = w.unit_id
                WHERE c.effective_to IS NULL AND w.depth < $3
            )
            SELECT
                EXISTS (SELECT 1 FROM walk WHERE unit_id = $2) AS found,
                EXISTS (
                    SELECT 1
                    FROM walk w
                    JOIN containments c ON c.parent_unit_id = w.unit_id AND c.effective_to IS NULL
                    WHERE w.depth = $3
                      AND c.child_unit_id <> $1
                      AND c.child_unit_id NOT IN (SELECT unit_id FROM walk)
                ) AS truncated
            "#,
        )
        .bind(from.as_uuid())
        .bind(to.as_uuid())
        .bind(depth)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("reaches", e))?;

        let found: bool = row.try_get("found").map_err(corrupt)?;
        let truncated: bool = row.try_get("truncated").map_err(corrupt)?;
        Ok(match (found, truncated) {
            (true, _) => Reachability::Reachable,
            (false, true) => Reachability::DepthExceeded,
            (false, false) => Reachability::Unreachable,
        })
    }

    #[instrument(
        level = "debug",
        skip(self, entry),
        fields(event_id = %entry.id, unit_id = %entry.unit_id, kind = %entry.kind()),
        err
    )]
    async fn append_event(&mut self, entry: NewLedgerEntry) -> Result<LedgerEntry, StoreError> {
        let metadata = entry
            .payload
            .to_metadata()
            .map_err(|e| StoreError::Corrupt(format!("failed to encode {} payload: {e}", entry.kind())))?;

        // Never earlier than the unit's latest entry.
        let row = sqlx::query(
            r#"
            INSERT INTO events (id, type, unit_id, user_id, metadata, "timestamp")
            VALUES (
                $1, $2, $3, $4, $5,
                GREATEST(
                    clock_timestamp(),
                    COALESCE(
                        (SELECT MAX("timestamp") FROM events WHERE unit_id = $3),
                        '-infinity'::timestamptz
                    )
                )
            )
            RETURNING "timestamp"
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.kind().as_str())
        .bind(entry.unit_id.as_uuid())
        .bind(entry.user_id.map(|id| *id.as_uuid()))
        .bind(&metadata)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("append_event", e))?;

        let timestamp: DateTime<Utc> = row.try_get("timestamp").map_err(corrupt)?;
        Ok(entry.committed_at(timestamp))
    }

    async fn events_for_unit(&mut self, unit_id: UnitId) -> Result<Vec<LedgerEntry>, StoreError> {
        let sql = format!(
            r#"SELECT {EVENT_COLUMNS} FROM events WHERE unit_id = $1 ORDER BY "timestamp" ASC, id ASC"#
        );
        let rows = sqlx::query(&sql)
            .bind(unit_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("events_for_unit", e))?;
        rows.iter()
            .map(|r| decode::<EventRow>(r).and_then(LedgerEntry::try_from))
            .collect()
    }

    async fn events_touching_unit(
        &mut self,
        unit_id: UnitId,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        // Referenced ids live in the camelCase payload keys written by `to_metadata`.
        let sql = format!(
            r#"SELECT {EVENT_COLUMNS} FROM events
               WHERE unit_id = $1
                  OR metadata->'sourceUnits' ? $2
                  OR metadata->'targetUnits' ? $2
                  OR metadata->>'parentUnitId' = $2
                  OR metadata->>'childUnitId' = $2
               ORDER BY "timestamp" ASC, id ASC"#
        );
        let rows = sqlx::query(&sql)
            .bind(unit_id.as_uuid())
            .bind(unit_id.to_string())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("events_touching_unit", e))?;
        rows.iter()
            .map(|r| decode::<EventRow>(r).and_then(LedgerEntry::try_from))
            .collect()
    }

    #[instrument(level = "debug", skip(self), err)]
    async fn query_events(
        &mut self,
        filter: &LedgerFilter,
        pagination: Pagination,
    ) -> Result<LedgerPage, StoreError> {
        // Optional filters collapse to TRUE when unbound, so one statement
        // serves every combination.
        const WHERE: &str = r#"
            WHERE ($1::uuid IS NULL OR unit_id = $1)
              AND ($2::text IS NULL OR type = $2)
              AND ($3::uuid IS NULL OR user_id = $3)
              AND ($4::text IS NULL OR (type = 'checkout' AND metadata->>'orgId' = $4))
              AND ($5::text IS NULL OR (type = 'checkout' AND metadata->>'programId' = $5))
              AND ($6::timestamptz IS NULL OR "timestamp" >= $6)
              AND ($7::timestamptz IS NULL OR "timestamp" <= $7)
        "#;

        let unit_param = filter.unit_id.map(|id| *id.as_uuid());
        let kind_param = filter.kind.map(|k| k.as_str());
        let user_param = filter.user_id.map(|id| *id.as_uuid());
        let org_param = filter.org_id.map(|id| id.to_string());
        let program_param = filter.program_id.map(|id| id.to_string());

        let count_sql = format!("SELECT COUNT(*) AS total FROM events {WHERE}");
        let count_row = sqlx::query(&count_sql)
            .bind(unit_param)
            .bind(kind_param)
            .bind(user_param)
            .bind(org_param.as_deref())
            .bind(program_param.as_deref())
            .bind(filter.from)
            .bind(filter.to)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("count_events", e))?;
        let total: i64 = count_row.try_get("total").map_err(corrupt)?;

        let sql = format!(
            r#"SELECT {EVENT_COLUMNS} FROM events {WHERE}
               ORDER BY "timestamp" DESC, id DESC
               LIMIT $8 OFFSET $9"#
        );
        let rows = sqlx::query(&sql)
            .bind(unit_param)
            .bind(kind_param)
            .bind(user_param)
            .bind(org_param.as_deref())
            .bind(program_param.as_deref())
            .bind(filter.from)
            .bind(filter.to)
            .bind(i64::from(pagination.limit))
            .bind(i64::from(pagination.offset))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("query_events", e))?;

        let entries = rows
            .iter()
            .map(|r| decode::<EventRow>(r).and_then(LedgerEntry::try_from))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(LedgerPage::new(
            entries,
            u64::try_from(total).unwrap_or_default(),
            pagination,
        ))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }
}

/// Map a sqlx error to `StoreError`.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                Some("23503") | Some("23514") => StoreError::Constraint(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::RowNotFound => StoreError::NotFound(format!("no row returned in {operation}")),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Corrupt(format!("decode error in {operation}: {err}"))
        }
        sqlx::Error::PoolClosed => StoreError::Unavailable(format!("connection pool closed in {operation}")),
        _ => StoreError::Unavailable(format!("sqlx error in {operation}: {err}")),
    }
}

fn corrupt(err: sqlx::Error) -> StoreError {
    StoreError::Corrupt(format!("failed to decode row: {err}"))
}

fn decode<'r, T: FromRow<'r, PgRow>>(row: &'r PgRow) -> Result<T, StoreError> {
    T::from_row(row).map_err(corrupt)
}

// SQLx row types

#[derive(Debug)]
struct UnitRow {
    id: Uuid,
    barcode: String,
    qr_code: String,
    item_id: Uuid,
    lot_number: Option<String>,
    expiration_date: Option<NaiveDate>,
    photo_url: Option<String>,
    location: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for UnitRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(UnitRow {
            id: row.try_get("id")?,
            barcode: row.try_get("barcode")?,
            qr_code: row.try_get("qr_code")?,
            item_id: row.try_get("item_id")?,
            lot_number: row.try_get("lot_number")?,
            expiration_date: row.try_get("expiration_date")?,
            photo_url: row.try_get("photo_url")?,
            location: row.try_get("location")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<UnitRow> for PhysicalUnit {
    type Error = StoreError;

    fn try_from(row: UnitRow) -> Result<Self, Self::Error> {
        Ok(PhysicalUnit {
            id: UnitId::from_uuid(row.id),
            barcode: Barcode::parse(&row.barcode)
                .map_err(|e| StoreError::Corrupt(format!("unit {}: {e}", row.id)))?,
            qr_code: row.qr_code,
            item_id: ItemId::from_uuid(row.item_id),
            lot_number: row.lot_number,
            expiration_date: row.expiration_date,
            photo_url: row.photo_url,
            location: row.location,
            status: row
                .status
                .parse()
                .map_err(|e| StoreError::Corrupt(format!("unit {}: {e}", row.id)))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug)]
struct EdgeRow {
    id: Uuid,
    parent_unit_id: Uuid,
    child_unit_id: Uuid,
    quantity: Decimal,
    unit: String,
    effective_from: DateTime<Utc>,
    effective_to: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for EdgeRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(EdgeRow {
            id: row.try_get("id")?,
            parent_unit_id: row.try_get("parent_unit_id")?,
            child_unit_id: row.try_get("child_unit_id")?,
            quantity: row.try_get("quantity")?,
            unit: row.try_get("unit")?,
            effective_from: row.try_get("effective_from")?,
            effective_to: row.try_get("effective_to")?,
        })
    }
}

impl TryFrom<EdgeRow> for Containment {
    type Error = StoreError;

    fn try_from(row: EdgeRow) -> Result<Self, Self::Error> {
        let corrupt = |e: depot_core::DomainError| StoreError::Corrupt(format!("containment {}: {e}", row.id));
        Ok(Containment {
            id: ContainmentId::from_uuid(row.id),
            parent_unit_id: UnitId::from_uuid(row.parent_unit_id),
            child_unit_id: UnitId::from_uuid(row.child_unit_id),
            quantity: Quantity::new(row.quantity).map_err(corrupt)?,
            unit: UnitLabel::parse(&row.unit).map_err(corrupt)?,
            effective_from: row.effective_from,
            effective_to: row.effective_to,
        })
    }
}

#[derive(Debug)]
struct EventRow {
    id: Uuid,
    event_type: String,
    unit_id: Uuid,
    user_id: Option<Uuid>,
    metadata: serde_json::Value,
    timestamp: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for EventRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(EventRow {
            id: row.try_get("id")?,
            event_type: row.try_get("type")?,
            unit_id: row.try_get("unit_id")?,
            user_id: row.try_get("user_id")?,
            metadata: row.try_get("metadata")?,
            timestamp: row.try_get("timestamp")?,
        })
    }
}

impl TryFrom<EventRow> for LedgerEntry {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let kind: EventKind = row
            .event_type
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("event {}: {e}", row.id)))?;
        let payload = EventPayload::from_metadata(kind, row.metadata)
            .map_err(|e| StoreError::Corrupt(format!("event {}: bad {kind} metadata: {e}", row.id)))?;
        Ok(LedgerEntry {
            id: EventId::from_uuid(row.id),
            unit_id: UnitId::from_uuid(row.unit_id),
            user_id: row.user_id.map(UserId::from_uuid),
            payload,
            timestamp: row.timestamp,
        })
    }
}
