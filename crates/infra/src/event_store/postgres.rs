//! Postgres-backed event store implementation.
//!
//! Persists events append-only with tenant isolation and optimistic
//! concurrency enforced at the database level:
//!
//! - every query filters on `tenant_id`, so cross-tenant reads are impossible
//!   even with a buggy caller;
//! - appends run in a transaction that checks the current stream version and
//!   inserts behind a unique constraint on
//!   `(tenant_id, aggregate_id, sequence_number)` - a concurrent append hits
//!   the constraint (SQLSTATE 23505) and surfaces as a concurrency conflict.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use tracing::instrument;

use rateforge_core::{AggregateId, ExpectedVersion, TenantId};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// Postgres-backed append-only event store.
///
/// Uses the SQLx connection pool; safe to share across threads.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
}

impl PostgresEventStore {
    /// Create a new store with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the events table and its constraints if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), EventStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                event_id        UUID PRIMARY KEY,
                tenant_id       UUID NOT NULL,
                aggregate_id    UUID NOT NULL,
                aggregate_type  TEXT NOT NULL,
                sequence_number BIGINT NOT NULL CHECK (sequence_number > 0),
                event_type      TEXT NOT NULL,
                event_version   INT NOT NULL,
                occurred_at     TIMESTAMPTZ NOT NULL,
                payload         JSONB NOT NULL,
                created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (tenant_id, aggregate_id, sequence_number)
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[instrument(
        skip(self, events),
        fields(event_count = events.len(), expected_version = ?expected_version),
        err
    )]
    async fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let tenant_id = events[0].tenant_id;
        let aggregate_id = events[0].aggregate_id;
        let aggregate_type = events[0].aggregate_type.clone();

        for (idx, e) in events.iter().enumerate() {
            if e.tenant_id != tenant_id {
                return Err(EventStoreError::TenantIsolation(format!(
                    "batch contains multiple tenant_ids (index {idx})"
                )));
            }
            if e.aggregate_id != aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple aggregate_ids (index {idx})"
                )));
            }
            if e.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "batch contains multiple aggregate_types (index {idx})"
                )));
            }
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let (current_version, existing_type) =
            stream_head(&mut tx, tenant_id, aggregate_id).await?;

        if let Some(existing) = &existing_type {
            if existing != &aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream aggregate_type is '{existing}', attempted append with '{aggregate_type}'"
                )));
            }
        }

        if !expected_version.matches(current_version) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current_version}"
            )));
        }

        let mut next = current_version + 1;
        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            sqlx::query(
                r#"
                INSERT INTO events (
                    event_id, tenant_id, aggregate_id, aggregate_type,
                    sequence_number, event_type, event_version, occurred_at, payload
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(e.event_id)
            .bind(e.tenant_id.as_uuid())
            .bind(e.aggregate_id.as_uuid())
            .bind(&e.aggregate_type)
            .bind(next as i64)
            .bind(&e.event_type)
            .bind(e.event_version as i32)
            .bind(e.occurred_at)
            .bind(&e.payload)
            .execute(&mut *tx)
            .await
            .map_err(|err| map_sqlx_error("insert_event", err))?;

            committed.push(StoredEvent {
                event_id: e.event_id,
                tenant_id: e.tenant_id,
                aggregate_id: e.aggregate_id,
                aggregate_type: e.aggregate_type,
                sequence_number: next,
                event_type: e.event_type,
                event_version: e.event_version,
                occurred_at: e.occurred_at,
                payload: e.payload,
            });
            next += 1;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;

        Ok(committed)
    }

    #[instrument(skip(self), err)]
    async fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                event_id, tenant_id, aggregate_id, aggregate_type,
                sequence_number, event_type, event_version, occurred_at, payload
            FROM events
            WHERE tenant_id = $1 AND aggregate_id = $2
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(aggregate_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_stream", e))?;

        rows.iter().map(row_to_stored_event).collect()
    }
}

async fn stream_head(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
    aggregate_id: AggregateId,
) -> Result<(u64, Option<String>), EventStoreError> {
    let row = sqlx::query(
        r#"
        SELECT sequence_number, aggregate_type
        FROM events
        WHERE tenant_id = $1 AND aggregate_id = $2
        ORDER BY sequence_number DESC
        LIMIT 1
        "#,
    )
    .bind(tenant_id.as_uuid())
    .bind(aggregate_id.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("stream_head", e))?;

    match row {
        Some(row) => {
            let seq: i64 = row
                .try_get("sequence_number")
                .map_err(|e| EventStoreError::Backend(e.to_string()))?;
            let aggregate_type: String = row
                .try_get("aggregate_type")
                .map_err(|e| EventStoreError::Backend(e.to_string()))?;
            Ok((seq as u64, Some(aggregate_type)))
        }
        None => Ok((0, None)),
    }
}

fn row_to_stored_event(row: &sqlx::postgres::PgRow) -> Result<StoredEvent, EventStoreError> {
    let get = |e: sqlx::Error| EventStoreError::Backend(e.to_string());
    let sequence_number: i64 = row.try_get("sequence_number").map_err(get)?;
    let event_version: i32 = row.try_get("event_version").map_err(get)?;

    Ok(StoredEvent {
        event_id: row.try_get("event_id").map_err(get)?,
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(get)?),
        aggregate_id: AggregateId::from_uuid(row.try_get("aggregate_id").map_err(get)?),
        aggregate_type: row.try_get("aggregate_type").map_err(get)?,
        sequence_number: sequence_number as u64,
        event_type: row.try_get("event_type").map_err(get)?,
        event_version: event_version as u32,
        occurred_at: row.try_get("occurred_at").map_err(get)?,
        payload: row.try_get("payload").map_err(get)?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    if let sqlx::Error::Database(db) = &err {
        match db.code().as_deref() {
            // Unique violation: a concurrent append won the race.
            Some("23505") => {
                return EventStoreError::Concurrency(format!(
                    "{operation}: concurrent append detected ({})",
                    db.message()
                ));
            }
            Some("23514") => {
                return EventStoreError::InvalidAppend(format!(
                    "{operation}: constraint violated ({})",
                    db.message()
                ));
            }
            _ => {}
        }
    }
    EventStoreError::Backend(format!("{operation}: {err}"))
}
