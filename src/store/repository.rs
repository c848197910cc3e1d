/// Repository layer: typed database queries for the audit ledger.
///
/// All queries use sqlx runtime-checked queries (not compile-time checked)
/// to avoid requiring a live database during development builds.
///
/// Status mutations are guarded updates (`WHERE status = ...`) so that
/// repeating a transition is a no-op rather than an error, and so that the
/// batch status column doubles as a single-writer lease.
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use super::models::*;
use crate::error::{AuditError, Result};
use crate::hash::{hash_event, HashAlgorithm};

/// Fields a producing module supplies when logging an event.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub event_type: EventType,
    pub module: Module,
    pub actor_id: Option<String>,
    pub subject_type: String,
    pub subject_id: String,
    pub payload: Map<String, Value>,
    /// Defaults to now when the producer does not supply one.
    pub occurred_at: Option<DateTime<Utc>>,
}

/// Read filters for list/verify/report queries.
#[derive(Debug, Default, Clone)]
pub struct EventFilter {
    pub event_type: Option<EventType>,
    pub module: Option<Module>,
    pub status: Option<EventStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// ── Events ──

/// Capture an event: compute its hash and persist it as `pending`.
/// Durable before return; no network interaction on this path.
pub async fn capture(pool: &PgPool, algo: HashAlgorithm, draft: EventDraft) -> Result<Event> {
    let id = Uuid::now_v7();
    let occurred_at = draft.occurred_at.unwrap_or_else(Utc::now);

    let digest = hash_event(
        algo,
        draft.event_type.as_str(),
        draft.module.as_str(),
        &draft.subject_type,
        &draft.subject_id,
        &occurred_at,
        &draft.payload,
    )?;

    let event = sqlx::query_as::<_, Event>(
        r#"
        INSERT INTO audit_events
        (id, event_type, module, actor_id, subject_type, subject_id, payload, occurred_at, event_hash, status, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'pending', $10)
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(draft.event_type)
    .bind(draft.module)
    .bind(&draft.actor_id)
    .bind(&draft.subject_type)
    .bind(&draft.subject_id)
    .bind(Value::Object(draft.payload))
    .bind(occurred_at)
    .bind(digest.as_slice())
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    Ok(event)
}

pub async fn get_event(pool: &PgPool, id: Uuid) -> Result<Option<Event>> {
    let event = sqlx::query_as::<_, Event>("SELECT * FROM audit_events WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(event)
}

pub async fn list_events(pool: &PgPool, filter: &EventFilter) -> Result<Vec<Event>> {
    let mut qb: QueryBuilder<Postgres> =
        QueryBuilder::new("SELECT * FROM audit_events WHERE TRUE");

    if let Some(event_type) = filter.event_type {
        qb.push(" AND event_type = ").push_bind(event_type);
    }
    if let Some(module) = filter.module {
        qb.push(" AND module = ").push_bind(module);
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status);
    }
    if let Some(from) = filter.from {
        qb.push(" AND occurred_at >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        qb.push(" AND occurred_at <= ").push_bind(to);
    }
    qb.push(" ORDER BY occurred_at DESC, id DESC");
    if let Some(limit) = filter.limit {
        qb.push(" LIMIT ").push_bind(limit);
    }
    if let Some(offset) = filter.offset {
        qb.push(" OFFSET ").push_bind(offset);
    }

    let events = qb.build_query_as::<Event>().fetch_all(pool).await?;
    Ok(events)
}

/// Number of events the assembler could claim right now.
pub async fn count_claimable(pool: &PgPool) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM audit_events WHERE status IN ('pending', 'failed')",
    )
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Capture time of the oldest claimable event, for the timeout trigger.
pub async fn oldest_claimable_at(pool: &PgPool) -> Result<Option<DateTime<Utc>>> {
    let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
        "SELECT MIN(created_at) FROM audit_events WHERE status IN ('pending', 'failed') HAVING MIN(created_at) IS NOT NULL",
    )
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|(ts,)| ts))
}

/// Claim up to `limit` events for batching, FIFO by capture order.
///
/// `FOR UPDATE SKIP LOCKED` guarantees two concurrent assembler runs never
/// select overlapping event sets; must run inside the assembly transaction.
pub async fn claim_events(
    tx: &mut Transaction<'_, Postgres>,
    limit: i64,
) -> Result<Vec<Event>> {
    let events = sqlx::query_as::<_, Event>(
        r#"
        SELECT * FROM audit_events
        WHERE status IN ('pending', 'failed')
        ORDER BY created_at, id
        LIMIT $1
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(limit)
    .fetch_all(&mut **tx)
    .await?;
    Ok(events)
}

/// Assign claimed events to a sealed batch, fixing their leaf positions.
pub async fn mark_batched(
    tx: &mut Transaction<'_, Postgres>,
    event_ids: &[Uuid],
    batch_id: Uuid,
) -> Result<()> {
    for (position, event_id) in event_ids.iter().enumerate() {
        sqlx::query(
            r#"
            UPDATE audit_events
            SET status = 'batched', batch_id = $2, batch_position = $3
            WHERE id = $1 AND status IN ('pending', 'failed')
            "#,
        )
        .bind(event_id)
        .bind(batch_id)
        .bind(position as i32)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

/// Record an off-chain payload reference on an event.
pub async fn set_event_payload_cid(pool: &PgPool, event_id: Uuid, cid: &str) -> Result<()> {
    sqlx::query("UPDATE audit_events SET payload_cid = $2 WHERE id = $1")
        .bind(event_id)
        .bind(cid)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn event_stats(pool: &PgPool) -> Result<EventStats> {
    let row: (i64, i64, i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COUNT(*),
            COUNT(*) FILTER (WHERE status = 'pending'),
            COUNT(*) FILTER (WHERE status = 'batched'),
            COUNT(*) FILTER (WHERE status = 'anchored'),
            COUNT(*) FILTER (WHERE status = 'failed')
        FROM audit_events
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(EventStats {
        total: row.0,
        pending: row.1,
        batched: row.2,
        anchored: row.3,
        failed: row.4,
    })
}

// ── Batches ──

pub async fn batch_stats(pool: &PgPool) -> Result<BatchStats> {
    let row: (i64, i64, i64, i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COUNT(*),
            COUNT(*) FILTER (WHERE status = 'sealed'),
            COUNT(*) FILTER (WHERE status = 'submitted'),
            COUNT(*) FILTER (WHERE status = 'confirmed'),
            COUNT(*) FILTER (WHERE status = 'failed'),
            COUNT(*) FILTER (WHERE status = 'stuck')
        FROM merkle_batches
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(BatchStats {
        total: row.0,
        sealed: row.1,
        submitted: row.2,
        confirmed: row.3,
        failed: row.4,
        stuck: row.5,
    })
}

/// Insert a sealed batch inside the assembly transaction.
pub async fn insert_sealed_batch(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    root_hash: &[u8; 32],
    leaf_count: i32,
) -> Result<MerkleBatch> {
    let batch = sqlx::query_as::<_, MerkleBatch>(
        r#"
        INSERT INTO merkle_batches (id, root_hash, leaf_count, status, retry_count, created_at)
        VALUES ($1, $2, $3, 'sealed', 0, $4)
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(root_hash.as_slice())
    .bind(leaf_count)
    .bind(Utc::now())
    .fetch_one(&mut **tx)
    .await?;
    Ok(batch)
}

pub async fn get_batch(pool: &PgPool, id: Uuid) -> Result<Option<MerkleBatch>> {
    let batch = sqlx::query_as::<_, MerkleBatch>("SELECT * FROM merkle_batches WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(batch)
}

/// Member events in leaf order. Leaf order is the batch's proof basis.
pub async fn batch_events(pool: &PgPool, batch_id: Uuid) -> Result<Vec<Event>> {
    let events = sqlx::query_as::<_, Event>(
        "SELECT * FROM audit_events WHERE batch_id = $1 ORDER BY batch_position",
    )
    .bind(batch_id)
    .fetch_all(pool)
    .await?;
    Ok(events)
}

pub async fn list_batches_by_status(
    pool: &PgPool,
    status: BatchStatus,
) -> Result<Vec<MerkleBatch>> {
    let batches = sqlx::query_as::<_, MerkleBatch>(
        "SELECT * FROM merkle_batches WHERE status = $1 ORDER BY created_at",
    )
    .bind(status)
    .fetch_all(pool)
    .await?;
    Ok(batches)
}

/// Take the submission lease on a batch. Returns the batch when this caller
/// won the claim; None when another writer already holds or finished it.
pub async fn claim_batch_for_submission(
    pool: &PgPool,
    batch_id: Uuid,
) -> Result<Option<MerkleBatch>> {
    let batch = sqlx::query_as::<_, MerkleBatch>(
        r#"
        UPDATE merkle_batches
        SET status = 'submitted', submitted_at = $2
        WHERE id = $1 AND status IN ('sealed', 'failed')
        RETURNING *
        "#,
    )
    .bind(batch_id)
    .bind(Utc::now())
    .fetch_optional(pool)
    .await?;
    Ok(batch)
}

pub async fn set_batch_anchor_ref(
    pool: &PgPool,
    batch_id: Uuid,
    anchor_ref: &str,
    retry_count: i32,
) -> Result<()> {
    sqlx::query(
        "UPDATE merkle_batches SET anchor_ref = $2, retry_count = $3 WHERE id = $1",
    )
    .bind(batch_id)
    .bind(anchor_ref)
    .bind(retry_count)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_batch_payload_cid(pool: &PgPool, batch_id: Uuid, cid: &str) -> Result<()> {
    sqlx::query("UPDATE merkle_batches SET payload_cid = $2 WHERE id = $1")
        .bind(batch_id)
        .bind(cid)
        .execute(pool)
        .await?;
    Ok(())
}

/// Mark a batch (and its events) anchored. Idempotent: repeating the call
/// on an already-confirmed batch matches no rows and is a no-op.
pub async fn mark_batch_confirmed(pool: &PgPool, batch_id: Uuid) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE merkle_batches
        SET status = 'confirmed', confirmed_at = $2
        WHERE id = $1 AND status IN ('submitted', 'stuck')
        "#,
    )
    .bind(batch_id)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE audit_events SET status = 'anchored' WHERE batch_id = $1 AND status = 'batched'",
    )
    .bind(batch_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE anchor_records SET confirmed = TRUE WHERE batch_id = $1")
        .bind(batch_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Mark a batch failed after retry exhaustion; its events revert to
/// `failed` and become claimable by the next assembly run.
pub async fn mark_batch_failed(pool: &PgPool, batch_id: Uuid, reason: &str) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE merkle_batches
        SET status = 'failed', failure_reason = $2
        WHERE id = $1 AND status IN ('sealed', 'submitted')
        "#,
    )
    .bind(batch_id)
    .bind(reason)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE audit_events SET status = 'failed' WHERE batch_id = $1 AND status = 'batched'",
    )
    .bind(batch_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// A submitted batch past the maximum confirmation wait is held for
/// operator intervention, never silently dropped or retried forever.
pub async fn mark_batch_stuck(pool: &PgPool, batch_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE merkle_batches SET status = 'stuck' WHERE id = $1 AND status = 'submitted'")
        .bind(batch_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn bump_batch_retry_count(pool: &PgPool, batch_id: Uuid, retry_count: i32) -> Result<()> {
    sqlx::query("UPDATE merkle_batches SET retry_count = $2 WHERE id = $1")
        .bind(batch_id)
        .bind(retry_count)
        .execute(pool)
        .await?;
    Ok(())
}

// ── Anchor records ──

pub async fn insert_anchor_record(
    pool: &PgPool,
    batch_id: Uuid,
    network: &str,
    reference: &str,
) -> Result<AnchorRecord> {
    let record = sqlx::query_as::<_, AnchorRecord>(
        r#"
        INSERT INTO anchor_records (id, batch_id, network, reference, confirmed, created_at)
        VALUES ($1, $2, $3, $4, FALSE, $5)
        RETURNING *
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(batch_id)
    .bind(network)
    .bind(reference)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;
    Ok(record)
}

pub async fn get_anchor_record(pool: &PgPool, batch_id: Uuid) -> Result<Option<AnchorRecord>> {
    let record = sqlx::query_as::<_, AnchorRecord>(
        "SELECT * FROM anchor_records WHERE batch_id = $1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(batch_id)
    .fetch_optional(pool)
    .await?;
    Ok(record)
}

pub async fn confirm_anchor_record(
    pool: &PgPool,
    reference: &str,
    block_number: Option<i64>,
    gas_used: Option<i64>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE anchor_records
        SET confirmed = TRUE, block_number = $2, gas_used = $3
        WHERE reference = $1
        "#,
    )
    .bind(reference)
    .bind(block_number)
    .bind(gas_used)
    .execute(pool)
    .await?;
    Ok(())
}

/// Look up an event or fail with `NotFound`.
pub async fn require_event(pool: &PgPool, id: Uuid) -> Result<Event> {
    get_event(pool, id)
        .await?
        .ok_or_else(|| AuditError::NotFound(format!("event {id}")))
}

/// Look up a batch or fail with `NotFound`.
pub async fn require_batch(pool: &PgPool, id: Uuid) -> Result<MerkleBatch> {
    get_batch(pool, id)
        .await?
        .ok_or_else(|| AuditError::NotFound(format!("batch {id}")))
}
