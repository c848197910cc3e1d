/// Batch assembly.
///
/// Groups claimable events (`pending` or `failed`) into a sealed Merkle
/// batch. Triggered when either the claimable count reaches the configured
/// batch size or the oldest claimable event has waited past the batch
/// timeout, whichever comes first — bounding both anchor latency and
/// per-anchor cost.
///
/// Assembly is one transaction: claim (FOR UPDATE SKIP LOCKED), fix leaf
/// order (capture FIFO), build the tree, insert the sealed batch, mark the
/// events batched. Concurrent assembler runs can never claim overlapping
/// event sets.
use chrono::Utc;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AuditError, Result};
use crate::hash::HashAlgorithm;
use crate::merkle::MerkleTree;
use crate::store::models::MerkleBatch;
use crate::store::repository;

/// Assemble one batch if a trigger condition holds. Returns `None` when
/// there is nothing to do yet (caller retries on its next tick).
pub async fn assemble(
    pool: &PgPool,
    algo: HashAlgorithm,
    batch_size: usize,
    batch_timeout_seconds: u64,
) -> Result<Option<MerkleBatch>> {
    // Cheap pre-check outside the claim transaction.
    let claimable = repository::count_claimable(pool).await?;
    if claimable == 0 {
        return Ok(None);
    }

    if (claimable as usize) < batch_size {
        let oldest = repository::oldest_claimable_at(pool).await?;
        let timed_out = oldest.is_some_and(|ts| {
            Utc::now().signed_duration_since(ts).num_seconds() >= batch_timeout_seconds as i64
        });
        if !timed_out {
            debug!(
                claimable,
                batch_size, "batch below size threshold and not timed out"
            );
            return Ok(None);
        }
    }

    let mut tx = pool.begin().await?;

    let events = repository::claim_events(&mut tx, batch_size as i64).await?;
    if events.is_empty() {
        // Another assembler got there first.
        tx.rollback().await?;
        return Ok(None);
    }

    let leaves: Vec<[u8; 32]> = events
        .iter()
        .map(|e| {
            e.hash_bytes().ok_or_else(|| {
                AuditError::Serialization(format!("event {} has malformed stored hash", e.id))
            })
        })
        .collect::<Result<_>>()?;

    let tree = MerkleTree::from_leaf_hashes(algo, leaves);
    let root = tree
        .root()
        .ok_or_else(|| AuditError::Serialization("empty merkle tree for non-empty batch".into()))?;

    let batch_id = Uuid::now_v7();
    let batch =
        repository::insert_sealed_batch(&mut tx, batch_id, &root, events.len() as i32).await?;

    let event_ids: Vec<Uuid> = events.iter().map(|e| e.id).collect();
    repository::mark_batched(&mut tx, &event_ids, batch_id).await?;

    tx.commit().await?;

    info!(
        batch_id = %batch_id,
        events = events.len(),
        root = %hex::encode(root),
        "Sealed merkle batch"
    );

    Ok(Some(batch))
}

/// Rebuild the Merkle tree for a stored batch from its members' stored
/// hashes, in leaf order. Shared by anchoring and verification.
pub async fn rebuild_tree(
    pool: &PgPool,
    algo: HashAlgorithm,
    batch_id: Uuid,
) -> Result<MerkleTree> {
    let events = repository::batch_events(pool, batch_id).await?;
    if events.is_empty() {
        return Err(AuditError::NotFound(format!("batch {batch_id} has no events")));
    }

    let leaves: Vec<[u8; 32]> = events
        .iter()
        .map(|e| {
            e.hash_bytes().ok_or_else(|| {
                AuditError::Serialization(format!("event {} has malformed stored hash", e.id))
            })
        })
        .collect::<Result<_>>()?;

    Ok(MerkleTree::from_leaf_hashes(algo, leaves))
}
