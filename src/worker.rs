/// Background anchoring worker.
///
/// One periodic loop drives the whole pipeline: assemble a batch when a
/// trigger condition holds, submit sealed batches, and give every
/// submitted batch exactly one confirmation check per tick. The worker is
/// the only confirmation checker while serving, so a slow batch never
/// accumulates concurrent pollers. Each phase is idempotent, so a crash
/// between phases is repaired on the next tick rather than leaving
/// orphans.
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::anchor::{AnchorClient, PollOutcome};
use crate::batch;
use crate::canonical::to_canonical_json;
use crate::config::Config;
use crate::error::Result;
use crate::storage::ContentStore;
use crate::store::models::{BatchStatus, Event, MerkleBatch};
use crate::store::repository;

#[derive(Clone)]
pub struct Worker {
    pool: PgPool,
    config: Config,
    anchor: AnchorClient,
    content_store: Option<Arc<dyn ContentStore>>,
}

impl Worker {
    pub fn new(
        pool: PgPool,
        config: Config,
        anchor: AnchorClient,
        content_store: Option<Arc<dyn ContentStore>>,
    ) -> Self {
        Self {
            pool,
            config,
            anchor,
            content_store,
        }
    }

    /// Start the worker loop. The returned handle lives as long as the
    /// process; a failed tick is logged and the loop continues.
    pub fn spawn(self, tick_interval: Duration) -> JoinHandle<()> {
        info!(
            interval_secs = tick_interval.as_secs(),
            batch_size = self.config.batch_size,
            network = self.anchor.network(),
            "Starting anchoring worker"
        );
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(e) = self.tick().await {
                    error!(error = %e, "Worker tick failed");
                }
            }
        })
    }

    /// One pass over the pipeline: assemble, submit anything sealed, then
    /// run one confirmation check per submitted batch.
    pub async fn tick(&self) -> Result<()> {
        if let Some(sealed) = batch::assemble(
            &self.pool,
            self.config.hash_algorithm,
            self.config.batch_size,
            self.config.batch_timeout_seconds,
        )
        .await?
        {
            self.publish_batch_payload(&sealed).await;
        }

        // Sealed batches include ones left behind by an earlier crash.
        let sealed =
            repository::list_batches_by_status(&self.pool, BatchStatus::Sealed).await?;
        for b in sealed {
            self.submit_sealed(b).await;
        }

        // Exactly one probe per batch per tick. The deadline inside
        // check_batch turns slow batches stuck; no tasks are spawned, so
        // checks for the same batch can never overlap.
        let submitted =
            repository::list_batches_by_status(&self.pool, BatchStatus::Submitted).await?;
        for b in submitted {
            match self.anchor.check_batch(&self.pool, &b).await {
                Ok(PollOutcome::Pending) => {}
                Ok(outcome) => debug!(batch_id = %b.id, ?outcome, "Batch confirmation transition"),
                Err(e) => warn!(batch_id = %b.id, error = %e, "Confirmation check failed"),
            }
        }

        Ok(())
    }

    async fn submit_sealed(&self, b: MerkleBatch) {
        match self.anchor.submit_batch(&self.pool, &b).await {
            // Now submitted; confirmation checks start next tick.
            Ok(Some(_)) => {}
            Ok(None) => debug!(batch_id = %b.id, "Batch claimed by another submitter"),
            Err(e) => {
                // submit_batch already failed the batch and reverted its
                // events; they will be reclaimed into a later batch.
                warn!(batch_id = %b.id, error = %e, "Batch submission failed");
            }
        }
    }

    /// Publish the canonical batch content off-chain when a content store
    /// is configured. Best-effort: anchoring never waits on it.
    async fn publish_batch_payload(&self, b: &MerkleBatch) {
        let Some(store) = &self.content_store else {
            return;
        };
        match self.render_and_put(store, b).await {
            Ok(cid) => {
                info!(batch_id = %b.id, cid, store = store.name(), "Published batch payload")
            }
            Err(e) => warn!(batch_id = %b.id, error = %e, "Batch payload publication failed"),
        }
    }

    async fn render_and_put(
        &self,
        store: &Arc<dyn ContentStore>,
        b: &MerkleBatch,
    ) -> Result<String> {
        let content = batch_payload_json(&self.pool, b).await?;
        let cid = store.put(content.as_bytes()).await?;
        repository::set_batch_payload_cid(&self.pool, b.id, &cid).await?;
        Ok(cid)
    }
}

/// Load a batch's members and render its publishable document.
pub async fn batch_payload_json(pool: &PgPool, b: &MerkleBatch) -> Result<String> {
    let events = repository::batch_events(pool, b.id).await?;
    Ok(render_batch_payload(b, &events))
}

/// Canonical JSON document describing a sealed batch and its members, in
/// leaf order. This is what gets published to the content store; its CID
/// commits to the exact event set behind the anchored root.
pub fn render_batch_payload(b: &MerkleBatch, events: &[Event]) -> String {
    let members: Vec<serde_json::Value> = events
        .iter()
        .map(|e| {
            serde_json::json!({
                "id": e.id,
                "event_type": e.event_type.as_str(),
                "module": e.module.as_str(),
                "subject_type": e.subject_type,
                "subject_id": e.subject_id,
                "occurred_at": crate::hash::canonical_timestamp(&e.occurred_at),
                "event_hash": e.hash_hex(),
                "payload": e.payload,
            })
        })
        .collect();

    let doc = serde_json::json!({
        "batch_id": b.id,
        "merkle_root": b.root_hex(),
        "event_count": b.leaf_count,
        "events": members,
    });

    to_canonical_json(&doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    use crate::store::models::{EventStatus, EventType, Module};

    fn sample_batch(leaf_count: i32) -> MerkleBatch {
        MerkleBatch {
            id: Uuid::now_v7(),
            root_hash: vec![0xAA; 32],
            leaf_count,
            status: BatchStatus::Sealed,
            anchor_ref: None,
            payload_cid: None,
            retry_count: 0,
            failure_reason: None,
            created_at: Utc::now(),
            submitted_at: None,
            confirmed_at: None,
        }
    }

    fn sample_event(batch_id: Uuid, position: i32) -> Event {
        Event {
            id: Uuid::now_v7(),
            event_type: EventType::InvoiceCreated,
            module: Module::Finance,
            actor_id: None,
            subject_type: "invoice".into(),
            subject_id: format!("INV-{position}"),
            payload: json!({"amount": 1250}),
            occurred_at: Utc::now(),
            event_hash: vec![position as u8; 32],
            status: EventStatus::Batched,
            batch_id: Some(batch_id),
            batch_position: Some(position),
            payload_cid: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_batch_payload_document() {
        let batch = sample_batch(2);
        let events = vec![sample_event(batch.id, 0), sample_event(batch.id, 1)];

        let doc: serde_json::Value =
            serde_json::from_str(&render_batch_payload(&batch, &events)).unwrap();

        assert_eq!(doc["event_count"], json!(2));
        assert_eq!(doc["merkle_root"], json!(hex::encode([0xAA; 32])));
        assert_eq!(doc["events"].as_array().unwrap().len(), 2);
        assert_eq!(doc["events"][0]["event_type"], json!("invoice_created"));
        assert_eq!(doc["events"][1]["subject_id"], json!("INV-1"));
    }

    #[test]
    fn test_batch_payload_is_canonical() {
        // Same members render to identical bytes regardless of when the
        // document is produced.
        let batch = sample_batch(1);
        let events = vec![sample_event(batch.id, 0)];
        assert_eq!(
            render_batch_payload(&batch, &events),
            render_batch_payload(&batch, &events)
        );
    }
}
