/// Blockchain anchoring for tamper-evident audit batches.
///
/// A sealed batch's Merkle root is written to an external network; the
/// transaction reference becomes independent proof that the batch existed
/// at anchor time. Backends are pluggable behind `AnchorBackend`; the
/// `AnchorClient` owns retry/backoff, confirmation polling, and
/// idempotent resubmission on top of whichever backend is configured.
pub mod ethereum;
pub mod mock;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{AuditError, Result};
use crate::store::models::{AnchorRecord, BatchStatus, MerkleBatch};
use crate::store::repository;

/// Confirmation details once the network treats a submission as final.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Confirmation {
    pub block_number: Option<i64>,
    pub gas_used: Option<i64>,
}

/// Trait for pluggable anchor networks.
#[async_trait]
pub trait AnchorBackend: Send + Sync {
    /// Network name recorded on anchor records (e.g. "ethereum", "mock").
    fn network(&self) -> &str;

    /// Submit a 32-byte root. Returns the external reference (tx hash).
    async fn submit_root(&self, root: &[u8; 32]) -> Result<String>;

    /// Check whether a submission has been confirmed. `None` = not yet.
    async fn confirmation(&self, reference: &str) -> Result<Option<Confirmation>>;

    /// Read back the root that was anchored under `reference`.
    async fn fetch_root(&self, reference: &str) -> Result<[u8; 32]>;
}

/// Anchor orchestration: retries, confirmation polling, idempotency.
#[derive(Clone)]
pub struct AnchorClient {
    backend: Arc<dyn AnchorBackend>,
    retry_attempts: u32,
    backoff_base: Duration,
    max_confirmation_wait: Duration,
    poll_interval: Duration,
}

impl AnchorClient {
    pub fn new(
        backend: Arc<dyn AnchorBackend>,
        retry_attempts: u32,
        max_confirmation_wait_seconds: u64,
    ) -> Self {
        Self {
            backend,
            retry_attempts,
            backoff_base: Duration::from_millis(500),
            max_confirmation_wait: Duration::from_secs(max_confirmation_wait_seconds),
            poll_interval: Duration::from_secs(5),
        }
    }

    /// Override timing for tests.
    #[doc(hidden)]
    pub fn with_timing(mut self, backoff_base: Duration, poll_interval: Duration) -> Self {
        self.backoff_base = backoff_base;
        self.poll_interval = poll_interval;
        self
    }

    pub fn network(&self) -> &str {
        self.backend.network()
    }

    pub fn backend(&self) -> &Arc<dyn AnchorBackend> {
        &self.backend
    }

    /// Submit a root with exponential backoff, up to `retry_attempts`
    /// total attempts. Transient failures are retried; a node rejection
    /// ends the attempt sequence immediately.
    pub async fn submit_with_retries(&self, root: &[u8; 32]) -> Result<String> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.backend.submit_root(root).await {
                Ok(reference) => return Ok(reference),
                Err(e) if e.is_transient() && attempt < self.retry_attempts => {
                    let delay = self.backoff_base * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        attempt,
                        max = self.retry_attempts,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Anchor submission failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One confirmation probe against the backend. Exactly one network
    /// call; a transport error counts as "not confirmed yet" and a node
    /// rejection propagates.
    pub async fn confirmation_once(&self, reference: &str) -> Result<Option<Confirmation>> {
        match self.backend.confirmation(reference).await {
            Ok(confirmation) => Ok(confirmation),
            Err(e) if e.is_transient() => {
                warn!(reference, error = %e, "Confirmation check failed, will re-check");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Whether a batch submitted at `submitted_at` has exceeded the
    /// maximum confirmation wait.
    fn past_deadline(&self, submitted_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(submitted_at)
            .to_std()
            .map_or(false, |waited| waited >= self.max_confirmation_wait)
    }

    /// Submit a sealed (or failed) batch's root on-chain.
    ///
    /// Idempotent: a batch that already carries an `anchor_ref` is never
    /// resubmitted — the existing record is returned. The batch status
    /// column is the submission lease; losing the claim returns `None`.
    pub async fn submit_batch(
        &self,
        pool: &PgPool,
        batch: &MerkleBatch,
    ) -> Result<Option<AnchorRecord>> {
        if let Some(reference) = &batch.anchor_ref {
            info!(batch_id = %batch.id, reference, "Batch already submitted, skipping");
            return repository::get_anchor_record(pool, batch.id).await;
        }

        let Some(claimed) = repository::claim_batch_for_submission(pool, batch.id).await? else {
            return Ok(None);
        };

        let root = claimed.root_bytes().ok_or_else(|| {
            AuditError::Serialization(format!("batch {} has malformed root", claimed.id))
        })?;

        match self.submit_with_retries(&root).await {
            Ok(reference) => {
                repository::set_batch_anchor_ref(
                    pool,
                    claimed.id,
                    &reference,
                    claimed.retry_count,
                )
                .await?;
                let record = repository::insert_anchor_record(
                    pool,
                    claimed.id,
                    self.backend.network(),
                    &reference,
                )
                .await?;
                info!(
                    batch_id = %claimed.id,
                    reference = %record.reference,
                    network = %record.network,
                    "Batch root anchored"
                );
                Ok(Some(record))
            }
            Err(e) => {
                error!(batch_id = %claimed.id, error = %e, "Anchor submission exhausted retries");
                repository::bump_batch_retry_count(
                    pool,
                    claimed.id,
                    claimed.retry_count + self.retry_attempts as i32,
                )
                .await?;
                repository::mark_batch_failed(pool, claimed.id, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    /// Run exactly one confirmation check for a submitted batch and apply
    /// the resulting transition. The check never blocks on the network
    /// beyond a single probe; callers own the cadence, so a batch with one
    /// caller never has overlapping confirmation work.
    pub async fn check_batch(&self, pool: &PgPool, batch: &MerkleBatch) -> Result<PollOutcome> {
        if batch.status == BatchStatus::Confirmed {
            return Ok(PollOutcome::Confirmed);
        }
        let Some(reference) = batch.anchor_ref.clone() else {
            return Err(AuditError::NotFound(format!(
                "batch {} has no anchor reference",
                batch.id
            )));
        };

        if let Some(confirmation) = self.confirmation_once(&reference).await? {
            repository::confirm_anchor_record(
                pool,
                &reference,
                confirmation.block_number,
                confirmation.gas_used,
            )
            .await?;
            repository::mark_batch_confirmed(pool, batch.id).await?;
            info!(
                batch_id = %batch.id,
                reference,
                block = confirmation.block_number,
                "Anchor confirmed"
            );
            return Ok(PollOutcome::Confirmed);
        }

        // Deadline derives from when the batch was submitted, not from how
        // long any one caller has been checking. Never dropped silently.
        let submitted_at = batch.submitted_at.unwrap_or(batch.created_at);
        if self.past_deadline(submitted_at, Utc::now()) {
            warn!(batch_id = %batch.id, reference, "Confirmation wait exceeded, marking stuck");
            repository::mark_batch_stuck(pool, batch.id).await?;
            return Ok(PollOutcome::Stuck);
        }

        Ok(PollOutcome::Pending)
    }

    /// Drive a submitted batch to `confirmed`, blocking until it confirms
    /// or goes `stuck`. For one-shot callers (the CLI); the worker runs
    /// `check_batch` on its own tick instead, so a batch never accumulates
    /// concurrent pollers.
    pub async fn poll_batch(&self, pool: &PgPool, batch_id: Uuid) -> Result<()> {
        loop {
            let batch = repository::require_batch(pool, batch_id).await?;
            match self.check_batch(pool, &batch).await? {
                PollOutcome::Confirmed => return Ok(()),
                PollOutcome::Stuck => {
                    return Err(AuditError::ConfirmationTimeout(batch_id.to_string()))
                }
                PollOutcome::Pending => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }
}

/// Result of a single confirmation check on a submitted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Confirmed,
    Pending,
    Stuck,
}

#[cfg(test)]
mod tests {
    use super::mock::MockAnchor;
    use super::*;

    fn client(backend: Arc<dyn AnchorBackend>, attempts: u32, max_wait_secs: u64) -> AnchorClient {
        AnchorClient::new(backend, attempts, max_wait_secs)
            .with_timing(Duration::from_millis(1), Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_submission_succeeds_first_try() {
        let mock = Arc::new(MockAnchor::new());
        let c = client(mock.clone(), 3, 10);
        let reference = c.submit_with_retries(&[7u8; 32]).await.unwrap();
        assert!(reference.starts_with("0x"));
        assert_eq!(mock.submission_attempts(), 1);
    }

    #[tokio::test]
    async fn test_submission_retries_then_succeeds() {
        let mock = Arc::new(MockAnchor::new().failing_submissions(2));
        let c = client(mock.clone(), 3, 10);
        c.submit_with_retries(&[7u8; 32]).await.unwrap();
        assert_eq!(mock.submission_attempts(), 3);
    }

    #[tokio::test]
    async fn test_submission_exhausts_retries() {
        // Network down for all 3 attempts: the error propagates so the
        // caller can fail the batch and revert its events.
        let mock = Arc::new(MockAnchor::new().failing_submissions(3));
        let c = client(mock.clone(), 3, 10);
        let err = c.submit_with_retries(&[7u8; 32]).await.unwrap_err();
        assert!(matches!(err, AuditError::AnchorUnavailable(_)));
        assert_eq!(mock.submission_attempts(), 3);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let mock = Arc::new(MockAnchor::new().rejecting());
        let c = client(mock.clone(), 3, 10);
        let err = c.submit_with_retries(&[7u8; 32]).await.unwrap_err();
        assert!(matches!(err, AuditError::AnchorRejected(_)));
        assert_eq!(mock.submission_attempts(), 1);
    }

    #[tokio::test]
    async fn test_confirmation_check_is_single_probe() {
        // Each call makes exactly one backend probe; the backend confirms
        // on the third. No internal looping between calls.
        let mock = Arc::new(MockAnchor::new().confirming_after(2));
        let c = client(mock.clone(), 3, 10);
        let reference = c.submit_with_retries(&[9u8; 32]).await.unwrap();
        assert!(c.confirmation_once(&reference).await.unwrap().is_none());
        assert!(c.confirmation_once(&reference).await.unwrap().is_none());
        let confirmation = c.confirmation_once(&reference).await.unwrap().unwrap();
        assert!(confirmation.block_number.is_some());
    }

    #[tokio::test]
    async fn test_never_confirming_hits_deadline() {
        // A submission the network never confirms stays pending per probe
        // and trips the deadline as soon as the maximum wait elapses.
        let mock = Arc::new(MockAnchor::new().never_confirming());
        let c = client(mock.clone(), 3, 0);
        let reference = c.submit_with_retries(&[9u8; 32]).await.unwrap();
        assert!(c.confirmation_once(&reference).await.unwrap().is_none());
        let now = Utc::now();
        assert!(c.past_deadline(now, now));
    }

    #[test]
    fn test_deadline_boundary() {
        let mock = Arc::new(MockAnchor::new());
        let c = AnchorClient::new(mock, 3, 600);
        let submitted = Utc::now();
        assert!(!c.past_deadline(submitted, submitted + chrono::Duration::seconds(599)));
        assert!(c.past_deadline(submitted, submitted + chrono::Duration::seconds(600)));
    }

    #[tokio::test]
    async fn test_fetched_root_round_trips() {
        let mock = Arc::new(MockAnchor::new());
        let c = client(mock.clone(), 3, 10);
        let root = [0x42u8; 32];
        let reference = c.submit_with_retries(&root).await.unwrap();
        assert_eq!(mock.fetch_root(&reference).await.unwrap(), root);
    }
}
