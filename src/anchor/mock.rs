/// Deterministic in-memory anchor backend.
///
/// Used by tests and by `ANCHOR_NETWORK=mock` for development without a
/// node. Failure injection covers the scenarios the anchor client must
/// handle: transient outages, node rejections, slow or absent
/// confirmation, and tampered on-chain state.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{AnchorBackend, Confirmation};
use crate::error::{AuditError, Result};

struct MockTx {
    root: [u8; 32],
    polls_remaining: u32,
}

pub struct MockAnchor {
    /// Fail this many submissions with `AnchorUnavailable` before
    /// accepting one.
    fail_submissions: AtomicU32,
    /// Reject every submission outright.
    reject: bool,
    /// Confirmations required before a tx reports as confirmed.
    /// `u32::MAX` = never confirm.
    confirm_after_polls: u32,
    attempts: AtomicU32,
    txs: Mutex<HashMap<String, MockTx>>,
}

impl Default for MockAnchor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAnchor {
    pub fn new() -> Self {
        Self {
            fail_submissions: AtomicU32::new(0),
            reject: false,
            confirm_after_polls: 0,
            attempts: AtomicU32::new(0),
            txs: Mutex::new(HashMap::new()),
        }
    }

    pub fn failing_submissions(self, n: u32) -> Self {
        self.fail_submissions.store(n, Ordering::SeqCst);
        self
    }

    pub fn rejecting(mut self) -> Self {
        self.reject = true;
        self
    }

    pub fn confirming_after(mut self, polls: u32) -> Self {
        self.confirm_after_polls = polls;
        self
    }

    pub fn never_confirming(mut self) -> Self {
        self.confirm_after_polls = u32::MAX;
        self
    }

    /// Total submission attempts observed (including failed ones).
    pub fn submission_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Number of transactions actually accepted by the "network".
    pub fn accepted_count(&self) -> usize {
        self.txs.lock().unwrap().len()
    }

    /// Corrupt the stored root for a reference, simulating a mismatch
    /// between local state and what was anchored.
    pub fn tamper_root(&self, reference: &str) {
        if let Some(tx) = self.txs.lock().unwrap().get_mut(reference) {
            tx.root = [0xFF; 32];
        }
    }
}

#[async_trait]
impl AnchorBackend for MockAnchor {
    fn network(&self) -> &str {
        "mock"
    }

    async fn submit_root(&self, root: &[u8; 32]) -> Result<String> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.reject {
            return Err(AuditError::AnchorRejected("transaction rejected".into()));
        }

        let failures = self.fail_submissions.load(Ordering::SeqCst);
        if attempt < failures {
            return Err(AuditError::AnchorUnavailable("connection refused".into()));
        }

        let mut txs = self.txs.lock().unwrap();
        let reference = format!("0x{:064x}", txs.len() + 1);
        txs.insert(
            reference.clone(),
            MockTx {
                root: *root,
                polls_remaining: self.confirm_after_polls,
            },
        );
        Ok(reference)
    }

    async fn confirmation(&self, reference: &str) -> Result<Option<Confirmation>> {
        let mut txs = self.txs.lock().unwrap();
        let tx = txs
            .get_mut(reference)
            .ok_or_else(|| AuditError::NotFound(format!("unknown tx {reference}")))?;

        if tx.polls_remaining == u32::MAX {
            return Ok(None);
        }
        if tx.polls_remaining > 0 {
            tx.polls_remaining -= 1;
            return Ok(None);
        }
        Ok(Some(Confirmation {
            block_number: Some(12_345),
            gas_used: Some(21_000),
        }))
    }

    async fn fetch_root(&self, reference: &str) -> Result<[u8; 32]> {
        let txs = self.txs.lock().unwrap();
        txs.get(reference)
            .map(|tx| tx.root)
            .ok_or_else(|| AuditError::NotFound(format!("unknown tx {reference}")))
    }
}
