/// Optional content-addressed storage for full batch payloads.
///
/// The anchor transaction only carries the 32-byte batch root. When a
/// deployment wants the full batch content independently retrievable, the
/// canonical batch JSON is additionally published to a content-addressed
/// store and the CID recorded on the batch. Configuration choice, not an
/// architectural one: verification never depends on it.
pub mod ipfs;

use async_trait::async_trait;

use crate::error::Result;

/// Trait for pluggable content-addressed stores.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Human-readable name of this store (e.g., "IPFS").
    fn name(&self) -> &str;

    /// Publish data. Returns the content identifier.
    async fn put(&self, data: &[u8]) -> Result<String>;

    /// Retrieve data by content identifier.
    async fn get(&self, cid: &str) -> Result<Vec<u8>>;

    /// Check whether a CID is present.
    async fn exists(&self, cid: &str) -> Result<bool>;
}
