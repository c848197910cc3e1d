/// Tamper-evident audit trail with blockchain anchoring.
///
/// ERP modules capture business events here; events are hashed
/// canonically, grouped into Merkle batches, and each batch root is
/// anchored on an external blockchain. Any later mutation of a stored
/// event is detectable against the anchored root.
pub mod anchor;
pub mod batch;
pub mod canonical;
pub mod config;
pub mod error;
pub mod hash;
pub mod merkle;
pub mod server;
pub mod storage;
pub mod store;
pub mod verify;
pub mod worker;
