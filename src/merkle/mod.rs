/// Merkle batching for audit events.
///
/// A sealed batch's events become the leaves of a binary hash tree; the
/// root summarizes the whole batch and is what gets anchored on-chain.
/// Inclusion proofs show a single event belongs to an anchored root
/// without revealing the rest of the batch.
pub mod proof;
pub mod tree;

pub use proof::{verify_proof, MerkleProof, Position};
pub use tree::MerkleTree;
