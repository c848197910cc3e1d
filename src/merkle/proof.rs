/// Merkle inclusion proof generation and verification.
///
/// Proofs apply the same duplicate-last-node rule as construction: when a
/// node is the odd last node of its level, its recorded sibling is itself.
use serde::{Deserialize, Serialize};

use super::tree::{combine, MerkleTree};

/// Which side a sibling sits on when re-hashing upward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Left,
    Right,
}

/// Inclusion proof for a single leaf. Derived on demand from the batch's
/// stored leaf order; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_index: usize,
    pub leaf_hash: [u8; 32],
    pub siblings: Vec<(Position, [u8; 32])>,
}

impl MerkleTree {
    /// Generate an inclusion proof for the leaf at `index`.
    pub fn prove(&self, index: usize) -> Option<MerkleProof> {
        if index >= self.leaf_count() {
            return None;
        }

        let mut siblings = Vec::new();
        let mut idx = index;

        for level in &self.levels[..self.levels.len().saturating_sub(1)] {
            if level.len() <= 1 {
                break;
            }
            let sibling_idx = if idx % 2 == 0 { idx + 1 } else { idx - 1 };
            let position = if idx % 2 == 0 {
                Position::Right
            } else {
                Position::Left
            };
            // Odd last node: it was combined with a copy of itself.
            let sibling = *level.get(sibling_idx).unwrap_or(&level[idx]);
            siblings.push((position, sibling));

            idx /= 2;
        }

        Some(MerkleProof {
            leaf_index: index,
            leaf_hash: self.leaves()[index],
            siblings,
        })
    }
}

/// Re-apply the construction rule along the proof path and compare to root.
pub fn verify_proof(tree_algo: crate::hash::HashAlgorithm, root: &[u8; 32], proof: &MerkleProof) -> bool {
    let mut current = proof.leaf_hash;

    for (position, sibling) in &proof.siblings {
        current = match position {
            Position::Left => combine(tree_algo, sibling, &current),
            Position::Right => combine(tree_algo, &current, sibling),
        };
    }

    &current == root
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashAlgorithm;

    const ALGO: HashAlgorithm = HashAlgorithm::Sha256;

    fn leaves(n: u8) -> Vec<[u8; 32]> {
        (1..=n).map(|i| [i; 32]).collect()
    }

    #[test]
    fn test_single_leaf_empty_proof() {
        let tree = MerkleTree::from_leaf_hashes(ALGO, leaves(1));
        let proof = tree.prove(0).unwrap();
        assert!(proof.siblings.is_empty());
        assert!(verify_proof(ALGO, &tree.root().unwrap(), &proof));
    }

    #[test]
    fn test_proof_soundness_all_sizes() {
        for n in 1..=9u8 {
            let tree = MerkleTree::from_leaf_hashes(ALGO, leaves(n));
            let root = tree.root().unwrap();
            for i in 0..n as usize {
                let proof = tree.prove(i).unwrap();
                assert!(
                    verify_proof(ALGO, &root, &proof),
                    "proof failed for leaf {i} of {n}"
                );
            }
        }
    }

    #[test]
    fn test_odd_node_sibling_is_itself() {
        // In a 3-leaf tree the last leaf is duplicated, so its first
        // sibling is its own hash.
        let tree = MerkleTree::from_leaf_hashes(ALGO, leaves(3));
        let proof = tree.prove(2).unwrap();
        assert_eq!(proof.siblings[0], (Position::Right, [3u8; 32]));
        assert!(verify_proof(ALGO, &tree.root().unwrap(), &proof));
    }

    #[test]
    fn test_wrong_root_fails() {
        let tree = MerkleTree::from_leaf_hashes(ALGO, leaves(4));
        let proof = tree.prove(1).unwrap();
        assert!(!verify_proof(ALGO, &[0xFF; 32], &proof));
    }

    #[test]
    fn test_tampered_leaf_fails() {
        let tree = MerkleTree::from_leaf_hashes(ALGO, leaves(4));
        let root = tree.root().unwrap();
        let mut proof = tree.prove(1).unwrap();
        proof.leaf_hash = [0xAB; 32];
        assert!(!verify_proof(ALGO, &root, &proof));
    }

    #[test]
    fn test_out_of_bounds() {
        let tree = MerkleTree::from_leaf_hashes(ALGO, leaves(2));
        assert!(tree.prove(2).is_none());
    }

    #[test]
    fn test_proof_wrong_algorithm_fails() {
        let tree = MerkleTree::from_leaf_hashes(ALGO, leaves(4));
        let root = tree.root().unwrap();
        let proof = tree.prove(0).unwrap();
        assert!(!verify_proof(HashAlgorithm::Keccak256, &root, &proof));
    }
}
