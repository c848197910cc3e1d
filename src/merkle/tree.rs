/// Binary Merkle tree over event hashes.
///
/// Construction rules (fixed; verification applies the same rules):
///   parent = H(left_bytes || right_bytes)   — order never swapped
///   odd level: the last node is DUPLICATED, i.e. paired with itself
/// A single-leaf tree has root == the leaf hash (no duplication).
///
/// Leaves are event hashes as stored; no additional leaf hashing step.
use crate::hash::HashAlgorithm;

/// Hash two child nodes to produce a parent.
pub fn combine(algo: HashAlgorithm, left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut input = [0u8; 64];
    input[..32].copy_from_slice(left);
    input[32..].copy_from_slice(right);
    algo.digest(&input)
}

pub struct MerkleTree {
    algo: HashAlgorithm,
    /// All levels. levels[0] = leaves, levels[last] = [root].
    pub(crate) levels: Vec<Vec<[u8; 32]>>,
}

impl MerkleTree {
    /// Build a tree from pre-computed leaf hashes, in the order given.
    /// Leaf order is fixed by the batch and must not be re-sorted.
    pub fn from_leaf_hashes(algo: HashAlgorithm, leaves: Vec<[u8; 32]>) -> Self {
        if leaves.is_empty() {
            return Self {
                algo,
                levels: vec![vec![]],
            };
        }

        let mut levels = vec![leaves];

        while levels.last().unwrap().len() > 1 {
            let current = levels.last().unwrap();
            let mut next = Vec::with_capacity(current.len().div_ceil(2));

            let mut i = 0;
            while i < current.len() {
                let left = &current[i];
                // Odd node: duplicate (pair with itself)
                let right = current.get(i + 1).unwrap_or(left);
                next.push(combine(algo, left, right));
                i += 2;
            }

            levels.push(next);
        }

        Self { algo, levels }
    }

    /// The Merkle root. None for an empty tree.
    pub fn root(&self) -> Option<[u8; 32]> {
        self.levels.last()?.first().copied()
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, |l| l.len())
    }

    pub fn leaves(&self) -> &[[u8; 32]] {
        self.levels.first().map_or(&[], |l| l.as_slice())
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algo
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALGO: HashAlgorithm = HashAlgorithm::Sha256;

    fn leaf(byte: u8) -> [u8; 32] {
        [byte; 32]
    }

    #[test]
    fn test_single_leaf_root_is_leaf() {
        let tree = MerkleTree::from_leaf_hashes(ALGO, vec![leaf(1)]);
        assert_eq!(tree.leaf_count(), 1);
        assert_eq!(tree.root(), Some(leaf(1)));
    }

    #[test]
    fn test_two_leaves() {
        let tree = MerkleTree::from_leaf_hashes(ALGO, vec![leaf(1), leaf(2)]);
        let expected = combine(ALGO, &leaf(1), &leaf(2));
        assert_eq!(tree.root(), Some(expected));
    }

    #[test]
    fn test_three_leaves_duplicate_last() {
        // Level 0: [a, b, c]
        // Level 1: [H(a||b), H(c||c)]   (c paired with itself)
        // Level 2: [H(level1[0] || level1[1])]
        let (a, b, c) = (leaf(1), leaf(2), leaf(3));
        let tree = MerkleTree::from_leaf_hashes(ALGO, vec![a, b, c]);

        let h_ab = combine(ALGO, &a, &b);
        let h_cc = combine(ALGO, &c, &c);
        let root = combine(ALGO, &h_ab, &h_cc);
        assert_eq!(tree.root(), Some(root));
    }

    #[test]
    fn test_four_leaves() {
        let (a, b, c, d) = (leaf(1), leaf(2), leaf(3), leaf(4));
        let tree = MerkleTree::from_leaf_hashes(ALGO, vec![a, b, c, d]);
        let h_ab = combine(ALGO, &a, &b);
        let h_cd = combine(ALGO, &c, &d);
        assert_eq!(tree.root(), Some(combine(ALGO, &h_ab, &h_cd)));
    }

    #[test]
    fn test_empty_tree() {
        let tree = MerkleTree::from_leaf_hashes(ALGO, vec![]);
        assert_eq!(tree.root(), None);
        assert_eq!(tree.leaf_count(), 0);
    }

    #[test]
    fn test_deterministic() {
        let leaves = vec![leaf(9), leaf(8), leaf(7)];
        let t1 = MerkleTree::from_leaf_hashes(ALGO, leaves.clone());
        let t2 = MerkleTree::from_leaf_hashes(ALGO, leaves);
        assert_eq!(t1.root(), t2.root());
    }

    #[test]
    fn test_leaf_order_matters() {
        let t1 = MerkleTree::from_leaf_hashes(ALGO, vec![leaf(1), leaf(2)]);
        let t2 = MerkleTree::from_leaf_hashes(ALGO, vec![leaf(2), leaf(1)]);
        assert_ne!(t1.root(), t2.root());
    }

    #[test]
    fn test_keccak_root_differs() {
        let leaves = vec![leaf(1), leaf(2)];
        let sha = MerkleTree::from_leaf_hashes(HashAlgorithm::Sha256, leaves.clone());
        let keccak = MerkleTree::from_leaf_hashes(HashAlgorithm::Keccak256, leaves);
        assert_ne!(sha.root(), keccak.root());
    }
}
