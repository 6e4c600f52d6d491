//! SHA-256 based hashing helpers: identity hashes for deduplication and
//! RFC 6962 leaf/interior hashing for the Merkle tree.

use sha2::{Digest, Sha256};

use crate::{IdentityHash, LeafHash};

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// Identity hash of a leaf: plain SHA-256 over its data.
pub fn identity_hash(data: &[u8]) -> IdentityHash {
    Sha256::digest(data).into()
}

/// RFC 6962 leaf hash: `SHA-256(0x00 || data)`.
pub fn leaf_hash(data: &[u8]) -> LeafHash {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(data);
    hasher.finalize().into()
}

/// RFC 6962 interior node hash: `SHA-256(0x01 || left || right)`.
pub fn node_hash(left: &LeafHash, right: &LeafHash) -> LeafHash {
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Root of the empty tree: `SHA-256("")`.
pub fn empty_root() -> LeafHash {
    Sha256::digest(b"").into()
}

/// Root over a contiguous run of leaf hashes, splitting at the largest power
/// of two strictly smaller than the length, per RFC 6962.
pub fn root_from_leaf_hashes(hashes: &[LeafHash]) -> LeafHash {
    match hashes.len() {
        0 => empty_root(),
        1 => hashes[0],
        n => {
            let split = largest_power_of_two_below(n);
            let left = root_from_leaf_hashes(&hashes[..split]);
            let right = root_from_leaf_hashes(&hashes[split..]);
            node_hash(&left, &right)
        }
    }
}

fn largest_power_of_two_below(n: usize) -> usize {
    debug_assert!(n > 1);
    let mut split = 1;
    while split * 2 < n {
        split *= 2;
    }
    split
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_root_is_sha256_of_nothing() {
        assert_eq!(
            hex::encode(empty_root()),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn leaf_hash_is_domain_separated() {
        // Known RFC 6962 vector: leaf hash of the empty leaf.
        assert_eq!(
            hex::encode(leaf_hash(b"")),
            "6e340b9cffb37a989ca544e6bb780a2c78901d3fb33738768511a30617afa01d"
        );

        assert_ne!(leaf_hash(b"x"), identity_hash(b"x"));
    }

    #[test]
    fn root_of_single_leaf_is_the_leaf_hash() {
        let h = leaf_hash(b"one");
        assert_eq!(root_from_leaf_hashes(&[h]), h);
    }

    #[test]
    fn root_splits_at_power_of_two() {
        let hashes: Vec<_> = (0u8..5).map(|i| leaf_hash(&[i])).collect();

        let left = root_from_leaf_hashes(&hashes[..4]);
        let right = root_from_leaf_hashes(&hashes[4..]);

        assert_eq!(
            root_from_leaf_hashes(&hashes),
            node_hash(&left, &right)
        );
    }

    #[test]
    fn split_points() {
        assert_eq!(largest_power_of_two_below(2), 1);
        assert_eq!(largest_power_of_two_below(3), 2);
        assert_eq!(largest_power_of_two_below(4), 2);
        assert_eq!(largest_power_of_two_below(5), 4);
        assert_eq!(largest_power_of_two_below(257), 256);
    }
}
