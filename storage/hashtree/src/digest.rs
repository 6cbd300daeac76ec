use digest::Digest;
use tiger::Tiger;

use crate::node::DIGEST_SIZE;

const TREE_LEAF_PREFIX: u8 = 0x00;
const TREE_INTERNAL_PREFIX: u8 = 0x01;

/// Digest of one leaf block: `Tiger(0x00 ++ block)`.
pub fn leaf_digest(block: &[u8]) -> [u8; DIGEST_SIZE] {
    let mut hasher = Tiger::new();
    hasher.update([TREE_LEAF_PREFIX]);
    hasher.update(block);
    truncate(hasher.finalize())
}

/// Digest of an internal node from its two children, in tree order
/// (lower `NodeIdx` first): `Tiger(0x01 ++ left ++ right)`.
pub fn internal_digest(left: &[u8; DIGEST_SIZE], right: &[u8; DIGEST_SIZE]) -> [u8; DIGEST_SIZE] {
    let mut hasher = Tiger::new();
    hasher.update([TREE_INTERNAL_PREFIX]);
    hasher.update(left);
    hasher.update(right);
    truncate(hasher.finalize())
}

fn truncate(full: digest::Output<Tiger>) -> [u8; DIGEST_SIZE] {
    let mut out = [0u8; DIGEST_SIZE];
    out.copy_from_slice(&full[..DIGEST_SIZE]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_digest_is_deterministic() {
        let a = leaf_digest(b"hello world");
        let b = leaf_digest(b"hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn leaf_digest_differs_by_prefix_from_raw_tiger() {
        let leaf = leaf_digest(b"abc");
        let mut raw = Tiger::new();
        raw.update(b"abc");
        let raw: [u8; DIGEST_SIZE] = truncate(raw.finalize());
        assert_ne!(leaf, raw);
    }
}
