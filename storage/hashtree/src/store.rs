use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tracing::trace;

use crate::data_array::DataArray;
use crate::digest::internal_digest;
use crate::error::Error;
use crate::node::{Node, NodeIdx, State, DIGEST_SIZE, NODE_SIZE, TREE_ROOT_NODE};
use crate::sizing::{calc_leaves, leaf_block_size, parent_layer_size, tree_size};

/// A cached, write-back handle to one node in the tree.
///
/// Mirrors the original `TigerNode`: reading it loads the current on-disk
/// value, mutating it only changes the in-memory copy, and the write-back
/// to storage happens exactly once, on drop, iff the value actually changed.
pub struct CachedNode {
    storage: Arc<dyn DataArray>,
    offset: u64,
    state: Mutex<(Node, Node)>,
}

impl CachedNode {
    fn load(storage: Arc<dyn DataArray>, offset: u64) -> Result<Arc<Self>, Error> {
        let node = read_node(storage.as_ref(), offset)?;
        Ok(Arc::new(CachedNode {
            storage,
            offset,
            state: Mutex::new((node, node)),
        }))
    }

    pub fn get(&self) -> Node {
        self.state.lock().unwrap().0
    }

    pub fn set(&self, node: Node) {
        self.state.lock().unwrap().0 = node;
    }
}

impl Drop for CachedNode {
    fn drop(&mut self) {
        let (current, original) = *self.state.lock().unwrap();
        if current != original {
            if let Err(err) = write_node(self.storage.as_ref(), self.offset, current) {
                trace!(offset = self.offset, error = %err, "failed to flush hash node on drop");
            }
        }
    }
}

fn read_node(storage: &dyn DataArray, offset: u64) -> Result<Node, Error> {
    let f_offset = offset * NODE_SIZE as u64;
    let mut buf = [0u8; NODE_SIZE];
    let read = storage.read(f_offset, &mut buf)?;
    if read != NODE_SIZE {
        return Err(Error::NodeReadFailed(offset));
    }
    Node::from_bytes(&buf)
}

fn write_node(storage: &dyn DataArray, offset: u64, node: Node) -> Result<(), Error> {
    let f_offset = offset * NODE_SIZE as u64;
    let buf = node.to_bytes();
    let written = storage.write(f_offset, &buf)?;
    if written != NODE_SIZE {
        return Err(Error::NodeWriteFailed(offset));
    }
    Ok(())
}

/// A Tiger hash tree backed by a fixed-size array of packed nodes.
///
/// `levels_skipped` widens each leaf block beyond the base atom size (see
/// [`crate::sizing`]); `0` means one leaf covers exactly one 1024-byte atom.
pub struct HashStore {
    storage: Arc<dyn DataArray>,
    levels_skipped: u8,
    leaves: u64,
    cache: Mutex<HashMap<u64, Weak<CachedNode>>>,
}

impl HashStore {
    pub fn new(storage: Arc<dyn DataArray>, levels_skipped: u8) -> Result<Self, Error> {
        let size = storage.size();
        if size == 0 {
            return Err(Error::EmptyStorage(storage.describe()));
        }
        if size % NODE_SIZE as u64 != 0 {
            return Err(Error::MisalignedStorage(storage.describe()));
        }
        let leaves = calc_leaves(size / NODE_SIZE as u64);
        Ok(HashStore {
            storage,
            levels_skipped,
            leaves,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn leaves(&self) -> u64 {
        self.leaves
    }

    pub fn hash_levels_skipped(&self) -> u8 {
        self.levels_skipped
    }

    pub fn leaf_block_size(&self) -> u64 {
        leaf_block_size(self.levels_skipped)
    }

    fn storage_offset(&self, idx: NodeIdx) -> u64 {
        tree_size(parent_layer_size(idx.layer_size)) + idx.node_idx
    }

    /// Get-or-create a cached handle for the node at `idx`, deduplicated
    /// through the weak map so concurrent callers share one in-memory node.
    pub fn node(&self, idx: NodeIdx) -> Result<Arc<CachedNode>, Error> {
        let offset = self.storage_offset(idx);
        let mut cache = self.cache.lock().unwrap();
        if let Some(weak) = cache.get(&offset) {
            if let Some(node) = weak.upgrade() {
                return Ok(node);
            }
        }
        let node = CachedNode::load(self.storage.clone(), offset)?;
        cache.insert(offset, Arc::downgrade(&node));
        Ok(node)
    }

    pub fn root(&self) -> Result<Arc<CachedNode>, Error> {
        self.node(TREE_ROOT_NODE)
    }

    pub fn leaf_idx(&self, i: u64) -> NodeIdx {
        NodeIdx::new(i, self.leaves)
    }

    pub fn has_root_hash(&self) -> Result<bool, Error> {
        Ok(self.root()?.get().is_set())
    }

    pub fn is_block_set(&self, i: u64) -> bool {
        if i >= self.leaves {
            return false;
        }
        match self.node(self.leaf_idx(i)) {
            Ok(n) => n.get().is_set(),
            Err(_) => false,
        }
    }

    /// Set a leaf's digest directly (caller has already hashed the block)
    /// and propagate the new value towards the root.
    pub fn set_leaf(&self, i: u64, digest: [u8; DIGEST_SIZE]) -> Result<(), Error> {
        let idx = self.leaf_idx(i);
        let node = self.node(idx)?;
        node.set(Node {
            state: State::Set,
            digest,
        });
        self.propagate(idx)
    }

    /// Propagate a freshly-set node's digest up the tree as far as it can go:
    /// stops at a parent that's already set (no re-verification), copies the
    /// digest verbatim across an odd (childless-sibling) promotion, else
    /// combines with a ready sibling.
    fn propagate(&self, current_idx: NodeIdx) -> Result<(), Error> {
        if current_idx.is_root() {
            return Ok(());
        }
        let parent_idx = current_idx.parent();
        let parent = self.node(parent_idx)?;
        if parent.get().is_set() {
            return Ok(());
        }

        let sibling_idx = current_idx.sibling();
        let new_parent_digest = if sibling_idx.is_valid() {
            let sibling = self.node(sibling_idx)?;
            let sibling_node = sibling.get();
            if !sibling_node.is_set() {
                return Ok(());
            }
            let current = self.node(current_idx)?.get();
            if sibling_idx.node_idx < current_idx.node_idx {
                internal_digest(&sibling_node.digest, &current.digest)
            } else {
                internal_digest(&current.digest, &sibling_node.digest)
            }
        } else {
            self.node(current_idx)?.get().digest
        };

        parent.set(Node {
            state: State::Set,
            digest: new_parent_digest,
        });
        self.propagate(parent_idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_array::MemoryDataArray;
    use crate::digest::leaf_digest;
    use crate::sizing::{size_needed_for_atoms, atoms_needed_for_content};

    fn new_store(content_size: u64, levels_skipped: u8) -> HashStore {
        let atoms = atoms_needed_for_content(content_size);
        let size = size_needed_for_atoms(atoms, levels_skipped);
        let storage = Arc::new(MemoryDataArray::new(size));
        HashStore::new(storage, levels_skipped).unwrap()
    }

    #[test]
    fn single_leaf_root_equals_leaf_digest() {
        let store = new_store(1024, 6);
        assert_eq!(store.leaves(), 1);
        let block = vec![b'A'; 1024];
        let digest = leaf_digest(&block);
        store.set_leaf(0, digest).unwrap();
        assert!(store.has_root_hash().unwrap());
        assert_eq!(store.root().unwrap().get().digest, digest);
    }

    #[test]
    fn root_is_order_independent_of_leaf_set_order() {
        let block_size = 65536usize;
        let content_size = block_size as u64 * 3;
        let blocks: Vec<Vec<u8>> = (0..3)
            .map(|i| vec![(b'A' + i as u8); block_size])
            .collect();
        let digests: Vec<_> = blocks.iter().map(|b| leaf_digest(b)).collect();

        let forward = new_store(content_size, 6);
        for (i, d) in digests.iter().enumerate() {
            forward.set_leaf(i as u64, *d).unwrap();
        }

        let backward = new_store(content_size, 6);
        for (i, d) in digests.iter().enumerate().rev() {
            backward.set_leaf(i as u64, *d).unwrap();
        }

        assert!(forward.has_root_hash().unwrap());
        assert!(backward.has_root_hash().unwrap());
        assert_eq!(
            forward.root().unwrap().get().digest,
            backward.root().unwrap().get().digest
        );
    }

    #[test]
    fn known_vector_2049_bytes_of_a() {
        // spec scenario 2: 2049 bytes of 'A' with block_size = 1024 spans
        // three leaves, the last holding only the trailing 1 byte.
        let content_size = 2049u64;
        let levels_skipped = 0u8;
        let store = new_store(content_size, levels_skipped);
        assert_eq!(store.leaves(), 3);

        let chunks: [Vec<u8>; 3] = [vec![b'A'; 1024], vec![b'A'; 1024], vec![b'A'; 1]];
        for (i, chunk) in chunks.iter().enumerate() {
            store.set_leaf(i as u64, leaf_digest(chunk)).unwrap();
        }

        assert!(store.has_root_hash().unwrap());
        let id = crate::id::TigerId::from_digest(store.root().unwrap().get().digest);
        assert_eq!(id.to_base32(), "2IFFIJQ22FKZA3NCSVOQHPVJVNPJKTGDKOB3LTI");
    }

    #[test]
    fn known_vector_87234_bytes_of_a() {
        // spec scenario 6: 87234 bytes of 'A' with the default
        // levels_skipped = 6 (64KiB leaves) spans two leaves, the second
        // holding the trailing 21698 bytes.
        let content_size = 87234u64;
        let levels_skipped = 6u8;
        let store = new_store(content_size, levels_skipped);
        assert_eq!(store.leaves(), 2);

        let block_size = store.leaf_block_size() as usize;
        let tail = (content_size as usize) - block_size;
        let chunks: [Vec<u8>; 2] = [vec![b'A'; block_size], vec![b'A'; tail]];
        for (i, chunk) in chunks.iter().enumerate() {
            store.set_leaf(i as u64, leaf_digest(chunk)).unwrap();
        }

        assert!(store.has_root_hash().unwrap());
        let id = crate::id::TigerId::from_digest(store.root().unwrap().get().digest);
        assert_eq!(id.to_base32(), "5V7AM5PT6PVGTCWITETZUFPBTCDK2DPHBJMTFWI");
    }

    #[test]
    fn partial_tree_has_no_root_hash_yet() {
        let block_size = 65536usize;
        let store = new_store(block_size as u64 * 3, 6);
        store.set_leaf(0, leaf_digest(&vec![1u8; block_size])).unwrap();
        assert!(!store.has_root_hash().unwrap());
        assert!(store.is_block_set(0));
        assert!(!store.is_block_set(1));
    }
}
