//! Pure sizing arithmetic for the hash tree, ported 1:1 from
//! `bithorded/lib/treestore.{hpp,cpp}` and `bithorded/store/hashstore.cpp`.

use crate::node::NODE_SIZE;

/// Size in bytes of one "atom" of content a leaf block is quantized to,
/// before `levels_skipped` widens it. `1024` in the original `TreeHasher`.
pub const ATOM_SIZE: u64 = 1024;

/// Number of nodes in the layer directly above a layer of `nodes` nodes.
pub fn parent_layer_size(nodes: u64) -> u64 {
    if nodes > 1 {
        (nodes + 1) / 2
    } else {
        0
    }
}

/// Total number of nodes in a tree with `leaves` leaves in its bottom layer.
pub fn tree_size(leaves: u64) -> u64 {
    if leaves > 1 {
        leaves + tree_size(parent_layer_size(leaves))
    } else {
        leaves
    }
}

fn calc_leaves_rec(tree_size: u64, layers: u32) -> u64 {
    if tree_size == 0 {
        return 0;
    }
    if layers == 0 {
        return 1;
    }
    let leftside = 1u64 << layers;
    if leftside <= tree_size {
        (1u64 << (layers - 1)) + calc_leaves_rec(tree_size - leftside, layers - 1)
    } else {
        calc_leaves_rec(tree_size - 1, layers - 1)
    }
}

/// Recovers the leaf count of a tree purely from its total node count.
pub fn calc_leaves(tree_size_: u64) -> u64 {
    debug_assert!(tree_size_ >= 1);
    let layers = (tree_size_ as f64).log2() as u32;
    calc_leaves_rec(tree_size_, layers)
}

pub fn atoms_needed_for_content(content_size: u64) -> u64 {
    (content_size + ATOM_SIZE - 1) / ATOM_SIZE
}

pub fn leaves_needed_for_atoms(atoms: u64, levels_skipped: u8) -> u64 {
    let stored_leaves = atoms >> levels_skipped;
    if (stored_leaves << levels_skipped) != atoms {
        stored_leaves + 1
    } else {
        stored_leaves
    }
}

pub fn leaves_needed_for_content(content_size: u64, levels_skipped: u8) -> u64 {
    leaves_needed_for_atoms(atoms_needed_for_content(content_size), levels_skipped)
}

pub fn nodes_needed_for_atoms(atoms: u64, levels_skipped: u8) -> u64 {
    tree_size(leaves_needed_for_atoms(atoms, levels_skipped))
}

pub fn nodes_needed_for_content(content_size: u64, levels_skipped: u8) -> u64 {
    nodes_needed_for_atoms(atoms_needed_for_content(content_size), levels_skipped)
}

pub fn size_needed_for_atoms(atoms: u64, levels_skipped: u8) -> u64 {
    nodes_needed_for_atoms(atoms, levels_skipped) * NODE_SIZE as u64
}

pub fn size_needed_for_content(content_size: u64, levels_skipped: u8) -> u64 {
    size_needed_for_atoms(atoms_needed_for_content(content_size), levels_skipped)
}

/// Block size in bytes of one leaf, given how many tree levels are skipped.
pub fn leaf_block_size(levels_skipped: u8) -> u64 {
    ATOM_SIZE << levels_skipped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_size_matches_hand_counted_layers() {
        // 5 leaves -> layer of 3 -> layer of 2 -> root: 5+3+2+1 = 11
        assert_eq!(tree_size(5), 11);
        assert_eq!(tree_size(1), 1);
        assert_eq!(tree_size(2), 3);
        assert_eq!(tree_size(4), 7);
    }

    #[test]
    fn calc_leaves_round_trips_tree_size() {
        for leaves in 1u64..300 {
            let size = tree_size(leaves);
            assert_eq!(calc_leaves(size), leaves, "leaves={leaves} size={size}");
        }
    }

    #[test]
    fn atoms_needed_rounds_up() {
        assert_eq!(atoms_needed_for_content(0), 0);
        assert_eq!(atoms_needed_for_content(1), 1);
        assert_eq!(atoms_needed_for_content(1024), 1);
        assert_eq!(atoms_needed_for_content(1025), 2);
    }

    #[test]
    fn leaves_needed_for_atoms_overflow_check() {
        assert_eq!(leaves_needed_for_atoms(64, 6), 1);
        assert_eq!(leaves_needed_for_atoms(65, 6), 2);
        assert_eq!(leaves_needed_for_atoms(128, 6), 2);
    }

    #[test]
    fn leaf_block_size_default_levels_skipped() {
        assert_eq!(leaf_block_size(6), 65536);
    }
}
