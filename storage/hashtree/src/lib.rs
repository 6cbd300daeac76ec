#![warn(unused_crate_dependencies)]

mod data_array;
mod digest;
mod error;
mod id;
mod meta;
mod node;
mod sizing;
mod store;

pub use data_array::{DataArray, FileDataArray, MemoryDataArray, SliceDataArray};
pub use digest::{internal_digest, leaf_digest};
pub use error::Error;
pub use id::TigerId;
pub use meta::{create as create_meta, open_v1, open_v2, AssetMeta, FileFormatVersion};
pub use node::{Node, NodeIdx, State, DIGEST_SIZE};
pub use sizing::{
    atoms_needed_for_content, leaves_needed_for_atoms, leaves_needed_for_content,
    nodes_needed_for_atoms, nodes_needed_for_content, parent_layer_size, size_needed_for_atoms,
    size_needed_for_content, tree_size, ATOM_SIZE,
};
pub use store::HashStore;

pub type Result<T> = std::result::Result<T, Error>;
