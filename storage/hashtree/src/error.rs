/// Errors surfaced by the hash-tree and on-disk meta layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("hash storage of size 0 is pointless: {0}")]
    EmptyStorage(String),

    #[error("hash storage not an even multiple of node size: {0}")]
    MisalignedStorage(String),

    #[error("file size {size} less than header size {header_size} in {path}")]
    HeaderTooShort {
        path: String,
        size: u64,
        header_size: usize,
    },

    #[error("unknown meta file format byte {0:#x} in {1}")]
    UnknownFormat(u8, String),

    #[error("failed reading node at offset {0}")]
    NodeReadFailed(u64),

    #[error("failed writing node at offset {0}")]
    NodeWriteFailed(u64),

    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    #[error("short write: expected {expected} bytes, got {got}")]
    ShortWrite { expected: usize, got: usize },

    #[error("read out of bounds: offset {offset} size {size} exceeds length {len}")]
    OutOfBounds {
        offset: u64,
        size: usize,
        len: u64,
    },

    #[error("invalid tiger id: {0}")]
    InvalidTigerId(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
