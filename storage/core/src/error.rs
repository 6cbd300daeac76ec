/// The steady-state error taxonomy for bind/read requests and store
/// management, mirroring spec.md §7's table.
#[derive(Debug, thiserror::Error)]
pub enum BithordeError {
    #[error("requested asset not found")]
    NotFound,

    #[error("routing would loop back to this node")]
    WouldLoop,

    #[error("no space available to cache asset of size {0}")]
    NoSpaceAvailable(u64),

    #[error("asset {0} has no known upstream")]
    NoUpstream(String),

    #[error("upstream reported conflicting size for asset: expected {expected}, got {got}")]
    SizeConflict { expected: u64, got: u64 },

    #[error("read request timed out")]
    Timeout,

    #[error(transparent)]
    HashTree(#[from] bithorded_hashtree::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BithordeError>;
