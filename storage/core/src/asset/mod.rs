mod binding;
mod forwarded;
mod stored;

pub use binding::{RequestBinding, RequestParameters};
pub use forwarded::{ForwardedAsset, PendingRead};
pub use stored::StoredAsset;

use std::collections::HashSet;

use async_trait::async_trait;
use bytes::Bytes;
use bithorded_hashtree::TigerId;
use tokio::sync::watch;

/// Aggregate status of an asset, mirroring the bithorde wire `AssetStatus`
/// message (spec.md §6) without owning any wire-framing concerns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub availability: u32,
    pub code: StatusCode,
    pub size: Option<u64>,
    pub ids: Vec<TigerId>,
    /// Session ids of every server this status has already passed through,
    /// used to detect a request looping back to its own origin (spec §4.7).
    pub servers: HashSet<u64>,
}

impl Default for Status {
    fn default() -> Self {
        Status {
            availability: 0,
            code: StatusCode::None,
            size: None,
            ids: Vec::new(),
            servers: HashSet::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Success,
    NotFound,
    None,
}

/// The capability every servable asset (stored, forwarded, or cached)
/// implements — the Rust analogue of the original `IAsset`.
#[async_trait]
pub trait Asset: Send + Sync {
    fn id(&self) -> &str;
    fn size(&self) -> u64;

    /// Bytes available to read immediately starting at `offset`, clamped to
    /// `size` and to the asset's own chunk-size cap.
    fn can_read(&self, offset: u64, size: usize) -> usize;

    /// Reads up to `size` bytes from `offset`; returns `None` if nothing
    /// could be read within `timeout`.
    async fn async_read(&self, offset: u64, size: usize, timeout: std::time::Duration) -> Option<Bytes>;

    fn status(&self) -> watch::Receiver<Status>;

    /// Reacts to a binding's downstream subscriber set changing from `old`
    /// to `new`. Only [`ForwardedAsset`] needs to rebind/drop upstreams on
    /// this; every other asset keeps the default no-op.
    async fn apply(&self, _old: &RequestParameters, _new: &RequestParameters) {}
}

/// Like the original's `ChangeGuard`/`Subscribable`: a `watch` channel plus a
/// helper that only sends when the value genuinely changed.
pub struct StatusChannel {
    tx: watch::Sender<Status>,
}

impl StatusChannel {
    pub fn new(initial: Status) -> Self {
        let (tx, _rx) = watch::channel(initial);
        StatusChannel { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.tx.subscribe()
    }

    pub fn update(&self, f: impl FnOnce(&mut Status)) {
        self.tx.send_if_modified(|status| {
            let before = status.clone();
            f(status);
            *status != before
        });
    }
}

/// The set of downstream requesters aggregated across one binding, as the
/// original `AssetRequestParameters`.
#[derive(Debug, Clone, Default)]
pub struct AggregatedRequesters {
    pub session_ids: HashSet<u64>,
}
