use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bithorded_hashtree::TigerId;
use bytes::Bytes;
use tokio::sync::watch;
use tracing::warn;

use super::{Asset, RequestParameters, Status, StatusChannel, StatusCode};

/// One read a downstream is waiting on, forwarded upstream. If the
/// asset is dropped (or the peer it was sent to is dropped) before the
/// data arrives, `cancel` fires the callback with an empty result —
/// mirroring the original `PendingRead::cancel`.
pub struct PendingRead {
    pub offset: u64,
    pub size: usize,
    responder: tokio::sync::oneshot::Sender<Option<Bytes>>,
}

impl PendingRead {
    pub fn new(offset: u64, size: usize, responder: tokio::sync::oneshot::Sender<Option<Bytes>>) -> Self {
        PendingRead { offset, size, responder }
    }

    pub fn deliver(self, data: Bytes) {
        let _ = self.responder.send(Some(data));
    }

    pub fn cancel(self) {
        let _ = self.responder.send(None);
    }
}

/// A peer server this node forwards reads to. The wire protocol itself is
/// out of scope; this is the seam a connection layer implements.
#[async_trait]
pub trait UpstreamPeer: Send + Sync {
    fn peer_name(&self) -> &str;

    /// Opens a binding on this peer for `ids`, tagged with the downstream
    /// session ids that triggered it (for loop-trace purposes).
    async fn bind(
        &self,
        ids: &[TigerId],
        requesters: Vec<u64>,
        timeout_ms: u32,
    ) -> Option<std::sync::Arc<dyn UpstreamHandle>>;
}

/// A live binding to one upstream peer for one asset.
#[async_trait]
pub trait UpstreamHandle: Send + Sync {
    fn status(&self) -> watch::Receiver<Status>;
    async fn async_read(&self, offset: u64, size: usize) -> Option<Bytes>;
    fn cancel(&self);
}

struct Upstream {
    handle: std::sync::Arc<dyn UpstreamHandle>,
    last_status: Status,
    /// Observed round-trip of the most recent read, used to pick the
    /// fastest-responding upstream for the next one.
    response_time: Duration,
}

/// An asset whose bytes come from one or more upstream peers, aggregated
/// behind a single local asset identity. Mirrors `router::ForwardedAsset`.
pub struct ForwardedAsset {
    requested_ids: Vec<TigerId>,
    session_id: u64,
    upstreams: Mutex<HashMap<String, Upstream>>,
    pending_reads: Mutex<Vec<PendingRead>>,
    requesters: Mutex<HashSet<u64>>,
    size: AtomicU64,
    status: StatusChannel,
}

const UNKNOWN_SIZE: u64 = u64::MAX;

impl ForwardedAsset {
    pub fn new(requested_ids: Vec<TigerId>, session_id: u64) -> Self {
        ForwardedAsset {
            requested_ids,
            session_id,
            upstreams: Mutex::new(HashMap::new()),
            pending_reads: Mutex::new(Vec::new()),
            requesters: Mutex::new(HashSet::new()),
            size: AtomicU64::new(UNKNOWN_SIZE),
            status: StatusChannel::new(Status::default()),
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn has_upstream(&self, peer_name: &str) -> bool {
        self.upstreams.lock().unwrap().contains_key(peer_name)
    }

    /// Snapshot of every downstream session id that has ever asked for this
    /// asset, used to tag new upstream bindings (e.g. when a friend
    /// reconnects after this asset was already opened).
    pub fn requesters_snapshot(&self) -> Vec<u64> {
        self.requesters.lock().unwrap().iter().copied().collect()
    }

    pub async fn add_upstream(
        &self,
        peer: &dyn UpstreamPeer,
        requesters: Vec<u64>,
        timeout_ms: u32,
    ) {
        let peer_name = peer.peer_name().to_string();
        self.requesters.lock().unwrap().extend(requesters.iter().copied());
        if self.has_upstream(&peer_name) {
            return;
        }
        if let Some(handle) = peer.bind(&self.requested_ids, requesters, timeout_ms).await {
            let status = handle.status().borrow().clone();
            self.upstreams.lock().unwrap().insert(
                peer_name.clone(),
                Upstream {
                    handle,
                    last_status: status.clone(),
                    response_time: Duration::from_secs(u64::MAX >> 32),
                },
            );
            self.on_upstream_status(&peer_name, status);
        }
    }

    pub fn drop_upstream(&self, peer_name: &str) {
        if let Some(upstream) = self.upstreams.lock().unwrap().remove(peer_name) {
            upstream.handle.cancel();
        }
        self.recompute_status();
    }

    /// Applies a freshly-observed status from one upstream, detecting
    /// routing loops and size conflicts, then recomputes the aggregate.
    pub fn on_upstream_status(&self, peer_name: &str, status: Status) {
        if status.size.is_some_and(|s| s > (1u64 << 60)) {
            warn!(peer_name, size = ?status.size, "suspiciously large upstream size");
        }

        match status.code {
            StatusCode::Success => {
                let loops_back = {
                    let requesters = self.requesters.lock().unwrap();
                    status.servers.iter().any(|s| requesters.contains(s))
                };
                if loops_back {
                    warn!(peer_name, "upstream status loops back through our own requesters, dropping");
                    self.drop_upstream(peer_name);
                    return;
                }
                if let Some(upstream_size) = status.size {
                    let current = self.size.load(Ordering::SeqCst);
                    if current != UNKNOWN_SIZE && current != upstream_size {
                        warn!(peer_name, current, upstream_size, "upstream size conflict, dropping");
                        self.drop_upstream(peer_name);
                        return;
                    }
                    self.size.store(upstream_size, Ordering::SeqCst);
                }
                let mut upstreams = self.upstreams.lock().unwrap();
                if let Some(u) = upstreams.get_mut(peer_name) {
                    u.last_status = status;
                }
            }
            StatusCode::NotFound | StatusCode::None => {
                drop(self.upstreams.lock().unwrap().remove(peer_name));
            }
        }
        self.recompute_status();
    }

    /// Recomputes the whole aggregate from `upstreams` every time (see
    /// DESIGN.md open question 1): availability 1000 iff any upstream
    /// SUCCESS, status SUCCESS if any, else NOTFOUND if none, else NONE.
    fn recompute_status(&self) {
        let upstreams = self.upstreams.lock().unwrap();
        let any_success = upstreams.values().any(|u| u.last_status.code == StatusCode::Success);
        let any_notfound = upstreams.values().any(|u| u.last_status.code == StatusCode::NotFound);
        let size = self.size.load(Ordering::SeqCst);

        let mut servers: HashSet<u64> = upstreams
            .values()
            .flat_map(|u| u.last_status.servers.iter().copied())
            .collect();
        servers.insert(self.session_id);

        self.status.update(|s| {
            s.availability = if any_success { 1000 } else { 0 };
            s.code = if any_success {
                StatusCode::Success
            } else if any_notfound || upstreams.is_empty() {
                StatusCode::NotFound
            } else {
                StatusCode::None
            };
            s.size = if size == UNKNOWN_SIZE { None } else { Some(size) };
            s.ids = self.requested_ids.clone();
            s.servers = servers.clone();
        });
    }

    /// Reacts to a downstream subscriber-set change (spec §4.7): drops every
    /// upstream once nobody is listening anymore, otherwise folds the newly
    /// interested requesters into the aggregate so later loop checks and
    /// rebinds see them.
    async fn apply_change(&self, old: &RequestParameters, new: &RequestParameters) {
        if new.requesters.is_empty() {
            let peer_names: Vec<String> = self.upstreams.lock().unwrap().keys().cloned().collect();
            for peer_name in peer_names {
                self.drop_upstream(&peer_name);
            }
            return;
        }

        let newly_interested: Vec<u64> = new.requesters.difference(&old.requesters).copied().collect();
        if !newly_interested.is_empty() {
            self.requesters.lock().unwrap().extend(newly_interested);
            self.recompute_status();
        }
    }

    /// Picks the SUCCESS upstream with the lowest observed response time,
    /// ties broken by iteration order (HashMap order, same as the
    /// original's unordered `std::map` tie-break-by-whatever-came-first).
    fn pick_fastest_upstream(&self) -> Option<std::sync::Arc<dyn UpstreamHandle>> {
        let upstreams = self.upstreams.lock().unwrap();
        upstreams
            .values()
            .filter(|u| u.last_status.code == StatusCode::Success)
            .min_by_key(|u| u.response_time)
            .map(|u| u.handle.clone())
    }
}

#[async_trait]
impl Asset for ForwardedAsset {
    fn id(&self) -> &str {
        "forwarded"
    }

    fn size(&self) -> u64 {
        let size = self.size.load(Ordering::SeqCst);
        if size == UNKNOWN_SIZE {
            0
        } else {
            size
        }
    }

    fn can_read(&self, _offset: u64, size: usize) -> usize {
        // Forwarded assets don't know in advance what's locally buffered;
        // the caller always attempts an async_read and gets back whatever
        // the fastest upstream actually has.
        size
    }

    async fn async_read(&self, offset: u64, size: usize, timeout: Duration) -> Option<Bytes> {
        let handle = self.pick_fastest_upstream()?;
        let start = std::time::Instant::now();
        let result = tokio::time::timeout(timeout, handle.async_read(offset, size))
            .await
            .ok()
            .flatten();
        let elapsed = start.elapsed();
        // best-effort response-time bookkeeping; a miss just leaves the old estimate
        if let Some(upstream) = self
            .upstreams
            .lock()
            .unwrap()
            .values_mut()
            .find(|u| std::sync::Arc::ptr_eq(&u.handle, &handle))
        {
            upstream.response_time = elapsed;
        }
        result
    }

    fn status(&self) -> watch::Receiver<Status> {
        self.status.subscribe()
    }

    async fn apply(&self, old: &RequestParameters, new: &RequestParameters) {
        self.apply_change(old, new).await;
    }
}

impl Drop for ForwardedAsset {
    fn drop(&mut self) {
        for pending in self.pending_reads.get_mut().unwrap().drain(..) {
            pending.cancel();
        }
    }
}
