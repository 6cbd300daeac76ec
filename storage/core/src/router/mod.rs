mod connector;

pub use connector::FriendConnector;

use std::collections::{BinaryHeap, HashMap, HashSet};
use std::cmp::Reverse;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bithorded_hashtree::TigerId;
use tracing::info;

use crate::asset::{ForwardedAsset, UpstreamPeer};
use crate::asset_sessions::AssetSessions;
use crate::config::{FriendConfig, RouterConfig};
use crate::error::{BithordeError, Result};
use crate::sessions::WeakSet;

/// Dials a configured friend and, on success, hands back the live peer
/// handle. The actual network/wire protocol is out of scope; this is the
/// seam a connection layer implements.
#[async_trait]
pub trait PeerDialer: Send + Sync {
    async fn dial(&self, friend: &FriendConfig) -> Option<Arc<dyn UpstreamPeer>>;
}

/// Aggregates upstream peers, forwards unresolved requests to them, and
/// protects against routing loops. Mirrors `bithorded::router::Router`.
pub struct Router {
    config: RouterConfig,
    dialer: Arc<dyn PeerDialer>,
    friends: Mutex<HashMap<String, FriendConfig>>,
    connectors: Mutex<HashMap<String, FriendConnector>>,
    connected: Mutex<HashMap<String, Arc<dyn UpstreamPeer>>>,
    blacklist: Mutex<Blacklist>,
    open_assets: WeakSet<ForwardedAsset>,
    sessions: AssetSessions,
    next_session_id: Mutex<u64>,
}

struct Blacklist {
    ids: HashSet<u64>,
    deadlines: BinaryHeap<Reverse<(Instant, u64)>>,
}

impl Blacklist {
    fn new() -> Self {
        Blacklist {
            ids: HashSet::new(),
            deadlines: BinaryHeap::new(),
        }
    }

    fn add(&mut self, deadline: Instant, uid: u64) {
        self.ids.insert(uid);
        self.deadlines.push(Reverse((deadline, uid)));
    }

    /// Lazily expires everything whose deadline has passed, then checks
    /// whether any of `uids` is currently blacklisted.
    fn is_blacklisted(&mut self, now: Instant, uids: &[u64]) -> bool {
        while let Some(&Reverse((deadline, uid))) = self.deadlines.peek() {
            if deadline > now {
                break;
            }
            self.deadlines.pop();
            self.ids.remove(&uid);
        }
        uids.iter().any(|id| self.ids.contains(id))
    }
}

impl Router {
    pub fn new(config: RouterConfig, dialer: Arc<dyn PeerDialer>) -> Self {
        Router {
            config,
            dialer,
            friends: Mutex::new(HashMap::new()),
            connectors: Mutex::new(HashMap::new()),
            connected: Mutex::new(HashMap::new()),
            blacklist: Mutex::new(Blacklist::new()),
            open_assets: WeakSet::default(),
            sessions: AssetSessions::new(),
            next_session_id: Mutex::new(1),
        }
    }

    pub fn add_friend(self: &Arc<Self>, friend: FriendConfig) {
        let name = friend.name.clone();
        let has_port = friend.port != 0;
        self.friends.lock().unwrap().insert(name.clone(), friend.clone());
        let mut connectors = self.connectors.lock().unwrap();
        if has_port && !connectors.contains_key(&name) {
            connectors.insert(
                name,
                FriendConnector::spawn(friend, self.dialer.clone(), self.config.reconnect_interval_secs, self.clone()),
            );
        }
    }

    pub fn friend_count(&self) -> usize {
        self.friends.lock().unwrap().len()
    }

    pub fn upstream_count(&self) -> usize {
        self.connected.lock().unwrap().len()
    }

    /// Called once a `FriendConnector` successfully dials a peer: cancels
    /// its connector, records it as connected, and adds it as an upstream
    /// to every currently-open forwarded asset.
    pub async fn on_connected(&self, peer: Arc<dyn UpstreamPeer>) {
        let name = peer.peer_name().to_string();
        if !self.friends.lock().unwrap().contains_key(&name) {
            return;
        }
        info!(peer = %name, "friend connected");
        if let Some(connector) = self.connectors.lock().unwrap().remove(&name) {
            connector.cancel();
        }
        self.connected.lock().unwrap().insert(name.clone(), peer.clone());

        for asset in self.open_assets.live() {
            let requesters = asset.requesters_snapshot();
            asset.add_upstream(peer.as_ref(), requesters, self.config.default_timeout_ms).await;
        }
    }

    pub fn on_disconnected(self: &Arc<Self>, peer_name: &str) {
        self.connected.lock().unwrap().remove(peer_name);
        let friend = self.friends.lock().unwrap().get(peer_name).cloned();
        if let Some(friend) = friend {
            if friend.port != 0 {
                let mut connectors = self.connectors.lock().unwrap();
                if !connectors.contains_key(peer_name) {
                    connectors.insert(
                        peer_name.to_string(),
                        FriendConnector::spawn(friend, self.dialer.clone(), self.config.reconnect_interval_secs, self.clone()),
                    );
                }
            }
        }
    }

    /// Opens a new forwarded asset for `ids`, unless one of `requesters`
    /// is already blacklisted (meaning this request looped back to us).
    pub async fn open_asset(
        &self,
        ids: Vec<TigerId>,
        requesters: Vec<u64>,
        timeout_ms: Option<u32>,
    ) -> Result<Arc<ForwardedAsset>> {
        let now = Instant::now();
        if self.blacklist.lock().unwrap().is_blacklisted(now, &requesters) {
            return Err(BithordeError::WouldLoop);
        }

        let session_id = {
            let mut next = self.next_session_id.lock().unwrap();
            let id = *next;
            *next += 1;
            id
        };
        let asset = Arc::new(ForwardedAsset::new(ids, session_id));
        self.open_assets.insert(&asset);

        let deadline = now
            + timeout_ms
                .map(|ms| Duration::from_millis(ms as u64 * 2))
                .unwrap_or(Duration::from_secs(30));
        self.blacklist.lock().unwrap().add(deadline, session_id);

        let connected: Vec<_> = self.connected.lock().unwrap().values().cloned().collect();
        for peer in connected {
            asset
                .add_upstream(peer.as_ref(), requesters.clone(), self.config.default_timeout_ms)
                .await;
        }

        Ok(asset)
    }

    pub fn sessions(&self) -> &AssetSessions {
        &self.sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NeverConnects;

    #[async_trait]
    impl PeerDialer for NeverConnects {
        async fn dial(&self, _friend: &FriendConfig) -> Option<Arc<dyn UpstreamPeer>> {
            None
        }
    }

    fn new_router() -> Router {
        Router::new(RouterConfig::default(), Arc::new(NeverConnects))
    }

    #[tokio::test]
    async fn open_asset_detects_a_routed_loop() {
        let router = new_router();
        let ids = vec![TigerId::from_digest([1u8; 24])];

        let first = router.open_asset(ids.clone(), vec![42], Some(1_000)).await.unwrap();
        let session_id = first.session_id();

        let looped = router.open_asset(ids, vec![session_id], Some(1_000)).await;
        assert!(matches!(looped, Err(BithordeError::WouldLoop)));
    }

    #[tokio::test]
    async fn open_asset_with_unrelated_requester_succeeds() {
        let router = new_router();
        let ids = vec![TigerId::from_digest([2u8; 24])];
        assert!(router.open_asset(ids, vec![7], Some(1_000)).await.is_ok());
    }
}
