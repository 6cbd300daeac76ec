mod asset;

pub use asset::CachingAsset;

use std::fs;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use bithorded_hashtree::{create_meta, open_v1, open_v2, FileFormatVersion, TigerId};
use tracing::{debug, info};

use crate::asset::{Asset, ForwardedAsset, RequestBinding, RequestParameters, StatusCode, StoredAsset};
use crate::asset_sessions::AssetSessions;
use crate::dispatch::Dispatcher;
use crate::error::{BithordeError, Result};
use crate::router::Router;
use crate::store::AssetStore;

/// Default hash-tree fanout used for newly-created cache slots; matches
/// the original's 64KiB leaf blocks (`levels_skipped = 6`).
const DEFAULT_LEVELS_SKIPPED: u8 = 6;

/// Owns the on-disk [`AssetStore`], evicts the lowest-scored asset to make
/// room for new uploads, and hands out [`CachingAsset`]s that fall back to
/// the [`Router`] for data this node doesn't have yet. Mirrors
/// `bithorded::cache::CacheManager`.
pub struct CacheManager {
    store: Mutex<AssetStore>,
    router: Arc<Router>,
    dispatcher: Arc<Dispatcher>,
    sessions: AssetSessions,
    max_size_bytes: u64,
}

impl CacheManager {
    pub fn new(store: AssetStore, router: Arc<Router>, dispatcher: Arc<Dispatcher>, max_size_bytes: u64) -> Self {
        CacheManager {
            store: Mutex::new(store),
            router,
            dispatcher,
            sessions: AssetSessions::new(),
            max_size_bytes,
        }
    }

    pub fn open_or_create_store(&self) -> Result<()> {
        self.store.lock().unwrap().open_or_create()
    }

    /// Finds or opens the asset for `tiger_id`, deduplicating concurrent
    /// requests for the same id behind one [`RequestBinding`].
    pub async fn open_asset(
        &self,
        tiger_id: TigerId,
        requesters: Vec<u64>,
        timeout_ms: u32,
    ) -> Result<Arc<RequestBinding>> {
        let params = RequestParameters::from_requesters(requesters.clone(), timeout_ms);
        if let Some(existing) = self.sessions.active(&tiger_id) {
            if let Some((old, new)) = existing.add_subscriber(&params) {
                existing.asset.apply(&old, &new).await;
            }
            return Ok(existing);
        }

        let asset = self.open_asset_uncached(tiger_id, requesters, timeout_ms).await?;
        let binding = Arc::new(RequestBinding::new(asset, params));
        self.sessions.register(tiger_id, &binding);
        Ok(binding)
    }

    async fn open_asset_uncached(
        &self,
        tiger_id: TigerId,
        requesters: Vec<u64>,
        timeout_ms: u32,
    ) -> Result<Arc<dyn Asset>> {
        if let Some(asset_id) = self.store.lock().unwrap().index().lookup_tiger(&tiger_id) {
            debug!(%tiger_id, asset_id, "serving from local cache");
            let local = self.open_local(&asset_id)?;
            if local.has_root_hash() {
                return Ok(local as Arc<dyn Asset>);
            }
            let upstream = self
                .router
                .open_asset(vec![tiger_id], requesters, Some(timeout_ms))
                .await?;
            return Ok(Arc::new(CachingAsset::new(local, upstream)) as Arc<dyn Asset>);
        }

        info!(%tiger_id, "not cached, opening via router");
        let upstream = self
            .router
            .open_asset(vec![tiger_id], requesters, Some(timeout_ms))
            .await?;
        let size = self.await_known_size(&upstream, timeout_ms).await?;
        let local = self.allocate_local(tiger_id, size)?;
        Ok(Arc::new(CachingAsset::new(local, upstream)) as Arc<dyn Asset>)
    }

    /// Waits for the upstream to report a known size before a cache slot is
    /// allocated for it — a meta file can never be created with a
    /// zero-length hash store (spec §4.8's lazy-allocation invariant).
    async fn await_known_size(&self, upstream: &ForwardedAsset, timeout_ms: u32) -> Result<u64> {
        let mut status = upstream.status();
        let deadline = tokio::time::sleep(Duration::from_millis(timeout_ms as u64));
        tokio::pin!(deadline);
        loop {
            {
                let current = status.borrow();
                match current.code {
                    StatusCode::Success => {
                        if let Some(size) = current.size {
                            return Ok(size);
                        }
                    }
                    StatusCode::NotFound => return Err(BithordeError::NotFound),
                    StatusCode::None => {}
                }
            }
            tokio::select! {
                changed = status.changed() => {
                    if changed.is_err() {
                        return Err(BithordeError::NotFound);
                    }
                }
                _ = &mut deadline => return Err(BithordeError::Timeout),
            }
        }
    }

    fn open_local(&self, asset_id: &str) -> Result<Arc<StoredAsset>> {
        let assets_folder = self.store.lock().unwrap().assets_folder().to_path_buf();
        let meta_path = assets_folder.join(asset_id).join("data.meta");
        let meta = open_v2(&meta_path).or_else(|_| open_v1(&meta_path))?;
        let tail = meta.tail.ok_or(BithordeError::NotFound)?;
        Ok(Arc::new(StoredAsset::new(
            asset_id.to_string(),
            tail,
            Arc::new(meta.hash_store),
            self.dispatcher.clone(),
        )))
    }

    /// Allocates a fresh on-disk slot for `tiger_id` of `size` bytes,
    /// evicting as needed to stay under `max_size_bytes`. Only called once
    /// the upstream has reported a known size — a meta file can never be
    /// created with a zero-length hash store (see [`Self::await_known_size`]).
    fn allocate_local(&self, tiger_id: TigerId, size: u64) -> Result<Arc<StoredAsset>> {
        self.make_room(size)?;

        let mut store = self.store.lock().unwrap();
        let path = store.new_asset();
        fs::create_dir_all(&path)?;
        let asset_id = path.file_name().unwrap().to_str().unwrap().to_string();
        let meta = create_meta(
            path.join("data.meta"),
            FileFormatVersion::V2Cache,
            size,
            DEFAULT_LEVELS_SKIPPED,
            size,
        )?;
        store.update_asset(&asset_id, Some(tiger_id))?;
        drop(store);

        Ok(Arc::new(StoredAsset::new(
            asset_id,
            meta.tail.expect("V2Cache always has a tail"),
            Arc::new(meta.hash_store),
            self.dispatcher.clone(),
        )))
    }

    /// Allocates a local slot for a directly-uploaded (non-forwarded)
    /// asset of a known size.
    pub fn prepare_upload(&self, size: u64) -> Result<Arc<StoredAsset>> {
        self.make_room(size)?;
        let mut store = self.store.lock().unwrap();
        let path = store.new_asset();
        fs::create_dir_all(&path)?;
        let asset_id = path.file_name().unwrap().to_str().unwrap().to_string();
        let meta = create_meta(
            path.join("data.meta"),
            FileFormatVersion::V2Cache,
            size,
            DEFAULT_LEVELS_SKIPPED,
            size,
        )?;
        store.update_asset(&asset_id, None)?;
        drop(store);

        Ok(Arc::new(StoredAsset::new(
            asset_id,
            meta.tail.expect("V2Cache always has a tail"),
            Arc::new(meta.hash_store),
            self.dispatcher.clone(),
        )))
    }

    /// Evicts the lowest-scored assets until `additional_bytes` more fit
    /// under `max_size_bytes`, or there's nothing left to evict.
    fn make_room(&self, additional_bytes: u64) -> Result<()> {
        loop {
            let mut store = self.store.lock().unwrap();
            if store.index().total_disk_allocation() + additional_bytes <= self.max_size_bytes {
                return Ok(());
            }
            match store.index().pick_looser() {
                Some(asset_id) => {
                    debug!(asset_id, "evicting to make room");
                    store.remove_asset(&asset_id);
                }
                None => return Err(BithordeError::NoSpaceAvailable(additional_bytes)),
            }
        }
    }

    pub fn asset_count(&self) -> usize {
        self.store.lock().unwrap().index().asset_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouterConfig;
    use crate::router::PeerDialer;

    struct NeverConnects;

    #[async_trait::async_trait]
    impl PeerDialer for NeverConnects {
        async fn dial(&self, _friend: &crate::config::FriendConfig) -> Option<Arc<dyn crate::asset::UpstreamPeer>> {
            None
        }
    }

    fn new_manager(dir: &std::path::Path, max_size_bytes: u64) -> CacheManager {
        let _ = tracing_subscriber::fmt::try_init();
        let store = AssetStore::new(dir);
        let router = Arc::new(Router::new(RouterConfig::default(), Arc::new(NeverConnects)));
        let dispatcher = Arc::new(Dispatcher::new(4));
        let manager = CacheManager::new(store, router, dispatcher, max_size_bytes);
        manager.open_or_create_store().unwrap();
        manager
    }

    #[test]
    fn prepare_upload_evicts_oldest_when_over_budget() {
        let dir = tempfile::tempdir().unwrap();
        let manager = new_manager(dir.path(), 100);

        manager.prepare_upload(60).unwrap();
        assert_eq!(manager.asset_count(), 1);

        // A second 60-byte upload doesn't fit alongside the first under a
        // 100-byte budget, so the first must be evicted to make room.
        manager.prepare_upload(60).unwrap();
        assert_eq!(manager.asset_count(), 1);
    }

    #[test]
    fn prepare_upload_fails_when_nothing_left_to_evict() {
        let dir = tempfile::tempdir().unwrap();
        let manager = new_manager(dir.path(), 10);
        assert!(manager.prepare_upload(100).is_err());
    }
}
