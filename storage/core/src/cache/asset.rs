use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;
use tracing::debug;

use crate::asset::{Asset, ForwardedAsset, Status, StatusChannel, StoredAsset};

/// A read-through proxy in front of a [`StoredAsset`]: reads already
/// present in the local cache are served directly, everything else is
/// fetched from the upstream [`ForwardedAsset`] and written into the cache
/// as it arrives. Once the local copy has a full root hash, the asset is
/// self-sufficient and the upstream binding is released for good. Mirrors
/// `bithorded::cache::CachingAsset`.
pub struct CachingAsset {
    local: Arc<StoredAsset>,
    upstream: Mutex<Option<Arc<ForwardedAsset>>>,
    status: StatusChannel,
}

impl CachingAsset {
    pub fn new(local: Arc<StoredAsset>, upstream: Arc<ForwardedAsset>) -> Self {
        let caching = CachingAsset {
            local,
            upstream: Mutex::new(Some(upstream)),
            status: StatusChannel::new(Status::default()),
        };
        caching.refresh_status();
        caching
    }

    /// True once the local copy no longer needs the upstream.
    pub fn is_self_sufficient(&self) -> bool {
        self.local.has_root_hash()
    }

    /// Releases the upstream binding once the local copy is self-sufficient,
    /// so the upstream session doesn't stay bound forever.
    fn release_upstream_if_self_sufficient(&self) {
        if self.is_self_sufficient() {
            if self.upstream.lock().unwrap().take().is_some() {
                debug!(id = self.local.id(), "cache is self-sufficient, dropping upstream");
            }
        }
    }

    fn upstream_status(&self) -> Status {
        self.upstream
            .lock()
            .unwrap()
            .as_ref()
            .map(|u| u.status().borrow().clone())
            .unwrap_or_default()
    }

    fn refresh_status(&self) {
        let local_status = self.local.status().borrow().clone();
        self.status.update(|s| {
            *s = if self.is_self_sufficient() { local_status.clone() } else { self.upstream_status() };
        });
    }
}

#[async_trait]
impl Asset for CachingAsset {
    fn id(&self) -> &str {
        self.local.id()
    }

    fn size(&self) -> u64 {
        if self.is_self_sufficient() {
            self.local.size()
        } else {
            self.upstream.lock().unwrap().as_ref().map(|u| u.size()).unwrap_or(0)
        }
    }

    fn can_read(&self, offset: u64, size: usize) -> usize {
        let local = self.local.can_read(offset, size);
        if local > 0 {
            local
        } else {
            self.upstream
                .lock()
                .unwrap()
                .as_ref()
                .map(|u| u.can_read(offset, size))
                .unwrap_or(0)
        }
    }

    async fn async_read(&self, offset: u64, size: usize, timeout: Duration) -> Option<Bytes> {
        if self.local.can_read(offset, size) >= size {
            return self.local.async_read(offset, size, timeout).await;
        }

        let upstream = self.upstream.lock().unwrap().as_ref().cloned()?;
        let data = upstream.async_read(offset, size, timeout).await?;
        if let Err(err) = self.local.write_and_notify(offset, &data).await {
            debug!(%err, offset, "failed to populate cache from upstream read");
        }
        self.release_upstream_if_self_sufficient();
        self.refresh_status();
        Some(data)
    }

    fn status(&self) -> watch::Receiver<Status> {
        self.status.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use bithorded_hashtree::{atoms_needed_for_content, size_needed_for_atoms, HashStore, MemoryDataArray};

    fn new_local(content_len: u64, levels_skipped: u8) -> Arc<StoredAsset> {
        let atoms = atoms_needed_for_content(content_len);
        let hash_size = size_needed_for_atoms(atoms, levels_skipped);
        let data: Arc<dyn bithorded_hashtree::DataArray> =
            Arc::new(MemoryDataArray::new(content_len as usize));
        let hash_storage: Arc<dyn bithorded_hashtree::DataArray> = Arc::new(MemoryDataArray::new(hash_size));
        let hash_store = Arc::new(HashStore::new(hash_storage, levels_skipped).unwrap());
        let dispatcher = Arc::new(Dispatcher::new(4));
        Arc::new(StoredAsset::new("caching-test", data, hash_store, dispatcher))
    }

    fn new_upstream() -> Arc<ForwardedAsset> {
        Arc::new(ForwardedAsset::new(vec![], 1))
    }

    #[tokio::test]
    async fn reports_upstream_size_until_self_sufficient() {
        let local = new_local(65536, 6);
        let upstream = new_upstream();
        let caching = CachingAsset::new(local, upstream);
        assert!(!caching.is_self_sufficient());
    }
}
