use std::sync::Arc;

use bithorded_hashtree::TigerId;

use crate::asset::RequestBinding;
use crate::sessions::WeakMap;

/// Deduplicates concurrent lookups for the same tiger id behind a single
/// live [`RequestBinding`]. Shared by `AssetStore` (local assets) and
/// `Router` (forwarded assets) exactly like the original's
/// `AssetSessions` base class.
#[derive(Default)]
pub struct AssetSessions {
    bindings: WeakMap<TigerId, RequestBinding>,
}

impl AssetSessions {
    pub fn new() -> Self {
        AssetSessions {
            bindings: WeakMap::new(500),
        }
    }

    /// Returns the live binding for `tiger_id`, if any request for it is
    /// already in flight.
    pub fn active(&self, tiger_id: &TigerId) -> Option<Arc<RequestBinding>> {
        self.bindings.get(tiger_id)
    }

    /// Registers a freshly-created binding under `tiger_id` so later
    /// concurrent lookups reuse it instead of opening the asset again.
    pub fn register(&self, tiger_id: TigerId, binding: &Arc<RequestBinding>) {
        self.bindings.set(tiger_id, binding);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{Asset, RequestParameters, Status, StatusChannel};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::time::{Duration, Instant};
    use tokio::sync::watch;

    struct DummyAsset {
        status: StatusChannel,
    }

    impl DummyAsset {
        fn new() -> Self {
            DummyAsset {
                status: StatusChannel::new(Status::default()),
            }
        }
    }

    #[async_trait]
    impl Asset for DummyAsset {
        fn id(&self) -> &str {
            "dummy"
        }

        fn size(&self) -> u64 {
            0
        }

        fn can_read(&self, _offset: u64, _size: usize) -> usize {
            0
        }

        async fn async_read(&self, _offset: u64, _size: usize, _timeout: Duration) -> Option<Bytes> {
            None
        }

        fn status(&self) -> watch::Receiver<Status> {
            self.status.subscribe()
        }
    }

    /// spec scenario 3: concurrent/repeated requests for the same tiger id
    /// must share one `RequestBinding`, not open the asset again.
    #[test]
    fn repeated_lookups_for_the_same_tiger_id_share_one_binding() {
        let sessions = AssetSessions::new();
        let tiger_id = TigerId::from_digest([9u8; 24]);
        let asset: Arc<dyn Asset> = Arc::new(DummyAsset::new());
        let params = RequestParameters::single(1, "client-a", Instant::now() + Duration::from_secs(1));
        let binding = Arc::new(RequestBinding::new(asset, params));
        sessions.register(tiger_id, &binding);

        let first = sessions.active(&tiger_id).unwrap();
        let second = sessions.active(&tiger_id).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &binding));
    }
}
