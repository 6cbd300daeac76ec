#![warn(unused_crate_dependencies)]

pub mod asset;
pub mod asset_sessions;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod router;
pub mod sessions;
pub mod store;

pub use asset::{Asset, ForwardedAsset, RequestBinding, RequestParameters, Status, StatusCode, StoredAsset};
pub use asset_sessions::AssetSessions;
pub use cache::{CacheManager, CachingAsset};
pub use config::{FriendConfig, RouterConfig, ServerConfig, SourceConfig};
pub use dispatch::{Dispatcher, PARALLEL_HASH_JOBS};
pub use error::{BithordeError, Result};
pub use router::{FriendConnector, PeerDialer, Router};
pub use sessions::{WeakMap, WeakSet};
pub use store::{AssetIndex, AssetStore};
