use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::config::FriendConfig;

use super::{PeerDialer, Router};

/// Retries dialing a configured friend in the background until it
/// connects or is cancelled. Mirrors `bithorded::router::FriendConnector`,
/// which redials on a fixed interval after a failed attempt.
pub struct FriendConnector {
    cancel: Option<oneshot::Sender<()>>,
}

impl FriendConnector {
    /// Spawns the retry loop and returns a handle that cancels it on
    /// [`FriendConnector::cancel`] or drop. On a successful dial, hands
    /// the peer straight to `router.on_connected` before exiting.
    pub fn spawn(
        friend: FriendConfig,
        dialer: Arc<dyn PeerDialer>,
        retry_interval_secs: u64,
        router: Arc<Router>,
    ) -> Self {
        let (tx, mut rx) = oneshot::channel();
        let retry_interval = Duration::from_secs(retry_interval_secs.max(1));

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut rx => {
                        debug!(friend = %friend.name, "connector cancelled");
                        return;
                    }
                    dialed = dialer.dial(&friend) => {
                        if let Some(peer) = dialed {
                            router.on_connected(peer).await;
                            return;
                        }
                    }
                }
                tokio::select! {
                    _ = &mut rx => return,
                    _ = tokio::time::sleep(retry_interval) => {}
                }
            }
        });

        FriendConnector { cancel: Some(tx) }
    }

    pub fn cancel(mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }
}
