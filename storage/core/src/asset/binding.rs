use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::Asset;

/// The aggregate request parameters of every downstream subscriber of one
/// binding: the union of their session ids, the peers they came from, and
/// the nearest deadline among them.
#[derive(Debug, Clone)]
pub struct RequestParameters {
    pub requesters: HashSet<u64>,
    pub requester_clients: HashSet<String>,
    pub deadline: Instant,
}

impl RequestParameters {
    pub fn single(requester: u64, client: impl Into<String>, deadline: Instant) -> Self {
        let mut requesters = HashSet::new();
        requesters.insert(requester);
        let mut requester_clients = HashSet::new();
        requester_clients.insert(client.into());
        RequestParameters {
            requesters,
            requester_clients,
            deadline,
        }
    }

    /// Builds an aggregate straight from a set of downstream session ids,
    /// with a deadline `timeout_ms` from now. Used where the caller only
    /// tracks session ids, not per-requester client names.
    pub fn from_requesters(requesters: Vec<u64>, timeout_ms: u32) -> Self {
        RequestParameters {
            requesters: requesters.into_iter().collect(),
            requester_clients: HashSet::new(),
            deadline: Instant::now() + std::time::Duration::from_millis(timeout_ms as u64),
        }
    }

    /// Folds another downstream's parameters into this aggregate, returning
    /// whether anything actually changed (callers use this to decide
    /// whether to re-`apply` to upstreams).
    pub fn merge(&mut self, other: &RequestParameters) -> bool {
        let mut changed = false;
        for id in &other.requesters {
            changed |= self.requesters.insert(*id);
        }
        for client in &other.requester_clients {
            changed |= self.requester_clients.insert(client.clone());
        }
        if other.deadline < self.deadline {
            self.deadline = other.deadline;
            changed = true;
        }
        changed
    }
}

/// Reference-counted handle linking one asset to its live downstream
/// subscribers. Analogous to `UpstreamRequestBinding`: whoever holds the
/// last `Arc` to this binding is the one that keeps the underlying asset
/// (and any upstream sessions it opened) alive.
pub struct RequestBinding {
    pub asset: Arc<dyn Asset>,
    parameters: Mutex<RequestParameters>,
}

impl RequestBinding {
    pub fn new(asset: Arc<dyn Asset>, parameters: RequestParameters) -> Self {
        RequestBinding {
            asset,
            parameters: Mutex::new(parameters),
        }
    }

    pub fn parameters(&self) -> RequestParameters {
        self.parameters.lock().unwrap().clone()
    }

    /// Merges a new downstream subscriber's parameters in. Returns the
    /// (old, new) aggregate if it changed, so the caller can diff and
    /// `apply` to whatever the binding wraps (e.g. `ForwardedAsset`).
    pub fn add_subscriber(&self, params: &RequestParameters) -> Option<(RequestParameters, RequestParameters)> {
        let mut guard = self.parameters.lock().unwrap();
        let old = guard.clone();
        if guard.merge(params) {
            Some((old, guard.clone()))
        } else {
            None
        }
    }
}
