//! Shared hub state: the node registry, the image cache, and metrics.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use mural_core::cache::ImageCache;
use mural_core::error::Result;
use mural_core::protocol::Role;

use crate::config::HubConfig;
use crate::metrics::HubMetrics;
use crate::session::NodeSession;

pub type SharedHub = Arc<Hub>;

/// The single in-memory hub object constructed at start-up.
///
/// The node registry is a reader-writer-locked map keyed by remote
/// address: writers on accept/disconnect, readers everywhere else.
/// Snapshots are taken under the read lock and the lock released before
/// any deadline-bound fan-out.
pub struct Hub {
    cfg: HubConfig,
    sessions: RwLock<HashMap<String, Arc<NodeSession>>>,
    cache: ImageCache,
    metrics: HubMetrics,
}

impl Hub {
    pub fn new(cfg: HubConfig) -> Result<Self> {
        let dir = cfg
            .hub
            .image_dir
            .clone()
            .unwrap_or_else(ImageCache::default_dir);
        let cache = ImageCache::open(dir)?;
        let metrics = HubMetrics::default();
        if let Ok(bytes) = cache.total_bytes() {
            metrics.cache_bytes.set(&[], bytes as i64);
        }
        Ok(Self {
            cfg,
            sessions: RwLock::new(HashMap::new()),
            cache,
            metrics,
        })
    }

    pub fn cfg(&self) -> &HubConfig {
        &self.cfg
    }

    pub fn cache(&self) -> &ImageCache {
        &self.cache
    }

    pub fn metrics(&self) -> &HubMetrics {
        &self.metrics
    }

    pub async fn insert_session(&self, session: Arc<NodeSession>) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.remote_addr().to_string(), session);
    }

    pub async fn remove_session(&self, remote_addr: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(remote_addr);
    }

    /// Snapshot of all live sessions, map-iteration order.
    pub async fn snapshot(&self) -> Vec<Arc<NodeSession>> {
        let sessions = self.sessions.read().await;
        sessions.values().cloned().collect()
    }

    /// Snapshot of live sessions whose last identity has the given role.
    pub async fn snapshot_by_role(&self, role: Role) -> Vec<Arc<NodeSession>> {
        let all = self.snapshot().await;
        let mut out = Vec::new();
        for session in all {
            if let Some(identity) = session.identity().await {
                if identity.role == role {
                    out.push(session);
                }
            }
        }
        out
    }

    /// Find the session whose identity name matches. Names are the
    /// operator-facing identifier; remote addresses identify transports.
    pub async fn session_by_name(&self, name: &str) -> Option<Arc<NodeSession>> {
        let all = self.snapshot().await;
        for session in all {
            if let Some(identity) = session.identity().await {
                if identity.name == name {
                    tracing::debug!(name, addr = session.remote_addr(), "matched node by name");
                    return Some(session);
                }
            }
        }
        None
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
