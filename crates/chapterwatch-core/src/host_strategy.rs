//! Process-wide memory of hosts that need the render tier.
//!
//! An in-memory set backed by a [`HostListStore`]. Escalation is one-way:
//! nothing here ever moves a host back to [`HostStrategy::Direct`].

use std::sync::Arc;

use dashmap::DashSet;
use tokio::sync::Mutex;

use crate::error::AppError;
use crate::models::HostStrategy;
use crate::traits::HostListStore;
use crate::util::normalize_host;

/// Cache of render-required hosts. Clones share state.
#[derive(Debug, Clone)]
pub struct HostStrategyStore<S> {
    hosts: Arc<DashSet<String>>,
    flush_lock: Arc<Mutex<()>>,
    store: S,
}

impl<S: HostListStore> HostStrategyStore<S> {
    /// An empty cache; call [`load`](Self::load) to rehydrate.
    pub fn new(store: S) -> Self {
        Self {
            hosts: Arc::new(DashSet::new()),
            flush_lock: Arc::new(Mutex::new(())),
            store,
        }
    }

    /// Rehydrate from the persistence collaborator. Returns the number of
    /// distinct hosts loaded.
    pub async fn load(&self) -> Result<usize, AppError> {
        let list = self.store.load_hosts().await?;
        Ok(self.load_from_persisted_list(&list))
    }

    /// Merge a persisted list into the cache, normalizing every entry and
    /// skipping blanks and duplicates.
    pub fn load_from_persisted_list<T: AsRef<str>>(&self, list: &[T]) -> usize {
        for raw in list {
            let host = normalize_host(raw.as_ref());
            if !host.is_empty() {
                self.hosts.insert(host);
            }
        }
        self.hosts.len()
    }

    pub fn is_render_required(&self, host: &str) -> bool {
        self.hosts.contains(&normalize_host(host))
    }

    pub fn strategy_for(&self, host: &str) -> HostStrategy {
        if self.is_render_required(host) {
            HostStrategy::RenderRequired
        } else {
            HostStrategy::Direct
        }
    }

    /// Tag `host` as render-required. Idempotent; a newly tagged host is
    /// flushed to the store right away. Persistence failures are logged and
    /// do not undo the in-memory tag.
    pub async fn mark_render_required(&self, host: &str) -> bool {
        let host = normalize_host(host);
        if host.is_empty() || !self.hosts.insert(host.clone()) {
            return false;
        }

        tracing::info!(%host, "Host marked render-required");
        if let Err(e) = self.flush().await {
            tracing::warn!(%host, error = %e, "Failed to persist render-required hosts");
        }
        true
    }

    /// Write the full host list, sorted. Flushes run one at a time and take
    /// their snapshot under the lock, so the last write always carries every
    /// host marked before it.
    pub async fn flush(&self) -> Result<(), AppError> {
        let _guard = self.flush_lock.lock().await;
        self.store.save_hosts(&self.hosts()).await
    }

    /// Sorted snapshot of all render-required hosts.
    pub fn hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.hosts.iter().map(|h| h.key().clone()).collect();
        hosts.sort();
        hosts
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testutil::MockHostList;

    #[tokio::test]
    async fn load_normalizes_and_dedupes() {
        let store = MockHostList::with_hosts(&["Site.COM.", "site.com", "  ", "other.org", ""]);
        let strategies = HostStrategyStore::new(store);
        assert_eq!(strategies.load().await.unwrap(), 2);
        assert_eq!(strategies.hosts(), vec!["other.org", "site.com"]);
        assert!(strategies.is_render_required("SITE.com"));
        assert_eq!(strategies.strategy_for("new.net"), HostStrategy::Direct);
    }

    #[tokio::test]
    async fn mark_is_idempotent_and_persists_once() {
        let store = MockHostList::new();
        let strategies = HostStrategyStore::new(store.clone());

        assert!(strategies.mark_render_required("Manga.Example").await);
        assert!(!strategies.mark_render_required("manga.example.").await);

        assert_eq!(store.save_count(), 1);
        assert_eq!(store.saved(), vec!["manga.example"]);
        assert_eq!(
            strategies.strategy_for("manga.example"),
            HostStrategy::RenderRequired
        );
    }

    #[tokio::test]
    async fn concurrent_marks_are_all_persisted() {
        let store = MockHostList::new().with_first_save_delay(Duration::from_millis(50));
        let strategies = HostStrategyStore::new(store.clone());

        let (a, b) = tokio::join!(
            strategies.mark_render_required("a.example"),
            strategies.mark_render_required("b.example"),
        );

        assert!(a && b);
        assert_eq!(store.save_count(), 2);
        assert_eq!(store.saved(), vec!["a.example", "b.example"]);
    }

    #[tokio::test]
    async fn persist_failure_keeps_in_memory_tag() {
        let store = MockHostList::failing();
        let strategies = HostStrategyStore::new(store);
        assert!(strategies.mark_render_required("a.example").await);
        assert!(strategies.is_render_required("a.example"));
    }

    #[tokio::test]
    async fn clones_share_state() {
        let strategies = HostStrategyStore::new(MockHostList::new());
        let other = strategies.clone();
        other.mark_render_required("shared.example").await;
        assert!(strategies.is_render_required("shared.example"));
    }
}
