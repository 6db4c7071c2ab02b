//! Process-wide session handle
//!
//! `SessionCache` owns the one live handle to the canonical store. The handle
//! is created on first use, replaced (never mutated) when provisioning produces
//! a newer one, and reopened transparently once a version change has closed it.

use crate::engine::StoreHandle;
use crate::error::Result;
use crate::store::provisioner::Provisioner;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub struct SessionCache {
    provisioner: Provisioner,
    required: Vec<String>,
    slot: Mutex<Option<Arc<dyn StoreHandle>>>,
}

impl SessionCache {
    /// `required` is the container set provisioned whenever a handle is (re)opened.
    pub fn new<S: AsRef<str>>(provisioner: Provisioner, required: &[S]) -> Self {
        Self {
            provisioner,
            required: required.iter().map(|s| s.as_ref().to_string()).collect(),
            slot: Mutex::new(None),
        }
    }

    pub fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }

    /// The cached handle, opening and provisioning the store if there is none
    /// or the cached one has been closed.
    ///
    /// Concurrent callers wait for a single provisioning run.
    pub async fn handle(&self) -> Result<Arc<dyn StoreHandle>> {
        let mut slot = self.slot.lock().await;
        if let Some(handle) = slot.as_ref() {
            if !handle.is_closed() {
                return Ok(handle.clone());
            }
            debug!("cached handle for '{}' was closed, reopening", handle.name());
        }

        let handle = self.provisioner.ensure(&self.required).await?;
        info!(
            "session handle ready: '{}' v{} with {} container(s)",
            handle.name(),
            handle.version(),
            handle.container_names().len()
        );
        Self::install(&mut slot, handle.clone());
        Ok(handle)
    }

    /// Extend the store with `containers` and install the resulting handle.
    pub async fn provision<S: AsRef<str>>(
        &self,
        containers: &[S],
    ) -> Result<Arc<dyn StoreHandle>> {
        let mut slot = self.slot.lock().await;
        if let Some(handle) = slot.as_ref() {
            let covered = containers
                .iter()
                .all(|c| handle.has_container(c.as_ref()));
            if covered && !handle.is_closed() {
                return Ok(handle.clone());
            }
        }

        let handle = self.provisioner.ensure(containers).await?;
        Self::install(&mut slot, handle.clone());
        Ok(handle)
    }

    /// The live cached handle, if any, without opening anything.
    pub async fn current(&self) -> Option<Arc<dyn StoreHandle>> {
        self.slot
            .lock()
            .await
            .as_ref()
            .filter(|h| !h.is_closed())
            .cloned()
    }

    /// Close and drop the cached handle; the next call reopens.
    pub async fn invalidate(&self) {
        if let Some(handle) = self.slot.lock().await.take() {
            handle.close();
        }
    }

    fn install(slot: &mut Option<Arc<dyn StoreHandle>>, handle: Arc<dyn StoreHandle>) {
        if let Some(old) = slot.replace(handle.clone()) {
            if !Arc::ptr_eq(&old, &handle) {
                old.close();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MemoryEngine, OpenRequest, StoreEngine};
    use crate::store::normalizer::{StoreNormalizer, CANONICAL_STORE_NAME};

    fn session(engine: &MemoryEngine, required: &[&str]) -> SessionCache {
        let provisioner = Provisioner::new(
            Arc::new(engine.clone()),
            StoreNormalizer::default(),
            CANONICAL_STORE_NAME,
        );
        SessionCache::new(provisioner, required)
    }

    #[tokio::test]
    async fn test_handle_is_memoized() {
        let engine = MemoryEngine::new();
        let cache = session(&engine, &["notes", "todos"]);
        assert!(cache.current().await.is_none());

        let first = cache.handle().await.unwrap();
        let second = cache.handle().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.has_container("todos"));
    }

    #[tokio::test]
    async fn test_closed_handle_reopens() {
        let engine = MemoryEngine::new();
        let cache = session(&engine, &["notes"]);

        let first = cache.handle().await.unwrap();
        first.close();

        let second = cache.handle().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!second.is_closed());
    }

    #[tokio::test]
    async fn test_external_upgrade_invalidates_handle() {
        let engine = MemoryEngine::new();
        let cache = session(&engine, &["notes"]);
        let first = cache.handle().await.unwrap();

        // another context raises the version
        engine
            .open(OpenRequest::new(CANONICAL_STORE_NAME, Some(9)), None)
            .await
            .unwrap();
        assert!(first.is_closed());
        assert!(cache.current().await.is_none());

        let second = cache.handle().await.unwrap();
        assert_eq!(second.version(), 9);
    }

    #[tokio::test]
    async fn test_provision_replaces_handle() {
        let engine = MemoryEngine::new();
        let cache = session(&engine, &["notes"]);
        let first = cache.handle().await.unwrap();

        let extended = cache.provision(&["wiki"]).await.unwrap();
        assert!(first.is_closed());
        assert!(extended.has_container("wiki"));

        let current = cache.current().await.unwrap();
        assert!(Arc::ptr_eq(&current, &extended));

        // already covered: no new handle
        let again = cache.provision(&["wiki", "notes"]).await.unwrap();
        assert!(Arc::ptr_eq(&again, &extended));
    }

    #[tokio::test]
    async fn test_concurrent_first_use_provisions_once() {
        let engine = MemoryEngine::new();
        let cache = Arc::new(session(&engine, &["notes", "todos"]));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.handle().await })
            })
            .collect();

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap().unwrap());
        }
        assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(engine.upgrade_count(CANONICAL_STORE_NAME), 1);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let engine = MemoryEngine::new();
        let cache = session(&engine, &["notes"]);
        let first = cache.handle().await.unwrap();

        cache.invalidate().await;
        assert!(first.is_closed());
        assert!(cache.current().await.is_none());
    }
}
