//! Store provisioning
//!
//! [`Provisioner::ensure`] turns a possibly stale store into one that has every
//! requested container, upgrading it by one version when something is missing.
//!
//! ```text
//! open unversioned ──> missing = required - containers
//!                         │ empty ──────────────> return handle
//!                         │ otherwise
//!                         └─> close, reopen at observed + 1
//!                               └─ upgrade: create each container still absent
//! ```
//!
//! Within one process, `ensure` calls are serialized. Without that, two callers
//! that both observe version V but need different containers would both ask
//! for V+1; the second would then open V+1 with no upgrade left to run and
//! never get its container.

use crate::engine::{
    OpenRequest, StoreEngine, StoreHandle, UpgradeHandler, UpgradeTransaction, VersionChange,
};
use crate::error::{EngineError, EngineResult, Error, Result};
use crate::store::normalizer::StoreNormalizer;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Upgrade hook creating every listed container that is not there yet.
struct CreateMissing {
    containers: Vec<String>,
}

impl UpgradeHandler for CreateMissing {
    fn upgrade(
        &self,
        tx: &mut dyn UpgradeTransaction,
        old_version: u32,
        new_version: u32,
    ) -> EngineResult<()> {
        for name in &self.containers {
            if tx.has_container(name) {
                debug!("container '{}' already created, skipping", name);
                continue;
            }
            match tx.create_container(name) {
                Ok(()) => info!(
                    "created container '{}' (v{} -> v{})",
                    name, old_version, new_version
                ),
                Err(EngineError::ContainerExists(_)) => {
                    debug!("container '{}' created concurrently, skipping", name)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Close the handle as soon as another connection wants a newer version.
fn close_on_version_change(handle: &Arc<dyn StoreHandle>) {
    handle.on_version_change(Box::new(|handle: &dyn StoreHandle, change: VersionChange| {
        warn!(
            "store '{}' is being upgraded from v{} to v{}, closing handle",
            handle.name(),
            change.old_version,
            change.new_version
        );
        handle.close();
    }));
}

fn missing_from<S: AsRef<str>>(required: &[S], handle: &dyn StoreHandle) -> Vec<String> {
    let mut missing: Vec<String> = required
        .iter()
        .map(AsRef::as_ref)
        .filter(|name| !handle.has_container(name))
        .map(str::to_string)
        .collect();
    missing.dedup();
    missing
}

/// Ensures containers exist in the canonical store.
pub struct Provisioner {
    engine: Arc<dyn StoreEngine>,
    normalizer: StoreNormalizer,
    store_name: String,
    lock: Mutex<()>,
}

impl Provisioner {
    /// `store_name` is normalized on every open, so legacy names are accepted.
    pub fn new(
        engine: Arc<dyn StoreEngine>,
        normalizer: StoreNormalizer,
        store_name: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            normalizer,
            store_name: store_name.into(),
            lock: Mutex::new(()),
        }
    }

    /// Name of the store this provisioner opens, after normalization
    pub fn store_name(&self) -> String {
        self.normalizer
            .normalize(OpenRequest::unversioned(self.store_name.as_str()))
            .name
    }

    pub fn normalizer(&self) -> &StoreNormalizer {
        &self.normalizer
    }

    async fn open(
        &self,
        version: Option<u32>,
        upgrade: Arc<dyn UpgradeHandler>,
    ) -> Result<Arc<dyn StoreHandle>> {
        let request = self
            .normalizer
            .normalize(OpenRequest::new(self.store_name.as_str(), version));
        let handle = self.engine.open(request, Some(upgrade)).await?;
        close_on_version_change(&handle);
        Ok(handle)
    }

    /// Return a handle whose store contains every container in `required`.
    ///
    /// Performs at most one upgrade. Fails with [`Error::ContainerMissing`] if
    /// a container is still absent afterwards.
    pub async fn ensure<S: AsRef<str>>(&self, required: &[S]) -> Result<Arc<dyn StoreHandle>> {
        let _guard = self.lock.lock().await;

        let wanted: Vec<String> = required.iter().map(|s| s.as_ref().to_string()).collect();
        let handle = self
            .open(
                None,
                Arc::new(CreateMissing {
                    containers: wanted.clone(),
                }),
            )
            .await?;

        let missing = missing_from(&wanted, handle.as_ref());
        if missing.is_empty() {
            debug!(
                "store '{}' v{} has all {} requested container(s)",
                handle.name(),
                handle.version(),
                wanted.len()
            );
            return Ok(handle);
        }

        let observed = handle.version();
        // our own connection would otherwise block the upgrade
        handle.close();
        info!(
            "store '{}' v{} is missing [{}], upgrading",
            handle.name(),
            observed,
            missing.join(", ")
        );

        // A store still below the floor (a fresh one sits at v1) is lifted
        // straight to MIN_STORE_VERSION by the normalizer. That first step is
        // the only one that is not exactly +1.
        let upgraded = self
            .open(
                Some(observed.saturating_add(1)),
                Arc::new(CreateMissing {
                    containers: missing,
                }),
            )
            .await?;

        if let Some(absent) = missing_from(&wanted, upgraded.as_ref()).into_iter().next() {
            upgraded.close();
            return Err(Error::ContainerMissing(absent));
        }

        info!(
            "store '{}' upgraded from v{} to v{}",
            upgraded.name(),
            observed,
            upgraded.version()
        );
        Ok(upgraded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;
    use crate::store::normalizer::{CANONICAL_STORE_NAME, MIN_STORE_VERSION};

    fn provisioner(engine: &MemoryEngine) -> Provisioner {
        Provisioner::new(
            Arc::new(engine.clone()),
            StoreNormalizer::default(),
            CANONICAL_STORE_NAME,
        )
    }

    #[tokio::test]
    async fn test_fresh_store_gets_containers_without_second_upgrade() {
        let engine = MemoryEngine::new();
        let provisioner = provisioner(&engine);

        let handle = provisioner.ensure(&["notes", "todos"]).await.unwrap();
        assert!(handle.has_container("notes"));
        assert!(handle.has_container("todos"));
        assert_eq!(handle.version(), 1);
        assert_eq!(engine.upgrade_count(CANONICAL_STORE_NAME), 1);
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let engine = MemoryEngine::new();
        let provisioner = provisioner(&engine);

        let first = provisioner.ensure(&["notes"]).await.unwrap();
        let upgrades = engine.upgrade_count(CANONICAL_STORE_NAME);

        let second = provisioner.ensure(&["notes"]).await.unwrap();
        assert_eq!(second.version(), first.version());
        assert_eq!(engine.upgrade_count(CANONICAL_STORE_NAME), upgrades);
    }

    #[tokio::test]
    async fn test_missing_container_bumps_version_by_one() {
        let engine = MemoryEngine::new();
        let provisioner = provisioner(&engine);

        // get the store above the version floor first
        engine
            .open(
                OpenRequest::new(CANONICAL_STORE_NAME, Some(MIN_STORE_VERSION + 2)),
                None,
            )
            .await
            .unwrap()
            .close();

        let handle = provisioner.ensure(&["notes"]).await.unwrap();
        assert_eq!(handle.version(), MIN_STORE_VERSION + 3);

        let handle = provisioner.ensure(&["notes", "wiki"]).await.unwrap();
        assert_eq!(handle.version(), MIN_STORE_VERSION + 4);
        assert!(handle.has_container("notes"));
        assert!(handle.has_container("wiki"));
    }

    #[tokio::test]
    async fn test_upgrade_below_floor_lands_on_floor() {
        let engine = MemoryEngine::new();
        let provisioner = provisioner(&engine);

        let first = provisioner.ensure(&["notes"]).await.unwrap();
        assert_eq!(first.version(), 1);

        // v1 -> floor is the single jump larger than one
        let second = provisioner.ensure(&["wiki"]).await.unwrap();
        assert_eq!(second.version(), MIN_STORE_VERSION);
        assert!(first.is_closed());

        let third = provisioner.ensure(&["videos"]).await.unwrap();
        assert_eq!(third.version(), MIN_STORE_VERSION + 1);
    }

    #[tokio::test]
    async fn test_previous_handle_closed_by_upgrade() {
        let engine = MemoryEngine::new();
        let provisioner = provisioner(&engine);

        let old = provisioner.ensure(&["notes"]).await.unwrap();
        let new = provisioner.ensure(&["todos"]).await.unwrap();

        assert!(old.is_closed());
        assert!(!new.is_closed());
        assert!(new.has_container("notes"));
    }

    #[tokio::test]
    async fn test_concurrent_ensure_creates_once() {
        let engine = MemoryEngine::new();
        let provisioner = Arc::new(provisioner(&engine));
        provisioner.ensure(&["notes"]).await.unwrap();
        let before = engine.upgrade_count(CANONICAL_STORE_NAME);

        let a = {
            let p = provisioner.clone();
            tokio::spawn(async move { p.ensure(&["wiki"]).await })
        };
        let b = {
            let p = provisioner.clone();
            tokio::spawn(async move { p.ensure(&["wiki"]).await })
        };
        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();

        assert!(a.has_container("wiki"));
        assert!(b.has_container("wiki"));
        assert_eq!(engine.upgrade_count(CANONICAL_STORE_NAME), before + 1);
        let wiki_count = engine
            .container_names(CANONICAL_STORE_NAME)
            .iter()
            .filter(|c| c.as_str() == "wiki")
            .count();
        assert_eq!(wiki_count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_ensure_different_containers() {
        let engine = MemoryEngine::new();
        let provisioner = Arc::new(provisioner(&engine));
        provisioner.ensure(&["notes"]).await.unwrap();

        let a = {
            let p = provisioner.clone();
            tokio::spawn(async move { p.ensure(&["wiki"]).await })
        };
        let b = {
            let p = provisioner.clone();
            tokio::spawn(async move { p.ensure(&["videos"]).await })
        };
        assert!(a.await.unwrap().is_ok());
        assert!(b.await.unwrap().is_ok());

        let names = engine.container_names(CANONICAL_STORE_NAME);
        assert!(names.contains("wiki"));
        assert!(names.contains("videos"));
    }

    #[tokio::test]
    async fn test_legacy_store_name_opens_canonical_store() {
        let engine = MemoryEngine::new();
        let provisioner = Provisioner::new(
            Arc::new(engine.clone()),
            StoreNormalizer::default(),
            "Personal-Hub_DB",
        );

        let handle = provisioner.ensure(&["notes"]).await.unwrap();
        assert_eq!(handle.name(), CANONICAL_STORE_NAME);
        assert_eq!(provisioner.store_name(), CANONICAL_STORE_NAME);
        assert_eq!(engine.version("Personal-Hub_DB"), None);
    }

    #[tokio::test]
    async fn test_engine_failure_propagates() {
        let engine = MemoryEngine::new();
        let provisioner = provisioner(&engine);
        let _blocker = provisioner.ensure(&["notes"]).await.unwrap();

        // a foreign handle without a close-on-change listener blocks upgrades
        let _foreign = engine
            .open(OpenRequest::unversioned(CANONICAL_STORE_NAME), None)
            .await
            .unwrap();

        let result = provisioner.ensure(&["wiki"]).await;
        assert!(matches!(
            result,
            Err(Error::Store(EngineError::Blocked { .. }))
        ));
    }
}
