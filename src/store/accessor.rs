//! Validated record access
//!
//! `HubStore` is the public surface over the canonical store. Every operation
//! normalizes the container name, makes sure the container exists (provisioning
//! it if needed) and then runs a single-container transaction.

use crate::config::UnistoreConfig;
use crate::engine::{Record, RecordId, SqliteEngine, StoreEngine, StoreHandle, ID_FIELD};
use crate::error::{Error, Result};
use crate::store::containers::{is_required, REQUIRED_CONTAINERS, TODOS, TODO_ALIAS};
use crate::store::normalizer::{StoreNormalizer, CANONICAL_STORE_NAME};
use crate::store::provisioner::Provisioner;
use crate::store::session::SessionCache;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

/// Conversion of caller-supplied identifiers into record ids.
///
/// Accepts integers, integral floats and numeric strings.
pub trait IntoRecordId {
    fn into_record_id(self) -> Result<RecordId>;
}

impl IntoRecordId for RecordId {
    fn into_record_id(self) -> Result<RecordId> {
        Ok(self)
    }
}

impl IntoRecordId for i32 {
    fn into_record_id(self) -> Result<RecordId> {
        Ok(self.into())
    }
}

impl IntoRecordId for u32 {
    fn into_record_id(self) -> Result<RecordId> {
        Ok(self.into())
    }
}

impl IntoRecordId for u64 {
    fn into_record_id(self) -> Result<RecordId> {
        RecordId::try_from(self)
            .map_err(|_| Error::invalid_argument(format!("id {} is out of range", self)))
    }
}

fn float_id(value: f64) -> Option<RecordId> {
    let in_range = value >= RecordId::MIN as f64 && value <= RecordId::MAX as f64;
    (value.is_finite() && value.fract() == 0.0 && in_range).then(|| value as RecordId)
}

impl IntoRecordId for &str {
    fn into_record_id(self) -> Result<RecordId> {
        let trimmed = self.trim();
        trimmed
            .parse::<RecordId>()
            .ok()
            .or_else(|| trimmed.parse::<f64>().ok().and_then(float_id))
            .ok_or_else(|| Error::invalid_argument(format!("id '{}' is not numeric", self)))
    }
}

impl IntoRecordId for &String {
    fn into_record_id(self) -> Result<RecordId> {
        self.as_str().into_record_id()
    }
}

impl IntoRecordId for String {
    fn into_record_id(self) -> Result<RecordId> {
        self.as_str().into_record_id()
    }
}

impl IntoRecordId for &Value {
    fn into_record_id(self) -> Result<RecordId> {
        match self {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().and_then(float_id))
                .ok_or_else(|| Error::invalid_argument(format!("id {} is not an integer", n))),
            Value::String(s) => s.as_str().into_record_id(),
            other => Err(Error::invalid_argument(format!(
                "id must be a number, got {}",
                other
            ))),
        }
    }
}

impl IntoRecordId for Value {
    fn into_record_id(self) -> Result<RecordId> {
        (&self).into_record_id()
    }
}

fn into_object(record: Value, operation: &str) -> Result<Record> {
    match record {
        Value::Object(map) => Ok(map),
        Value::Null => Err(Error::invalid_argument(format!(
            "{} requires a record",
            operation
        ))),
        other => Err(Error::invalid_argument(format!(
            "{} requires an object record, got {}",
            operation, other
        ))),
    }
}

/// Record count of one container
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "display", derive(tabled::Tabled))]
pub struct ContainerStatus {
    pub name: String,
    pub records: u64,
    pub required: bool,
}

/// Snapshot of the canonical store
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub name: String,
    pub version: u32,
    pub containers: Vec<ContainerStatus>,
}

/// Validated CRUD access to the canonical store
pub struct HubStore {
    session: SessionCache,
}

impl HubStore {
    /// Store over `engine` using the default canonical name, floor and required containers
    pub fn new(engine: Arc<dyn StoreEngine>) -> Self {
        Self::with_provisioner(Provisioner::new(
            engine,
            StoreNormalizer::default(),
            CANONICAL_STORE_NAME,
        ))
    }

    pub fn with_provisioner(provisioner: Provisioner) -> Self {
        Self {
            session: SessionCache::new(provisioner, REQUIRED_CONTAINERS),
        }
    }

    /// SQLite-backed store in the configured data directory
    pub fn open_sqlite(config: &UnistoreConfig) -> Result<Self> {
        let engine = SqliteEngine::new(&config.data_dir)?;
        Ok(Self::with_provisioner(Provisioner::new(
            Arc::new(engine),
            StoreNormalizer::default(),
            config.store_name.as_str(),
        )))
    }

    pub fn session(&self) -> &SessionCache {
        &self.session
    }

    pub fn required_containers() -> &'static [&'static str] {
        REQUIRED_CONTAINERS
    }

    /// Open and provision the canonical store.
    ///
    /// Failing here means no operation can proceed, so the failure is logged
    /// in addition to being returned.
    pub async fn bootstrap(&self) -> Result<()> {
        match self.session.handle().await {
            Ok(handle) => {
                info!(
                    "store '{}' ready at v{}",
                    handle.name(),
                    handle.version()
                );
                Ok(())
            }
            Err(e) => {
                error!("failed to open the canonical store: {}", e);
                Err(e)
            }
        }
    }

    /// Map a caller-supplied container name to the stored name.
    pub fn normalize_container_name(name: &str) -> Result<&str> {
        if name.trim().is_empty() {
            return Err(Error::invalid_argument("container name is required"));
        }
        if name == TODO_ALIAS {
            return Ok(TODOS);
        }
        Ok(name)
    }

    /// Return a handle guaranteed to contain `name`, provisioning it if needed.
    pub async fn validate(&self, name: &str) -> Result<Arc<dyn StoreHandle>> {
        let container = Self::normalize_container_name(name)?;
        let handle = self.session.handle().await?;
        if handle.has_container(container) {
            return Ok(handle);
        }

        info!(
            "container '{}' not in store v{}, provisioning",
            container,
            handle.version()
        );
        let handle = self.session.provision(&[container]).await?;
        if !handle.has_container(container) {
            return Err(Error::ContainerMissing(container.to_string()));
        }
        Ok(handle)
    }

    /// Insert `record`, ignoring any `id` it carries. Returns the new id.
    pub async fn create(&self, container: &str, record: Value) -> Result<RecordId> {
        let mut record = into_object(record, "create")?;
        let container = Self::normalize_container_name(container)?;
        let handle = self.validate(container).await?;

        record.remove(ID_FIELD);
        Ok(handle.insert(container, record).await?)
    }

    /// All records in id order.
    pub async fn list_all(&self, container: &str) -> Result<Vec<Record>> {
        let container = Self::normalize_container_name(container)?;
        let handle = self.validate(container).await?;
        Ok(handle.get_all(container).await?)
    }

    pub async fn get_by_id(&self, container: &str, id: impl IntoRecordId) -> Result<Option<Record>> {
        let container = Self::normalize_container_name(container)?;
        let handle = self.validate(container).await?;
        let id = id.into_record_id()?;
        Ok(handle.get(container, id).await?)
    }

    /// Replace the record stored under `record.id`, creating it if absent.
    pub async fn update(&self, container: &str, record: Value) -> Result<RecordId> {
        let mut record = into_object(record, "update")?;
        let id = match record.get(ID_FIELD) {
            None | Some(Value::Null) => {
                return Err(Error::invalid_argument("update requires a record with an id"))
            }
            Some(value) => value.into_record_id()?,
        };
        record.insert(ID_FIELD.to_string(), Value::from(id));

        let container = Self::normalize_container_name(container)?;
        let handle = self.validate(container).await?;
        Ok(handle.put(container, record).await?)
    }

    /// Delete a record. Removing an id that does not exist is not an error.
    pub async fn remove(&self, container: &str, id: impl IntoRecordId) -> Result<()> {
        let container = Self::normalize_container_name(container)?;
        let handle = self.validate(container).await?;
        let id = id.into_record_id()?;
        Ok(handle.delete(container, id).await?)
    }

    pub async fn count(&self, container: &str) -> Result<u64> {
        let container = Self::normalize_container_name(container)?;
        let handle = self.validate(container).await?;
        Ok(handle.count(container).await?)
    }

    pub async fn status(&self) -> Result<StoreStatus> {
        let handle = self.session.handle().await?;
        let mut containers = Vec::new();
        for name in handle.container_names() {
            let records = handle.count(&name).await?;
            containers.push(ContainerStatus {
                required: is_required(&name),
                name,
                records,
            });
        }

        Ok(StoreStatus {
            name: handle.name().to_string(),
            version: handle.version(),
            containers,
        })
    }
}
