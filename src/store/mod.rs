//! The canonical store on top of a [`StoreEngine`](crate::engine::StoreEngine)
//!
//! ```text
//! HubStore ──> SessionCache ──> Provisioner ──> StoreNormalizer ──> StoreEngine
//!  validate     cached handle     upgrade +1      legacy names
//!  CRUD                                           version floor
//! ```

mod accessor;
mod containers;
mod normalizer;
mod provisioner;
mod session;

pub use accessor::{ContainerStatus, HubStore, IntoRecordId, StoreStatus};
pub use containers::{is_required, REQUIRED_CONTAINERS, TODOS, TODO_ALIAS};
pub use normalizer::{
    fold_name, StoreNormalizer, CANONICAL_STORE_NAME, LEGACY_STORE_NAMES, MIN_STORE_VERSION,
};
pub use provisioner::Provisioner;
pub use session::SessionCache;
