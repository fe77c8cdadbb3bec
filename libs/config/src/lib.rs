//! Role configuration for syndeo.
//!
//! A provisioning run is described by up to three role records (head, CPU
//! workers, GPU workers). Each record is persisted as a flat JSON object in a
//! role-keyed file and validated into a fixed-shape [`RoleConfig`] before it is
//! ever used.
//!
//! # Example
//!
//! ```
//! use syndeo_config::{Role, RoleConfig};
//!
//! let config = RoleConfig::defaults(Role::Gpu, chrono::Local::now());
//! assert_eq!(config.partition, "gaia");
//! assert!(config.validate().is_ok());
//! ```

mod error;
mod resources;
mod store;
mod types;

pub use error::{StoreError, ValidationError};
pub use resources::ResourceTable;
pub use store::{
    delete, load, save, ConfigStore, Layout, DEFAULT_LOG_DIR, DEFAULT_STATE_DIR,
    DEFAULT_TEMPLATE_DIR,
};
pub use types::{
    HostEnv, Record, Role, RoleConfig, CONTAINER_IMAGE_SUFFIX, DEFAULT_CONTAINER_TGT_PATH,
    DEFAULT_TIME_LIMIT, DEFAULT_TMPDIR, PARAMETER_LABELS, REQUIRED_KEYS, UNSET,
};
