pub mod config;
pub mod credentials;
pub mod network;
pub mod refs;
pub mod registry;
pub mod service;

pub use config::{AppConfig, SecretBackend};
pub use credentials::{
    KeyringSecretStore, MemorySecretStore, SecretError, SecretKey, SecretStore, open_secret_store,
};
pub use network::{ConnectivityAlerts, ConnectivityNotice};
pub use refs::{RefKind, RefStore, RefStoreError};
pub use registry::{RegistryError, RegistryState, StorageRegistry};
pub use service::{
    CloudSync, LinkedFile, ServiceError, ServiceStatus, SyncReport, SyncTarget,
};
