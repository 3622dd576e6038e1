//! Tabula Access - the database access core
//!
//! Everything between an encrypted connection record and a live,
//! engine-specific data access object:
//!
//! - `AccessService` - composition root: decrypt, fingerprint, cache,
//!   dispatch; explicit `shutdown()` closes every live resource
//! - `ResourceCache` - independently bounded TTL/LRU stores per resource
//!   kind (client handles, tunnels, schema metadata)
//! - `TunnelManager` - SSH port forwarding with self-healing eviction
//! - `ClientFactory` - single-flighted get-or-create of live handles
//!
//! No module-level globals: one `AccessService` is constructed at
//! startup and passed where needed.

mod cache;
mod config;
mod factory;
mod probe;
mod service;
mod singleflight;
mod tunnel;

pub use cache::ResourceCache;
pub use config::{AccessConfig, CacheConfig, ProbeConfig, TunnelConfig};
pub use factory::ClientFactory;
pub use probe::probe_with_backoff;
pub use service::{AccessService, EncryptedConnectionRecord};
pub use tunnel::{ErrorHook, TunnelEntry, TunnelManager};
