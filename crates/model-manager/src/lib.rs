//! Model lifecycle management for the model server
//!
//! This crate resolves a model's files through three cache tiers (local
//! disk, a remote blob store, and the authoritative origin) and loads each
//! model into memory at most once per process.

pub mod cache_key;
pub mod artifact;
pub mod local;
pub mod remote;
pub mod origin;
pub mod loader;

// Re-export commonly used types
pub use cache_key::CacheKeyResolver;
pub use artifact::{ArtifactFile, LoadedArtifact};
pub use local::LocalCacheStore;
pub use remote::RemoteBlobStore;
pub use origin::{HubOrigin, OriginFetcher, OriginSource};
pub use loader::{ArtifactLoader, ArtifactLoaderBuilder};
