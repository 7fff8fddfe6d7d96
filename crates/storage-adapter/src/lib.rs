//! Remote blob storage for the model server
//!
//! This crate provides the object-store back ends behind the remote cache
//! tier. Every back end speaks in flat object names with forward-slash
//! separators and moves whole files between the store and local disk.

pub mod blob;
pub mod filesystem;
pub mod gcs;
pub mod transfer;

// Re-export commonly used types
pub use blob::{BlobDescriptor, BlobStore};
pub use filesystem::FilesystemBlobStore;
pub use gcs::GcsBlobStore;
