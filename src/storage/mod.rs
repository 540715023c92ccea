//! Object storage abstraction for artifact locations.
//!
//! Artifacts are addressed by URI-like strings. The orchestration core
//! only ever needs an existence check (external artifact validation) and
//! a write (used by leaf-task simulations and tests); real jobs write to
//! their locations themselves. Strong read-after-write consistency is
//! assumed: a write observed complete is fully readable.

mod fs;

pub use fs::FsStorage;

use crate::error::Result;
use async_trait::async_trait;

/// URI-addressable artifact storage.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Check whether an object exists at the given URI.
    async fn exists(&self, uri: &str) -> Result<bool>;

    /// Write bytes to the given URI, creating parent containers as needed.
    async fn write(&self, uri: &str, data: &[u8]) -> Result<()>;
}
