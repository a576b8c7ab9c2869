pub mod diff;
pub mod io;
pub mod local;
pub mod memory;
pub mod transfer;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use volback_core::Result;

/// Content-addressable block store: pools of images plus side-channel objects.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Creates an image; fails with `ImageExists` if the name is taken.
    async fn create(&self, pool: &str, name: &str, size: u64, options: &CreateOptions)
    -> Result<()>;
    async fn open(
        &self,
        pool: &str,
        name: &str,
        snapshot: Option<&str>,
        read_only: bool,
    ) -> Result<Box<dyn Image>>;
    async fn remove(&self, pool: &str, name: &str) -> Result<()>;
    async fn list(&self, pool: &str) -> Result<Vec<String>>;

    async fn exists(&self, pool: &str, name: &str) -> Result<bool> {
        Ok(self.list(pool).await?.iter().any(|image| image == name))
    }

    async fn object_exists(&self, pool: &str, name: &str) -> Result<bool>;
    async fn read_object(&self, pool: &str, name: &str) -> Result<Bytes>;
    /// Replaces the whole object.
    async fn write_object(&self, pool: &str, name: &str, data: &[u8]) -> Result<()>;
    async fn remove_object(&self, pool: &str, name: &str) -> Result<()>;
}

/// Open handle on an image, or on one of its snapshots when opened read-only at a snapshot.
#[async_trait]
pub trait Image: Send + Sync {
    fn name(&self) -> &str;
    fn snapshot(&self) -> Option<&str>;

    async fn size(&self) -> Result<u64>;
    async fn resize(&self, size: u64) -> Result<()>;
    /// Reads up to `length` bytes; returns fewer at the end of the image.
    async fn read(&self, offset: u64, length: usize) -> Result<Bytes>;
    async fn write(&self, data: &[u8], offset: u64) -> Result<()>;
    async fn discard(&self, offset: u64, length: u64) -> Result<()>;
    async fn flush(&self) -> Result<()>;

    async fn create_snap(&self, name: &str) -> Result<()>;
    async fn remove_snap(&self, name: &str) -> Result<()>;
    async fn list_snaps(&self) -> Result<Vec<SnapInfo>>;

    /// Allocated byte ranges, in offset order.
    async fn allocated_extents(&self) -> Result<Vec<Extent>>;

    async fn has_extents(&self) -> Result<bool> {
        Ok(!self.allocated_extents().await?.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapInfo {
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    pub offset: u64,
    pub length: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFeature {
    Layering,
    StripingV2,
    ExclusiveLock,
    Journaling,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOptions {
    pub features: Vec<ImageFeature>,
    pub stripe_unit: u64,
    pub stripe_count: u64,
}

pub use diff::{CopyDiffTransfer, DiffTransfer, ImageSpec, RbdDiffPipeline};
pub use io::{FileVolumeIo, RbdVolumeIo, VolumeIo};
pub use local::LocalBlockStore;
pub use memory::MemoryBlockStore;
pub use transfer::ChunkedTransfer;
