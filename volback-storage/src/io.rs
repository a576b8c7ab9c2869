use crate::Image;
use crate::diff::ImageSpec;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use volback_core::Result;

/// Sequential byte stream over a volume, as handed to backup and restore.
#[async_trait]
pub trait VolumeIo: Send + Sync {
    /// Reads up to `length` bytes; a shorter result means end of data.
    async fn read(&mut self, length: usize) -> Result<Bytes>;
    async fn write(&mut self, data: &[u8]) -> Result<()>;
    async fn flush(&mut self) -> Result<()>;
    async fn seek(&mut self, offset: u64) -> Result<()>;
    fn tell(&self) -> u64;

    /// Native block-store access, present when the volume lives in the store.
    fn as_rbd(&self) -> Option<&RbdVolumeIo> {
        None
    }

    /// Forces written data to stable storage. Returns `false` when the handle has no
    /// descriptor-level sync.
    async fn fsync(&mut self) -> Result<bool> {
        Ok(false)
    }
}

/// Plain file or block device node.
pub struct FileVolumeIo {
    file: fs::File,
    path: PathBuf,
    offset: u64,
}

impl FileVolumeIo {
    pub async fn open(path: &Path, writable: bool) -> Result<Self> {
        let file = fs::OpenOptions::new()
            .read(true)
            .write(writable)
            .open(path)
            .await?;
        Ok(Self::from_file(file, path.to_path_buf()))
    }

    pub fn from_file(file: fs::File, path: PathBuf) -> Self {
        Self {
            file,
            path,
            offset: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl VolumeIo for FileVolumeIo {
    async fn read(&mut self, length: usize) -> Result<Bytes> {
        let mut buf = BytesMut::zeroed(length);
        let mut filled = 0;
        while filled < length {
            let n = self.file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        self.offset += filled as u64;
        Ok(buf.freeze())
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.file.write_all(data).await?;
        self.offset += data.len() as u64;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.file.flush().await?;
        Ok(())
    }

    async fn seek(&mut self, offset: u64) -> Result<()> {
        self.offset = self.file.seek(SeekFrom::Start(offset)).await?;
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.offset
    }

    async fn fsync(&mut self) -> Result<bool> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(true)
    }
}

/// Image in the block store together with the credentials needed to reach it from
/// the diff tool.
pub struct RbdVolumeIo {
    image: Box<dyn Image>,
    pool: String,
    user: String,
    conf: Option<PathBuf>,
    offset: u64,
}

impl RbdVolumeIo {
    pub fn new(image: Box<dyn Image>, pool: &str, user: &str, conf: Option<PathBuf>) -> Self {
        Self {
            image,
            pool: pool.to_string(),
            user: user.to_string(),
            conf,
            offset: 0,
        }
    }

    pub fn image(&self) -> &dyn Image {
        self.image.as_ref()
    }

    pub fn name(&self) -> &str {
        self.image.name()
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn conf(&self) -> Option<&Path> {
        self.conf.as_deref()
    }

    /// Locator of this image for the diff tool.
    pub fn spec(&self) -> ImageSpec {
        ImageSpec {
            pool: self.pool.clone(),
            name: self.image.name().to_string(),
            snapshot: self.image.snapshot().map(str::to_string),
            user: self.user.clone(),
            conf: self.conf.clone(),
        }
    }
}

#[async_trait]
impl VolumeIo for RbdVolumeIo {
    async fn read(&mut self, length: usize) -> Result<Bytes> {
        let data = self.image.read(self.offset, length).await?;
        self.offset += data.len() as u64;
        Ok(data)
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.image.write(data, self.offset).await?;
        self.offset += data.len() as u64;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.image.flush().await
    }

    async fn seek(&mut self, offset: u64) -> Result<()> {
        self.offset = offset;
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.offset
    }

    fn as_rbd(&self) -> Option<&RbdVolumeIo> {
        Some(self)
    }
}
