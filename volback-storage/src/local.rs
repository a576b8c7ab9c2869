use crate::{BlockStore, CreateOptions, Extent, Image, SnapInfo};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info};
use volback_core::{Result, VolbackError};

const IMAGE_SUFFIX: &str = ".img";
const SNAPS_SUFFIX: &str = ".snaps";
const OBJECTS_DIR: &str = "objects";
const SCAN_BLOCK: usize = 64 * 1024;
const ZERO_WRITE: usize = 1024 * 1024;

type OpenHandles = Arc<Mutex<HashMap<PathBuf, usize>>>;

/// Block store laid out on a local directory tree:
/// `<root>/<pool>/<image>.img`, snapshots under `<image>.snaps/`, objects under `objects/`.
pub struct LocalBlockStore {
    root: PathBuf,
    open_handles: OpenHandles,
}

impl LocalBlockStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            open_handles: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn init(&self, pools: &[&str]) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        for pool in pools {
            self.create_pool(pool).await?;
        }
        Ok(())
    }

    pub async fn create_pool(&self, pool: &str) -> Result<()> {
        check_name(pool)?;
        let pool_dir = self.root.join(pool);
        fs::create_dir_all(pool_dir.join(OBJECTS_DIR)).await?;
        debug!("Created pool {:?}", pool_dir);
        Ok(())
    }

    fn pool_dir(&self, pool: &str) -> Result<PathBuf> {
        check_name(pool)?;
        let pool_dir = self.root.join(pool);
        if !pool_dir.is_dir() {
            return Err(VolbackError::PoolNotFound(pool.to_string()));
        }
        Ok(pool_dir)
    }

    fn image_path(pool_dir: &Path, name: &str) -> PathBuf {
        pool_dir.join(format!("{name}{IMAGE_SUFFIX}"))
    }

    fn snap_dir(pool_dir: &Path, name: &str) -> PathBuf {
        pool_dir.join(format!("{name}{SNAPS_SUFFIX}"))
    }

    fn open_count(&self, path: &Path) -> usize {
        self.open_handles
            .lock()
            .map(|handles| handles.get(path).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.starts_with('.') {
        return Err(VolbackError::InvalidParameter(format!(
            "Invalid store name '{name}'"
        )));
    }
    Ok(())
}

/// Registers an open writable handle; removal of the image is refused while any exist.
struct OpenGuard {
    handles: OpenHandles,
    path: PathBuf,
}

impl OpenGuard {
    fn register(handles: &OpenHandles, path: &Path) -> Self {
        if let Ok(mut map) = handles.lock() {
            *map.entry(path.to_path_buf()).or_insert(0) += 1;
        }
        Self {
            handles: handles.clone(),
            path: path.to_path_buf(),
        }
    }
}

impl Drop for OpenGuard {
    fn drop(&mut self) {
        if let Ok(mut map) = self.handles.lock() {
            if let Some(count) = map.get_mut(&self.path) {
                *count -= 1;
                if *count == 0 {
                    map.remove(&self.path);
                }
            }
        }
    }
}

#[async_trait]
impl BlockStore for LocalBlockStore {
    async fn create(
        &self,
        pool: &str,
        name: &str,
        size: u64,
        options: &CreateOptions,
    ) -> Result<()> {
        check_name(name)?;
        let pool_dir = self.pool_dir(pool)?;
        let image_path = Self::image_path(&pool_dir, name);
        if image_path.exists() {
            return Err(VolbackError::ImageExists(name.to_string()));
        }

        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&image_path)
            .await?;
        file.set_len(size).await?;

        info!(
            "Created image {}/{} with size {} bytes (features {:?})",
            pool, name, size, options.features
        );
        Ok(())
    }

    async fn open(
        &self,
        pool: &str,
        name: &str,
        snapshot: Option<&str>,
        read_only: bool,
    ) -> Result<Box<dyn Image>> {
        check_name(name)?;
        let pool_dir = self.pool_dir(pool)?;
        let head_path = Self::image_path(&pool_dir, name);
        if !head_path.exists() {
            return Err(VolbackError::ImageNotFound(name.to_string()));
        }
        let snap_dir = Self::snap_dir(&pool_dir, name);

        let (path, read_only) = match snapshot {
            Some(snap) => {
                let snap_path = snap_dir.join(format!("{snap}{IMAGE_SUFFIX}"));
                if !snap_path.exists() {
                    return Err(VolbackError::SnapshotNotFound {
                        image: name.to_string(),
                        snapshot: snap.to_string(),
                    });
                }
                (snap_path, true)
            }
            None => (head_path.clone(), read_only),
        };

        let file = fs::OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(&path)
            .await?;
        let guard = (!read_only).then(|| OpenGuard::register(&self.open_handles, &head_path));

        Ok(Box::new(LocalImage {
            name: name.to_string(),
            snapshot: snapshot.map(str::to_string),
            head_path,
            snap_dir,
            file: tokio::sync::Mutex::new(file),
            read_only,
            _guard: guard,
        }))
    }

    async fn remove(&self, pool: &str, name: &str) -> Result<()> {
        check_name(name)?;
        let pool_dir = self.pool_dir(pool)?;
        let image_path = Self::image_path(&pool_dir, name);
        if !image_path.exists() {
            return Err(VolbackError::ImageNotFound(name.to_string()));
        }
        if self.open_count(&image_path) > 0 {
            return Err(VolbackError::ImageBusy(name.to_string()));
        }

        let snap_dir = Self::snap_dir(&pool_dir, name);
        if snap_dir.exists() {
            let mut entries = fs::read_dir(&snap_dir).await?;
            if entries.next_entry().await?.is_some() {
                return Err(VolbackError::StorageError(format!(
                    "Image {name} still has snapshots"
                )));
            }
            fs::remove_dir(&snap_dir).await?;
        }

        fs::remove_file(&image_path).await?;
        info!("Removed image {}/{}", pool, name);
        Ok(())
    }

    async fn list(&self, pool: &str) -> Result<Vec<String>> {
        let pool_dir = self.pool_dir(pool)?;
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&pool_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry
                .file_name()
                .to_str()
                .and_then(|file_name| file_name.strip_suffix(IMAGE_SUFFIX))
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn object_exists(&self, pool: &str, name: &str) -> Result<bool> {
        check_name(name)?;
        let pool_dir = self.pool_dir(pool)?;
        Ok(pool_dir.join(OBJECTS_DIR).join(name).exists())
    }

    async fn read_object(&self, pool: &str, name: &str) -> Result<Bytes> {
        check_name(name)?;
        let path = self.pool_dir(pool)?.join(OBJECTS_DIR).join(name);
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(VolbackError::ObjectNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_object(&self, pool: &str, name: &str, data: &[u8]) -> Result<()> {
        check_name(name)?;
        let objects_dir = self.pool_dir(pool)?.join(OBJECTS_DIR);
        fs::create_dir_all(&objects_dir).await?;
        fs::write(objects_dir.join(name), data).await?;
        Ok(())
    }

    async fn remove_object(&self, pool: &str, name: &str) -> Result<()> {
        check_name(name)?;
        let path = self.pool_dir(pool)?.join(OBJECTS_DIR).join(name);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(VolbackError::ObjectNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

pub struct LocalImage {
    name: String,
    snapshot: Option<String>,
    head_path: PathBuf,
    snap_dir: PathBuf,
    file: tokio::sync::Mutex<fs::File>,
    read_only: bool,
    _guard: Option<OpenGuard>,
}

impl LocalImage {
    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(VolbackError::StorageError(format!(
                "Image {} is opened read-only",
                self.name
            )));
        }
        Ok(())
    }

    fn snap_path(&self, snap: &str) -> PathBuf {
        self.snap_dir.join(format!("{snap}{IMAGE_SUFFIX}"))
    }
}

#[async_trait]
impl Image for LocalImage {
    fn name(&self) -> &str {
        &self.name
    }

    fn snapshot(&self) -> Option<&str> {
        self.snapshot.as_deref()
    }

    async fn size(&self) -> Result<u64> {
        let file = self.file.lock().await;
        Ok(file.metadata().await?.len())
    }

    async fn resize(&self, size: u64) -> Result<()> {
        self.ensure_writable()?;
        let file = self.file.lock().await;
        file.set_len(size).await?;
        Ok(())
    }

    async fn read(&self, offset: u64, length: usize) -> Result<Bytes> {
        let mut file = self.file.lock().await;
        let size = file.metadata().await?.len();
        if offset >= size || length == 0 {
            return Ok(Bytes::new());
        }

        let len = (length as u64).min(size - offset) as usize;
        let mut buf = BytesMut::zeroed(len);
        file.seek(SeekFrom::Start(offset)).await?;
        file.read_exact(&mut buf).await?;
        Ok(buf.freeze())
    }

    async fn write(&self, data: &[u8], offset: u64) -> Result<()> {
        self.ensure_writable()?;
        let mut file = self.file.lock().await;
        let size = file.metadata().await?.len();
        if offset + data.len() as u64 > size {
            return Err(VolbackError::StorageError(format!(
                "Write of {} bytes at offset {} exceeds image size {}",
                data.len(),
                offset,
                size
            )));
        }

        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        Ok(())
    }

    async fn discard(&self, offset: u64, length: u64) -> Result<()> {
        self.ensure_writable()?;
        let mut file = self.file.lock().await;
        let size = file.metadata().await?.len();
        let end = (offset + length).min(size);
        if offset >= end {
            return Ok(());
        }

        let zeroes = vec![0u8; ZERO_WRITE.min((end - offset) as usize)];
        file.seek(SeekFrom::Start(offset)).await?;
        let mut pos = offset;
        while pos < end {
            let piece = (end - pos).min(zeroes.len() as u64) as usize;
            file.write_all(&zeroes[..piece]).await?;
            pos += piece as u64;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let mut file = self.file.lock().await;
        file.flush().await?;
        Ok(())
    }

    async fn create_snap(&self, name: &str) -> Result<()> {
        self.ensure_writable()?;
        check_name(name)?;
        let target = self.snap_path(name);
        if target.exists() {
            return Err(VolbackError::StorageError(format!(
                "Snapshot {name} already exists on image {}",
                self.name
            )));
        }

        let mut file = self.file.lock().await;
        file.flush().await?;
        fs::create_dir_all(&self.snap_dir).await?;
        fs::copy(&self.head_path, &target).await?;
        debug!("Created snapshot {}@{}", self.name, name);
        Ok(())
    }

    async fn remove_snap(&self, name: &str) -> Result<()> {
        self.ensure_writable()?;
        check_name(name)?;
        match fs::remove_file(self.snap_path(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(VolbackError::SnapshotNotFound {
                    image: self.name.clone(),
                    snapshot: name.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_snaps(&self) -> Result<Vec<SnapInfo>> {
        if !self.snap_dir.exists() {
            return Ok(Vec::new());
        }

        let mut snaps = Vec::new();
        let mut entries = fs::read_dir(&self.snap_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name
                .to_str()
                .and_then(|file_name| file_name.strip_suffix(IMAGE_SUFFIX))
            else {
                continue;
            };
            snaps.push(SnapInfo {
                name: name.to_string(),
                size: entry.metadata().await?.len(),
            });
        }
        snaps.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(snaps)
    }

    async fn allocated_extents(&self) -> Result<Vec<Extent>> {
        let mut file = self.file.lock().await;
        let size = file.metadata().await?.len();
        file.seek(SeekFrom::Start(0)).await?;

        let mut extents: Vec<Extent> = Vec::new();
        let mut buf = vec![0u8; SCAN_BLOCK];
        let mut offset = 0u64;
        while offset < size {
            let len = (size - offset).min(SCAN_BLOCK as u64) as usize;
            file.read_exact(&mut buf[..len]).await?;
            if buf[..len].iter().any(|&byte| byte != 0) {
                match extents.last_mut() {
                    Some(last) if last.offset + last.length == offset => {
                        last.length += len as u64
                    }
                    _ => extents.push(Extent {
                        offset,
                        length: len as u64,
                    }),
                }
            }
            offset += len as u64;
        }
        Ok(extents)
    }
}
