use crate::{BlockStore, CreateOptions, Extent, Image, SnapInfo};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use volback_core::{Result, VolbackError};

const BLOCK_SIZE: u64 = 64 * 1024;
static ZERO_BLOCK: [u8; BLOCK_SIZE as usize] = [0; BLOCK_SIZE as usize];

/// Sparse image content; all-zero blocks are never stored.
#[derive(Debug, Clone, Default)]
struct Blocks {
    size: u64,
    blocks: BTreeMap<u64, Box<[u8]>>,
}

impl Blocks {
    fn new(size: u64) -> Self {
        Self {
            size,
            blocks: BTreeMap::new(),
        }
    }

    fn read(&self, offset: u64, length: usize) -> Bytes {
        if offset >= self.size || length == 0 {
            return Bytes::new();
        }
        let len = (length as u64).min(self.size - offset);
        let end = offset + len;
        let mut buf = BytesMut::zeroed(len as usize);

        for (&index, block) in self
            .blocks
            .range(offset / BLOCK_SIZE..=(end - 1) / BLOCK_SIZE)
        {
            let block_start = index * BLOCK_SIZE;
            let from = offset.max(block_start);
            let to = end.min(block_start + BLOCK_SIZE);
            buf[(from - offset) as usize..(to - offset) as usize].copy_from_slice(
                &block[(from - block_start) as usize..(to - block_start) as usize],
            );
        }

        buf.freeze()
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let end = offset + data.len() as u64;
        if end > self.size {
            return Err(VolbackError::StorageError(format!(
                "Write of {} bytes at offset {} exceeds image size {}",
                data.len(),
                offset,
                self.size
            )));
        }

        let mut pos = offset;
        while pos < end {
            let index = pos / BLOCK_SIZE;
            let block_start = index * BLOCK_SIZE;
            let to = end.min(block_start + BLOCK_SIZE);
            let src = &data[(pos - offset) as usize..(to - offset) as usize];
            let inner = (pos - block_start) as usize;

            if !self.blocks.contains_key(&index) && src == &ZERO_BLOCK[..src.len()] {
                pos = to;
                continue;
            }

            let block = self
                .blocks
                .entry(index)
                .or_insert_with(|| vec![0u8; BLOCK_SIZE as usize].into_boxed_slice());
            block[inner..inner + src.len()].copy_from_slice(src);
            let is_zero = block[..] == ZERO_BLOCK[..];
            if is_zero {
                self.blocks.remove(&index);
            }
            pos = to;
        }

        Ok(())
    }

    fn zero(&mut self, offset: u64, length: u64) {
        let end = (offset + length).min(self.size);
        let mut pos = offset;
        while pos < end {
            let index = pos / BLOCK_SIZE;
            let block_start = index * BLOCK_SIZE;
            let to = end.min(block_start + BLOCK_SIZE);

            if pos == block_start && to == block_start + BLOCK_SIZE {
                self.blocks.remove(&index);
            } else if let Some(block) = self.blocks.get_mut(&index) {
                block[(pos - block_start) as usize..(to - block_start) as usize].fill(0);
                let is_zero = block[..] == ZERO_BLOCK[..];
                if is_zero {
                    self.blocks.remove(&index);
                }
            }
            pos = to;
        }
    }

    fn resize(&mut self, size: u64) {
        if size < self.size {
            let tail = size % BLOCK_SIZE;
            let first_dropped = size.div_ceil(BLOCK_SIZE);
            self.blocks.retain(|&index, _| index < first_dropped);
            if tail != 0 {
                self.zero(size, BLOCK_SIZE - tail);
            }
        }
        self.size = size;
    }

    fn extents(&self) -> Vec<Extent> {
        let mut extents: Vec<Extent> = Vec::new();
        for &index in self.blocks.keys() {
            let start = index * BLOCK_SIZE;
            let length = BLOCK_SIZE.min(self.size.saturating_sub(start));
            if length == 0 {
                continue;
            }
            match extents.last_mut() {
                Some(last) if last.offset + last.length == start => last.length += length,
                _ => extents.push(Extent {
                    offset: start,
                    length,
                }),
            }
        }
        extents
    }
}

#[derive(Debug)]
struct MemImage {
    head: Blocks,
    snaps: Vec<(String, Blocks)>,
    options: CreateOptions,
    busy: u32,
}

#[derive(Debug, Default)]
struct MemPool {
    images: BTreeMap<String, MemImage>,
    objects: BTreeMap<String, Bytes>,
}

type Pools = Arc<RwLock<HashMap<String, MemPool>>>;

fn lookup_pool<'a>(pools: &'a HashMap<String, MemPool>, pool: &str) -> Result<&'a MemPool> {
    pools
        .get(pool)
        .ok_or_else(|| VolbackError::PoolNotFound(pool.to_string()))
}

fn lookup_pool_mut<'a>(
    pools: &'a mut HashMap<String, MemPool>,
    pool: &str,
) -> Result<&'a mut MemPool> {
    pools
        .get_mut(pool)
        .ok_or_else(|| VolbackError::PoolNotFound(pool.to_string()))
}

fn lookup_image<'a>(
    pools: &'a HashMap<String, MemPool>,
    pool: &str,
    name: &str,
) -> Result<&'a MemImage> {
    lookup_pool(pools, pool)?
        .images
        .get(name)
        .ok_or_else(|| VolbackError::ImageNotFound(name.to_string()))
}

fn lookup_image_mut<'a>(
    pools: &'a mut HashMap<String, MemPool>,
    pool: &str,
    name: &str,
) -> Result<&'a mut MemImage> {
    lookup_pool_mut(pools, pool)?
        .images
        .get_mut(name)
        .ok_or_else(|| VolbackError::ImageNotFound(name.to_string()))
}

/// Block store held entirely in memory.
#[derive(Clone, Default)]
pub struct MemoryBlockStore {
    pools: Pools,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_pools(pools: &[&str]) -> Self {
        let store = Self::new();
        for pool in pools {
            store.create_pool(pool).await;
        }
        store
    }

    pub async fn create_pool(&self, pool: &str) {
        self.pools
            .write()
            .await
            .entry(pool.to_string())
            .or_default();
    }

    pub async fn remove_pool(&self, pool: &str) -> Result<()> {
        self.pools
            .write()
            .await
            .remove(pool)
            .map(|_| ())
            .ok_or_else(|| VolbackError::PoolNotFound(pool.to_string()))
    }

    /// Makes the next `times` removals of the image fail with `ImageBusy`.
    pub async fn set_busy(&self, pool: &str, name: &str, times: u32) -> Result<()> {
        let mut pools = self.pools.write().await;
        lookup_image_mut(&mut pools, pool, name)?.busy = times;
        Ok(())
    }

    pub async fn image_options(&self, pool: &str, name: &str) -> Result<CreateOptions> {
        let pools = self.pools.read().await;
        Ok(lookup_image(&pools, pool, name)?.options.clone())
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn create(
        &self,
        pool: &str,
        name: &str,
        size: u64,
        options: &CreateOptions,
    ) -> Result<()> {
        let mut pools = self.pools.write().await;
        let pool_entry = lookup_pool_mut(&mut pools, pool)?;
        if pool_entry.images.contains_key(name) {
            return Err(VolbackError::ImageExists(name.to_string()));
        }

        pool_entry.images.insert(
            name.to_string(),
            MemImage {
                head: Blocks::new(size),
                snaps: Vec::new(),
                options: options.clone(),
                busy: 0,
            },
        );
        debug!("Created image {}/{} ({} bytes)", pool, name, size);
        Ok(())
    }

    async fn open(
        &self,
        pool: &str,
        name: &str,
        snapshot: Option<&str>,
        read_only: bool,
    ) -> Result<Box<dyn Image>> {
        {
            let pools = self.pools.read().await;
            let image = lookup_image(&pools, pool, name)?;
            if let Some(snap) = snapshot {
                if !image.snaps.iter().any(|(snap_name, _)| snap_name == snap) {
                    return Err(VolbackError::SnapshotNotFound {
                        image: name.to_string(),
                        snapshot: snap.to_string(),
                    });
                }
            }
        }

        Ok(Box::new(MemoryImage {
            pools: self.pools.clone(),
            pool: pool.to_string(),
            name: name.to_string(),
            snapshot: snapshot.map(str::to_string),
            read_only: read_only || snapshot.is_some(),
        }))
    }

    async fn remove(&self, pool: &str, name: &str) -> Result<()> {
        let mut pools = self.pools.write().await;
        let image = lookup_image_mut(&mut pools, pool, name)?;
        if image.busy > 0 {
            image.busy -= 1;
            return Err(VolbackError::ImageBusy(name.to_string()));
        }
        if !image.snaps.is_empty() {
            return Err(VolbackError::StorageError(format!(
                "Image {name} has {} snapshots",
                image.snaps.len()
            )));
        }

        lookup_pool_mut(&mut pools, pool)?.images.remove(name);
        debug!("Removed image {}/{}", pool, name);
        Ok(())
    }

    async fn list(&self, pool: &str) -> Result<Vec<String>> {
        let pools = self.pools.read().await;
        Ok(lookup_pool(&pools, pool)?.images.keys().cloned().collect())
    }

    async fn object_exists(&self, pool: &str, name: &str) -> Result<bool> {
        let pools = self.pools.read().await;
        Ok(lookup_pool(&pools, pool)?.objects.contains_key(name))
    }

    async fn read_object(&self, pool: &str, name: &str) -> Result<Bytes> {
        let pools = self.pools.read().await;
        lookup_pool(&pools, pool)?
            .objects
            .get(name)
            .cloned()
            .ok_or_else(|| VolbackError::ObjectNotFound(name.to_string()))
    }

    async fn write_object(&self, pool: &str, name: &str, data: &[u8]) -> Result<()> {
        let mut pools = self.pools.write().await;
        lookup_pool_mut(&mut pools, pool)?
            .objects
            .insert(name.to_string(), Bytes::copy_from_slice(data));
        Ok(())
    }

    async fn remove_object(&self, pool: &str, name: &str) -> Result<()> {
        let mut pools = self.pools.write().await;
        lookup_pool_mut(&mut pools, pool)?
            .objects
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| VolbackError::ObjectNotFound(name.to_string()))
    }
}

pub struct MemoryImage {
    pools: Pools,
    pool: String,
    name: String,
    snapshot: Option<String>,
    read_only: bool,
}

impl MemoryImage {
    fn blocks<'a>(&self, pools: &'a HashMap<String, MemPool>) -> Result<&'a Blocks> {
        let image = lookup_image(pools, &self.pool, &self.name)?;
        match &self.snapshot {
            None => Ok(&image.head),
            Some(snap) => image
                .snaps
                .iter()
                .find(|(name, _)| name == snap)
                .map(|(_, blocks)| blocks)
                .ok_or_else(|| VolbackError::SnapshotNotFound {
                    image: self.name.clone(),
                    snapshot: snap.clone(),
                }),
        }
    }

    fn writable_image<'a>(&self, pools: &'a mut HashMap<String, MemPool>) -> Result<&'a mut MemImage> {
        if self.read_only {
            return Err(VolbackError::StorageError(format!(
                "Image {} is opened read-only",
                self.name
            )));
        }
        lookup_image_mut(pools, &self.pool, &self.name)
    }
}

#[async_trait]
impl Image for MemoryImage {
    fn name(&self) -> &str {
        &self.name
    }

    fn snapshot(&self) -> Option<&str> {
        self.snapshot.as_deref()
    }

    async fn size(&self) -> Result<u64> {
        let pools = self.pools.read().await;
        Ok(self.blocks(&pools)?.size)
    }

    async fn resize(&self, size: u64) -> Result<()> {
        let mut pools = self.pools.write().await;
        self.writable_image(&mut pools)?.head.resize(size);
        Ok(())
    }

    async fn read(&self, offset: u64, length: usize) -> Result<Bytes> {
        let pools = self.pools.read().await;
        Ok(self.blocks(&pools)?.read(offset, length))
    }

    async fn write(&self, data: &[u8], offset: u64) -> Result<()> {
        let mut pools = self.pools.write().await;
        self.writable_image(&mut pools)?.head.write(offset, data)
    }

    async fn discard(&self, offset: u64, length: u64) -> Result<()> {
        let mut pools = self.pools.write().await;
        self.writable_image(&mut pools)?.head.zero(offset, length);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let pools = self.pools.read().await;
        lookup_image(&pools, &self.pool, &self.name)?;
        Ok(())
    }

    async fn create_snap(&self, name: &str) -> Result<()> {
        let mut pools = self.pools.write().await;
        let image = self.writable_image(&mut pools)?;
        if image.snaps.iter().any(|(snap, _)| snap == name) {
            return Err(VolbackError::StorageError(format!(
                "Snapshot {name} already exists on image {}",
                self.name
            )));
        }
        let frozen = image.head.clone();
        image.snaps.push((name.to_string(), frozen));
        Ok(())
    }

    async fn remove_snap(&self, name: &str) -> Result<()> {
        let mut pools = self.pools.write().await;
        let image = self.writable_image(&mut pools)?;
        let position = image
            .snaps
            .iter()
            .position(|(snap, _)| snap == name)
            .ok_or_else(|| VolbackError::SnapshotNotFound {
                image: self.name.clone(),
                snapshot: name.to_string(),
            })?;
        image.snaps.remove(position);
        Ok(())
    }

    async fn list_snaps(&self) -> Result<Vec<SnapInfo>> {
        let pools = self.pools.read().await;
        let image = lookup_image(&pools, &self.pool, &self.name)?;
        Ok(image
            .snaps
            .iter()
            .map(|(name, blocks)| SnapInfo {
                name: name.clone(),
                size: blocks.size,
            })
            .collect())
    }

    async fn allocated_extents(&self) -> Result<Vec<Extent>> {
        let pools = self.pools.read().await;
        Ok(self.blocks(&pools)?.extents())
    }
}
