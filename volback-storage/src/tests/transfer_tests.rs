use crate::{BlockStore, ChunkedTransfer, CreateOptions, MemoryBlockStore, RbdVolumeIo, VolumeIo};
use async_trait::async_trait;
use bytes::Bytes;
use volback_core::Result;

/// In-memory stream that reports end of data after `available` bytes.
struct BufferIo {
    data: Vec<u8>,
    available: usize,
    offset: u64,
    flushes: usize,
}

impl BufferIo {
    fn new(data: Vec<u8>) -> Self {
        let available = data.len();
        Self {
            data,
            available,
            offset: 0,
            flushes: 0,
        }
    }

    fn truncated(data: Vec<u8>, available: usize) -> Self {
        Self {
            available,
            ..Self::new(data)
        }
    }
}

#[async_trait]
impl VolumeIo for BufferIo {
    async fn read(&mut self, length: usize) -> Result<Bytes> {
        let start = (self.offset as usize).min(self.available);
        let end = (start + length).min(self.available);
        self.offset = end as u64;
        Ok(Bytes::copy_from_slice(&self.data[start..end]))
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let start = self.offset as usize;
        self.data[start..start + data.len()].copy_from_slice(data);
        self.offset += data.len() as u64;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.flushes += 1;
        Ok(())
    }

    async fn seek(&mut self, offset: u64) -> Result<()> {
        self.offset = offset;
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.offset
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 + 1).collect()
}

#[tokio::test]
async fn test_transfer_copies_exact_length() -> Result<()> {
    let source = pattern(10_000);
    let mut src = BufferIo::new(source.clone());
    let mut dest = BufferIo::new(vec![0u8; 12_000]);

    ChunkedTransfer::new(4096, true)
        .transfer(&mut src, "src", &mut dest, "dest", 10_000)
        .await?;

    assert_eq!(&dest.data[..10_000], &source[..]);
    assert!(dest.data[10_000..].iter().all(|&b| b == 0));
    // Two full chunks and the remainder, each flushed.
    assert_eq!(dest.flushes, 3);
    assert_eq!(dest.tell(), 10_000);
    Ok(())
}

#[tokio::test]
async fn test_short_source_zero_fills_rest() -> Result<()> {
    let source = pattern(10_000);
    let mut src = BufferIo::truncated(source.clone(), 5_000);
    let mut dest = BufferIo::new(vec![0xffu8; 10_000]);

    ChunkedTransfer::new(4096, true)
        .transfer(&mut src, "src", &mut dest, "dest", 10_000)
        .await?;

    assert_eq!(&dest.data[..5_000], &source[..5_000]);
    assert!(dest.data[5_000..].iter().all(|&b| b == 0));
    Ok(())
}

#[tokio::test]
async fn test_short_source_without_discard_leaves_rest() -> Result<()> {
    let source = pattern(10_000);
    let mut src = BufferIo::truncated(source.clone(), 5_000);
    let mut dest = BufferIo::new(vec![0xffu8; 10_000]);

    ChunkedTransfer::new(4096, false)
        .transfer(&mut src, "src", &mut dest, "dest", 10_000)
        .await?;

    assert_eq!(&dest.data[..5_000], &source[..5_000]);
    assert!(dest.data[5_000..].iter().all(|&b| b == 0xff));
    Ok(())
}

#[tokio::test]
async fn test_transfer_into_store_image_discards_tail() -> Result<()> {
    let store = MemoryBlockStore::with_pools(&["rbd"]).await;
    store
        .create("rbd", "dest", 1024 * 1024, &CreateOptions::default())
        .await?;
    let image = store.open("rbd", "dest", None, false).await?;
    image.write(&[3u8; 4096], 512 * 1024).await?;

    let mut dest = RbdVolumeIo::new(image, "rbd", "admin", None);
    let mut src = BufferIo::truncated(pattern(1024 * 1024), 64 * 1024);

    ChunkedTransfer::new(64 * 1024, true)
        .transfer(&mut src, "src", &mut dest, "dest", 1024 * 1024)
        .await?;

    let extents = dest.image().allocated_extents().await?;
    assert_eq!(extents.len(), 1);
    assert_eq!(extents[0].offset, 0);
    assert_eq!(extents[0].length, 64 * 1024);
    Ok(())
}

#[tokio::test]
async fn test_discard_zero_fills_plain_volume() -> Result<()> {
    let mut volume = BufferIo::new(vec![0xaau8; 9_000]);

    ChunkedTransfer::new(2048, true)
        .discard(&mut volume, 1_000, 7_000)
        .await?;

    assert!(volume.data[..1_000].iter().all(|&b| b == 0xaa));
    assert!(volume.data[1_000..8_000].iter().all(|&b| b == 0));
    assert!(volume.data[8_000..].iter().all(|&b| b == 0xaa));
    Ok(())
}
