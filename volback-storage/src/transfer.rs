use crate::io::VolumeIo;
use std::time::Instant;
use tracing::{debug, info};
use volback_core::{BackupConfig, Result};

/// Largest range handed to a single block-store discard call.
pub const MAX_DISCARD_LENGTH: u64 = 2 * 1024 * 1024 * 1024 - 1;

/// Copies volumes chunk by chunk, flushing the destination after every chunk and
/// yielding to the scheduler in between so concurrent transfers make progress.
#[derive(Debug, Clone, Copy)]
pub struct ChunkedTransfer {
    chunk_size: usize,
    discard_excess: bool,
}

impl ChunkedTransfer {
    pub fn new(chunk_size: usize, discard_excess: bool) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            discard_excess,
        }
    }

    pub fn from_config(config: &BackupConfig) -> Self {
        Self::new(config.chunk_size(), config.discard_excess_on_restore)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Moves `length` bytes from `src` to `dest`. A source that ends early leaves the
    /// rest of the destination range discarded (when enabled) or untouched.
    pub async fn transfer(
        &self,
        src: &mut dyn VolumeIo,
        src_name: &str,
        dest: &mut dyn VolumeIo,
        dest_name: &str,
        length: u64,
    ) -> Result<()> {
        let chunk_size = self.chunk_size as u64;
        let chunks = length / chunk_size;
        let remainder = length % chunk_size;
        let end = dest.tell() + length;
        let started = Instant::now();

        debug!(
            "Transferring data between '{}' and '{}' ({} chunks of {} bytes, remainder {})",
            src_name, dest_name, chunks, chunk_size, remainder
        );

        for chunk in 0..chunks {
            let before = Instant::now();
            if !self.copy_piece(src, dest, self.chunk_size, end).await? {
                debug!(
                    "Source '{}' ended after {} of {} chunks",
                    src_name, chunk, chunks
                );
                return Ok(());
            }

            let elapsed = before.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                debug!(
                    "Transferred chunk {} of {} ({:.0}KB/s)",
                    chunk + 1,
                    chunks,
                    chunk_size as f64 / elapsed / 1024.0
                );
            }
            tokio::task::yield_now().await;
        }

        if remainder > 0 {
            debug!("Transferring remaining {} bytes", remainder);
            if self.copy_piece(src, dest, remainder as usize, end).await? {
                tokio::task::yield_now().await;
            }
        }

        info!(
            "Transfer from '{}' to '{}' of {} bytes completed in {:.4}s",
            src_name,
            dest_name,
            length,
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// Copies one piece; returns `false` when the source ran short.
    async fn copy_piece(
        &self,
        src: &mut dyn VolumeIo,
        dest: &mut dyn VolumeIo,
        size: usize,
        end: u64,
    ) -> Result<bool> {
        let data = src.read(size).await?;
        if !data.is_empty() {
            dest.write(&data).await?;
            dest.flush().await?;
        }
        if data.len() == size {
            return Ok(true);
        }

        if self.discard_excess {
            let offset = dest.tell();
            self.discard(dest, offset, end.saturating_sub(offset)).await?;
        }
        Ok(false)
    }

    /// Trims a range on block-store volumes, zero-fills it on anything else.
    pub async fn discard(
        &self,
        volume: &mut dyn VolumeIo,
        offset: u64,
        length: u64,
    ) -> Result<()> {
        if length == 0 {
            return Ok(());
        }
        debug!("Discarding {} bytes at offset {}", length, offset);

        if let Some(rbd) = volume.as_rbd() {
            let mut offset = offset;
            let mut remaining = length;
            while remaining > 0 {
                let piece = remaining.min(MAX_DISCARD_LENGTH);
                tokio::task::yield_now().await;
                rbd.image().discard(offset, piece).await?;
                offset += piece;
                remaining -= piece;
            }
            return Ok(());
        }

        let zero_len = self
            .chunk_size
            .min(usize::try_from(length).unwrap_or(usize::MAX));
        let zeroes = vec![0u8; zero_len];
        volume.seek(offset).await?;
        let mut remaining = length;
        while remaining > 0 {
            let piece = remaining.min(zeroes.len() as u64) as usize;
            volume.write(&zeroes[..piece]).await?;
            volume.flush().await?;
            remaining -= piece as u64;
            tokio::task::yield_now().await;
        }
        Ok(())
    }
}
