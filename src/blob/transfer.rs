//! Upload planning
//!
//! Decides between a single-request upload and a block upload, and cuts the
//! payload into numbered blocks without holding more than one block at a time.

use crate::blob::models::{PayloadReader, TransferOptions};
use crate::error::Result;
use std::io::Cursor;
use tokio::io::AsyncReadExt;

/// How a payload goes up
pub enum UploadPlan {
    /// The whole payload, small enough for one request
    Single(Vec<u8>),
    /// Blocks staged one by one, then committed in order
    Blocks(BlockReader),
}

/// Read just past the single-upload threshold to pick a plan.
///
/// Bytes consumed while deciding are replayed ahead of the rest of the stream.
pub async fn plan_upload(mut reader: PayloadReader, options: &TransferOptions) -> Result<UploadPlan> {
    let mut head = Vec::new();
    (&mut reader)
        .take(options.single_upload_threshold.saturating_add(1))
        .read_to_end(&mut head)
        .await?;

    if head.len() as u64 <= options.single_upload_threshold {
        return Ok(UploadPlan::Single(head));
    }

    let source: PayloadReader = Box::new(Cursor::new(head).chain(reader));
    Ok(UploadPlan::Blocks(BlockReader::new(source, options.block_size)))
}

/// Block id for the block at `index`.
///
/// Ids are fixed width so every id in a blob has the same length.
pub fn block_id(index: usize) -> String {
    format!("{index:08}")
}

/// Yields `(block id, bytes)` pairs of at most `block_size` bytes
pub struct BlockReader {
    source: PayloadReader,
    block_size: usize,
    next_index: usize,
}

impl BlockReader {
    pub fn new(source: PayloadReader, block_size: usize) -> Self {
        Self {
            source,
            block_size: block_size.max(1),
            next_index: 0,
        }
    }

    /// Next block, or `None` once the source is drained
    pub async fn next_block(&mut self) -> Result<Option<(String, Vec<u8>)>> {
        let mut block = Vec::with_capacity(self.block_size);
        (&mut self.source)
            .take(self.block_size as u64)
            .read_to_end(&mut block)
            .await?;

        if block.is_empty() {
            return Ok(None);
        }

        let id = block_id(self.next_index);
        self.next_index += 1;
        Ok(Some((id, block)))
    }

    /// Number of blocks handed out so far
    pub fn blocks_read(&self) -> usize {
        self.next_index
    }
}
