//! Size-bounded batching for the wire.
//!
//! Pure batching policy: the chunker has no ordering or correctness role,
//! it only bounds how much ends up in one outbound message.

use crate::record::Record;
use crate::types::MessageRef;

/// Default maximum number of items per batch.
pub const DEFAULT_ITEMS_LIMIT: usize = 5000;

/// Default maximum number of bytes per batch.
pub const DEFAULT_BYTES_LIMIT: usize = 500 * 1024;

/// Chunking limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    pub items_limit: usize,
    pub bytes_limit: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            items_limit: DEFAULT_ITEMS_LIMIT,
            bytes_limit: DEFAULT_BYTES_LIMIT,
        }
    }
}

/// Something with an approximate encoded size.
pub trait ChunkItem {
    fn byte_size(&self) -> usize;
}

impl ChunkItem for Record {
    fn byte_size(&self) -> usize {
        Record::byte_size(self)
    }
}

impl ChunkItem for MessageRef {
    fn byte_size(&self) -> usize {
        std::mem::size_of::<i64>() + std::mem::size_of::<u32>()
    }
}

/// Receives `(batch, is_final)`.
pub type ChunkCallback<T> = Box<dyn FnMut(Vec<T>, bool) + Send>;

/// Buffers items and hands them to a callback in bounded batches.
///
/// [`Chunker::finish`] always produces one last call with `is_final = true`,
/// even when nothing was buffered.
pub struct Chunker<T: ChunkItem> {
    callback: ChunkCallback<T>,
    config: ChunkerConfig,
    buffer: Vec<T>,
    buffered_bytes: usize,
}

impl<T: ChunkItem> Chunker<T> {
    pub fn new(callback: ChunkCallback<T>, config: ChunkerConfig) -> Self {
        Self {
            callback,
            config,
            buffer: Vec::new(),
            buffered_bytes: 0,
        }
    }

    /// Buffer one item, flushing a non-final batch if a limit is reached.
    pub fn push(&mut self, item: T) {
        self.buffered_bytes += item.byte_size();
        self.buffer.push(item);

        if self.buffer.len() >= self.config.items_limit
            || self.buffered_bytes >= self.config.bytes_limit
        {
            self.flush(false);
        }
    }

    /// Flush whatever is left as the final batch.
    pub fn finish(mut self) {
        self.flush(true);
    }

    /// Items currently buffered.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn flush(&mut self, is_final: bool) {
        let batch = std::mem::take(&mut self.buffer);
        self.buffered_bytes = 0;
        (self.callback)(batch, is_final);
    }
}
