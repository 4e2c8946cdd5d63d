//! Splits a byte source into fixed-size transfer parts.

use bytes::{Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Default multipart transfer part size (8 MiB).
pub const DEFAULT_PART_SIZE: u64 = 8 * 1024 * 1024;

/// Smallest part size the service accepts (1 MiB).
pub const MIN_PART_SIZE: u64 = 1024 * 1024;

/// Largest part size the service accepts (4 GiB).
pub const MAX_PART_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// One transfer part and where it sits in the source.
#[derive(Debug, Clone)]
pub struct Part {
    /// 1-based, in file order.
    pub number: u32,
    pub offset: u64,
    pub data: Bytes,
}

/// Forward-only reader yielding parts of exactly `part_size` bytes, except
/// possibly the last one. Never yields an empty part.
pub struct ChunkReader<R> {
    source: R,
    part_size: usize,
    offset: u64,
    next_number: u32,
    done: bool,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    pub fn new(source: R, part_size: u64) -> Self {
        Self {
            source,
            part_size: part_size as usize,
            offset: 0,
            next_number: 1,
            done: part_size == 0,
        }
    }

    pub async fn next_part(&mut self) -> io::Result<Option<Part>> {
        if self.done {
            return Ok(None);
        }

        let mut buf = BytesMut::zeroed(self.part_size);
        let mut filled = 0;
        // A single read may return less than asked; keep going until the
        // part is full or the source is exhausted.
        while filled < self.part_size {
            let n = self.source.read(&mut buf[filled..]).await?;
            if n == 0 {
                self.done = true;
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);

        let part = Part {
            number: self.next_number,
            offset: self.offset,
            data: buf.freeze(),
        };
        self.next_number += 1;
        self.offset += filled as u64;
        Ok(Some(part))
    }
}
