//! SHA-256 tree hash over 1 MiB segments.
//!
//! Each segment is hashed on its own, then adjacent digests are paired and
//! hashed together level by level until one digest remains. An odd digest
//! at the end of a level moves up unchanged. The service recomputes the
//! same value from the bytes it receives, so it doubles as the archive's
//! integrity checksum.

use sha2::{Digest, Sha256};
use std::{fmt, io, path::Path};
use tokio::{fs::File, io::AsyncReadExt};

/// Hash segment size. Independent of the transfer part size.
pub const SEGMENT_SIZE: usize = 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TreeHash([u8; 32]);

impl TreeHash {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for TreeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Incremental tree hasher. Input may be fed at any boundary.
#[derive(Clone, Default)]
pub struct TreeHasher {
    current: Sha256,
    filled: usize,
    segments: Vec<[u8; 32]>,
    total: u64,
}

impl TreeHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, mut data: &[u8]) {
        self.total += data.len() as u64;
        while !data.is_empty() {
            let take = (SEGMENT_SIZE - self.filled).min(data.len());
            self.current.update(&data[..take]);
            self.filled += take;
            data = &data[take..];
            if self.filled == SEGMENT_SIZE {
                let digest = self.current.finalize_reset();
                self.segments.push(to_array(&digest));
                self.filled = 0;
            }
        }
    }

    /// Bytes fed so far.
    pub fn len(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn finish(self) -> TreeHash {
        let mut segments = self.segments;
        // Empty input still yields one (empty) segment.
        if self.filled > 0 || segments.is_empty() {
            segments.push(to_array(&self.current.finalize()));
        }
        TreeHash(combine(segments))
    }
}

fn to_array(digest: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(digest);
    out
}

fn combine(mut level: Vec<[u8; 32]>) -> [u8; 32] {
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => {
                    let mut hasher = Sha256::new();
                    hasher.update(left);
                    hasher.update(right);
                    to_array(&hasher.finalize())
                }
                [odd] => *odd,
                _ => unreachable!("chunks(2) yields one or two digests"),
            })
            .collect();
    }
    level[0]
}

/// Tree hash of an in-memory buffer.
pub fn tree_hash(data: &[u8]) -> TreeHash {
    let mut hasher = TreeHasher::new();
    hasher.update(data);
    hasher.finish()
}

/// Tree hash of a whole file in one sequential pass. Returns the digest
/// and the number of bytes read.
pub async fn tree_hash_file(path: &Path) -> io::Result<(TreeHash, u64)> {
    let mut file = File::open(path).await?;
    let mut hasher = TreeHasher::new();
    let mut buf = vec![0u8; SEGMENT_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let len = hasher.len();
    Ok((hasher.finish(), len))
}
