//! Chunking of byte sources for transfer.
//!
//! A file is cut into `ceil(size / chunk_size)` chunks with contiguous,
//! non-overlapping byte ranges covering `[0, size)`. Only the last chunk may
//! be shorter than the chunk size. A [`ChunkPlan`] is computed from the
//! source length alone and can be iterated any number of times; chunk bytes
//! are read from the [`ByteSource`] only when a chunk is actually sent.

use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::{Error, Result};

/// Number of chunks needed to cover `file_size` bytes.
#[must_use]
pub const fn chunk_count(file_size: u64, chunk_size: u64) -> u64 {
    file_size.div_ceil(chunk_size)
}

/// One fixed-size slice of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position of the chunk within the file, starting at 0
    pub index: u64,
    /// First byte offset (inclusive)
    pub start: u64,
    /// Last byte offset (exclusive)
    pub end: u64,
    /// Name of the file this chunk belongs to
    pub file_name: String,
    /// Number of chunks in the file
    pub total_chunks: u64,
}

impl Chunk {
    /// Length of the chunk in bytes.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Whether the chunk covers no bytes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Byte range `[start, end)` of the chunk.
    #[must_use]
    pub const fn range(&self) -> Range<u64> {
        self.start..self.end
    }

    /// `Content-Range` header value for this chunk of a `file_size`-byte file.
    #[must_use]
    pub fn content_range(&self, file_size: u64) -> String {
        format!(
            "bytes {}-{}/{}",
            self.start,
            self.end.saturating_sub(1),
            file_size
        )
    }
}

/// Splits byte sources into chunks of a fixed size.
#[derive(Debug, Clone, Copy)]
pub struct ChunkSplitter {
    chunk_size: u64,
}

impl ChunkSplitter {
    /// Create a splitter. A zero chunk size is treated as one byte.
    #[must_use]
    pub fn new(chunk_size: u64) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// The chunk size in bytes.
    #[must_use]
    pub const fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Plan the chunks of a `file_size`-byte file called `file_name`.
    #[must_use]
    pub fn split(&self, file_name: &str, file_size: u64) -> ChunkPlan {
        ChunkPlan {
            file_name: file_name.to_string(),
            file_size,
            chunk_size: self.chunk_size,
            total_chunks: chunk_count(file_size, self.chunk_size),
        }
    }

    /// Plan the chunks of a byte source.
    #[must_use]
    pub fn split_source(&self, file_name: &str, source: &ByteSource) -> ChunkPlan {
        self.split(file_name, source.len())
    }
}

impl Default for ChunkSplitter {
    fn default() -> Self {
        Self::new(crate::DEFAULT_CHUNK_SIZE)
    }
}

/// The ordered chunk layout of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    file_name: String,
    file_size: u64,
    chunk_size: u64,
    total_chunks: u64,
}

impl ChunkPlan {
    /// Name of the planned file.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Size of the planned file in bytes.
    #[must_use]
    pub const fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Number of chunks in the plan.
    #[must_use]
    pub const fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    /// Chunk at `index`, if it exists.
    #[must_use]
    pub fn chunk(&self, index: u64) -> Option<Chunk> {
        if index >= self.total_chunks {
            return None;
        }
        let start = index * self.chunk_size;
        let end = (start + self.chunk_size).min(self.file_size);
        Some(Chunk {
            index,
            start,
            end,
            file_name: self.file_name.clone(),
            total_chunks: self.total_chunks,
        })
    }

    /// Iterate the chunks in index order. Each call starts from chunk 0.
    #[must_use]
    pub const fn iter(&self) -> Chunks<'_> {
        Chunks {
            plan: self,
            next: 0,
        }
    }
}

impl<'a> IntoIterator for &'a ChunkPlan {
    type Item = Chunk;
    type IntoIter = Chunks<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy iterator over the chunks of a [`ChunkPlan`].
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    plan: &'a ChunkPlan,
    next: u64,
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let chunk = self.plan.chunk(self.next)?;
        self.next += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.plan.total_chunks.saturating_sub(self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Chunks<'_> {}

/// Where chunk bytes are read from.
#[derive(Debug, Clone)]
pub enum ByteSource {
    /// A file on local disk
    File {
        /// Path to the file
        path: PathBuf,
        /// File size when the source was opened
        len: u64,
    },
    /// Bytes already in memory
    Memory(Arc<[u8]>),
}

impl ByteSource {
    /// Open a local file as a byte source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceUnavailable`] if the path cannot be read or is
    /// not a regular file.
    pub async fn open(path: &Path) -> Result<Self> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| source_unavailable(path, &e))?;

        if !metadata.is_file() {
            return Err(Error::SourceUnavailable {
                path: path.to_path_buf(),
                reason: "not a regular file".to_string(),
            });
        }

        Ok(Self::File {
            path: path.to_path_buf(),
            len: metadata.len(),
        })
    }

    /// Wrap an in-memory buffer.
    #[must_use]
    pub fn from_bytes(data: impl Into<Arc<[u8]>>) -> Self {
        Self::Memory(data.into())
    }

    /// Total length of the source in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        match self {
            Self::File { len, .. } => *len,
            Self::Memory(data) => data.len() as u64,
        }
    }

    /// Whether the source holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the bytes of one chunk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceUnavailable`] if the file can no longer be read
    /// or has shrunk below the chunk's range.
    pub async fn read_chunk(&self, chunk: &Chunk) -> Result<Vec<u8>> {
        match self {
            Self::File { path, .. } => {
                let mut file = tokio::fs::File::open(path)
                    .await
                    .map_err(|e| source_unavailable(path, &e))?;
                file.seek(SeekFrom::Start(chunk.start))
                    .await
                    .map_err(|e| source_unavailable(path, &e))?;

                let mut buffer = vec![0u8; chunk.len() as usize];
                file.read_exact(&mut buffer)
                    .await
                    .map_err(|e| source_unavailable(path, &e))?;
                Ok(buffer)
            }
            Self::Memory(data) => data
                .get(chunk.start as usize..chunk.end as usize)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| Error::SourceUnavailable {
                    path: PathBuf::from(&chunk.file_name),
                    reason: format!("range {:?} outside buffer", chunk.range()),
                }),
        }
    }
}

fn source_unavailable(path: &Path, e: &std::io::Error) -> Error {
    Error::SourceUnavailable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}
