use crate::{
    cache::{CacheMode, ChunkKey, MemoryCache, RangeKey},
    errors::ImageError,
    fetch::Blob,
    image::ContentDigest,
    layer::{gunzip_member, TaskManager},
};
use bytes::{Bytes, BytesMut};
use std::{cmp::min, collections::BTreeSet, fmt, sync::Arc};

/// One compressed chunk of a regular file
#[derive(Debug, Clone)]
pub struct ChunkInfo {
    /// Offset of the chunk's gzip member within the layer blob
    pub offset: u64,
    /// Offset of the chunk's data within the file
    pub chunk_offset: u64,
    /// Length of the chunk's data, zero meaning the rest of the file
    pub chunk_size: u64,
    pub digest: String,
}

#[derive(Debug, Clone, Default)]
pub struct FileChunks {
    pub size: u64,
    pub chunks: Vec<ChunkInfo>,
}

impl ChunkInfo {
    pub fn data_len(&self, file_size: u64) -> u64 {
        if self.chunk_size > 0 {
            self.chunk_size
        } else {
            file_size.saturating_sub(self.chunk_offset)
        }
    }
}

/// Random access to the files of one eStargz layer
pub struct ChunkedLayer {
    digest: String,
    blob: Arc<dyn Blob>,
    toc_offset: u64,
    files: Vec<FileChunks>,
    chunk_ends: BTreeSet<u64>,
    verify: bool,
    blob_cache: MemoryCache<RangeKey>,
    read_cache: Arc<MemoryCache<ChunkKey>>,
    pub(crate) tasks: Arc<TaskManager>,
}

impl fmt::Debug for ChunkedLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkedLayer({}, {} files)", self.digest, self.files.len())
    }
}

/// A regular file backed by a [ChunkedLayer]
#[derive(Clone, Debug)]
pub struct ChunkedFile {
    layer: Arc<ChunkedLayer>,
    id: usize,
}

impl ChunkedFile {
    pub fn new(layer: Arc<ChunkedLayer>, id: usize) -> Self {
        ChunkedFile { layer, id }
    }

    /// Foreground read, which holds off background fetching while it runs
    pub async fn read_at(&self, offset: u64, len: usize) -> Result<Bytes, ImageError> {
        let _guard = self.layer.tasks.prioritized();
        self.layer
            .read_file(self.id, offset, len as u64, CacheMode::Shared)
            .await
    }
}

impl ChunkedLayer {
    /// `entry_offsets` holds the blob offset of every TOC entry with data;
    /// each chunk ends where the next one begins, or at the TOC
    pub fn new(
        digest: String,
        blob: Arc<dyn Blob>,
        toc_offset: u64,
        files: Vec<FileChunks>,
        entry_offsets: BTreeSet<u64>,
        verify: bool,
        read_cache: Arc<MemoryCache<ChunkKey>>,
        tasks: Arc<TaskManager>,
    ) -> Self {
        let mut chunk_ends: BTreeSet<u64> = entry_offsets
            .into_iter()
            .filter(|offset| *offset > 0 && *offset < toc_offset)
            .collect();
        chunk_ends.insert(toc_offset);
        ChunkedLayer {
            digest,
            blob,
            toc_offset,
            files,
            chunk_ends,
            verify,
            blob_cache: MemoryCache::new(),
            read_cache,
            tasks,
        }
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn is_verified(&self) -> bool {
        self.verify
    }

    pub fn blob_cache(&self) -> &MemoryCache<RangeKey> {
        &self.blob_cache
    }

    fn file(&self, id: usize) -> Result<&FileChunks, ImageError> {
        self.files
            .get(id)
            .ok_or_else(|| ImageError::InvalidToc(format!("no file with id {}", id)))
    }

    /// End of the compressed range that starts at `offset`
    pub fn chunk_end(&self, offset: u64) -> u64 {
        self.chunk_ends
            .range(offset + 1..)
            .next()
            .copied()
            .unwrap_or(self.toc_offset)
    }

    /// Every (file, chunk) pair, in TOC order
    pub fn chunk_refs(&self) -> Vec<(usize, usize)> {
        self.files
            .iter()
            .enumerate()
            .flat_map(|(file, chunks)| (0..chunks.chunks.len()).map(move |chunk| (file, chunk)))
            .collect()
    }

    async fn fetch_compressed(&self, offset: u64, len: u64) -> Result<Bytes, ImageError> {
        if let Some(hit) = self.blob_cache.get(&(offset, len)) {
            return Ok(hit);
        }
        let bytes = self.blob.read_range(offset, len).await?;
        self.blob_cache.insert((offset, len), bytes.clone());
        Ok(bytes)
    }

    async fn decode_chunk(
        &self,
        chunk: &ChunkInfo,
        file_size: u64,
        compressed: &[u8],
    ) -> Result<Bytes, ImageError> {
        let want = chunk.data_len(file_size) as usize;
        let data = gunzip_member(compressed).await?;
        if data.len() < want {
            return Err(ImageError::InvalidToc(format!(
                "chunk at offset {} holds {} bytes, expected {}",
                chunk.offset,
                data.len(),
                want
            )));
        }
        let data = data.slice(..want);
        if self.verify {
            let found = ContentDigest::from_content(&data);
            if found.as_str() != chunk.digest {
                return Err(ImageError::ChunkDigestMismatch {
                    offset: chunk.offset,
                    expected: chunk.digest.clone(),
                    found: found.to_string(),
                });
            }
        }
        Ok(data)
    }

    /// Decompressed contents of one chunk, through both caches
    pub async fn read_chunk(
        &self,
        file_id: usize,
        index: usize,
        mode: CacheMode,
    ) -> Result<Bytes, ImageError> {
        let file = self.file(file_id)?;
        let chunk = file
            .chunks
            .get(index)
            .ok_or_else(|| ImageError::InvalidToc(format!("no chunk {} in file {}", index, file_id)))?;
        let key = (self.digest.clone(), chunk.offset);
        if let Some(hit) = self.read_cache.get(&key) {
            return Ok(hit);
        }
        let end = self.chunk_end(chunk.offset);
        let compressed = self.fetch_compressed(chunk.offset, end - chunk.offset).await?;
        let data = self.decode_chunk(chunk, file.size, &compressed).await?;
        if mode == CacheMode::Shared {
            self.read_cache.insert(key, data.clone());
        }
        Ok(data)
    }

    /// Read up to `len` bytes of a file starting at `offset`
    pub async fn read_file(
        &self,
        file_id: usize,
        offset: u64,
        len: u64,
        mode: CacheMode,
    ) -> Result<Bytes, ImageError> {
        let file = self.file(file_id)?;
        let end = min(file.size, offset.saturating_add(len));
        if offset >= end {
            return Ok(Bytes::new());
        }
        let mut pieces = Vec::new();
        for (index, chunk) in file.chunks.iter().enumerate() {
            let chunk_begin = chunk.chunk_offset;
            let chunk_end = chunk_begin + chunk.data_len(file.size);
            if chunk_end <= offset || chunk_begin >= end {
                continue;
            }
            let data = self.read_chunk(file_id, index, mode).await?;
            let from = (offset.max(chunk_begin) - chunk_begin) as usize;
            let to = (end.min(chunk_end) - chunk_begin) as usize;
            pieces.push(data.slice(from..to));
        }
        let total: usize = pieces.iter().map(|piece| piece.len()).sum();
        if total as u64 != end - offset {
            return Err(ImageError::UnexpectedContentSize);
        }
        if pieces.len() == 1 {
            return Ok(pieces.remove(0));
        }
        let mut buf = BytesMut::with_capacity(total);
        for piece in pieces {
            buf.extend_from_slice(&piece);
        }
        Ok(buf.freeze())
    }

    /// Fetch `[0, landmark)` with one request and decode every chunk in it
    pub async fn prefetch(&self, landmark: u64) -> Result<usize, ImageError> {
        let raw = self.blob.read_range(0, landmark).await?;
        let mut decoded = 0;
        for file in &self.files {
            for chunk in &file.chunks {
                let end = self.chunk_end(chunk.offset);
                if chunk.offset >= landmark || end > landmark {
                    continue;
                }
                let compressed = raw.slice(chunk.offset as usize..end as usize);
                self.blob_cache
                    .insert((chunk.offset, end - chunk.offset), compressed.clone());
                let key = (self.digest.clone(), chunk.offset);
                if !self.read_cache.contains(&key) {
                    let data = self.decode_chunk(chunk, file.size, &compressed).await?;
                    self.read_cache.insert(key, data);
                    decoded += 1;
                }
            }
        }
        Ok(decoded)
    }
}
