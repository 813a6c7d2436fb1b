use crate::{
    errors::ImageError,
    fetch::{check_range, resolve_from, Blob, BlobSource, ResolvedImage},
    image::ContentDigest,
    manifest::{Descriptor, Platform},
};
use async_trait::async_trait;
use bytes::Bytes;
use std::{collections::HashMap, sync::Arc};

/// A blob held entirely in memory
#[derive(Clone, Debug)]
pub struct MemoryBlob(pub Bytes);

#[async_trait]
impl Blob for MemoryBlob {
    fn size(&self) -> u64 {
        self.0.len() as u64
    }

    async fn read_range(&self, offset: u64, len: u64) -> Result<Bytes, ImageError> {
        check_range(self.size(), offset, len)?;
        Ok(self.0.slice(offset as usize..(offset + len) as usize))
    }
}

/// Content-addressed blobs plus a top level manifest or index, all in memory
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    top: Bytes,
    blobs: HashMap<String, Bytes>,
}

impl MemorySource {
    pub fn new() -> Self {
        Default::default()
    }

    /// Store a blob, returning a descriptor for it
    pub fn insert_blob(&mut self, media_type: &str, content: Bytes) -> Descriptor {
        let digest = ContentDigest::from_content(&content).to_string();
        let desc = Descriptor {
            media_type: media_type.to_owned(),
            digest: digest.clone(),
            size: content.len() as u64,
            ..Default::default()
        };
        self.blobs.insert(digest, content);
        desc
    }

    /// Store a blob under a digest given by the caller, without checking it
    pub fn insert_blob_as(&mut self, digest: &str, content: Bytes) {
        self.blobs.insert(digest.to_owned(), content);
    }

    /// Set the manifest or index that resolution starts from
    pub fn set_top(&mut self, top: Bytes) {
        self.top = top;
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }
}

#[async_trait]
impl BlobSource for MemorySource {
    async fn resolve(&self, platform: &Platform) -> Result<ResolvedImage, ImageError> {
        resolve_from(self, self.top.clone(), platform).await
    }

    async fn open_blob(&self, desc: &Descriptor) -> Result<Arc<dyn Blob>, ImageError> {
        match self.blobs.get(&desc.digest) {
            Some(content) => Ok(Arc::new(MemoryBlob(content.clone()))),
            None => Err(ImageError::BlobNotFound(desc.digest.clone())),
        }
    }
}
