//! Sources of image manifests, configs, and layer blobs
//!
//! Every source resolves a platform-specific manifest and opens layer blobs
//! for random access. Remote blobs are read with HTTP range requests, so a
//! chunked layer only transfers the parts that are actually used.


pub mod auth;
pub mod bridge;
pub mod http;
pub mod local;
pub mod memory;
pub mod ocilayout;
pub mod registry;

use crate::{
    errors::ImageError,
    image::ContentDigest,
    manifest::{Descriptor, ImageConfigFile, Manifest, ManifestKind, Platform},
};
use async_trait::async_trait;
use bytes::Bytes;
use std::{path::Path, sync::Arc};

/// Nested indexes deeper than this are refused
const MAX_INDEX_DEPTH: usize = 4;

/// Random access to one immutable blob
#[async_trait]
pub trait Blob: Send + Sync {
    fn size(&self) -> u64;

    /// Read exactly `len` bytes at `offset`
    async fn read_range(&self, offset: u64, len: u64) -> Result<Bytes, ImageError>;

    async fn read_all(&self) -> Result<Bytes, ImageError> {
        self.read_range(0, self.size()).await
    }
}

/// Manifest, parsed config, and the raw config bytes of one image
#[derive(Clone, Debug)]
pub struct ResolvedImage {
    pub manifest: Manifest,
    pub config: ImageConfigFile,
    pub config_bytes: Bytes,
}

#[async_trait]
pub trait BlobSource: Send + Sync {
    /// Find the image manifest for a platform, and load its config
    async fn resolve(&self, platform: &Platform) -> Result<ResolvedImage, ImageError>;

    async fn open_blob(&self, desc: &Descriptor) -> Result<Arc<dyn Blob>, ImageError>;

    /// Load a manifest referenced by an index
    async fn fetch_manifest(&self, desc: &Descriptor) -> Result<Bytes, ImageError> {
        self.open_blob(desc).await?.read_all().await
    }
}

/// Check that a byte range lies within a blob of the given size
pub fn check_range(size: u64, offset: u64, len: u64) -> Result<(), ImageError> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(ImageError::UnexpectedContentSize),
    }
}

/// Check content against the digest in its descriptor
pub fn verify_content(desc: &Descriptor, content: &[u8]) -> Result<(), ImageError> {
    if content.len() as u64 != desc.size {
        return Err(ImageError::UnexpectedContentSize);
    }
    ContentDigest::parse(&desc.digest)?.verify(content)
}

/// Follow indexes down to an image manifest, then load its config
pub async fn resolve_from<S: BlobSource + ?Sized>(
    source: &S,
    top: Bytes,
    platform: &Platform,
) -> Result<ResolvedImage, ImageError> {
    let mut bytes = top;
    for _ in 0..MAX_INDEX_DEPTH {
        match ManifestKind::parse(&bytes)? {
            ManifestKind::Image(manifest) => {
                let config_bytes = source.open_blob(&manifest.config).await?.read_all().await?;
                verify_content(&manifest.config, &config_bytes)?;
                log::trace!(
                    "raw json runtime config, {}",
                    String::from_utf8_lossy(&config_bytes)
                );
                let config = serde_json::from_slice(&config_bytes)?;
                return Ok(ResolvedImage {
                    manifest,
                    config,
                    config_bytes,
                });
            }
            ManifestKind::Index(index) => {
                let desc = index.select(platform)?.clone();
                log::debug!("index selected {} for {}", desc.digest, platform);
                bytes = source.fetch_manifest(&desc).await?;
                verify_content(&desc, &bytes)?;
            }
        }
    }
    Err(ImageError::UnsupportedManifestType(
        "deeply nested index".to_owned(),
    ))
}

/// Pick a source for an image address
///
/// `http://` and `https://` addresses name an OCI layout served over HTTP,
/// existing local paths are an OCI layout or `docker save` output, and
/// anything else is a registry reference.
pub async fn open_source(
    address: &str,
    transport: Arc<dyn self::http::HttpTransport>,
) -> Result<Arc<dyn BlobSource>, ImageError> {
    if address.starts_with("http://") || address.starts_with("https://") {
        log::info!("{} is an OCI layout over HTTP", address);
        Ok(Arc::new(ocilayout::OciLayoutFetcher::new(address, transport)?))
    } else if Path::new(address).exists() {
        log::info!("{} is a local image", address);
        Ok(Arc::new(local::LocalFetcher::open(Path::new(address)).await?))
    } else {
        log::info!("{} is a registry reference", address);
        Ok(Arc::new(
            registry::RegistryFetcher::builder()
                .transport(transport)
                .build(address)?,
        ))
    }
}
