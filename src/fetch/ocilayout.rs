use crate::{
    errors::ImageError,
    fetch::{
        http::{get_bytes, HttpBlob, HttpTransport},
        resolve_from, Blob, BlobSource, ResolvedImage,
    },
    image::ContentDigest,
    manifest::{Descriptor, Platform},
};
use async_trait::async_trait;
use http::header::HeaderMap;
use std::sync::Arc;
use url::Url;

/// An OCI image layout directory published at an HTTP address
///
/// The top level `index.json` is fetched once per resolve, and blobs are read
/// from `blobs/<algorithm>/<hex>` with range requests.
pub struct OciLayoutFetcher {
    base: String,
    transport: Arc<dyn HttpTransport>,
}

impl OciLayoutFetcher {
    pub fn new(address: &str, transport: Arc<dyn HttpTransport>) -> Result<Self, ImageError> {
        let parsed = Url::parse(address)?;
        Ok(OciLayoutFetcher {
            base: parsed.as_str().trim_end_matches('/').to_owned(),
            transport,
        })
    }

    pub fn index_url(&self) -> String {
        format!("{}/index.json", self.base)
    }

    pub fn blob_url(&self, digest: &str) -> Result<String, ImageError> {
        let digest = ContentDigest::parse(digest)?;
        Ok(format!(
            "{}/blobs/{}/{}",
            self.base,
            digest.format_str(),
            digest.hex_str()
        ))
    }
}

#[async_trait]
impl BlobSource for OciLayoutFetcher {
    async fn resolve(&self, platform: &Platform) -> Result<ResolvedImage, ImageError> {
        let url = self.index_url();
        log::info!("fetching layout index {}", url);
        let index = get_bytes(self.transport.as_ref(), &url, &HeaderMap::new()).await?;
        resolve_from(self, index, platform).await
    }

    async fn open_blob(&self, desc: &Descriptor) -> Result<Arc<dyn Blob>, ImageError> {
        Ok(Arc::new(HttpBlob::new(
            self.transport.clone(),
            self.blob_url(&desc.digest)?,
            desc.size,
        )))
    }
}
