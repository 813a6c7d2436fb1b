//! Decoding image layers into node trees
//!
//! A layer is tried as an eStargz chunked layer first, whose files stay
//! remote and are fetched chunk by chunk on demand. Failing that, the whole
//! blob is downloaded and decoded as a gzip-compressed tar, then as a plain
//! tar. Verification failures never fall through to a weaker decoder.


pub mod stargz;
pub mod tar;

pub use stargz::task::{BackgroundJobs, TaskManager};

use crate::{
    cache::{ChunkKey, MemoryCache},
    errors::ImageError,
    fetch::{Blob, BlobSource},
    filesystem::merge::LayerTree,
    manifest::Descriptor,
};
use async_compression::tokio::bufread::GzipDecoder;
use bytes::Bytes;
use futures_util::{stream::FuturesUnordered, StreamExt};
use std::{sync::Arc, time::Duration};
use tokio::io::AsyncReadExt;

/// Settings that apply to every layer of an image
#[derive(Clone, Debug)]
pub struct LayerOptions {
    pub skip_verify: bool,
    pub max_concurrency: usize,
    pub prefetch_timeout: Duration,
    pub no_prefetch: bool,
    pub background_fetch: bool,
    pub background_timeout: Duration,
    pub silence_period: Duration,
}

impl Default for LayerOptions {
    fn default() -> Self {
        LayerOptions {
            skip_verify: false,
            max_concurrency: 2,
            prefetch_timeout: Duration::from_secs(10),
            no_prefetch: false,
            background_fetch: false,
            background_timeout: Duration::from_secs(120),
            silence_period: Duration::from_secs(5),
        }
    }
}

impl LayerOptions {
    pub fn new() -> Self {
        Default::default()
    }

    /// Serve chunked layers without checking digests from the table of
    /// contents, even when the layer carries a digest annotation
    pub fn skip_verify(mut self, skip: bool) -> Self {
        self.skip_verify = skip;
        self
    }

    /// Number of background chunk reads allowed at once
    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// How long layer decoding waits for the prefetched region
    ///
    /// On timeout the layer is used anyway, and reads fetch what they need.
    pub fn prefetch_timeout(mut self, timeout: Duration) -> Self {
        self.prefetch_timeout = timeout;
        self
    }

    /// Ignore prefetch landmarks
    pub fn no_prefetch(mut self, disable: bool) -> Self {
        self.no_prefetch = disable;
        self
    }

    /// Fill the blob cache with every chunk while the client is idle
    pub fn background_fetch(mut self, enable: bool) -> Self {
        self.background_fetch = enable;
        self
    }

    /// Limit for each background chunk read
    pub fn background_timeout(mut self, timeout: Duration) -> Self {
        self.background_timeout = timeout;
        self
    }

    /// Quiet time after the last foreground read before background work
    /// resumes
    pub fn silence_period(mut self, period: Duration) -> Self {
        self.silence_period = period;
        self
    }
}

/// State shared by the decoders of all layers in one image
#[derive(Clone)]
pub struct DecodeContext {
    pub options: LayerOptions,
    pub tasks: Arc<TaskManager>,
    pub read_cache: Arc<MemoryCache<ChunkKey>>,
}

impl DecodeContext {
    pub fn new(options: LayerOptions) -> Self {
        let tasks = Arc::new(TaskManager::new(
            options.max_concurrency,
            options.silence_period,
        ));
        DecodeContext {
            options,
            tasks,
            read_cache: Arc::new(MemoryCache::new()),
        }
    }
}

/// Decode one layer, trying each format in turn
pub async fn decode_layer(
    ctx: &DecodeContext,
    desc: &Descriptor,
    blob: Arc<dyn Blob>,
) -> Result<LayerTree, ImageError> {
    match stargz::decode(ctx, desc, blob.clone()).await {
        Ok(tree) => {
            log::info!("layer {} is a chunked layer", desc.digest);
            return Ok(tree);
        }
        Err(err) if err.is_verification() => return Err(err),
        Err(err) => log::info!("layer {} is not a chunked layer, {}", desc.digest, err),
    }

    log::info!("layer {} downloading {} bytes ...", desc.digest, blob.size());
    let bytes = blob.read_all().await?;

    let gzip_result = match gunzip(&bytes).await {
        Ok(tar_bytes) => self::tar::decode(tar_bytes),
        Err(err) => Err(err),
    };
    match gzip_result {
        Ok(tree) => return Ok(tree),
        Err(err) if err.is_verification() => return Err(err),
        Err(err) => log::info!("layer {} is not a gzip tar, {}", desc.digest, err),
    }

    match self::tar::decode(bytes) {
        Ok(tree) => Ok(tree),
        Err(err) => {
            log::info!("layer {} is not a tar either, {}", desc.digest, err);
            Err(err)
        }
    }
}

/// Decompress every gzip member in the input
pub async fn gunzip(compressed: &[u8]) -> Result<Bytes, ImageError> {
    let mut decoder = GzipDecoder::new(compressed);
    decoder.multiple_members(true);
    let mut output = Vec::new();
    decoder
        .read_to_end(&mut output)
        .await
        .map_err(ImageError::Gzip)?;
    Ok(output.into())
}

/// Decompress only the first gzip member in the input
pub async fn gunzip_member(compressed: &[u8]) -> Result<Bytes, ImageError> {
    let mut decoder = GzipDecoder::new(compressed);
    let mut output = Vec::new();
    decoder
        .read_to_end(&mut output)
        .await
        .map_err(ImageError::Gzip)?;
    Ok(output.into())
}

/// Decode all layers of a manifest concurrently, keeping manifest order
///
/// The first failure aborts the other decoders.
pub async fn decode_manifest_layers(
    ctx: &DecodeContext,
    source: &dyn BlobSource,
    layers: &[Descriptor],
) -> Result<Vec<LayerTree>, ImageError> {
    let mut tasks = FuturesUnordered::new();
    for (index, desc) in layers.iter().enumerate() {
        let blob = source.open_blob(desc).await?;
        let ctx = ctx.clone();
        let desc = desc.clone();
        tasks.push(tokio::spawn(async move {
            decode_layer(&ctx, &desc, blob)
                .await
                .map(|tree| (index, tree))
        }));
    }

    let mut trees: Vec<Option<LayerTree>> = layers.iter().map(|_| None).collect();
    while let Some(result) = tasks.next().await {
        let result = match result {
            Ok(inner) => inner,
            Err(err) => Err(err.into()),
        };
        match result {
            Ok((index, tree)) => trees[index] = Some(tree),
            Err(err) => {
                for task in tasks.iter() {
                    task.abort();
                }
                return Err(err);
            }
        }
    }
    Ok(trees.into_iter().flatten().collect())
}
