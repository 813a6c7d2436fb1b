//! Container images and image identity
//!
//! An [Image] is the merged root filesystem of one platform-specific
//! manifest, together with the runtime spec derived from its config. Layer
//! contents stay wherever the blob source keeps them, and are read on
//! demand through the chunk readers.

#[cfg(test)] mod tests;

mod digest;
mod reference;

pub use digest::ContentDigest;
pub use reference::Reference;

use crate::{
    errors::{ImageError, VFSError},
    fetch::{
        http::{HttpTransport, ReqwestTransport},
        open_source, BlobSource, ResolvedImage,
    },
    filesystem::{
        merge::Merger,
        vfs::{mode, FileData, Filesystem, Stat},
    },
    layer::{decode_manifest_layers, BackgroundJobs, DecodeContext, LayerOptions, TaskManager},
    manifest::{ImageConfigFile, Manifest, Platform},
    runtime_spec::{self, Spec},
    server::{File, FsNode, QidSpace, RouteNode, Server},
};
use bytes::Bytes;
use std::{fmt, path::Path, sync::Arc};

/// Name of the merged image tree in the served root
pub const ROOTFS_DIR: &str = "rootfs";
/// Name of the generated configuration tree in the served root
pub const CONFIG_DIR: &str = "config";
/// Runtime spec for the image, in the config tree
pub const RUNTIME_SPEC_FILE: &str = "config.json";
/// Image config exactly as it was fetched, in the config tree
pub const IMAGE_CONFIG_FILE: &str = "imageconfig.json";

/// Builder for loading an [Image] from any supported source
///
/// ```no_run
/// # async fn f() -> Result<(), layerfs::errors::ImageError> {
/// let image = layerfs::image::ImageBuilder::new()
///     .address("ghcr.io/stargz-containers/alpine:3.15.3-esgz")
///     .build()
///     .await?;
/// println!("{:?}", image.runtime_spec().process.args);
/// # Ok(()) }
/// ```
#[derive(Clone, Default)]
pub struct ImageBuilder {
    address: Option<String>,
    platform: Platform,
    options: LayerOptions,
    transport: Option<Arc<dyn HttpTransport>>,
    source: Option<Arc<dyn BlobSource>>,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    /// A registry reference, an OCI layout URL, or a local path
    pub fn address(mut self, address: &str) -> Self {
        self.address = Some(address.to_owned());
        self
    }

    /// Platform used to pick a manifest out of an index
    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn layer_options(mut self, options: LayerOptions) -> Self {
        self.options = options;
        self
    }

    /// Use this HTTP transport for remote sources, instead of reqwest
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Load from an already open blob source, ignoring the address
    pub fn source(mut self, source: Arc<dyn BlobSource>) -> Self {
        self.source = Some(source);
        self
    }

    async fn open(&self) -> Result<Arc<dyn BlobSource>, ImageError> {
        if let Some(source) = &self.source {
            return Ok(source.clone());
        }
        let address = match &self.address {
            Some(address) => address,
            None => return Err(ImageError::InvalidReferenceFormat(String::new())),
        };
        let transport = match &self.transport {
            Some(transport) => transport.clone(),
            None => Arc::new(ReqwestTransport::new()?),
        };
        open_source(address, transport).await
    }

    pub async fn build(self) -> Result<Image, ImageError> {
        let source = self.open().await?;
        let ResolvedImage {
            manifest,
            config,
            config_bytes,
        } = source.resolve(&self.platform).await?;
        log::info!(
            "image for {} has {} layers",
            self.platform,
            manifest.layers.len()
        );

        let ctx = DecodeContext::new(self.options.clone());
        let layers = decode_manifest_layers(&ctx, source.as_ref(), &manifest.layers).await?;
        let mut merger = Merger::new();
        for layer in layers {
            merger.apply(layer)?;
        }
        let (rootfs, jobs) = merger.finish()?;

        let runtime_spec = runtime_spec::generate(&config, &rootfs).await?;
        let config_fs = config_tree(&runtime_spec, config_bytes.clone())?;
        log::info!("image ready, {} background jobs", jobs.len());

        Ok(Image {
            manifest,
            config,
            config_bytes,
            runtime_spec,
            rootfs: Arc::new(rootfs),
            config_fs: Arc::new(config_fs),
            jobs,
            tasks: ctx.tasks.clone(),
        })
    }
}

/// Small tree holding the runtime spec and the raw image config
fn config_tree(spec: &Spec, image_config: Bytes) -> Result<Filesystem, ImageError> {
    let spec_json = Bytes::from(spec.to_json()?);
    let mut fs = Filesystem::new();
    for (name, content) in [
        (RUNTIME_SPEC_FILE, spec_json),
        (IMAGE_CONFIG_FILE, image_config),
    ] {
        let stat = Stat {
            st_mode: mode::S_IFREG | 0o444,
            st_size: content.len() as u64,
            ..Default::default()
        };
        fs.writer()
            .write_file(Path::new(name), stat, FileData::Memory(content))?;
    }
    fs.finalize()?;
    Ok(fs)
}

/// Loaded data for a container image
///
/// The merged tree and its config are immutable once built. Background
/// chunk fetches, if enabled, keep running until the image is dropped.
pub struct Image {
    manifest: Manifest,
    config: ImageConfigFile,
    config_bytes: Bytes,
    runtime_spec: Spec,
    rootfs: Arc<Filesystem>,
    config_fs: Arc<Filesystem>,
    jobs: BackgroundJobs,
    tasks: Arc<TaskManager>,
}

impl Image {
    pub fn builder() -> ImageBuilder {
        ImageBuilder::new()
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn config(&self) -> &ImageConfigFile {
        &self.config
    }

    /// Image config bytes, verified against the manifest
    pub fn config_bytes(&self) -> &Bytes {
        &self.config_bytes
    }

    pub fn runtime_spec(&self) -> &Spec {
        &self.runtime_spec
    }

    pub fn rootfs(&self) -> &Arc<Filesystem> {
        &self.rootfs
    }

    pub fn config_fs(&self) -> &Arc<Filesystem> {
        &self.config_fs
    }

    pub fn background_jobs(&self) -> &BackgroundJobs {
        &self.jobs
    }

    /// Root directory holding `rootfs` and `config` side by side
    pub fn root_node(&self) -> Arc<RouteNode> {
        let rootfs: Arc<dyn File> = Arc::new(FsNode::root(self.rootfs.clone()));
        let config: Arc<dyn File> = Arc::new(FsNode::root(self.config_fs.clone()));
        RouteNode::new(
            vec![
                (ROOTFS_DIR.to_owned(), rootfs),
                (CONFIG_DIR.to_owned(), config),
            ],
            Arc::new(QidSpace::new()),
        )
    }

    /// A 9P server for this image
    pub fn server(&self) -> Server {
        Server::new(self.root_node())
    }

    /// Look up a path in the merged tree, for tests and tooling
    pub async fn read_file(&self, path: &str) -> Result<Bytes, VFSError> {
        self.rootfs.read_file(Path::new(path)).await
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        self.tasks.close();
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Image({} layers, {:?})",
            self.manifest.layers.len(),
            self.runtime_spec.process.args
        )
    }
}
