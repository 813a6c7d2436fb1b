//! Images stored on the local filesystem
//!
//! Three layouts are understood: an OCI image layout directory, the
//! directory form of `docker save` output, and a tar file holding either of
//! those. Layout directories are read lazily; everything else is loaded into
//! memory once.

use crate::{
    errors::ImageError,
    fetch::{
        check_range,
        memory::MemorySource,
        resolve_from, Blob, BlobSource, ResolvedImage,
    },
    image::ContentDigest,
    manifest::{media_types, Descriptor, DockerSaveEntry, Manifest, Platform},
};
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::HashMap,
    io::SeekFrom,
    path::{Component, Path, PathBuf},
    sync::Arc,
};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

const OCI_INDEX_FILE: &str = "index.json";
const DOCKER_MANIFEST_FILE: &str = "manifest.json";

pub enum LocalFetcher {
    Layout(LayoutDir),
    Memory(MemorySource),
}

impl LocalFetcher {
    /// Inspect a path and pick the matching layout
    pub async fn open(path: &Path) -> Result<Self, ImageError> {
        let metadata = tokio::fs::metadata(path).await?;
        if metadata.is_dir() {
            if path.join(OCI_INDEX_FILE).is_file() {
                log::debug!("{:?} is an OCI layout directory", path);
                Ok(LocalFetcher::Layout(LayoutDir::new(path)))
            } else {
                log::debug!("{:?} is a docker save directory", path);
                let files = DirFiles(path.to_path_buf());
                Ok(LocalFetcher::Memory(load_docker_save(&files).await?))
            }
        } else {
            log::debug!("{:?} is an image archive", path);
            let archive = Bytes::from(tokio::fs::read(path).await?);
            let files = TarFiles::index(archive)?;
            if files.0.contains_key(OCI_INDEX_FILE) {
                Ok(LocalFetcher::Memory(load_layout_archive(&files)?))
            } else {
                Ok(LocalFetcher::Memory(load_docker_save(&files).await?))
            }
        }
    }
}

#[async_trait]
impl BlobSource for LocalFetcher {
    async fn resolve(&self, platform: &Platform) -> Result<ResolvedImage, ImageError> {
        match self {
            LocalFetcher::Layout(dir) => dir.resolve(platform).await,
            LocalFetcher::Memory(source) => source.resolve(platform).await,
        }
    }

    async fn open_blob(&self, desc: &Descriptor) -> Result<Arc<dyn Blob>, ImageError> {
        match self {
            LocalFetcher::Layout(dir) => dir.open_blob(desc).await,
            LocalFetcher::Memory(source) => source.open_blob(desc).await,
        }
    }
}

/// An OCI image layout directory, read on demand
pub struct LayoutDir {
    root: PathBuf,
}

impl LayoutDir {
    pub fn new(root: &Path) -> Self {
        LayoutDir {
            root: root.to_path_buf(),
        }
    }

    fn blob_path(&self, digest: &str) -> Result<PathBuf, ImageError> {
        let digest = ContentDigest::parse(digest)?;
        Ok(self
            .root
            .join("blobs")
            .join(digest.format_str())
            .join(digest.hex_str()))
    }
}

#[async_trait]
impl BlobSource for LayoutDir {
    async fn resolve(&self, platform: &Platform) -> Result<ResolvedImage, ImageError> {
        let index = tokio::fs::read(self.root.join(OCI_INDEX_FILE)).await?;
        resolve_from(self, Bytes::from(index), platform).await
    }

    async fn open_blob(&self, desc: &Descriptor) -> Result<Arc<dyn Blob>, ImageError> {
        let path = self.blob_path(&desc.digest)?;
        let size = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata.len(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ImageError::BlobNotFound(desc.digest.clone()))
            }
            Err(err) => return Err(err.into()),
        };
        if size != desc.size {
            return Err(ImageError::UnexpectedContentSize);
        }
        Ok(Arc::new(FileBlob { path, size }))
    }
}

/// A blob stored as one local file
#[derive(Clone, Debug)]
pub struct FileBlob {
    path: PathBuf,
    size: u64,
}

#[async_trait]
impl Blob for FileBlob {
    fn size(&self) -> u64 {
        self.size
    }

    async fn read_range(&self, offset: u64, len: u64) -> Result<Bytes, ImageError> {
        check_range(self.size, offset, len)?;
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

/// Named files inside an image layout, wherever they are stored
#[async_trait]
trait LayoutFiles: Sync {
    async fn read(&self, name: &str) -> Result<Bytes, ImageError>;
}

struct DirFiles(PathBuf);

/// Contents of a tar archive, sliced out of the archive bytes
struct TarFiles(HashMap<String, Bytes>);

fn is_relative_name(name: &str) -> bool {
    Path::new(name)
        .components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

fn clean_archive_name(name: &str) -> &str {
    let mut name = name;
    while let Some(rest) = name.strip_prefix("./") {
        name = rest;
    }
    name
}

#[async_trait]
impl LayoutFiles for DirFiles {
    async fn read(&self, name: &str) -> Result<Bytes, ImageError> {
        if !is_relative_name(name) {
            return Err(ImageError::BlobNotFound(name.to_owned()));
        }
        Ok(Bytes::from(tokio::fs::read(self.0.join(name)).await?))
    }
}

#[async_trait]
impl LayoutFiles for TarFiles {
    async fn read(&self, name: &str) -> Result<Bytes, ImageError> {
        self.0
            .get(clean_archive_name(name))
            .cloned()
            .ok_or_else(|| ImageError::BlobNotFound(name.to_owned()))
    }
}

impl TarFiles {
    fn index(archive: Bytes) -> Result<Self, ImageError> {
        let mut files = HashMap::new();
        let mut reader = ::tar::Archive::new(&archive[..]);
        for entry in reader.entries()? {
            let entry = entry?;
            if entry.header().entry_type() != ::tar::EntryType::Regular {
                continue;
            }
            let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            let offset = entry.raw_file_position() as usize;
            let size = entry.size() as usize;
            if offset + size > archive.len() {
                return Err(ImageError::TARFileError);
            }
            files.insert(
                clean_archive_name(&name).to_owned(),
                archive.slice(offset..offset + size),
            );
        }
        Ok(TarFiles(files))
    }
}

/// An OCI layout packed into a tar file
fn load_layout_archive(files: &TarFiles) -> Result<MemorySource, ImageError> {
    let mut source = MemorySource::new();
    for (name, content) in &files.0 {
        if name == OCI_INDEX_FILE {
            source.set_top(content.clone());
            continue;
        }
        let mut parts = name.split('/');
        if let (Some("blobs"), Some(format), Some(hex), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        {
            source.insert_blob_as(&format!("{}:{}", format, hex), content.clone());
        }
    }
    log::debug!("loaded {} blobs from layout archive", source.blob_count());
    Ok(source)
}

/// A `docker save` image, given a synthesized manifest with computed digests
async fn load_docker_save(files: &dyn LayoutFiles) -> Result<MemorySource, ImageError> {
    let entries: Vec<DockerSaveEntry> =
        serde_json::from_slice(&files.read(DOCKER_MANIFEST_FILE).await?)?;
    let entry = match entries.into_iter().next() {
        Some(entry) => entry,
        None => {
            return Err(ImageError::UnsupportedManifestType(
                "empty docker save manifest".to_owned(),
            ))
        }
    };
    if entry.config.is_empty() {
        return Err(ImageError::UnsupportedManifestType(
            "docker save manifest has no config".to_owned(),
        ));
    }
    let mut source = MemorySource::new();
    let config = source.insert_blob(media_types::DOCKER_CONFIG, files.read(&entry.config).await?);
    let mut layers = Vec::with_capacity(entry.layers.len());
    for layer in &entry.layers {
        layers.push(source.insert_blob(media_types::DOCKER_LAYER_TAR, files.read(layer).await?));
    }
    let manifest = Manifest {
        schema_version: 2,
        media_type: media_types::DOCKER_MANIFEST.to_owned(),
        config,
        layers,
    };
    source.set_top(Bytes::from(serde_json::to_vec(&manifest)?));
    Ok(source)
}
