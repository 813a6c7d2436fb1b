//! Lazily fetched layers in the eStargz chunked format

pub mod prefetch;
pub mod reader;
pub mod task;
pub mod toc;

pub use reader::{ChunkInfo, ChunkedFile, ChunkedLayer, FileChunks};

use crate::{
    errors::ImageError,
    fetch::Blob,
    filesystem::{
        merge::LayerTree,
        vfs::{mkdev, mode, FileData, Filesystem, Stat},
    },
    image::ContentDigest,
    layer::{gunzip, BackgroundJobs, DecodeContext},
    manifest::Descriptor,
};
use prefetch::Waiter;
use std::{
    cmp::min,
    collections::{BTreeSet, HashMap},
    ffi::OsStr,
    path::Path,
    sync::Arc,
};
use toc::{Footer, Toc, TocEntry};

/// Landmark files found at the root of the layer
#[derive(Debug, Default)]
struct Landmarks {
    prefetch: Option<u64>,
    no_prefetch: bool,
}

/// Decode a layer from its table of contents, leaving file data remote
pub async fn decode(
    ctx: &DecodeContext,
    desc: &Descriptor,
    blob: Arc<dyn Blob>,
) -> Result<LayerTree, ImageError> {
    let size = blob.size();
    let tail_len = min(size, toc::FOOTER_SIZE);
    let tail = blob.read_range(size - tail_len, tail_len).await?;
    let footer = Footer::parse(&tail)?;
    let toc_end = size - footer.size;
    if footer.toc_offset >= toc_end {
        return Err(ImageError::InvalidFooter);
    }

    let toc_gzip = blob
        .read_range(footer.toc_offset, toc_end - footer.toc_offset)
        .await?;
    let toc_json = toc::extract_toc_json(&gunzip(&toc_gzip).await?)?;

    let verify = match desc.annotations.get(toc::TOC_DIGEST_ANNOTATION) {
        Some(_) if ctx.options.skip_verify => {
            log::warn!("layer {} verification disabled", desc.digest);
            false
        }
        Some(expected) => {
            let found = ContentDigest::from_content(&toc_json);
            if found.as_str() != expected {
                return Err(ImageError::TocDigestMismatch {
                    expected: expected.clone(),
                    found: found.to_string(),
                });
            }
            true
        }
        None => {
            log::info!("layer {} has no TOC digest, content is not verified", desc.digest);
            false
        }
    };

    let toc = Toc::parse(&toc_json)?;
    let (files, ids) = index_files(&toc, footer.toc_offset)?;
    let entry_offsets: BTreeSet<u64> = toc.entries.iter().map(|entry| entry.offset).collect();
    let layer = Arc::new(ChunkedLayer::new(
        desc.digest.clone(),
        blob,
        footer.toc_offset,
        files,
        entry_offsets,
        verify,
        ctx.read_cache.clone(),
        ctx.tasks.clone(),
    ));
    let (mut tree, landmarks) = build_tree(&toc, &layer, &ids)?;

    let waiter = Waiter::new();
    let mut jobs = BackgroundJobs::default();
    match landmarks.prefetch {
        Some(landmark) if !(ctx.options.no_prefetch || landmarks.no_prefetch) => {
            jobs.push(tokio::spawn(prefetch::run_prefetch(
                layer.clone(),
                landmark,
                waiter.clone(),
            )));
        }
        _ => waiter.done(),
    }
    if ctx.options.background_fetch {
        jobs.push(tokio::spawn(prefetch::run_background_fetch(
            layer.clone(),
            ctx.options.background_timeout,
        )));
    }
    if let Err(err) = waiter.wait(ctx.options.prefetch_timeout).await {
        log::warn!("layer {}, {}", desc.digest, err);
    }
    tree.jobs = jobs;
    Ok(tree)
}

/// Collect the chunk list of every regular file
///
/// Chunks must start before the TOC and lie within their file.
fn index_files(
    toc: &Toc,
    toc_offset: u64,
) -> Result<(Vec<FileChunks>, HashMap<String, usize>), ImageError> {
    let mut files: Vec<FileChunks> = Vec::new();
    let mut ids = HashMap::new();
    for entry in &toc.entries {
        let chunk = ChunkInfo {
            offset: entry.offset,
            chunk_offset: entry.chunk_offset,
            chunk_size: entry.chunk_size,
            digest: entry.chunk_digest.clone(),
        };
        match entry.ty.as_str() {
            "reg" => {
                if entry.size > 0 {
                    check_chunk(&chunk, entry.size, toc_offset)?;
                }
                ids.insert(entry.clean_name().to_owned(), files.len());
                files.push(FileChunks {
                    size: entry.size,
                    chunks: if entry.size > 0 { vec![chunk] } else { vec![] },
                });
            }
            "chunk" => match ids.get(entry.clean_name()) {
                Some(id) => {
                    check_chunk(&chunk, files[*id].size, toc_offset)?;
                    files[*id].chunks.push(chunk)
                }
                None => {
                    return Err(ImageError::InvalidToc(format!(
                        "chunk for unknown file {:?}",
                        entry.name
                    )))
                }
            },
            _ => (),
        }
    }
    Ok((files, ids))
}

fn check_chunk(chunk: &ChunkInfo, file_size: u64, toc_offset: u64) -> Result<(), ImageError> {
    if chunk.offset >= toc_offset {
        return Err(ImageError::InvalidToc(format!(
            "chunk offset {} is not before the TOC at {}",
            chunk.offset, toc_offset
        )));
    }
    let end = chunk.chunk_offset.checked_add(chunk.data_len(file_size));
    match end {
        Some(end) if chunk.chunk_offset < file_size && end <= file_size => Ok(()),
        _ => Err(ImageError::InvalidToc(format!(
            "chunk at {} with size {} exceeds file size {}",
            chunk.chunk_offset, chunk.chunk_size, file_size
        ))),
    }
}

fn entry_stat(entry: &TocEntry, file_type: u32) -> Stat {
    let (sec, nsec) = entry.mtime();
    Stat {
        st_mode: (entry.mode & mode::PERMISSIONS) | file_type,
        st_uid: entry.uid,
        st_gid: entry.gid,
        st_size: entry.size,
        ..Default::default()
    }
    .with_times(sec, nsec)
}

fn build_tree(
    toc: &Toc,
    layer: &Arc<ChunkedLayer>,
    ids: &HashMap<String, usize>,
) -> Result<(LayerTree, Landmarks), ImageError> {
    let mut tree = LayerTree::new(Filesystem::new());
    let mut landmarks = Landmarks::default();
    for entry in &toc.entries {
        let name = entry.clean_name();
        let path = Path::new(name);
        match entry.ty.as_str() {
            "chunk" => continue,
            "dir" => {
                let stat = Stat {
                    st_size: 0,
                    ..entry_stat(entry, mode::S_IFDIR)
                };
                tree.fs.writer().write_directory_metadata(path, stat)?;
                continue;
            }
            _ => (),
        }
        if name == toc::PREFETCH_LANDMARK {
            landmarks.prefetch = Some(entry.offset);
            continue;
        }
        if name == toc::NO_PREFETCH_LANDMARK {
            landmarks.no_prefetch = true;
            continue;
        }
        if tree.record_whiteout(path) {
            continue;
        }
        let mut fsw = tree.fs.writer();
        match entry.ty.as_str() {
            "reg" => {
                let data = match ids.get(name) {
                    Some(id) if entry.size > 0 => {
                        FileData::Chunked(ChunkedFile::new(layer.clone(), *id))
                    }
                    _ => FileData::Empty,
                };
                fsw.write_file(path, entry_stat(entry, mode::S_IFREG), data)?;
            }
            "symlink" => {
                let stat = Stat {
                    st_size: entry.link_name.len() as u64,
                    ..entry_stat(entry, mode::S_IFLNK)
                };
                fsw.write_symlink(path, stat, OsStr::new(&entry.link_name))?;
            }
            "hardlink" => {
                fsw.write_hardlink(path, Path::new(toc::clean_name(&entry.link_name)))?;
            }
            "char" | "block" => {
                let file_type = if entry.ty == "char" {
                    mode::S_IFCHR
                } else {
                    mode::S_IFBLK
                };
                let stat = Stat {
                    st_size: 0,
                    st_rdev: mkdev(entry.dev_major, entry.dev_minor),
                    ..entry_stat(entry, file_type)
                };
                fsw.write_special(path, stat)?;
            }
            "fifo" => {
                let stat = Stat {
                    st_size: 0,
                    ..entry_stat(entry, mode::S_IFIFO)
                };
                fsw.write_special(path, stat)?;
            }
            other => log::error!("skipping unsupported TOC entry type {:?}, {:?}", other, name),
        }
    }
    Ok((tree, landmarks))
}
