//! Footer and table of contents of an eStargz layer
//!
//! Reference: <https://github.com/containerd/stargz-snapshotter/blob/main/docs/estargz.md>

use crate::errors::ImageError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::{
    io::{Cursor, Read},
    path::Path,
    str,
};
use tar::Archive;

pub const FOOTER_SIZE: u64 = 51;
pub const LEGACY_FOOTER_SIZE: u64 = 47;
pub const TOC_TAR_NAME: &str = "stargz.index.json";
pub const TOC_DIGEST_ANNOTATION: &str = "containerd.io/snapshot/stargz/toc.digest";
pub const PREFETCH_LANDMARK: &str = ".prefetch.landmark";
pub const NO_PREFETCH_LANDMARK: &str = ".no.prefetch.landmark";

const GZIP_MAGIC_WITH_EXTRA: [u8; 4] = [0x1f, 0x8b, 0x08, 0x04];
const FOOTER_PAYLOAD_LEN: usize = 22;
const FOOTER_MAGIC: &[u8] = b"STARGZ";

/// Location of the table of contents, as recorded in the layer footer
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Footer {
    pub toc_offset: u64,
    /// Length of the footer itself, 51 or 47 bytes
    pub size: u64,
}

impl Footer {
    /// Parse the footer from the last bytes of a blob
    pub fn parse(tail: &[u8]) -> Result<Footer, ImageError> {
        let estargz = tail_slice(tail, FOOTER_SIZE).and_then(|footer| {
            let extra = gzip_extra_field(footer)?;
            if extra.len() == 4 + FOOTER_PAYLOAD_LEN
                && &extra[0..2] == b"SG"
                && u16::from_le_bytes([extra[2], extra[3]]) as usize == FOOTER_PAYLOAD_LEN
            {
                parse_payload(&extra[4..])
            } else {
                None
            }
        });
        if let Some(toc_offset) = estargz {
            return Ok(Footer {
                toc_offset,
                size: FOOTER_SIZE,
            });
        }
        let legacy = tail_slice(tail, LEGACY_FOOTER_SIZE)
            .and_then(gzip_extra_field)
            .and_then(parse_payload);
        match legacy {
            Some(toc_offset) => Ok(Footer {
                toc_offset,
                size: LEGACY_FOOTER_SIZE,
            }),
            None => Err(ImageError::InvalidFooter),
        }
    }
}

fn tail_slice(bytes: &[u8], len: u64) -> Option<&[u8]> {
    let len = len as usize;
    bytes.len().checked_sub(len).map(|start| &bytes[start..])
}

fn gzip_extra_field(member: &[u8]) -> Option<&[u8]> {
    if member.len() < 12 || member[0..4] != GZIP_MAGIC_WITH_EXTRA {
        return None;
    }
    let xlen = u16::from_le_bytes([member[10], member[11]]) as usize;
    member.get(12..12 + xlen)
}

fn parse_payload(payload: &[u8]) -> Option<u64> {
    if payload.len() != FOOTER_PAYLOAD_LEN || &payload[16..] != FOOTER_MAGIC {
        return None;
    }
    u64::from_str_radix(str::from_utf8(&payload[..16]).ok()?, 16).ok()
}

/// Find the JSON table of contents inside the decompressed TOC tar
pub fn extract_toc_json(tar_bytes: &[u8]) -> Result<Bytes, ImageError> {
    let mut archive = Archive::new(Cursor::new(tar_bytes));
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.path()? == Path::new(TOC_TAR_NAME) {
            let mut json = Vec::new();
            entry.read_to_end(&mut json)?;
            return Ok(json.into());
        }
    }
    Err(ImageError::InvalidToc(format!("no {} entry", TOC_TAR_NAME)))
}

#[derive(Debug, Clone, Deserialize)]
pub struct Toc {
    #[serde(default)]
    pub version: i32,
    #[serde(default)]
    pub entries: Vec<TocEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TocEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub size: u64,
    pub modtime: Option<DateTime<Utc>>,
    pub link_name: String,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub user_name: String,
    pub group_name: String,
    pub offset: u64,
    pub dev_major: u32,
    pub dev_minor: u32,
    pub digest: String,
    pub chunk_offset: u64,
    pub chunk_size: u64,
    pub chunk_digest: String,
}

impl Toc {
    pub fn parse(json: &[u8]) -> Result<Toc, ImageError> {
        serde_json::from_slice(json).map_err(|err| ImageError::InvalidToc(err.to_string()))
    }
}

impl TocEntry {
    /// Entry name without `./`, leading or trailing slashes
    pub fn clean_name(&self) -> &str {
        clean_name(&self.name)
    }

    /// Modification time as non-negative seconds and nanoseconds
    pub fn mtime(&self) -> (u64, u64) {
        match &self.modtime {
            Some(time) if time.timestamp() >= 0 => (
                time.timestamp() as u64,
                time.timestamp_subsec_nanos() as u64,
            ),
            _ => (0, 0),
        }
    }
}

pub fn clean_name(name: &str) -> &str {
    let name = name.trim_start_matches("./").trim_start_matches('/');
    let name = name.trim_end_matches('/');
    if name == "." {
        ""
    } else {
        name
    }
}
