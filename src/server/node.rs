//! Served objects
//!
//! Every fid in a session points at something implementing [File]. Reads and
//! directory listings go to the object; anything that would change the tree
//! is answered with `EROFS` unless an implementation says otherwise.

use crate::{
    errors::VFSError,
    filesystem::vfs::{mode, Filesystem, INodeNum, Stat, BLOCK_SIZE},
};
use async_trait::async_trait;
use bytes::Bytes;
use layerfs_protocol::{Dirent, Qid, Rstatfs};
use std::{ffi::OsStr, sync::Arc};

/// Magic number reported by `statfs` for 9P mounts
pub const V9FS_MAGIC: u32 = 0x0102_1997;

/// Longest file name a client should expect
pub const NAME_MAX: u32 = 255;

/// Result of walking one or more names
///
/// `file` is present only when every name was walked. A walk that stops
/// early still reports the QIDs it passed.
pub struct Walked {
    pub qids: Vec<Qid>,
    pub file: Option<Arc<dyn File>>,
}

impl Walked {
    pub fn complete(qids: Vec<Qid>, file: Arc<dyn File>) -> Self {
        Walked {
            qids,
            file: Some(file),
        }
    }

    pub fn partial(qids: Vec<Qid>) -> Self {
        Walked { qids, file: None }
    }
}

#[async_trait]
pub trait File: Send + Sync {
    /// Walk a non-empty list of names, relative to this object
    async fn walk(&self, names: &[String]) -> Result<Walked, VFSError>;

    async fn get_attr(&self) -> Result<(Qid, Stat), VFSError>;

    /// Returns the QID and the iounit
    async fn open(&self, flags: u32) -> Result<(Qid, u32), VFSError>;

    async fn read_at(&self, offset: u64, count: u32) -> Result<Bytes, VFSError>;

    /// Entries starting at `offset`, whose encoded size fits in `count`
    async fn readdir(&self, offset: u64, count: u32) -> Result<Vec<Dirent>, VFSError>;

    async fn readlink(&self) -> Result<String, VFSError>;

    async fn statfs(&self) -> Result<Rstatfs, VFSError> {
        Ok(default_statfs())
    }

    async fn close(&self) -> Result<(), VFSError> {
        Ok(())
    }

    async fn write_at(&self, _offset: u64, _data: &[u8]) -> Result<u32, VFSError> {
        Err(VFSError::ReadOnly)
    }

    async fn create(
        &self,
        _name: &str,
        _flags: u32,
        _mode: u32,
        _gid: u32,
    ) -> Result<(Qid, u32), VFSError> {
        Err(VFSError::ReadOnly)
    }

    async fn mkdir(&self, _name: &str, _mode: u32, _gid: u32) -> Result<Qid, VFSError> {
        Err(VFSError::ReadOnly)
    }

    async fn symlink(&self, _name: &str, _target: &str, _gid: u32) -> Result<Qid, VFSError> {
        Err(VFSError::ReadOnly)
    }

    async fn link(&self, _target: Arc<dyn File>, _name: &str) -> Result<(), VFSError> {
        Err(VFSError::ReadOnly)
    }

    async fn mknod(
        &self,
        _name: &str,
        _mode: u32,
        _major: u32,
        _minor: u32,
        _gid: u32,
    ) -> Result<Qid, VFSError> {
        Err(VFSError::ReadOnly)
    }

    async fn rename(&self, _dir: Arc<dyn File>, _name: &str) -> Result<(), VFSError> {
        Err(VFSError::ReadOnly)
    }

    async fn rename_at(
        &self,
        _old_name: &str,
        _new_dir: Arc<dyn File>,
        _new_name: &str,
    ) -> Result<(), VFSError> {
        Err(VFSError::ReadOnly)
    }

    async fn unlink_at(&self, _name: &str, _flags: u32) -> Result<(), VFSError> {
        Err(VFSError::ReadOnly)
    }

    async fn remove(&self) -> Result<(), VFSError> {
        Err(VFSError::ReadOnly)
    }

    async fn set_attr(&self, _valid: u32, _stat: Stat) -> Result<(), VFSError> {
        Err(VFSError::ReadOnly)
    }

    async fn fsync(&self) -> Result<(), VFSError> {
        Err(VFSError::ReadOnly)
    }

    async fn xattr_create(&self, _name: &str, _size: u64, _flags: u32) -> Result<(), VFSError> {
        Err(VFSError::ReadOnly)
    }
}

pub fn default_statfs() -> Rstatfs {
    Rstatfs {
        ty: V9FS_MAGIC,
        bsize: BLOCK_SIZE as u32,
        blocks: 0,
        bfree: 0,
        bavail: 0,
        files: 0,
        ffree: 0,
        fsid: 0,
        namelen: NAME_MAX,
    }
}

/// Keep the leading entries whose encoded size fits in `count` bytes
pub fn pack_dirents<I: IntoIterator<Item = Dirent>>(entries: I, count: u32) -> Vec<Dirent> {
    let mut used = 0;
    let mut result = Vec::new();
    for entry in entries {
        used += entry.encoded_len();
        if used > count as usize {
            break;
        }
        result.push(entry);
    }
    result
}

/// One node of an immutable [Filesystem]
#[derive(Clone)]
pub struct FsNode {
    fs: Arc<Filesystem>,
    ino: INodeNum,
}

impl FsNode {
    pub fn new(fs: Arc<Filesystem>, ino: INodeNum) -> Self {
        FsNode { fs, ino }
    }

    pub fn root(fs: Arc<Filesystem>) -> Self {
        FsNode::new(fs, Filesystem::root())
    }

    pub fn ino(&self) -> INodeNum {
        self.ino
    }
}

#[async_trait]
impl File for FsNode {
    async fn walk(&self, names: &[String]) -> Result<Walked, VFSError> {
        log::trace!("walk {} {:?}", self.ino, names);
        let mut qids = Vec::with_capacity(names.len());
        let mut ino = self.ino;
        for (index, name) in names.iter().enumerate() {
            let next = if self.fs.is_directory(ino)? {
                self.fs.lookup(ino, OsStr::new(name))
            } else {
                Err(VFSError::DirectoryExpected)
            };
            match next {
                Ok(child) => {
                    qids.push(self.fs.qid(child)?);
                    ino = child;
                }
                Err(err) if index == 0 => return Err(err),
                Err(_) => return Ok(Walked::partial(qids)),
            }
        }
        Ok(Walked::complete(
            qids,
            Arc::new(FsNode::new(self.fs.clone(), ino)),
        ))
    }

    async fn get_attr(&self) -> Result<(Qid, Stat), VFSError> {
        Ok((self.fs.qid(self.ino)?, self.fs.stat(self.ino)?.clone()))
    }

    async fn open(&self, _flags: u32) -> Result<(Qid, u32), VFSError> {
        Ok((self.fs.qid(self.ino)?, BLOCK_SIZE as u32))
    }

    async fn read_at(&self, offset: u64, count: u32) -> Result<Bytes, VFSError> {
        self.fs.read_at(self.ino, offset, count as usize).await
    }

    async fn readdir(&self, offset: u64, count: u32) -> Result<Vec<Dirent>, VFSError> {
        let mut entries = Vec::new();
        for (index, (name, child)) in self.fs.entries(self.ino)?.enumerate() {
            if (index as u64) < offset {
                continue;
            }
            entries.push(Dirent {
                qid: self.fs.qid(child)?,
                offset: index as u64 + 1,
                ty: self.fs.dir_entry_type(child)?,
                name: name.to_string_lossy().into_owned(),
            });
        }
        Ok(pack_dirents(entries, count))
    }

    async fn readlink(&self) -> Result<String, VFSError> {
        Ok(self.fs.readlink(self.ino)?.to_string_lossy().into_owned())
    }
}

/// Attributes for a synthetic read-only directory
pub fn synthetic_dir_stat(subdirs: usize) -> Stat {
    Stat {
        st_mode: mode::S_IFDIR | 0o555,
        st_nlink: 2 + subdirs as u64,
        ..Default::default()
    }
}
