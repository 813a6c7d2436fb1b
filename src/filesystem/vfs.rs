use crate::{errors::VFSError, layer::stargz::ChunkedFile};
use bytes::Bytes;
use layerfs_protocol::{qid_type, Qid};
use std::{
    cmp::min,
    collections::BTreeMap,
    ffi::{OsStr, OsString},
    path::{Component, Path},
    sync::Arc,
};

pub type INodeNum = usize;

/// Block size reported to clients, also used as the iounit
pub const BLOCK_SIZE: u64 = 53248;

/// File type and permission bits, in the Linux `st_mode` encoding
pub mod mode {
    pub const S_IFMT: u32 = 0o170000;
    pub const S_IFSOCK: u32 = 0o140000;
    pub const S_IFLNK: u32 = 0o120000;
    pub const S_IFREG: u32 = 0o100000;
    pub const S_IFBLK: u32 = 0o060000;
    pub const S_IFDIR: u32 = 0o040000;
    pub const S_IFCHR: u32 = 0o020000;
    pub const S_IFIFO: u32 = 0o010000;
    pub const PERMISSIONS: u32 = 0o7777;

    pub const DT_UNKNOWN: u8 = 0;
    pub const DT_FIFO: u8 = 1;
    pub const DT_CHR: u8 = 2;
    pub const DT_DIR: u8 = 4;
    pub const DT_BLK: u8 = 6;
    pub const DT_REG: u8 = 8;
    pub const DT_LNK: u8 = 10;
    pub const DT_SOCK: u8 = 12;
}

/// Attributes of one node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stat {
    pub st_mode: u32,
    pub st_uid: u32,
    pub st_gid: u32,
    pub st_nlink: u64,
    pub st_rdev: u64,
    pub st_size: u64,
    pub st_atime: u64,
    pub st_atime_nsec: u64,
    pub st_mtime: u64,
    pub st_mtime_nsec: u64,
    pub st_ctime: u64,
    pub st_ctime_nsec: u64,
}

impl Stat {
    /// Attributes used for directories implied by a path but not yet described
    pub fn placeholder_dir() -> Self {
        Stat {
            st_mode: 0o755 | mode::S_IFDIR,
            ..Default::default()
        }
    }

    pub fn file_type(&self) -> u32 {
        self.st_mode & mode::S_IFMT
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == mode::S_IFDIR
    }

    /// Set all three timestamps to the same instant
    pub fn with_times(mut self, sec: u64, nsec: u64) -> Self {
        self.st_atime = sec;
        self.st_atime_nsec = nsec;
        self.st_mtime = sec;
        self.st_mtime_nsec = nsec;
        self.st_ctime = sec;
        self.st_ctime_nsec = nsec;
        self
    }

    pub fn blocks(&self) -> u64 {
        self.st_size / BLOCK_SIZE + 1
    }
}

/// Combine device numbers the same way glibc's `makedev` does
pub fn mkdev(major: u32, minor: u32) -> u64 {
    let (major, minor) = (major as u64, minor as u64);
    ((major & 0x0000_0fff) << 8)
        | ((major & 0xffff_f000) << 32)
        | (minor & 0x0000_00ff)
        | ((minor & 0xffff_ff00) << 12)
}

/// Content of a regular file
#[derive(Clone)]
pub enum FileData {
    Empty,
    Memory(Bytes),
    Chunked(ChunkedFile),
}

impl FileData {
    /// Read up to `count` bytes at `offset`, clamped to `size`
    pub async fn read_at(&self, size: u64, offset: u64, count: usize) -> Result<Bytes, VFSError> {
        if offset >= size || count == 0 {
            return Ok(Bytes::new());
        }
        let end = min(size, offset.saturating_add(count as u64));
        match self {
            FileData::Empty => Ok(Bytes::new()),
            FileData::Memory(bytes) => {
                let len = bytes.len() as u64;
                Ok(bytes.slice(min(offset, len) as usize..min(end, len) as usize))
            }
            FileData::Chunked(file) => Ok(file.read_at(offset, (end - offset) as usize).await?),
        }
    }
}

#[derive(Clone)]
pub struct Filesystem {
    inodes: Vec<Option<Arc<INode>>>,
}

pub struct VFSWriter<'f> {
    fs: &'f mut Filesystem,
}

#[derive(Clone)]
pub(crate) struct INode {
    pub(crate) stat: Stat,
    pub(crate) data: Node,
    pub(crate) linked: bool,
    /// A directory created for a path but never described by its own entry
    pub(crate) implied: bool,
}

#[derive(Clone)]
pub(crate) enum Node {
    Directory(BTreeMap<OsString, INodeNum>),
    File(FileData),
    SymbolicLink(OsString),
    Special,
}

#[derive(Debug, Clone)]
struct DirEntryRef {
    parent: INodeNum,
    child: INodeNum,
}

#[derive(Debug)]
struct Limits {
    path_segment: usize,
    symbolic_link: usize,
}

impl DirEntryRef {
    fn root() -> Self {
        DirEntryRef {
            parent: Filesystem::root(),
            child: Filesystem::root(),
        }
    }
}

impl Limits {
    fn reset() -> Self {
        Limits {
            path_segment: 1000,
            symbolic_link: 50,
        }
    }

    fn take_path_segment(&mut self) -> Result<(), VFSError> {
        if self.path_segment > 0 {
            self.path_segment -= 1;
            Ok(())
        } else {
            Err(VFSError::PathSegmentLimitExceeded)
        }
    }

    fn take_symbolic_link(&mut self) -> Result<(), VFSError> {
        if self.symbolic_link > 0 {
            self.symbolic_link -= 1;
            Ok(())
        } else {
            Err(VFSError::SymbolicLinkLimitExceeded)
        }
    }
}

/// Split a layer path into its normal components
///
/// Leading `/` and `.` components are dropped, `..` is refused.
pub fn path_components(path: &Path) -> Result<Vec<&OsStr>, VFSError> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => (),
            Component::ParentDir => return Err(VFSError::InvalidArgument),
        }
    }
    Ok(parts)
}

impl Default for Filesystem {
    fn default() -> Self {
        Filesystem::new()
    }
}

impl Filesystem {
    pub fn new() -> Self {
        let mut stat = Stat::placeholder_dir();
        stat.st_nlink = 1;
        Filesystem {
            inodes: vec![Some(Arc::new(INode {
                stat,
                data: Node::Directory(BTreeMap::new()),
                linked: false,
                implied: true,
            }))],
        }
    }

    pub fn root() -> INodeNum {
        0
    }

    pub fn writer(&mut self) -> VFSWriter<'_> {
        VFSWriter { fs: self }
    }

    pub(crate) fn get_inode(&self, num: INodeNum) -> Result<&INode, VFSError> {
        match self.inodes.get(num) {
            Some(Some(node)) => Ok(node),
            _ => Err(VFSError::UnallocNode),
        }
    }

    fn directory(&self, num: INodeNum) -> Result<&BTreeMap<OsString, INodeNum>, VFSError> {
        match &self.get_inode(num)?.data {
            Node::Directory(map) => Ok(map),
            _ => Err(VFSError::DirectoryExpected),
        }
    }

    fn resolve_symlinks(
        &self,
        limits: &mut Limits,
        mut entry: DirEntryRef,
    ) -> Result<DirEntryRef, VFSError> {
        while let Node::SymbolicLink(target) = &self.get_inode(entry.child)?.data {
            log::trace!("following symlink, {:?} -> {:?}", entry, target);
            limits.take_symbolic_link()?;
            entry = self.resolve_path(limits, entry.parent, Path::new(target))?;
        }
        Ok(entry)
    }

    fn resolve_path_segment(
        &self,
        limits: &mut Limits,
        parent: INodeNum,
        part: &OsStr,
    ) -> Result<DirEntryRef, VFSError> {
        limits.take_path_segment()?;
        if part == "/" {
            Ok(DirEntryRef::root())
        } else {
            match self.directory(parent)?.get(part) {
                None => Err(VFSError::NotFound),
                Some(child) => Ok(DirEntryRef {
                    parent,
                    child: *child,
                }),
            }
        }
    }

    fn resolve_path(
        &self,
        limits: &mut Limits,
        parent: INodeNum,
        path: &Path,
    ) -> Result<DirEntryRef, VFSError> {
        // symlinks are followed between steps, never after the last one
        let mut iter = path.iter();
        if let Some(part) = iter.next() {
            let mut entry = self.resolve_path_segment(limits, parent, part)?;
            for part in iter {
                entry = self.resolve_symlinks(limits, entry)?;
                entry = self.resolve_path_segment(limits, entry.child, part)?;
            }
            Ok(entry)
        } else {
            Ok(DirEntryRef {
                parent,
                child: parent,
            })
        }
    }

    /// Look up an absolute path, following symlinks along the way
    pub fn lookup_path(&self, path: &Path, follow_last: bool) -> Result<INodeNum, VFSError> {
        let mut limits = Limits::reset();
        let entry = self.resolve_path(&mut limits, Filesystem::root(), path)?;
        let entry = if follow_last {
            self.resolve_symlinks(&mut limits, entry)?
        } else {
            entry
        };
        log::debug!("lookup_path({:?}) -> {:?}", path, entry);
        Ok(entry.child)
    }

    /// Look up a path one literal component at a time, without symlinks
    pub fn lookup_literal(&self, path: &Path) -> Result<INodeNum, VFSError> {
        let mut num = Filesystem::root();
        for part in path_components(path)? {
            num = self.lookup(num, part)?;
        }
        Ok(num)
    }

    /// Look up one name within a directory
    pub fn lookup(&self, dir: INodeNum, name: &OsStr) -> Result<INodeNum, VFSError> {
        match self.directory(dir)?.get(name) {
            Some(child) => Ok(*child),
            None => Err(VFSError::NotFound),
        }
    }

    pub fn stat(&self, num: INodeNum) -> Result<&Stat, VFSError> {
        Ok(&self.get_inode(num)?.stat)
    }

    pub fn is_directory(&self, num: INodeNum) -> Result<bool, VFSError> {
        Ok(matches!(self.get_inode(num)?.data, Node::Directory(_)))
    }

    /// True for directories that only exist because a deeper path needed them
    pub fn is_implied(&self, num: INodeNum) -> Result<bool, VFSError> {
        Ok(self.get_inode(num)?.implied)
    }

    /// Local identity of a node, its path is the inode number
    pub fn qid(&self, num: INodeNum) -> Result<Qid, VFSError> {
        let inode = self.get_inode(num)?;
        let ty = match inode.stat.file_type() {
            mode::S_IFDIR => qid_type::DIR,
            mode::S_IFLNK => qid_type::SYMLINK,
            _ => qid_type::FILE,
        };
        Ok(Qid {
            ty: if inode.linked { ty | qid_type::LINK } else { ty },
            version: 0,
            path: num as u64,
        })
    }

    pub fn dir_entry_type(&self, num: INodeNum) -> Result<u8, VFSError> {
        Ok(match self.stat(num)?.file_type() {
            mode::S_IFSOCK => mode::DT_SOCK,
            mode::S_IFLNK => mode::DT_LNK,
            mode::S_IFREG => mode::DT_REG,
            mode::S_IFBLK => mode::DT_BLK,
            mode::S_IFDIR => mode::DT_DIR,
            mode::S_IFCHR => mode::DT_CHR,
            mode::S_IFIFO => mode::DT_FIFO,
            _ => mode::DT_UNKNOWN,
        })
    }

    /// Directory entries sorted by name
    pub fn entries(
        &self,
        dir: INodeNum,
    ) -> Result<impl Iterator<Item = (&OsString, INodeNum)>, VFSError> {
        Ok(self.directory(dir)?.iter().map(|(name, num)| (name, *num)))
    }

    pub fn readlink(&self, num: INodeNum) -> Result<&OsStr, VFSError> {
        match &self.get_inode(num)?.data {
            Node::SymbolicLink(target) => Ok(target.as_os_str()),
            _ => Err(VFSError::LinkExpected),
        }
    }

    pub async fn read_at(
        &self,
        num: INodeNum,
        offset: u64,
        count: usize,
    ) -> Result<Bytes, VFSError> {
        let inode = self.get_inode(num)?;
        match &inode.data {
            Node::File(data) => data.read_at(inode.stat.st_size, offset, count).await,
            Node::Directory(_) => Err(VFSError::FileExpected),
            _ => Err(VFSError::InvalidArgument),
        }
    }

    /// Read an entire file by absolute path, following symlinks
    pub async fn read_file(&self, path: &Path) -> Result<Bytes, VFSError> {
        let num = self.lookup_path(path, true)?;
        let size = self.stat(num)?.st_size;
        self.read_at(num, 0, size as usize).await
    }

    /// Attach `.` and `..` to every directory reachable from the root
    ///
    /// These are back-references, link counts are unchanged.
    pub fn finalize(&mut self) -> Result<(), VFSError> {
        let mut stack = vec![(Filesystem::root(), Filesystem::root())];
        while let Some((dir, parent)) = stack.pop() {
            let mut writer = self.writer();
            let map = match &mut writer.get_inode_mut(dir)?.data {
                Node::Directory(map) => map,
                _ => return Err(VFSError::DirectoryExpected),
            };
            map.insert(OsString::from("."), dir);
            map.insert(OsString::from(".."), parent);
            let children: Vec<INodeNum> = map
                .iter()
                .filter(|(name, _)| !is_dot_name(name))
                .map(|(_, num)| *num)
                .collect();
            for child in children {
                if self.is_directory(child)? {
                    stack.push((child, dir));
                }
            }
        }
        Ok(())
    }
}

pub(crate) fn is_dot_name(name: &OsStr) -> bool {
    name == "." || name == ".."
}

impl<'f> VFSWriter<'f> {
    fn alloc_inode_number(&mut self) -> INodeNum {
        let num = self.fs.inodes.len() as INodeNum;
        self.fs.inodes.push(None);
        num
    }

    pub(crate) fn get_inode_mut(&mut self, num: INodeNum) -> Result<&mut INode, VFSError> {
        match self.fs.inodes.get_mut(num) {
            Some(Some(node)) => Ok(Arc::make_mut(node)),
            _ => Err(VFSError::UnallocNode),
        }
    }

    pub(crate) fn put_inode(&mut self, inode: INode) -> INodeNum {
        let num = self.alloc_inode_number();
        self.fs.inodes[num] = Some(Arc::new(inode));
        num
    }

    fn inode_incref(&mut self, num: INodeNum) -> Result<(), VFSError> {
        let stat = &mut self.get_inode_mut(num)?.stat;
        match stat.st_nlink.checked_add(1) {
            None => Err(VFSError::INodeRefCountError),
            Some(count) => {
                stat.st_nlink = count;
                Ok(())
            }
        }
    }

    fn inode_decref(&mut self, num: INodeNum) -> Result<(), VFSError> {
        let stat = &mut self.get_inode_mut(num)?.stat;
        match stat.st_nlink.checked_sub(1) {
            None => Err(VFSError::INodeRefCountError),
            Some(count) => {
                stat.st_nlink = count;
                Ok(())
            }
        }
    }

    /// Link a child into a directory, replacing any previous entry
    pub(crate) fn add_child_to_directory(
        &mut self,
        parent: INodeNum,
        child_name: &OsStr,
        child_value: INodeNum,
    ) -> Result<(), VFSError> {
        self.inode_incref(child_value)?;
        let previous = match &mut self.get_inode_mut(parent)?.data {
            Node::Directory(map) => map.insert(child_name.to_os_string(), child_value),
            _ => return Err(VFSError::DirectoryExpected),
        };
        match previous {
            None => Ok(()),
            Some(prev_child) => self.inode_decref(prev_child),
        }
    }

    /// Remove one name from a directory, returning the node it named
    pub(crate) fn unlink(
        &mut self,
        parent: INodeNum,
        name: &OsStr,
    ) -> Result<Option<INodeNum>, VFSError> {
        let removed = match &mut self.get_inode_mut(parent)?.data {
            Node::Directory(map) => map.remove(name),
            _ => return Err(VFSError::DirectoryExpected),
        };
        if let Some(child) = removed {
            self.inode_decref(child)?;
        }
        Ok(removed)
    }

    /// Remove every child of a directory
    pub(crate) fn clear_directory(&mut self, dir: INodeNum) -> Result<(), VFSError> {
        let removed = match &mut self.get_inode_mut(dir)?.data {
            Node::Directory(map) => std::mem::take(map),
            _ => return Err(VFSError::DirectoryExpected),
        };
        for child in removed.values() {
            self.inode_decref(*child)?;
        }
        Ok(())
    }

    /// Replace attributes, keeping the link count we maintain
    pub(crate) fn set_stat(&mut self, num: INodeNum, stat: &Stat) -> Result<(), VFSError> {
        let inode = self.get_inode_mut(num)?;
        let st_nlink = inode.stat.st_nlink;
        inode.stat = Stat {
            st_nlink,
            ..stat.clone()
        };
        inode.implied = false;
        Ok(())
    }

    fn alloc_child_directory(
        &mut self,
        parent: INodeNum,
        name: &OsStr,
        stat: Stat,
    ) -> Result<INodeNum, VFSError> {
        let num = self.put_inode(INode {
            stat: Stat { st_nlink: 0, ..stat },
            data: Node::Directory(BTreeMap::new()),
            linked: false,
            implied: true,
        });
        self.add_child_to_directory(parent, name, num)?;
        Ok(num)
    }

    fn resolve_or_create_dir(&mut self, parts: &[&OsStr]) -> Result<INodeNum, VFSError> {
        let mut dir = Filesystem::root();
        for part in parts {
            dir = match self.fs.lookup(dir, part) {
                Ok(child) if self.fs.is_directory(child)? => child,
                Ok(_) => return Err(VFSError::PlaceholderConflict),
                Err(VFSError::NotFound) => {
                    self.alloc_child_directory(dir, part, Stat::placeholder_dir())?
                }
                Err(other) => return Err(other),
            };
        }
        Ok(dir)
    }

    fn resolve_or_create_parent<'p>(
        &mut self,
        path: &'p Path,
    ) -> Result<(INodeNum, &'p OsStr), VFSError> {
        let parts = path_components(path)?;
        match parts.split_last() {
            None => Err(VFSError::NotFound),
            Some((name, parents)) => Ok((self.resolve_or_create_dir(parents)?, name)),
        }
    }

    /// Describe a directory, creating it or updating a placeholder
    pub fn write_directory_metadata(&mut self, path: &Path, stat: Stat) -> Result<(), VFSError> {
        let parts = path_components(path)?;
        let num = self.resolve_or_create_dir(&parts)?;
        self.set_stat(num, &stat)
    }

    fn write_node(
        &mut self,
        path: &Path,
        stat: Stat,
        data: Node,
    ) -> Result<INodeNum, VFSError> {
        let (dir, name) = self.resolve_or_create_parent(path)?;
        if self.fs.lookup(dir, name).is_ok() {
            return Err(VFSError::PlaceholderConflict);
        }
        let num = self.put_inode(INode {
            stat: Stat { st_nlink: 0, ..stat },
            data,
            linked: false,
            implied: false,
        });
        self.add_child_to_directory(dir, name, num)?;
        Ok(num)
    }

    pub fn write_file(
        &mut self,
        path: &Path,
        stat: Stat,
        data: FileData,
    ) -> Result<INodeNum, VFSError> {
        self.write_node(path, stat, Node::File(data))
    }

    pub fn write_symlink(
        &mut self,
        path: &Path,
        stat: Stat,
        link_to: &OsStr,
    ) -> Result<INodeNum, VFSError> {
        self.write_node(path, stat, Node::SymbolicLink(link_to.to_os_string()))
    }

    /// Devices, fifos and sockets, whose kind lives only in `st_mode`
    pub fn write_special(&mut self, path: &Path, stat: Stat) -> Result<INodeNum, VFSError> {
        self.write_node(path, stat, Node::Special)
    }

    pub fn write_hardlink(&mut self, path: &Path, link_to: &Path) -> Result<(), VFSError> {
        let target = self.fs.lookup_literal(link_to)?;
        if self.fs.is_directory(target)? {
            return Err(VFSError::FileExpected);
        }
        let (dir, name) = self.resolve_or_create_parent(path)?;
        if self.fs.lookup(dir, name).is_ok() {
            return Err(VFSError::PlaceholderConflict);
        }
        self.get_inode_mut(target)?.linked = true;
        self.add_child_to_directory(dir, name, target)
    }
}
