use crate::{
    errors::VFSError,
    filesystem::vfs::{is_dot_name, Filesystem, INode, INodeNum, Node, Stat},
    layer::BackgroundJobs,
};
use std::{
    collections::{BTreeMap, HashMap},
    ffi::{OsStr, OsString},
    os::unix::ffi::OsStrExt,
    path::{Path, PathBuf},
};

pub const WHITEOUT_PREFIX: &str = ".wh.";
pub const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// One decoded layer, ready to be stacked onto the layers below it
pub struct LayerTree {
    pub fs: Filesystem,
    /// Full paths of `.wh.<name>` markers
    pub whiteouts: Vec<PathBuf>,
    /// Full paths of `.wh..wh..opq` markers
    pub opaque_whiteouts: Vec<PathBuf>,
    pub jobs: BackgroundJobs,
}

impl LayerTree {
    pub fn new(fs: Filesystem) -> Self {
        LayerTree {
            fs,
            whiteouts: Vec::new(),
            opaque_whiteouts: Vec::new(),
            jobs: BackgroundJobs::default(),
        }
    }

    /// Record a whiteout marker if this path is one, returning true if so
    pub fn record_whiteout(&mut self, path: &Path) -> bool {
        match path.file_name() {
            Some(name) if name == OPAQUE_WHITEOUT => {
                self.opaque_whiteouts.push(path.to_path_buf());
                true
            }
            Some(name) if name.as_bytes().starts_with(WHITEOUT_PREFIX.as_bytes()) => {
                self.whiteouts.push(path.to_path_buf());
                true
            }
            _ => false,
        }
    }
}

/// Stacks layers lowest first into one composite tree
pub struct Merger {
    fs: Filesystem,
    jobs: BackgroundJobs,
}

impl Default for Merger {
    fn default() -> Self {
        Merger::new()
    }
}

impl Merger {
    pub fn new() -> Self {
        Merger {
            fs: Filesystem::new(),
            jobs: BackgroundJobs::default(),
        }
    }

    pub fn apply(&mut self, layer: LayerTree) -> Result<(), VFSError> {
        let LayerTree {
            fs: upper,
            whiteouts,
            opaque_whiteouts,
            jobs,
        } = layer;
        self.jobs.extend(jobs);
        for path in &whiteouts {
            self.apply_whiteout(path)?;
        }
        for path in &opaque_whiteouts {
            self.apply_opaque_whiteout(path)?;
        }
        let root = Filesystem::root();
        self.describe_dir(&upper, root, root)?;
        let mut imported = HashMap::new();
        self.graft(&upper, root, root, &mut imported)
    }

    pub fn finish(mut self) -> Result<(Filesystem, BackgroundJobs), VFSError> {
        self.fs.finalize()?;
        Ok((self.fs, self.jobs))
    }

    /// Directories the upper layer only implied keep the lower attributes
    fn describe_dir(
        &mut self,
        upper: &Filesystem,
        src: INodeNum,
        dst: INodeNum,
    ) -> Result<(), VFSError> {
        if upper.is_implied(src)? {
            Ok(())
        } else {
            self.fs.writer().set_stat(dst, upper.stat(src)?)
        }
    }

    fn lookup_dir(&self, path: Option<&Path>) -> Option<INodeNum> {
        let num = self.fs.lookup_literal(path.unwrap_or_else(|| Path::new(""))).ok()?;
        match self.fs.is_directory(num) {
            Ok(true) => Some(num),
            _ => None,
        }
    }

    fn apply_whiteout(&mut self, path: &Path) -> Result<(), VFSError> {
        let marker = match path.file_name() {
            Some(name) => name.as_bytes(),
            None => return Ok(()),
        };
        let name = OsStr::from_bytes(&marker[WHITEOUT_PREFIX.len().min(marker.len())..]);
        if name.is_empty() || is_dot_name(name) {
            return Ok(());
        }
        match self.lookup_dir(path.parent()) {
            Some(dir) => {
                if self.fs.writer().unlink(dir, name)?.is_some() {
                    log::debug!("whiteout removed {:?}", path);
                }
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn apply_opaque_whiteout(&mut self, path: &Path) -> Result<(), VFSError> {
        match self.lookup_dir(path.parent()) {
            Some(dir) => {
                log::debug!("opaque whiteout cleared {:?}", path.parent());
                self.fs.writer().clear_directory(dir)
            }
            None => Ok(()),
        }
    }

    fn graft(
        &mut self,
        upper: &Filesystem,
        src_dir: INodeNum,
        dst_dir: INodeNum,
        imported: &mut HashMap<INodeNum, INodeNum>,
    ) -> Result<(), VFSError> {
        let entries: Vec<(OsString, INodeNum)> = upper
            .entries(src_dir)?
            .filter(|(name, _)| !is_dot_name(name))
            .map(|(name, num)| (name.clone(), num))
            .collect();
        for (name, src) in entries {
            let existing = match self.fs.lookup(dst_dir, &name) {
                Ok(dst) => Some(dst),
                Err(VFSError::NotFound) => None,
                Err(other) => return Err(other),
            };
            match existing {
                Some(dst) if upper.is_directory(src)? && self.fs.is_directory(dst)? => {
                    self.describe_dir(upper, src, dst)?;
                    self.graft(upper, src, dst, imported)?;
                }
                _ => {
                    let num = self.import(upper, src, imported)?;
                    self.fs.writer().add_child_to_directory(dst_dir, &name, num)?;
                }
            }
        }
        Ok(())
    }

    fn import(
        &mut self,
        upper: &Filesystem,
        src: INodeNum,
        imported: &mut HashMap<INodeNum, INodeNum>,
    ) -> Result<INodeNum, VFSError> {
        if let Some(num) = imported.get(&src) {
            return Ok(*num);
        }
        let inode = upper.get_inode(src)?;
        let stat = Stat {
            st_nlink: 0,
            ..inode.stat.clone()
        };
        match &inode.data {
            Node::Directory(_) => {
                let num = self.fs.writer().put_inode(INode {
                    stat,
                    data: Node::Directory(BTreeMap::new()),
                    linked: false,
                    implied: inode.implied,
                });
                imported.insert(src, num);
                let children: Vec<(OsString, INodeNum)> = upper
                    .entries(src)?
                    .filter(|(name, _)| !is_dot_name(name))
                    .map(|(name, num)| (name.clone(), num))
                    .collect();
                for (name, child) in children {
                    let child = self.import(upper, child, imported)?;
                    self.fs.writer().add_child_to_directory(num, &name, child)?;
                }
                Ok(num)
            }
            data => {
                let num = self.fs.writer().put_inode(INode {
                    stat,
                    data: data.clone(),
                    linked: inode.linked,
                    implied: false,
                });
                imported.insert(src, num);
                Ok(num)
            }
        }
    }
}

