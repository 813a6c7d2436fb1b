use crate::{
    errors::VFSError,
    filesystem::vfs::{mode, Stat, BLOCK_SIZE},
    server::{
        bind::BindNode,
        node::{pack_dirents, synthetic_dir_stat, File, Walked},
        qid::QidSpace,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use layerfs_protocol::{qid_type, Dirent, Qid};
use std::{
    collections::BTreeMap,
    sync::{Arc, Weak},
};

/// Read-only directory whose children are independent subtrees
///
/// The route itself always has QID path 0. Each child is wrapped in a
/// [BindNode] with its own subtree number, so QIDs from different children
/// never collide.
pub struct RouteNode {
    this: Weak<RouteNode>,
    children: BTreeMap<String, Arc<BindNode>>,
}

impl RouteNode {
    pub fn new<I>(children: I, qids: Arc<QidSpace>) -> Arc<Self>
    where
        I: IntoIterator<Item = (String, Arc<dyn File>)>,
    {
        let sorted: BTreeMap<String, Arc<dyn File>> = children.into_iter().collect();
        let children = sorted
            .into_iter()
            .enumerate()
            .map(|(index, (name, file))| {
                let subtree = index as u32 + 1;
                (name, Arc::new(BindNode::new(subtree, file, qids.clone())))
            })
            .collect();
        Arc::new_cyclic(|this| RouteNode {
            this: this.clone(),
            children,
        })
    }

    pub fn qid() -> Qid {
        Qid {
            ty: qid_type::DIR,
            version: 0,
            path: 0,
        }
    }

    fn this(&self) -> Result<Arc<dyn File>, VFSError> {
        match self.this.upgrade() {
            Some(this) => Ok(this as Arc<dyn File>),
            None => Err(VFSError::UnallocNode),
        }
    }

    pub fn child_names(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }
}

#[async_trait]
impl File for RouteNode {
    async fn walk(&self, names: &[String]) -> Result<Walked, VFSError> {
        let (first, rest) = match names.split_first() {
            Some(split) => split,
            None => return Ok(Walked::complete(Vec::new(), self.this()?)),
        };
        let child: Arc<dyn File> = match first.as_str() {
            "." | ".." => self.this()?,
            name => match self.children.get(name) {
                Some(child) => child.clone() as Arc<dyn File>,
                None => return Err(VFSError::NotFound),
            },
        };
        let (first_qid, _) = child.get_attr().await?;
        if rest.is_empty() {
            return Ok(Walked::complete(vec![first_qid], child));
        }
        let mut qids = vec![first_qid];
        match child.walk(rest).await {
            Ok(walked) => {
                qids.extend(walked.qids);
                Ok(Walked {
                    qids,
                    file: walked.file,
                })
            }
            Err(_) => Ok(Walked::partial(qids)),
        }
    }

    async fn get_attr(&self) -> Result<(Qid, Stat), VFSError> {
        Ok((RouteNode::qid(), synthetic_dir_stat(self.children.len())))
    }

    async fn open(&self, _flags: u32) -> Result<(Qid, u32), VFSError> {
        Ok((RouteNode::qid(), BLOCK_SIZE as u32))
    }

    async fn read_at(&self, _offset: u64, _count: u32) -> Result<Bytes, VFSError> {
        Err(VFSError::FileExpected)
    }

    async fn readdir(&self, offset: u64, count: u32) -> Result<Vec<Dirent>, VFSError> {
        let mut entries = Vec::new();
        for name in [".", ".."] {
            entries.push((name.to_owned(), RouteNode::qid(), mode::DT_DIR));
        }
        for (name, child) in &self.children {
            let (qid, stat) = child.get_attr().await?;
            let ty = if stat.is_dir() {
                mode::DT_DIR
            } else {
                mode::DT_REG
            };
            entries.push((name.clone(), qid, ty));
        }
        let dirents = entries
            .into_iter()
            .enumerate()
            .skip(offset as usize)
            .map(|(index, (name, qid, ty))| Dirent {
                qid,
                offset: index as u64 + 1,
                ty,
                name,
            });
        Ok(pack_dirents(dirents, count))
    }

    async fn readlink(&self) -> Result<String, VFSError> {
        Err(VFSError::LinkExpected)
    }
}
