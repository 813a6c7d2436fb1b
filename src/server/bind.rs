use crate::{
    errors::VFSError,
    filesystem::vfs::Stat,
    server::{
        node::{File, Walked},
        qid::{QidSpace, SubtreeId},
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use layerfs_protocol::{Dirent, Qid, Rstatfs};
use std::sync::Arc;

/// A node from one subtree, with its QIDs moved into the server-wide space
///
/// Only reads pass through. Mutations are refused here even if the wrapped
/// node would accept them.
pub struct BindNode {
    subtree: SubtreeId,
    inner: Arc<dyn File>,
    qids: Arc<QidSpace>,
}

impl BindNode {
    pub fn new(subtree: SubtreeId, inner: Arc<dyn File>, qids: Arc<QidSpace>) -> Self {
        BindNode {
            subtree,
            inner,
            qids,
        }
    }

    fn global(&self, local: Qid) -> Qid {
        self.qids.global(self.subtree, local)
    }
}

#[async_trait]
impl File for BindNode {
    async fn walk(&self, names: &[String]) -> Result<Walked, VFSError> {
        let walked = self.inner.walk(names).await?;
        let qids = walked.qids.into_iter().map(|q| self.global(q)).collect();
        Ok(Walked {
            qids,
            file: walked.file.map(|file| {
                Arc::new(BindNode::new(self.subtree, file, self.qids.clone())) as Arc<dyn File>
            }),
        })
    }

    async fn get_attr(&self) -> Result<(Qid, Stat), VFSError> {
        let (qid, stat) = self.inner.get_attr().await?;
        Ok((self.global(qid), stat))
    }

    async fn open(&self, flags: u32) -> Result<(Qid, u32), VFSError> {
        let (qid, iounit) = self.inner.open(flags).await?;
        Ok((self.global(qid), iounit))
    }

    async fn read_at(&self, offset: u64, count: u32) -> Result<Bytes, VFSError> {
        self.inner.read_at(offset, count).await
    }

    async fn readdir(&self, offset: u64, count: u32) -> Result<Vec<Dirent>, VFSError> {
        let mut entries = self.inner.readdir(offset, count).await?;
        for entry in &mut entries {
            entry.qid = self.global(entry.qid);
        }
        Ok(entries)
    }

    async fn readlink(&self) -> Result<String, VFSError> {
        self.inner.readlink().await
    }

    async fn statfs(&self) -> Result<Rstatfs, VFSError> {
        self.inner.statfs().await
    }

    async fn close(&self) -> Result<(), VFSError> {
        self.inner.close().await
    }
}
