use dashmap::DashMap;
use layerfs_protocol::Qid;
use std::sync::atomic::{AtomicU64, Ordering};

/// Index of one subtree mounted under a route
pub type SubtreeId = u32;

/// Server-wide QID allocator
///
/// Subtrees number their own objects independently, so the same local QID
/// can show up in two of them. Each `(subtree, local qid)` pair is given a
/// global path the first time it is seen, and keeps it for the life of the
/// server. Path 0 is left for the route root.
#[derive(Debug)]
pub struct QidSpace {
    next_path: AtomicU64,
    bindings: DashMap<(SubtreeId, Qid), Qid>,
}

impl Default for QidSpace {
    fn default() -> Self {
        QidSpace::new()
    }
}

impl QidSpace {
    pub fn new() -> Self {
        QidSpace {
            next_path: AtomicU64::new(1),
            bindings: DashMap::new(),
        }
    }

    /// Translate a local QID, allocating a global one if needed
    pub fn global(&self, subtree: SubtreeId, local: Qid) -> Qid {
        *self
            .bindings
            .entry((subtree, local))
            .or_insert_with(|| Qid {
                ty: local.ty,
                version: local.version,
                path: self.next_path.fetch_add(1, Ordering::Relaxed),
            })
            .value()
    }

    /// Number of distinct QIDs handed out so far
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
