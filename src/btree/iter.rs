use std::sync::RwLockReadGuard;

use super::error::BPlusTreeResult;
use super::node::Node;
use super::{BPlusTree, TreeState};
use crate::file::{PageGuard, PageId};

/// Forward cursor over the leaf chain.
///
/// Holds the tree's read lock for its whole life so no split or merge can
/// move entries underneath it. The current leaf stays pinned.
pub struct TreeIter<'a> {
    tree: &'a BPlusTree,
    _state: RwLockReadGuard<'a, TreeState>,
    leaf: Option<(PageGuard<'a>, Node)>,
    pos: usize,
}

impl<'a> TreeIter<'a> {
    pub(super) fn empty(tree: &'a BPlusTree, state: RwLockReadGuard<'a, TreeState>) -> Self {
        Self {
            tree,
            _state: state,
            leaf: None,
            pos: 0,
        }
    }

    pub(super) fn new(
        tree: &'a BPlusTree,
        state: RwLockReadGuard<'a, TreeState>,
        leaf: PageId,
        pos: usize,
    ) -> BPlusTreeResult<Self> {
        let mut iter = Self::empty(tree, state);
        iter.leaf = Some(iter.pin(leaf)?);
        iter.pos = pos;
        Ok(iter)
    }

    fn pin(&self, page_id: PageId) -> BPlusTreeResult<(PageGuard<'a>, Node)> {
        let guard = self.tree.pool().fetch_page(page_id)?;
        let node = self.tree.decode(page_id, guard.read().data())?;
        Ok((guard, node))
    }

    /// Release the pinned leaf and the tree lock
    pub fn close(self) {}

    fn advance(&mut self) -> BPlusTreeResult<Option<(Vec<u8>, Vec<u8>)>> {
        loop {
            let Some((_, node)) = &self.leaf else {
                return Ok(None);
            };
            if let (Some(key), Some(value)) = (node.keys.get(self.pos), node.values.get(self.pos)) {
                self.pos += 1;
                return Ok(Some((key.clone(), value.clone())));
            }

            let next = node.next;
            self.leaf = None;
            self.pos = 0;
            if let Some(next) = next {
                self.leaf = Some(self.pin(next)?);
            }
        }
    }
}

impl Iterator for TreeIter<'_> {
    type Item = BPlusTreeResult<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(entry) => entry.map(Ok),
            Err(e) => {
                self.leaf = None;
                Some(Err(e))
            }
        }
    }
}
