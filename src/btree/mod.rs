//! Disk-resident B+ tree index
//!
//! An ordered map from key bytes to value bytes, one node per page, built on
//! the buffer pool. In practice the values are 10-byte row pointers.
//!
//! - Keys are compared with a caller-supplied comparator (lexicographic by
//!   default) and are unique; inserting an existing key replaces its value
//! - Leaves are linked left to right for range scans
//! - The local id of the root lives in the metadata page of the index file
//!
//! A single tree-level `RwLock` serializes structural changes; traversal pins
//! one page at a time.

mod error;
mod iter;
mod node;

pub use error::{BPlusTreeError, BPlusTreeResult};
pub use iter::TreeIter;
pub use node::{MAX_KEY_LEN, MAX_KEYS, MAX_VALUE_LEN, MIN_KEYS, NODE_HEADER_SIZE, Node};

use std::cmp::Ordering;
use std::sync::{Arc, RwLock};

use log::debug;

use crate::file::{BufferPool, FileId, PageId, PageType, global_page_id, split_page_id};
use crate::sync::{read, write};

/// Key ordering used by a tree
pub type Comparator = Arc<dyn Fn(&[u8], &[u8]) -> Ordering + Send + Sync>;

/// Internal node on the way down plus the child index that was followed
type Path = Vec<(PageId, usize)>;

pub(crate) struct TreeState {
    root: Option<PageId>,
}

pub struct BPlusTree {
    file_id: FileId,
    pool: Arc<BufferPool>,
    cmp: Comparator,
    state: RwLock<TreeState>,
}

impl BPlusTree {
    /// Open the tree stored in an already opened index file, creating an
    /// empty one if the file is new
    pub fn open(pool: Arc<BufferPool>, file_id: FileId) -> BPlusTreeResult<Self> {
        Self::with_comparator(pool, file_id, Arc::new(|a: &[u8], b: &[u8]| a.cmp(b)))
    }

    pub fn with_comparator(
        pool: Arc<BufferPool>,
        file_id: FileId,
        cmp: Comparator,
    ) -> BPlusTreeResult<Self> {
        let disk = pool.disk();
        if disk.next_local_page(file_id)? == 0 {
            disk.write_root_id(file_id, 0)?;
        }

        let local_root = disk.read_root_id(file_id)?;
        let root = (local_root > 0).then(|| global_page_id(file_id, local_root as u32));
        debug!("opened index file {} with root {:?}", file_id, root);

        Ok(Self {
            file_id,
            pool,
            cmp,
            state: RwLock::new(TreeState { root }),
        })
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn root(&self) -> Option<PageId> {
        read(&self.state).root
    }

    pub fn is_empty(&self) -> bool {
        self.root().is_none()
    }

    // ========== Node I/O ==========

    fn load(&self, page_id: PageId) -> BPlusTreeResult<Node> {
        let guard = self.pool.fetch_page(page_id)?;
        let page = guard.read();
        Node::deserialize(self.file_id, page_id, page.data())
    }

    fn store(&self, node: &Node) -> BPlusTreeResult<()> {
        let guard = self.pool.fetch_page(node.page_id)?;
        let mut page = guard.write();
        node.serialize(page.data_mut())?;
        page.set_page_type(PageType::BPlusNode);
        Ok(())
    }

    fn allocate(&self, is_leaf: bool) -> BPlusTreeResult<Node> {
        let page_id = self.pool.new_page(self.file_id, PageType::BPlusNode)?.id();
        Ok(if is_leaf {
            Node::new_leaf(page_id)
        } else {
            Node::new_internal(page_id)
        })
    }

    fn set_parent(&self, child: PageId, parent: Option<PageId>) -> BPlusTreeResult<()> {
        let mut node = self.load(child)?;
        if node.parent != parent {
            node.parent = parent;
            self.store(&node)?;
        }
        Ok(())
    }

    fn set_root(&self, state: &mut TreeState, root: Option<PageId>) -> BPlusTreeResult<()> {
        state.root = root;
        let local = root.map_or(0, |id| split_page_id(id).1 as i64);
        self.pool.disk().write_root_id(self.file_id, local)?;
        debug!("index file {} root is now {:?}", self.file_id, root);
        Ok(())
    }

    // ========== Search ==========

    /// Index of the child to follow: the first key strictly greater than `key`
    fn child_index(&self, node: &Node, key: &[u8]) -> usize {
        node.keys
            .partition_point(|k| (self.cmp)(k, key) != Ordering::Greater)
    }

    fn search_leaf(&self, node: &Node, key: &[u8]) -> Result<usize, usize> {
        node.keys.binary_search_by(|k| (self.cmp)(k, key))
    }

    fn find_leaf(&self, root: PageId, key: &[u8]) -> BPlusTreeResult<(Node, Path)> {
        let mut node = self.load(root)?;
        let mut path = Vec::new();
        while !node.is_leaf {
            let idx = self.child_index(&node, key);
            let child = *node.children.get(idx).ok_or_else(|| {
                BPlusTreeError::InvalidState(format!(
                    "node {:#x} has no child {}",
                    node.page_id, idx
                ))
            })?;
            path.push((node.page_id, idx));
            node = self.load(child)?;
        }
        Ok((node, path))
    }

    /// Look up a key; `None` if absent (including on an empty tree)
    pub fn search(&self, key: &[u8]) -> BPlusTreeResult<Option<Vec<u8>>> {
        let state = read(&self.state);
        let Some(root) = state.root else {
            return Ok(None);
        };
        let (leaf, _) = self.find_leaf(root, key)?;
        Ok(self
            .search_leaf(&leaf, key)
            .ok()
            .map(|i| leaf.values[i].clone()))
    }

    // ========== Insert Operations ==========

    /// Insert or overwrite a key
    pub fn insert(&self, key: &[u8], value: &[u8]) -> BPlusTreeResult<()> {
        if key.len() > MAX_KEY_LEN {
            return Err(BPlusTreeError::KeyTooLarge {
                len: key.len(),
                max: MAX_KEY_LEN,
            });
        }
        if value.len() > MAX_VALUE_LEN {
            return Err(BPlusTreeError::ValueTooLarge {
                len: value.len(),
                max: MAX_VALUE_LEN,
            });
        }

        let mut state = write(&self.state);
        let Some(root) = state.root else {
            let mut leaf = self.allocate(true)?;
            leaf.keys.push(key.to_vec());
            leaf.values.push(value.to_vec());
            self.store(&leaf)?;
            return self.set_root(&mut state, Some(leaf.page_id));
        };

        let (mut leaf, path) = self.find_leaf(root, key)?;
        match self.search_leaf(&leaf, key) {
            Ok(i) => {
                leaf.values[i] = value.to_vec();
                self.store(&leaf)
            }
            Err(i) => {
                leaf.keys.insert(i, key.to_vec());
                leaf.values.insert(i, value.to_vec());
                if leaf.keys.len() > MAX_KEYS {
                    self.split_leaf(&mut state, leaf, path)
                } else {
                    self.store(&leaf)
                }
            }
        }
    }

    /// Move the upper half of an overflowing leaf into a new right sibling
    fn split_leaf(&self, state: &mut TreeState, mut leaf: Node, path: Path) -> BPlusTreeResult<()> {
        let mid = leaf.keys.len() / 2;
        let mut right = self.allocate(true)?;
        right.keys = leaf.keys.split_off(mid);
        right.values = leaf.values.split_off(mid);
        right.next = leaf.next.take();
        right.parent = leaf.parent;
        leaf.next = Some(right.page_id);

        let separator = right.keys[0].clone();
        self.store(&leaf)?;
        self.store(&right)?;
        self.insert_into_parent(state, path, leaf.page_id, separator, right.page_id)
    }

    /// Hook a new right sibling into the parent of `left`
    fn insert_into_parent(
        &self,
        state: &mut TreeState,
        mut path: Path,
        left: PageId,
        separator: Vec<u8>,
        right: PageId,
    ) -> BPlusTreeResult<()> {
        let Some((parent_id, idx)) = path.pop() else {
            let mut root = self.allocate(false)?;
            root.keys.push(separator);
            root.children = vec![left, right];
            self.store(&root)?;
            self.set_parent(left, Some(root.page_id))?;
            self.set_parent(right, Some(root.page_id))?;
            return self.set_root(state, Some(root.page_id));
        };

        let mut parent = self.load(parent_id)?;
        parent.keys.insert(idx, separator);
        parent.children.insert(idx + 1, right);
        if parent.keys.len() > MAX_KEYS {
            self.split_internal(state, parent, path)
        } else {
            self.store(&parent)
        }
    }

    /// Promote the middle key of an overflowing internal node
    fn split_internal(&self, state: &mut TreeState, mut node: Node, path: Path) -> BPlusTreeResult<()> {
        let mid = node.keys.len() / 2;
        let mut right = self.allocate(false)?;
        right.keys = node.keys.split_off(mid + 1);
        let promoted = node.keys.pop().ok_or_else(|| {
            BPlusTreeError::InvalidState("split of an internal node without keys".to_string())
        })?;
        right.children = node.children.split_off(mid + 1);
        right.parent = node.parent;

        self.store(&node)?;
        self.store(&right)?;
        for child in &right.children {
            self.set_parent(*child, Some(right.page_id))?;
        }
        self.insert_into_parent(state, path, node.page_id, promoted, right.page_id)
    }

    // ========== Delete Operations ==========

    /// Remove a key. Returns whether it was present.
    pub fn delete(&self, key: &[u8]) -> BPlusTreeResult<bool> {
        let mut state = write(&self.state);
        let Some(root) = state.root else {
            return Ok(false);
        };

        let (mut leaf, path) = self.find_leaf(root, key)?;
        let Ok(i) = self.search_leaf(&leaf, key) else {
            return Ok(false);
        };
        leaf.keys.remove(i);
        leaf.values.remove(i);
        self.rebalance(&mut state, leaf, path)?;
        Ok(true)
    }

    /// Persist `node` after a removal, fixing an underflow by borrowing from
    /// or merging with a sibling and recursing into the parent
    fn rebalance(&self, state: &mut TreeState, mut node: Node, mut path: Path) -> BPlusTreeResult<()> {
        let Some((parent_id, idx)) = path.pop() else {
            return self.shrink_root(state, node);
        };
        if node.keys.len() >= MIN_KEYS {
            return self.store(&node);
        }

        let mut parent = self.load(parent_id)?;
        let left = match idx {
            0 => None,
            _ => Some(self.load(parent.children[idx - 1])?),
        };
        let right = match parent.children.get(idx + 1) {
            Some(&id) => Some(self.load(id)?),
            None => None,
        };

        match (left, right) {
            (Some(mut left), _) if left.keys.len() > MIN_KEYS => {
                self.borrow_from_left(&mut node, &mut left, &mut parent, idx)?;
                self.store(&left)?;
                self.store(&node)?;
                self.store(&parent)
            }
            (_, Some(mut right)) if right.keys.len() > MIN_KEYS => {
                self.borrow_from_right(&mut node, &mut right, &mut parent, idx)?;
                self.store(&right)?;
                self.store(&node)?;
                self.store(&parent)
            }
            (Some(left), _) => {
                self.merge(left, node, &mut parent, idx - 1)?;
                self.rebalance(state, parent, path)
            }
            (None, Some(right)) => {
                self.merge(node, right, &mut parent, idx)?;
                self.rebalance(state, parent, path)
            }
            (None, None) => Err(BPlusTreeError::InvalidState(format!(
                "node {:#x} has no siblings",
                node.page_id
            ))),
        }
    }

    /// Root-level cleanup: an empty leaf empties the tree, an internal root
    /// with a single child hands the root to that child
    fn shrink_root(&self, state: &mut TreeState, root: Node) -> BPlusTreeResult<()> {
        if root.is_leaf && root.keys.is_empty() {
            self.store(&root)?;
            return self.set_root(state, None);
        }
        if !root.is_leaf && root.keys.is_empty() {
            let child = root.children[0];
            self.set_parent(child, None)?;
            return self.set_root(state, Some(child));
        }
        self.store(&root)
    }

    fn borrow_from_left(
        &self,
        node: &mut Node,
        left: &mut Node,
        parent: &mut Node,
        idx: usize,
    ) -> BPlusTreeResult<()> {
        let missing = || BPlusTreeError::InvalidState("left sibling is empty".to_string());
        if node.is_leaf {
            let key = left.keys.pop().ok_or_else(missing)?;
            let value = left.values.pop().ok_or_else(missing)?;
            node.keys.insert(0, key);
            node.values.insert(0, value);
            parent.keys[idx - 1] = node.keys[0].clone();
        } else {
            let key = left.keys.pop().ok_or_else(missing)?;
            let child = left.children.pop().ok_or_else(missing)?;
            let separator = std::mem::replace(&mut parent.keys[idx - 1], key);
            node.keys.insert(0, separator);
            node.children.insert(0, child);
            self.set_parent(child, Some(node.page_id))?;
        }
        Ok(())
    }

    fn borrow_from_right(
        &self,
        node: &mut Node,
        right: &mut Node,
        parent: &mut Node,
        idx: usize,
    ) -> BPlusTreeResult<()> {
        if node.is_leaf {
            node.keys.push(right.keys.remove(0));
            node.values.push(right.values.remove(0));
            parent.keys[idx] = right.keys[0].clone();
        } else {
            let key = right.keys.remove(0);
            let child = right.children.remove(0);
            let separator = std::mem::replace(&mut parent.keys[idx], key);
            node.keys.push(separator);
            node.children.push(child);
            self.set_parent(child, Some(node.page_id))?;
        }
        Ok(())
    }

    /// Fold `right` into `left` and drop separator `sep` from the parent.
    /// The right page is abandoned; pages are never reused.
    fn merge(&self, mut left: Node, right: Node, parent: &mut Node, sep: usize) -> BPlusTreeResult<()> {
        let separator = parent.keys.remove(sep);
        parent.children.remove(sep + 1);

        if left.is_leaf {
            left.keys.extend(right.keys);
            left.values.extend(right.values);
            left.next = right.next;
        } else {
            left.keys.push(separator);
            left.keys.extend(right.keys);
            for child in &right.children {
                self.set_parent(*child, Some(left.page_id))?;
            }
            left.children.extend(right.children);
        }
        debug!("merged node {:#x} into {:#x}", right.page_id, left.page_id);
        self.store(&left)
    }

    // ========== Iteration ==========

    /// Iterate from the first key `>= target`. The iterator holds the tree's
    /// read lock and one pinned leaf until it is closed or dropped.
    pub fn seek_ge(&self, target: &[u8]) -> BPlusTreeResult<TreeIter<'_>> {
        let state = read(&self.state);
        let Some(root) = state.root else {
            return Ok(TreeIter::empty(self, state));
        };
        let (leaf, _) = self.find_leaf(root, target)?;
        let pos = leaf.keys.partition_point(|k| (self.cmp)(k, target) == Ordering::Less);
        TreeIter::new(self, state, leaf.page_id, pos)
    }

    /// Iterate over every entry in key order
    pub fn iter(&self) -> BPlusTreeResult<TreeIter<'_>> {
        let state = read(&self.state);
        let Some(root) = state.root else {
            return Ok(TreeIter::empty(self, state));
        };
        let mut node = self.load(root)?;
        while !node.is_leaf {
            node = self.load(node.children[0])?;
        }
        TreeIter::new(self, state, node.page_id, 0)
    }

    pub(crate) fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub(crate) fn decode(&self, page_id: PageId, data: &[u8]) -> BPlusTreeResult<Node> {
        Node::deserialize(self.file_id, page_id, data)
    }

    pub(crate) fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        (self.cmp)(a, b)
    }

    /// Number of entries (walks the leaf chain)
    pub fn len(&self) -> BPlusTreeResult<usize> {
        let mut count = 0;
        for entry in self.iter()? {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// Number of levels; 0 for an empty tree
    pub fn height(&self) -> BPlusTreeResult<usize> {
        let state = read(&self.state);
        let Some(root) = state.root else {
            return Ok(0);
        };
        let mut node = self.load(root)?;
        let mut height = 1;
        while !node.is_leaf {
            node = self.load(node.children[0])?;
            height += 1;
        }
        Ok(height)
    }

    /// Whether the persisted root decodes as a node of this tree. A crash can
    /// leave the root id pointing at a page that never reached disk.
    pub fn root_is_valid(&self) -> bool {
        match self.root() {
            None => true,
            Some(root) => self.load(root).is_ok(),
        }
    }

    /// Verify ordering, occupancy, depth, parent and sibling links
    pub fn check_invariants(&self) -> BPlusTreeResult<()> {
        let state = read(&self.state);
        let Some(root) = state.root else {
            return Ok(());
        };
        let mut leaves = Vec::new();
        self.check_subtree(root, None, None, None, true, &mut leaves)?;

        let depth = leaves.first().map(|(_, d)| *d);
        if leaves.iter().any(|(_, d)| Some(*d) != depth) {
            return Err(BPlusTreeError::InvalidState("leaves at different depths".into()));
        }
        for pair in leaves.windows(2) {
            let node = self.load(pair[0].0)?;
            if node.next != Some(pair[1].0) {
                return Err(BPlusTreeError::InvalidState(format!(
                    "leaf {:#x} does not link to {:#x}",
                    pair[0].0, pair[1].0
                )));
            }
        }
        if let Some((last, _)) = leaves.last()
            && self.load(*last)?.next.is_some()
        {
            return Err(BPlusTreeError::InvalidState("last leaf has a sibling".into()));
        }
        Ok(())
    }

    fn check_subtree(
        &self,
        page_id: PageId,
        parent: Option<PageId>,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        is_root: bool,
        leaves: &mut Vec<(PageId, usize)>,
    ) -> BPlusTreeResult<usize> {
        let fail = |msg: String| Err(BPlusTreeError::InvalidState(format!("{:#x}: {}", page_id, msg)));
        let node = self.load(page_id)?;

        if node.parent != parent {
            return fail(format!("parent {:?}, expected {:?}", node.parent, parent));
        }
        if !is_root && (node.keys.len() < MIN_KEYS || node.keys.len() > MAX_KEYS) {
            return fail(format!("{} keys", node.keys.len()));
        }
        if node.keys.windows(2).any(|w| self.compare(&w[0], &w[1]) != Ordering::Less) {
            return fail("keys not strictly ascending".into());
        }
        for key in &node.keys {
            if lower.is_some_and(|lo| self.compare(key, lo) == Ordering::Less)
                || upper.is_some_and(|hi| self.compare(key, hi) != Ordering::Less)
            {
                return fail("key outside the range set by its ancestors".into());
            }
        }

        if node.is_leaf {
            // Depth is counted up by each ancestor on the way back
            leaves.push((page_id, 0));
            return Ok(1);
        }

        if node.children.len() != node.keys.len() + 1 {
            return fail(format!(
                "{} children for {} keys",
                node.children.len(),
                node.keys.len()
            ));
        }

        let mut height = None;
        for (i, child) in node.children.iter().enumerate() {
            let lo = if i == 0 { lower } else { Some(node.keys[i - 1].as_slice()) };
            let hi = node.keys.get(i).map(|k| k.as_slice()).or(upper);
            let before = leaves.len();
            let h = self.check_subtree(*child, Some(page_id), lo, hi, false, leaves)?;
            for leaf in &mut leaves[before..] {
                leaf.1 += 1;
            }
            if height.is_some_and(|prev| prev != h) {
                return fail("children of different heights".into());
            }
            height = Some(h);
        }
        Ok(height.unwrap_or(0) + 1)
    }
}
