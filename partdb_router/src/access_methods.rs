use hashbrown::HashMap;
use partdb_catalog::{
    DataType, NodeHandle, PartitionNode, PartitionTree, interface::Relation,
};
use partdb_id::{AttrNumber, TreeSnapshotId};
use std::sync::Arc;
use tracing::debug;

use crate::comparator::{Comparator, ComparatorProvider};
use crate::{Error, Result};

/// Per-batch routing state: the comparators resolved for each partitioning depth of one tree,
/// plus scratch space reused across rows.
///
/// Not meant to be shared between sessions. Handing it a tree other than the one it was last
/// used with discards everything cached so far.
pub struct PartitionAccessMethods {
    provider: Arc<dyn ComparatorProvider>,
    /// Column types of the partitioned table, indexed by attribute number - 1. `None` for
    /// dropped columns.
    attribute_types: Vec<Option<DataType>>,
    snapshot: Option<TreeSnapshotId>,
    comparators: HashMap<i16, Arc<[Comparator]>>,
    scratch: Vec<NodeHandle>,
}

impl std::fmt::Debug for PartitionAccessMethods {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionAccessMethods")
            .field("provider", &self.provider)
            .field("attribute_types", &self.attribute_types)
            .field("snapshot", &self.snapshot)
            .field("cached_depths", &self.comparators.len())
            .finish_non_exhaustive()
    }
}

impl PartitionAccessMethods {
    /// Routing state for rows of `table`, laid out in its attribute order.
    pub fn new(provider: Arc<dyn ComparatorProvider>, table: &Relation) -> Self {
        let width = table
            .attributes
            .iter()
            .filter_map(|a| a.attnum.as_index())
            .max()
            .map_or(0, |i| i + 1);
        let mut attribute_types = vec![None; width];
        for attr in table.live_attributes() {
            if let Some(slot) = attr.attnum.as_index().and_then(|i| attribute_types.get_mut(i)) {
                *slot = Some(attr.data_type);
            }
        }

        Self {
            provider,
            attribute_types,
            snapshot: None,
            comparators: HashMap::new(),
            scratch: vec![],
        }
    }

    /// Drops every cached comparator.
    pub fn invalidate(&mut self) {
        self.snapshot = None;
        self.comparators.clear();
    }

    /// Number of depths with resolved comparators.
    pub fn cached_depths(&self) -> usize {
        self.comparators.len()
    }

    /// The comparators for each key column of `node`, resolved on first use per depth.
    pub(crate) fn comparators(
        &mut self,
        tree: &PartitionTree,
        node: &PartitionNode,
    ) -> Result<Arc<[Comparator]>> {
        if self.snapshot != Some(tree.snapshot()) {
            if self.snapshot.is_some() {
                debug!(
                    old = self.snapshot.map(|s| s.as_u64()),
                    new = tree.snapshot().as_u64(),
                    "partition tree changed, dropping cached comparators"
                );
            }
            self.comparators.clear();
            self.snapshot = Some(tree.snapshot());
        }

        let depth = node.level.depth;
        if let Some(cmps) = self.comparators.get(&depth) {
            return Ok(Arc::clone(cmps));
        }

        let cmps = node
            .level
            .key_attrs
            .iter()
            .zip(&node.level.opclasses)
            .map(|(attnum, opclass)| {
                let data_type = self.attribute_type(*attnum)?;
                self.provider.comparator(*opclass, data_type, data_type)
            })
            .collect::<Result<Arc<[Comparator]>>>()?;
        debug!(depth, columns = cmps.len(), "resolved partition key comparators");

        self.comparators.insert(depth, Arc::clone(&cmps));
        Ok(cmps)
    }

    fn attribute_type(&self, attnum: AttrNumber) -> Result<DataType> {
        attnum
            .as_index()
            .and_then(|i| self.attribute_types.get(i).copied().flatten())
            .ok_or(Error::KeyAttributeOutOfRange {
                attnum,
                width: self.attribute_types.len(),
            })
    }

    pub(crate) fn take_scratch(&mut self) -> Vec<NodeHandle> {
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        scratch
    }

    pub(crate) fn return_scratch(&mut self, scratch: Vec<NodeHandle>) {
        self.scratch = scratch;
    }
}

/// Runs `f` with routing state that is released when `f` returns.
pub fn with_access_methods<T>(
    provider: Arc<dyn ComparatorProvider>,
    table: &Relation,
    f: impl FnOnce(&mut PartitionAccessMethods) -> T,
) -> T {
    let mut methods = PartitionAccessMethods::new(provider, table);
    f(&mut methods)
}
