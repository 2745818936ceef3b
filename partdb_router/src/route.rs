//! Routing of rows through a partition tree.
//!
//! Rows are passed as a value slice and a parallel null-flag slice, both laid out in the
//! partitioned table's attribute order. The value in a slot flagged null is never inspected.

use partdb_catalog::{
    AttributeMap, Datum, NodeHandle, PartitionTree, TreeRule,
    interface::{PartitionRule, RepoCollection},
};
use partdb_id::{AttrNumber, TableId};
use std::collections::BTreeSet;

use crate::access_methods::PartitionAccessMethods;
use crate::select::{has_null_key, select_rule};
use crate::Result;

/// The physical table holding the row, descending from the root one level at a time.
///
/// Returns `None` if some level has neither a matching rule nor a default rule. Failing at a
/// lower level does not fall back to a default rule further up.
pub fn route(
    tree: &PartitionTree,
    values: &[Datum],
    nulls: &[bool],
    methods: &mut PartitionAccessMethods,
) -> Result<Option<TableId>> {
    let mut node = tree.root_node();
    loop {
        let Some(rule) = select_rule(tree, node, values, nulls, methods)? else {
            return Ok(None);
        };
        match rule.child {
            Some(child) => node = tree.node(child),
            None => return Ok(rule.rule.child_table),
        }
    }
}

/// Every physical table that may hold rows with these key values.
///
/// Descends like [`route`], except that at a level where a key column is null every rule of
/// the level (the default included) is followed instead of only the matching one.
pub fn route_all(
    tree: &PartitionTree,
    values: &[Datum],
    nulls: &[bool],
    methods: &mut PartitionAccessMethods,
) -> Result<BTreeSet<TableId>> {
    let mut out = BTreeSet::new();
    let mut pending = methods.take_scratch();
    pending.push(tree.root());

    let mut follow = |rule: &TreeRule, pending: &mut Vec<NodeHandle>| match rule.child {
        Some(child) => pending.push(child),
        None => out.extend(rule.rule.child_table),
    };

    while let Some(handle) = pending.pop() {
        let node = tree.node(handle);
        if has_null_key(node, values, nulls)? {
            for rule in node.all_rules() {
                follow(rule, &mut pending);
            }
        } else if let Some(rule) = select_rule(tree, node, values, nulls, methods)? {
            follow(rule, &mut pending);
        }
    }

    methods.return_scratch(pending);
    Ok(out)
}

/// The rule matching the row at the root level of `tree`, default included, without
/// descending further.
pub fn route_one_level<'t>(
    tree: &'t PartitionTree,
    values: &[Datum],
    nulls: &[bool],
    methods: &mut PartitionAccessMethods,
) -> Result<Option<&'t PartitionRule>> {
    route_one_level_at(tree, tree.root(), values, nulls, methods)
}

/// As [`route_one_level`], at the level held by `handle`.
pub fn route_one_level_at<'t>(
    tree: &'t PartitionTree,
    handle: NodeHandle,
    values: &[Datum],
    nulls: &[bool],
    methods: &mut PartitionAccessMethods,
) -> Result<Option<&'t PartitionRule>> {
    Ok(select_rule(tree, tree.node(handle), values, nulls, methods)?.map(|r| &r.rule))
}

/// The non-default rule of `handle` at 1-based position `rank` in ruleord order. Negative ranks
/// count from the last rule. Rank 0 and ranks beyond the number of rules select nothing.
pub fn select_by_rank(tree: &PartitionTree, handle: NodeHandle, rank: i32) -> Option<&TreeRule> {
    let rules = &tree.node(handle).rules;
    let index = match rank {
        0 => return None,
        r if r > 0 => usize::try_from(r - 1).ok()?,
        r => rules
            .len()
            .checked_sub(usize::try_from(r.unsigned_abs()).ok()?)?,
    };
    rules.get(index)
}

/// Lays a row of a part out in the attribute order of its partitioned table.
///
/// `map` translates part attribute numbers into table attribute numbers. Table columns with no
/// part counterpart come back null.
pub fn align_row(
    map: &AttributeMap,
    values: &[Datum],
    nulls: &[bool],
    table_natts: usize,
) -> (Vec<Datum>, Vec<bool>) {
    let aligned = map.map_row(values, table_natts);
    let aligned_nulls = (0..table_natts)
        .map(|i| {
            i16::try_from(i + 1)
                .ok()
                .and_then(|attnum| map.to_src(AttrNumber::new(attnum)))
                .and_then(|src| src.as_index())
                .map_or(true, |src| nulls.get(src).copied().unwrap_or(false))
        })
        .collect();
    (aligned, aligned_nulls)
}

/// Which routing operation [`route_row`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingMode {
    /// [`route`]: exactly one physical table or none.
    #[default]
    Single,
    /// [`route_all`]: every physical table that may hold the key.
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoutingOptions {
    pub mode: RoutingMode,
    /// Read template levels instead of the concrete tree.
    pub include_templates: bool,
}

/// Reads the tree to route rows of `table` into.
pub async fn build_routing_tree(
    repos: &mut dyn RepoCollection,
    table: TableId,
    options: &RoutingOptions,
) -> Result<Option<PartitionTree>> {
    Ok(partdb_catalog::build_tree(repos, table, 0, None, options.include_templates, true).await?)
}

/// Routes one row according to `mode`.
pub fn route_row(
    tree: &PartitionTree,
    values: &[Datum],
    nulls: &[bool],
    methods: &mut PartitionAccessMethods,
    mode: RoutingMode,
) -> Result<BTreeSet<TableId>> {
    match mode {
        RoutingMode::Single => Ok(route(tree, values, nulls, methods)?.into_iter().collect()),
        RoutingMode::All => route_all(tree, values, nulls, methods),
    }
}
