//! The in-memory partition tree of one partitioned table.
//!
//! A [`PartitionTree`] is read from the catalog in one go by [`build_tree`] and never mutated
//! afterwards. DDL changes the catalog and callers build a new tree; every tree carries a fresh
//! [`TreeSnapshotId`] so that state cached against an older tree can be detected as stale.
//!
//! Nodes live in an arena owned by the tree and refer to each other by [`NodeHandle`].

use hashbrown::HashMap;
use partdb_id::{AttrNumber, RuleId, TableId, TreeSnapshotId};
use std::collections::VecDeque;
use thiserror::Error;

use crate::interface::{PartitionLevel, PartitionRule, RepoCollection};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error("partition catalog is inconsistent for relation {table}: {detail}")]
    CatalogConsistency { table: TableId, detail: String },

    #[error(transparent)]
    Catalog(#[from] crate::interface::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Index of a node within its [`PartitionTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(usize);

impl NodeHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A rule together with the node holding the next level below it, if there is one.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeRule {
    pub rule: PartitionRule,
    pub child: Option<NodeHandle>,
}

/// One level of partitioning under one parent rule.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionNode {
    pub level: PartitionLevel,
    /// Non-default rules in ruleord order.
    pub rules: Vec<TreeRule>,
    pub default_rule: Option<TreeRule>,
    pub parent: Option<NodeHandle>,
}

impl PartitionNode {
    /// Non-default rules followed by the default rule.
    pub fn all_rules(&self) -> impl Iterator<Item = &TreeRule> {
        self.rules.iter().chain(self.default_rule.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionTree {
    snapshot: TreeSnapshotId,
    table_id: TableId,
    nodes: Vec<PartitionNode>,
}

impl PartitionTree {
    pub fn snapshot(&self) -> TreeSnapshotId {
        self.snapshot
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn root(&self) -> NodeHandle {
        NodeHandle(0)
    }

    pub fn root_node(&self) -> &PartitionNode {
        &self.nodes[0]
    }

    /// Panics if `handle` was taken from a different tree.
    pub fn node(&self, handle: NodeHandle) -> &PartitionNode {
        &self.nodes[handle.0]
    }

    pub fn get(&self, handle: NodeHandle) -> Option<&PartitionNode> {
        self.nodes.get(handle.0)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeHandle, &PartitionNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeHandle(i), n))
    }

    /// Tables of every rule that has no level below it.
    pub fn leaf_table_ids(&self) -> Vec<TableId> {
        self.nodes
            .iter()
            .flat_map(|n| n.all_rules())
            .filter(|r| r.child.is_none())
            .filter_map(|r| r.rule.child_table)
            .collect()
    }

    /// Tables of every rule in the tree, leaves and intermediate parts alike.
    pub fn all_table_ids(&self) -> Vec<TableId> {
        self.nodes
            .iter()
            .flat_map(|n| n.all_rules())
            .filter_map(|r| r.rule.child_table)
            .collect()
    }

    /// Number of partitioning levels below and including the root.
    pub fn level_count(&self) -> usize {
        let mut depths: Vec<_> = self.nodes.iter().map(|n| n.level.depth).collect();
        depths.sort_unstable();
        depths.dedup();
        depths.len()
    }

    /// Whether the rules of `handle` have no further level below them.
    pub fn is_leaf_node(&self, handle: NodeHandle) -> bool {
        self.node(handle).all_rules().all(|r| r.child.is_none())
    }

    /// The rule whose physical table is `table`.
    pub fn rule_for_table(&self, table: TableId) -> Option<(NodeHandle, &TreeRule)> {
        self.nodes().find_map(|(h, n)| {
            n.all_rules()
                .find(|r| r.rule.child_table == Some(table))
                .map(|r| (h, r))
        })
    }

    /// Every key column used at any level, ascending.
    pub fn key_attributes(&self) -> Vec<AttrNumber> {
        let mut attrs: Vec<_> = self
            .nodes
            .iter()
            .flat_map(|n| n.level.key_attrs.iter().copied())
            .collect();
        attrs.sort_unstable();
        attrs.dedup();
        attrs
    }
}

/// Reads the partition tree of `table` starting at `depth`.
///
/// Only rules under `parent` are read at `depth` and the levels below are fetched for each of
/// them. With `include_subtree` false, every rule of the level at `depth` is read regardless of
/// parent and nothing below it; the root node then holds the default rule of the first parent
/// only. Returns `None` if `table` has no level at `depth`.
pub async fn build_tree(
    repos: &mut dyn RepoCollection,
    table: TableId,
    depth: i16,
    parent: Option<RuleId>,
    include_templates: bool,
    include_subtree: bool,
) -> Result<Option<PartitionTree>> {
    let mut levels = LevelLookup {
        table,
        include_templates,
        cache: HashMap::new(),
    };

    let Some(root_level) = levels.get(repos, depth).await? else {
        return Ok(None);
    };

    let mut nodes = vec![PartitionNode {
        level: root_level,
        rules: vec![],
        default_rule: None,
        parent: None,
    }];
    let mut pending = VecDeque::from([(NodeHandle(0), parent)]);

    while let Some((handle, parent_rule)) = pending.pop_front() {
        let (level_id, level_depth) = {
            let level = &nodes[handle.0].level;
            (level.id, level.depth)
        };

        let (rules, child_level) = if include_subtree {
            let rules = repos.rules().list_by_level(level_id, parent_rule).await?;
            let child_level = match level_depth.checked_add(1) {
                Some(d) => levels.get(repos, d).await?,
                None => None,
            };
            (rules, child_level)
        } else {
            (repos.rules().list_all_by_level(level_id).await?, None)
        };

        for rule in rules {
            let child = match &child_level {
                Some(level) => {
                    let child = NodeHandle(nodes.len());
                    nodes.push(PartitionNode {
                        level: level.clone(),
                        rules: vec![],
                        default_rule: None,
                        parent: Some(handle),
                    });
                    pending.push_back((child, Some(rule.id)));
                    Some(child)
                }
                None => None,
            };

            let node = &mut nodes[handle.0];
            if rule.is_default {
                if let Some(existing) = &node.default_rule {
                    if existing.rule.parent_rule != rule.parent_rule {
                        // only reachable when reading a whole level across parents
                        continue;
                    }
                    return Err(Error::CatalogConsistency {
                        table,
                        detail: format!(
                            "default rules {} and {} share partition level {}",
                            existing.rule.id, rule.id, level_id
                        ),
                    });
                }
                node.default_rule = Some(TreeRule { rule, child });
            } else {
                node.rules.push(TreeRule { rule, child });
            }
        }
    }

    Ok(Some(PartitionTree {
        snapshot: TreeSnapshotId::new(),
        table_id: table,
        nodes,
    }))
}

/// Level rows of one table, read at most once per depth.
#[derive(Debug)]
struct LevelLookup {
    table: TableId,
    include_templates: bool,
    cache: HashMap<i16, Option<PartitionLevel>>,
}

impl LevelLookup {
    async fn get(
        &mut self,
        repos: &mut dyn RepoCollection,
        depth: i16,
    ) -> Result<Option<PartitionLevel>> {
        if let Some(level) = self.cache.get(&depth) {
            return Ok(level.clone());
        }

        let mut rows = repos
            .levels()
            .list_by_table_depth(self.table, depth, self.include_templates)
            .await?;
        if rows.len() > 1 {
            return Err(Error::CatalogConsistency {
                table: self.table,
                detail: format!(
                    "{} partition levels at depth {depth} (template: {})",
                    rows.len(),
                    self.include_templates
                ),
            });
        }

        let level = rows.pop();
        self.cache.insert(depth, level.clone());
        Ok(level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datum::{DataType, Datum};
    use crate::interface::{
        Attribute, Catalog, NewPartitionLevel, NewPartitionRule, PartitionKind, RangeBound,
        RuleBound,
    };
    use crate::mem::MemCatalog;
    use partdb_id::{LevelId, OpClassId};
    use pretty_assertions::assert_eq;

    async fn create_level(
        repos: &mut dyn RepoCollection,
        table: TableId,
        depth: i16,
        kind: PartitionKind,
        key: i16,
    ) -> LevelId {
        repos
            .levels()
            .create(NewPartitionLevel {
                table_id: table,
                kind,
                depth,
                is_template: false,
                key_attrs: vec![AttrNumber::new(key)],
                opclasses: vec![OpClassId::new(1)],
            })
            .await
            .unwrap()
            .id
    }

    async fn create_part(repos: &mut dyn RepoCollection, name: &str) -> TableId {
        repos
            .relations()
            .create(name, vec![
                Attribute::new(1, "id", DataType::Int),
                Attribute::new(2, "region", DataType::Text),
            ])
            .await
            .unwrap()
            .id
    }

    fn range(start: i64, end: i64) -> RuleBound {
        RuleBound::Range {
            start: Some(RangeBound::inclusive(vec![Datum::Int(start)])),
            end: Some(RangeBound::exclusive(vec![Datum::Int(end)])),
        }
    }

    /// sales: RANGE(id) with two ranges, each LIST(region) with one value and a default.
    async fn two_level_table(repos: &mut dyn RepoCollection) -> TableId {
        let table = create_part(repos, "sales").await;
        let top = create_level(repos, table, 0, PartitionKind::Range, 1).await;
        let sub = create_level(repos, table, 1, PartitionKind::List, 2).await;

        // created out of ruleord order on purpose
        for (ord, start) in [(2_i16, 10_i64), (1, 0)] {
            let part = create_part(repos, &format!("sales_{ord}")).await;
            let rule = repos
                .rules()
                .create(NewPartitionRule::new(top, None, Some(part), ord, range(start, start + 10)))
                .await
                .unwrap();

            let east = create_part(repos, &format!("sales_{ord}_east")).await;
            repos
                .rules()
                .create(NewPartitionRule::new(
                    sub,
                    Some(rule.id),
                    Some(east),
                    1,
                    RuleBound::List(vec![vec![Datum::from("east")]]),
                ))
                .await
                .unwrap();
            let other = create_part(repos, &format!("sales_{ord}_other")).await;
            repos
                .rules()
                .create(NewPartitionRule::default_rule(sub, Some(rule.id), Some(other)))
                .await
                .unwrap();
        }
        table
    }

    #[tokio::test]
    async fn builds_full_tree() {
        let catalog = MemCatalog::new();
        let mut repos = catalog.repositories().await;
        let table = two_level_table(repos.as_mut()).await;

        let tree = build_tree(repos.as_mut(), table, 0, None, false, true)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(tree.table_id(), table);
        assert_eq!(tree.level_count(), 2);
        let root = tree.root_node();
        assert_eq!(
            root.rules.iter().map(|r| r.rule.ruleord).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(root.default_rule.is_none());
        assert!(!tree.is_leaf_node(tree.root()));

        let first = root.rules[0].child.unwrap();
        let sub = tree.node(first);
        assert_eq!(sub.parent, Some(tree.root()));
        assert_eq!(sub.level.depth, 1);
        assert_eq!(sub.rules.len(), 1);
        assert!(sub.default_rule.is_some());
        assert!(tree.is_leaf_node(first));
        assert!(sub.all_rules().all(|r| r.rule.parent_rule == Some(root.rules[0].rule.id)));

        assert_eq!(tree.leaf_table_ids().len(), 4);
        assert_eq!(tree.all_table_ids().len(), 6);
        assert_eq!(tree.key_attributes(), vec![AttrNumber::new(1), AttrNumber::new(2)]);

        let east = repos
            .relations()
            .get_by_name("sales_2_east")
            .await
            .unwrap()
            .unwrap();
        let (handle, rule) = tree.rule_for_table(east.id).unwrap();
        assert_eq!(rule.rule.name, None);
        assert_eq!(tree.node(handle).parent, Some(tree.root()));
    }

    #[tokio::test]
    async fn single_level_without_subtree() {
        let catalog = MemCatalog::new();
        let mut repos = catalog.repositories().await;
        let table = two_level_table(repos.as_mut()).await;

        let tree = build_tree(repos.as_mut(), table, 1, None, false, false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tree.level_count(), 1);
        let root = tree.root_node();
        // every LIST rule of the level regardless of parent
        assert_eq!(root.rules.len(), 2);
        assert_ne!(root.rules[0].rule.parent_rule, root.rules[1].rule.parent_rule);
        assert!(root.default_rule.is_some());
        assert!(root.rules.iter().all(|r| r.child.is_none()));
    }

    #[tokio::test]
    async fn unpartitioned_depth() {
        let catalog = MemCatalog::new();
        let mut repos = catalog.repositories().await;
        let table = two_level_table(repos.as_mut()).await;

        assert_eq!(
            build_tree(repos.as_mut(), table, 2, None, false, true)
                .await
                .unwrap(),
            None
        );
        assert_eq!(
            build_tree(repos.as_mut(), table, 0, None, true, true)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn duplicate_level_rows() {
        let catalog = MemCatalog::new();
        let mut repos = catalog.repositories().await;
        let table = create_part(repos.as_mut(), "t").await;
        create_level(repos.as_mut(), table, 0, PartitionKind::Range, 1).await;
        create_level(repos.as_mut(), table, 0, PartitionKind::List, 1).await;

        let err = build_tree(repos.as_mut(), table, 0, None, false, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CatalogConsistency { .. }), "{err}");
    }

    #[tokio::test]
    async fn snapshots_differ_per_read() {
        let catalog = MemCatalog::new();
        let mut repos = catalog.repositories().await;
        let table = two_level_table(repos.as_mut()).await;

        let a = build_tree(repos.as_mut(), table, 0, None, false, true)
            .await
            .unwrap()
            .unwrap();
        let b = build_tree(repos.as_mut(), table, 0, None, false, true)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(a.snapshot(), b.snapshot());
        assert_eq!(a.nodes().count(), b.nodes().count());
    }
}
