//! This module implements an in-memory implementation of the partition catalog interface. It can
//! be used for testing or for embedding the partitioning engine without catalog persistence.

use crate::interface::{
    Attribute, Catalog, Constraint, ConstraintRepo, Error, Index, IndexRepo, NewConstraint,
    NewPartitionLevel, NewPartitionRule, PartitionLevel, PartitionLevelRepo, PartitionRule,
    PartitionRuleRepo, Relation, RelationRepo, RepoCollection, Result, Transaction,
    sealed::TransactionFinalize,
};
use async_trait::async_trait;
use partdb_id::{ConstraintId, IndexId, LevelId, RuleId, TableId};
use std::{
    fmt::{Display, Formatter},
    sync::Arc,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

/// In-memory catalog that implements the `RepoCollection` and individual repo traits from
/// the catalog interface.
#[derive(Default)]
pub struct MemCatalog {
    collections: Arc<Mutex<MemCollections>>,
}

impl MemCatalog {
    /// return new initialized `MemCatalog`
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MemCatalog {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemCatalog").finish_non_exhaustive()
    }
}

#[derive(Default, Debug, Clone)]
struct MemCollections {
    /// Ids are drawn from one sequence shared by every kind of row.
    last_id: u32,
    relations: Vec<Relation>,
    levels: Vec<PartitionLevel>,
    rules: Vec<PartitionRule>,
    constraints: Vec<Constraint>,
    indexes: Vec<Index>,
    /// (parent, child) pairs.
    index_inheritance: Vec<(IndexId, IndexId)>,
}

impl MemCollections {
    fn next_id(&mut self) -> u32 {
        self.last_id += 1;
        self.last_id
    }

    fn relation_name(&self, id: TableId) -> String {
        self.relations
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Fails if a non-default sibling of (`level`, `parent`) other than `except` holds `ruleord`.
    fn check_ordinal_free(
        &self,
        level: LevelId,
        parent: Option<RuleId>,
        ruleord: i16,
        except: Option<RuleId>,
    ) -> Result<()> {
        let existing = self.rules.iter().find(|r| {
            r.level_id == level
                && r.parent_rule == parent
                && !r.is_default
                && r.ruleord == ruleord
                && Some(r.id) != except
        });
        match existing {
            Some(r) => Err(Error::OrdinalConflict {
                level,
                parent,
                ruleord,
                existing: r.id,
            }),
            None => Ok(()),
        }
    }

    /// Constraint names are unique per relation. Names of index-backed constraints are also
    /// index names and so must be unique across the catalog.
    fn check_constraint_name_free(
        &self,
        relation: TableId,
        name: &str,
        index_backed: bool,
        except: Option<ConstraintId>,
    ) -> Result<()> {
        let clash = self.constraints.iter().find(|c| {
            Some(c.id) != except
                && c.name == name
                && (c.relation == relation
                    || (index_backed && c.kind.backing_index().is_some()))
        });
        match clash {
            Some(c) => Err(Error::ConstraintNameExists {
                relation: self.relation_name(c.relation),
                name: name.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn siblings(
        &self,
        level: LevelId,
        parent: Option<RuleId>,
    ) -> impl Iterator<Item = &PartitionRule> {
        self.rules
            .iter()
            .filter(move |r| r.level_id == level && r.parent_rule == parent)
    }
}

#[derive(Debug)]
enum MemTxnInner {
    Txn {
        guard: OwnedMutexGuard<MemCollections>,
        stage: Box<MemCollections>,
        finalized: bool,
    },
    NoTxn {
        collections: OwnedMutexGuard<MemCollections>,
    },
}

/// transaction bound to an in-memory catalog.
#[derive(Debug)]
pub struct MemTxn {
    inner: MemTxnInner,
}

impl MemTxn {
    fn stage(&mut self) -> &mut MemCollections {
        match &mut self.inner {
            MemTxnInner::Txn { stage, .. } => stage,
            MemTxnInner::NoTxn { collections } => collections,
        }
    }
}

impl Drop for MemTxn {
    fn drop(&mut self) {
        match self.inner {
            MemTxnInner::Txn { finalized, .. } if !finalized => {
                warn!("Dropping MemTxn w/o finalizing (commit or abort)");
            }
            _ => {}
        }
    }
}

impl Display for MemCatalog {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Memory")
    }
}

#[async_trait]
impl Catalog for MemCatalog {
    async fn start_transaction(&self) -> Result<Box<dyn Transaction>, Error> {
        let guard = Arc::clone(&self.collections).lock_owned().await;
        let stage = Box::new(guard.clone());
        Ok(Box::new(MemTxn {
            inner: MemTxnInner::Txn {
                guard,
                stage,
                finalized: false,
            },
        }))
    }

    async fn repositories(&self) -> Box<dyn RepoCollection> {
        let collections = Arc::clone(&self.collections).lock_owned().await;
        Box::new(MemTxn {
            inner: MemTxnInner::NoTxn { collections },
        })
    }
}

#[async_trait]
impl TransactionFinalize for MemTxn {
    async fn commit_inplace(&mut self) -> Result<(), Error> {
        match &mut self.inner {
            MemTxnInner::Txn {
                guard,
                stage,
                finalized,
            } => {
                debug_assert!(!*finalized);
                **guard = std::mem::take(stage.as_mut());
                *finalized = true;
            }
            MemTxnInner::NoTxn { .. } => {
                unreachable!("oneshot repositories are never handed out as transactions");
            }
        }
        Ok(())
    }

    async fn abort_inplace(&mut self) -> Result<(), Error> {
        match &mut self.inner {
            MemTxnInner::Txn { finalized, .. } => {
                debug_assert!(!*finalized);
                *finalized = true;
            }
            MemTxnInner::NoTxn { .. } => {
                unreachable!("oneshot repositories are never handed out as transactions");
            }
        }
        Ok(())
    }
}

impl RepoCollection for MemTxn {
    fn relations(&mut self) -> &mut dyn RelationRepo {
        self
    }

    fn levels(&mut self) -> &mut dyn PartitionLevelRepo {
        self
    }

    fn rules(&mut self) -> &mut dyn PartitionRuleRepo {
        self
    }

    fn constraints(&mut self) -> &mut dyn ConstraintRepo {
        self
    }

    fn indexes(&mut self) -> &mut dyn IndexRepo {
        self
    }
}

#[async_trait]
impl RelationRepo for MemTxn {
    async fn create(&mut self, name: &str, attributes: Vec<Attribute>) -> Result<Relation> {
        let stage = self.stage();

        if stage.relations.iter().any(|r| r.name == name) {
            return Err(Error::NameExists {
                name: name.to_string(),
            });
        }

        let mut attributes = attributes;
        attributes.sort_by_key(|a| a.attnum);
        let relation = Relation {
            id: TableId::new(stage.next_id()),
            name: name.to_string(),
            attributes,
            num_checks: 0,
        };
        stage.relations.push(relation.clone());
        Ok(relation)
    }

    async fn get_by_id(&mut self, id: TableId) -> Result<Option<Relation>> {
        let stage = self.stage();
        Ok(stage.relations.iter().find(|r| r.id == id).cloned())
    }

    async fn get_by_name(&mut self, name: &str) -> Result<Option<Relation>> {
        let stage = self.stage();
        Ok(stage.relations.iter().find(|r| r.name == name).cloned())
    }

    async fn set_num_checks(&mut self, id: TableId, num_checks: i32) -> Result<Relation> {
        let stage = self.stage();
        match stage.relations.iter_mut().find(|r| r.id == id) {
            Some(r) => {
                r.num_checks = num_checks;
                Ok(r.clone())
            }
            None => Err(Error::RelationNotFound(id)),
        }
    }
}

#[async_trait]
impl PartitionLevelRepo for MemTxn {
    async fn create(&mut self, level: NewPartitionLevel) -> Result<PartitionLevel> {
        let stage = self.stage();

        if !stage.relations.iter().any(|r| r.id == level.table_id) {
            return Err(Error::RelationNotFound(level.table_id));
        }

        // (table, depth, template) is not checked for uniqueness here so that readers can be
        // exercised against an inconsistent catalog
        let level = PartitionLevel {
            id: LevelId::new(stage.next_id()),
            table_id: level.table_id,
            kind: level.kind,
            depth: level.depth,
            is_template: level.is_template,
            key_attrs: level.key_attrs,
            opclasses: level.opclasses,
        };
        stage.levels.push(level.clone());
        Ok(level)
    }

    async fn get_by_id(&mut self, id: LevelId) -> Result<Option<PartitionLevel>> {
        let stage = self.stage();
        Ok(stage.levels.iter().find(|l| l.id == id).cloned())
    }

    async fn list_by_table_depth(
        &mut self,
        table: TableId,
        depth: i16,
        is_template: bool,
    ) -> Result<Vec<PartitionLevel>> {
        let stage = self.stage();
        Ok(stage
            .levels
            .iter()
            .filter(|l| l.table_id == table && l.depth == depth && l.is_template == is_template)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PartitionRuleRepo for MemTxn {
    async fn create(&mut self, rule: NewPartitionRule) -> Result<PartitionRule> {
        let stage = self.stage();

        if !stage.levels.iter().any(|l| l.id == rule.level_id) {
            return Err(Error::LevelNotFound(rule.level_id));
        }
        if !rule.is_default {
            stage.check_ordinal_free(rule.level_id, rule.parent_rule, rule.ruleord, None)?;
        }

        let rule = PartitionRule {
            id: RuleId::new(stage.next_id()),
            level_id: rule.level_id,
            parent_rule: rule.parent_rule,
            child_table: rule.child_table,
            name: rule.name,
            is_default: rule.is_default,
            ruleord: rule.ruleord,
            bound: rule.bound,
            encodings: rule.encodings,
            tablespace: rule.tablespace,
        };
        stage.rules.push(rule.clone());
        Ok(rule)
    }

    async fn get_by_id(&mut self, id: RuleId) -> Result<Option<PartitionRule>> {
        let stage = self.stage();
        Ok(stage.rules.iter().find(|r| r.id == id).cloned())
    }

    async fn list_by_level(
        &mut self,
        level: LevelId,
        parent: Option<RuleId>,
    ) -> Result<Vec<PartitionRule>> {
        let stage = self.stage();
        let mut rules: Vec<_> = stage.siblings(level, parent).cloned().collect();
        rules.sort_by_key(|r| (r.ruleord, r.id));
        Ok(rules)
    }

    async fn list_all_by_level(&mut self, level: LevelId) -> Result<Vec<PartitionRule>> {
        let stage = self.stage();
        let mut rules: Vec<_> = stage
            .rules
            .iter()
            .filter(|r| r.level_id == level)
            .cloned()
            .collect();
        rules.sort_by_key(|r| (r.parent_rule, r.ruleord, r.id));
        Ok(rules)
    }

    async fn highest_at_or_below(
        &mut self,
        level: LevelId,
        parent: Option<RuleId>,
        ruleord: i16,
    ) -> Result<Option<PartitionRule>> {
        let stage = self.stage();
        Ok(stage
            .siblings(level, parent)
            .filter(|r| !r.is_default && r.ruleord <= ruleord)
            .max_by_key(|r| r.ruleord)
            .cloned())
    }

    async fn lowest_at_or_above(
        &mut self,
        level: LevelId,
        parent: Option<RuleId>,
        ruleord: i16,
    ) -> Result<Option<PartitionRule>> {
        let stage = self.stage();
        Ok(stage
            .siblings(level, parent)
            .filter(|r| !r.is_default && r.ruleord >= ruleord)
            .min_by_key(|r| r.ruleord)
            .cloned())
    }

    async fn update_ordinal(&mut self, id: RuleId, ruleord: i16) -> Result<PartitionRule> {
        let stage = self.stage();

        let (level, parent, is_default) = match stage.rules.iter().find(|r| r.id == id) {
            Some(r) => (r.level_id, r.parent_rule, r.is_default),
            None => return Err(Error::RuleNotFound(id)),
        };
        if !is_default {
            stage.check_ordinal_free(level, parent, ruleord, Some(id))?;
        }

        match stage.rules.iter_mut().find(|r| r.id == id) {
            Some(r) => {
                r.ruleord = ruleord;
                Ok(r.clone())
            }
            None => Err(Error::RuleNotFound(id)),
        }
    }

    async fn update_child(&mut self, id: RuleId, child: TableId) -> Result<PartitionRule> {
        let stage = self.stage();

        if !stage.relations.iter().any(|r| r.id == child) {
            return Err(Error::RelationNotFound(child));
        }
        match stage.rules.iter_mut().find(|r| r.id == id) {
            Some(r) => {
                r.child_table = Some(child);
                Ok(r.clone())
            }
            None => Err(Error::RuleNotFound(id)),
        }
    }

    async fn delete(&mut self, id: RuleId) -> Result<()> {
        let stage = self.stage();
        let before = stage.rules.len();
        stage.rules.retain(|r| r.id != id);
        if stage.rules.len() == before {
            return Err(Error::RuleNotFound(id));
        }
        Ok(())
    }
}

#[async_trait]
impl ConstraintRepo for MemTxn {
    async fn create(&mut self, constraint: NewConstraint) -> Result<Constraint> {
        let stage = self.stage();

        if !stage.relations.iter().any(|r| r.id == constraint.relation) {
            return Err(Error::RelationNotFound(constraint.relation));
        }
        if let Some(index) = constraint.kind.backing_index() {
            if !stage.indexes.iter().any(|i| i.id == index) {
                return Err(Error::IndexNotFound(index));
            }
        }
        stage.check_constraint_name_free(
            constraint.relation,
            &constraint.name,
            constraint.kind.backing_index().is_some(),
            None,
        )?;

        let constraint = Constraint {
            id: ConstraintId::new(stage.next_id()),
            relation: constraint.relation,
            name: constraint.name,
            keys: constraint.keys,
            kind: constraint.kind,
        };
        stage.constraints.push(constraint.clone());
        Ok(constraint)
    }

    async fn list_by_relation(&mut self, relation: TableId) -> Result<Vec<Constraint>> {
        let stage = self.stage();
        let mut constraints: Vec<_> = stage
            .constraints
            .iter()
            .filter(|c| c.relation == relation)
            .cloned()
            .collect();
        constraints.sort_by_key(|c| c.id);
        Ok(constraints)
    }

    async fn rename(&mut self, id: ConstraintId, name: &str) -> Result<Constraint> {
        let stage = self.stage();

        let (relation, index_backed) = match stage.constraints.iter().find(|c| c.id == id) {
            Some(c) => (c.relation, c.kind.backing_index().is_some()),
            None => return Err(Error::ConstraintNotFound(id)),
        };
        stage.check_constraint_name_free(relation, name, index_backed, Some(id))?;

        match stage.constraints.iter_mut().find(|c| c.id == id) {
            Some(c) => {
                c.name = name.to_string();
                Ok(c.clone())
            }
            None => Err(Error::ConstraintNotFound(id)),
        }
    }
}

#[async_trait]
impl IndexRepo for MemTxn {
    async fn create(&mut self, relation: TableId, name: &str) -> Result<Index> {
        let stage = self.stage();

        if !stage.relations.iter().any(|r| r.id == relation) {
            return Err(Error::RelationNotFound(relation));
        }
        let index = Index {
            id: IndexId::new(stage.next_id()),
            relation,
            name: name.to_string(),
        };
        stage.indexes.push(index.clone());
        Ok(index)
    }

    async fn add_inheritor(&mut self, parent: IndexId, child: IndexId) -> Result<()> {
        let stage = self.stage();

        for id in [parent, child] {
            if !stage.indexes.iter().any(|i| i.id == id) {
                return Err(Error::IndexNotFound(id));
            }
        }
        if !stage.index_inheritance.contains(&(parent, child)) {
            stage.index_inheritance.push((parent, child));
        }
        Ok(())
    }

    async fn list_inheritors(&mut self, parent: IndexId) -> Result<Vec<IndexId>> {
        let stage = self.stage();
        Ok(stage
            .index_inheritance
            .iter()
            .filter(|(p, _)| *p == parent)
            .map(|(_, c)| *c)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datum::DataType;
    use crate::interface::{PartitionKind, RuleBound};
    use partdb_id::{AttrNumber, OpClassId};
    use pretty_assertions::assert_eq;

    async fn level_with_rules(repos: &mut dyn RepoCollection, ords: &[i16]) -> LevelId {
        let table = repos
            .relations()
            .create("sales", vec![Attribute::new(1, "id", DataType::Int)])
            .await
            .unwrap();
        let level = repos
            .levels()
            .create(NewPartitionLevel {
                table_id: table.id,
                kind: PartitionKind::Range,
                depth: 0,
                is_template: false,
                key_attrs: vec![AttrNumber::new(1)],
                opclasses: vec![OpClassId::new(1)],
            })
            .await
            .unwrap();
        for ord in ords {
            repos
                .rules()
                .create(NewPartitionRule::new(
                    level.id,
                    None,
                    None,
                    *ord,
                    RuleBound::None,
                ))
                .await
                .unwrap();
        }
        level.id
    }

    #[tokio::test]
    async fn ruleord_is_unique_per_sibling_set() {
        let catalog = MemCatalog::new();
        let mut repos = catalog.repositories().await;
        let level = level_with_rules(repos.as_mut(), &[1, 2]).await;

        let err = repos
            .rules()
            .create(NewPartitionRule::new(level, None, None, 2, RuleBound::None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OrdinalConflict { ruleord: 2, .. }));

        // defaults and other parents do not participate
        repos
            .rules()
            .create(NewPartitionRule::default_rule(level, None, None))
            .await
            .unwrap();
        repos
            .rules()
            .create(NewPartitionRule::new(
                level,
                Some(RuleId::new(999)),
                None,
                2,
                RuleBound::None,
            ))
            .await
            .unwrap();

        let first = repos
            .rules()
            .highest_at_or_below(level, None, 1)
            .await
            .unwrap()
            .unwrap();
        let err = repos.rules().update_ordinal(first.id, 2).await.unwrap_err();
        assert!(matches!(err, Error::OrdinalConflict { ruleord: 2, .. }));
        repos.rules().update_ordinal(first.id, 3).await.unwrap();

        let ords: Vec<_> = repos
            .rules()
            .list_by_level(level, None)
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.ruleord, r.is_default))
            .collect();
        assert_eq!(ords, vec![(0, true), (2, false), (3, false)]);
    }

    #[tokio::test]
    async fn ordered_sibling_lookups() {
        let catalog = MemCatalog::new();
        let mut repos = catalog.repositories().await;
        let level = level_with_rules(repos.as_mut(), &[1, 3, 7]).await;

        let rules = repos.rules();
        let ord = |r: Option<PartitionRule>| r.map(|r| r.ruleord);
        assert_eq!(ord(rules.highest_at_or_below(level, None, 5).await.unwrap()), Some(3));
        assert_eq!(ord(rules.highest_at_or_below(level, None, 0).await.unwrap()), None);
        assert_eq!(ord(rules.lowest_at_or_above(level, None, 4).await.unwrap()), Some(7));
        assert_eq!(ord(rules.lowest_at_or_above(level, None, 8).await.unwrap()), None);
    }

    #[tokio::test]
    async fn transactions_commit_and_abort() {
        let catalog = MemCatalog::new();

        let mut txn = catalog.start_transaction().await.unwrap();
        txn.relations().create("a", vec![]).await.unwrap();
        txn.abort().await.unwrap();

        let mut txn = catalog.start_transaction().await.unwrap();
        txn.relations().create("b", vec![]).await.unwrap();
        txn.commit().await.unwrap();

        let mut repos = catalog.repositories().await;
        assert!(repos.relations().get_by_name("a").await.unwrap().is_none());
        assert!(repos.relations().get_by_name("b").await.unwrap().is_some());
        let err = repos.relations().create("b", vec![]).await.unwrap_err();
        assert_eq!(err, Error::NameExists { name: "b".into() });
    }

    #[tokio::test]
    async fn index_backed_constraint_names_are_global() {
        let catalog = MemCatalog::new();
        let mut repos = catalog.repositories().await;
        let t1 = repos.relations().create("t1", vec![]).await.unwrap();
        let t2 = repos.relations().create("t2", vec![]).await.unwrap();
        let i1 = repos.indexes().create(t1.id, "t1_pkey").await.unwrap();
        let i2 = repos.indexes().create(t2.id, "t2_pkey").await.unwrap();

        let pk = |relation, index| NewConstraint {
            relation,
            name: "pk".to_string(),
            keys: vec![AttrNumber::new(1)],
            kind: crate::interface::ConstraintKind::PrimaryKey { index },
        };
        repos.constraints().create(pk(t1.id, i1.id)).await.unwrap();
        let err = repos
            .constraints()
            .create(pk(t2.id, i2.id))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConstraintNameExists { .. }));

        // CHECK names only clash within a relation
        let check = |relation| {
            NewConstraint::check(
                relation,
                "pk",
                crate::expr::ConstraintExpr::IsNotNull(Box::new(
                    crate::expr::ConstraintExpr::column(1),
                )),
            )
        };
        repos.constraints().create(check(t2.id)).await.unwrap();
        let err = repos.constraints().create(check(t1.id)).await.unwrap_err();
        assert!(matches!(err, Error::ConstraintNameExists { .. }));
    }

    #[tokio::test]
    async fn index_inheritance() {
        let catalog = MemCatalog::new();
        let mut repos = catalog.repositories().await;
        let t = repos.relations().create("t", vec![]).await.unwrap();
        let p = repos.relations().create("t_1", vec![]).await.unwrap();
        let parent = repos.indexes().create(t.id, "t_pkey").await.unwrap();
        let child = repos.indexes().create(p.id, "t_1_pkey").await.unwrap();

        repos.indexes().add_inheritor(parent.id, child.id).await.unwrap();
        repos.indexes().add_inheritor(parent.id, child.id).await.unwrap();
        assert_eq!(
            repos.indexes().list_inheritors(parent.id).await.unwrap(),
            vec![child.id]
        );
        assert_eq!(
            repos
                .indexes()
                .add_inheritor(parent.id, IndexId::new(1234))
                .await,
            Err(Error::IndexNotFound(IndexId::new(1234)))
        );
    }
}
