//! Utils of the tests: catalog fixtures for partitioned tables, their parts and constraints.
//!
//! Every helper takes the catalog lock for the duration of one call only, so tests must not hold
//! a [`RepoCollection`] of their own across calls into these helpers.

use partdb_catalog::{
    ConstraintExpr, DataType, Datum,
    interface::{
        Attribute, Catalog, Constraint, ConstraintKind, Index, NewConstraint, NewPartitionLevel,
        NewPartitionRule, PartitionKind, PartitionLevel, PartitionRule, RangeBound, Relation,
        RepoCollection, RuleBound,
    },
    mem::MemCatalog,
};
use partdb_id::{AttrNumber, OpClassId, RuleId, TableId};
use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

/// Catalog for tests
#[derive(Debug)]
pub struct TestCatalog {
    pub catalog: Arc<MemCatalog>,
    next_part: AtomicU32,
}

impl TestCatalog {
    /// Initialize the catalog
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            catalog: Arc::new(MemCatalog::new()),
            next_part: AtomicU32::new(1),
        })
    }

    /// Return the catalog
    pub fn catalog(&self) -> Arc<dyn Catalog> {
        Arc::clone(&self.catalog) as _
    }

    pub async fn repositories(&self) -> Box<dyn RepoCollection> {
        self.catalog.repositories().await
    }

    /// Create a table with consecutively numbered columns.
    pub async fn create_table(
        self: &Arc<Self>,
        name: &str,
        columns: &[(&str, DataType)],
    ) -> Arc<TestTable> {
        let attributes = columns
            .iter()
            .enumerate()
            .map(|(i, (name, data_type))| Attribute::new(i as i16 + 1, *name, *data_type))
            .collect();
        self.create_relation(name, attributes).await
    }

    /// Create a table with explicit attributes, dropped ones included.
    pub async fn create_relation(
        self: &Arc<Self>,
        name: &str,
        attributes: Vec<Attribute>,
    ) -> Arc<TestTable> {
        let mut repos = self.repositories().await;
        let relation = repos.relations().create(name, attributes).await.unwrap();

        Arc::new(TestTable {
            catalog: Arc::clone(self),
            relation,
        })
    }

    pub async fn relation(&self, id: TableId) -> Relation {
        let mut repos = self.repositories().await;
        repos.relations().get_by_id(id).await.unwrap().unwrap()
    }

    fn next_part_number(&self) -> u32 {
        self.next_part.fetch_add(1, Ordering::Relaxed)
    }
}

/// A test relation, partitioned or not.
#[derive(Debug)]
pub struct TestTable {
    pub catalog: Arc<TestCatalog>,
    pub relation: Relation,
}

impl TestTable {
    pub fn id(&self) -> TableId {
        self.relation.id
    }

    pub fn name(&self) -> &str {
        &self.relation.name
    }

    /// Create a relation with the same attributes as this one.
    pub async fn create_like(self: &Arc<Self>, name: &str) -> Arc<TestTable> {
        self.catalog
            .create_relation(name, self.relation.attributes.clone())
            .await
    }

    /// The relation as currently stored in the catalog.
    pub async fn reload(&self) -> Relation {
        self.catalog.relation(self.relation.id).await
    }

    /// Create a partitioning level keyed on `keys`, given as (attribute number, operator class).
    pub async fn create_level(
        self: &Arc<Self>,
        depth: i16,
        kind: PartitionKind,
        keys: &[(i16, OpClassId)],
    ) -> Arc<TestLevel> {
        self.create_level_inner(depth, kind, keys, false).await
    }

    pub async fn create_template_level(
        self: &Arc<Self>,
        depth: i16,
        kind: PartitionKind,
        keys: &[(i16, OpClassId)],
    ) -> Arc<TestLevel> {
        self.create_level_inner(depth, kind, keys, true).await
    }

    async fn create_level_inner(
        self: &Arc<Self>,
        depth: i16,
        kind: PartitionKind,
        keys: &[(i16, OpClassId)],
        is_template: bool,
    ) -> Arc<TestLevel> {
        let mut repos = self.catalog.repositories().await;
        let level = repos
            .levels()
            .create(NewPartitionLevel {
                table_id: self.relation.id,
                kind,
                depth,
                is_template,
                key_attrs: keys.iter().map(|(a, _)| AttrNumber::new(*a)).collect(),
                opclasses: keys.iter().map(|(_, o)| *o).collect(),
            })
            .await
            .unwrap();

        Arc::new(TestLevel {
            table: Arc::clone(self),
            level,
        })
    }

    pub async fn create_check(&self, name: &str, expr: ConstraintExpr) -> Constraint {
        let mut repos = self.catalog.repositories().await;
        repos
            .constraints()
            .create(NewConstraint::check(self.relation.id, name, expr))
            .await
            .unwrap()
    }

    /// Create a PRIMARY KEY constraint and the index backing it, both named `name`.
    pub async fn create_primary_key(&self, name: &str, keys: &[i16]) -> (Constraint, Index) {
        self.create_index_backed(name, keys, |index| ConstraintKind::PrimaryKey { index })
            .await
    }

    /// Create a UNIQUE constraint and the index backing it, both named `name`.
    pub async fn create_unique(&self, name: &str, keys: &[i16]) -> (Constraint, Index) {
        self.create_index_backed(name, keys, |index| ConstraintKind::Unique { index })
            .await
    }

    async fn create_index_backed(
        &self,
        name: &str,
        keys: &[i16],
        kind: impl FnOnce(partdb_id::IndexId) -> ConstraintKind,
    ) -> (Constraint, Index) {
        let mut repos = self.catalog.repositories().await;
        let index = repos
            .indexes()
            .create(self.relation.id, name)
            .await
            .unwrap();
        let constraint = repos
            .constraints()
            .create(NewConstraint {
                relation: self.relation.id,
                name: name.to_string(),
                keys: keys.iter().map(|k| AttrNumber::new(*k)).collect(),
                kind: kind(index.id),
            })
            .await
            .unwrap();
        (constraint, index)
    }

    pub async fn create_foreign_key(
        &self,
        name: &str,
        keys: &[i16],
        referenced: TableId,
        referenced_keys: &[i16],
    ) -> Constraint {
        let mut repos = self.catalog.repositories().await;
        repos
            .constraints()
            .create(NewConstraint {
                relation: self.relation.id,
                name: name.to_string(),
                keys: keys.iter().map(|k| AttrNumber::new(*k)).collect(),
                kind: ConstraintKind::ForeignKey {
                    referenced,
                    referenced_keys: referenced_keys.iter().map(|k| AttrNumber::new(*k)).collect(),
                },
            })
            .await
            .unwrap()
    }

    pub async fn constraints(&self) -> Vec<Constraint> {
        let mut repos = self.catalog.repositories().await;
        repos
            .constraints()
            .list_by_relation(self.relation.id)
            .await
            .unwrap()
    }
}

/// Record that the index of a part inherits from the index of its partitioned table.
pub async fn inherit_index(catalog: &TestCatalog, parent: &Index, child: &Index) {
    let mut repos = catalog.repositories().await;
    repos
        .indexes()
        .add_inheritor(parent.id, child.id)
        .await
        .unwrap();
}

/// A test partitioning level.
#[derive(Debug)]
pub struct TestLevel {
    pub table: Arc<TestTable>,
    pub level: PartitionLevel,
}

/// A rule and the part it routes to.
#[derive(Debug)]
pub struct TestRule {
    pub rule: PartitionRule,
    pub part: Option<Arc<TestTable>>,
}

impl TestRule {
    pub fn id(&self) -> RuleId {
        self.rule.id
    }

    /// Panics for template rules.
    pub fn part(&self) -> &Arc<TestTable> {
        self.part.as_ref().unwrap()
    }
}

impl TestLevel {
    /// Create a RANGE rule with a fresh part.
    pub async fn create_range_rule(
        self: &Arc<Self>,
        parent: Option<RuleId>,
        ruleord: i16,
        start: Option<RangeBound>,
        end: Option<RangeBound>,
    ) -> TestRule {
        self.create_rule(NewPartitionRule::new(
            self.level.id,
            parent,
            None,
            ruleord,
            RuleBound::Range { start, end },
        ))
        .await
    }

    /// Create a LIST rule with a fresh part.
    pub async fn create_list_rule(
        self: &Arc<Self>,
        parent: Option<RuleId>,
        ruleord: i16,
        values: Vec<Vec<Datum>>,
    ) -> TestRule {
        self.create_rule(NewPartitionRule::new(
            self.level.id,
            parent,
            None,
            ruleord,
            RuleBound::List(values),
        ))
        .await
    }

    pub async fn create_default_rule(self: &Arc<Self>, parent: Option<RuleId>) -> TestRule {
        self.create_rule(NewPartitionRule::default_rule(self.level.id, parent, None))
            .await
    }

    async fn create_rule(self: &Arc<Self>, mut rule: NewPartitionRule) -> TestRule {
        let part = if self.level.is_template {
            None
        } else {
            let n = self.table.catalog.next_part_number();
            let name = format!("{}_{}_prt_{n}", self.table.name(), self.level.depth + 1);
            Some(self.table.create_like(&name).await)
        };
        rule.child_table = part.as_ref().map(|p| p.id());
        if rule.name.is_none() {
            rule.name = part.as_ref().map(|p| p.name().to_string());
        }

        let mut repos = self.table.catalog.repositories().await;
        let rule = repos.rules().create(rule).await.unwrap();
        TestRule { rule, part }
    }
}

/// `[values]` as an inclusive bound.
pub fn incl(values: impl IntoIterator<Item = impl Into<Datum>>) -> Option<RangeBound> {
    Some(RangeBound::inclusive(
        values.into_iter().map(Into::into).collect(),
    ))
}

/// `(values)` as an exclusive bound.
pub fn excl(values: impl IntoIterator<Item = impl Into<Datum>>) -> Option<RangeBound> {
    Some(RangeBound::exclusive(
        values.into_iter().map(Into::into).collect(),
    ))
}
