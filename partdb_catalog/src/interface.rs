//! This module contains the traits and data objects for the partition catalog API.
//!
//! The catalog is a transactional row store. Every repository method runs inside the ambient
//! transaction of the [`RepoCollection`] it was obtained from; callers that perform structural
//! DDL are expected to hold whatever table-level lock serializes them against each other.

use async_trait::async_trait;
use partdb_id::{
    AttrNumber, ConstraintId, IndexId, LevelId, OpClassId, RuleId, TableId, TablespaceId,
};
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};
use thiserror::Error;

use crate::datum::{DataType, Datum};
use crate::expr::ConstraintExpr;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error("relation \"{name}\" already exists")]
    NameExists { name: String },

    #[error("relation {0} not found")]
    RelationNotFound(TableId),

    #[error("partition level {0} not found")]
    LevelNotFound(LevelId),

    #[error("partition rule {0} not found")]
    RuleNotFound(RuleId),

    #[error("constraint {0} not found")]
    ConstraintNotFound(ConstraintId),

    #[error("index {0} not found")]
    IndexNotFound(IndexId),

    #[error(
        "ruleord {ruleord} under partition level {level} is already used by rule {existing}"
    )]
    OrdinalConflict {
        level: LevelId,
        parent: Option<RuleId>,
        ruleord: i16,
        existing: RuleId,
    },

    #[error("constraint \"{name}\" for relation \"{relation}\" already exists")]
    ConstraintNameExists { relation: String, name: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// One column of a relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub attnum: AttrNumber,
    pub name: String,
    pub data_type: DataType,
    /// Dropped columns keep their slot so that later attribute numbers stay stable.
    pub dropped: bool,
}

impl Attribute {
    pub fn new(attnum: i16, name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            attnum: AttrNumber::new(attnum),
            name: name.into(),
            data_type,
            dropped: false,
        }
    }

    pub fn dropped(attnum: i16, data_type: DataType) -> Self {
        Self {
            attnum: AttrNumber::new(attnum),
            name: format!("........pg.dropped.{attnum}........"),
            data_type,
            dropped: true,
        }
    }
}

/// A table, either a partitioned parent or a physical part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub id: TableId,
    pub name: String,
    /// Ordered by attribute number.
    pub attributes: Vec<Attribute>,
    /// Number of CHECK constraints recorded on the relation.
    pub num_checks: i32,
}

impl Relation {
    pub fn attribute(&self, attnum: AttrNumber) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.attnum == attnum)
    }

    pub fn live_attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter().filter(|a| !a.dropped)
    }

    pub fn attribute_by_name(&self, name: &str) -> Option<&Attribute> {
        self.live_attributes().find(|a| a.name == name)
    }

    /// The number of attribute slots, dropped ones included.
    pub fn natts(&self) -> usize {
        self.attributes.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionKind {
    Range,
    List,
}

impl Display for PartitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Range => f.write_str("range"),
            Self::List => f.write_str("list"),
        }
    }
}

/// One partitioning level of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionLevel {
    pub id: LevelId,
    pub table_id: TableId,
    pub kind: PartitionKind,
    /// 0-based depth below the partitioned table.
    pub depth: i16,
    pub is_template: bool,
    /// Key columns in the partitioned table's attribute numbering.
    pub key_attrs: Vec<AttrNumber>,
    /// One operator class per key column.
    pub opclasses: Vec<OpClassId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPartitionLevel {
    pub table_id: TableId,
    pub kind: PartitionKind,
    pub depth: i16,
    pub is_template: bool,
    pub key_attrs: Vec<AttrNumber>,
    pub opclasses: Vec<OpClassId>,
}

/// One edge of a RANGE rule: one value per key column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeBound {
    pub values: Vec<Datum>,
    pub inclusive: bool,
}

impl RangeBound {
    pub fn inclusive(values: Vec<Datum>) -> Self {
        Self {
            values,
            inclusive: true,
        }
    }

    pub fn exclusive(values: Vec<Datum>) -> Self {
        Self {
            values,
            inclusive: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RuleBound {
    /// Default and template-only rules carry no bound.
    None,
    /// An absent edge is unbounded on that side.
    Range {
        start: Option<RangeBound>,
        end: Option<RangeBound>,
    },
    /// Value tuples, one value per key column. `Datum::Null` encodes a null.
    List(Vec<Vec<Datum>>),
}

/// A per-column storage encoding override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnEncoding {
    pub attnum: AttrNumber,
    pub options: Vec<(String, String)>,
}

/// One branch at a partitioning level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionRule {
    pub id: RuleId,
    pub level_id: LevelId,
    /// The rule one level up that this rule sits under, `None` at the top level.
    pub parent_rule: Option<RuleId>,
    /// `None` only for template rules.
    pub child_table: Option<TableId>,
    pub name: Option<String>,
    pub is_default: bool,
    /// Position among the non-default siblings. Default rules use 0.
    pub ruleord: i16,
    pub bound: RuleBound,
    pub encodings: Vec<ColumnEncoding>,
    pub tablespace: Option<TablespaceId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPartitionRule {
    pub level_id: LevelId,
    pub parent_rule: Option<RuleId>,
    pub child_table: Option<TableId>,
    pub name: Option<String>,
    pub is_default: bool,
    pub ruleord: i16,
    pub bound: RuleBound,
    pub encodings: Vec<ColumnEncoding>,
    pub tablespace: Option<TablespaceId>,
}

impl NewPartitionRule {
    /// A non-default rule with no encodings and the default tablespace.
    pub fn new(
        level_id: LevelId,
        parent_rule: Option<RuleId>,
        child_table: Option<TableId>,
        ruleord: i16,
        bound: RuleBound,
    ) -> Self {
        Self {
            level_id,
            parent_rule,
            child_table,
            name: None,
            is_default: false,
            ruleord,
            bound,
            encodings: vec![],
            tablespace: None,
        }
    }

    pub fn default_rule(
        level_id: LevelId,
        parent_rule: Option<RuleId>,
        child_table: Option<TableId>,
    ) -> Self {
        Self {
            is_default: true,
            ..Self::new(level_id, parent_rule, child_table, 0, RuleBound::None)
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// What a constraint enforces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstraintKind {
    Check {
        expr: ConstraintExpr,
    },
    PrimaryKey {
        index: IndexId,
    },
    Unique {
        index: IndexId,
    },
    ForeignKey {
        referenced: TableId,
        referenced_keys: Vec<AttrNumber>,
    },
}

impl ConstraintKind {
    pub fn backing_index(&self) -> Option<IndexId> {
        match self {
            Self::PrimaryKey { index } | Self::Unique { index } => Some(*index),
            Self::Check { .. } | Self::ForeignKey { .. } => None,
        }
    }

    pub fn is_check(&self) -> bool {
        matches!(self, Self::Check { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub id: ConstraintId,
    pub relation: TableId,
    pub name: String,
    /// Constrained columns, in the owning relation's attribute numbering.
    pub keys: Vec<AttrNumber>,
    pub kind: ConstraintKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewConstraint {
    pub relation: TableId,
    pub name: String,
    pub keys: Vec<AttrNumber>,
    pub kind: ConstraintKind,
}

impl NewConstraint {
    /// A CHECK constraint whose key columns are the ones its expression references.
    pub fn check(relation: TableId, name: impl Into<String>, expr: ConstraintExpr) -> Self {
        Self {
            relation,
            name: name.into(),
            keys: expr.columns().into_iter().collect(),
            kind: ConstraintKind::Check { expr },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub id: IndexId,
    pub relation: TableId,
    pub name: String,
}

/// Trait that contains methods for catalog transactions.
pub mod sealed {
    use super::*;

    /// Helper trait to implement commit and abort of a transaction.
    ///
    /// The problem is that both methods cannot take `self` directly, otherwise the
    /// [`Transaction`](super::Transaction) would not be object safe. Therefore we can only take a
    /// reference. To avoid that a user uses a transaction after calling one of the finalizers, we
    /// use a tiny trick and take `Box<dyn Transaction>` in our public interface and use a sealed
    /// trait for the actual implementation.
    #[async_trait]
    pub trait TransactionFinalize: Send + Sync + Debug {
        async fn commit_inplace(&mut self) -> Result<(), Error>;
        async fn abort_inplace(&mut self) -> Result<(), Error>;
    }
}

/// A catalog transaction.
///
/// Writes are only visible to other readers after [`commit`](Self::commit). Dropping a
/// transaction without finalizing it discards its writes.
#[async_trait]
pub trait Transaction: Send + Sync + Debug + sealed::TransactionFinalize + RepoCollection {
    async fn commit(mut self: Box<Self>) -> Result<(), Error> {
        self.commit_inplace().await
    }

    async fn abort(mut self: Box<Self>) -> Result<(), Error> {
        self.abort_inplace().await
    }

    /// The repositories of this transaction, for code that takes any [`RepoCollection`].
    fn repos(&mut self) -> &mut dyn RepoCollection;
}

impl<T> Transaction for T
where
    T: Send + Sync + Debug + sealed::TransactionFinalize + RepoCollection,
{
    fn repos(&mut self) -> &mut dyn RepoCollection {
        self
    }
}

/// Trait that contains methods for working with the catalog.
#[async_trait]
pub trait Catalog: Send + Sync + Debug + Display {
    /// Accesses the repositories inside a transaction.
    async fn start_transaction(&self) -> Result<Box<dyn Transaction>, Error>;

    /// Accesses the repositories without a transaction scope; every write is immediately
    /// visible.
    async fn repositories(&self) -> Box<dyn RepoCollection>;
}

/// Methods for working with the catalog's various repositories (collections of entities).
pub trait RepoCollection: Send + Sync + Debug {
    fn relations(&mut self) -> &mut dyn RelationRepo;

    fn levels(&mut self) -> &mut dyn PartitionLevelRepo;

    fn rules(&mut self) -> &mut dyn PartitionRuleRepo;

    fn constraints(&mut self) -> &mut dyn ConstraintRepo;

    fn indexes(&mut self) -> &mut dyn IndexRepo;
}

/// Functions for working with relations in the catalog.
#[async_trait]
pub trait RelationRepo: Send + Sync {
    /// Creates a relation. Fails with [`Error::NameExists`] if the name is taken.
    async fn create(&mut self, name: &str, attributes: Vec<Attribute>) -> Result<Relation>;

    async fn get_by_id(&mut self, id: TableId) -> Result<Option<Relation>>;

    async fn get_by_name(&mut self, name: &str) -> Result<Option<Relation>>;

    /// Overwrites the relation's cached CHECK constraint count.
    async fn set_num_checks(&mut self, id: TableId, num_checks: i32) -> Result<Relation>;
}

/// Functions for working with partitioning levels in the catalog.
#[async_trait]
pub trait PartitionLevelRepo: Send + Sync {
    async fn create(&mut self, level: NewPartitionLevel) -> Result<PartitionLevel>;

    async fn get_by_id(&mut self, id: LevelId) -> Result<Option<PartitionLevel>>;

    /// Every level row of `table` at `depth` with the given template flag. A consistent
    /// catalog has at most one.
    async fn list_by_table_depth(
        &mut self,
        table: TableId,
        depth: i16,
        is_template: bool,
    ) -> Result<Vec<PartitionLevel>>;
}

/// Functions for working with partition rules in the catalog.
#[async_trait]
pub trait PartitionRuleRepo: Send + Sync {
    /// Creates a rule. Non-default rules must not reuse a ruleord of their sibling set.
    async fn create(&mut self, rule: NewPartitionRule) -> Result<PartitionRule>;

    async fn get_by_id(&mut self, id: RuleId) -> Result<Option<PartitionRule>>;

    /// Rules of one sibling set, ordered by ruleord.
    async fn list_by_level(
        &mut self,
        level: LevelId,
        parent: Option<RuleId>,
    ) -> Result<Vec<PartitionRule>>;

    /// Every rule of a level regardless of parent, ordered by (parent, ruleord).
    async fn list_all_by_level(&mut self, level: LevelId) -> Result<Vec<PartitionRule>>;

    /// The non-default sibling with the highest ruleord that is `<= ruleord`.
    async fn highest_at_or_below(
        &mut self,
        level: LevelId,
        parent: Option<RuleId>,
        ruleord: i16,
    ) -> Result<Option<PartitionRule>>;

    /// The non-default sibling with the lowest ruleord that is `>= ruleord`.
    async fn lowest_at_or_above(
        &mut self,
        level: LevelId,
        parent: Option<RuleId>,
        ruleord: i16,
    ) -> Result<Option<PartitionRule>>;

    /// Moves a rule to a new ruleord. Fails with [`Error::OrdinalConflict`] if a sibling holds it.
    async fn update_ordinal(&mut self, id: RuleId, ruleord: i16) -> Result<PartitionRule>;

    /// Points a rule at a different physical table.
    async fn update_child(&mut self, id: RuleId, child: TableId) -> Result<PartitionRule>;

    async fn delete(&mut self, id: RuleId) -> Result<()>;
}

/// Functions for working with constraints in the catalog.
#[async_trait]
pub trait ConstraintRepo: Send + Sync {
    async fn create(&mut self, constraint: NewConstraint) -> Result<Constraint>;

    /// Constraints of one relation, ordered by id.
    async fn list_by_relation(&mut self, relation: TableId) -> Result<Vec<Constraint>>;

    async fn rename(&mut self, id: ConstraintId, name: &str) -> Result<Constraint>;
}

/// Functions for working with the indexes that back PRIMARY KEY and UNIQUE constraints.
#[async_trait]
pub trait IndexRepo: Send + Sync {
    async fn create(&mut self, relation: TableId, name: &str) -> Result<Index>;

    /// Records that `child` (an index on a part) inherits from `parent` (an index on the
    /// partitioned table).
    async fn add_inheritor(&mut self, parent: IndexId, child: IndexId) -> Result<()>;

    async fn list_inheritors(&mut self, parent: IndexId) -> Result<Vec<IndexId>>;
}
