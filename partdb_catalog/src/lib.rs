//! The partition catalog: how a partitioned table is split into levels and rules, the
//! constraints attached to its relations, and the algorithms that read and renumber it.
//!
//! The [`interface`] module defines the transactional repositories every catalog backend
//! provides and [`mem`] implements them in memory. On top of those, [`tree::build_tree`] reads a
//! table's partition tree and [`ordinal::open_gap`] keeps sibling ruleords dense.

pub mod attr_map;
pub mod datum;
pub mod expr;
pub mod interface;
pub mod mem;
pub mod ordinal;
pub mod tree;

pub use attr_map::{AttributeMap, translate_attributes};
pub use datum::{DataType, Datum};
pub use expr::{CmpOp, ConstraintExpr};
pub use ordinal::{GapAction, Placement, open_gap, place_rule};
pub use tree::{NodeHandle, PartitionNode, PartitionTree, TreeRule, build_tree};
