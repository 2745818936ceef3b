//! Routing of rows to the physical tables of a partitioned table.
//!
//! A [`PartitionTree`](partdb_catalog::PartitionTree) read from the catalog is walked one level at
//! a time. At each level the row's key columns are compared against the level's rules with the
//! comparators of the level's operator classes, which [`PartitionAccessMethods`] resolves once
//! per depth and keeps for the lifetime of a batch.

use partdb_catalog::DataType;
use partdb_id::{AttrNumber, OpClassId};
use thiserror::Error;

pub mod access_methods;
pub mod comparator;
pub mod route;
mod select;

pub use access_methods::{PartitionAccessMethods, with_access_methods};
pub use comparator::{BuiltinOpClasses, Comparator, ComparatorProvider};
pub use route::{
    RoutingMode, RoutingOptions, align_row, build_routing_tree, route, route_all,
    route_one_level, route_one_level_at, route_row, select_by_rank,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("operator class {opclass} has no comparison function for {lhs} and {rhs}")]
    MissingComparator {
        opclass: OpClassId,
        lhs: DataType,
        rhs: DataType,
    },

    #[error("unknown operator class {0}")]
    UnknownOpClass(OpClassId),

    #[error("partition key column {attnum} is outside a row of {width} columns")]
    KeyAttributeOutOfRange { attnum: AttrNumber, width: usize },

    #[error(transparent)]
    Tree(#[from] partdb_catalog::tree::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
