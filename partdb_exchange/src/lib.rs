//! Constraint reconciliation for partition exchange.
//!
//! Exchanging a part of a partitioned table for a candidate table is only allowed if the
//! candidate ends up carrying the same constraints as the part it replaces. [`plan_exchange`]
//! groups the constraints of the partitioned table, the part and the candidate by definition and
//! classifies every group, without writing anything. [`reconcile`] refuses plans with fatal
//! findings and otherwise copies the missing constraints onto the candidate and swaps the names
//! of index-backed constraints between part and candidate.

use itertools::Itertools;
use partdb_catalog::{attr_map, interface};
use std::fmt::Display;
use thiserror::Error;

pub mod diff;
pub mod entry;
pub mod plan;
pub mod reconcile;
pub mod validation;

pub use entry::{ConstraintEntry, ConstraintGroups, Role};
pub use plan::{ExchangePlan, NameSwap, OrphanedConstraint, plan_exchange};
pub use reconcile::{reconcile, reconcile_with_options};
pub use validation::PendingValidation;

/// Prefix of the temporary constraint name used while swapping names.
pub const DEFAULT_TEMP_NAME_PREFIX: &str = "pg_temp_exchange_";

/// Why the constraint guarding a part cannot serve as the model for the candidate's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardProblem {
    /// The part holds the same partition constraint more than once.
    Multiple,
    /// The part's partition constraint is not a CHECK constraint.
    NotCheck,
}

impl Display for GuardProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Multiple => write!(f, "multiple partition constraints (same key)"),
            Self::NotCheck => write!(f, "invalid partition constraint"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(
        "invalid constraint(s) found on \"{relation}\": {}\nHINT: Drop the invalid constraints \
         and retry.",
        quoted(.names)
    )]
    ExtraConstraints { relation: String, names: Vec<String> },

    #[error(
        "inherited constraint(s) found on \"{table}\" that do not exist on \"{part}\": {}\n\
         HINT: Attach missing constraints and retry.",
        quoted(.names)
    )]
    MissingInherited {
        table: String,
        part: String,
        names: Vec<String>,
    },

    #[error("{problem} on \"{part}\": {}", quoted(.names))]
    InvalidPartitionGuard {
        part: String,
        problem: GuardProblem,
        names: Vec<String>,
    },

    #[error(
        "{kind} constraint \"{name}\" missing\nHINT: Add {kind} constraint \"{name}\" to the \
         candidate table or drop it from the partitioned table."
    )]
    MissingIndexBacked { kind: &'static str, name: String },

    #[error(
        "constraint \"{name}\" for relation \"{relation}\" already exists\nHINT: Rename the \
         conflicting constraint and retry."
    )]
    NameConflict { relation: String, name: String },

    #[error("relations of the exchange have incompatible columns: {0}")]
    IncompatibleSchemas(#[from] attr_map::Error),

    #[error(transparent)]
    Catalog(#[from] interface::Error),
}

pub type Result<T, E = ReconcileError> = std::result::Result<T, E>;

fn quoted(names: &[String]) -> String {
    names.iter().map(|n| format!("\"{n}\"")).join(", ")
}

/// Knobs of one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeOptions {
    /// WITH VALIDATION: hand back a row check for every CHECK constraint added to the candidate.
    pub validate: bool,
    pub temp_name_prefix: String,
}

impl Default for ExchangeOptions {
    fn default() -> Self {
        Self {
            validate: true,
            temp_name_prefix: DEFAULT_TEMP_NAME_PREFIX.to_string(),
        }
    }
}
