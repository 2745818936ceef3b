//! The read-only phase of an exchange: classify every constraint group and decide what has to
//! change on the candidate.

use hashbrown::HashMap;
use partdb_catalog::{
    interface::{Constraint, ConstraintKind, Relation, RepoCollection},
    translate_attributes,
};
use partdb_id::IndexId;
use tracing::warn;

use crate::diff::{Matching, diff, diff_inherited};
use crate::entry::{ConstraintEntry, ConstraintGroups, Role};
use crate::{GuardProblem, ReconcileError, Result};

/// An index-backed constraint of the part and its counterpart on the candidate, whose names are
/// exchanged so that the candidate ends up with the part's name.
#[derive(Debug, Clone, PartialEq)]
pub struct NameSwap {
    pub part: Constraint,
    pub candidate: Constraint,
}

/// A constraint of the partitioned table that the part does not carry. Tolerated, since an
/// exchange may be exactly how that gets repaired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanedConstraint {
    pub part: String,
    pub constraint: String,
    pub table: String,
}

/// Everything the reconciler found out about the constraints of one exchange.
///
/// Lists of constraints keep the numbering of the relation they were read from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExchangePlan {
    pub table_name: String,
    pub part_name: String,
    pub candidate_name: String,
    /// Constraints of the partitioned table to add to the candidate.
    pub missing: Vec<Constraint>,
    /// The part's partition constraint, when the candidate lacks it.
    pub missing_partition_guards: Vec<Constraint>,
    /// Index-backed constraints of the part with no counterpart on the candidate.
    pub missing_index_backed: Vec<Constraint>,
    /// Index-backed constraints of the partitioned table the part does not inherit.
    pub missing_inherited: Vec<Constraint>,
    /// Constraints of the candidate that must be dropped before the exchange.
    pub extra: Vec<Constraint>,
    /// A partition constraint of the part unfit to model the candidate's on.
    pub invalid_partition_guard: Option<(GuardProblem, Vec<Constraint>)>,
    pub name_swaps: Vec<NameSwap>,
    pub orphaned: Vec<OrphanedConstraint>,
}

fn names(constraints: &[Constraint]) -> Vec<String> {
    constraints.iter().map(|c| c.name.clone()).collect()
}

impl ExchangePlan {
    /// Whether the plan can be applied.
    pub fn check(&self) -> Result<()> {
        if let Some((problem, guards)) = &self.invalid_partition_guard {
            return Err(ReconcileError::InvalidPartitionGuard {
                part: self.part_name.clone(),
                problem: *problem,
                names: names(guards),
            });
        }
        if !self.extra.is_empty() {
            return Err(ReconcileError::ExtraConstraints {
                relation: self.candidate_name.clone(),
                names: names(&self.extra),
            });
        }
        if !self.missing_inherited.is_empty() {
            return Err(ReconcileError::MissingInherited {
                table: self.table_name.clone(),
                part: self.part_name.clone(),
                names: names(&self.missing_inherited),
            });
        }
        if let Some(missing) = self.missing_index_backed.first() {
            let kind = match missing.kind {
                ConstraintKind::PrimaryKey { .. } => "PRIMARY KEY",
                _ => "UNIQUE",
            };
            return Err(ReconcileError::MissingIndexBacked {
                kind,
                name: missing.name.clone(),
            });
        }
        Ok(())
    }

    pub fn is_fatal(&self) -> bool {
        self.check().is_err()
    }

    /// Number of CHECK constraints applying the plan adds to the candidate.
    pub fn added_checks(&self) -> usize {
        self.missing
            .iter()
            .chain(&self.missing_partition_guards)
            .filter(|c| c.kind.is_check())
            .count()
    }

    fn classify(
        &mut self,
        entry: &ConstraintEntry,
        inheritors: &HashMap<IndexId, Vec<IndexId>>,
    ) {
        if entry.index_backed {
            if !entry.table.is_empty() {
                let d = diff_inherited(&entry.table, &entry.part, inheritors);
                self.missing_inherited.extend(d.missing);
                self.extra.extend(d.extra);
            }
            let d = diff(&entry.part, &entry.candidate, Matching::PreferName);
            self.missing_index_backed.extend(d.missing);
            self.extra.extend(d.extra);
            self.name_swaps.extend(
                d.pairs
                    .into_iter()
                    .map(|(part, candidate)| NameSwap { part, candidate }),
            );
        } else if let Some(first) = entry.table.first() {
            if entry.part.is_empty() {
                warn!(
                    part = %self.part_name,
                    constraint = %first.name,
                    table = %self.table_name,
                    "ignoring inconsistency: part has no constraint corresponding to one of the partitioned table"
                );
                self.orphaned.push(OrphanedConstraint {
                    part: self.part_name.clone(),
                    constraint: first.name.clone(),
                    table: self.table_name.clone(),
                });
            }
            let d = diff(&entry.table, &entry.candidate, Matching::Name);
            self.missing.extend(d.missing);
            self.extra.extend(d.extra);
        } else if let Some(guard) = entry.part.first() {
            if entry.part.len() > 1 {
                self.invalid_partition_guard
                    .get_or_insert((GuardProblem::Multiple, entry.part.clone()));
                return;
            }
            if !guard.kind.is_check() {
                self.invalid_partition_guard
                    .get_or_insert((GuardProblem::NotCheck, entry.part.clone()));
                return;
            }
            match entry.candidate.len() {
                0 => self.missing_partition_guards.push(guard.clone()),
                1 => {}
                _ => {
                    // keep one occurrence, preferably the one named like the part's
                    let d = diff(&entry.part, &entry.candidate, Matching::PreferName);
                    self.extra.extend(d.extra);
                }
            }
        } else {
            self.extra.extend(entry.candidate.iter().cloned());
        }
    }
}

/// Reads the constraints of `table`, `part` and `candidate` and classifies them.
///
/// Writes nothing, so planning twice without catalog changes in between gives equal plans.
pub async fn plan_exchange(
    repos: &mut dyn RepoCollection,
    table: &Relation,
    part: &Relation,
    candidate: &Relation,
) -> Result<ExchangePlan> {
    let part_to_table = translate_attributes(part, table)?;
    let candidate_to_table = translate_attributes(candidate, table)?;

    let mut groups = ConstraintGroups::new();
    for (role, relation, map) in [
        (Role::Table, table, None),
        (Role::Part, part, Some(&part_to_table)),
        (Role::Candidate, candidate, Some(&candidate_to_table)),
    ] {
        let constraints = repos.constraints().list_by_relation(relation.id).await?;
        groups.record(role, constraints, map)?;
    }

    let mut inheritors = HashMap::new();
    for constraint in groups.iter().filter(|e| e.index_backed).flat_map(|e| &e.table) {
        if let Some(index) = constraint.kind.backing_index() {
            inheritors.insert(index, repos.indexes().list_inheritors(index).await?);
        }
    }

    let mut plan = ExchangePlan {
        table_name: table.name.clone(),
        part_name: part.name.clone(),
        candidate_name: candidate.name.clone(),
        ..Default::default()
    };
    for entry in groups.iter() {
        plan.classify(entry, &inheritors);
    }
    Ok(plan)
}
