//! Grouping of the constraints held by the relations taking part in an exchange.
//!
//! Two constraints belong to the same group when their definitions are identical once their
//! columns are numbered as in the partitioned table. Names play no part in grouping.

use indexmap::IndexMap;
use itertools::Itertools;
use partdb_catalog::{
    AttributeMap,
    interface::{Constraint, ConstraintKind},
};
use partdb_id::AttrNumber;

use crate::Result;

/// The relation a constraint occurrence was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The partitioned table as a whole.
    Table,
    /// The part being exchanged out.
    Part,
    /// The table being exchanged in.
    Candidate,
}

/// All occurrences of one constraint definition, per role, each list ordered by catalog id.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintEntry {
    pub key: String,
    /// PRIMARY KEY or UNIQUE.
    pub index_backed: bool,
    pub table: Vec<Constraint>,
    pub part: Vec<Constraint>,
    pub candidate: Vec<Constraint>,
}

impl ConstraintEntry {
    fn new(key: String) -> Self {
        Self {
            key,
            index_backed: false,
            table: vec![],
            part: vec![],
            candidate: vec![],
        }
    }

    pub fn occurrences(&self, role: Role) -> &[Constraint] {
        match role {
            Role::Table => &self.table,
            Role::Part => &self.part,
            Role::Candidate => &self.candidate,
        }
    }

    fn occurrences_mut(&mut self, role: Role) -> &mut Vec<Constraint> {
        match role {
            Role::Table => &mut self.table,
            Role::Part => &mut self.part,
            Role::Candidate => &mut self.candidate,
        }
    }
}

/// Constraint groups keyed by normalized definition, in the order they were first seen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstraintGroups {
    entries: IndexMap<String, ConstraintEntry>,
}

impl ConstraintGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the constraints of one relation. `to_table` renumbers that relation's columns into
    /// the partitioned table's numbering; `None` means they already are.
    pub fn record(
        &mut self,
        role: Role,
        constraints: impl IntoIterator<Item = Constraint>,
        to_table: Option<&AttributeMap>,
    ) -> Result<()> {
        for constraint in constraints {
            let key = normalized_definition(&constraint, to_table)?;
            let entry = self
                .entries
                .entry(key)
                .or_insert_with_key(|key| ConstraintEntry::new(key.clone()));
            entry.index_backed |= constraint.kind.backing_index().is_some();

            let list = entry.occurrences_mut(role);
            let pos = list.partition_point(|c| c.id < constraint.id);
            list.insert(pos, constraint);
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&ConstraintEntry> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConstraintEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn columns(keys: &[AttrNumber]) -> String {
    keys.iter().map(|k| format!("${k}")).join(", ")
}

/// The definition of `constraint` as text, with columns renumbered through `to_table`.
pub fn normalized_definition(
    constraint: &Constraint,
    to_table: Option<&AttributeMap>,
) -> Result<String> {
    let keys = match to_table {
        Some(map) => map.map_keys(&constraint.keys)?,
        None => constraint.keys.clone(),
    };

    Ok(match &constraint.kind {
        ConstraintKind::Check { expr } => match to_table {
            Some(map) => format!("CHECK {}", map.map_expr(expr)?),
            None => format!("CHECK {expr}"),
        },
        ConstraintKind::PrimaryKey { .. } => format!("PRIMARY KEY ({})", columns(&keys)),
        ConstraintKind::Unique { .. } => format!("UNIQUE ({})", columns(&keys)),
        ConstraintKind::ForeignKey {
            referenced,
            referenced_keys,
        } => format!(
            "FOREIGN KEY ({}) REFERENCES {referenced} ({})",
            columns(&keys),
            columns(referenced_keys)
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use partdb_catalog::{
        ConstraintExpr, DataType, translate_attributes,
        interface::{Attribute, Relation},
    };
    use partdb_id::{ConstraintId, IndexId, TableId};
    use pretty_assertions::assert_eq;

    fn relation(id: u32, attributes: Vec<Attribute>) -> Relation {
        Relation {
            id: TableId::new(id),
            name: format!("r{id}"),
            attributes,
            num_checks: 0,
        }
    }

    fn check(id: u32, relation: u32, name: &str, expr: ConstraintExpr) -> Constraint {
        Constraint {
            id: ConstraintId::new(id),
            relation: TableId::new(relation),
            name: name.to_string(),
            keys: expr.columns().into_iter().collect(),
            kind: ConstraintKind::Check { expr },
        }
    }

    #[test]
    fn groups_by_renumbered_definition() {
        let table = relation(1, vec![
            Attribute::new(1, "a", DataType::Int),
            Attribute::new(2, "b", DataType::Int),
        ]);
        let part = relation(2, vec![
            Attribute::dropped(1, DataType::Text),
            Attribute::new(2, "a", DataType::Int),
            Attribute::new(3, "b", DataType::Int),
        ]);
        let p2t = translate_attributes(&part, &table).unwrap();

        let mut groups = ConstraintGroups::new();
        groups
            .record(
                Role::Table,
                [check(10, 1, "b_pos", ConstraintExpr::half_open_range(2, 0, 10))],
                None,
            )
            .unwrap();
        groups
            .record(
                Role::Part,
                [
                    check(12, 2, "other", ConstraintExpr::half_open_range(3, 0, 10)),
                    check(11, 2, "b_pos", ConstraintExpr::half_open_range(3, 0, 10)),
                ],
                Some(&p2t),
            )
            .unwrap();

        assert_eq!(groups.len(), 1);
        let entry = groups.iter().next().unwrap();
        assert_eq!(entry.key, "CHECK (($2 >= 0) AND ($2 < 10))");
        assert!(!entry.index_backed);
        assert_eq!(entry.table.len(), 1);
        let part_ids = entry.part.iter().map(|c| c.id.get()).collect::<Vec<_>>();
        assert_eq!(part_ids, vec![11, 12]);
        assert!(entry.occurrences(Role::Candidate).is_empty());
    }

    #[test]
    fn index_backed_definitions() {
        let pk = Constraint {
            id: ConstraintId::new(1),
            relation: TableId::new(1),
            name: "t_pkey".to_string(),
            keys: vec![AttrNumber::new(1), AttrNumber::new(2)],
            kind: ConstraintKind::PrimaryKey {
                index: IndexId::new(5),
            },
        };
        assert_eq!(normalized_definition(&pk, None).unwrap(), "PRIMARY KEY ($1, $2)");

        let mut groups = ConstraintGroups::new();
        groups.record(Role::Table, [pk], None).unwrap();
        assert!(groups.get("PRIMARY KEY ($1, $2)").unwrap().index_backed);
    }
}
