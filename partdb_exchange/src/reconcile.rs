use hashbrown::HashSet;
use partdb_catalog::{
    AttributeMap,
    interface::{Constraint, ConstraintKind, NewConstraint, Relation, RepoCollection},
    translate_attributes,
};
use partdb_id::ConstraintId;
use tracing::{debug, info, warn};

use crate::plan::{ExchangePlan, plan_exchange};
use crate::validation::PendingValidation;
use crate::{ExchangeOptions, ReconcileError, Result};

/// Brings the constraints of `candidate` in line with those of `part` so that it can take the
/// part's place in `table`.
///
/// With `validate` set, every CHECK constraint added to the candidate comes back as a
/// [`PendingValidation`] for the caller to run once these writes are visible.
pub async fn reconcile(
    repos: &mut dyn RepoCollection,
    table: &Relation,
    part: &Relation,
    candidate: &Relation,
    validate: bool,
) -> Result<Vec<PendingValidation>> {
    let options = ExchangeOptions {
        validate,
        ..Default::default()
    };
    reconcile_with_options(repos, table, part, candidate, &options).await
}

pub async fn reconcile_with_options(
    repos: &mut dyn RepoCollection,
    table: &Relation,
    part: &Relation,
    candidate: &Relation,
    options: &ExchangeOptions,
) -> Result<Vec<PendingValidation>> {
    let plan = plan_exchange(repos, table, part, candidate).await?;
    plan.check()?;

    // everything that can fail on catalog data is resolved before the first write
    let table_to_candidate = translate_attributes(table, candidate)?;
    let part_to_candidate = translate_attributes(part, candidate)?;
    let additions = plan
        .missing
        .iter()
        .map(|c| translate(c, &table_to_candidate, candidate))
        .chain(
            plan.missing_partition_guards
                .iter()
                .map(|c| translate(c, &part_to_candidate, candidate)),
        )
        .collect::<Result<Vec<_>>>()?;
    let candidate_constraints = repos.constraints().list_by_relation(candidate.id).await?;
    let part_constraints = repos.constraints().list_by_relation(part.id).await?;
    check_names(
        &plan,
        &additions,
        (candidate, &candidate_constraints),
        (part, &part_constraints),
    )?;

    let mut validations = vec![];
    for new in additions {
        let added = repos.constraints().create(new).await?;
        match &added.kind {
            ConstraintKind::Check { expr } if options.validate => {
                validations.push(PendingValidation {
                    relation: candidate.id,
                    constraint_name: added.name.clone(),
                    qual: expr.clone(),
                });
            }
            ConstraintKind::ForeignKey { .. } if options.validate => {
                warn!(
                    constraint = %added.name,
                    relation = %candidate.name,
                    "foreign key constraint added without validating existing rows"
                );
            }
            _ => {}
        }
    }

    swap_names(repos, &plan, part, options).await?;

    let added_checks = i32::try_from(plan.added_checks()).unwrap_or(i32::MAX);
    if added_checks > 0 {
        let current = repos
            .relations()
            .get_by_id(candidate.id)
            .await?
            .ok_or(partdb_catalog::interface::Error::RelationNotFound(candidate.id))?;
        repos
            .relations()
            .set_num_checks(candidate.id, current.num_checks.saturating_add(added_checks))
            .await?;
    }

    info!(
        table = %table.name,
        part = %part.name,
        candidate = %candidate.name,
        added = plan.missing.len() + plan.missing_partition_guards.len(),
        swapped = plan.name_swaps.len(),
        validations = validations.len(),
        "reconciled exchange constraints"
    );
    Ok(validations)
}

/// Fails if a constraint added to the candidate, or a name one of the swaps gives to either
/// relation, collides with a name the relation holds at that point.
fn check_names(
    plan: &ExchangePlan,
    additions: &[NewConstraint],
    (candidate, candidate_constraints): (&Relation, &[Constraint]),
    (part, part_constraints): (&Relation, &[Constraint]),
) -> Result<()> {
    let conflict = |relation: &Relation, name: &str| ReconcileError::NameConflict {
        relation: relation.name.clone(),
        name: name.to_string(),
    };

    // additions are written while the candidate still holds all of its names
    let mut taken: HashSet<&str> = candidate_constraints
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    let given = additions
        .iter()
        .map(|c| c.name.as_str())
        .chain(plan.name_swaps.iter().map(|s| s.part.name.as_str()));
    for name in given {
        if !taken.insert(name) {
            return Err(conflict(candidate, name));
        }
    }

    let swapped: HashSet<ConstraintId> = plan.name_swaps.iter().map(|s| s.part.id).collect();
    let mut taken: HashSet<&str> = part_constraints
        .iter()
        .filter(|c| !swapped.contains(&c.id))
        .map(|c| c.name.as_str())
        .collect();
    for name in plan.name_swaps.iter().map(|s| s.candidate.name.as_str()) {
        if !taken.insert(name) {
            return Err(conflict(part, name));
        }
    }
    Ok(())
}

/// `constraint` as a new constraint of `candidate`, columns renumbered through `map`.
fn translate(
    constraint: &Constraint,
    map: &AttributeMap,
    candidate: &Relation,
) -> Result<NewConstraint> {
    let kind = match &constraint.kind {
        ConstraintKind::Check { expr } => ConstraintKind::Check {
            expr: map.map_expr(expr)?,
        },
        ConstraintKind::ForeignKey {
            referenced,
            referenced_keys,
        } => ConstraintKind::ForeignKey {
            referenced: *referenced,
            referenced_keys: referenced_keys.clone(),
        },
        ConstraintKind::PrimaryKey { .. } => {
            return Err(ReconcileError::MissingIndexBacked {
                kind: "PRIMARY KEY",
                name: constraint.name.clone(),
            });
        }
        ConstraintKind::Unique { .. } => {
            return Err(ReconcileError::MissingIndexBacked {
                kind: "UNIQUE",
                name: constraint.name.clone(),
            });
        }
    };

    Ok(NewConstraint {
        relation: candidate.id,
        name: constraint.name.clone(),
        keys: map.map_keys(&constraint.keys)?,
        kind,
    })
}

/// Gives each candidate constraint the name of its part counterpart and the other way round,
/// going through a temporary name since index-backed names are unique catalog-wide.
async fn swap_names(
    repos: &mut dyn RepoCollection,
    plan: &ExchangePlan,
    part: &Relation,
    options: &ExchangeOptions,
) -> Result<()> {
    for (n, swap) in plan.name_swaps.iter().enumerate() {
        debug!(
            part = %swap.part.name,
            candidate = %swap.candidate.name,
            "exchanging constraint names"
        );
        let temp = format!("{}{}_{n}", options.temp_name_prefix, part.id);
        let constraints = repos.constraints();
        constraints.rename(swap.part.id, &temp).await?;
        constraints
            .rename(swap.candidate.id, &swap.part.name)
            .await?;
        constraints.rename(swap.part.id, &swap.candidate.name).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use partdb_catalog::{
        CmpOp, ConstraintExpr, DataType, Datum,
        interface::{Attribute, Catalog},
    };
    use partdb_test_helpers::{TestCatalog, TestTable, inherit_index};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    /// A table partitioned on `id`, its first part and a candidate whose columns are numbered
    /// differently after a dropped column.
    async fn players(
        catalog: &Arc<TestCatalog>,
    ) -> (Arc<TestTable>, Arc<TestTable>, Arc<TestTable>) {
        let table = catalog
            .create_table("sales", &[("id", DataType::Int), ("amount", DataType::Float)])
            .await;
        let part = table.create_like("sales_1_prt_1").await;
        let candidate = catalog
            .create_relation("incoming", vec![
                Attribute::dropped(1, DataType::Text),
                Attribute::new(2, "amount", DataType::Float),
                Attribute::new(3, "id", DataType::Int),
            ])
            .await;
        (table, part, candidate)
    }

    fn amount_positive() -> ConstraintExpr {
        ConstraintExpr::compare(
            CmpOp::Gt,
            ConstraintExpr::column(2),
            ConstraintExpr::constant(0.0),
        )
    }

    async fn run(
        catalog: &TestCatalog,
        table: &TestTable,
        part: &TestTable,
        candidate: &TestTable,
        validate: bool,
    ) -> Result<Vec<PendingValidation>> {
        let mut repos = catalog.repositories().await;
        reconcile(
            repos.as_mut(),
            &table.relation,
            &part.relation,
            &candidate.relation,
            validate,
        )
        .await
    }

    #[test_log::test(tokio::test)]
    async fn missing_regular_constraint_is_added_translated() {
        let catalog = TestCatalog::new();
        let (table, part, candidate) = players(&catalog).await;
        table.create_check("c1", amount_positive()).await;
        part.create_check("c1", amount_positive()).await;

        let validations = run(&catalog, &table, &part, &candidate, true).await.unwrap();

        let added = candidate.constraints().await;
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].name, "c1");
        let translated = ConstraintExpr::compare(
            CmpOp::Gt,
            ConstraintExpr::column(2),
            ConstraintExpr::constant(0.0),
        );
        assert_eq!(added[0].kind, ConstraintKind::Check {
            expr: translated.clone()
        });
        assert_eq!(candidate.reload().await.num_checks, 1);

        assert_eq!(validations, vec![PendingValidation {
            relation: candidate.id(),
            constraint_name: "c1".to_string(),
            qual: translated,
        }]);
        let row = [Datum::Null, Datum::Float(-1.0), Datum::Int(5)];
        assert!(!validations[0].check_row(&row).unwrap());
    }

    #[tokio::test]
    async fn guard_is_translated_from_part_numbering() {
        let catalog = TestCatalog::new();
        let (table, part, candidate) = players(&catalog).await;
        part.create_check("sales_1_prt_1_check", ConstraintExpr::half_open_range(1, 0, 100))
            .await;

        let validations = run(&catalog, &table, &part, &candidate, false).await.unwrap();
        assert!(validations.is_empty());

        let added = candidate.constraints().await;
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].keys, vec![partdb_id::AttrNumber::new(3)]);
        assert_eq!(added[0].kind, ConstraintKind::Check {
            expr: ConstraintExpr::half_open_range(3, 0, 100)
        });

        // nothing left to do on a second pass
        let again = run(&catalog, &table, &part, &candidate, true).await.unwrap();
        assert!(again.is_empty());
        assert_eq!(candidate.constraints().await.len(), 1);
        assert_eq!(candidate.reload().await.num_checks, 1);
    }

    #[tokio::test]
    async fn maverick_aborts_before_writing() {
        let catalog = TestCatalog::new();
        let (table, part, candidate) = players(&catalog).await;
        table.create_check("c1", amount_positive()).await;
        part.create_check("c1", amount_positive()).await;
        candidate
            .create_check("stray", ConstraintExpr::half_open_range(3, 5, 6))
            .await;

        let err = run(&catalog, &table, &part, &candidate, true)
            .await
            .unwrap_err();
        assert!(matches!(
            &err,
            ReconcileError::ExtraConstraints { relation, names }
                if relation == "incoming" && names == &vec!["stray".to_string()]
        ));

        let names = candidate
            .constraints()
            .await
            .into_iter()
            .map(|c| c.name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["stray"]);
        assert_eq!(candidate.reload().await.num_checks, 0);
    }

    #[tokio::test]
    async fn planning_is_repeatable() {
        let catalog = TestCatalog::new();
        let (table, part, candidate) = players(&catalog).await;
        table.create_check("c1", amount_positive()).await;
        part.create_check("c1", amount_positive()).await;
        candidate
            .create_check("stray", ConstraintExpr::half_open_range(3, 5, 6))
            .await;

        let mut repos = catalog.repositories().await;
        let (t, p, c) = (&table.relation, &part.relation, &candidate.relation);
        let first = plan_exchange(repos.as_mut(), t, p, c).await.unwrap();
        let second = plan_exchange(repos.as_mut(), t, p, c).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.missing.len(), 1);
        assert_eq!(first.extra.len(), 1);
    }

    #[tokio::test]
    async fn index_backed_names_are_swapped() {
        let catalog = TestCatalog::new();
        let (table, part, candidate) = players(&catalog).await;
        let (_, table_index) = table.create_primary_key("sales_pkey", &[1]).await;
        let (_, part_index) = part.create_primary_key("sales_1_prt_1_pkey", &[1]).await;
        inherit_index(&catalog, &table_index, &part_index).await;
        candidate.create_primary_key("incoming_pkey", &[3]).await;

        let validations = run(&catalog, &table, &part, &candidate, true).await.unwrap();
        assert!(validations.is_empty());

        let name_of =
            |cons: Vec<Constraint>| cons.into_iter().map(|c| c.name).collect::<Vec<_>>();
        assert_eq!(name_of(candidate.constraints().await), vec!["sales_1_prt_1_pkey"]);
        assert_eq!(name_of(part.constraints().await), vec!["incoming_pkey"]);
        assert_eq!(candidate.reload().await.num_checks, 0);
    }

    #[tokio::test]
    async fn missing_inherited_is_fatal() {
        let catalog = TestCatalog::new();
        let (table, part, candidate) = players(&catalog).await;
        table.create_unique("sales_id_key", &[1]).await;
        table.create_check("c1", amount_positive()).await;

        let err = run(&catalog, &table, &part, &candidate, true)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "inherited constraint(s) found on \"sales\" that do not exist on \"sales_1_prt_1\": \
             \"sales_id_key\"\nHINT: Attach missing constraints and retry."
        );
        assert!(candidate.constraints().await.is_empty());
    }

    #[tokio::test]
    async fn name_conflicts_abort_before_writing() {
        let catalog = TestCatalog::new();
        let (table, part, candidate) = players(&catalog).await;
        table.create_check("c1", amount_positive()).await;
        part.create_check("c1", ConstraintExpr::half_open_range(1, 0, 10))
            .await;

        let err = run(&catalog, &table, &part, &candidate, true)
            .await
            .unwrap_err();
        assert!(matches!(
            &err,
            ReconcileError::NameConflict { relation, name } if relation == "incoming" && name == "c1"
        ));
        assert!(candidate.constraints().await.is_empty());
        assert_eq!(candidate.reload().await.num_checks, 0);

        // the part would get back a name one of its other constraints holds
        let catalog = TestCatalog::new();
        let (table, part, candidate) = players(&catalog).await;
        let (_, table_index) = table.create_primary_key("sales_pkey", &[1]).await;
        let (_, part_index) = part.create_primary_key("sales_1_prt_1_pkey", &[1]).await;
        inherit_index(&catalog, &table_index, &part_index).await;
        part.create_check("incoming_pkey", ConstraintExpr::half_open_range(1, 0, 10))
            .await;
        candidate
            .create_check("guard", ConstraintExpr::half_open_range(3, 0, 10))
            .await;
        candidate.create_primary_key("incoming_pkey", &[3]).await;

        let err = run(&catalog, &table, &part, &candidate, true)
            .await
            .unwrap_err();
        assert!(matches!(
            &err,
            ReconcileError::NameConflict { relation, name }
                if relation == "sales_1_prt_1" && name == "incoming_pkey"
        ));
        let name_of =
            |cons: Vec<Constraint>| cons.into_iter().map(|c| c.name).collect::<Vec<_>>();
        assert_eq!(name_of(candidate.constraints().await), vec!["guard", "incoming_pkey"]);
        assert_eq!(name_of(part.constraints().await), vec![
            "sales_1_prt_1_pkey",
            "incoming_pkey"
        ]);
    }

    #[tokio::test]
    async fn part_index_without_parent_is_fatal() {
        let catalog = TestCatalog::new();
        let (table, part, candidate) = players(&catalog).await;
        let (_, table_index) = table.create_unique("sales_id_key", &[1]).await;
        let (_, part_index) = part.create_unique("sales_1_prt_1_id_key", &[1]).await;
        inherit_index(&catalog, &table_index, &part_index).await;
        part.create_unique("sales_1_prt_1_id_key1", &[1]).await;
        candidate.create_unique("incoming_id_key", &[3]).await;
        candidate.create_unique("incoming_id_key1", &[3]).await;

        let err = run(&catalog, &table, &part, &candidate, true)
            .await
            .unwrap_err();
        assert!(matches!(
            &err,
            ReconcileError::ExtraConstraints { relation, names }
                if relation == "incoming" && names == &vec!["sales_1_prt_1_id_key1".to_string()]
        ));

        let names = candidate
            .constraints()
            .await
            .into_iter()
            .map(|c| c.name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["incoming_id_key", "incoming_id_key1"]);
    }

    #[tokio::test]
    async fn writes_roll_back_with_the_transaction() {
        let catalog = TestCatalog::new();
        let (table, part, candidate) = players(&catalog).await;
        table.create_check("c1", amount_positive()).await;
        part.create_check("c1", amount_positive()).await;

        let mut txn = catalog.catalog.start_transaction().await.unwrap();
        reconcile(
            txn.repos(),
            &table.relation,
            &part.relation,
            &candidate.relation,
            true,
        )
        .await
        .unwrap();
        assert_eq!(
            txn.constraints()
                .list_by_relation(candidate.id())
                .await
                .unwrap()
                .len(),
            1
        );
        txn.abort().await.unwrap();

        assert!(candidate.constraints().await.is_empty());
    }

    #[tokio::test]
    async fn foreign_keys_are_copied() {
        let catalog = TestCatalog::new();
        let (table, part, candidate) = players(&catalog).await;
        let customers = catalog
            .create_table("customers", &[("id", DataType::Int)])
            .await;
        table
            .create_foreign_key("sales_id_fkey", &[1], customers.id(), &[1])
            .await;
        part.create_foreign_key("sales_id_fkey", &[1], customers.id(), &[1])
            .await;

        let validations = run(&catalog, &table, &part, &candidate, true).await.unwrap();
        assert!(validations.is_empty());

        let added = candidate.constraints().await;
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].keys, vec![partdb_id::AttrNumber::new(3)]);
        assert_eq!(candidate.reload().await.num_checks, 0);
    }
}
