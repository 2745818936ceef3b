use partdb_catalog::{ConstraintExpr, Datum, expr::EvalError};
use partdb_id::TableId;

/// A CHECK constraint added to the candidate whose rows still have to be scanned.
///
/// The scan must run after the reconciler's catalog writes are visible, over every row of
/// `relation`, with rows laid out in that relation's attribute order.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingValidation {
    pub relation: TableId,
    pub constraint_name: String,
    /// The constraint's expression, numbered as in `relation`.
    pub qual: ConstraintExpr,
}

impl PendingValidation {
    /// Whether `row` satisfies the constraint. A null result passes, as in SQL.
    pub fn check_row(&self, row: &[Datum]) -> Result<bool, EvalError> {
        match self.qual.evaluate(row)? {
            Datum::Bool(b) => Ok(b),
            Datum::Null => Ok(true),
            other => Err(EvalError::NotBoolean(other)),
        }
    }

    /// Position of the first row violating the constraint.
    pub fn first_violation<'r>(
        &self,
        rows: impl IntoIterator<Item = &'r [Datum]>,
    ) -> Result<Option<usize>, EvalError> {
        for (i, row) in rows.into_iter().enumerate() {
            if !self.check_row(row)? {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }
}
