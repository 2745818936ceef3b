//! Boolean expressions held by CHECK constraints.
//!
//! Column references are by attribute number, so an expression is only meaningful together with
//! the relation whose attribute numbering it uses. [`ConstraintExpr::map_columns`] moves an
//! expression from one relation's numbering to another's, and the [`Display`] form is the
//! normalized text used to compare constraints across relations.

use partdb_id::AttrNumber;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt::Display;
use thiserror::Error;

use crate::datum::Datum;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("column {attnum} is outside of a row with {width} columns")]
    ColumnOutOfRange { attnum: AttrNumber, width: usize },

    #[error("cannot compare {lhs} with {rhs}")]
    Incomparable { lhs: Datum, rhs: Datum },

    #[error("expected a boolean operand, found {0}")]
    NotBoolean(Datum),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CmpOp {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
        }
    }

    fn holds(&self, ord: Ordering) -> bool {
        match self {
            Self::Eq => ord == Ordering::Equal,
            Self::NotEq => ord != Ordering::Equal,
            Self::Lt => ord == Ordering::Less,
            Self::LtEq => ord != Ordering::Greater,
            Self::Gt => ord == Ordering::Greater,
            Self::GtEq => ord != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstraintExpr {
    Column(AttrNumber),
    Const(Datum),
    Compare {
        op: CmpOp,
        lhs: Box<ConstraintExpr>,
        rhs: Box<ConstraintExpr>,
    },
    And(Vec<ConstraintExpr>),
    Or(Vec<ConstraintExpr>),
    Not(Box<ConstraintExpr>),
    IsNull(Box<ConstraintExpr>),
    IsNotNull(Box<ConstraintExpr>),
}

impl ConstraintExpr {
    pub fn column(attnum: i16) -> Self {
        Self::Column(AttrNumber::new(attnum))
    }

    pub fn constant(value: impl Into<Datum>) -> Self {
        Self::Const(value.into())
    }

    pub fn compare(op: CmpOp, lhs: Self, rhs: Self) -> Self {
        Self::Compare {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// `column >= start AND column < end`, the shape of the CHECK that guards a RANGE partition.
    pub fn half_open_range(attnum: i16, start: impl Into<Datum>, end: impl Into<Datum>) -> Self {
        Self::And(vec![
            Self::compare(CmpOp::GtEq, Self::column(attnum), Self::constant(start)),
            Self::compare(CmpOp::Lt, Self::column(attnum), Self::constant(end)),
        ])
    }

    /// Every attribute referenced by the expression.
    pub fn columns(&self) -> BTreeSet<AttrNumber> {
        let mut out = BTreeSet::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut BTreeSet<AttrNumber>) {
        match self {
            Self::Column(a) => {
                out.insert(*a);
            }
            Self::Const(_) => {}
            Self::Compare { lhs, rhs, .. } => {
                lhs.collect_columns(out);
                rhs.collect_columns(out);
            }
            Self::And(args) | Self::Or(args) => {
                for arg in args {
                    arg.collect_columns(out);
                }
            }
            Self::Not(arg) | Self::IsNull(arg) | Self::IsNotNull(arg) => arg.collect_columns(out),
        }
    }

    /// Rewrite every column reference through `f`, failing on the first reference `f` rejects.
    pub fn map_columns<E, F>(&self, f: &mut F) -> Result<Self, E>
    where
        F: FnMut(AttrNumber) -> Result<AttrNumber, E>,
    {
        Ok(match self {
            Self::Column(a) => Self::Column(f(*a)?),
            Self::Const(d) => Self::Const(d.clone()),
            Self::Compare { op, lhs, rhs } => Self::Compare {
                op: *op,
                lhs: Box::new(lhs.map_columns(f)?),
                rhs: Box::new(rhs.map_columns(f)?),
            },
            Self::And(args) => Self::And(
                args.iter()
                    .map(|a| a.map_columns(f))
                    .collect::<Result<_, _>>()?,
            ),
            Self::Or(args) => Self::Or(
                args.iter()
                    .map(|a| a.map_columns(f))
                    .collect::<Result<_, _>>()?,
            ),
            Self::Not(arg) => Self::Not(Box::new(arg.map_columns(f)?)),
            Self::IsNull(arg) => Self::IsNull(Box::new(arg.map_columns(f)?)),
            Self::IsNotNull(arg) => Self::IsNotNull(Box::new(arg.map_columns(f)?)),
        })
    }

    /// Evaluate against a row laid out in attribute order, with SQL three-valued logic.
    ///
    /// The result is `Datum::Bool` or `Datum::Null` for boolean expressions.
    pub fn evaluate(&self, row: &[Datum]) -> Result<Datum, EvalError> {
        match self {
            Self::Column(a) => a
                .as_index()
                .and_then(|i| row.get(i))
                .cloned()
                .ok_or(EvalError::ColumnOutOfRange {
                    attnum: *a,
                    width: row.len(),
                }),
            Self::Const(d) => Ok(d.clone()),
            Self::Compare { op, lhs, rhs } => {
                let l = lhs.evaluate(row)?;
                let r = rhs.evaluate(row)?;
                if l.is_null() || r.is_null() {
                    return Ok(Datum::Null);
                }
                match l.sql_cmp(&r) {
                    Some(ord) => Ok(Datum::Bool(op.holds(ord))),
                    None => Err(EvalError::Incomparable { lhs: l, rhs: r }),
                }
            }
            Self::And(args) => {
                let mut saw_null = false;
                for arg in args {
                    match as_bool(arg.evaluate(row)?)? {
                        Some(false) => return Ok(Datum::Bool(false)),
                        Some(true) => {}
                        None => saw_null = true,
                    }
                }
                Ok(if saw_null { Datum::Null } else { Datum::Bool(true) })
            }
            Self::Or(args) => {
                let mut saw_null = false;
                for arg in args {
                    match as_bool(arg.evaluate(row)?)? {
                        Some(true) => return Ok(Datum::Bool(true)),
                        Some(false) => {}
                        None => saw_null = true,
                    }
                }
                Ok(if saw_null { Datum::Null } else { Datum::Bool(false) })
            }
            Self::Not(arg) => Ok(match as_bool(arg.evaluate(row)?)? {
                Some(b) => Datum::Bool(!b),
                None => Datum::Null,
            }),
            Self::IsNull(arg) => Ok(Datum::Bool(arg.evaluate(row)?.is_null())),
            Self::IsNotNull(arg) => Ok(Datum::Bool(!arg.evaluate(row)?.is_null())),
        }
    }
}

fn as_bool(d: Datum) -> Result<Option<bool>, EvalError> {
    match d {
        Datum::Null => Ok(None),
        Datum::Bool(b) => Ok(Some(b)),
        other => Err(EvalError::NotBoolean(other)),
    }
}

fn write_joined(
    f: &mut std::fmt::Formatter<'_>,
    args: &[ConstraintExpr],
    sep: &str,
) -> std::fmt::Result {
    f.write_str("(")?;
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{arg}")?;
    }
    f.write_str(")")
}

impl Display for ConstraintExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Column(a) => write!(f, "${a}"),
            Self::Const(d) => write!(f, "{d}"),
            Self::Compare { op, lhs, rhs } => write!(f, "({lhs} {} {rhs})", op.as_str()),
            Self::And(args) => write_joined(f, args, " AND "),
            Self::Or(args) => write_joined(f, args, " OR "),
            Self::Not(arg) => write!(f, "(NOT {arg})"),
            Self::IsNull(arg) => write!(f, "({arg} IS NULL)"),
            Self::IsNotNull(arg) => write!(f, "({arg} IS NOT NULL)"),
        }
    }
}
