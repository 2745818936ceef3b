//! Translation of attribute numbers between relations with the same columns.
//!
//! Parts of a partitioned table may number their columns differently from the table itself
//! (for example after columns were dropped from one but not the other), so expressions and key
//! arrays have to be mapped by column name before they can be compared or copied across.

use bimap::BiHashMap;
use partdb_id::AttrNumber;
use thiserror::Error;

use crate::datum::{DataType, Datum};
use crate::expr::ConstraintExpr;
use crate::interface::Relation;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error("column \"{column}\" of relation \"{src}\" does not exist in relation \"{dst}\"")]
    MissingAttribute {
        src: String,
        dst: String,
        column: String,
    },

    #[error(
        "column \"{column}\" is of type {src_type} in relation \"{src}\" but of type {dst_type} \
         in relation \"{dst}\""
    )]
    TypeMismatch {
        src: String,
        dst: String,
        column: String,
        src_type: DataType,
        dst_type: DataType,
    },

    #[error("attribute {0} has no counterpart")]
    Unmapped(AttrNumber),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Bidirectional mapping from the attribute numbers of a source relation to those of a
/// destination relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeMap {
    map: BiHashMap<AttrNumber, AttrNumber>,
}

/// Pair up the live columns of `src` and `dst` by name.
///
/// Both relations must have exactly the same set of live columns with the same types.
pub fn translate_attributes(src: &Relation, dst: &Relation) -> Result<AttributeMap> {
    let mut map = BiHashMap::with_capacity(src.natts());

    for attr in src.live_attributes() {
        let Some(other) = dst.attribute_by_name(&attr.name) else {
            return Err(Error::MissingAttribute {
                src: src.name.clone(),
                dst: dst.name.clone(),
                column: attr.name.clone(),
            });
        };
        if other.data_type != attr.data_type {
            return Err(Error::TypeMismatch {
                src: src.name.clone(),
                dst: dst.name.clone(),
                column: attr.name.clone(),
                src_type: attr.data_type,
                dst_type: other.data_type,
            });
        }
        map.insert(attr.attnum, other.attnum);
    }

    if let Some(extra) = dst
        .live_attributes()
        .find(|a| !map.contains_right(&a.attnum))
    {
        return Err(Error::MissingAttribute {
            src: dst.name.clone(),
            dst: src.name.clone(),
            column: extra.name.clone(),
        });
    }

    Ok(AttributeMap { map })
}

impl AttributeMap {
    pub fn to_dst(&self, attnum: AttrNumber) -> Option<AttrNumber> {
        self.map.get_by_left(&attnum).copied()
    }

    pub fn to_src(&self, attnum: AttrNumber) -> Option<AttrNumber> {
        self.map.get_by_right(&attnum).copied()
    }

    /// The same pairs, with source and destination swapped.
    pub fn inverse(&self) -> Self {
        Self {
            map: self.map.iter().map(|(l, r)| (*r, *l)).collect(),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.map.iter().all(|(l, r)| l == r)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Rewrite an expression from source numbering into destination numbering.
    pub fn map_expr(&self, expr: &ConstraintExpr) -> Result<ConstraintExpr> {
        expr.map_columns(&mut |a| self.to_dst(a).ok_or(Error::Unmapped(a)))
    }

    pub fn map_keys(&self, keys: &[AttrNumber]) -> Result<Vec<AttrNumber>> {
        keys.iter()
            .map(|a| self.to_dst(*a).ok_or(Error::Unmapped(*a)))
            .collect()
    }

    /// Lay a source row out in destination attribute order. Slots with no source column,
    /// such as dropped destination columns, are null.
    pub fn map_row(&self, row: &[Datum], dst_natts: usize) -> Vec<Datum> {
        let mut out = vec![Datum::Null; dst_natts];
        for (src, dst) in &self.map {
            if let (Some(value), Some(slot)) = (
                src.as_index().and_then(|i| row.get(i)),
                dst.as_index().and_then(|i| out.get_mut(i)),
            ) {
                *slot = value.clone();
            }
        }
        out
    }
}
