//! Resolution of operator classes into ordering functions.

use partdb_catalog::{DataType, Datum};
use partdb_id::OpClassId;
use std::cmp::Ordering;
use std::fmt::Debug;
use std::sync::Arc;

use crate::{Error, Result};

/// Three-way comparison of a row value (left) against a bound value (right).
pub type Comparator = Arc<dyn Fn(&Datum, &Datum) -> Ordering + Send + Sync>;

/// Looks up the ordering support function of an operator class for a pair of types.
pub trait ComparatorProvider: Debug + Send + Sync {
    fn comparator(&self, opclass: OpClassId, lhs: DataType, rhs: DataType) -> Result<Comparator>;
}

/// The btree operator classes every catalog knows about.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinOpClasses;

impl BuiltinOpClasses {
    pub const INT: OpClassId = OpClassId::new(1);
    pub const FLOAT: OpClassId = OpClassId::new(2);
    pub const TEXT: OpClassId = OpClassId::new(3);
    pub const BOOL: OpClassId = OpClassId::new(4);
    pub const TIMESTAMP: OpClassId = OpClassId::new(5);

    /// The default operator class for columns of `data_type`.
    pub fn default_for(data_type: DataType) -> OpClassId {
        match data_type {
            DataType::Int => Self::INT,
            DataType::Float => Self::FLOAT,
            DataType::Text => Self::TEXT,
            DataType::Bool => Self::BOOL,
            DataType::Timestamp => Self::TIMESTAMP,
        }
    }
}

fn numeric(t: DataType) -> bool {
    matches!(t, DataType::Int | DataType::Float)
}

impl ComparatorProvider for BuiltinOpClasses {
    fn comparator(&self, opclass: OpClassId, lhs: DataType, rhs: DataType) -> Result<Comparator> {
        let supported = match opclass {
            // integer and float operators form one family with cross-type support
            Self::INT | Self::FLOAT => numeric(lhs) && numeric(rhs),
            Self::TEXT => lhs == DataType::Text && rhs == DataType::Text,
            Self::BOOL => lhs == DataType::Bool && rhs == DataType::Bool,
            Self::TIMESTAMP => lhs == DataType::Timestamp && rhs == DataType::Timestamp,
            _ => return Err(Error::UnknownOpClass(opclass)),
        };
        if !supported {
            return Err(Error::MissingComparator { opclass, lhs, rhs });
        }

        Ok(Arc::new(|a: &Datum, b: &Datum| a.total_cmp(b)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_family_is_cross_type() {
        let cmp = BuiltinOpClasses
            .comparator(BuiltinOpClasses::INT, DataType::Float, DataType::Int)
            .unwrap();
        assert_eq!(cmp(&Datum::Float(2.5), &Datum::Int(2)), Ordering::Greater);
        assert_eq!(cmp(&Datum::Int(2), &Datum::Int(2)), Ordering::Equal);
    }

    #[test]
    fn unsupported_pairs() {
        assert!(matches!(
            BuiltinOpClasses.comparator(BuiltinOpClasses::TEXT, DataType::Int, DataType::Text),
            Err(Error::MissingComparator { .. })
        ));
        assert!(matches!(
            BuiltinOpClasses.comparator(OpClassId::new(77), DataType::Int, DataType::Int),
            Err(Error::UnknownOpClass(id)) if id == OpClassId::new(77)
        ));
    }

    #[test]
    fn defaults() {
        assert_eq!(
            BuiltinOpClasses::default_for(DataType::Text),
            BuiltinOpClasses::TEXT
        );
        assert_eq!(
            BuiltinOpClasses::default_for(DataType::Timestamp),
            BuiltinOpClasses::TIMESTAMP
        );
    }
}
