//! Identifiers for the objects stored in the partition catalog.
//!
//! Catalog rows reference each other by id rather than by pointer, so every kind of row gets its
//! own newtype to keep a rule id from being handed to something expecting a table id.

use serde::Deserialize;
use serde::Serialize;
use std::fmt::Display;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

macro_rules! catalog_identifier_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, Eq, PartialOrd, Ord, PartialEq, Serialize, Deserialize, Hash)]
        pub struct $name(u32);

        impl $name {
            pub const fn new(v: u32) -> Self {
                Self(v)
            }

            pub fn get(&self) -> u32 {
                self.0
            }

            /// The id that follows this one, used by catalogs that hand out ids sequentially.
            pub fn next(&self) -> Self {
                Self(self.0 + 1)
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

catalog_identifier_type!(
    /// A physical or logical table (a "relation"). Leaf partitions are tables too.
    TableId
);
catalog_identifier_type!(
    /// One partitioning level of one table.
    LevelId
);
catalog_identifier_type!(
    /// One branch at a partitioning level.
    RuleId
);
catalog_identifier_type!(ConstraintId);
catalog_identifier_type!(
    /// The index backing a PRIMARY KEY or UNIQUE constraint.
    IndexId
);
catalog_identifier_type!(
    /// A btree operator class; resolves to the ordering function used to compare key values.
    OpClassId
);
catalog_identifier_type!(TablespaceId);

/// 1-based position of a column within a table, as stored in catalog rows.
#[derive(Debug, Copy, Clone, Eq, PartialOrd, Ord, PartialEq, Serialize, Deserialize, Hash)]
pub struct AttrNumber(i16);

impl AttrNumber {
    pub const fn new(v: i16) -> Self {
        Self(v)
    }

    pub fn get(&self) -> i16 {
        self.0
    }

    /// Zero-based offset of this attribute in a row laid out in attribute order.
    ///
    /// Returns `None` for system or otherwise non-positive attribute numbers.
    pub fn as_index(&self) -> Option<usize> {
        usize::try_from(self.0).ok()?.checked_sub(1)
    }
}

impl From<i16> for AttrNumber {
    fn from(value: i16) -> Self {
        Self(value)
    }
}

impl Display for AttrNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The next snapshot id handed out when a partition tree is read from the catalog.
static NEXT_TREE_SNAPSHOT_ID: AtomicU64 = AtomicU64::new(0);

/// Identifies one in-memory read of a partition tree.
///
/// Two reads of the same catalog state still get different ids, so caches built against one tree
/// can tell that they are being handed another.
#[derive(Debug, Copy, Clone, Eq, PartialOrd, Ord, PartialEq, Hash)]
pub struct TreeSnapshotId(u64);

impl TreeSnapshotId {
    pub fn new() -> Self {
        Self(
            NEXT_TREE_SNAPSHOT_ID
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_add(1))
                .expect("Overflowed with tree snapshot IDs"),
        )
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TreeSnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attr_number_index() {
        assert_eq!(AttrNumber::new(1).as_index(), Some(0));
        assert_eq!(AttrNumber::new(7).as_index(), Some(6));
        assert_eq!(AttrNumber::new(0).as_index(), None);
        assert_eq!(AttrNumber::new(-2).as_index(), None);
    }

    #[test]
    fn snapshot_ids_are_unique() {
        let a = TreeSnapshotId::new();
        let b = TreeSnapshotId::new();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn ids_serialize_transparently() {
        let id = RuleId::new(42);
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
        let back: RuleId = serde_json::from_str("42").unwrap();
        assert_eq!(back, id);
        assert_eq!(id.next(), RuleId::new(43));
    }
}
