pub mod hash;

use std::cmp::Ordering;

pub use hash::{ExtendibleHashTable, HashTableError};

/// Key ordering callable carried by an index. Indexes are generic over
/// the comparator rather than requiring `K: Ord` directly, so a caller
/// can impose a domain ordering (collations, composite keys) on a plain
/// byte-level key type.
pub trait KeyComparator<K>: Send + Sync {
    fn compare(&self, lhs: &K, rhs: &K) -> Ordering;
}

/// The obvious comparator for keys that are already `Ord`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OrdComparator;

impl<K: Ord> KeyComparator<K> for OrdComparator {
    fn compare(&self, lhs: &K, rhs: &K) -> Ordering {
        lhs.cmp(rhs)
    }
}
