mod error;
mod extendible_hash_table;

pub use error::HashTableError;
pub use extendible_hash_table::ExtendibleHashTable;
