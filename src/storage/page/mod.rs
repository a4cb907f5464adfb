mod codec;
mod hash_table_bucket_page;
mod hash_table_directory_page;

pub use codec::Storable;
pub use hash_table_bucket_page::{bucket_array_size, HashTableBucketPage};
pub use hash_table_directory_page::{HashTableDirectoryPage, DIRECTORY_ARRAY_SIZE};
