use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;
use log::debug;
use parking_lot::RwLock;
use siphasher::sip::SipHasher13;

use crate::common::types::PageId;
use crate::index::hash::error::HashTableError;
use crate::index::KeyComparator;
use crate::storage::buffer::{BufferPool, BufferPoolError};
use crate::storage::page::{HashTableBucketPage, HashTableDirectoryPage, Storable};

// Fixed hash keys: the index is disk-resident, so hashes must agree
// across process restarts.
const HASH_KEY_0: u64 = 0x6c96_1a1e_59c9_47d1;
const HASH_KEY_1: u64 = 0x8e3f_25b4_4d0c_9b2f;

/// Disk-resident extendible hash table: one directory page addressing a
/// set of bucket pages, all living through the buffer pool.
///
/// Concurrency: a table-wide reader/writer latch serializes structural
/// changes (splits and merges run under the write latch) while point
/// operations share the read latch and coordinate per bucket through the
/// page latches. Every page is pinned for the duration of its use and
/// unpinned before the table latch is released.
pub struct ExtendibleHashTable<K, V, C> {
    buffer_pool: Arc<dyn BufferPool>,
    directory_page_id: PageId,
    comparator: C,
    table_latch: RwLock<()>,
    _marker: PhantomData<fn(K, V)>,
}

impl<K, V, C> ExtendibleHashTable<K, V, C>
where
    K: Storable + Hash,
    V: Storable,
    C: KeyComparator<K>,
{
    /// Create a fresh table: a directory at global depth 1 over two empty
    /// buckets.
    pub fn new(buffer_pool: Arc<dyn BufferPool>, comparator: C) -> Result<Self, HashTableError> {
        let (directory_page, directory_page_id) = buffer_pool.new_page()?;
        let (_, bucket_0_page_id) = buffer_pool.new_page()?;
        let (_, bucket_1_page_id) = buffer_pool.new_page()?;

        let mut directory = HashTableDirectoryPage::new(directory_page_id);
        directory.incr_global_depth();
        directory.set_bucket_page_id(0, bucket_0_page_id);
        directory.set_local_depth(0, 1);
        directory.set_bucket_page_id(1, bucket_1_page_id);
        directory.set_local_depth(1, 1);
        directory.store(&mut directory_page.write());

        buffer_pool.unpin_page(directory_page_id, true)?;
        // Fresh pages are zeroed, and a zeroed bucket page is an empty
        // bucket; unpinning clean is safe.
        buffer_pool.unpin_page(bucket_0_page_id, false)?;
        buffer_pool.unpin_page(bucket_1_page_id, false)?;

        Ok(Self {
            buffer_pool,
            directory_page_id,
            comparator,
            table_latch: RwLock::new(()),
            _marker: PhantomData,
        })
    }

    /// Attach to an existing table by its directory page id.
    pub fn open(
        buffer_pool: Arc<dyn BufferPool>,
        comparator: C,
        directory_page_id: PageId,
    ) -> Self {
        Self {
            buffer_pool,
            directory_page_id,
            comparator,
            table_latch: RwLock::new(()),
            _marker: PhantomData,
        }
    }

    pub fn directory_page_id(&self) -> PageId {
        self.directory_page_id
    }

    fn hash(key: &K) -> u32 {
        let mut hasher = SipHasher13::new_with_keys(HASH_KEY_0, HASH_KEY_1);
        key.hash(&mut hasher);
        hasher.finish() as u32
    }

    fn bucket_index(directory: &HashTableDirectoryPage, key: &K) -> usize {
        (Self::hash(key) & directory.global_depth_mask()) as usize
    }

    /// Collect every value stored under `key`.
    pub fn get_value(&self, key: &K) -> Result<Vec<V>, HashTableError> {
        let _guard = self.table_latch.read();

        let directory_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let directory = HashTableDirectoryPage::load(&directory_page.read());
        let bucket_page_id = directory.bucket_page_id(Self::bucket_index(&directory, key));
        let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;

        let mut result = Vec::new();
        {
            let bucket = bucket_page.read();
            HashTableBucketPage::<K, V>::get_value(&bucket, key, &self.comparator, &mut result);
        }

        self.buffer_pool.unpin_page(bucket_page_id, false)?;
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;

        Ok(result)
    }

    /// Insert a `(key, value)` pair. Returns `false` if the exact pair is
    /// already present.
    pub fn insert(&self, key: &K, value: &V) -> Result<bool, HashTableError> {
        {
            let _guard = self.table_latch.read();

            let directory_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
            let directory = HashTableDirectoryPage::load(&directory_page.read());
            let bucket_page_id = directory.bucket_page_id(Self::bucket_index(&directory, key));
            let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;

            let mut full = false;
            let inserted = {
                let mut bucket = bucket_page.write();
                if HashTableBucketPage::<K, V>::is_full(&bucket) {
                    full = true;
                    false
                } else {
                    HashTableBucketPage::<K, V>::insert(&mut bucket, key, value, &self.comparator)
                }
            };

            self.buffer_pool.unpin_page(bucket_page_id, inserted)?;
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;

            if !full {
                return Ok(inserted);
            }
            // Bucket is full: fall through to the split path with all
            // latches and pins released.
        }

        self.split_insert(key, value)
    }

    /// Split the target bucket until it has room, then insert. Runs under
    /// the table write latch; may split repeatedly when the bucket's keys
    /// keep colliding.
    fn split_insert(&self, key: &K, value: &V) -> Result<bool, HashTableError> {
        let _guard = self.table_latch.write();

        let directory_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let mut directory = HashTableDirectoryPage::load(&directory_page.read());

        let inserted = loop {
            let bucket_idx = Self::bucket_index(&directory, key);
            let bucket_page_id = directory.bucket_page_id(bucket_idx);
            let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;

            {
                let mut bucket = bucket_page.write();
                if !HashTableBucketPage::<K, V>::is_full(&bucket) {
                    let inserted =
                        HashTableBucketPage::<K, V>::insert(&mut bucket, key, value, &self.comparator);
                    drop(bucket);
                    self.buffer_pool.unpin_page(bucket_page_id, inserted)?;
                    break inserted;
                }
            }

            // Allocate the image bucket before touching the directory so
            // an allocation failure leaves it unchanged.
            let (image_page, image_page_id) = match self.buffer_pool.new_page() {
                Ok(pair) => pair,
                Err(e) => {
                    self.buffer_pool.unpin_page(bucket_page_id, false)?;
                    directory.store(&mut directory_page.write());
                    self.buffer_pool.unpin_page(self.directory_page_id, true)?;
                    return Err(match e {
                        BufferPoolError::BufferPoolFull => HashTableError::OutOfMemory,
                        other => other.into(),
                    });
                }
            };

            if directory.local_depth(bucket_idx) == directory.global_depth() {
                directory.incr_global_depth();
                debug!("hash directory doubled to global depth {}", directory.global_depth());
            }
            directory.incr_local_depth(bucket_idx);

            let image_idx = directory.split_image_index(bucket_idx);
            let new_depth = directory.local_depth(bucket_idx);
            directory.set_local_depth(image_idx, new_depth);
            directory.set_bucket_page_id(image_idx, image_page_id);

            // Rehash the split bucket: entries whose hash selects the new
            // high bit move to the image bucket.
            let local_mask = directory.local_depth_mask(bucket_idx);
            let image_bits = image_idx as u32 & local_mask;
            {
                let mut bucket = bucket_page.write();
                let mut image = image_page.write();
                for i in 0..HashTableBucketPage::<K, V>::CAPACITY {
                    if !HashTableBucketPage::<K, V>::is_readable(&bucket, i) {
                        continue;
                    }
                    let slot_key = HashTableBucketPage::<K, V>::key_at(&bucket, i);
                    if Self::hash(&slot_key) & local_mask == image_bits {
                        let slot_value = HashTableBucketPage::<K, V>::value_at(&bucket, i);
                        HashTableBucketPage::<K, V>::insert(
                            &mut image,
                            &slot_key,
                            &slot_value,
                            &self.comparator,
                        );
                        HashTableBucketPage::<K, V>::remove_at(&mut bucket, i);
                    }
                }
            }
            self.buffer_pool.unpin_page(bucket_page_id, true)?;
            self.buffer_pool.unpin_page(image_page_id, true)?;

            // Repoint every directory slot of both partitions.
            let step = 1usize << new_depth;
            let mask = step - 1;
            let size = directory.size();
            let mut i = bucket_idx & mask;
            while i < size {
                directory.set_bucket_page_id(i, bucket_page_id);
                directory.set_local_depth(i, new_depth);
                i += step;
            }
            let mut i = image_idx & mask;
            while i < size {
                directory.set_bucket_page_id(i, image_page_id);
                directory.set_local_depth(i, new_depth);
                i += step;
            }
        };

        directory.store(&mut directory_page.write());
        self.buffer_pool.unpin_page(self.directory_page_id, true)?;

        Ok(inserted)
    }

    /// Remove the pair matching both `key` and `value`. A bucket left
    /// empty is merged with its split image.
    pub fn remove(&self, key: &K, value: &V) -> Result<bool, HashTableError> {
        let (removed, emptied) = {
            let _guard = self.table_latch.read();

            let directory_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
            let directory = HashTableDirectoryPage::load(&directory_page.read());
            let bucket_page_id = directory.bucket_page_id(Self::bucket_index(&directory, key));
            let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;

            let (removed, emptied) = {
                let mut bucket = bucket_page.write();
                let removed =
                    HashTableBucketPage::<K, V>::remove(&mut bucket, key, value, &self.comparator);
                (removed, HashTableBucketPage::<K, V>::is_empty(&bucket))
            };

            self.buffer_pool.unpin_page(bucket_page_id, removed)?;
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;

            (removed, emptied)
        };

        if removed && emptied {
            self.merge(key)?;
        }

        Ok(removed)
    }

    /// Fold an empty bucket into its split image and shrink the directory
    /// while it can halve. Merging is not cascaded to further neighbors.
    fn merge(&self, key: &K) -> Result<(), HashTableError> {
        let _guard = self.table_latch.write();

        let directory_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let mut directory = HashTableDirectoryPage::load(&directory_page.read());

        let bucket_idx = Self::bucket_index(&directory, key);
        let bucket_page_id = directory.bucket_page_id(bucket_idx);
        let local_depth = directory.local_depth(bucket_idx);

        // A depth-zero bucket has no image; unequal depths mean the image
        // is itself split and cannot absorb this partition.
        if local_depth == 0 {
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;
            return Ok(());
        }
        let image_idx = directory.split_image_index(bucket_idx);
        if directory.local_depth(image_idx) != local_depth {
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;
            return Ok(());
        }

        // The emptiness seen by the caller was under the read latch;
        // another insert may have slipped in before we took the write
        // latch, so recheck.
        let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
        let still_empty = HashTableBucketPage::<K, V>::is_empty(&bucket_page.read());
        self.buffer_pool.unpin_page(bucket_page_id, false)?;
        if !still_empty {
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;
            return Ok(());
        }

        self.buffer_pool.delete_page(bucket_page_id)?;

        let image_page_id = directory.bucket_page_id(image_idx);
        directory.set_bucket_page_id(bucket_idx, image_page_id);
        directory.decr_local_depth(bucket_idx);
        directory.decr_local_depth(image_idx);

        // Repoint the whole merged partition at the surviving bucket.
        let merged_depth = directory.local_depth(image_idx);
        let step = 1usize << merged_depth;
        let mask = step - 1;
        let size = directory.size();
        let mut i = image_idx & mask;
        while i < size {
            directory.set_bucket_page_id(i, image_page_id);
            directory.set_local_depth(i, merged_depth);
            i += step;
        }

        while directory.can_shrink() {
            directory.decr_global_depth();
            debug!("hash directory halved to global depth {}", directory.global_depth());
        }

        directory.store(&mut directory_page.write());
        self.buffer_pool.unpin_page(self.directory_page_id, true)?;

        Ok(())
    }

    /// Current global depth of the directory.
    pub fn global_depth(&self) -> Result<u32, HashTableError> {
        let _guard = self.table_latch.read();

        let directory_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let depth = HashTableDirectoryPage::load(&directory_page.read()).global_depth();
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;

        Ok(depth)
    }

    /// Assert the directory invariants. Panics on violation; intended for
    /// tests and debugging.
    pub fn verify_integrity(&self) -> Result<(), HashTableError> {
        let _guard = self.table_latch.read();

        let directory_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let directory = HashTableDirectoryPage::load(&directory_page.read());
        directory.verify_integrity();
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;

        Ok(())
    }
}
