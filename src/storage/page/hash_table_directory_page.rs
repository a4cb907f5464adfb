use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, INVALID_PAGE_ID};

/// Upper bound on directory size; supports global depths up to 9.
pub const DIRECTORY_ARRAY_SIZE: usize = 512;

const PAGE_ID_OFFSET: usize = 0;
const GLOBAL_DEPTH_OFFSET: usize = 4;
const LOCAL_DEPTHS_OFFSET: usize = 8;
const BUCKET_PAGE_IDS_OFFSET: usize = LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE;

/// Directory page of an extendible hash table.
///
/// Page layout (sizes in bytes):
///
/// ```text
/// | PageId (4) | GlobalDepth (4) | LocalDepths (512) | BucketPageIds (2048) | free |
/// ```
///
/// The directory is decoded into this value with [`load`](Self::load),
/// mutated in memory, and written back with [`store`](Self::store). Only
/// the first `2^global_depth` entries are meaningful.
pub struct HashTableDirectoryPage {
    page_id: PageId,
    global_depth: u32,
    local_depths: [u8; DIRECTORY_ARRAY_SIZE],
    bucket_page_ids: [PageId; DIRECTORY_ARRAY_SIZE],
}

impl HashTableDirectoryPage {
    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            global_depth: 0,
            local_depths: [0; DIRECTORY_ARRAY_SIZE],
            bucket_page_ids: [INVALID_PAGE_ID; DIRECTORY_ARRAY_SIZE],
        }
    }

    /// Decode a directory from a page's bytes.
    pub fn load(page: &Page) -> Self {
        let data = &page.data;
        let mut directory = Self::new(LittleEndian::read_i32(&data[PAGE_ID_OFFSET..]));
        directory.global_depth = LittleEndian::read_u32(&data[GLOBAL_DEPTH_OFFSET..]);
        directory
            .local_depths
            .copy_from_slice(&data[LOCAL_DEPTHS_OFFSET..LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE]);
        for (i, id) in directory.bucket_page_ids.iter_mut().enumerate() {
            *id = LittleEndian::read_i32(&data[BUCKET_PAGE_IDS_OFFSET + i * 4..]);
        }
        directory
    }

    /// Encode the directory back into a page's bytes.
    pub fn store(&self, page: &mut Page) {
        let data = &mut page.data;
        LittleEndian::write_i32(&mut data[PAGE_ID_OFFSET..GLOBAL_DEPTH_OFFSET], self.page_id);
        LittleEndian::write_u32(&mut data[GLOBAL_DEPTH_OFFSET..LOCAL_DEPTHS_OFFSET], self.global_depth);
        data[LOCAL_DEPTHS_OFFSET..LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE]
            .copy_from_slice(&self.local_depths);
        for (i, id) in self.bucket_page_ids.iter().enumerate() {
            LittleEndian::write_i32(&mut data[BUCKET_PAGE_IDS_OFFSET + i * 4..BUCKET_PAGE_IDS_OFFSET + (i + 1) * 4], *id);
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn global_depth(&self) -> u32 {
        self.global_depth
    }

    /// Mask selecting the low `global_depth` bits of a hash.
    pub fn global_depth_mask(&self) -> u32 {
        (1 << self.global_depth) - 1
    }

    /// Number of active directory entries.
    pub fn size(&self) -> usize {
        1 << self.global_depth
    }

    /// Double the directory: the lower half is mirrored into the new
    /// upper half (same bucket page ids, same local depths) so every slot
    /// keeps addressing the bucket it addressed before.
    pub fn incr_global_depth(&mut self) {
        let old_size = self.size();
        assert!(old_size * 2 <= DIRECTORY_ARRAY_SIZE, "directory is at maximum depth");
        for i in 0..old_size {
            self.bucket_page_ids[old_size + i] = self.bucket_page_ids[i];
            self.local_depths[old_size + i] = self.local_depths[i];
        }
        self.global_depth += 1;
    }

    pub fn decr_global_depth(&mut self) {
        assert!(self.global_depth > 0, "directory is at minimum depth");
        self.global_depth -= 1;
    }

    /// The directory can halve when no bucket needs the top address bit.
    pub fn can_shrink(&self) -> bool {
        self.global_depth > 0
            && self.local_depths[..self.size()]
                .iter()
                .all(|&depth| (depth as u32) < self.global_depth)
    }

    pub fn bucket_page_id(&self, bucket_idx: usize) -> PageId {
        self.bucket_page_ids[bucket_idx]
    }

    pub fn set_bucket_page_id(&mut self, bucket_idx: usize, bucket_page_id: PageId) {
        self.bucket_page_ids[bucket_idx] = bucket_page_id;
    }

    pub fn local_depth(&self, bucket_idx: usize) -> u32 {
        self.local_depths[bucket_idx] as u32
    }

    pub fn set_local_depth(&mut self, bucket_idx: usize, local_depth: u32) {
        self.local_depths[bucket_idx] = local_depth as u8;
    }

    pub fn incr_local_depth(&mut self, bucket_idx: usize) {
        self.local_depths[bucket_idx] += 1;
    }

    pub fn decr_local_depth(&mut self, bucket_idx: usize) {
        self.local_depths[bucket_idx] -= 1;
    }

    /// Mask selecting the low `local_depth` bits of a hash for the bucket
    /// at `bucket_idx`.
    pub fn local_depth_mask(&self, bucket_idx: usize) -> u32 {
        (1 << self.local_depths[bucket_idx]) - 1
    }

    /// Index of the bucket's split image: the entry differing only in the
    /// bucket's highest local-depth bit.
    pub fn split_image_index(&self, bucket_idx: usize) -> usize {
        debug_assert!(self.local_depths[bucket_idx] > 0);
        bucket_idx ^ (1 << (self.local_depths[bucket_idx] - 1))
    }

    /// Assert the directory invariants:
    /// - every local depth is at most the global depth,
    /// - exactly `2^(global_depth - local_depth)` entries reference each
    ///   bucket page,
    /// - entries sharing a bucket page share its local depth.
    pub fn verify_integrity(&self) {
        use std::collections::HashMap;

        let mut pointer_counts: HashMap<PageId, usize> = HashMap::new();
        let mut depths: HashMap<PageId, u32> = HashMap::new();

        for i in 0..self.size() {
            let depth = self.local_depth(i);
            assert!(
                depth <= self.global_depth,
                "local depth {} at slot {} exceeds global depth {}",
                depth,
                i,
                self.global_depth
            );

            let page_id = self.bucket_page_id(i);
            *pointer_counts.entry(page_id).or_insert(0) += 1;
            match depths.get(&page_id) {
                None => {
                    depths.insert(page_id, depth);
                }
                Some(&known) => assert_eq!(
                    known, depth,
                    "slot {} disagrees on the local depth of bucket page {}",
                    i, page_id
                ),
            }
        }

        for (page_id, count) in pointer_counts {
            let expected = 1usize << (self.global_depth - depths[&page_id]);
            assert_eq!(
                count, expected,
                "bucket page {} is referenced {} times, expected {}",
                page_id, count, expected
            );
        }
    }
}
