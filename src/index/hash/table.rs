use std::marker::PhantomData;
use std::sync::Arc;
use log::debug;
use parking_lot::RwLock;

use crate::common::types::{PageId, PagePtr, Rid};
use crate::index::hash::error::HashIndexError;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::{BucketPage, DirectoryPage, KeyCodec, ValueCodec, MAX_GLOBAL_DEPTH};
use crate::transaction::Transaction;

/// Disk-backed extendible hash index.
///
/// A single directory page maps the low `global_depth` bits of a key's hash
/// to bucket pages; buckets split on overflow (doubling the directory when
/// needed) and empty buckets are merged back into their split images.
///
/// The table-wide latch admits `get_value`, `insert` and `remove` as
/// readers, since a bucket's own page latch is enough to serialise them;
/// `split_insert` and `merge` change the directory topology and take it as
/// writers. Bucket page latches are only acquired while the table latch is
/// held, never the other way around.
pub struct ExtendibleHashIndex<K, V = Rid> {
    name: String,
    buffer_pool: Arc<BufferPoolManager>,
    directory_page_id: PageId,
    table_latch: RwLock<()>,
    hash_fn: fn(&K) -> u32,
    _marker: PhantomData<(K, V)>,
}

impl<K: KeyCodec, V: ValueCodec> ExtendibleHashIndex<K, V> {
    /// Create an index with an empty depth-zero directory and one bucket
    pub fn new(
        name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        hash_fn: fn(&K) -> u32,
    ) -> Result<Self, HashIndexError> {
        let (dir_page, directory_page_id) = buffer_pool.new_page()?;
        let (_bucket_page, bucket_page_id) = buffer_pool.new_page()?;

        let mut dir = DirectoryPage::new(directory_page_id);
        dir.set_bucket_page_id(0, bucket_page_id);
        dir.set_local_depth(0, 0);
        dir.store(&mut dir_page.write());

        buffer_pool.unpin_page(directory_page_id, true)?;
        buffer_pool.unpin_page(bucket_page_id, true)?;

        Ok(Self {
            name: name.into(),
            buffer_pool,
            directory_page_id,
            table_latch: RwLock::new(()),
            hash_fn,
            _marker: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn directory_page_id(&self) -> PageId {
        self.directory_page_id
    }

    /// Collect every value stored under `key`
    pub fn get_value(
        &self,
        _txn: Option<&Transaction>,
        key: &K,
    ) -> Result<Vec<V>, HashIndexError> {
        let _table_guard = self.table_latch.read();

        let dir = self.fetch_directory()?;
        let bucket_page_id = dir.bucket_page_id(self.key_to_directory_index(key, &dir));
        let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;

        let values = {
            let page_guard = bucket_page.read();
            BucketPage::<K, V>::get_value(&page_guard, key)
        };

        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        self.buffer_pool.unpin_page(bucket_page_id, false)?;

        Ok(values)
    }

    /// Insert a key/value pair.
    ///
    /// Returns `Ok(false)` for an exact duplicate, and falls through to
    /// [`Self::split_insert`] when the target bucket is full.
    pub fn insert(
        &self,
        txn: Option<&Transaction>,
        key: &K,
        value: &V,
    ) -> Result<bool, HashIndexError> {
        let is_full;
        let inserted;
        {
            let _table_guard = self.table_latch.read();

            let dir = self.fetch_directory()?;
            let bucket_page_id = dir.bucket_page_id(self.key_to_directory_index(key, &dir));
            let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;

            {
                let mut page_guard = bucket_page.write();
                is_full = BucketPage::<K, V>::is_full(&page_guard);
                inserted = !is_full && BucketPage::<K, V>::insert(&mut page_guard, key, value);
            }

            self.buffer_pool.unpin_page(self.directory_page_id, false)?;
            self.buffer_pool.unpin_page(bucket_page_id, inserted)?;
        }

        if is_full {
            return self.split_insert(txn, key, value);
        }
        Ok(inserted)
    }

    /// Split the overflowing bucket for `key`, then retry the insert.
    ///
    /// Doubles the directory first when the bucket already uses every
    /// global-depth bit. The retry may split again if the bucket's keys
    /// still collide on the wider prefix.
    fn split_insert(
        &self,
        txn: Option<&Transaction>,
        key: &K,
        value: &V,
    ) -> Result<bool, HashIndexError> {
        {
            let _table_guard = self.table_latch.write();

            let (dir_page, mut dir) = self.fetch_directory_mut()?;
            let bucket_idx = self.key_to_directory_index(key, &dir);

            let bucket_page_id = dir.bucket_page_id(bucket_idx);
            let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;

            // A concurrent remove may have freed a slot between the latch
            // drop in `insert` and the write latch here.
            {
                let mut page_guard = bucket_page.write();
                if !BucketPage::<K, V>::is_full(&page_guard) {
                    let inserted = BucketPage::<K, V>::insert(&mut page_guard, key, value);
                    drop(page_guard);
                    self.buffer_pool.unpin_page(bucket_page_id, inserted)?;
                    self.buffer_pool.unpin_page(self.directory_page_id, false)?;
                    return Ok(inserted);
                }
            }

            // The directory cannot distinguish more than MAX_GLOBAL_DEPTH
            // hash bits; a full bucket at that depth refuses the insert.
            if dir.local_depth(bucket_idx) == MAX_GLOBAL_DEPTH {
                self.buffer_pool.unpin_page(bucket_page_id, false)?;
                self.buffer_pool.unpin_page(self.directory_page_id, false)?;
                return Ok(false);
            }

            if dir.local_depth(bucket_idx) == dir.global_depth() {
                dir.incr_global_depth();
                debug!(
                    "hash index {} grew directory to depth {}",
                    self.name,
                    dir.global_depth()
                );
            }
            dir.incr_local_depth(bucket_idx);
            let new_depth = dir.local_depth(bucket_idx);

            let (image_page, image_page_id) = self.buffer_pool.new_page()?;
            let image_idx = dir.split_image_index(bucket_idx);
            dir.set_local_depth(image_idx, new_depth);
            dir.set_bucket_page_id(image_idx, image_page_id);

            {
                let mut bucket_guard = bucket_page.write();
                let mut image_guard = image_page.write();

                let old_pairs = BucketPage::<K, V>::fetch_all(&bucket_guard);
                BucketPage::<K, V>::reset(&mut bucket_guard);

                // Route each pair to whichever of the two buckets its wider
                // hash prefix now selects. The decision compares low bits
                // directly: entries aliasing the old bucket are only
                // repointed below, so the directory cannot be consulted
                // here — `bucket_idx` may be a high alias whose low-bit
                // representative still carries the stale page id.
                let mask = dir.local_depth_mask(bucket_idx);
                for (pair_key, pair_value) in &old_pairs {
                    let hash_bits = self.hash(pair_key) & mask;
                    if hash_bits == (bucket_idx as u32) & mask {
                        BucketPage::<K, V>::insert(&mut bucket_guard, pair_key, pair_value);
                    } else {
                        debug_assert_eq!(hash_bits, (image_idx as u32) & mask);
                        BucketPage::<K, V>::insert(&mut image_guard, pair_key, pair_value);
                    }
                }
            }

            // Every directory entry that used to alias the old bucket now
            // points at whichever half its low bits select.
            Self::repoint_aliases(&mut dir, bucket_idx, bucket_page_id, new_depth);
            Self::repoint_aliases(&mut dir, image_idx, image_page_id, new_depth);

            dir.store(&mut dir_page.write());

            self.buffer_pool.unpin_page(bucket_page_id, true)?;
            self.buffer_pool.unpin_page(image_page_id, true)?;
            self.buffer_pool.unpin_page(self.directory_page_id, true)?;
        }

        self.insert(txn, key, value)
    }

    /// Remove an exact key/value pair, merging the bucket away if it ends
    /// up empty
    pub fn remove(
        &self,
        txn: Option<&Transaction>,
        key: &K,
        value: &V,
    ) -> Result<bool, HashIndexError> {
        let removed;
        let now_empty;
        {
            let _table_guard = self.table_latch.read();

            let dir = self.fetch_directory()?;
            let bucket_page_id = dir.bucket_page_id(self.key_to_directory_index(key, &dir));
            let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;

            {
                let mut page_guard = bucket_page.write();
                removed = BucketPage::<K, V>::remove(&mut page_guard, key, value);
                now_empty = BucketPage::<K, V>::is_empty(&page_guard);
            }

            self.buffer_pool.unpin_page(bucket_page_id, removed)?;
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        }

        if removed && now_empty {
            self.merge(txn, key)?;
        }
        Ok(removed)
    }

    /// Coalesce the (now empty) bucket for `key` with its split image, then
    /// sweep the directory once to collapse any chain of empty buckets.
    fn merge(&self, _txn: Option<&Transaction>, key: &K) -> Result<(), HashIndexError> {
        let bucket_idx = {
            let _table_guard = self.table_latch.read();
            let dir = self.fetch_directory()?;
            let idx = self.key_to_directory_index(key, &dir);
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;
            idx
        };

        let mut size = self.merge_two(bucket_idx)?;
        let mut idx = 0;
        while idx < size {
            size = self.merge_two(idx)?;
            idx += 1;
        }
        Ok(())
    }

    /// Merge the bucket at `bucket_idx` into its split image when the
    /// invariants admit it. Returns the directory size after the attempt.
    fn merge_two(&self, bucket_idx: usize) -> Result<usize, HashIndexError> {
        let _table_guard = self.table_latch.write();

        let (dir_page, mut dir) = self.fetch_directory_mut()?;

        if bucket_idx >= dir.size() || dir.local_depth(bucket_idx) == 0 {
            let size = dir.size();
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;
            return Ok(size);
        }

        let image_idx = dir.split_image_index(bucket_idx);
        if dir.local_depth(bucket_idx) != dir.local_depth(image_idx)
            || dir.bucket_page_id(bucket_idx) == dir.bucket_page_id(image_idx)
        {
            let size = dir.size();
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;
            return Ok(size);
        }

        // Reread under the bucket latch: a writer may have slipped an
        // insert in since the emptiness was observed.
        let bucket_page_id = dir.bucket_page_id(bucket_idx);
        let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
        let still_empty = {
            let page_guard = bucket_page.read();
            BucketPage::<K, V>::is_empty(&page_guard)
        };
        self.buffer_pool.unpin_page(bucket_page_id, false)?;
        if !still_empty {
            let size = dir.size();
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;
            return Ok(size);
        }

        self.buffer_pool.delete_page(bucket_page_id)?;

        let image_page_id = dir.bucket_page_id(image_idx);
        dir.set_bucket_page_id(bucket_idx, image_page_id);
        dir.decr_local_depth(bucket_idx);
        dir.decr_local_depth(image_idx);

        // Aliases of the deleted page, and of the image page whose depth
        // just changed, all converge on the image page.
        let merged_depth = dir.local_depth(image_idx);
        for idx in 0..dir.size() {
            let page_id = dir.bucket_page_id(idx);
            if page_id == bucket_page_id || page_id == image_page_id {
                dir.set_bucket_page_id(idx, image_page_id);
                dir.set_local_depth(idx, merged_depth);
            }
        }

        while dir.can_shrink() {
            dir.decr_global_depth();
        }
        debug!(
            "hash index {} merged bucket page {} into {}; directory depth {}",
            self.name,
            bucket_page_id,
            image_page_id,
            dir.global_depth()
        );

        dir.store(&mut dir_page.write());
        self.buffer_pool.unpin_page(self.directory_page_id, true)?;

        Ok(dir.size())
    }

    /// Current number of hash bits the directory distinguishes
    pub fn global_depth(&self) -> Result<u32, HashIndexError> {
        let _table_guard = self.table_latch.read();
        let dir = self.fetch_directory()?;
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(dir.global_depth())
    }

    /// Cross-check every extendible-hashing invariant on the directory
    pub fn verify_integrity(&self) -> Result<(), HashIndexError> {
        let _table_guard = self.table_latch.read();
        let dir = self.fetch_directory()?;
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        dir.verify_integrity()?;
        Ok(())
    }

    fn hash(&self, key: &K) -> u32 {
        (self.hash_fn)(key)
    }

    fn key_to_directory_index(&self, key: &K, dir: &DirectoryPage) -> usize {
        (self.hash(key) & dir.global_depth_mask()) as usize
    }

    /// Fetch and decode the directory page, leaving it pinned
    fn fetch_directory(&self) -> Result<DirectoryPage, HashIndexError> {
        let dir_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let dir = DirectoryPage::load(&dir_page.read());
        Ok(dir)
    }

    /// Like [`Self::fetch_directory`], but keeps the page handle so the
    /// caller can write the directory back
    fn fetch_directory_mut(&self) -> Result<(PagePtr, DirectoryPage), HashIndexError> {
        let dir_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let dir = DirectoryPage::load(&dir_page.read());
        Ok((dir_page, dir))
    }

    /// Point every directory entry whose low `depth` bits match `from` at
    /// `page_id`, walking the stride in both directions.
    fn repoint_aliases(dir: &mut DirectoryPage, from: usize, page_id: PageId, depth: u32) {
        let stride = 1usize << depth;

        let mut idx = from;
        loop {
            dir.set_bucket_page_id(idx, page_id);
            dir.set_local_depth(idx, depth);
            if idx < stride {
                break;
            }
            idx -= stride;
        }

        let mut idx = from;
        while idx < dir.size() {
            dir.set_bucket_page_id(idx, page_id);
            dir.set_local_depth(idx, depth);
            idx += stride;
        }
    }
}
