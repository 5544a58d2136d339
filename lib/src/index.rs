use std::{
    collections::{HashMap, HashSet},
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

#[cfg(feature = "multi-thread")]
use rayon::prelude::{IntoParallelRefIterator, ParallelIterator};

use crate::{
    bucket::{Bucket, Slot},
    haar::{Signature, NUM_CHANNELS, NUM_PIXELS_SQUARED},
};

pub type ImageId = u64;

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Buckets of one channel, addressed by sign then absolute position.
struct Shard {
    buckets: [Vec<Bucket>; 2],
}

impl Shard {
    fn new() -> Self {
        Self {
            buckets: [(); 2].map(|_| vec![Bucket::default(); NUM_PIXELS_SQUARED]),
        }
    }

    /// `None` for positions outside the grid.
    fn bucket(&self, coef: i16) -> Option<&Bucket> {
        let sign = coef < 0;
        self.buckets[sign as usize].get(coef.unsigned_abs() as usize)
    }

    fn bucket_mut(&mut self, coef: i16) -> &mut Bucket {
        let sign = coef < 0;
        &mut self.buckets[sign as usize][coef.unsigned_abs() as usize]
    }
}

/// Dense slots stand in for image ids inside buckets. A removed image's
/// slot is retired, never handed out again, so a slot seen by an in-flight
/// query can not resolve to a different image.
#[derive(Default)]
struct Slots {
    by_id: HashMap<ImageId, Slot>,
    ids: Vec<Option<ImageId>>,
}

/// Inverted index from `(channel, signed position)` to the images whose
/// signature holds that coefficient.
///
/// Each channel is its own lock, so writers on one channel never block
/// readers of another. Once `insert` returns every later query sees the
/// image; once `remove` returns no later query returns it.
pub struct QueryIndex {
    shards: [RwLock<Shard>; NUM_CHANNELS],
    slots: RwLock<Slots>,
}

impl Default for QueryIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryIndex {
    pub fn new() -> Self {
        Self {
            shards: [(); NUM_CHANNELS].map(|_| RwLock::new(Shard::new())),
            slots: RwLock::new(Slots::default()),
        }
    }

    /// Number of live images.
    pub fn len(&self) -> usize {
        read(&self.slots).by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: ImageId) -> bool {
        read(&self.slots).by_id.contains_key(&id)
    }

    /// Adds `id` under every coefficient of `signature`. Repeating the call
    /// with the same pair changes nothing. Use [`QueryIndex::replace`] to
    /// swap an indexed image's signature.
    ///
    /// Panics on positions outside the 128x128 grid; see [`Signature::check`].
    pub fn insert(&self, id: ImageId, signature: &Signature) {
        let slot = {
            let mut slots = write(&self.slots);
            match slots.by_id.get(&id) {
                Some(&slot) => slot,
                None => {
                    let slot = slots.ids.len() as Slot;
                    slots.ids.push(Some(id));
                    slots.by_id.insert(id, slot);
                    slot
                }
            }
        };
        for (channel, shard) in self.shards.iter().enumerate() {
            let mut shard = write(shard);
            for &coef in signature.channel(channel) {
                shard.bucket_mut(coef).insert(slot);
            }
        }
    }

    /// Moves `id` from `old` to `new` keeping its slot. Callers must
    /// serialize replacements of the same id. An id that was not indexed is
    /// simply inserted.
    pub fn replace(&self, id: ImageId, old: &Signature, new: &Signature) {
        let slot = read(&self.slots).by_id.get(&id).copied();
        let Some(slot) = slot else {
            self.insert(id, new);
            return;
        };
        for (channel, shard) in self.shards.iter().enumerate() {
            let mut shard = write(shard);
            for &coef in old.channel(channel) {
                shard.bucket_mut(coef).remove(slot);
            }
            for &coef in new.channel(channel) {
                shard.bucket_mut(coef).insert(slot);
            }
        }
    }

    /// Inverse of [`QueryIndex::insert`]. Emptied buckets are pruned.
    /// Returns false when `id` was not indexed.
    pub fn remove(&self, id: ImageId, signature: &Signature) -> bool {
        let slot = {
            let mut slots = write(&self.slots);
            let Some(slot) = slots.by_id.remove(&id) else {
                return false;
            };
            slots.ids[slot as usize] = None;
            slot
        };
        for (channel, shard) in self.shards.iter().enumerate() {
            let mut shard = write(shard);
            for &coef in signature.channel(channel) {
                shard.bucket_mut(coef).remove(slot);
            }
        }
        true
    }

    /// Every live image with the number of coefficients it shares with
    /// `signature`, skipping images that share none.
    pub fn shared_counts(&self, signature: &Signature) -> Vec<(ImageId, usize)> {
        let total = read(&self.slots).ids.len();

        let count_channel = |channel: &usize| {
            let mut counts = vec![0u8; total];
            let shard = read(&self.shards[*channel]);
            for &coef in signature.channel(*channel) {
                let Some(bucket) = shard.bucket(coef) else {
                    continue;
                };
                bucket.for_each(|slot| {
                    // Slots allocated after `total` was read are skipped.
                    if let Some(count) = counts.get_mut(slot as usize) {
                        *count += 1;
                    }
                });
            }
            counts
        };

        let channels: Vec<usize> = (0..NUM_CHANNELS).collect();
        #[cfg(feature = "multi-thread")]
        let per_channel: Vec<Vec<u8>> = channels.par_iter().map(count_channel).collect();
        #[cfg(not(feature = "multi-thread"))]
        let per_channel: Vec<Vec<u8>> = channels.iter().map(count_channel).collect();

        let slots = read(&self.slots);
        (0..total)
            .filter_map(|slot| {
                let shared: usize = per_channel.iter().map(|c| c[slot] as usize).sum();
                if shared == 0 {
                    return None;
                }
                slots.ids[slot].map(|id| (id, shared))
            })
            .collect()
    }

    /// Images sharing at least `min_shared` coefficients with `signature`.
    /// With `min_shared == 0` every live image qualifies.
    pub fn candidates_for(&self, signature: &Signature, min_shared: usize) -> HashSet<ImageId> {
        if min_shared == 0 {
            return read(&self.slots).by_id.keys().copied().collect();
        }
        self.shared_counts(signature)
            .into_iter()
            .filter(|&(_, shared)| shared >= min_shared)
            .map(|(id, _)| id)
            .collect()
    }

    /// Slots handed out so far, live or retired.
    pub(crate) fn slot_count(&self) -> usize {
        read(&self.slots).ids.len()
    }

    /// Number of non-empty buckets; pruning keeps this bounded by live data.
    pub fn key_count(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                let shard = read(shard);
                shard
                    .buckets
                    .iter()
                    .flatten()
                    .filter(|bucket| !bucket.is_empty())
                    .count()
            })
            .sum()
    }
}
