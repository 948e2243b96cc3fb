//! Core HNSW (Hierarchical Navigable Small World) engine.
//!
//! The graph lives directly in the memory-mapped node file: inserting writes
//! a record into its identifier's slot and splices it into the per-layer
//! neighbor lists of nearby records. Searching descends greedily through the
//! sparse upper layers and beam-searches layer 0. Inserts and searches may
//! run in parallel; see the locking notes on each method.

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use ordered_float::OrderedFloat;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{
    EF_CONSTRUCTION, EF_SEARCH_FLOOR, GROWTH_CHUNK, LEVEL_PROB, LOCK_TABLE_SLACK, M, MAX_LAYERS,
    VECTOR_DIM,
};
use crate::distance::squared_l2;
use crate::error::{Error, Result};
use crate::lock::NodeLocks;
use crate::metadata::MetadataStore;
use crate::mmap::MmapFile;
use crate::node::{layer_cap, NodeRecord, NODE_SIZE};
use crate::visited::VisitedSet;

/// Sentinel for "no entry point yet".
const ENTRY_EMPTY: u64 = u64::MAX;

/// Entry point id and top layer packed into one word so both update in a
/// single atomic store.
#[inline]
fn pack_entry(id: u32, layer: u32) -> u64 {
    (u64::from(layer) << 32) | u64::from(id)
}

#[inline]
fn unpack_entry(word: u64) -> (u32, u32) {
    (word as u32, (word >> 32) as u32)
}

thread_local! {
    static VISITED: RefCell<VisitedSet> = RefCell::new(VisitedSet::new());
}

/// One search hit, nearest first in the result list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: u32,
    /// Squared Euclidean distance to the query.
    pub distance: f32,
    /// Payload saved with the insert, empty if none was.
    pub metadata: Vec<u8>,
}

/// Memory-mapped HNSW index.
///
/// All operations take `&self`; the index is `Sync` and supports parallel
/// inserts and searches from multiple threads.
pub struct HnswIndex {
    /// Node records; every dereference happens under the read half of this
    /// lock, growth under the write half.
    storage: RwLock<MmapFile>,
    metadata: MetadataStore,
    locks: NodeLocks,
    /// Serializes storage growth and lock-table extension.
    resize_lock: Mutex<()>,
    /// Serializes first-element publication.
    init_lock: Mutex<()>,
    /// Packed `(top_layer << 32) | entry_id`, or `ENTRY_EMPTY`.
    entry: AtomicU64,
    count: AtomicU64,
}

impl HnswIndex {
    /// Build an index over `storage`, opening (or creating) the metadata
    /// store at `metadata_path`.
    ///
    /// Reopening non-empty storage adopts slot 0 at layer 0 as the entry
    /// point and counts every addressable slot, the only recovery the
    /// headerless node file permits. Searches stay correct because layer 0
    /// is connected; the caller contract is dense identifiers from zero.
    pub fn new<P: AsRef<Path>>(storage: MmapFile, metadata_path: P) -> Result<Self> {
        let metadata = MetadataStore::open(metadata_path)?;
        let slots = storage.len() / NODE_SIZE;

        let (entry, count) = if slots == 0 {
            (ENTRY_EMPTY, 0)
        } else {
            tracing::info!(slots, "opened index over existing storage");
            (pack_entry(0, 0), slots as u64)
        };

        Ok(Self {
            storage: RwLock::new(storage),
            metadata,
            locks: NodeLocks::new(slots + LOCK_TABLE_SLACK),
            resize_lock: Mutex::new(()),
            init_lock: Mutex::new(()),
            entry: AtomicU64::new(entry),
            count: AtomicU64::new(count),
        })
    }

    /// Insert `vector` under `id`, optionally attaching `metadata`.
    ///
    /// Identifiers double as file slots, so the caller should allocate them
    /// densely from zero; a far identifier grows the file across the gap.
    /// Inserting the same identifier twice is not supported.
    pub fn insert(&self, vector: &[f32], id: u32, metadata: &[u8]) -> Result<()> {
        if vector.len() != VECTOR_DIM {
            return Err(Error::DimensionMismatch {
                expected: VECTOR_DIM,
                got: vector.len(),
            });
        }

        let level = random_level();
        self.ensure_capacity(id)?;

        {
            let storage = self.storage.read();
            // The record is invisible to other threads until a neighbor
            // list mentions `id`, which only happens below.
            unsafe { NodeRecord::init(self.node_ptr(&storage, id), id, level as u32, vector) };
        }

        if self.entry.load(Ordering::Acquire) == ENTRY_EMPTY {
            let _init = self.init_lock.lock();
            if self.entry.load(Ordering::Acquire) == ENTRY_EMPTY {
                self.entry.store(pack_entry(id, level as u32), Ordering::Release);
                self.count.fetch_add(1, Ordering::Relaxed);
                if !metadata.is_empty() {
                    self.metadata.save(id, metadata)?;
                }
                return Ok(());
            }
            // Lost the init race; link into the graph another thread began.
        }

        {
            let storage = self.storage.read();
            self.link_node(&storage, id, level, vector);
        }

        self.count.fetch_add(1, Ordering::Relaxed);
        self.raise_entry(id, level);

        if !metadata.is_empty() {
            self.metadata.save(id, metadata)?;
        }
        Ok(())
    }

    /// Insert many `(id, vector, metadata)` rows, fanning out across the
    /// rayon thread pool.
    pub fn insert_batch(&self, rows: &[(u32, Vec<f32>, Vec<u8>)]) -> Result<()> {
        rows.par_iter()
            .try_for_each(|(id, vector, metadata)| self.insert(vector, *id, metadata))
    }

    /// Return the `k` nearest stored vectors, nearest first, each enriched
    /// with its metadata. Empty on an empty index or `k == 0`.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        if query.len() != VECTOR_DIM {
            return Err(Error::DimensionMismatch {
                expected: VECTOR_DIM,
                got: query.len(),
            });
        }

        let packed = self.entry.load(Ordering::Acquire);
        if packed == ENTRY_EMPTY || k == 0 {
            return Ok(Vec::new());
        }
        let (mut curr, top) = unpack_entry(packed);

        let storage = self.storage.read();
        let mut curr_dist = squared_l2(query, self.node(&storage, curr).vector());
        for layer in (1..=top as usize).rev() {
            (curr, curr_dist) = self.greedy_walk(&storage, curr, curr_dist, query, layer);
        }

        let ef = EF_SEARCH_FLOOR.max(k);
        let found = self.search_layer(&storage, curr, query, ef, 0);
        drop(storage);

        Ok(found
            .into_sorted_vec()
            .into_iter()
            .take(k)
            .map(|(OrderedFloat(distance), id)| SearchResult {
                id,
                distance,
                metadata: self.metadata.get(id),
            })
            .collect())
    }

    /// The most recently saved metadata for `id`, empty if none.
    pub fn get_metadata(&self, id: u32) -> Vec<u8> {
        self.metadata.get(id)
    }

    /// Number of records the index accounts for. Exact while the index is
    /// built in one session; after reopening existing storage it is the
    /// addressable-slot count, an upper bound.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.entry.load(Ordering::Acquire) == ENTRY_EMPTY
    }

    /// Snapshot of one node's neighbor identifiers at `layer`. Diagnostic
    /// surface: a racing insert may append right after the snapshot.
    pub fn neighbors(&self, id: u32, layer: usize) -> Vec<u32> {
        debug_assert!(layer < MAX_LAYERS);
        let storage = self.storage.read();
        if (id as usize + 1) * NODE_SIZE > storage.len() {
            return Vec::new();
        }
        let node = self.node(&storage, id);
        let count = node.neighbor_count(layer);
        (0..count).map(|i| node.neighbor(layer, i)).collect()
    }

    /// Flush the node file and release the mapping.
    pub fn close(self) -> Result<()> {
        self.storage.into_inner().close()
    }

    // ============== Internal ==============

    fn node_ptr(&self, storage: &MmapFile, id: u32) -> *mut NodeRecord {
        debug_assert!((id as usize + 1) * NODE_SIZE <= storage.len());
        unsafe { storage.as_ptr().add(id as usize * NODE_SIZE) }.cast::<NodeRecord>()
    }

    /// Record reference tied to the mapping guard's borrow, so it cannot
    /// outlive a resize.
    fn node<'a>(&self, storage: &'a MmapFile, id: u32) -> &'a NodeRecord {
        unsafe { &*self.node_ptr(storage, id) }
    }

    /// Grow the node file (and the lock table) until slot `id` is mapped.
    fn ensure_capacity(&self, id: u32) -> Result<()> {
        let required = (u64::from(id) + 1) * NODE_SIZE as u64;
        {
            let storage = self.storage.read();
            if required <= storage.len() as u64 {
                return Ok(());
            }
        }

        let _resize = self.resize_lock.lock();
        let mut storage = self.storage.write();
        if required > storage.len() as u64 {
            let target = required.max(storage.len() as u64 + GROWTH_CHUNK);
            storage.resize(target)?;
        }
        let covered = storage.len() / NODE_SIZE;
        self.locks
            .extend_to(covered.max(id as usize + 1) + LOCK_TABLE_SLACK);
        Ok(())
    }

    /// Connect a freshly written record into the graph.
    fn link_node(&self, storage: &MmapFile, id: u32, level: usize, query: &[f32]) {
        let packed = self.entry.load(Ordering::Acquire);
        debug_assert_ne!(packed, ENTRY_EMPTY);
        let (mut curr, top) = unpack_entry(packed);
        let top = top as usize;
        let mut curr_dist = squared_l2(query, self.node(storage, curr).vector());

        // Coarse descent: layers above the new node's level, greedy only.
        for layer in ((level + 1)..=top).rev() {
            (curr, curr_dist) = self.greedy_walk(storage, curr, curr_dist, query, layer);
        }

        // Fine layering: beam-search each layer the node joins, connect
        // bidirectionally, and carry the nearest selection downward.
        for layer in (0..=level.min(top)).rev() {
            let found = self.search_layer(storage, curr, query, EF_CONSTRUCTION, layer);
            let mut nearest_first = found.into_sorted_vec();
            // The entry point can be the node itself when storage was
            // reopened; a self-link would be useless.
            nearest_first.retain(|&(_, candidate)| candidate != id);
            nearest_first.truncate(M);

            for &(_, neighbor) in &nearest_first {
                self.add_link(storage, id, neighbor, layer);
                self.add_link(storage, neighbor, id, layer);
            }

            if let Some(&(_, nearest)) = nearest_first.first() {
                curr = nearest;
            }
        }
    }

    /// Greedy walk at one layer: hop to the strictly closest neighbor until
    /// no neighbor improves the distance. Ties keep the current node.
    fn greedy_walk(
        &self,
        storage: &MmapFile,
        mut curr: u32,
        mut curr_dist: f32,
        query: &[f32],
        layer: usize,
    ) -> (u32, f32) {
        loop {
            let node = self.node(storage, curr);
            let count = node.neighbor_count(layer);
            let mut best = curr;
            let mut best_dist = curr_dist;

            for i in 0..count {
                let candidate = node.neighbor(layer, i);
                let d = squared_l2(query, self.node(storage, candidate).vector());
                if d < best_dist {
                    best_dist = d;
                    best = candidate;
                }
            }

            if best == curr {
                return (curr, curr_dist);
            }
            curr = best;
            curr_dist = best_dist;
        }
    }

    /// Beam search at one layer. Returns a max-heap of at most `ef`
    /// `(distance, id)` results, farthest on top.
    fn search_layer(
        &self,
        storage: &MmapFile,
        entry: u32,
        query: &[f32],
        ef: usize,
        layer: usize,
    ) -> BinaryHeap<(OrderedFloat<f32>, u32)> {
        let slots = storage.len() / NODE_SIZE;

        VISITED.with(|cell| {
            let mut visited = cell.borrow_mut();
            visited.reset(slots);
            visited.mark(entry);

            let entry_dist = squared_l2(query, self.node(storage, entry).vector());

            // Closest-first frontier and farthest-on-top result window.
            let mut frontier: BinaryHeap<Reverse<(OrderedFloat<f32>, u32)>> = BinaryHeap::new();
            let mut results: BinaryHeap<(OrderedFloat<f32>, u32)> = BinaryHeap::new();
            frontier.push(Reverse((OrderedFloat(entry_dist), entry)));
            results.push((OrderedFloat(entry_dist), entry));

            while let Some(Reverse((OrderedFloat(dist), curr))) = frontier.pop() {
                let worst = results
                    .peek()
                    .map(|&(OrderedFloat(d), _)| d)
                    .unwrap_or(f32::INFINITY);
                if results.len() >= ef && dist > worst {
                    break;
                }

                let node = self.node(storage, curr);
                let count = node.neighbor_count(layer);
                for i in 0..count {
                    let neighbor = node.neighbor(layer, i);
                    if neighbor as usize >= slots || !visited.mark(neighbor) {
                        continue;
                    }

                    let d = squared_l2(query, self.node(storage, neighbor).vector());
                    let worst = results
                        .peek()
                        .map(|&(OrderedFloat(w), _)| w)
                        .unwrap_or(f32::INFINITY);
                    if results.len() < ef || d < worst {
                        frontier.push(Reverse((OrderedFloat(d), neighbor)));
                        results.push((OrderedFloat(d), neighbor));
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }

            results
        })
    }

    /// Add the directed link `src -> dest` at `layer`, pruning the farthest
    /// existing neighbor when the list is full. Holds only `src`'s
    /// spin-lock; other records are touched read-only through their
    /// immutable vector payloads.
    fn add_link(&self, storage: &MmapFile, src: u32, dest: u32, layer: usize) {
        let _guard = self.locks.acquire(src);
        let node = self.node(storage, src);
        let cap = layer_cap(layer);
        let count = node.neighbor_count(layer);

        if count < cap {
            node.push_neighbor(layer, count, dest);
            return;
        }

        let src_vec = node.vector();
        let dest_dist = squared_l2(src_vec, self.node(storage, dest).vector());
        let mut worst_idx = 0usize;
        let mut worst_dist = f32::NEG_INFINITY;
        for i in 0..count {
            let d = squared_l2(src_vec, self.node(storage, node.neighbor(layer, i)).vector());
            if d > worst_dist {
                worst_dist = d;
                worst_idx = i;
            }
        }
        if dest_dist < worst_dist {
            node.replace_neighbor(layer, worst_idx, dest);
        }
    }

    /// Raise the entry point to `(id, level)` if `level` tops the current
    /// graph. Single-word CAS so id and layer can never be observed torn.
    fn raise_entry(&self, id: u32, level: usize) {
        let mut observed = self.entry.load(Ordering::Acquire);
        while (level as u32) > unpack_entry(observed).1 {
            match self.entry.compare_exchange_weak(
                observed,
                pack_entry(id, level as u32),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => observed = actual,
            }
        }
    }
}

/// Geometric level draw: climb while a uniform draw stays under
/// `LEVEL_PROB`, hard-capped at the top layer index.
fn random_level() -> usize {
    let mut rng = rand::thread_rng();
    let mut level = 0;
    while rng.gen::<f64>() < LEVEL_PROB && level < MAX_LAYERS - 1 {
        level += 1;
    }
    level
}
