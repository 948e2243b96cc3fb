//! Parallel construction: eight threads share one index, then the graph is
//! audited against its structural invariants and spot-checked for recall.

use std::thread;

use hnsw_mmap::config::{MAX_LAYERS, VECTOR_DIM};
use hnsw_mmap::distance::squared_l2;
use hnsw_mmap::node::layer_cap;
use hnsw_mmap::{HnswIndex, MmapFile};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use tempfile::tempdir;

const NUM_VECTORS: usize = 10_000;
const NUM_THREADS: usize = 8;
const NUM_QUERIES: usize = 100;

fn generate_vectors(count: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            (0..VECTOR_DIM)
                .map(|_| rng.gen::<f32>() * 2.0 - 1.0)
                .collect()
        })
        .collect()
}

fn brute_force_top1(vectors: &[Vec<f32>], query: &[f32]) -> u32 {
    let mut best = 0u32;
    let mut best_dist = f32::INFINITY;
    for (i, v) in vectors.iter().enumerate() {
        let d = squared_l2(query, v);
        if d < best_dist {
            best_dist = d;
            best = i as u32;
        }
    }
    best
}

#[test]
fn test_concurrent_inserts_preserve_invariants() {
    let dir = tempdir().unwrap();
    let storage = MmapFile::open(dir.path().join("index.bin"), 0).unwrap();
    let index = HnswIndex::new(storage, dir.path().join("metadata.bin")).unwrap();

    let vectors = generate_vectors(NUM_VECTORS, 4242);
    let chunk = NUM_VECTORS / NUM_THREADS;

    thread::scope(|scope| {
        for t in 0..NUM_THREADS {
            let index = &index;
            let vectors = &vectors;
            scope.spawn(move || {
                for i in (t * chunk)..((t + 1) * chunk) {
                    index.insert(&vectors[i], i as u32, b"").unwrap();
                }
            });
        }
    });

    assert_eq!(index.len(), NUM_VECTORS);

    // Degree caps hold and every listed neighbor is a written node.
    for id in 0..NUM_VECTORS as u32 {
        for layer in 0..MAX_LAYERS {
            let neighbors = index.neighbors(id, layer);
            assert!(
                neighbors.len() <= layer_cap(layer),
                "node {id} layer {layer} over cap: {}",
                neighbors.len()
            );
            for n in neighbors {
                assert!(
                    (n as usize) < NUM_VECTORS,
                    "node {id} layer {layer} lists unwritten id {n}"
                );
            }
        }
    }

    // Held-out queries: the engine's top-1 must agree with brute force for
    // at least 90 of 100.
    let queries = generate_vectors(NUM_QUERIES, 777);
    let mut agreements = 0;
    for query in &queries {
        let expected = brute_force_top1(&vectors, query);
        let got = index.search(query, 1).unwrap()[0].id;
        if got == expected {
            agreements += 1;
        }
    }
    assert!(
        agreements >= 90,
        "concurrent build degraded recall: {agreements}/{NUM_QUERIES}"
    );
}

#[test]
fn test_concurrent_inserts_with_metadata() {
    let dir = tempdir().unwrap();
    let storage = MmapFile::open(dir.path().join("index.bin"), 0).unwrap();
    let index = HnswIndex::new(storage, dir.path().join("metadata.bin")).unwrap();

    let vectors = generate_vectors(400, 99);

    thread::scope(|scope| {
        for t in 0..4 {
            let index = &index;
            let vectors = &vectors;
            scope.spawn(move || {
                for i in (t * 100)..((t + 1) * 100) {
                    let payload = format!("doc-{i}");
                    index.insert(&vectors[i], i as u32, payload.as_bytes()).unwrap();
                }
            });
        }
    });

    for i in [0usize, 57, 200, 399] {
        assert_eq!(index.get_metadata(i as u32), format!("doc-{i}").as_bytes());
    }
}

#[test]
fn test_batch_insert_parallel() {
    let dir = tempdir().unwrap();
    let storage = MmapFile::open(dir.path().join("index.bin"), 0).unwrap();
    let index = HnswIndex::new(storage, dir.path().join("metadata.bin")).unwrap();

    let vectors = generate_vectors(500, 3);
    let rows: Vec<(u32, Vec<f32>, Vec<u8>)> = vectors
        .iter()
        .enumerate()
        .map(|(i, v)| (i as u32, v.clone(), Vec::new()))
        .collect();

    index.insert_batch(&rows).unwrap();
    assert_eq!(index.len(), 500);

    let mut hits = 0;
    for i in (0..500).step_by(50) {
        let results = index.search(&vectors[i], 1).unwrap();
        if results[0].id == i as u32 && results[0].distance == 0.0 {
            hits += 1;
        }
    }
    assert!(hits >= 9, "self-retrieval after batch build: {hits}/10");
}
