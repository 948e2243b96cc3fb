//! Search behavior: exact retrieval, result ordering, recall against brute
//! force, and boundary cases around `k` and the empty index.

use hnsw_mmap::config::VECTOR_DIM;
use hnsw_mmap::distance::squared_l2;
use hnsw_mmap::{HnswIndex, MmapFile};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use tempfile::tempdir;

/// Deterministic random vectors in [-1, 1].
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

fn open_index(dir: &std::path::Path, min_size: u64) -> HnswIndex {
    let storage = MmapFile::open(dir.join("index.bin"), min_size).unwrap();
    HnswIndex::new(storage, dir.join("metadata.bin")).unwrap()
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
fn test_identity_retrieval() {
    let dir = tempdir().unwrap();
    let index = open_index(dir.path(), 1024 * 1024);

    let mut v0 = vec![0.0f32; VECTOR_DIM];
    v0[0] = 1.0;
    let mut v1 = vec![0.0f32; VECTOR_DIM];
    v1[1] = 1.0;

    index.insert(&v0, 0, b"").unwrap();
    index.insert(&v1, 1, b"").unwrap();

    let results = index.search(&v0, 2).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].id, 0);
    assert_eq!(results[0].distance, 0.0);
    assert_eq!(results[1].id, 1);
    assert_eq!(results[1].distance, 2.0);
}

#[test]
fn test_results_sorted_by_distance() {
    let dir = tempdir().unwrap();
    let index = open_index(dir.path(), 0);

    let vectors = generate_vectors(300, 11);
    for (i, v) in vectors.iter().enumerate() {
        index.insert(v, i as u32, b"").unwrap();
    }

    let query = generate_vectors(1, 99).remove(0);
    let results = index.search(&query, 20).unwrap();
    assert_eq!(results.len(), 20);
    for pair in results.windows(2) {
        assert!(
            pair[0].distance <= pair[1].distance,
            "results out of order: {} then {}",
            pair[0].distance,
            pair[1].distance
        );
    }
}

#[test]
fn test_exact_match_is_top_result() {
    let dir = tempdir().unwrap();
    let index = open_index(dir.path(), 0);

    let vectors = generate_vectors(300, 23);
    for (i, v) in vectors.iter().enumerate() {
        index.insert(v, i as u32, b"").unwrap();
    }

    for i in (0..300).step_by(10) {
        let results = index.search(&vectors[i], 1).unwrap();
        assert_eq!(results[0].id, i as u32, "query {i} did not find itself");
        assert_eq!(results[0].distance, 0.0);
    }
}

#[test]
fn test_top1_recall_vs_brute_force() {
    let dir = tempdir().unwrap();
    let index = open_index(dir.path(), 0);

    let vectors = generate_vectors(500, 42);
    for (i, v) in vectors.iter().enumerate() {
        index.insert(v, i as u32, b"").unwrap();
    }

    let queries = generate_vectors(100, 1234);
    let mut hits = 0;
    for query in &queries {
        let expected = brute_force_top1(&vectors, query);
        let got = index.search(query, 1).unwrap()[0].id;
        if got == expected {
            hits += 1;
        }
    }
    assert!(hits > 95, "top-1 recall too low: {hits}/100");
}

#[test]
fn test_k_zero_returns_empty() {
    let dir = tempdir().unwrap();
    let index = open_index(dir.path(), 0);

    let vectors = generate_vectors(10, 5);
    for (i, v) in vectors.iter().enumerate() {
        index.insert(v, i as u32, b"").unwrap();
    }
    assert!(index.search(&vectors[0], 0).unwrap().is_empty());
}

#[test]
fn test_k_beyond_graph_size_returns_all_sorted() {
    let dir = tempdir().unwrap();
    let index = open_index(dir.path(), 0);

    let vectors = generate_vectors(10, 6);
    for (i, v) in vectors.iter().enumerate() {
        index.insert(v, i as u32, b"").unwrap();
    }

    let results = index.search(&vectors[3], 50).unwrap();
    assert_eq!(results.len(), 10);

    let mut ids: Vec<u32> = results.iter().map(|r| r.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..10).collect::<Vec<u32>>());
    for pair in results.windows(2) {
        assert!(pair[0].distance <= pair[1].distance);
    }
}

#[test]
fn test_empty_index_search_returns_empty() {
    let dir = tempdir().unwrap();
    let index = open_index(dir.path(), 0);
    assert!(index.is_empty());

    let query = vec![0.25f32; VECTOR_DIM];
    assert!(index.search(&query, 5).unwrap().is_empty());
}

#[test]
fn test_first_insert_becomes_entry_point() {
    let dir = tempdir().unwrap();
    let index = open_index(dir.path(), 0);

    let v = generate_vectors(1, 8).remove(0);
    index.insert(&v, 0, b"").unwrap();
    assert_eq!(index.len(), 1);

    let results = index.search(&v, 5).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, 0);
    assert_eq!(results[0].distance, 0.0);
}

#[test]
fn test_search_rejects_wrong_dimension() {
    let dir = tempdir().unwrap();
    let index = open_index(dir.path(), 0);
    let v = generate_vectors(1, 9).remove(0);
    index.insert(&v, 0, b"").unwrap();

    assert!(index.search(&[1.0, 2.0, 3.0], 1).is_err());
}
