//! hnsw-mmap: embeddable memory-mapped HNSW index
//!
//! This crate provides an approximate nearest-neighbor index over dense
//! f32 embeddings, built around three ideas:
//! - The graph is stored in fixed-size records inside a memory-mapped
//!   file, so slot arithmetic is a file offset and persistence is free.
//! - Search and construction follow the HNSW layered-graph scheme under
//!   squared Euclidean distance.
//! - Inserts run in parallel: per-node spin-locks guard neighbor lists and
//!   a coarse lock serializes file growth.
//!
//! # Example
//!
//! ```rust,no_run
//! use hnsw_mmap::{config::VECTOR_DIM, HnswIndex, MmapFile};
//!
//! let storage = MmapFile::open("data/index.bin", 1024 * 1024).unwrap();
//! let index = HnswIndex::new(storage, "data/metadata.bin").unwrap();
//!
//! let vector = vec![0.5f32; VECTOR_DIM];
//! index.insert(&vector, 0, b"first document").unwrap();
//!
//! let hits = index.search(&vector, 5).unwrap();
//! assert_eq!(hits[0].id, 0);
//! assert_eq!(hits[0].metadata, b"first document");
//! ```
//!
//! # Persistence
//!
//! The node file is a raw, headerless array of records; closing and
//! reopening it yields byte-identical contents. Metadata lives in a
//! separate append-only log. Identifiers double as file slots, so they
//! should be allocated densely from zero.

pub mod config;
pub mod distance;
pub mod error;
pub mod hnsw;
pub mod lock;
pub mod metadata;
pub mod mmap;
pub mod node;
pub mod visited;

pub use error::{Error, Result};
pub use hnsw::{HnswIndex, SearchResult};
pub use metadata::MetadataStore;
pub use mmap::MmapFile;
pub use node::{NodeRecord, NODE_SIZE};
