//! Compile-time index configuration.
//!
//! The node record layout is derived from these constants, so they are fixed
//! at build time. Changing `VECTOR_DIM`, `M`, `M_MAX0`, or `MAX_LAYERS`
//! changes the on-disk record size and makes existing node files unreadable.

/// Vector dimension. Caller inputs must match exactly.
///
/// Must be a multiple of 8 so the SIMD kernel runs without a scalar tail.
pub const VECTOR_DIM: usize = 128;

/// Target degree for upper layers.
pub const M: usize = 16;

/// Degree cap at layer 0. The bottom layer is kept denser for precision.
pub const M_MAX0: usize = M * 2;

/// Hard cap on graph layers. Four is sufficient up to ~1M vectors.
pub const MAX_LAYERS: usize = 4;

/// Beam width during insertion.
pub const EF_CONSTRUCTION: usize = 200;

/// Beam width floor during search; the effective width is `max(floor, k)`.
pub const EF_SEARCH_FLOOR: usize = 100;

/// Per-step probability of a new node going up one level.
pub const LEVEL_PROB: f64 = 0.03;

/// Minimum amount the node file grows by when a slot lands past the mapping.
pub const GROWTH_CHUNK: u64 = 10 * 1024 * 1024;

/// Extra node-lock slots allocated ahead of the highest known identifier.
pub const LOCK_TABLE_SLACK: usize = 10_000;

const _: () = assert!(VECTOR_DIM % 8 == 0, "VECTOR_DIM must be a multiple of 8");
const _: () = assert!(M_MAX0 >= M);
