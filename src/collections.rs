//! Hash table aliases for identifier-keyed lookups
//!
//! The pending-parent table and the id-to-row map sit on the hot path of
//! every `consume`. With the `gxhash` feature they hash with gxhash, which
//! needs AES-NI/SSE2 (or NEON) at build time. Without it they fall back to
//! std's `RandomState`.

/// Hasher used by every map and set in the crate
#[cfg(feature = "gxhash")]
pub type BuildHasher = gxhash::GxBuildHasher;

/// Hasher used by every map and set in the crate
#[cfg(not(feature = "gxhash"))]
pub type BuildHasher = std::hash::RandomState;

/// HashMap keyed with the crate hasher
pub type HashMap<K, V> = std::collections::HashMap<K, V, BuildHasher>;

/// HashSet keyed with the crate hasher
pub type HashSet<T> = std::collections::HashSet<T, BuildHasher>;

/// Create an empty map with room for `capacity` entries
pub fn map_with_capacity<K, V>(capacity: usize) -> HashMap<K, V> {
    HashMap::with_capacity_and_hasher(capacity, BuildHasher::default())
}
