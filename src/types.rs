/// Dense transcript id, assigned in annotation traversal order.
pub type Tid = u32;
/// Reference-sequence id as reported by an alignment file header.
pub type RefId = i32;

// Fast hash maps / sets using AHash instead of the default SipHash.
// Import these throughout the codebase with `use crate::types::{HashMap, HashSet}`.
// Also import `HashMapExt` / `HashSetExt` when you need `::new()` or `::with_capacity()`.
pub type HashMap<K, V> = ahash::HashMap<K, V>;
pub type HashSet<K> = ahash::HashSet<K>;
pub use ahash::HashMapExt;
pub use ahash::HashSetExt;
