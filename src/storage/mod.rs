pub mod memory;
pub mod traits;

pub use memory::InMemoryCache;
pub use traits::{
    CacheEntry, CapacityEviction, EvictionPolicy, NoEviction, ResponseCache, TtlEviction,
};
