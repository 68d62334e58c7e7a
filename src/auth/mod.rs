//! Authorization caching
//!
//! - [`cache`]: generic loading cache with refresh-ahead and LRU eviction
//! - [`rule_cache`]: the three rule reader caches behind one facade
//! - [`clock`]: time sources used for entry ageing
//! - [`components`]: ready-made wiring for host applications

pub mod cache;
pub mod clock;
pub mod components;
pub mod rule_cache;

pub use cache::{CacheLoader, CacheStats, LoadingCache};
pub use clock::{ManualClock, SystemClock, TimeSource};
pub use components::{MockRuleReaderService, RuleCacheComponents};
pub use rule_cache::{RuleCache, RuleCacheStats};
