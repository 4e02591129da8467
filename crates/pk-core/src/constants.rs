//! Global constants for pk-core

/// Number of decimal places kept when a float is folded into a feature hash.
/// Differences below `10^-HASH_DECIMALS` do not produce distinct hashes.
pub const HASH_DECIMALS: i32 = 9;

/// Float quantisation factor (multiply by this, then round to int)
pub const HASH_PRECISION: f64 = 1e9;

/// Default number of lock shards in the build cache
pub const DEFAULT_SHARD_COUNT: usize = 16;

/// Default `tracing` filter used by front-ends when none is configured
pub const DEFAULT_LOG_FILTER: &str = "pk_frontend=info,pk_cad=info,pk_core=info";
