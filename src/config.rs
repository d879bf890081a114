use super::error::ConfigError;
use super::pool::ALIGNMENT;

/// This structure contains the configuration settings for a runtime's heap
/// and atom table.
#[derive(Copy, Clone, Debug)]
pub struct Config {
    /// Requests at or below this many bytes (after rounding) are served from
    /// size classed free lists. Larger requests get a chunk of their own.
    pub alloc_fast: usize,
    /// The size of the chunks that small blocks are carved out of.
    pub chunk_size: usize,
    /// Once a thread's free list for a single size class grows past this
    /// length, half of it is handed to the global pool.
    pub local_free_max: usize,

    /// Initial number of hash buckets in the atom table. Must be a power of two.
    pub atom_buckets: usize,
    /// When off, collected slots are never reused and collections never run.
    pub agc_enabled: bool,
    /// A collection is requested once the live atom count passes the count
    /// left after the previous collection by this many atoms.
    pub agc_margin: usize,
    /// How many milliseconds the collector waits for every attached thread
    /// to report its roots. If a thread misses the deadline the cycle is
    /// abandoned, and the next request waits for another `agc_margin` new
    /// atoms.
    pub mark_timeout: u64,

    /// Setting this flag on or off will enable the monitor respectively.
    pub monitor_on: bool,
    /// How many milliseconds the monitor sleeps between checking for
    /// collection requests.
    pub monitor_wait_time: u64,
}

pub const CONFIG_DEFAULT_ALLOC_FAST: usize = 512;
pub const CONFIG_DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
pub const CONFIG_DEFAULT_LOCAL_FREE_MAX: usize = 200;
pub const CONFIG_DEFAULT_ATOM_BUCKETS: usize = 1024;
pub const CONFIG_DEFAULT_AGC_MARGIN: usize = 10_000;
pub const CONFIG_DEFAULT_MARK_TIMEOUT: u64 = 100;
pub const CONFIG_DEFAULT_MONITOR_WAIT_TIME: u64 = 10;

// all the heuristic constants live here, changing them only trades memory for
// time and never affects correctness
impl Default for Config {
    fn default() -> Self {
        Config {
            alloc_fast: CONFIG_DEFAULT_ALLOC_FAST,
            chunk_size: CONFIG_DEFAULT_CHUNK_SIZE,
            local_free_max: CONFIG_DEFAULT_LOCAL_FREE_MAX,

            atom_buckets: CONFIG_DEFAULT_ATOM_BUCKETS,
            agc_enabled: true,
            agc_margin: CONFIG_DEFAULT_AGC_MARGIN,
            mark_timeout: CONFIG_DEFAULT_MARK_TIMEOUT,

            monitor_on: false,
            monitor_wait_time: CONFIG_DEFAULT_MONITOR_WAIT_TIME,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.alloc_fast == 0 || self.alloc_fast % ALIGNMENT != 0 {
            return Err(ConfigError::AllocFast(ALIGNMENT));
        }

        if self.chunk_size % ALIGNMENT != 0 || self.chunk_size < self.alloc_fast {
            return Err(ConfigError::ChunkSize(ALIGNMENT));
        }

        if !self.atom_buckets.is_power_of_two() {
            return Err(ConfigError::Buckets);
        }

        if self.local_free_max < 2 {
            return Err(ConfigError::LocalFreeMax);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(Config::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_unaligned_fast_ceiling() {
        let config = Config {
            alloc_fast: ALIGNMENT + 1,
            ..Config::default()
        };

        assert_eq!(config.validate(), Err(ConfigError::AllocFast(ALIGNMENT)));
    }

    #[test]
    fn rejects_chunks_smaller_than_fast_ceiling() {
        let config = Config {
            chunk_size: ALIGNMENT,
            ..Config::default()
        };

        assert_eq!(config.validate(), Err(ConfigError::ChunkSize(ALIGNMENT)));
    }

    #[test]
    fn rejects_odd_bucket_count() {
        let config = Config {
            atom_buckets: 1000,
            ..Config::default()
        };

        assert_eq!(config.validate(), Err(ConfigError::Buckets));
    }
}
