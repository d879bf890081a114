use rustc_hash::FxHasher;
use std::hash::Hasher;

/// Hashes the bytes of an atom. Stable for the life of the process.
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();

    hasher.write(bytes);
    hasher.write_usize(bytes.len());

    avalanche(hasher.finish())
}

// murmur3's 64 bit finalizer, every input bit flips about half the output
fn avalanche(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h
}

/// Folds the high bits of the hash into the bucket index before masking.
pub fn bucket_index(hash: u64, buckets: usize) -> usize {
    debug_assert!(buckets.is_power_of_two());

    let bits = buckets.trailing_zeros();

    ((hash ^ (hash >> bits)) as usize) & (buckets - 1)
}
