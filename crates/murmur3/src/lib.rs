//! MurmurHash3 x64_128.
//!
//! Algorithm by Austin Appleby. Used by `hybrid-pt` to fingerprint GPU-layout
//! records (scene lights, validation inputs) so that content changes can be
//! detected with a single 64-bit compare.

const C1: u64 = 0x87c3_7b91_1142_53d5;
const C2: u64 = 0x4cf5_ad43_2745_937f;

/// Compute MurmurHash3 x64_128 with a seed. Returns `(h1, h2)`.
pub fn hash128_seeded(data: &[u8], seed: u64) -> (u64, u64) {
    let mut h1 = seed;
    let mut h2 = seed;

    let mut blocks = data.chunks_exact(16);
    for block in &mut blocks {
        let (lo, hi) = block.split_at(8);
        h1 ^= mix_k1(read_u64(lo));
        h1 = h1.rotate_left(27).wrapping_add(h2).wrapping_mul(5).wrapping_add(0x52dc_e729);

        h2 ^= mix_k2(read_u64(hi));
        h2 = h2.rotate_left(31).wrapping_add(h1).wrapping_mul(5).wrapping_add(0x3849_5ab5);
    }

    // Tail: up to 15 bytes, little-endian, zero padded
    let tail = blocks.remainder();
    if tail.len() > 8 {
        h2 ^= mix_k2(read_u64(&tail[8..]));
    }
    if !tail.is_empty() {
        h1 ^= mix_k1(read_u64(&tail[..tail.len().min(8)]));
    }

    let len = data.len() as u64;
    h1 ^= len;
    h2 ^= len;
    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);
    h1 = fmix64(h1);
    h2 = fmix64(h2);
    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);

    (h1, h2)
}

/// Compute MurmurHash3 x64_128 with seed 0.
#[inline]
pub fn hash128(data: &[u8]) -> (u64, u64) {
    hash128_seeded(data, 0)
}

/// 64-bit digest: both halves of the 128-bit hash folded together.
#[inline]
pub fn hash64(data: &[u8]) -> u64 {
    let (h1, h2) = hash128(data);
    h1 ^ h2.rotate_left(32)
}

/// Little-endian read of up to 8 bytes, zero padded.
#[inline]
fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

#[inline]
fn mix_k1(k: u64) -> u64 {
    k.wrapping_mul(C1).rotate_left(31).wrapping_mul(C2)
}

#[inline]
fn mix_k2(k: u64) -> u64 {
    k.wrapping_mul(C2).rotate_left(33).wrapping_mul(C1)
}

#[inline]
fn fmix64(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_unseeded_is_zero() {
        // All state stays zero for an empty input with seed 0
        assert_eq!(hash128(&[]), (0, 0));
        assert_ne!(hash128_seeded(&[], 1), (0, 0));
    }

    #[test]
    fn test_deterministic() {
        let data: Vec<u8> = (0..100).collect();
        assert_eq!(hash128(&data), hash128(&data));
        assert_eq!(hash64(&data), hash64(&data));
    }

    #[test]
    fn test_single_byte_change() {
        let mut data: Vec<u8> = (0..48).collect();
        let before = hash64(&data);
        data[17] ^= 1;
        assert_ne!(before, hash64(&data));
    }

    #[test]
    fn test_tail_lengths_differ() {
        // Zero padding in the tail must not collide with a shorter input
        let a = hash64(&[1, 2, 3]);
        let b = hash64(&[1, 2, 3, 0]);
        assert_ne!(a, b);
        let c = hash64(&[0u8; 9]);
        let d = hash64(&[0u8; 10]);
        assert_ne!(c, d);
    }

    #[test]
    fn test_block_aligned() {
        let (h1, h2) = hash128(b"0123456789abcdef");
        assert_ne!(h1, 0);
        assert_ne!(h2, 0);
    }
}
