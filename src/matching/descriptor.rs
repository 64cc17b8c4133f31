//! ORB descriptor and Hamming distance.

/// 256-bit binary ORB descriptor.
pub type Descriptor = [u8; 32];

/// Hamming distance between two ORB descriptors, in `[0, 256]`.
///
/// The descriptor is read as eight little-endian 32-bit words and each
/// XOR is counted with the classic parallel bit count.
pub fn descriptor_distance(a: &Descriptor, b: &Descriptor) -> u32 {
    let mut dist = 0u32;
    for (wa, wb) in a.chunks_exact(4).zip(b.chunks_exact(4)) {
        let pa = u32::from_le_bytes([wa[0], wa[1], wa[2], wa[3]]);
        let pb = u32::from_le_bytes([wb[0], wb[1], wb[2], wb[3]]);
        let mut v = pa ^ pb;
        v -= (v >> 1) & 0x5555_5555;
        v = (v & 0x3333_3333) + ((v >> 2) & 0x3333_3333);
        dist += (((v + (v >> 4)) & 0x0F0F_0F0F).wrapping_mul(0x0101_0101)) >> 24;
    }
    dist
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn test_distance_extremes() {
        let zeros = [0u8; 32];
        let ones = [0xFFu8; 32];
        let mut one_bit = zeros;
        one_bit[17] = 0b0001_0000;

        assert_eq!(descriptor_distance(&zeros, &zeros), 0);
        assert_eq!(descriptor_distance(&zeros, &one_bit), 1);
        assert_eq!(descriptor_distance(&zeros, &ones), 256);
    }

    #[test]
    fn test_distance_matches_naive_count() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..200 {
            let mut a = [0u8; 32];
            let mut b = [0u8; 32];
            rng.fill(&mut a[..]);
            rng.fill(&mut b[..]);

            let naive: u32 = a.iter().zip(&b).map(|(x, y)| (x ^ y).count_ones()).sum();
            let d = descriptor_distance(&a, &b);
            assert_eq!(d, naive);
            assert_eq!(d, descriptor_distance(&b, &a));
            assert!(d <= 256);
            assert_eq!(d == 0, a == b);
        }
    }
}
