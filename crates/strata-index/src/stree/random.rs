//! Level assignment for randomly ordered inserts.

/// Seed used when the configured seed is zero (xorshift never leaves zero).
const FALLBACK_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

/// Tree-local xorshift generator choosing how many index levels a new key
/// is promoted to.
///
/// Promotion to each further level has probability about `1 / page_size`
/// (exactly `2^-floor(log2(page_size))`), so height stays near
/// `log_page_size(row_count)`.
#[derive(Debug, Clone)]
pub struct LevelGenerator {
    state: u64,
    shift: u32,
    mask: u64,
}

impl LevelGenerator {
    pub fn new(seed: u64, page_size: usize) -> Self {
        let shift = (usize::BITS - 1 - page_size.max(2).leading_zeros()).max(1);
        Self {
            state: if seed == 0 { FALLBACK_SEED } else { seed },
            shift,
            mask: (1u64 << shift) - 1,
        }
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Returns a level in `0..=max_level`.
    pub fn next_level(&mut self, max_level: usize) -> usize {
        let mut x = self.next_u64();
        let mut level = 0;
        while level < max_level && x & self.mask == self.mask {
            level += 1;
            x >>= self.shift;
        }
        level
    }
}

/// Number of index levels a tree expecting `rows` rows needs.
pub fn levels_for_rows(rows: u64, page_size: usize) -> usize {
    let page_size = page_size.max(2) as u64;
    let mut rows = rows;
    let mut levels = 0;
    while rows >= page_size {
        rows /= page_size;
        levels += 1;
    }
    levels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_levels() {
        let mut a = LevelGenerator::new(42, 16);
        let mut b = LevelGenerator::new(42, 16);
        for _ in 0..1000 {
            assert_eq!(a.next_level(8), b.next_level(8));
        }
    }

    #[test]
    fn test_promotion_rate_tracks_page_size() {
        let mut generator = LevelGenerator::new(7, 16);
        let trials = 100_000;
        let promoted = (0..trials).filter(|_| generator.next_level(8) > 0).count();
        // expected 1/16 of trials
        let expected = trials / 16;
        assert!(promoted > expected / 2 && promoted < expected * 2, "promoted {}", promoted);
    }

    #[test]
    fn test_max_level_is_respected() {
        let mut generator = LevelGenerator::new(1, 4);
        for _ in 0..10_000 {
            assert!(generator.next_level(2) <= 2);
            assert_eq!(generator.next_level(0), 0);
        }
    }

    #[test]
    fn test_zero_seed_still_advances() {
        let mut generator = LevelGenerator::new(0, 4);
        let first = generator.next_u64();
        assert_ne!(first, 0);
        assert_ne!(generator.next_u64(), first);
    }

    #[test]
    fn test_levels_for_rows() {
        assert_eq!(levels_for_rows(0, 4), 0);
        assert_eq!(levels_for_rows(3, 4), 0);
        assert_eq!(levels_for_rows(4, 4), 1);
        assert_eq!(levels_for_rows(64, 4), 3);
        assert_eq!(levels_for_rows(1_000_000, 512), 2);
    }
}
