//! Seeded random numbers for the spawner

/// Linear congruential generator. Same seed, same run.
pub struct SpawnRng {
    state: u64,
}

impl SpawnRng {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_u32(&mut self) -> u32 {
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;

        self.state = A.wrapping_mul(self.state).wrapping_add(C) & 0xFFFF_FFFF;
        self.state as u32
    }

    /// Uniform in `[0, 1]`.
    pub fn next_f32(&mut self) -> f32 {
        self.next_u32() as f32 / u32::MAX as f32
    }

    /// Uniform in `[-1, 1]`.
    pub fn next_signed(&mut self) -> f32 {
        self.next_f32() * 2.0 - 1.0
    }

    /// Index in `0..len`; `len` must be non-zero.
    pub fn below(&mut self, len: usize) -> usize {
        (self.next_u32() as u64 * len as u64 >> 32) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let mut a = SpawnRng::new(42);
        let mut b = SpawnRng::new(42);
        for _ in 0..16 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
    }

    #[test]
    fn ranges_hold() {
        let mut rng = SpawnRng::new(7);
        for _ in 0..1000 {
            assert!(rng.below(20) < 20);
            let s = rng.next_signed();
            assert!((-1.0..=1.0).contains(&s));
        }
    }
}
