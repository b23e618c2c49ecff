//! Packed active flags, 32 per word.

use super::Buffer;

/// Bitset over a device buffer. `set` and `clear` are atomic or/and on the
/// backing word, so workers may flip bits of the same word concurrently.
#[derive(Debug)]
pub struct ActiveBits {
    words: Buffer<u32>,
    len: usize,
}

#[inline]
fn split(idx: usize) -> (usize, u32) {
    (idx / 32, 1u32 << (idx % 32))
}

impl ActiveBits {
    pub fn new(label: &'static str, len: usize) -> Self {
        Self {
            words: Buffer::new(label, len.div_ceil(32)),
            len,
        }
    }

    /// Number of addressable bits.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Out-of-range indices read as inactive.
    #[inline]
    pub fn test(&self, idx: usize) -> bool {
        if idx >= self.len {
            return false;
        }
        let (word, mask) = split(idx);
        self.words.get(word) & mask != 0
    }

    #[inline]
    pub fn set(&self, idx: usize) {
        let (word, mask) = split(idx);
        self.words.atomic_or(word, mask);
    }

    #[inline]
    pub fn clear(&self, idx: usize) {
        let (word, mask) = split(idx);
        self.words.atomic_and(word, !mask);
    }

    pub fn count_ones(&self) -> usize {
        self.words
            .to_vec()
            .iter()
            .map(|w| w.count_ones() as usize)
            .sum()
    }

    pub fn resized(&self, new_len: usize) -> Self {
        Self {
            words: self.words.resized(new_len.div_ceil(32)),
            len: new_len,
        }
    }

    pub fn words(&self) -> &Buffer<u32> {
        &self.words
    }
}
