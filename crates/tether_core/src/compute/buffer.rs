//! Device buffers.
//!
//! Every element lives in an atomic cell so kernels can share buffers
//! across workers without locks. Plain `get`/`set` are relaxed loads and
//! stores: a race between two workers yields one of the written values,
//! never undefined behavior. Visibility across dispatches comes from the
//! dispatch join, not from these orderings.

use glam::{IVec2, UVec2, Vec2};
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};

use crate::sort::KeyValue;

/// A value that can be stored in a [`Buffer`].
pub trait Element: Copy + Default + Send + Sync + 'static {
    type Cell: Send + Sync;

    fn cell(value: Self) -> Self::Cell;
    fn load(cell: &Self::Cell) -> Self;
    fn store(cell: &Self::Cell, value: Self);
}

impl Element for u32 {
    type Cell = AtomicU32;

    #[inline]
    fn cell(value: Self) -> Self::Cell {
        AtomicU32::new(value)
    }
    #[inline]
    fn load(cell: &Self::Cell) -> Self {
        cell.load(Ordering::Relaxed)
    }
    #[inline]
    fn store(cell: &Self::Cell, value: Self) {
        cell.store(value, Ordering::Relaxed)
    }
}

impl Element for i32 {
    type Cell = AtomicI32;

    #[inline]
    fn cell(value: Self) -> Self::Cell {
        AtomicI32::new(value)
    }
    #[inline]
    fn load(cell: &Self::Cell) -> Self {
        cell.load(Ordering::Relaxed)
    }
    #[inline]
    fn store(cell: &Self::Cell, value: Self) {
        cell.store(value, Ordering::Relaxed)
    }
}

impl Element for f32 {
    type Cell = AtomicU32;

    #[inline]
    fn cell(value: Self) -> Self::Cell {
        AtomicU32::new(value.to_bits())
    }
    #[inline]
    fn load(cell: &Self::Cell) -> Self {
        f32::from_bits(cell.load(Ordering::Relaxed))
    }
    #[inline]
    fn store(cell: &Self::Cell, value: Self) {
        cell.store(value.to_bits(), Ordering::Relaxed)
    }
}

impl Element for Vec2 {
    type Cell = [AtomicU32; 2];

    #[inline]
    fn cell(value: Self) -> Self::Cell {
        [AtomicU32::new(value.x.to_bits()), AtomicU32::new(value.y.to_bits())]
    }
    #[inline]
    fn load(cell: &Self::Cell) -> Self {
        Vec2::new(
            f32::from_bits(cell[0].load(Ordering::Relaxed)),
            f32::from_bits(cell[1].load(Ordering::Relaxed)),
        )
    }
    #[inline]
    fn store(cell: &Self::Cell, value: Self) {
        cell[0].store(value.x.to_bits(), Ordering::Relaxed);
        cell[1].store(value.y.to_bits(), Ordering::Relaxed);
    }
}

impl Element for IVec2 {
    type Cell = [AtomicI32; 2];

    #[inline]
    fn cell(value: Self) -> Self::Cell {
        [AtomicI32::new(value.x), AtomicI32::new(value.y)]
    }
    #[inline]
    fn load(cell: &Self::Cell) -> Self {
        IVec2::new(cell[0].load(Ordering::Relaxed), cell[1].load(Ordering::Relaxed))
    }
    #[inline]
    fn store(cell: &Self::Cell, value: Self) {
        cell[0].store(value.x, Ordering::Relaxed);
        cell[1].store(value.y, Ordering::Relaxed);
    }
}

impl Element for UVec2 {
    type Cell = [AtomicU32; 2];

    #[inline]
    fn cell(value: Self) -> Self::Cell {
        [AtomicU32::new(value.x), AtomicU32::new(value.y)]
    }
    #[inline]
    fn load(cell: &Self::Cell) -> Self {
        UVec2::new(cell[0].load(Ordering::Relaxed), cell[1].load(Ordering::Relaxed))
    }
    #[inline]
    fn store(cell: &Self::Cell, value: Self) {
        cell[0].store(value.x, Ordering::Relaxed);
        cell[1].store(value.y, Ordering::Relaxed);
    }
}

/// Pairs travel as one 64-bit word so a compare-exchange never tears them.
impl Element for KeyValue {
    type Cell = AtomicU64;

    #[inline]
    fn cell(value: Self) -> Self::Cell {
        AtomicU64::new(value.to_bits())
    }
    #[inline]
    fn load(cell: &Self::Cell) -> Self {
        KeyValue::from_bits(cell.load(Ordering::Relaxed))
    }
    #[inline]
    fn store(cell: &Self::Cell, value: Self) {
        cell.store(value.to_bits(), Ordering::Relaxed)
    }
}

/// Fixed-length array of shared elements.
///
/// Buffers never change length in place; growth goes through
/// [`Buffer::resized`], which copies into a fresh allocation.
pub struct Buffer<T: Element> {
    label: &'static str,
    cells: Box<[T::Cell]>,
}

impl<T: Element> Buffer<T> {
    /// Allocate `len` default-initialized elements.
    pub fn new(label: &'static str, len: usize) -> Self {
        Self::filled(label, len, T::default())
    }

    pub fn filled(label: &'static str, len: usize, value: T) -> Self {
        Self {
            label,
            cells: (0..len).map(|_| T::cell(value)).collect(),
        }
    }

    pub fn from_slice(label: &'static str, data: &[T]) -> Self {
        Self {
            label,
            cells: data.iter().map(|&v| T::cell(v)).collect(),
        }
    }

    #[inline]
    pub fn label(&self) -> &'static str {
        self.label
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[inline]
    pub fn get(&self, idx: usize) -> T {
        T::load(&self.cells[idx])
    }

    #[inline]
    pub fn set(&self, idx: usize, value: T) {
        T::store(&self.cells[idx], value)
    }

    /// Device-to-host copy of the whole buffer.
    pub fn to_vec(&self) -> Vec<T> {
        self.cells.iter().map(T::load).collect()
    }

    /// Copy into a new buffer of `new_len` elements. Existing elements keep
    /// their index; new tail elements are default-initialized.
    pub fn resized(&self, new_len: usize) -> Self {
        Self {
            label: self.label,
            cells: (0..new_len)
                .map(|i| T::cell(if i < self.len() { self.get(i) } else { T::default() }))
                .collect(),
        }
    }

    pub(crate) fn cells(&self) -> &[T::Cell] {
        &self.cells
    }
}

impl<T: Element + std::fmt::Debug> std::fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("label", &self.label)
            .field("len", &self.len())
            .finish()
    }
}

impl Buffer<u32> {
    #[inline]
    pub fn atomic_add(&self, idx: usize, value: u32) -> u32 {
        self.cells[idx].fetch_add(value, Ordering::Relaxed)
    }

    #[inline]
    pub fn atomic_or(&self, idx: usize, mask: u32) -> u32 {
        self.cells[idx].fetch_or(mask, Ordering::Relaxed)
    }

    #[inline]
    pub fn atomic_and(&self, idx: usize, mask: u32) -> u32 {
        self.cells[idx].fetch_and(mask, Ordering::Relaxed)
    }
}

impl Buffer<i32> {
    #[inline]
    pub fn atomic_add(&self, idx: usize, value: i32) -> i32 {
        self.cells[idx].fetch_add(value, Ordering::Relaxed)
    }
}

impl Buffer<IVec2> {
    /// Per-axis atomic add. The two axes are independent atomics, so a
    /// concurrent reader may see one axis updated before the other.
    #[inline]
    pub fn atomic_add(&self, idx: usize, value: IVec2) {
        let cell = &self.cells[idx];
        cell[0].fetch_add(value.x, Ordering::Relaxed);
        cell[1].fetch_add(value.y, Ordering::Relaxed);
    }
}

impl Buffer<f32> {
    #[inline]
    pub fn atomic_add(&self, idx: usize, value: f32) -> f32 {
        let cell = &self.cells[idx];
        let mut current = cell.load(Ordering::Relaxed);
        loop {
            let next = (f32::from_bits(current) + value).to_bits();
            match cell.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(prev) => return f32::from_bits(prev),
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_keeps_prefix_and_zeroes_tail() {
        let buffer = Buffer::from_slice("values", &[1i32, 2, 3]);
        let grown = buffer.resized(5);
        assert_eq!(grown.to_vec(), vec![1, 2, 3, 0, 0]);
        assert_eq!(grown.label(), "values");
    }

    #[test]
    fn vector_atomics_are_per_axis() {
        let buffer: Buffer<IVec2> = Buffer::new("fixed", 1);
        buffer.atomic_add(0, IVec2::new(5, -3));
        buffer.atomic_add(0, IVec2::new(-1, 1));
        assert_eq!(buffer.get(0), IVec2::new(4, -2));
    }

    #[test]
    fn float_add_accumulates() {
        let buffer = Buffer::filled("travel", 1, 0.5f32);
        assert_eq!(buffer.atomic_add(0, 0.25), 0.5);
        assert_eq!(buffer.get(0), 0.75);
    }

    #[test]
    fn key_values_survive_storage() {
        let buffer = Buffer::filled("pairs", 2, KeyValue::new(u32::MAX, 7));
        buffer.set(1, KeyValue::new(3, 9));
        assert_eq!(buffer.get(0), KeyValue::new(u32::MAX, 7));
        assert_eq!(buffer.get(1), KeyValue::new(3, 9));
    }
}
