//! Uniform spatial grid rebuilt from particle positions every step.
//!
//! Each slot emits a (cell, slot) pair, the pairs are bitonic-sorted by
//! cell, and the offset pass records where each cell's run begins. A cell's
//! occupants are then `pairs[start..start + count]`.

use glam::{UVec2, Vec2};
use std::ops::Range;

use crate::compute::{ActiveBits, Buffer, ComputeDevice, Kernel};
use crate::sort::{BitonicSort, KeyValue};

pub struct SpatialGrid {
    extents: Vec2,
    cell_size: f32,
    cell_count: UVec2,
    cell_count_linear: u32,
    pairs: Buffer<KeyValue>,
    counts: Buffer<u32>,
    starts: Buffer<u32>,
}

struct BuildGridKernel<'a> {
    grid: &'a SpatialGrid,
    positions: &'a Buffer<Vec2>,
    active: &'a ActiveBits,
}

impl Kernel for BuildGridKernel<'_> {
    fn execute(&self, id: usize) {
        let grid = self.grid;
        if !self.active.test(id) {
            grid.pairs.set(id, KeyValue::new(grid.sentinel(), 0));
            return;
        }

        let cell = grid.cell_index(self.positions.get(id));
        grid.counts.atomic_add(cell as usize, 1);
        grid.pairs.set(id, KeyValue::new(cell, id as u32));
    }
}

impl SpatialGrid {
    /// Cells per axis are `floor(extents / cell_size)`, at least one.
    pub fn new(extents: Vec2, cell_size: f32, max_items: usize) -> Self {
        let cell_count = UVec2::new(
            ((extents.x / cell_size).floor() as u32).max(1),
            ((extents.y / cell_size).floor() as u32).max(1),
        );
        let cell_count_linear = cell_count.x * cell_count.y;

        tracing::debug!(
            cells_x = cell_count.x,
            cells_y = cell_count.y,
            cell_size,
            max_items,
            "grid initialized"
        );

        Self {
            extents,
            cell_size,
            cell_count,
            cell_count_linear,
            pairs: Buffer::new("grid_pairs", max_items),
            counts: Buffer::new("grid_counts", cell_count_linear as usize),
            starts: Buffer::new("grid_starts", cell_count_linear as usize),
        }
    }

    /// Rebuild the bucket index. Slots past the grid's item capacity are
    /// ignored.
    pub fn build(&self, device: &ComputeDevice, positions: &Buffer<Vec2>, active: &ActiveBits) {
        device.clear(&self.counts);
        device.clear(&self.starts);

        let slots = positions.len().min(self.pairs.len());
        device.dispatch(
            slots,
            &BuildGridKernel {
                grid: self,
                positions,
                active,
            },
        );
        device.barrier(&self.pairs);

        BitonicSort::sort(device, &self.pairs);
        BitonicSort::calculate_offsets(device, &self.pairs, &self.starts);
    }

    /// Cell coordinate of `position`, clamped into the grid.
    #[inline]
    pub fn cell_coord(&self, position: Vec2) -> UVec2 {
        let max = (self.cell_count - UVec2::ONE).as_vec2();
        let coord = (position / self.cell_size).clamp(Vec2::ZERO, max).floor();
        coord.as_uvec2()
    }

    #[inline]
    pub fn index_of(&self, coord: UVec2) -> u32 {
        coord.x + coord.y * self.cell_count.x
    }

    #[inline]
    pub fn cell_index(&self, position: Vec2) -> u32 {
        self.index_of(self.cell_coord(position))
    }

    /// Key given to inactive slots; sorts after every real cell.
    #[inline]
    pub fn sentinel(&self) -> u32 {
        self.cell_count_linear + 1
    }

    /// The cell itself followed by its existing neighbors.
    pub fn neighbors(&self, cell: u32) -> CellNeighbors {
        let width = self.cell_count.x;
        let x = cell % width;
        let y = cell / width;
        let mut cells = [0u32; 9];
        let mut len = 0;

        cells[len] = cell;
        len += 1;
        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let nx = x as i64 + dx;
                let ny = y as i64 + dy;
                if nx < 0 || ny < 0 || nx >= width as i64 || ny >= self.cell_count.y as i64 {
                    continue;
                }
                cells[len] = nx as u32 + ny as u32 * width;
                len += 1;
            }
        }

        CellNeighbors { cells, len, cursor: 0 }
    }

    /// Indices into the sorted pair array holding `cell`'s occupants.
    #[inline]
    pub fn cell_range(&self, cell: u32) -> Range<usize> {
        let start = self.starts.get(cell as usize) as usize;
        let count = self.counts.get(cell as usize) as usize;
        start..start + count
    }

    /// Slot index stored at position `idx` of the sorted pair array.
    #[inline]
    pub fn occupant(&self, idx: usize) -> u32 {
        self.pairs.get(idx).value
    }

    /// Every particle in `cell`, read from the last build.
    pub fn cell_particles(&self, cell: u32) -> impl Iterator<Item = u32> + '_ {
        self.cell_range(cell).map(move |i| self.occupant(i))
    }

    /// Every particle in the cell of `position` and the cells around it.
    pub fn query(&self, position: Vec2) -> impl Iterator<Item = u32> + '_ {
        self.neighbors(self.cell_index(position))
            .flat_map(move |cell| self.cell_particles(cell))
    }

    pub fn extents(&self) -> Vec2 {
        self.extents
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn cell_count(&self) -> UVec2 {
        self.cell_count
    }

    pub fn cell_count_linear(&self) -> u32 {
        self.cell_count_linear
    }

    pub fn max_items(&self) -> usize {
        self.pairs.len()
    }
}

/// Iterator over a cell and its up-to-8 in-bounds neighbors.
#[derive(Debug, Clone)]
pub struct CellNeighbors {
    cells: [u32; 9],
    len: usize,
    cursor: usize,
}

impl Iterator for CellNeighbors {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.cursor >= self.len {
            return None;
        }
        let cell = self.cells[self.cursor];
        self.cursor += 1;
        Some(cell)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rest = self.len - self.cursor;
        (rest, Some(rest))
    }
}

impl ExactSizeIterator for CellNeighbors {}
