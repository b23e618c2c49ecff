//! Recycling integer identifiers for particles and links.

use crate::error::{Result, SimError};
use std::collections::VecDeque;

/// Issues IDs below `capacity`, preferring freed IDs in FIFO order over
/// never-used ones.
///
/// With `reuse_at_capacity` the sequential cursor wraps to 0 once it reaches
/// the capacity and the free queue is empty. The pool does not track which
/// IDs are live, so callers relying on wraparound must free an ID before the
/// cursor comes back around to it.
#[derive(Debug, Clone)]
pub struct IdPool {
    free: VecDeque<u32>,
    next: u32,
    capacity: u32,
    high_water: u32,
    reuse_at_capacity: bool,
}

impl IdPool {
    pub fn new(capacity: u32, reuse_at_capacity: bool) -> Self {
        Self {
            free: VecDeque::new(),
            next: 0,
            capacity,
            high_water: 0,
            reuse_at_capacity,
        }
    }

    pub fn next_id(&mut self) -> Result<u32> {
        if let Some(id) = self.free.pop_front() {
            return Ok(id);
        }

        if self.next >= self.capacity {
            if !self.reuse_at_capacity || self.capacity == 0 {
                return Err(SimError::PoolExhausted {
                    capacity: self.capacity,
                });
            }
            self.next = 0;
        }

        let id = self.next;
        self.next += 1;
        self.high_water = self.high_water.max(self.next);
        Ok(id)
    }

    pub fn free_id(&mut self, id: u32) -> Result<()> {
        if id >= self.capacity {
            return Err(SimError::InvalidReference {
                id,
                limit: self.capacity,
            });
        }
        self.free.push_back(id);
        Ok(())
    }

    pub fn resize(&mut self, new_capacity: u32) -> Result<()> {
        if new_capacity < self.capacity {
            return Err(SimError::ShrinkUnsupported {
                what: "id pool",
                current: self.capacity as usize,
                requested: new_capacity as usize,
            });
        }
        self.capacity = new_capacity;
        Ok(())
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// One past the highest ID ever issued.
    #[inline]
    pub fn high_water(&self) -> u32 {
        self.high_water
    }

    #[inline]
    pub fn queued_free(&self) -> usize {
        self.free.len()
    }
}
