//! CPU execution backend.
//!
//! Each dispatch launches one logical worker per element of its domain,
//! grouped into fixed-size thread groups that run on a rayon pool. Workers
//! of one dispatch have no defined order among themselves. A dispatch
//! returns only once every worker finished, and rayon's join publishes all
//! of their writes, so consecutive dispatches are separated by a barrier.

use rayon::prelude::*;

use super::{Buffer, Element};
use crate::config::DeviceSettings;
use crate::error::Result;

/// A data-parallel program run once per worker id.
///
/// Implementors hold only buffer handles and launch constants; any state
/// that outlives a worker goes through the buffers.
pub trait Kernel: Sync {
    fn execute(&self, id: usize);
}

pub struct ComputeDevice {
    pool: rayon::ThreadPool,
    group_size: usize,
}

impl ComputeDevice {
    pub fn new(settings: &DeviceSettings) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.threads)
            .thread_name(|i| format!("tether-worker-{i}"))
            .build()?;
        let group_size = settings.group_size.max(1);

        tracing::info!(
            threads = pool.current_num_threads(),
            group_size,
            "compute device ready"
        );

        Ok(Self { pool, group_size })
    }

    #[inline]
    pub fn group_size(&self) -> usize {
        self.group_size
    }

    pub fn thread_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `kernel` for every id in `0..len` and wait for completion.
    pub fn dispatch<K: Kernel>(&self, len: usize, kernel: &K) {
        if len == 0 {
            return;
        }
        let group_size = self.group_size;
        let groups = len.div_ceil(group_size);
        self.pool.install(|| {
            (0..groups).into_par_iter().for_each(|group| {
                let start = group * group_size;
                let end = (start + group_size).min(len);
                for id in start..end {
                    kernel.execute(id);
                }
            });
        });
    }

    /// Reset every element to its default value.
    pub fn clear<T: Element>(&self, buffer: &Buffer<T>) {
        self.fill(buffer, T::default());
    }

    pub fn fill<T: Element>(&self, buffer: &Buffer<T>, value: T) {
        let group_size = self.group_size;
        self.pool.install(|| {
            buffer
                .cells()
                .par_chunks(group_size)
                .for_each(|chunk| chunk.iter().for_each(|cell| T::store(cell, value)));
        });
    }

    /// Make prior writes to `buffer` visible to the next dispatch.
    ///
    /// Dispatch already joins its workers, so this only adds a fence for
    /// host-side writes made between dispatches.
    pub fn barrier<T: Element>(&self, buffer: &Buffer<T>) {
        std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
        tracing::trace!(buffer = buffer.label(), "barrier");
    }
}

impl std::fmt::Debug for ComputeDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeDevice")
            .field("threads", &self.thread_count())
            .field("group_size", &self.group_size)
            .finish()
    }
}
