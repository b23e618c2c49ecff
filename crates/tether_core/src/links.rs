//! Distance links between particles and the per-particle adjacency index.
//!
//! Link slots are addressed by stable IDs from their own [`IdPool`].
//! Creation and explicit removal are queued on the host and applied at the
//! next [`LinkGraph::build`]; the build then rebuilds a CSR index keyed by
//! particle so a particle's incident links are
//! `adjacency[start..start + count]`.

use glam::{UVec2, Vec2};
use std::ops::Range;

use crate::compute::{ActiveBits, Buffer, ComputeDevice, Kernel};
use crate::error::{Result, SimError};
use crate::id_pool::IdPool;
use crate::sort::{BitonicSort, KeyValue};

/// Link slots allotted per particle slot.
pub const LINKS_PER_PARTICLE: usize = 3;

/// Strain past which a link breaks for good.
pub const STRAIN_THRESHOLD: i32 = 1_000_000;

/// Stable link handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub(crate) u32);

impl LinkId {
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Queued link creation.
#[derive(Debug, Clone, Copy)]
struct LinkRecord {
    id: u32,
    a: u32,
    b: u32,
    rest_length: f32,
    /// An endpoint was destroyed before the upload; the slot lands inactive.
    broken: bool,
}

pub struct LinkGraph {
    max_links: usize,
    max_particles: usize,

    pub(crate) pairs: Buffer<UVec2>,
    pub(crate) rest_lengths: Buffer<f32>,
    pub(crate) strain: Buffer<i32>,
    pub(crate) active: ActiveBits,

    adjacency: Buffer<KeyValue>,
    counts: Buffer<u32>,
    starts: Buffer<u32>,

    created: Vec<LinkRecord>,
    removed: Vec<u32>,
    ids: IdPool,
    /// Host-side record of which IDs are handed out.
    live_slots: Vec<bool>,
    live: usize,
}

struct UploadLinksKernel<'a> {
    graph: &'a LinkGraph,
    records: &'a [LinkRecord],
}

impl Kernel for UploadLinksKernel<'_> {
    fn execute(&self, id: usize) {
        let record = self.records[id];
        let slot = record.id as usize;
        let graph = self.graph;
        graph.pairs.set(slot, UVec2::new(record.a, record.b));
        graph.rest_lengths.set(slot, record.rest_length);
        graph.strain.set(slot, 0);
        if record.broken {
            graph.active.clear(slot);
        } else {
            graph.active.set(slot);
        }
    }
}

struct DeactivateLinksKernel<'a> {
    active: &'a ActiveBits,
    ids: &'a [u32],
}

impl Kernel for DeactivateLinksKernel<'_> {
    fn execute(&self, id: usize) {
        self.active.clear(self.ids[id] as usize);
    }
}

struct BuildAdjacencyKernel<'a> {
    graph: &'a LinkGraph,
}

impl Kernel for BuildAdjacencyKernel<'_> {
    fn execute(&self, id: usize) {
        let graph = self.graph;
        if !graph.active.test(id) {
            let sentinel = KeyValue::new(graph.sentinel(), 0);
            graph.adjacency.set(id * 2, sentinel);
            graph.adjacency.set(id * 2 + 1, sentinel);
            return;
        }

        let pair = graph.pairs.get(id);
        graph.adjacency.set(id * 2, KeyValue::new(pair.x, id as u32));
        graph.adjacency.set(id * 2 + 1, KeyValue::new(pair.y, id as u32));
        graph.counts.atomic_add(pair.x as usize, 1);
        graph.counts.atomic_add(pair.y as usize, 1);
    }
}

impl LinkGraph {
    pub fn new(max_links: usize, max_particles: usize, reuse_ids: bool) -> Self {
        Self {
            max_links,
            max_particles,
            pairs: Buffer::new("link_pairs", max_links),
            rest_lengths: Buffer::new("link_rest_lengths", max_links),
            strain: Buffer::new("link_strain", max_links),
            active: ActiveBits::new("link_active", max_links),
            adjacency: Buffer::filled(
                "link_adjacency",
                max_links * 2,
                KeyValue::new(max_particles as u32, 0),
            ),
            counts: Buffer::new("link_counts", max_particles),
            starts: Buffer::new("link_starts", max_particles),
            created: Vec::new(),
            removed: Vec::new(),
            ids: IdPool::new(max_links as u32, reuse_ids),
            live_slots: vec![false; max_links],
            live: 0,
        }
    }

    /// Reserve an ID and queue the link for the next build.
    pub fn create_link(&mut self, a: u32, b: u32, rest_length: f32) -> Result<LinkId> {
        let limit = self.max_particles as u32;
        for id in [a, b] {
            if id >= limit {
                return Err(SimError::InvalidReference { id, limit });
            }
        }

        let id = self.ids.next_id()?;
        self.created.push(LinkRecord {
            id,
            a,
            b,
            rest_length,
            broken: false,
        });
        // A wrapped cursor can reissue an ID that was never freed.
        if !std::mem::replace(&mut self.live_slots[id as usize], true) {
            self.live += 1;
        }
        Ok(LinkId(id))
    }

    /// Free the ID now; the slot is deactivated at the next build.
    pub fn remove_link(&mut self, link: LinkId) -> Result<()> {
        if !self.is_live(link) {
            return Err(SimError::InvalidReference {
                id: link.0,
                limit: self.max_links as u32,
            });
        }
        self.ids.free_id(link.0)?;
        self.live_slots[link.0 as usize] = false;
        // A creation still queued for this ID never reaches the buffers.
        self.created.retain(|record| record.id != link.0);
        self.removed.push(link.0);
        self.live = self.live.saturating_sub(1);
        Ok(())
    }

    /// Apply queued removals, then queued creations, then rebuild the
    /// adjacency index.
    pub fn build(&mut self, device: &ComputeDevice) {
        if !self.removed.is_empty() {
            let ids = std::mem::take(&mut self.removed);
            device.dispatch(
                ids.len(),
                &DeactivateLinksKernel {
                    active: &self.active,
                    ids: &ids,
                },
            );
            device.barrier(self.active.words());
        }

        if !self.created.is_empty() {
            let records = std::mem::take(&mut self.created);
            tracing::trace!(count = records.len(), "uploading links");
            device.dispatch(
                records.len(),
                &UploadLinksKernel {
                    graph: self,
                    records: &records,
                },
            );
            device.barrier(self.active.words());
        }

        device.clear(&self.counts);
        device.clear(&self.starts);
        device.dispatch(self.max_links, &BuildAdjacencyKernel { graph: self });
        device.barrier(&self.adjacency);

        BitonicSort::sort(device, &self.adjacency);
        BitonicSort::calculate_offsets(device, &self.adjacency, &self.starts);
    }

    /// Grow every buffer and the ID pool, keeping existing links.
    pub fn resize(&mut self, max_links: usize, max_particles: usize) -> Result<()> {
        if max_links < self.max_links {
            return Err(SimError::ShrinkUnsupported {
                what: "link capacity",
                current: self.max_links,
                requested: max_links,
            });
        }
        if max_particles < self.max_particles {
            return Err(SimError::ShrinkUnsupported {
                what: "link particle capacity",
                current: self.max_particles,
                requested: max_particles,
            });
        }
        if max_links == self.max_links && max_particles == self.max_particles {
            return Ok(());
        }

        self.ids.resize(max_links as u32)?;
        self.live_slots.resize(max_links, false);
        self.pairs = self.pairs.resized(max_links);
        self.rest_lengths = self.rest_lengths.resized(max_links);
        self.strain = self.strain.resized(max_links);
        self.active = self.active.resized(max_links);

        // The index is rebuilt from scratch on the next build.
        self.adjacency = Buffer::filled(
            "link_adjacency",
            max_links * 2,
            KeyValue::new(max_particles as u32, 0),
        );
        self.counts = Buffer::new("link_counts", max_particles);
        self.starts = Buffer::new("link_starts", max_particles);

        tracing::info!(max_links, max_particles, "link graph resized");
        self.max_links = max_links;
        self.max_particles = max_particles;
        Ok(())
    }

    /// Deactivate every link incident to `particle` according to the last
    /// built index, and drop the particle's range.
    pub(crate) fn clear_particle_links(&self, particle: usize) {
        if particle >= self.max_particles {
            return;
        }
        for idx in self.range_of(particle) {
            self.active.clear(self.adjacency.get(idx).value as usize);
        }
        self.counts.set(particle, 0);
    }

    /// Mark queued creations touching `particle` as broken so they never
    /// come up active against whatever next occupies the slot.
    pub(crate) fn break_queued_links(&mut self, particle: u32) {
        for record in &mut self.created {
            if record.a == particle || record.b == particle {
                record.broken = true;
            }
        }
    }

    /// Key given to entries of inactive links.
    #[inline]
    pub fn sentinel(&self) -> u32 {
        self.max_particles as u32
    }

    /// Adjacency indices of `particle`'s links from the last build.
    #[inline]
    pub fn range_of(&self, particle: usize) -> Range<usize> {
        let start = self.starts.get(particle) as usize;
        let count = self.counts.get(particle) as usize;
        start..start + count
    }

    /// Link stored at position `idx` of the adjacency array.
    #[inline]
    pub fn link_at(&self, idx: usize) -> u32 {
        self.adjacency.get(idx).value
    }

    pub fn links_of(&self, particle: usize) -> impl Iterator<Item = LinkId> + '_ {
        self.range_of(particle).map(move |i| LinkId(self.link_at(i)))
    }

    #[inline]
    pub fn adjacency_len(&self) -> usize {
        self.adjacency.len()
    }

    pub fn is_active(&self, link: LinkId) -> bool {
        self.active.test(link.0 as usize)
    }

    /// Whether `link` is handed out and not yet removed.
    pub fn is_live(&self, link: LinkId) -> bool {
        self.live_slots
            .get(link.0 as usize)
            .copied()
            .unwrap_or(false)
    }

    fn queued(&self, link: LinkId) -> Option<&LinkRecord> {
        self.created.iter().find(|record| record.id == link.0)
    }

    /// Endpoints of a live link. Creations not yet built report their
    /// queued values.
    pub fn endpoints(&self, link: LinkId) -> Option<(u32, u32)> {
        if !self.is_live(link) {
            return None;
        }
        if let Some(record) = self.queued(link) {
            return Some((record.a, record.b));
        }
        let pair = self.pairs.get(link.0 as usize);
        Some((pair.x, pair.y))
    }

    pub fn strain(&self, link: LinkId) -> Option<i32> {
        if !self.is_live(link) {
            return None;
        }
        if self.queued(link).is_some() {
            return Some(0);
        }
        Some(self.strain.get(link.0 as usize))
    }

    pub fn rest_length(&self, link: LinkId) -> Option<f32> {
        if !self.is_live(link) {
            return None;
        }
        if let Some(record) = self.queued(link) {
            return Some(record.rest_length);
        }
        Some(self.rest_lengths.get(link.0 as usize))
    }

    /// Endpoint positions of every active link, for drawing.
    pub fn active_segments(&self, positions: &Buffer<Vec2>) -> Vec<[Vec2; 2]> {
        (0..self.max_links)
            .filter(|&slot| self.active.test(slot))
            .filter_map(|slot| {
                let pair = self.pairs.get(slot);
                let (a, b) = (pair.x as usize, pair.y as usize);
                (a < positions.len() && b < positions.len())
                    .then(|| [positions.get(a), positions.get(b)])
            })
            .collect()
    }

    /// Links created and not yet removed, broken or not.
    #[inline]
    pub fn count(&self) -> usize {
        self.live
    }

    pub fn active_count(&self) -> usize {
        self.active.count_ones()
    }

    pub fn pending(&self) -> usize {
        self.created.len() + self.removed.len()
    }

    pub fn max_links(&self) -> usize {
        self.max_links
    }

    pub fn max_particles(&self) -> usize {
        self.max_particles
    }
}
