//! Particle store: owns particle buffers and drives the per-frame update.
//!
//! Hosts add and remove particles and links between frames. Particle
//! creation and destruction are queued as upload records and applied at the
//! start of the next [`ParticleStore::update`], followed by the link build,
//! the grid build and the physics dispatch.

use glam::{IVec2, Vec2};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, TryLockError};
use tether_metrics::PhaseProfiler;

use crate::color::Rgba;
use crate::compute::{ActiveBits, Buffer, ComputeDevice, Kernel};
use crate::config::{self, BoundaryShape, SimulationSettings};
use crate::error::{Result, SimError};
use crate::fixed::vec_to_fixed;
use crate::grid::SpatialGrid;
use crate::id_pool::IdPool;
use crate::links::{LinkGraph, LinkId, LINKS_PER_PARTICLE};
use crate::physics::{self, StepParams};
use crate::time::SimulationClock;
use crate::view::RenderView;

/// Grid cells are this many radii wide.
const CELL_SIZE_RADII: f32 = 3.0;

/// Slots allocated up front when not preallocating.
const INITIAL_CAPACITY: usize = 10;

const PROFILER_WINDOW: usize = 120;

/// Stable particle handle.
///
/// Handles stay valid across capacity growth. Once a particle is removed
/// its index may be handed out again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticleId(pub(crate) u32);

impl ParticleId {
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Per-slot particle state. Every buffer has one element per slot.
pub(crate) struct ParticleBuffers {
    pub positions: Buffer<Vec2>,
    pub fixed: Buffer<IVec2>,
    pub last_positions: Buffer<Vec2>,
    pub travel: Buffer<f32>,
    pub colors: Buffer<u32>,
    pub active: ActiveBits,
}

impl ParticleBuffers {
    pub fn new(capacity: usize) -> Self {
        Self {
            positions: Buffer::new("positions", capacity),
            fixed: Buffer::new("fixed_positions", capacity),
            last_positions: Buffer::new("last_positions", capacity),
            travel: Buffer::new("travel_distances", capacity),
            colors: Buffer::new("colors", capacity),
            active: ActiveBits::new("active", capacity),
        }
    }

    pub fn resized(&self, capacity: usize) -> Self {
        Self {
            positions: self.positions.resized(capacity),
            fixed: self.fixed.resized(capacity),
            last_positions: self.last_positions.resized(capacity),
            travel: self.travel.resized(capacity),
            colors: self.colors.resized(capacity),
            active: self.active.resized(capacity),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.positions.len()
    }
}

#[derive(Debug, Clone, Copy)]
enum ParticleUpload {
    Create {
        id: u32,
        position: Vec2,
        previous: Vec2,
        color: u32,
    },
    Destroy {
        id: u32,
    },
}

impl ParticleUpload {
    fn id(&self) -> u32 {
        match *self {
            ParticleUpload::Create { id, .. } | ParticleUpload::Destroy { id } => id,
        }
    }
}

struct UploadKernel<'a> {
    particles: &'a ParticleBuffers,
    links: &'a LinkGraph,
    records: &'a [ParticleUpload],
}

impl Kernel for UploadKernel<'_> {
    fn execute(&self, id: usize) {
        let particles = self.particles;
        match self.records[id] {
            ParticleUpload::Create {
                id,
                position,
                previous,
                color,
            } => {
                let slot = id as usize;
                particles.positions.set(slot, position);
                particles.fixed.set(slot, vec_to_fixed(position));
                particles.last_positions.set(slot, previous);
                particles.travel.set(slot, 0.0);
                particles.colors.set(slot, color);
                particles.active.set(slot);
            }
            ParticleUpload::Destroy { id } => {
                let slot = id as usize;
                self.links.clear_particle_links(slot);
                particles.active.clear(slot);
            }
        }
    }
}

/// Summary of one [`ParticleStore::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepReport {
    pub frame: u64,
    /// Upload records applied this frame.
    pub uploads: usize,
    pub particles: usize,
    pub links: usize,
    /// Slots the physics kernel ran over; 0 when the step was skipped.
    pub dispatched: usize,
}

pub struct ParticleStore {
    settings: SimulationSettings,
    device: ComputeDevice,
    particles: ParticleBuffers,
    ids: IdPool,
    grid: SpatialGrid,
    links: LinkGraph,
    uploads: Vec<ParticleUpload>,
    /// IDs handed out and not yet removed.
    live: Vec<bool>,
    capacity: usize,
    count: usize,
    clock: SimulationClock,
    profiler: PhaseProfiler,
}

impl ParticleStore {
    pub fn new(settings: SimulationSettings) -> Result<Self> {
        settings.validate()?;
        let device = ComputeDevice::new(&settings.device)?;

        let max = settings.max_particles;
        let capacity = if settings.preallocate {
            max
        } else {
            INITIAL_CAPACITY.min(max)
        };

        tracing::info!(
            capacity,
            max_particles = max,
            radius = settings.radius,
            "particle store created"
        );

        Ok(Self {
            device,
            particles: ParticleBuffers::new(capacity),
            ids: IdPool::new(capacity as u32, settings.reuse_particle_ids),
            grid: SpatialGrid::new(
                settings.bounds,
                settings.radius * CELL_SIZE_RADII,
                capacity,
            ),
            links: LinkGraph::new(max * LINKS_PER_PARTICLE, max, settings.reuse_link_ids),
            uploads: Vec::with_capacity(settings.upload_queue_len),
            live: vec![false; capacity],
            capacity,
            count: 0,
            clock: SimulationClock::new(),
            profiler: PhaseProfiler::new(PROFILER_WINDOW),
            settings,
        })
    }

    /// Queue a new particle. `Ok(None)` means the upload queue is full for
    /// this frame; retry after the next update.
    pub fn add_particle(
        &mut self,
        position: Vec2,
        velocity: Vec2,
        color: Rgba,
    ) -> Result<Option<ParticleId>> {
        let headroom = self.settings.upload_queue_len;
        if self.uploads.len() >= headroom {
            tracing::trace!(queued = self.uploads.len(), "upload queue full");
            return Ok(None);
        }

        let max = self.settings.max_particles;
        if self.count + headroom >= self.capacity && self.capacity < max {
            let grown = (((self.count as f32) * 1.5) as usize + headroom).min(max);
            self.set_capacity(grown)?;
        }

        let id = self.ids.next_id()?;
        self.uploads.push(ParticleUpload::Create {
            id,
            position,
            previous: position - velocity,
            color: color.to_packed(),
        });
        // A wrapped cursor can reissue an ID that was never freed.
        if !std::mem::replace(&mut self.live[id as usize], true) {
            self.count = (self.count + 1).min(max);
        }
        Ok(Some(ParticleId(id)))
    }

    /// Queue deactivation of `id` and release it for reuse. Links through
    /// the particle break when the removal is applied, including links
    /// queued in the same frame.
    pub fn remove_particle(&mut self, id: ParticleId) -> Result<()> {
        if self.count == 0 {
            return Err(SimError::EmptyStoreRemoval);
        }
        self.check_live(id)?;

        self.ids.free_id(id.0)?;
        self.live[id.0 as usize] = false;
        self.links.break_queued_links(id.0);
        self.uploads.push(ParticleUpload::Destroy { id: id.0 });
        self.count -= 1;
        Ok(())
    }

    fn check_live(&self, id: ParticleId) -> Result<()> {
        if self.live.get(id.0 as usize).copied().unwrap_or(false) {
            Ok(())
        } else {
            Err(SimError::InvalidReference {
                id: id.0,
                limit: self.capacity as u32,
            })
        }
    }

    /// Link two particles. The rest length is `length` plus one diameter,
    /// so `length` is the gap between surfaces.
    pub fn add_link(&mut self, a: ParticleId, b: ParticleId, length: f32) -> Result<LinkId> {
        self.check_live(a)?;
        self.check_live(b)?;
        self.links
            .create_link(a.0, b.0, length + self.settings.radius * 2.0)
    }

    pub fn remove_link(&mut self, link: LinkId) -> Result<()> {
        self.links.remove_link(link)
    }

    /// Advance the simulation by `dt` seconds.
    pub fn update(&mut self, dt: f32) -> Result<StepReport> {
        let uploads = self.profiler.time_phase("uploads", || {
            flush_uploads(&self.device, &self.particles, &self.links, &mut self.uploads)
        });

        let mut dispatched = 0;
        if self.count > 0 {
            if self.links.count() > 0 || self.links.pending() > 0 {
                self.profiler
                    .time_phase("links", || self.links.build(&self.device));
            }

            self.profiler.time_phase("grid", || {
                self.grid
                    .build(&self.device, &self.particles.positions, &self.particles.active)
            });

            let params = StepParams {
                dt,
                gravity: self.settings.gravity,
                iterations: self.settings.iterations,
                radius: self.settings.radius,
                bounds: self.settings.bounds,
                boundary: self.settings.boundary,
                link_margin: self.settings.link_range_margin,
            };
            dispatched = (self.ids.high_water() as usize).min(self.capacity);

            self.profiler.time_phase("physics", || {
                let links = (self.links.count() > 0).then_some(&self.links);
                physics::step(
                    &self.device,
                    &self.particles,
                    &self.grid,
                    links,
                    params,
                    dispatched,
                );
            });
        }

        self.clock.advance(dt);
        let report = StepReport {
            frame: self.clock.frame_count(),
            uploads,
            particles: self.count,
            links: self.links.count(),
            dispatched,
        };
        tracing::debug!(
            frame = report.frame,
            uploads = report.uploads,
            particles = report.particles,
            links = report.links,
            dispatched = report.dispatched,
            "frame complete"
        );
        Ok(report)
    }

    pub fn set_gravity(&mut self, gravity: Vec2) {
        self.settings.gravity = gravity;
    }

    pub fn set_iterations(&mut self, iterations: u32) -> Result<()> {
        config::validate_iterations(iterations)?;
        self.settings.iterations = iterations;
        Ok(())
    }

    pub fn set_boundary(&mut self, boundary: BoundaryShape) {
        self.settings.boundary = boundary;
    }

    pub fn set_radius(&mut self, radius: f32) -> Result<()> {
        config::validate_radius(radius)?;
        config::validate_bounds(self.settings.bounds, radius)?;
        self.settings.radius = radius;
        self.rebuild_grid();
        Ok(())
    }

    pub fn set_bounds(&mut self, bounds: Vec2) -> Result<()> {
        config::validate_bounds(bounds, self.settings.radius)?;
        self.settings.bounds = bounds;
        self.rebuild_grid();
        Ok(())
    }

    /// Raise the particle ceiling. Link capacity follows.
    pub fn set_max_particles(&mut self, max_particles: usize) -> Result<()> {
        let current = self.settings.max_particles;
        if max_particles < current {
            return Err(SimError::ShrinkUnsupported {
                what: "max particles",
                current,
                requested: max_particles,
            });
        }
        if max_particles == current {
            return Ok(());
        }

        let mut candidate = self.settings.clone();
        candidate.max_particles = max_particles;
        candidate.validate()?;

        self.links
            .resize(max_particles * LINKS_PER_PARTICLE, max_particles)?;
        self.settings.max_particles = max_particles;
        self.rebuild_grid();
        tracing::info!(from = current, to = max_particles, "max particles raised");
        Ok(())
    }

    /// Grow the particle buffers, ID pool and grid to `capacity` slots.
    pub fn set_capacity(&mut self, capacity: usize) -> Result<()> {
        let max = self.settings.max_particles;
        if capacity > max {
            return Err(config::invalid(
                "capacity",
                format!("{capacity} exceeds max particles {max}"),
            ));
        }
        if capacity < self.capacity {
            return Err(SimError::ShrinkUnsupported {
                what: "capacity",
                current: self.capacity,
                requested: capacity,
            });
        }
        if capacity == self.capacity {
            return Ok(());
        }

        self.ids.resize(capacity as u32)?;
        self.particles = self.particles.resized(capacity);
        self.live.resize(capacity, false);
        tracing::info!(from = self.capacity, to = capacity, "particle capacity grown");
        self.capacity = capacity;
        self.rebuild_grid();
        Ok(())
    }

    fn rebuild_grid(&mut self) {
        self.grid = SpatialGrid::new(
            self.settings.bounds,
            self.settings.radius * CELL_SIZE_RADII,
            self.capacity,
        );
    }

    /// Live particles, counting ones still queued for upload.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_particles(&self) -> usize {
        self.settings.max_particles
    }

    pub fn radius(&self) -> f32 {
        self.settings.radius
    }

    pub fn bounds(&self) -> Vec2 {
        self.settings.bounds
    }

    pub fn gravity(&self) -> Vec2 {
        self.settings.gravity
    }

    pub fn iterations(&self) -> u32 {
        self.settings.iterations
    }

    pub fn boundary(&self) -> BoundaryShape {
        self.settings.boundary
    }

    pub fn settings(&self) -> &SimulationSettings {
        &self.settings
    }

    pub fn link_count(&self) -> usize {
        self.links.count()
    }

    pub fn pending_uploads(&self) -> usize {
        self.uploads.len()
    }

    /// Position as of the last update, for any slot below capacity.
    pub fn position(&self, id: ParticleId) -> Option<Vec2> {
        let slot = id.0 as usize;
        (slot < self.capacity).then(|| self.particles.positions.get(slot))
    }

    pub fn is_active(&self, id: ParticleId) -> bool {
        self.particles.active.test(id.0 as usize)
    }

    pub fn links(&self) -> &LinkGraph {
        &self.links
    }

    pub fn grid(&self) -> &SpatialGrid {
        &self.grid
    }

    pub fn clock(&self) -> &SimulationClock {
        &self.clock
    }

    pub fn profiler(&self) -> &PhaseProfiler {
        &self.profiler
    }

    pub fn device(&self) -> &ComputeDevice {
        &self.device
    }

    pub fn view(&self) -> RenderView<'_> {
        RenderView {
            particles: &self.particles,
            links: &self.links,
            count: self.count,
            radius: self.settings.radius,
            bounds: self.settings.bounds,
            boundary: self.settings.boundary,
        }
    }
}

/// Apply queued records in order. Records are split into batches with
/// distinct IDs so no two workers of one dispatch touch the same slot.
fn flush_uploads(
    device: &ComputeDevice,
    particles: &ParticleBuffers,
    links: &LinkGraph,
    uploads: &mut Vec<ParticleUpload>,
) -> usize {
    if uploads.is_empty() {
        return 0;
    }

    let mut records = std::mem::take(uploads);
    let run = |batch: &[ParticleUpload]| {
        device.dispatch(
            batch.len(),
            &UploadKernel {
                particles,
                links,
                records: batch,
            },
        );
        device.barrier(particles.active.words());
    };

    let mut seen = HashSet::with_capacity(records.len());
    let mut start = 0;
    for (i, record) in records.iter().enumerate() {
        if !seen.insert(record.id()) {
            run(&records[start..i]);
            seen.clear();
            seen.insert(record.id());
            start = i;
        }
    }
    run(&records[start..]);

    let applied = records.len();
    tracing::trace!(applied, "particle uploads flushed");
    records.clear();
    *uploads = records;
    applied
}

/// Store handle shared between a host thread and a simulation thread.
#[derive(Clone)]
pub struct SharedParticleStore {
    inner: Arc<Mutex<ParticleStore>>,
}

impl SharedParticleStore {
    pub fn new(store: ParticleStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    /// Run a frame unless the store is busy. Returns `None` without waiting
    /// when another update or a reallocation holds it.
    pub fn try_update(&self, dt: f32) -> Option<Result<StepReport>> {
        let mut store = match self.inner.try_lock() {
            Ok(store) => store,
            Err(TryLockError::WouldBlock) => {
                tracing::trace!("store busy, frame skipped");
                return None;
            }
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        Some(store.update(dt))
    }

    /// Run `f` with exclusive access, waiting for any update in flight.
    pub fn with<R>(&self, f: impl FnOnce(&mut ParticleStore) -> R) -> R {
        let mut store = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceSettings;

    const DT: f32 = 1.0 / 60.0;

    fn settings(max_particles: usize) -> SimulationSettings {
        SimulationSettings {
            max_particles,
            bounds: Vec2::splat(100.0),
            device: DeviceSettings {
                threads: 2,
                group_size: 64,
            },
            ..SimulationSettings::default()
        }
    }

    fn store(settings: SimulationSettings) -> ParticleStore {
        ParticleStore::new(settings).unwrap()
    }

    fn add(store: &mut ParticleStore, position: Vec2) -> ParticleId {
        store
            .add_particle(position, Vec2::ZERO, Rgba::WHITE)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn initial_capacity_depends_on_preallocation() {
        assert_eq!(store(settings(64)).capacity(), 10);
        assert_eq!(store(settings(4)).capacity(), 4);

        let mut preallocated = settings(64);
        preallocated.preallocate = true;
        assert_eq!(store(preallocated).capacity(), 64);
    }

    #[test]
    fn particles_appear_after_update() {
        let mut store = store(settings(16));
        let id = add(&mut store, Vec2::new(50.0, 40.0));

        assert_eq!(store.count(), 1);
        assert!(!store.is_active(id));

        let report = store.update(DT).unwrap();
        assert_eq!(report.uploads, 1);
        assert_eq!(report.particles, 1);
        assert!(report.dispatched >= 1);
        assert!(store.is_active(id));
        assert_eq!(store.position(id), Some(Vec2::new(50.0, 40.0)));
        assert_eq!(store.clock().frame_count(), 1);
    }

    #[test]
    fn initial_velocity_carries_through() {
        let mut store = store(settings(16));
        let id = store
            .add_particle(Vec2::new(50.0, 50.0), Vec2::new(0.1, 0.0), Rgba::WHITE)
            .unwrap()
            .unwrap();

        store.update(DT).unwrap();
        let pos = store.position(id).unwrap();
        assert!(pos.x > 50.05, "{pos}");
        assert_eq!(pos.y, 50.0);
    }

    #[test]
    fn full_upload_queue_applies_backpressure() {
        let mut s = settings(64);
        s.upload_queue_len = 3;
        let mut store = store(s);

        for i in 0..3 {
            add(&mut store, Vec2::new(10.0 + i as f32 * 2.0, 10.0));
        }
        let rejected = store
            .add_particle(Vec2::new(30.0, 10.0), Vec2::ZERO, Rgba::WHITE)
            .unwrap();
        assert_eq!(rejected, None);
        assert_eq!(store.count(), 3);

        store.update(DT).unwrap();
        assert_eq!(store.pending_uploads(), 0);
        assert!(store
            .add_particle(Vec2::new(30.0, 10.0), Vec2::ZERO, Rgba::WHITE)
            .unwrap()
            .is_some());
    }

    #[test]
    fn capacity_grows_by_half_plus_headroom() {
        let headroom = 10;
        let max = 1000;
        let mut s = settings(max);
        s.upload_queue_len = headroom;
        let mut store = store(s);

        let mut expected = 10usize;
        for n in 0..400usize {
            if store.pending_uploads() >= headroom {
                store.update(DT).unwrap();
            }

            let count = store.count();
            if count + headroom >= expected && expected < max {
                expected = (((count as f32) * 1.5) as usize + headroom).min(max);
            }

            let position = Vec2::new(2.0 + (n % 45) as f32 * 2.0, 2.0 + (n / 45) as f32 * 2.0);
            add(&mut store, position);
            assert_eq!(store.capacity(), expected, "after {} particles", n + 1);
        }
        assert!(store.capacity() > 400);
        assert_eq!(store.count(), 400);
    }

    #[test]
    fn removal_from_empty_store_changes_nothing() {
        let mut store = store(settings(16));
        assert!(matches!(
            store.remove_particle(ParticleId(0)),
            Err(SimError::EmptyStoreRemoval)
        ));
        assert_eq!(store.count(), 0);
        assert_eq!(store.pending_uploads(), 0);

        add(&mut store, Vec2::splat(20.0));
        assert!(matches!(
            store.remove_particle(ParticleId(50)),
            Err(SimError::InvalidReference { id: 50, limit: 16 })
        ));
        assert_eq!(store.count(), 1);
        assert_eq!(store.pending_uploads(), 1);
    }

    #[test]
    fn removed_particle_deactivates_and_breaks_links() {
        let mut store = store(settings(16));
        let a = add(&mut store, Vec2::new(20.0, 20.0));
        let b = add(&mut store, Vec2::new(23.0, 20.0));
        let c = add(&mut store, Vec2::new(26.0, 20.0));
        let ab = store.add_link(a, b, 2.0).unwrap();
        let bc = store.add_link(b, c, 2.0).unwrap();
        store.update(DT).unwrap();
        assert!(store.links().is_active(ab));
        assert!(store.links().is_active(bc));

        store.remove_particle(b).unwrap();
        store.update(DT).unwrap();

        assert!(!store.is_active(b));
        assert!(store.is_active(a) && store.is_active(c));
        assert!(!store.links().is_active(ab));
        assert!(!store.links().is_active(bc));
        assert_eq!(store.count(), 2);

        // The freed slot is handed out first.
        assert_eq!(add(&mut store, Vec2::new(40.0, 40.0)), b);
    }

    #[test]
    fn add_and_remove_in_one_frame_leave_slot_inactive() {
        let mut store = store(settings(16));
        let id = add(&mut store, Vec2::new(20.0, 20.0));
        store.remove_particle(id).unwrap();
        store.update(DT).unwrap();
        assert!(!store.is_active(id));
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn link_rest_length_adds_a_diameter() {
        let mut store = store(settings(16));
        let a = add(&mut store, Vec2::new(20.0, 20.0));
        let b = add(&mut store, Vec2::new(22.0, 20.0));
        let link = store.add_link(a, b, 1.0).unwrap();
        assert_eq!(store.links().rest_length(link), Some(2.0));
        assert_eq!(store.links().strain(link), Some(0));
        assert_eq!(store.link_count(), 1);

        assert!(matches!(
            store.add_link(a, ParticleId(16), 1.0),
            Err(SimError::InvalidReference { id: 16, limit: 16 })
        ));
        assert!(store.add_link(a, ParticleId(5), 1.0).is_err());
        assert_eq!(store.link_count(), 1);

        store.update(DT).unwrap();
        assert_eq!(store.links().rest_length(link), Some(2.0));
        assert_eq!(store.links().endpoints(link), Some((a.index(), b.index())));
    }

    #[test]
    fn link_queued_with_a_removed_particle_never_activates() {
        let mut store = store(settings(16));
        let a = add(&mut store, Vec2::new(20.0, 20.0));
        let b = add(&mut store, Vec2::new(24.0, 20.0));
        let link = store.add_link(a, b, 2.0).unwrap();
        store.remove_particle(b).unwrap();
        store.update(DT).unwrap();

        assert!(!store.is_active(b));
        assert!(!store.links().is_active(link));

        // The reused slot must not pick up the stale link.
        let reborn = add(&mut store, Vec2::new(60.0, 60.0));
        assert_eq!(reborn, b);
        for _ in 0..10 {
            store.update(DT).unwrap();
        }
        assert!(store.is_active(reborn));
        assert!(!store.links().is_active(link));
        assert_eq!(store.links().range_of(b.index() as usize).len(), 0);
        let pa = store.position(a).unwrap();
        let pb = store.position(reborn).unwrap();
        assert!(pa.distance(pb) > 30.0, "{pa} {pb}");
    }

    #[test]
    fn double_removal_is_rejected() {
        let mut store = store(settings(16));
        let a = add(&mut store, Vec2::new(20.0, 20.0));
        let b = add(&mut store, Vec2::new(30.0, 20.0));
        let link = store.add_link(a, b, 2.0).unwrap();
        store.update(DT).unwrap();

        store.remove_particle(a).unwrap();
        assert!(matches!(
            store.remove_particle(a),
            Err(SimError::InvalidReference { .. })
        ));
        assert_eq!(store.count(), 1);

        store.remove_link(link).unwrap();
        assert!(store.remove_link(link).is_err());
        assert_eq!(store.link_count(), 0);

        // Each freed ID comes back once.
        let c = add(&mut store, Vec2::new(40.0, 40.0));
        let d = add(&mut store, Vec2::new(50.0, 40.0));
        assert_eq!(c, a);
        assert_ne!(c, d);
        assert_eq!(store.count(), 3);
    }

    #[test]
    fn stretched_link_pulls_particles_to_rest_length() {
        let mut store = store(settings(16));
        let a = add(&mut store, Vec2::new(50.0, 50.0));
        let b = add(&mut store, Vec2::new(54.0, 50.0));
        let link = store.add_link(a, b, 1.0).unwrap();

        for _ in 0..30 {
            store.update(DT).unwrap();
        }

        let distance = store.position(a).unwrap().distance(store.position(b).unwrap());
        assert!((distance - 2.0).abs() < 0.5, "distance {distance}");
        assert!(store.links().is_active(link));
        assert!(store.links().strain(link).unwrap() > 0);
    }

    #[test]
    fn half_unit_overlap_separates_symmetrically_in_one_update() {
        let mut s = settings(16);
        s.radius = 1.0;
        s.bounds = Vec2::splat(200.0);
        s.gravity = Vec2::ZERO;
        let mut store = store(s);
        let a = add(&mut store, Vec2::new(100.0, 100.0));
        let b = add(&mut store, Vec2::new(100.5, 100.0));

        store.update(DT).unwrap();
        let pa = store.position(a).unwrap();
        let pb = store.position(b).unwrap();
        assert!(pa.distance(pb) > 1.75, "{pa} {pb}");
        assert!(pa.x < 100.0 && pb.x > 100.5, "{pa} {pb}");
        let midpoint = (pa.x + pb.x) * 0.5;
        assert!((midpoint - 100.25).abs() < 1e-3, "midpoint {midpoint}");
        assert_eq!(pa.y, pb.y);
    }

    #[test]
    fn overlapping_particles_separate_along_their_axis() {
        let mut s = settings(16);
        s.radius = 1.0;
        s.bounds = Vec2::splat(200.0);
        let mut store = store(s);
        let a = add(&mut store, Vec2::new(100.0, 100.0));
        let b = add(&mut store, Vec2::new(101.0, 100.0));

        store.update(DT).unwrap();
        let pa = store.position(a).unwrap();
        let pb = store.position(b).unwrap();
        assert!(pa.distance(pb) > 1.5, "{pa} {pb}");
        assert!(pa.x < 100.0 && pb.x > 101.0);
        assert_eq!(pa.y, pb.y);

        for _ in 0..30 {
            store.update(DT).unwrap();
        }
        let pa = store.position(a).unwrap();
        let pb = store.position(b).unwrap();
        assert!(pa.distance(pb) >= 1.95, "{pa} {pb}");
        assert_eq!(pa.y, 100.0);
        assert_eq!(pb.y, 100.0);
    }

    fn assert_contained(store: &ParticleStore, tolerance: f32) {
        let view = store.view();
        let r = store.radius();
        let bounds = store.bounds();
        for instance in view.instances() {
            let p = Vec2::from_array(instance.position);
            match store.boundary() {
                BoundaryShape::Rectangle => {
                    assert!(p.cmpge(Vec2::splat(r - tolerance)).all(), "{p}");
                    assert!(p.cmple(bounds - r + tolerance).all(), "{p}");
                }
                BoundaryShape::Circle => {
                    let limit = bounds.min_element() * 0.5 - r;
                    assert!(p.distance(bounds * 0.5) <= limit + tolerance, "{p}");
                }
            }
        }
    }

    fn spawn_crowd(store: &mut ParticleStore, n: usize) {
        for i in 0..n {
            let position = Vec2::new(6.0 + (i % 10) as f32, 6.0 + (i / 10) as f32);
            let velocity = Vec2::new(((i * 7) % 5) as f32 - 2.0, ((i * 3) % 5) as f32 - 2.0) * 0.3;
            store
                .add_particle(position, velocity, Rgba::WHITE)
                .unwrap()
                .unwrap();
        }
    }

    #[test]
    fn particles_stay_inside_rectangle() {
        let mut s = settings(200);
        s.bounds = Vec2::splat(20.0);
        s.gravity = Vec2::new(0.0, 30.0);
        s.preallocate = true;
        let mut store = store(s);
        spawn_crowd(&mut store, 80);

        for _ in 0..60 {
            store.update(DT).unwrap();
            assert_contained(&store, 1e-4);
        }
    }

    #[test]
    fn particles_stay_inside_circle() {
        let mut s = settings(200);
        s.bounds = Vec2::splat(20.0);
        s.gravity = Vec2::new(0.0, 30.0);
        s.boundary = BoundaryShape::Circle;
        s.preallocate = true;
        let mut store = store(s);
        spawn_crowd(&mut store, 60);

        for _ in 0..60 {
            store.update(DT).unwrap();
            assert_contained(&store, 1e-3);
        }
    }

    #[test]
    fn setters_reject_shrinking_and_bad_values() {
        let mut store = store(settings(64));
        assert!(matches!(
            store.set_capacity(5),
            Err(SimError::ShrinkUnsupported { what: "capacity", .. })
        ));
        assert!(matches!(
            store.set_capacity(65),
            Err(SimError::InvalidSetting { name: "capacity", .. })
        ));
        assert!(matches!(
            store.set_max_particles(32),
            Err(SimError::ShrinkUnsupported { .. })
        ));
        assert!(store.set_radius(0.0).is_err());
        assert!(store.set_iterations(0).is_err());
        assert!(store.set_bounds(Vec2::new(0.5, 100.0)).is_err());

        assert_eq!(store.capacity(), 10);
        assert_eq!(store.radius(), 0.5);
        assert_eq!(store.iterations(), 2);
    }

    #[test]
    fn growth_keeps_existing_particles() {
        let mut s = settings(64);
        s.upload_queue_len = 4;
        let mut store = store(s);
        let id = add(&mut store, Vec2::new(30.0, 30.0));
        store.update(DT).unwrap();

        store.set_capacity(40).unwrap();
        store.set_max_particles(128).unwrap();
        store.set_radius(1.0).unwrap();
        assert_eq!(store.capacity(), 40);
        assert_eq!(store.links().max_links(), 128 * LINKS_PER_PARTICLE);
        assert_eq!(store.grid().cell_size(), 3.0);
        assert!(store.is_active(id));

        store.update(DT).unwrap();
        assert_eq!(store.position(id), Some(Vec2::new(30.0, 30.0)));
    }

    #[test]
    fn busy_store_skips_the_frame() {
        let shared = SharedParticleStore::new(store(settings(16)));
        let other = shared.clone();

        shared.with(|store| {
            add(store, Vec2::splat(10.0));
            assert!(other.try_update(DT).is_none());
        });

        let report = other.try_update(DT).unwrap().unwrap();
        assert_eq!(report.frame, 1);
        assert_eq!(report.particles, 1);
    }
}
