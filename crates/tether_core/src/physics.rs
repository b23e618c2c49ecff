//! Per-particle physics kernel.
//!
//! A frame is `iterations` sub-steps. Each sub-step is three dispatches with
//! a barrier after each: collision, then boundary and integration, then
//! link solving. All position changes are integer atomic adds on the
//! fixed-point mirror; the float positions are refreshed from it by
//! [`ContainKernel`] once the last sub-step finishes.
//!
//! Workers inside one group run in id order, so within a stage a later
//! particle sees corrections already applied by an earlier one. Every
//! correction moves both parties of a pair, which keeps an isolated pair
//! symmetric whichever side solves first. Across a busy crowd the result
//! still depends on scheduling.
//!
//! Collision pushes are not damped separately. Whatever a sub-step moves a
//! particle becomes Verlet velocity, so a deep overlap separates to about
//! contact distance within one frame and then keeps drifting apart, slowed
//! only by the `-2v` drag.

use glam::Vec2;

use crate::compute::{ComputeDevice, Kernel};
use crate::config::BoundaryShape;
use crate::fixed::{vec_from_fixed, vec_to_fixed};
use crate::grid::SpatialGrid;
use crate::links::{LinkGraph, STRAIN_THRESHOLD};
use crate::particles::ParticleBuffers;

/// Squared distances at or below this are treated as coincident.
const EPSILON: f32 = 1e-7;

/// Per-frame constants shared by every worker.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StepParams {
    pub dt: f32,
    pub gravity: Vec2,
    pub iterations: u32,
    pub radius: f32,
    pub bounds: Vec2,
    pub boundary: BoundaryShape,
    pub link_margin: usize,
}

/// Pressure response curve. Maps a particle's share of the combined inertia
/// of a colliding pair to how far it gets pushed.
///
/// `f(0) = -1`, `f(0.5) = 0.5`, `f(1) = 2`.
#[inline]
pub fn mass_scaling(x: f32) -> f32 {
    let x2 = x * x;
    let x3 = x2 * x;
    let x4 = x3 * x;
    let x5 = x4 * x;
    ((-24.0 * x5 + 60.0 * x4 - 50.0 * x3 + 15.0 * x2) - 0.5) * 3.0 + 0.5
}

#[inline]
fn inertia(travel: f32, velocity: Vec2) -> f32 {
    1.0 + travel / (velocity.length() + 1.0)
}

/// One dispatch of a sub-step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Collide,
    Move,
    Links,
}

impl Stage {
    const ORDER: [Stage; 3] = [Stage::Collide, Stage::Move, Stage::Links];
}

pub(crate) struct PhysicsKernel<'a> {
    pub particles: &'a ParticleBuffers,
    pub grid: &'a SpatialGrid,
    pub links: Option<&'a LinkGraph>,
    pub params: StepParams,
    pub stage: Stage,
}

impl Kernel for PhysicsKernel<'_> {
    fn execute(&self, id: usize) {
        if !self.particles.active.test(id) {
            return;
        }

        match self.stage {
            Stage::Collide => self.collide(id),
            Stage::Move => {
                self.apply_boundary(id);
                self.integrate(id, self.params.dt / self.params.iterations as f32);
            }
            Stage::Links => {
                if let Some(links) = self.links {
                    self.solve_links(links, id);
                }
            }
        }
    }
}

/// Run every sub-step over the first `len` slots, then contain and refresh
/// the float positions.
pub(crate) fn step(
    device: &ComputeDevice,
    particles: &ParticleBuffers,
    grid: &SpatialGrid,
    links: Option<&LinkGraph>,
    params: StepParams,
    len: usize,
) {
    let mut kernel = PhysicsKernel {
        particles,
        grid,
        links,
        params,
        stage: Stage::Collide,
    };
    for _ in 0..params.iterations {
        for stage in Stage::ORDER {
            if stage == Stage::Links && links.is_none() {
                continue;
            }
            kernel.stage = stage;
            device.dispatch(len, &kernel);
            device.barrier(&particles.fixed);
        }
    }

    device.dispatch(len, &ContainKernel { particles, params });
    device.barrier(&particles.positions);
}

impl PhysicsKernel<'_> {
    #[inline]
    fn position(&self, id: usize) -> Vec2 {
        vec_from_fixed(self.particles.fixed.get(id))
    }

    /// Atomic move that also counts toward the particle's travel distance.
    #[inline]
    fn nudge(&self, id: usize, offset: Vec2) {
        self.particles.fixed.atomic_add(id, vec_to_fixed(offset));
        self.particles
            .travel
            .atomic_add(id, offset.x.abs() + offset.y.abs());
    }

    fn collide(&self, id: usize) {
        let cell = self.grid.cell_index(self.position(id));
        for neighbor in self.grid.neighbors(cell) {
            for idx in self.grid.cell_range(neighbor) {
                let other = self.grid.occupant(idx) as usize;
                self.solve_collision(id, other);
            }
        }
    }

    fn solve_collision(&self, id: usize, other: usize) {
        let particles = self.particles;
        let pos = self.position(id);
        let other_pos = self.position(other);

        let diff = pos - other_pos;
        let dist_sq = diff.length_squared();
        let diameter = self.params.radius * 2.0;
        if dist_sq >= diameter * diameter || dist_sq <= EPSILON {
            return;
        }

        let inertia_self = inertia(
            particles.travel.get(id),
            pos - particles.last_positions.get(id),
        );
        let inertia_other = inertia(
            particles.travel.get(other),
            other_pos - particles.last_positions.get(other),
        );
        let total = inertia_self + inertia_other;
        let factor_self = mass_scaling(inertia_self / total);
        let factor_other = mass_scaling(inertia_other / total);

        let dist = dist_sq.sqrt();
        let delta =
            diff / dist * (diameter - dist) * 0.25 / self.params.iterations as f32;

        self.nudge(id, delta * factor_other);
        self.nudge(other, -delta * factor_self);
    }

    fn apply_boundary(&self, id: usize) {
        let pos = self.position(id);
        let radius = self.params.radius;

        match self.params.boundary {
            BoundaryShape::Rectangle => {
                let max = self.params.bounds;
                let mut offset = Vec2::ZERO;
                if pos.x - radius < 0.0 {
                    offset.x = radius - pos.x;
                } else if pos.x + radius > max.x {
                    offset.x = max.x - (pos.x + radius);
                }
                if pos.y + radius > max.y {
                    offset.y = max.y - (pos.y + radius);
                } else if pos.y - radius < 0.0 {
                    offset.y = radius - pos.y;
                }
                if offset != Vec2::ZERO {
                    self.nudge(id, offset);
                }
            }
            BoundaryShape::Circle => {
                let (center, limit) = circle(self.params.bounds, radius);
                let diff = pos - center;
                let dist = diff.length();
                if dist > limit {
                    self.nudge(id, -diff / dist * (dist - limit));
                }
            }
        }
    }

    fn integrate(&self, id: usize, dt: f32) {
        let particles = self.particles;
        let pos = self.position(id);
        let last = particles.last_positions.get(id);
        particles.last_positions.set(id, pos);

        let velocity = pos - last;
        let travel = particles.travel.get(id);
        let anti_pressure = inertia(travel, velocity).recip().powi(2);
        particles.travel.set(id, travel * 0.4);

        let acceleration = self.params.gravity - velocity * 2.0;
        let offset = velocity + acceleration * anti_pressure * (dt * dt);
        particles.fixed.atomic_add(id, vec_to_fixed(offset));
    }

    fn solve_links(&self, links: &LinkGraph, id: usize) {
        if id >= links.max_particles() {
            return;
        }
        let range = links.range_of(id);
        if range.is_empty() {
            return;
        }

        let margin = self.params.link_margin;
        let start = range.start.saturating_sub(margin);
        let end = (range.end + margin).min(links.adjacency_len());
        for idx in start..end {
            self.solve_link(links, links.link_at(idx) as usize);
        }
    }

    pub(crate) fn solve_link(&self, links: &LinkGraph, link: usize) {
        if !links.active.test(link) {
            return;
        }
        if links.strain.get(link) > STRAIN_THRESHOLD {
            links.active.clear(link);
            return;
        }

        let pair = links.pairs.get(link);
        let (a, b) = (pair.x as usize, pair.y as usize);
        let slots = self.particles.fixed.len();
        if a >= slots || b >= slots {
            return;
        }

        let diff = self.position(b) - self.position(a);
        let dist = diff.length();
        if dist < EPSILON {
            return;
        }

        let rest = links.rest_lengths.get(link);
        let delta = diff / dist * (dist - rest) * 0.5 / self.params.iterations as f32;
        self.nudge(a, delta);
        self.nudge(b, -delta);

        let stretch = (dist / rest - 1.0).abs().clamp(0.0, 1.0) * 100.0;
        let increment = (stretch * stretch - (100.0 - stretch)).max(0.0);
        links.strain.atomic_add(link, increment as i32);
    }
}

/// Center and usable radius of the circle inscribed in `bounds`.
#[inline]
fn circle(bounds: Vec2, radius: f32) -> (Vec2, f32) {
    (bounds * 0.5, (bounds.min_element() * 0.5 - radius).max(0.0))
}

/// Clamps each active particle into the domain on the fixed mirror and
/// writes the float position from it.
pub(crate) struct ContainKernel<'a> {
    pub particles: &'a ParticleBuffers,
    pub params: StepParams,
}

impl Kernel for ContainKernel<'_> {
    fn execute(&self, id: usize) {
        let particles = self.particles;
        if !particles.active.test(id) {
            return;
        }

        let pos = vec_from_fixed(particles.fixed.get(id));
        let radius = self.params.radius;
        let contained = match self.params.boundary {
            BoundaryShape::Rectangle => {
                pos.clamp(Vec2::splat(radius), self.params.bounds - radius)
            }
            BoundaryShape::Circle => {
                let (center, limit) = circle(self.params.bounds, radius);
                center + (pos - center).clamp_length_max(limit)
            }
        };

        let fixed = if contained == pos {
            particles.fixed.get(id)
        } else {
            let fixed = vec_to_fixed(contained);
            particles.fixed.set(id, fixed);
            fixed
        };
        particles.positions.set(id, vec_from_fixed(fixed));
    }
}
