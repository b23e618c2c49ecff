//! Read-only snapshots for a renderer.

use glam::Vec2;

use crate::color::Rgba;
use crate::config::BoundaryShape;
use crate::links::LinkGraph;
use crate::particles::ParticleBuffers;

/// Segments used to approximate a circular boundary outline.
const CIRCLE_SEGMENTS: usize = 64;

/// One particle as uploaded to a GPU vertex buffer.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ParticleInstance {
    pub position: [f32; 2],
    /// Packed RGBA8, red in the low byte.
    pub color: u32,
    pub radius: f32,
}

/// Borrowed view of the store between updates.
pub struct RenderView<'a> {
    pub(crate) particles: &'a ParticleBuffers,
    pub(crate) links: &'a LinkGraph,
    pub(crate) count: usize,
    pub(crate) radius: f32,
    pub(crate) bounds: Vec2,
    pub(crate) boundary: BoundaryShape,
}

impl RenderView<'_> {
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn capacity(&self) -> usize {
        self.particles.capacity()
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn bounds(&self) -> Vec2 {
        self.bounds
    }

    /// Positions of every slot, active or not.
    pub fn positions(&self) -> Vec<Vec2> {
        self.particles.positions.to_vec()
    }

    pub fn colors(&self) -> Vec<Rgba> {
        self.particles
            .colors
            .to_vec()
            .into_iter()
            .map(Rgba::from_packed)
            .collect()
    }

    pub fn active(&self) -> Vec<bool> {
        (0..self.capacity())
            .map(|slot| self.particles.active.test(slot))
            .collect()
    }

    /// Active particles only, in slot order.
    pub fn instances(&self) -> Vec<ParticleInstance> {
        let particles = self.particles;
        (0..self.capacity())
            .filter(|&slot| particles.active.test(slot))
            .map(|slot| ParticleInstance {
                position: particles.positions.get(slot).to_array(),
                color: particles.colors.get(slot),
                radius: self.radius,
            })
            .collect()
    }

    pub fn link_segments(&self) -> Vec<[Vec2; 2]> {
        self.links.active_segments(&self.particles.positions)
    }

    /// Closed outline of the container as line segments.
    pub fn bounds_outline(&self) -> Vec<[Vec2; 2]> {
        let b = self.bounds;
        match self.boundary {
            BoundaryShape::Rectangle => {
                let corners = [Vec2::ZERO, Vec2::new(b.x, 0.0), b, Vec2::new(0.0, b.y)];
                (0..4).map(|i| [corners[i], corners[(i + 1) % 4]]).collect()
            }
            BoundaryShape::Circle => {
                let center = b * 0.5;
                let r = b.min_element() * 0.5;
                let point = |i: usize| {
                    let angle = i as f32 / CIRCLE_SEGMENTS as f32 * std::f32::consts::TAU;
                    center + Vec2::from_angle(angle) * r
                };
                (0..CIRCLE_SEGMENTS)
                    .map(|i| [point(i), point((i + 1) % CIRCLE_SEGMENTS)])
                    .collect()
            }
        }
    }
}
