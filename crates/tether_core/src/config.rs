//! Solver settings

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

/// Shape of the container particles are kept in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryShape {
    /// Axis-aligned box `[0, bounds]`.
    #[default]
    Rectangle,
    /// Circle inscribed in the bounds box.
    Circle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Hard ceiling on particle slots.
    pub max_particles: usize,
    pub radius: f32,
    pub bounds: Vec2,
    /// Allocate `max_particles` slots up front instead of growing.
    pub preallocate: bool,
    pub gravity: Vec2,
    /// Physics sub-steps per frame.
    pub iterations: u32,
    /// Pending create/destroy records per frame; doubles as growth headroom.
    pub upload_queue_len: usize,
    pub boundary: BoundaryShape,
    /// Extra adjacency entries solved on each side of a particle's link range.
    pub link_range_margin: usize,
    pub reuse_particle_ids: bool,
    pub reuse_link_ids: bool,
    pub device: DeviceSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Worker threads; 0 lets rayon pick.
    pub threads: usize,
    pub group_size: usize,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            max_particles: 1_000_000,
            radius: 0.5,
            bounds: Vec2::new(1000.0, 1000.0),
            preallocate: false,
            gravity: Vec2::ZERO,
            iterations: 2,
            upload_queue_len: 15_000,
            boundary: BoundaryShape::Rectangle,
            link_range_margin: 1,
            reuse_particle_ids: true,
            reuse_link_ids: true,
            device: DeviceSettings::default(),
        }
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            threads: 0,
            group_size: 1024,
        }
    }
}

impl SimulationSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_particles == 0 || self.max_particles > u32::MAX as usize / 6 {
            return Err(invalid("max_particles", format!("{} is out of range", self.max_particles)));
        }
        validate_radius(self.radius)?;
        validate_bounds(self.bounds, self.radius)?;
        validate_iterations(self.iterations)?;
        if self.upload_queue_len == 0 {
            return Err(invalid("upload_queue_len", "must hold at least one record".into()));
        }
        Ok(())
    }
}

pub(crate) fn invalid(name: &'static str, reason: String) -> SimError {
    SimError::InvalidSetting { name, reason }
}

pub(crate) fn validate_radius(radius: f32) -> Result<()> {
    if !(radius.is_finite() && radius > 0.0) {
        return Err(invalid("radius", format!("{radius} must be positive")));
    }
    Ok(())
}

pub(crate) fn validate_bounds(bounds: Vec2, radius: f32) -> Result<()> {
    if !bounds.is_finite() || bounds.min_element() < radius * 2.0 {
        return Err(invalid("bounds", format!("{bounds} must fit one particle")));
    }
    if bounds.max_element() > crate::fixed::FIXED_LIMIT {
        return Err(invalid("bounds", format!("{bounds} exceeds the fixed-point range")));
    }
    Ok(())
}

pub(crate) fn validate_iterations(iterations: u32) -> Result<()> {
    if iterations == 0 {
        return Err(invalid("iterations", "at least one sub-step is required".into()));
    }
    Ok(())
}
