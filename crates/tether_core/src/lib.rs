//! Tether Core
//!
//! Data-parallel 2D particle solver:
//! - Compute service (atomic buffers, packed flags, kernel dispatch)
//! - Bitonic sort and offset tables
//! - Uniform spatial grid and link adjacency index
//! - Particle store and the position-based physics step

pub mod color;
pub mod compute;
pub mod config;
pub mod error;
pub mod fixed;
pub mod grid;
pub mod id_pool;
pub mod links;
pub mod particles;
pub mod physics;
pub mod sort;
pub mod time;
pub mod view;

pub use glam;

pub use color::Rgba;
pub use config::{BoundaryShape, DeviceSettings, SimulationSettings};
pub use error::{Result, SimError};
pub use links::LinkId;
pub use particles::{ParticleId, ParticleStore, SharedParticleStore, StepReport};
pub use view::{ParticleInstance, RenderView};

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
