//! Runtime settings

use anyhow::{Context, Result};
use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tether_core::SimulationSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Default log filter; `RUST_LOG` overrides it.
    pub log_level: String,
    pub frames: u64,
    pub dt: f32,
    pub seed: u64,
    /// Log statistics every this many frames; 0 disables.
    pub report_every: u64,
    pub spawn: SpawnSettings,
    pub simulation: SimulationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnSettings {
    pub center: Vec2,
    /// Half-width of the square particles are scattered over.
    pub spread: f32,
    pub per_frame: usize,
    /// Frames during which particles are spawned.
    pub frames: u64,
    /// Each new particle links to one of this many most recent ones.
    pub link_window: usize,
    /// Surface gap for spawned links.
    pub link_gap: f32,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            frames: 600,
            dt: 1.0 / 60.0,
            seed: 0x7e7e_7e7e,
            report_every: 60,
            spawn: SpawnSettings::default(),
            simulation: SimulationSettings {
                max_particles: 200_000,
                gravity: Vec2::new(0.0, 2.0),
                ..SimulationSettings::default()
            },
        }
    }
}

impl Default for SpawnSettings {
    fn default() -> Self {
        Self {
            center: Vec2::new(500.0, 300.0),
            spread: 50.0,
            per_frame: 2_000,
            frames: 60,
            link_window: 20,
            link_gap: 0.0,
        }
    }
}

impl RuntimeSettings {
    /// Read settings from a JSON file, or use defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;
        let settings = serde_json::from_str(&text)
            .with_context(|| format!("invalid settings in {}", path.display()))?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_sections_take_partial_json() {
        let settings: RuntimeSettings = serde_json::from_str(
            r#"{ "frames": 10, "spawn": { "per_frame": 5 }, "simulation": { "iterations": 4 } }"#,
        )
        .unwrap();

        assert_eq!(settings.frames, 10);
        assert_eq!(settings.spawn.per_frame, 5);
        assert_eq!(settings.spawn.link_window, 20);
        assert_eq!(settings.simulation.iterations, 4);
        assert_eq!(settings.simulation.radius, 0.5);
    }

    #[test]
    fn missing_path_means_defaults() {
        let settings = RuntimeSettings::load(None).unwrap();
        assert_eq!(settings.log_level, "info");
        settings.simulation.validate().unwrap();
    }
}
