//! Tether Runtime
//!
//! Headless host: loads settings, drives the particle store with a
//! scripted spawner and logs solver statistics.

mod rng;
mod settings;
mod spawner;

use std::path::PathBuf;

use anyhow::Result;
use tether_core::ParticleStore;
use tether_metrics::FrameTimer;
use tracing_subscriber::EnvFilter;

use settings::RuntimeSettings;
use spawner::Spawner;

fn main() -> Result<()> {
    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let settings = RuntimeSettings::load(path.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Tether v{}", tether_core::VERSION);
    match &path {
        Some(path) => tracing::info!(path = %path.display(), "settings loaded"),
        None => tracing::info!("using default settings"),
    }

    let mut store = ParticleStore::new(settings.simulation.clone())?;
    let mut spawner = Spawner::new(settings.spawn.clone(), settings.seed);
    let mut timer = FrameTimer::new(120);

    for frame in 0..settings.frames {
        timer.begin();
        spawner.spawn(&mut store, frame)?;
        let report = store.update(settings.dt)?;
        timer.end();

        if settings.report_every > 0 && report.frame % settings.report_every == 0 {
            let (min_ms, max_ms) = timer.frame_time_range_ms();
            tracing::info!(
                frame = report.frame,
                particles = report.particles,
                capacity = store.capacity(),
                links = report.links,
                active_links = store.links().active_count(),
                fps = format_args!("{:.1}", timer.fps()),
                frame_ms = format_args!("{:.2}", timer.frame_time_ms()),
                min_ms = format_args!("{min_ms:.2}"),
                max_ms = format_args!("{max_ms:.2}"),
                "solver stats"
            );
            for (phase, average) in store.profiler().phases() {
                tracing::debug!(phase, average_us = average.as_micros() as u64, "phase timing");
            }
        }
    }

    tracing::info!(
        frames = store.clock().frame_count(),
        timed_frames = timer.frames(),
        simulated_secs = store.clock().elapsed().as_secs_f32(),
        spawned = spawner.spawned(),
        cut_short = spawner.rejected(),
        particles = store.count(),
        "run complete"
    );

    Ok(())
}
