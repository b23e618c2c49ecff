//! Scripted particle source for headless runs.
//!
//! Each frame scatters a burst of particles around a point and links every
//! new particle to a random one among the most recently spawned.

use std::collections::VecDeque;

use anyhow::Result;
use glam::Vec2;
use tether_core::{ParticleId, ParticleStore, Rgba};

use crate::rng::SpawnRng;
use crate::settings::SpawnSettings;

pub struct Spawner {
    settings: SpawnSettings,
    rng: SpawnRng,
    recent: VecDeque<ParticleId>,
    spawned: usize,
    rejected: usize,
}

impl Spawner {
    pub fn new(settings: SpawnSettings, seed: u64) -> Self {
        Self {
            recent: VecDeque::with_capacity(settings.link_window),
            settings,
            rng: SpawnRng::new(seed),
            spawned: 0,
            rejected: 0,
        }
    }

    /// Spawn this frame's burst. Stops early once the upload queue is full.
    pub fn spawn(&mut self, store: &mut ParticleStore, frame: u64) -> Result<usize> {
        if frame >= self.settings.frames {
            return Ok(0);
        }

        let color = Rgba::opaque(
            (self.rng.next_u32() & 0xFF) as u8,
            (self.rng.next_u32() & 0xFF) as u8,
            (self.rng.next_u32() & 0xFF) as u8,
        );

        let mut added = 0;
        for _ in 0..self.settings.per_frame {
            let jitter = Vec2::new(self.rng.next_signed(), self.rng.next_signed());
            let position = self.settings.center + jitter * self.settings.spread;

            let Some(id) = store.add_particle(position, Vec2::ZERO, color)? else {
                self.rejected += 1;
                break;
            };

            if self.settings.link_window > 0 && self.recent.len() >= self.settings.link_window {
                let partner = self.recent[self.rng.below(self.recent.len())];
                store.add_link(partner, id, self.settings.link_gap)?;
                self.recent.pop_front();
            }
            if self.settings.link_window > 0 {
                self.recent.push_back(id);
            }
            added += 1;
        }

        self.spawned += added;
        Ok(added)
    }

    pub fn spawned(&self) -> usize {
        self.spawned
    }

    /// Bursts cut short by backpressure.
    pub fn rejected(&self) -> usize {
        self.rejected
    }
}
