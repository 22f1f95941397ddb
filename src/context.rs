// Fluid Backdrop - GPU Fluid Simulation Backdrop
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use rand::rngs::StdRng;
use rand::Rng;

use crate::config::SimConfig;
use crate::input::InputTranslator;
use crate::surfaces::{FieldSet, SurfaceAllocator};

/// All mutable state of one backdrop session, threaded through every pass.
pub struct SimulationContext {
    pub config: SimConfig,
    pub screen: (u32, u32),
    pub allocator: SurfaceAllocator,
    pub fields: FieldSet,
    pub input: InputTranslator,
    /// Pending batches of ambient splats, one batch consumed per frame.
    pub splat_stack: Vec<u32>,
    pub rng: StdRng,
}

impl SimulationContext {
    pub fn queue_random_splats(&mut self, count: u32) {
        if count > 0 {
            self.splat_stack.push(count);
        }
    }

    /// Startup burst of 5 to 24 ambient splats.
    pub fn queue_startup_splats(&mut self) {
        let count = self.rng.gen_range(5..25);
        self.queue_random_splats(count);
    }

    pub fn screen_aspect(&self) -> f32 {
        self.screen.0.max(1) as f32 / self.screen.1.max(1) as f32
    }
}
