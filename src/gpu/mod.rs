// Fluid Backdrop - GPU Fluid Simulation Backdrop
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

//! Backend seam between the solver and whatever executes its passes.
//!
//! Every simulation pass is a full-screen draw of one fragment stage into one
//! target, sampling up to three input surfaces. [`wgpu_device::WgpuDevice`]
//! runs them on the GPU; [`headless::HeadlessDevice`] evaluates them on the CPU
//! and records each draw.

pub mod headless;
pub mod wgpu_device;

use bytemuck::{Pod, Zeroable};

use crate::error::ProgramError;
use crate::programs::{Program, Stage};

/// Maximum number of sampled inputs a single pass may bind.
pub const MAX_INPUTS: usize = 3;

/// Scale `width`×`height` down, keeping its aspect ratio, until neither edge
/// exceeds `max`.
pub fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    let (width, height, max) = (width.max(1), height.max(1), max.max(1));
    let longest = width.max(height);
    if longest <= max {
        return (width, height);
    }
    let scale = max as f64 / longest as f64;
    let fit = |edge: u32| ((edge as f64 * scale).round() as u32).clamp(1, max);
    (fit(width), fit(height))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldFormat {
    /// Dye, bloom.
    Rgba16Float,
    /// Velocity.
    Rg16Float,
    /// Pressure, divergence, curl, sunrays.
    R16Float,
}

impl FieldFormat {
    pub fn channels(self) -> usize {
        match self {
            FieldFormat::Rgba16Float => 4,
            FieldFormat::Rg16Float => 2,
            FieldFormat::R16Float => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    Linear,
    Nearest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceDesc {
    pub width: u32,
    pub height: u32,
    pub format: FieldFormat,
    pub filter: Filter,
}

impl SurfaceDesc {
    pub fn texel_size(&self) -> [f32; 2] {
        [1.0 / self.width as f32, 1.0 / self.height as f32]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Surface(SurfaceId),
    Screen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Blend {
    Replace,
    /// `src + dst * (1 - src.a)`, used to composite dye onto the screen.
    PremultipliedOver,
    /// `src + dst`, used when accumulating bloom mips.
    Additive,
}

/// Uniform block shared by every fragment stage (see `shaders/common.wgsl`).
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct PassUniforms {
    pub texel_size: [f32; 2],   // offset 0
    pub point: [f32; 2],        // offset 8
    pub aspect_ratio: f32,      // offset 16
    pub radius: f32,            // offset 20
    pub dt: f32,                // offset 24
    pub dissipation: f32,       // offset 28
    pub color: [f32; 4],        // offset 32
    pub curl: f32,              // offset 48
    pub value: f32,             // offset 52
    pub intensity: f32,         // offset 56
    pub weight: f32,            // offset 60
    pub curve: [f32; 4],        // offset 64
}

const _: [(); 80] = [(); std::mem::size_of::<PassUniforms>()];

impl Default for PassUniforms {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl PassUniforms {
    pub fn with_texel(texel_size: [f32; 2]) -> Self {
        Self {
            texel_size,
            ..Self::default()
        }
    }
}

/// One full-screen pass.
#[derive(Debug, Clone, Copy)]
pub struct DrawCall<'a> {
    pub program: Program,
    /// Bound to texture units 0.. in order.
    pub inputs: &'a [SurfaceId],
    pub target: Target,
    pub uniforms: PassUniforms,
    pub blend: Blend,
}

impl DrawCall<'_> {
    pub fn stage(&self) -> Stage {
        self.program.stage()
    }

    /// True when the target is also bound as one of the inputs.
    pub fn aliases(&self) -> bool {
        match self.target {
            Target::Surface(id) => self.inputs.contains(&id),
            Target::Screen => false,
        }
    }
}

/// Everything the registry, allocator and solver need from a graphics backend.
pub trait GpuDevice {
    /// Compile the vertex stage shared by every program.
    fn compile_vertex(&mut self, source: &str) -> Result<(), ProgramError>;

    /// Compile `fragment_source` and link it with the shared vertex stage.
    fn link_program(&mut self, stage: Stage, fragment_source: &str) -> Result<(), ProgramError>;

    /// Create the texture behind `id`, cleared to zero.
    fn create_surface(&mut self, id: SurfaceId, desc: &SurfaceDesc);

    fn destroy_surface(&mut self, id: SurfaceId);

    /// Largest width or height a surface or the screen may have.
    fn max_dimension(&self) -> u32;

    fn screen_size(&self) -> (u32, u32);

    /// Resize the screen, clamped to [`GpuDevice::max_dimension`].
    fn resize_screen(&mut self, width: u32, height: u32);

    /// Called once before the passes of a tick.
    fn begin_frame(&mut self);

    /// Returns false when the pass was dropped and its target left untouched.
    fn draw(&mut self, call: &DrawCall<'_>) -> bool;

    /// Submits the tick's work, and presents the screen if a pass drew to it.
    fn end_frame(&mut self);

    /// Ask the host for another display-refresh callback.
    fn request_frame(&mut self);

    /// Read back a surface as RGBA texels, rows bottom-up.
    fn read_surface(&mut self, id: SurfaceId) -> Option<Vec<[f32; 4]>>;
}
