// Fluid Backdrop - GPU Fluid Simulation Backdrop
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

//! Per-frame pass sequence:
//! splat -> advect -> curl -> vorticity -> divergence -> pressure -> project -> display.

use glam::Vec2;
use rand::Rng;

use crate::context::SimulationContext;
use crate::gpu::{Blend, DrawCall, GpuDevice, PassUniforms, SurfaceId, Target};
use crate::input::{generate_color, SplatCommand};
use crate::programs::{ProgramRegistry, Stage};

/// Simulated time never advances by more than one 60 Hz frame per tick.
pub const MAX_FRAME_DT: f32 = 1.0 / 60.0;

/// Issues passes through the registry, skipping stages without a program.
pub struct PassRunner<'a, D: GpuDevice + ?Sized> {
    device: &'a mut D,
    programs: &'a ProgramRegistry,
    pub executed: u32,
    pub skipped: u32,
}

impl<'a, D: GpuDevice + ?Sized> PassRunner<'a, D> {
    pub fn new(device: &'a mut D, programs: &'a ProgramRegistry) -> Self {
        Self {
            device,
            programs,
            executed: 0,
            skipped: 0,
        }
    }

    /// Returns whether the pass ran. Callers swap double surfaces only on `true`.
    pub fn run(
        &mut self,
        stage: Stage,
        inputs: &[SurfaceId],
        target: Target,
        uniforms: PassUniforms,
        blend: Blend,
    ) -> bool {
        let Some(program) = self.programs.program(stage) else {
            log::debug!("Skipping {stage} pass: program unavailable");
            self.skipped += 1;
            return false;
        };
        let call = DrawCall {
            program,
            inputs,
            target,
            uniforms,
            blend,
        };
        debug_assert!(!call.aliases(), "{stage} pass samples its own target");
        if !self.device.draw(&call) {
            log::debug!("{stage} pass dropped by the device");
            self.skipped += 1;
            return false;
        }
        self.executed += 1;
        true
    }
}

/// Run one simulation step and composite the dye onto the screen.
pub fn step_frame<D: GpuDevice + ?Sized>(
    runner: &mut PassRunner<'_, D>,
    ctx: &mut SimulationContext,
    dt: f32,
) {
    let dt = dt.clamp(0.0, MAX_FRAME_DT);
    apply_inputs(runner, ctx);
    advect(runner, ctx, dt);
    compute_curl(runner, ctx);
    confine_vorticity(runner, ctx, dt);
    compute_divergence(runner, ctx);
    project(runner, ctx);
    display(runner, ctx);
}

/// Consume one batch of ambient splats and every pointer that moved.
pub fn apply_inputs<D: GpuDevice + ?Sized>(runner: &mut PassRunner<'_, D>, ctx: &mut SimulationContext) {
    if let Some(count) = ctx.splat_stack.pop() {
        for _ in 0..count {
            let splat = random_splat(&mut ctx.rng);
            apply_splat(runner, ctx, &splat);
        }
    }
    for splat in ctx.input.take_moved() {
        apply_splat(runner, ctx, &splat);
    }
}

fn random_splat<R: Rng + ?Sized>(rng: &mut R) -> SplatCommand {
    let [r, g, b] = generate_color(rng);
    let point = Vec2::new(rng.gen(), rng.gen());
    let velocity = Vec2::new(
        1000.0 * (rng.gen::<f32>() - 0.5),
        1000.0 * (rng.gen::<f32>() - 0.5),
    );
    SplatCommand {
        point,
        velocity,
        color: [r * 10.0, g * 10.0, b * 10.0],
    }
}

/// Gaussian footprint stays circular on wide screens.
pub fn corrected_radius(radius: f32, aspect: f32) -> f32 {
    if aspect > 1.0 {
        radius * aspect
    } else {
        radius
    }
}

pub fn apply_splat<D: GpuDevice + ?Sized>(
    runner: &mut PassRunner<'_, D>,
    ctx: &mut SimulationContext,
    splat: &SplatCommand,
) {
    let aspect = ctx.screen_aspect();
    let fields = &mut ctx.fields;
    let mut uniforms = PassUniforms {
        texel_size: fields.velocity.texel_size(),
        point: splat.point.to_array(),
        aspect_ratio: aspect,
        radius: corrected_radius(ctx.config.splat_radius / 100.0, aspect),
        color: [splat.velocity.x, splat.velocity.y, 0.0, 0.0],
        ..PassUniforms::default()
    };
    if runner.run(
        Stage::Splat,
        &[fields.velocity.read().id],
        Target::Surface(fields.velocity.write().id),
        uniforms,
        Blend::Replace,
    ) {
        fields.velocity.swap();
    }

    uniforms.texel_size = fields.dye.texel_size();
    uniforms.color = [splat.color[0], splat.color[1], splat.color[2], 0.0];
    if runner.run(
        Stage::Splat,
        &[fields.dye.read().id],
        Target::Surface(fields.dye.write().id),
        uniforms,
        Blend::Replace,
    ) {
        fields.dye.swap();
    }
}

/// Semi-Lagrangian transport of velocity, then dye, along the velocity field.
pub fn advect<D: GpuDevice + ?Sized>(runner: &mut PassRunner<'_, D>, ctx: &mut SimulationContext, dt: f32) {
    let fields = &mut ctx.fields;
    // Both fields trace back in velocity-grid texels.
    let mut uniforms = PassUniforms {
        texel_size: fields.velocity.texel_size(),
        dt,
        dissipation: ctx.config.velocity_dissipation,
        ..PassUniforms::default()
    };
    let velocity = fields.velocity.read().id;
    if runner.run(
        Stage::Advection,
        &[velocity, velocity],
        Target::Surface(fields.velocity.write().id),
        uniforms,
        Blend::Replace,
    ) {
        fields.velocity.swap();
    }

    uniforms.dissipation = ctx.config.density_dissipation;
    if runner.run(
        Stage::Advection,
        &[fields.velocity.read().id, fields.dye.read().id],
        Target::Surface(fields.dye.write().id),
        uniforms,
        Blend::Replace,
    ) {
        fields.dye.swap();
    }
}

pub fn compute_curl<D: GpuDevice + ?Sized>(runner: &mut PassRunner<'_, D>, ctx: &mut SimulationContext) {
    let fields = &ctx.fields;
    runner.run(
        Stage::Curl,
        &[fields.velocity.read().id],
        Target::Surface(fields.curl.id),
        PassUniforms::with_texel(fields.velocity.texel_size()),
        Blend::Replace,
    );
}

pub fn confine_vorticity<D: GpuDevice + ?Sized>(
    runner: &mut PassRunner<'_, D>,
    ctx: &mut SimulationContext,
    dt: f32,
) {
    let fields = &mut ctx.fields;
    let uniforms = PassUniforms {
        texel_size: fields.velocity.texel_size(),
        curl: ctx.config.curl,
        dt,
        ..PassUniforms::default()
    };
    if runner.run(
        Stage::Vorticity,
        &[fields.velocity.read().id, fields.curl.id],
        Target::Surface(fields.velocity.write().id),
        uniforms,
        Blend::Replace,
    ) {
        fields.velocity.swap();
    }
}

pub fn compute_divergence<D: GpuDevice + ?Sized>(
    runner: &mut PassRunner<'_, D>,
    ctx: &mut SimulationContext,
) {
    let fields = &ctx.fields;
    runner.run(
        Stage::Divergence,
        &[fields.velocity.read().id],
        Target::Surface(fields.divergence.id),
        PassUniforms::with_texel(fields.velocity.texel_size()),
        Blend::Replace,
    );
}

/// Jacobi pressure solve from a zero guess, then gradient subtraction.
/// Nothing runs when the iteration count is zero.
pub fn project<D: GpuDevice + ?Sized>(runner: &mut PassRunner<'_, D>, ctx: &mut SimulationContext) {
    let iterations = ctx.config.pressure_iterations;
    if iterations == 0 {
        return;
    }
    let fields = &mut ctx.fields;
    let texel = fields.velocity.texel_size();

    let clear = PassUniforms {
        value: 0.0,
        ..PassUniforms::with_texel(texel)
    };
    if runner.run(
        Stage::Clear,
        &[fields.pressure.read().id],
        Target::Surface(fields.pressure.write().id),
        clear,
        Blend::Replace,
    ) {
        fields.pressure.swap();
    }

    for _ in 0..iterations {
        if runner.run(
            Stage::Pressure,
            &[fields.pressure.read().id, fields.divergence.id],
            Target::Surface(fields.pressure.write().id),
            PassUniforms::with_texel(texel),
            Blend::Replace,
        ) {
            fields.pressure.swap();
        }
    }

    if runner.run(
        Stage::GradientSubtract,
        &[fields.pressure.read().id, fields.velocity.read().id],
        Target::Surface(fields.velocity.write().id),
        PassUniforms::with_texel(texel),
        Blend::Replace,
    ) {
        fields.velocity.swap();
    }
}

/// `BACK_COLOR` is filled only when `TRANSPARENT` is false; the dye is then
/// blended over it. Transparent mode clears to transparent and leaves the
/// premultiplied dye for the host to composite.
pub fn display<D: GpuDevice + ?Sized>(runner: &mut PassRunner<'_, D>, ctx: &mut SimulationContext) {
    let background = if ctx.config.transparent {
        [0.0; 4]
    } else {
        let [r, g, b] = ctx.config.back_color.normalized();
        [r, g, b, 1.0]
    };
    runner.run(
        Stage::Color,
        &[],
        Target::Screen,
        PassUniforms {
            color: background,
            ..PassUniforms::default()
        },
        Blend::Replace,
    );

    let (w, h) = ctx.screen;
    runner.run(
        Stage::Display,
        &[ctx.fields.dye.read().id],
        Target::Screen,
        PassUniforms::with_texel([1.0 / w.max(1) as f32, 1.0 / h.max(1) as f32]),
        Blend::PremultipliedOver,
    );
}
