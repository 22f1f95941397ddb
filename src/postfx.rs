// Fluid Backdrop - GPU Fluid Simulation Backdrop
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

//! Optional bloom and sunrays passes.
//!
//! Neither runs as part of the frame loop. Callers invoke them explicitly and
//! read the results from `FieldSet::bloom` / `FieldSet::sunrays`.

use crate::context::SimulationContext;
use crate::gpu::{Blend, GpuDevice, PassUniforms, Target};
use crate::programs::Stage;
use crate::solver::PassRunner;

/// Soft-knee curve for the bloom prefilter: (threshold - knee, 2 knee, 0.25 / knee, threshold).
pub fn bloom_curve(threshold: f32, soft_knee: f32) -> [f32; 4] {
    let knee = threshold * soft_knee + 0.0001;
    [threshold - knee, knee * 2.0, 0.25 / knee, threshold]
}

/// Threshold the dye into `bloom`, blur it down the mip chain and back up,
/// then scale by the configured intensity. Returns false when the chain is
/// too short to blur.
pub fn apply_bloom<D: GpuDevice + ?Sized>(runner: &mut PassRunner<'_, D>, ctx: &SimulationContext) -> bool {
    let fields = &ctx.fields;
    let config = &ctx.config;
    if fields.bloom_chain.len() < 2 {
        log::debug!("Bloom chain too short ({} mips), skipping", fields.bloom_chain.len());
        return false;
    }

    let mut last = fields.bloom;
    runner.run(
        Stage::BloomPrefilter,
        &[fields.dye.read().id],
        Target::Surface(last.id),
        PassUniforms {
            curve: bloom_curve(config.bloom_threshold, config.bloom_soft_knee),
            ..PassUniforms::with_texel(last.texel_size())
        },
        Blend::Replace,
    );

    for &dest in &fields.bloom_chain {
        runner.run(
            Stage::BloomBlur,
            &[last.id],
            Target::Surface(dest.id),
            PassUniforms::with_texel(last.texel_size()),
            Blend::Replace,
        );
        last = dest;
    }

    for &base in fields.bloom_chain.iter().rev().skip(1) {
        runner.run(
            Stage::BloomBlur,
            &[last.id],
            Target::Surface(base.id),
            PassUniforms::with_texel(last.texel_size()),
            Blend::Additive,
        );
        last = base;
    }

    runner.run(
        Stage::BloomFinal,
        &[last.id],
        Target::Surface(fields.bloom.id),
        PassUniforms {
            intensity: config.bloom_intensity,
            ..PassUniforms::with_texel(last.texel_size())
        },
        Blend::Replace,
    );
    true
}

/// Light shafts from the dark regions of the dye. The dye write slot is used
/// as scratch for the mask; its contents are overwritten next frame anyway.
pub fn apply_sunrays<D: GpuDevice + ?Sized>(runner: &mut PassRunner<'_, D>, ctx: &SimulationContext) {
    let fields = &ctx.fields;
    let mask = fields.dye.write();
    runner.run(
        Stage::SunraysMask,
        &[fields.dye.read().id],
        Target::Surface(mask.id),
        PassUniforms::with_texel(mask.texel_size()),
        Blend::Replace,
    );
    runner.run(
        Stage::Sunrays,
        &[mask.id],
        Target::Surface(fields.sunrays.id),
        PassUniforms {
            weight: ctx.config.sunrays_weight,
            ..PassUniforms::with_texel(fields.sunrays.texel_size())
        },
        Blend::Replace,
    );

    let [tx, ty] = fields.sunrays.texel_size();
    runner.run(
        Stage::Blur,
        &[fields.sunrays.id],
        Target::Surface(fields.sunrays_temp.id),
        PassUniforms::with_texel([tx, 0.0]),
        Blend::Replace,
    );
    runner.run(
        Stage::Blur,
        &[fields.sunrays_temp.id],
        Target::Surface(fields.sunrays.id),
        PassUniforms::with_texel([0.0, ty]),
        Blend::Replace,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curve_passes_threshold_through() {
        let curve = bloom_curve(0.6, 0.7);
        assert_eq!(curve[3], 0.6);
        assert!((curve[1] - 2.0 * (0.42 + 0.0001)).abs() < 1e-6);
    }
}
