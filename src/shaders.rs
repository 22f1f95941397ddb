// Fluid Backdrop - GPU Fluid Simulation Backdrop
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

//! WGSL sources, embedded at build time.

use crate::programs::Stage;

pub const VERTEX: &str = include_str!("../shaders/base.wgsl");

/// Uniform block, bindings and sampling helpers shared by the fragment stages.
pub const COMMON: &str = include_str!("../shaders/common.wgsl");

fn body(stage: Stage) -> &'static str {
    match stage {
        Stage::Clear => include_str!("../shaders/clear.wgsl"),
        Stage::Color => include_str!("../shaders/color.wgsl"),
        Stage::Splat => include_str!("../shaders/splat.wgsl"),
        Stage::Advection => include_str!("../shaders/advection.wgsl"),
        Stage::Curl => include_str!("../shaders/curl.wgsl"),
        Stage::Vorticity => include_str!("../shaders/vorticity.wgsl"),
        Stage::Divergence => include_str!("../shaders/divergence.wgsl"),
        Stage::Pressure => include_str!("../shaders/pressure.wgsl"),
        Stage::GradientSubtract => include_str!("../shaders/gradient_subtract.wgsl"),
        Stage::Display => include_str!("../shaders/display.wgsl"),
        Stage::BloomPrefilter => include_str!("../shaders/bloom_prefilter.wgsl"),
        Stage::BloomBlur => include_str!("../shaders/bloom_blur.wgsl"),
        Stage::BloomFinal => include_str!("../shaders/bloom_final.wgsl"),
        Stage::SunraysMask => include_str!("../shaders/sunrays_mask.wgsl"),
        Stage::Sunrays => include_str!("../shaders/sunrays.wgsl"),
        Stage::Blur => include_str!("../shaders/blur.wgsl"),
    }
}

/// Complete fragment module for `stage`.
pub fn fragment_source(stage: Stage) -> String {
    let body = body(stage);
    let mut source = String::with_capacity(COMMON.len() + body.len() + 1);
    source.push_str(COMMON);
    source.push('\n');
    source.push_str(body);
    source
}
