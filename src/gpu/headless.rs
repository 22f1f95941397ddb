// Fluid Backdrop - GPU Fluid Simulation Backdrop
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

//! CPU reference device.
//!
//! Evaluates every stage the same way the WGSL does (f32 precision instead of
//! f16 storage) and records each draw call, so the solver can be exercised and
//! inspected without a GPU.

use std::collections::{HashMap, HashSet};

use glam::{Vec2, Vec3, Vec4, Vec4Swizzles};

use super::{fit_within, Blend, DrawCall, FieldFormat, Filter, GpuDevice, PassUniforms, SurfaceDesc, SurfaceId, Target};
use crate::error::ProgramError;
use crate::programs::Stage;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedDraw {
    pub stage: Stage,
    pub inputs: Vec<SurfaceId>,
    pub target: Target,
    pub uniforms: PassUniforms,
    pub blend: Blend,
}

#[derive(Debug, Clone)]
struct CpuTexture {
    desc: SurfaceDesc,
    /// Row-major, row 0 at the bottom.
    texels: Vec<Vec4>,
}

impl CpuTexture {
    fn new(desc: SurfaceDesc) -> Self {
        let mut texture = Self {
            desc,
            texels: Vec::new(),
        };
        texture.texels = vec![texture.mask(Vec4::ZERO); (desc.width * desc.height) as usize];
        texture
    }

    fn mask(&self, v: Vec4) -> Vec4 {
        match self.desc.format {
            FieldFormat::Rgba16Float => v,
            FieldFormat::Rg16Float => Vec4::new(v.x, v.y, 0.0, 1.0),
            FieldFormat::R16Float => Vec4::new(v.x, 0.0, 0.0, 1.0),
        }
    }

    fn texel(&self, x: i64, y: i64) -> Vec4 {
        let w = self.desc.width as i64;
        let h = self.desc.height as i64;
        let x = x.clamp(0, w - 1);
        let y = y.clamp(0, h - 1);
        self.texels[(y * w + x) as usize]
    }

    /// Clamp-to-edge sampling with the surface's own filter.
    fn sample(&self, uv: Vec2) -> Vec4 {
        let w = self.desc.width as f32;
        let h = self.desc.height as f32;
        match self.desc.filter {
            Filter::Nearest => self.texel((uv.x * w).floor() as i64, (uv.y * h).floor() as i64),
            Filter::Linear => {
                let fx = uv.x * w - 0.5;
                let fy = uv.y * h - 0.5;
                let x0 = fx.floor();
                let y0 = fy.floor();
                let tx = fx - x0;
                let ty = fy - y0;
                let (x0, y0) = (x0 as i64, y0 as i64);
                let bottom = self.texel(x0, y0).lerp(self.texel(x0 + 1, y0), tx);
                let top = self.texel(x0, y0 + 1).lerp(self.texel(x0 + 1, y0 + 1), tx);
                bottom.lerp(top, ty)
            }
        }
    }
}

pub struct HeadlessDevice {
    screen: CpuTexture,
    textures: HashMap<SurfaceId, CpuTexture>,
    failing_stages: HashSet<Stage>,
    failing_vertex: bool,
    linked: HashSet<Stage>,
    draws: Vec<RecordedDraw>,
    max_dimension: u32,
    frames: u64,
    screen_drawn: bool,
    presents: u64,
    frame_requests: u64,
}

/// Same default as `wgpu::Limits::default().max_texture_dimension_2d`.
const DEFAULT_MAX_DIMENSION: u32 = 8192;

fn screen_texture(width: u32, height: u32) -> CpuTexture {
    CpuTexture::new(SurfaceDesc {
        width: width.max(1),
        height: height.max(1),
        format: FieldFormat::Rgba16Float,
        filter: Filter::Linear,
    })
}

impl HeadlessDevice {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            screen: screen_texture(width, height),
            textures: HashMap::new(),
            failing_stages: HashSet::new(),
            failing_vertex: false,
            linked: HashSet::new(),
            draws: Vec::new(),
            max_dimension: DEFAULT_MAX_DIMENSION,
            frames: 0,
            screen_drawn: false,
            presents: 0,
            frame_requests: 0,
        }
    }

    /// Lower the texture size limit, as a small adapter would.
    pub fn with_max_dimension(mut self, max: u32) -> Self {
        self.max_dimension = max.max(1);
        let (w, h) = (self.screen.desc.width, self.screen.desc.height);
        self.resize_screen(w, h);
        self
    }

    /// Make `link_program` fail for these stages.
    pub fn with_failing_stages(mut self, stages: &[Stage]) -> Self {
        self.failing_stages.extend(stages.iter().copied());
        self
    }

    pub fn with_failing_vertex(mut self) -> Self {
        self.failing_vertex = true;
        self
    }

    pub fn has_surface(&self, id: SurfaceId) -> bool {
        self.textures.contains_key(&id)
    }

    pub fn surface_count(&self) -> usize {
        self.textures.len()
    }

    pub fn draws(&self) -> &[RecordedDraw] {
        &self.draws
    }

    pub fn take_draws(&mut self) -> Vec<RecordedDraw> {
        std::mem::take(&mut self.draws)
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Frames that drew to the screen and were presented.
    pub fn presents(&self) -> u64 {
        self.presents
    }

    pub fn frame_requests(&self) -> u64 {
        self.frame_requests
    }

    /// Overwrite a surface, rows bottom-up. Returns false for unknown ids or
    /// mismatched lengths.
    pub fn write_surface(&mut self, id: SurfaceId, texels: &[[f32; 4]]) -> bool {
        let Some(texture) = self.textures.get_mut(&id) else {
            return false;
        };
        if texels.len() != texture.texels.len() {
            return false;
        }
        let masked: Vec<Vec4> = texels.iter().map(|t| texture.mask(Vec4::from_array(*t))).collect();
        texture.texels = masked;
        true
    }

    pub fn fill_surface(&mut self, id: SurfaceId, value: [f32; 4]) -> bool {
        let Some(texture) = self.textures.get_mut(&id) else {
            return false;
        };
        let value = texture.mask(Vec4::from_array(value));
        texture.texels.fill(value);
        true
    }

    pub fn screen_pixels(&self) -> Vec<[f32; 4]> {
        self.screen.texels.iter().map(|t| t.to_array()).collect()
    }
}

fn shade(stage: Stage, u: &PassUniforms, uv: Vec2, inputs: &[&CpuTexture]) -> Vec4 {
    let sample = |unit: usize, at: Vec2| inputs.get(unit).map_or(Vec4::ZERO, |t| t.sample(at));
    let texel = Vec2::from_array(u.texel_size);
    let dx = Vec2::new(texel.x, 0.0);
    let dy = Vec2::new(0.0, texel.y);

    match stage {
        Stage::Clear => u.value * sample(0, uv),
        Stage::Color => Vec4::from_array(u.color),
        Stage::Splat => {
            let mut p = uv - Vec2::from_array(u.point);
            p.x *= u.aspect_ratio;
            let splat = (-p.dot(p) / u.radius).exp() * Vec4::from_array(u.color).xyz();
            (sample(0, uv).xyz() + splat).extend(1.0)
        }
        Stage::Advection => {
            let coord = uv - u.dt * sample(0, uv).xy() * texel;
            u.dissipation * sample(1, coord)
        }
        Stage::Curl => {
            let l = sample(0, uv - dx).y;
            let r = sample(0, uv + dx).y;
            let t = sample(0, uv + dy).x;
            let b = sample(0, uv - dy).x;
            Vec4::new(0.5 * (r - l - t + b), 0.0, 0.0, 1.0)
        }
        Stage::Vorticity => {
            let l = sample(1, uv - dx).x;
            let r = sample(1, uv + dx).x;
            let t = sample(1, uv + dy).x;
            let b = sample(1, uv - dy).x;
            let c = sample(1, uv).x;
            let mut force = 0.5 * Vec2::new(t.abs() - b.abs(), r.abs() - l.abs());
            force /= force.length() + 0.0001;
            force *= u.curl * c;
            force.y = -force.y;
            let velocity = (sample(0, uv).xy() + force * u.dt).clamp(Vec2::splat(-1000.0), Vec2::splat(1000.0));
            Vec4::new(velocity.x, velocity.y, 0.0, 1.0)
        }
        Stage::Divergence => {
            let (vl, vr, vt, vb) = (uv - dx, uv + dx, uv + dy, uv - dy);
            let c = sample(0, uv).xy();
            let l = if vl.x < 0.0 { -c.x } else { sample(0, vl).x };
            let r = if vr.x > 1.0 { -c.x } else { sample(0, vr).x };
            let t = if vt.y > 1.0 { -c.y } else { sample(0, vt).y };
            let b = if vb.y < 0.0 { -c.y } else { sample(0, vb).y };
            Vec4::new(0.5 * (r - l + t - b), 0.0, 0.0, 1.0)
        }
        Stage::Pressure => {
            let l = sample(0, uv - dx).x;
            let r = sample(0, uv + dx).x;
            let t = sample(0, uv + dy).x;
            let b = sample(0, uv - dy).x;
            let divergence = sample(1, uv).x;
            Vec4::new((l + r + b + t - divergence) * 0.25, 0.0, 0.0, 1.0)
        }
        Stage::GradientSubtract => {
            let l = sample(0, uv - dx).x;
            let r = sample(0, uv + dx).x;
            let t = sample(0, uv + dy).x;
            let b = sample(0, uv - dy).x;
            let velocity = sample(1, uv).xy() - Vec2::new(r - l, t - b);
            Vec4::new(velocity.x, velocity.y, 0.0, 1.0)
        }
        Stage::Display => {
            let c = sample(0, uv).xyz();
            c.extend(c.max_element())
        }
        Stage::BloomPrefilter => {
            let c = sample(0, uv).xyz();
            let br = c.max_element();
            let mut rq = (br - u.curve[0]).clamp(0.0, u.curve[1]);
            rq = u.curve[2] * rq * rq;
            let c: Vec3 = c * rq.max(br - u.curve[3]) / br.max(0.0001);
            c.extend(0.0)
        }
        Stage::BloomBlur | Stage::BloomFinal => {
            let sum = sample(0, uv - dx) + sample(0, uv + dx) + sample(0, uv + dy) + sample(0, uv - dy);
            let scale = if stage == Stage::BloomFinal { u.intensity } else { 1.0 };
            sum * 0.25 * scale
        }
        Stage::SunraysMask => {
            let mut c = sample(0, uv);
            let br = c.xyz().max_element();
            c.w = 1.0 - (br * 20.0).max(0.0).min(0.8);
            c
        }
        Stage::Sunrays => {
            const ITERATIONS: i32 = 16;
            const DENSITY: f32 = 0.3;
            const DECAY: f32 = 0.95;
            const EXPOSURE: f32 = 0.7;
            let dir = (uv - Vec2::splat(0.5)) * (DENSITY / ITERATIONS as f32);
            let mut coord = uv;
            let mut decay = 1.0;
            let mut color = sample(0, uv).w;
            for _ in 0..ITERATIONS {
                coord -= dir;
                color += sample(0, coord).w * decay * u.weight;
                decay *= DECAY;
            }
            Vec4::new(color * EXPOSURE, 0.0, 0.0, 1.0)
        }
        Stage::Blur => {
            let offset = texel * 1.333_333_3;
            sample(0, uv) * 0.294_117_64
                + sample(0, uv - offset) * 0.352_941_17
                + sample(0, uv + offset) * 0.352_941_17
        }
    }
}

fn blend(mode: Blend, src: Vec4, dst: Vec4) -> Vec4 {
    match mode {
        Blend::Replace => src,
        Blend::PremultipliedOver => src + dst * (1.0 - src.w),
        Blend::Additive => src + dst,
    }
}

impl GpuDevice for HeadlessDevice {
    fn compile_vertex(&mut self, _source: &str) -> Result<(), ProgramError> {
        if self.failing_vertex {
            return Err(ProgramError::Compile {
                stage: "vertex".to_string(),
                log: "vertex stage rejected by headless device".to_string(),
            });
        }
        Ok(())
    }

    fn link_program(&mut self, stage: Stage, _fragment_source: &str) -> Result<(), ProgramError> {
        if self.failing_stages.contains(&stage) {
            return Err(ProgramError::Link {
                stage: stage.label().to_string(),
                log: "stage rejected by headless device".to_string(),
            });
        }
        self.linked.insert(stage);
        Ok(())
    }

    fn create_surface(&mut self, id: SurfaceId, desc: &SurfaceDesc) {
        self.textures.insert(id, CpuTexture::new(*desc));
    }

    fn destroy_surface(&mut self, id: SurfaceId) {
        self.textures.remove(&id);
    }

    fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    fn screen_size(&self) -> (u32, u32) {
        (self.screen.desc.width, self.screen.desc.height)
    }

    fn resize_screen(&mut self, width: u32, height: u32) {
        let (width, height) = fit_within(width, height, self.max_dimension);
        self.screen = screen_texture(width, height);
    }

    fn begin_frame(&mut self) {
        self.frames += 1;
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> bool {
        let stage = call.stage();
        self.draws.push(RecordedDraw {
            stage,
            inputs: call.inputs.to_vec(),
            target: call.target,
            uniforms: call.uniforms,
            blend: call.blend,
        });
        if !self.linked.contains(&stage) {
            log::error!("Draw with unlinked {stage} program");
            return false;
        }

        let mut inputs = Vec::with_capacity(call.inputs.len());
        for id in call.inputs {
            match self.textures.get(id) {
                Some(texture) => inputs.push(texture),
                None => {
                    log::error!("{stage} pass samples released surface {id:?}");
                    return false;
                }
            }
        }
        let desc = match call.target {
            Target::Screen => self.screen.desc,
            Target::Surface(id) => match self.textures.get(&id) {
                Some(texture) => texture.desc,
                None => {
                    log::error!("{stage} pass targets released surface {id:?}");
                    return false;
                }
            },
        };

        let (w, h) = (desc.width, desc.height);
        let mut output = Vec::with_capacity((w * h) as usize);
        for y in 0..h {
            for x in 0..w {
                let uv = Vec2::new((x as f32 + 0.5) / w as f32, (y as f32 + 0.5) / h as f32);
                output.push(shade(stage, &call.uniforms, uv, &inputs));
            }
        }

        let target = match call.target {
            Target::Screen => {
                self.screen_drawn = true;
                &mut self.screen
            }
            Target::Surface(id) => match self.textures.get_mut(&id) {
                Some(texture) => texture,
                None => return false,
            },
        };
        for (dst, src) in target.texels.iter_mut().zip(output) {
            *dst = blend(call.blend, src, *dst);
        }
        let masked: Vec<Vec4> = target.texels.iter().map(|t| target.mask(*t)).collect();
        target.texels = masked;
        true
    }

    fn end_frame(&mut self) {
        if std::mem::take(&mut self.screen_drawn) {
            self.presents += 1;
        }
    }

    fn request_frame(&mut self) {
        self.frame_requests += 1;
    }

    fn read_surface(&mut self, id: SurfaceId) -> Option<Vec<[f32; 4]>> {
        self.textures
            .get(&id)
            .map(|texture| texture.texels.iter().map(|t| t.to_array()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texture(width: u32, height: u32, filter: Filter, texels: &[f32]) -> CpuTexture {
        let mut texture = CpuTexture::new(SurfaceDesc {
            width,
            height,
            format: FieldFormat::R16Float,
            filter,
        });
        texture.texels = texels.iter().map(|v| Vec4::new(*v, 0.0, 0.0, 1.0)).collect();
        texture
    }

    #[test]
    fn linear_sampling_hits_texel_centers_exactly() {
        let t = texture(2, 1, Filter::Linear, &[1.0, 3.0]);
        assert_eq!(t.sample(Vec2::new(0.25, 0.5)).x, 1.0);
        assert_eq!(t.sample(Vec2::new(0.75, 0.5)).x, 3.0);
        assert_eq!(t.sample(Vec2::new(0.5, 0.5)).x, 2.0);
    }

    #[test]
    fn sampling_clamps_to_edges() {
        let t = texture(2, 1, Filter::Linear, &[1.0, 3.0]);
        assert_eq!(t.sample(Vec2::new(-1.0, 0.5)).x, 1.0);
        assert_eq!(t.sample(Vec2::new(2.0, 0.5)).x, 3.0);
        let n = texture(2, 1, Filter::Nearest, &[1.0, 3.0]);
        assert_eq!(n.sample(Vec2::new(0.49, 0.5)).x, 1.0);
        assert_eq!(n.sample(Vec2::new(1.5, 0.5)).x, 3.0);
    }

    #[test]
    fn single_channel_formats_drop_extra_channels() {
        let t = texture(1, 1, Filter::Nearest, &[0.0]);
        assert_eq!(t.mask(Vec4::new(1.0, 2.0, 3.0, 4.0)), Vec4::new(1.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn premultiplied_over_keeps_background_where_dye_is_dark() {
        let back = Vec4::new(0.2, 0.3, 0.4, 1.0);
        assert_eq!(blend(Blend::PremultipliedOver, Vec4::ZERO, back), back);
        let bright = Vec4::new(1.0, 0.0, 0.0, 1.0);
        assert_eq!(blend(Blend::PremultipliedOver, bright, back), bright);
    }
}
