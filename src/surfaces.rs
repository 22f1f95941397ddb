// Fluid Backdrop - GPU Fluid Simulation Backdrop
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use std::collections::HashMap;

use crate::config::SimConfig;
use crate::gpu::{FieldFormat, Filter, GpuDevice, SurfaceDesc, SurfaceId};

/// A single texture plus render target. The texture lives in the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Surface {
    pub id: SurfaceId,
    pub desc: SurfaceDesc,
}

impl Surface {
    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    pub fn texel_size(&self) -> [f32; 2] {
        self.desc.texel_size()
    }
}

/// Read/write pair. `swap` toggles which slot is read; nothing is copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoubleSurface {
    slots: [Surface; 2],
    read: usize,
}

impl DoubleSurface {
    pub fn new(first: Surface, second: Surface) -> Self {
        Self {
            slots: [first, second],
            read: 0,
        }
    }

    pub fn read(&self) -> Surface {
        self.slots[self.read]
    }

    pub fn write(&self) -> Surface {
        self.slots[1 - self.read]
    }

    pub fn swap(&mut self) {
        self.read = 1 - self.read;
    }

    pub fn texel_size(&self) -> [f32; 2] {
        self.slots[0].texel_size()
    }

    pub fn ids(&self) -> [SurfaceId; 2] {
        [self.slots[0].id, self.slots[1].id]
    }
}

/// Every field of one session, sized for one screen size.
#[derive(Debug, Clone)]
pub struct FieldSet {
    pub sim_size: (u32, u32),
    pub dye_size: (u32, u32),
    pub velocity: DoubleSurface,
    pub dye: DoubleSurface,
    pub pressure: DoubleSurface,
    pub divergence: Surface,
    pub curl: Surface,
    pub bloom: Surface,
    /// Progressively halved bloom mips; empty when the bloom target is too small.
    pub bloom_chain: Vec<Surface>,
    pub sunrays: Surface,
    pub sunrays_temp: Surface,
}

impl FieldSet {
    pub fn surface_ids(&self) -> Vec<SurfaceId> {
        let mut ids = Vec::with_capacity(12 + self.bloom_chain.len());
        ids.extend(self.velocity.ids());
        ids.extend(self.dye.ids());
        ids.extend(self.pressure.ids());
        ids.push(self.divergence.id);
        ids.push(self.curl.id);
        ids.push(self.bloom.id);
        ids.extend(self.bloom_chain.iter().map(|s| s.id));
        ids.push(self.sunrays.id);
        ids.push(self.sunrays_temp.id);
        ids
    }
}

/// Aspect-preserving grid size where `target` is the longest edge.
pub fn resolution(target: u32, width: u32, height: u32) -> (u32, u32) {
    let target = target.max(1);
    let (width, height) = (width.max(1) as f32, height.max(1) as f32);
    let aspect = if width >= height { width / height } else { height / width };
    let short = ((target as f32 / aspect).round() as u32).max(1);
    if width >= height {
        (target, short)
    } else {
        (short, target)
    }
}

/// Hands out surface ids and tracks which ones are live.
#[derive(Debug, Default)]
pub struct SurfaceAllocator {
    next_id: u32,
    live: HashMap<SurfaceId, SurfaceDesc>,
}

impl SurfaceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        width: u32,
        height: u32,
        format: FieldFormat,
        filter: Filter,
    ) -> Surface {
        let max = device.max_dimension().max(1);
        let desc = SurfaceDesc {
            width: width.clamp(1, max),
            height: height.clamp(1, max),
            format,
            filter,
        };
        let id = SurfaceId(self.next_id);
        self.next_id += 1;
        device.create_surface(id, &desc);
        self.live.insert(id, desc);
        Surface { id, desc }
    }

    pub fn allocate_double<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        width: u32,
        height: u32,
        format: FieldFormat,
        filter: Filter,
    ) -> DoubleSurface {
        let first = self.allocate(device, width, height, format, filter);
        let second = self.allocate(device, width, height, format, filter);
        DoubleSurface::new(first, second)
    }

    pub fn release<D: GpuDevice + ?Sized>(&mut self, device: &mut D, surface: Surface) {
        if self.live.remove(&surface.id).is_some() {
            device.destroy_surface(surface.id);
        }
    }

    pub fn is_live(&self, id: SurfaceId) -> bool {
        self.live.contains_key(&id)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Allocate every field for a screen of `width`×`height` pixels.
    pub fn allocate_fields<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        config: &SimConfig,
        width: u32,
        height: u32,
    ) -> FieldSet {
        // Capping the longest edge keeps the aspect ratio intact.
        let max = device.max_dimension();
        let sim_size = resolution(config.sim_resolution.min(max), width, height);
        let dye_size = resolution(config.dye_resolution.min(max), width, height);
        let (sw, sh) = sim_size;
        let (dw, dh) = dye_size;

        let dye = self.allocate_double(device, dw, dh, FieldFormat::Rgba16Float, Filter::Linear);
        let velocity = self.allocate_double(device, sw, sh, FieldFormat::Rg16Float, Filter::Linear);
        let divergence = self.allocate(device, sw, sh, FieldFormat::R16Float, Filter::Nearest);
        let curl = self.allocate(device, sw, sh, FieldFormat::R16Float, Filter::Nearest);
        let pressure = self.allocate_double(device, sw, sh, FieldFormat::R16Float, Filter::Nearest);

        let (bw, bh) = resolution(config.bloom_resolution.min(max), width, height);
        let bloom = self.allocate(device, bw, bh, FieldFormat::Rgba16Float, Filter::Linear);
        let mut bloom_chain = Vec::new();
        for level in 1..=config.bloom_iterations {
            let (w, h) = (bw >> level, bh >> level);
            if w < 2 || h < 2 {
                break;
            }
            bloom_chain.push(self.allocate(device, w, h, FieldFormat::Rgba16Float, Filter::Linear));
        }

        let (rw, rh) = resolution(config.sunrays_resolution.min(max), width, height);
        let sunrays = self.allocate(device, rw, rh, FieldFormat::R16Float, Filter::Linear);
        let sunrays_temp = self.allocate(device, rw, rh, FieldFormat::R16Float, Filter::Linear);

        log::debug!(
            "Allocated fields for {width}x{height}: sim {sw}x{sh}, dye {dw}x{dh}, {} bloom mips",
            bloom_chain.len()
        );

        FieldSet {
            sim_size,
            dye_size,
            velocity,
            dye,
            pressure,
            divergence,
            curl,
            bloom,
            bloom_chain,
            sunrays,
            sunrays_temp,
        }
    }

    /// Release every surface of `old` and allocate a fresh set for the new size.
    /// Field contents are discarded, not resampled.
    pub fn reallocate_all<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        old: FieldSet,
        config: &SimConfig,
        width: u32,
        height: u32,
    ) -> FieldSet {
        self.release_fields(device, old);
        self.allocate_fields(device, config, width, height)
    }

    pub fn release_fields<D: GpuDevice + ?Sized>(&mut self, device: &mut D, fields: FieldSet) {
        let FieldSet {
            velocity,
            dye,
            pressure,
            divergence,
            curl,
            bloom,
            bloom_chain,
            sunrays,
            sunrays_temp,
            ..
        } = fields;
        for pair in [velocity, dye, pressure] {
            self.release(device, pair.read());
            self.release(device, pair.write());
        }
        for surface in [divergence, curl, bloom, sunrays, sunrays_temp]
            .into_iter()
            .chain(bloom_chain)
        {
            self.release(device, surface);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless::HeadlessDevice;

    #[test]
    fn resolution_uses_target_as_longest_edge() {
        assert_eq!(resolution(128, 800, 600), (128, 96));
        assert_eq!(resolution(128, 600, 800), (96, 128));
        assert_eq!(resolution(128, 1024, 768), (128, 96));
        assert_eq!(resolution(256, 500, 500), (256, 256));
    }

    #[test]
    fn resolution_never_collapses_to_zero() {
        assert_eq!(resolution(4, 10_000, 1), (4, 1));
        assert_eq!(resolution(0, 0, 0), (1, 1));
    }

    #[test]
    fn swap_exchanges_roles_and_twice_restores() {
        let mut device = HeadlessDevice::new(8, 8);
        let mut allocator = SurfaceAllocator::new();
        let mut pair =
            allocator.allocate_double(&mut device, 4, 4, FieldFormat::R16Float, Filter::Nearest);
        let (read, write) = (pair.read(), pair.write());
        assert_ne!(read.id, write.id);

        pair.swap();
        assert_eq!(pair.read(), write);
        assert_eq!(pair.write(), read);

        pair.swap();
        assert_eq!(pair.read(), read);
        assert_eq!(pair.write(), write);
    }

    #[test]
    fn reallocation_replaces_every_surface() {
        let mut device = HeadlessDevice::new(800, 600);
        let mut allocator = SurfaceAllocator::new();
        let config = SimConfig::default();
        let fields = allocator.allocate_fields(&mut device, &config, 800, 600);
        let old_ids = fields.surface_ids();
        let live_before = allocator.live_count();

        let fields = allocator.reallocate_all(&mut device, fields, &config, 1024, 768);
        let new_ids = fields.surface_ids();

        assert_eq!(allocator.live_count(), live_before);
        for id in &old_ids {
            assert!(!allocator.is_live(*id));
            assert!(!new_ids.contains(id));
            assert!(!device.has_surface(*id));
        }
        for id in &new_ids {
            assert!(device.has_surface(*id));
        }
    }

    #[test]
    fn fields_never_exceed_the_device_limit() {
        let mut device = HeadlessDevice::new(64, 36).with_max_dimension(64);
        let mut allocator = SurfaceAllocator::new();
        let config = SimConfig {
            dye_resolution: 4096,
            ..SimConfig::default()
        };

        let fields = allocator.allocate_fields(&mut device, &config, 2560, 1440);
        assert_eq!(fields.dye_size, (64, 36));
        assert_eq!(fields.sim_size, (64, 36));
        for surface in [fields.bloom, fields.sunrays, fields.dye.read(), fields.velocity.write()] {
            assert!(surface.width() <= 64 && surface.height() <= 64);
        }

        let oversized = allocator.allocate(&mut device, 4096, 100, FieldFormat::R16Float, Filter::Nearest);
        assert_eq!((oversized.width(), oversized.height()), (64, 64));
    }

    #[test]
    fn bloom_chain_stops_before_degenerate_mips() {
        let mut device = HeadlessDevice::new(800, 600);
        let mut allocator = SurfaceAllocator::new();
        let config = SimConfig {
            bloom_resolution: 32,
            bloom_iterations: 8,
            ..SimConfig::default()
        };
        let fields = allocator.allocate_fields(&mut device, &config, 800, 600);
        // 32x24 halves to 16x12, 8x6, 4x3, then 2x1 is rejected.
        let sizes: Vec<(u32, u32)> = fields
            .bloom_chain
            .iter()
            .map(|s| (s.width(), s.height()))
            .collect();
        assert_eq!(sizes, vec![(16, 12), (8, 6), (4, 3)]);
    }
}
