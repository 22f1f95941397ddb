// Fluid Backdrop - GPU Fluid Simulation Backdrop
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use wgpu::util::DeviceExt;
use winit::window::Window;

use super::{fit_within, Blend, DrawCall, FieldFormat, Filter, GpuDevice, SurfaceDesc, SurfaceId, Target, MAX_INPUTS};
use crate::error::{ProgramError, SetupError};
use crate::programs::Stage;

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: SurfaceDesc,
}

type PipelineKey = (Stage, wgpu::TextureFormat, Blend);

pub struct WgpuDevice {
    window: Arc<Window>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,

    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    linear_sampler: wgpu::Sampler,
    nearest_sampler: wgpu::Sampler,
    placeholder: wgpu::TextureView,

    vertex_module: Option<wgpu::ShaderModule>,
    fragment_modules: HashMap<Stage, wgpu::ShaderModule>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    failed_pipelines: HashSet<PipelineKey>,

    textures: HashMap<SurfaceId, GpuTexture>,
    encoder: Option<wgpu::CommandEncoder>,
    /// Acquired on the first screen pass of a frame, presented by `end_frame`.
    frame: Option<(wgpu::SurfaceTexture, wgpu::TextureView)>,
    acquire_failed: bool,
    max_dimension: u32,
}

fn texture_format(format: FieldFormat) -> wgpu::TextureFormat {
    match format {
        FieldFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        FieldFormat::Rg16Float => wgpu::TextureFormat::Rg16Float,
        FieldFormat::R16Float => wgpu::TextureFormat::R16Float,
    }
}

fn blend_state(blend: Blend) -> wgpu::BlendState {
    match blend {
        Blend::Replace => wgpu::BlendState::REPLACE,
        Blend::PremultipliedOver => wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING,
        Blend::Additive => {
            let add = wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            };
            wgpu::BlendState { color: add, alpha: add }
        }
    }
}

/// Run `f` inside a validation error scope.
fn with_validation<T>(device: &wgpu::Device, f: impl FnOnce(&wgpu::Device) -> T) -> (T, Option<wgpu::Error>) {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = f(device);
    let error = pollster::block_on(device.pop_error_scope());
    (value, error)
}

fn build_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    vertex: &wgpu::ShaderModule,
    fragment: &wgpu::ShaderModule,
    stage: Stage,
    format: wgpu::TextureFormat,
    blend: Blend,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(stage.label()),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: vertex,
            entry_point: "vs_main",
            buffers: &[],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: fragment,
            entry_point: "fs_main",
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(blend_state(blend)),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        multiview: None,
        cache: None,
    })
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn sampler_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }
}

impl WgpuDevice {
    /// Acquire adapter, device and a presentable surface for `window`.
    pub async fn new(window: Arc<Window>) -> Result<Self, SetupError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance.create_surface(window.clone())?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::LowPower,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or(SetupError::NoAdapter)?;

        // Everything the adapter offers, so large screens and dye grids fit.
        let limits = adapter.limits();
        let max_dimension = limits.max_texture_dimension_2d;
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Fluid Backdrop Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits,
                    memory_hints: Default::default(),
                },
                None,
            )
            .await?;

        // Configure surface
        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&adapter);
        // Dye colors are authored in display space, so skip the sRGB encode.
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| !f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or(SetupError::NoSurfaceFormat)?;
        let alpha_mode = if surface_caps
            .alpha_modes
            .contains(&wgpu::CompositeAlphaMode::PreMultiplied)
        {
            wgpu::CompositeAlphaMode::PreMultiplied
        } else {
            surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto)
        };

        let (width, height) = fit_within(size.width, size.height, max_dimension);
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width,
            height,
            present_mode: wgpu::PresentMode::Fifo, // ticks follow the display refresh
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Pass Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                texture_entry(1),
                sampler_entry(2),
                texture_entry(3),
                sampler_entry(4),
                texture_entry(5),
                sampler_entry(6),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Pass Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let sampler = |filter: wgpu::FilterMode, label: &str| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: filter,
                min_filter: filter,
                mipmap_filter: wgpu::FilterMode::Nearest,
                ..Default::default()
            })
        };
        let linear_sampler = sampler(wgpu::FilterMode::Linear, "Linear Sampler");
        let nearest_sampler = sampler(wgpu::FilterMode::Nearest, "Nearest Sampler");

        // Bound to texture units a pass does not use.
        let placeholder = device
            .create_texture_with_data(
                &queue,
                &wgpu::TextureDescriptor {
                    label: Some("Placeholder Texture"),
                    size: wgpu::Extent3d {
                        width: 1,
                        height: 1,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: wgpu::TextureFormat::Rgba16Float,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING,
                    view_formats: &[],
                },
                wgpu::util::TextureDataOrder::LayerMajor,
                &[0u8; 8],
            )
            .create_view(&wgpu::TextureViewDescriptor::default());

        log::info!(
            "Fluid backdrop on {} ({:?}), surface {:?} {}x{}",
            adapter.get_info().name,
            adapter.get_info().backend,
            surface_format,
            surface_config.width,
            surface_config.height
        );

        Ok(Self {
            window,
            device,
            queue,
            surface,
            surface_config,
            bind_group_layout,
            pipeline_layout,
            linear_sampler,
            nearest_sampler,
            placeholder,
            vertex_module: None,
            fragment_modules: HashMap::new(),
            pipelines: HashMap::new(),
            failed_pipelines: HashSet::new(),
            textures: HashMap::new(),
            encoder: None,
            frame: None,
            acquire_failed: false,
            max_dimension,
        })
    }

    fn compile_module(&self, label: &str, source: &str) -> Result<wgpu::ShaderModule, ProgramError> {
        let (module, error) = with_validation(&self.device, |device| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            })
        });
        match error {
            Some(error) => Err(ProgramError::Compile {
                stage: label.to_string(),
                log: error.to_string(),
            }),
            None => Ok(module),
        }
    }

    /// Make sure a pipeline for `key` exists. Returns false if it cannot be built.
    fn ensure_pipeline(&mut self, key: PipelineKey) -> bool {
        if self.pipelines.contains_key(&key) {
            return true;
        }
        if self.failed_pipelines.contains(&key) {
            return false;
        }
        let (stage, format, blend) = key;
        let (Some(vertex), Some(fragment)) = (self.vertex_module.as_ref(), self.fragment_modules.get(&stage)) else {
            return false;
        };
        let (pipeline, error) = with_validation(&self.device, |device| {
            build_pipeline(device, &self.pipeline_layout, vertex, fragment, stage, format, blend)
        });
        if let Some(error) = error {
            log::error!("Failed to build {stage} pipeline for {format:?}/{blend:?}: {error}");
            self.failed_pipelines.insert(key);
            return false;
        }
        self.pipelines.insert(key, pipeline);
        true
    }

    fn sampler(&self, filter: Filter) -> &wgpu::Sampler {
        match filter {
            Filter::Linear => &self.linear_sampler,
            Filter::Nearest => &self.nearest_sampler,
        }
    }

    /// Acquire the swapchain image for this frame. Only one attempt per frame.
    fn acquire_frame(&mut self) -> bool {
        if self.frame.is_some() {
            return true;
        }
        if self.acquire_failed {
            return false;
        }
        match self.surface.get_current_texture() {
            Ok(output) => {
                let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());
                self.frame = Some((output, view));
                true
            }
            Err(wgpu::SurfaceError::Lost) | Err(wgpu::SurfaceError::Outdated) => {
                log::debug!("Surface lost or outdated, reconfiguring");
                self.surface.configure(&self.device, &self.surface_config);
                self.acquire_failed = true;
                false
            }
            Err(err) => {
                log::warn!("Failed to acquire surface texture: {err:?}");
                self.acquire_failed = true;
                false
            }
        }
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        self.encoder.get_or_insert_with(|| {
            self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Fluid Frame"),
            })
        })
    }

    fn flush(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
    }

    fn clear_texture(&self, view: &wgpu::TextureView) {
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Surface Init Clear"),
        });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Clear Surface"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }
}

impl GpuDevice for WgpuDevice {
    fn compile_vertex(&mut self, source: &str) -> Result<(), ProgramError> {
        let module = self.compile_module("vertex", source)?;
        self.vertex_module = Some(module);
        Ok(())
    }

    fn link_program(&mut self, stage: Stage, fragment_source: &str) -> Result<(), ProgramError> {
        if self.vertex_module.is_none() {
            return Err(ProgramError::VertexUnavailable);
        }
        let module = self.compile_module(stage.label(), fragment_source)?;
        self.fragment_modules.insert(stage, module);

        let format = stage
            .primary_format()
            .map(texture_format)
            .unwrap_or(self.surface_config.format);
        if self.ensure_pipeline((stage, format, Blend::Replace)) {
            Ok(())
        } else {
            self.fragment_modules.remove(&stage);
            Err(ProgramError::Link {
                stage: stage.label().to_string(),
                log: "render pipeline validation failed".to_string(),
            })
        }
    }

    fn create_surface(&mut self, id: SurfaceId, desc: &SurfaceDesc) {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Fluid Field"),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(desc.format),
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.clear_texture(&view);
        self.textures.insert(
            id,
            GpuTexture {
                texture,
                view,
                desc: *desc,
            },
        );
    }

    fn destroy_surface(&mut self, id: SurfaceId) {
        if let Some(gpu) = self.textures.remove(&id) {
            gpu.texture.destroy();
        }
    }

    fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    fn screen_size(&self) -> (u32, u32) {
        (self.surface_config.width, self.surface_config.height)
    }

    fn resize_screen(&mut self, width: u32, height: u32) {
        let (width, height) = fit_within(width, height, self.max_dimension);
        self.surface_config.width = width;
        self.surface_config.height = height;
        self.surface.configure(&self.device, &self.surface_config);
    }

    fn begin_frame(&mut self) {
        self.acquire_failed = false;
        self.encoder();
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> bool {
        let stage = call.stage();
        let format = match call.target {
            Target::Screen => self.surface_config.format,
            Target::Surface(id) => match self.textures.get(&id) {
                Some(gpu) => texture_format(gpu.desc.format),
                None => {
                    log::error!("{stage} pass targets released surface {id:?}");
                    return false;
                }
            },
        };
        let key = (stage, format, call.blend);
        if !self.ensure_pipeline(key) {
            return false;
        }
        if call.target == Target::Screen && !self.acquire_frame() {
            return false;
        }
        self.encoder();

        let target_view = match call.target {
            Target::Screen => match self.frame.as_ref() {
                Some((_, view)) => view,
                None => return false,
            },
            Target::Surface(id) => match self.textures.get(&id) {
                Some(gpu) => &gpu.view,
                None => return false,
            },
        };

        let mut inputs: Vec<(&wgpu::TextureView, &wgpu::Sampler)> = Vec::with_capacity(MAX_INPUTS);
        for id in call.inputs.iter().take(MAX_INPUTS) {
            match self.textures.get(id) {
                Some(gpu) => inputs.push((&gpu.view, self.sampler(gpu.desc.filter))),
                None => {
                    log::error!("{stage} pass samples released surface {id:?}");
                    return false;
                }
            }
        }
        while inputs.len() < MAX_INPUTS {
            inputs.push((&self.placeholder, &self.linear_sampler));
        }

        let uniform_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Pass Uniforms"),
            contents: bytemuck::cast_slice(&[call.uniforms]),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(stage.label()),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: uniform_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(inputs[0].0) },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::Sampler(inputs[0].1) },
                wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::TextureView(inputs[1].0) },
                wgpu::BindGroupEntry { binding: 4, resource: wgpu::BindingResource::Sampler(inputs[1].1) },
                wgpu::BindGroupEntry { binding: 5, resource: wgpu::BindingResource::TextureView(inputs[2].0) },
                wgpu::BindGroupEntry { binding: 6, resource: wgpu::BindingResource::Sampler(inputs[2].1) },
            ],
        });

        let Some(pipeline) = self.pipelines.get(&key) else {
            return false;
        };
        let Some(encoder) = self.encoder.as_mut() else {
            return false;
        };
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(stage.label()),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1); // Full-screen triangle
        true
    }

    fn end_frame(&mut self) {
        self.flush();
        if let Some((output, _view)) = self.frame.take() {
            output.present();
        }
    }

    fn request_frame(&mut self) {
        self.window.request_redraw();
    }

    fn read_surface(&mut self, id: SurfaceId) -> Option<Vec<[f32; 4]>> {
        self.flush();
        let gpu = self.textures.get(&id)?;
        let SurfaceDesc { width, height, format, .. } = gpu.desc;
        let channels = format.channels();
        let unpadded = width * channels as u32 * 2;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;

        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Staging"),
            size: (padded * height) as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Read"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &gpu.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging_buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = staging_buffer.slice(..);
        let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        match pollster::block_on(receiver.receive()) {
            Some(Ok(())) => {}
            Some(Err(err)) => {
                log::error!("Readback of {id:?} failed: {err}");
                return None;
            }
            None => {
                log::error!("Readback of {id:?} was dropped");
                return None;
            }
        }

        let data = buffer_slice.get_mapped_range();
        let mut texels = Vec::with_capacity((width * height) as usize);
        // Texture rows are top-down; hand them out bottom-up.
        for row in (0..height as usize).rev() {
            let start = row * padded as usize;
            let bytes = &data[start..start + unpadded as usize];
            for texel in bytes.chunks_exact(channels * 2) {
                let mut value = [0.0, 0.0, 0.0, 1.0];
                for (c, half_bytes) in texel.chunks_exact(2).enumerate() {
                    value[c] = half::f16::from_le_bytes([half_bytes[0], half_bytes[1]]).to_f32();
                }
                texels.push(value);
            }
        }
        drop(data);
        staging_buffer.unmap();

        Some(texels)
    }
}
