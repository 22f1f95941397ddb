// Fluid Backdrop - GPU Fluid Simulation Backdrop
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

//! Animated, pointer-reactive fluid backdrop.
//!
//! A [`Backdrop`] owns the GPU device, the linked shading programs, every field
//! surface and the frame scheduler. Hosts forward pointer and resize events
//! through [`Backdrop::input`] and call [`Backdrop::on_frame`] once per display
//! refresh.

pub mod config;
pub mod context;
pub mod error;
pub mod gpu;
pub mod input;
pub mod postfx;
pub mod programs;
pub mod scheduler;
pub mod shaders;
pub mod solver;
pub mod surfaces;

use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use winit::window::Window;

pub use config::{BackColor, SimConfig};
pub use error::{ProgramError, SetupError};
pub use gpu::headless::HeadlessDevice;
pub use gpu::wgpu_device::WgpuDevice;
pub use gpu::GpuDevice;
pub use input::{InputEvent, InputSender, PointerId};

use context::SimulationContext;
use input::{input_queue, InputReceiver, InputTranslator};
use programs::ProgramRegistry;
use scheduler::FrameScheduler;
use solver::PassRunner;
use surfaces::{FieldSet, SurfaceAllocator};

/// Field surfaces that can be read back with [`Backdrop::read_field`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Velocity,
    Dye,
    Pressure,
    Divergence,
    Curl,
    Bloom,
    Sunrays,
}

pub struct Backdrop<D: GpuDevice> {
    device: D,
    programs: ProgramRegistry,
    ctx: SimulationContext,
    scheduler: FrameScheduler,
    input_tx: InputSender,
    input_rx: Option<InputReceiver>,
    on_teardown: Option<Box<dyn FnOnce()>>,
}

/// Acquire the GPU for `window` and start a backdrop on it.
///
/// Fails before any surface is allocated when no adapter, device or
/// presentable format is available.
pub fn setup_window(
    window: Arc<Window>,
    config: SimConfig,
    on_teardown: impl FnOnce() + 'static,
) -> Result<Backdrop<WgpuDevice>, SetupError> {
    let device = pollster::block_on(WgpuDevice::new(window))?;
    Ok(Backdrop::new(device, config, on_teardown))
}

impl<D: GpuDevice> Backdrop<D> {
    pub fn new(device: D, config: SimConfig, on_teardown: impl FnOnce() + 'static) -> Self {
        Self::with_rng(device, config, StdRng::from_entropy(), on_teardown)
    }

    /// Same as [`Backdrop::new`] with a caller-provided random source.
    pub fn with_rng(
        mut device: D,
        mut config: SimConfig,
        rng: StdRng,
        on_teardown: impl FnOnce() + 'static,
    ) -> Self {
        config.sanitize();
        let programs = ProgramRegistry::build(&mut device);

        let screen = device.screen_size();
        let mut allocator = SurfaceAllocator::new();
        let fields = allocator.allocate_fields(&mut device, &config, screen.0, screen.1);

        let mut ctx = SimulationContext {
            config,
            screen,
            allocator,
            fields,
            input: InputTranslator::new(),
            splat_stack: Vec::new(),
            rng,
        };
        ctx.queue_startup_splats();

        let (input_tx, input_rx) = input_queue();
        let mut scheduler = FrameScheduler::new();
        scheduler.start(Instant::now());
        device.request_frame();

        log::info!(
            "Backdrop started at {}x{} (sim {:?}, dye {:?})",
            screen.0,
            screen.1,
            ctx.fields.sim_size,
            ctx.fields.dye_size
        );

        Self {
            device,
            programs,
            ctx,
            scheduler,
            input_tx,
            input_rx: Some(input_rx),
            on_teardown: Some(Box::new(on_teardown)),
        }
    }

    /// Producer handle for pointer and resize events.
    pub fn input(&self) -> InputSender {
        self.input_tx.clone()
    }

    /// One display-refresh tick. Returns false once the backdrop is stopped.
    pub fn on_frame(&mut self, now: Instant) -> bool {
        let Some(dt) = self.scheduler.begin_tick(now) else {
            return false;
        };
        self.drain_input();

        self.device.begin_frame();
        let mut runner = PassRunner::new(&mut self.device, &self.programs);
        solver::step_frame(&mut runner, &mut self.ctx, dt);
        if runner.skipped > 0 {
            log::trace!(
                "Frame {}: {} passes ran, {} skipped",
                self.scheduler.frames(),
                runner.executed,
                runner.skipped
            );
        }
        self.device.end_frame();

        if self.scheduler.is_running() {
            self.device.request_frame();
        }
        true
    }

    fn drain_input(&mut self) {
        let events = match self.input_rx.as_ref() {
            Some(rx) => rx.drain(),
            None => return,
        };
        for event in events {
            match event {
                InputEvent::Resize { width, height } => self.resize(width, height),
                event => self.ctx.input.apply(event, self.ctx.screen, &mut self.ctx.rng),
            }
        }
    }

    /// Resize the screen and replace every field surface. Contents are lost.
    pub fn resize(&mut self, width: u32, height: u32) {
        let (width, height) = gpu::fit_within(width, height, self.device.max_dimension());
        if (width, height) == self.ctx.screen {
            return;
        }
        self.device.resize_screen(width, height);
        self.ctx.screen = (width, height);
        let old = self.ctx.fields.clone();
        self.ctx.fields = self
            .ctx
            .allocator
            .reallocate_all(&mut self.device, old, &self.ctx.config, width, height);
        log::debug!("Resized to {width}x{height}");
    }

    /// Queue `count` ambient splats for the next tick.
    pub fn queue_random_splats(&mut self, count: u32) {
        self.ctx.queue_random_splats(count);
    }

    /// Run the bloom stage over the current dye. Returns false if it was skipped.
    pub fn run_bloom(&mut self) -> bool {
        self.device.begin_frame();
        let mut runner = PassRunner::new(&mut self.device, &self.programs);
        let ran = postfx::apply_bloom(&mut runner, &self.ctx);
        self.device.end_frame();
        ran
    }

    pub fn run_sunrays(&mut self) {
        self.device.begin_frame();
        let mut runner = PassRunner::new(&mut self.device, &self.programs);
        postfx::apply_sunrays(&mut runner, &self.ctx);
        self.device.end_frame();
    }

    /// Read back the current contents of a field, rows bottom-up.
    pub fn read_field(&mut self, field: Field) -> Option<Vec<[f32; 4]>> {
        let fields = &self.ctx.fields;
        let id = match field {
            Field::Velocity => fields.velocity.read().id,
            Field::Dye => fields.dye.read().id,
            Field::Pressure => fields.pressure.read().id,
            Field::Divergence => fields.divergence.id,
            Field::Curl => fields.curl.id,
            Field::Bloom => fields.bloom.id,
            Field::Sunrays => fields.sunrays.id,
        };
        self.device.read_surface(id)
    }

    /// Stop ticking, detach input and notify the host. Later calls do nothing.
    pub fn teardown(&mut self) {
        let Some(callback) = self.on_teardown.take() else {
            return;
        };
        self.scheduler.stop();
        self.input_rx = None;
        log::info!("Backdrop torn down after {} frames", self.scheduler.frames());
        callback();
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn programs(&self) -> &ProgramRegistry {
        &self.programs
    }

    pub fn fields(&self) -> &FieldSet {
        &self.ctx.fields
    }

    pub fn screen(&self) -> (u32, u32) {
        self.ctx.screen
    }

    pub fn allocator(&self) -> &SurfaceAllocator {
        &self.ctx.allocator
    }

    pub fn pointers(&self) -> &[input::Pointer] {
        self.ctx.input.pointers()
    }

    pub fn pending_splat_batches(&self) -> usize {
        self.ctx.splat_stack.len()
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }
}

impl<D: GpuDevice> Drop for Backdrop<D> {
    fn drop(&mut self) {
        self.teardown();
    }
}
