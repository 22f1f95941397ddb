// Fluid Backdrop - GPU Fluid Simulation Backdrop
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use fluid_backdrop::{setup_window, Field, InputEvent, PointerId, SimConfig};
use winit::{
    event::{ElementState, Event, KeyEvent, MouseButton, Touch, TouchPhase, WindowEvent},
    event_loop::EventLoop,
    keyboard::{KeyCode, PhysicalKey},
};

/// Config from the first CLI argument, else the settings file next to the
/// working directory, else defaults.
fn load_config() -> SimConfig {
    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(SimConfig::default_path);
    if !path.exists() {
        log::info!("No settings at {}, using defaults", path.display());
        return SimConfig::default();
    }
    match SimConfig::load_from_disk(&path) {
        Ok(config) => {
            log::info!("Loaded settings from {}", path.display());
            config
        }
        Err(err) => {
            log::warn!("Failed to load {}: {err:#}", path.display());
            SimConfig::default()
        }
    }
}

fn main() -> anyhow::Result<()> {
    use env_logger::Env;
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = load_config();

    let event_loop = EventLoop::new()?;
    #[allow(deprecated)]
    let window = Arc::new(
        event_loop.create_window(
            winit::window::WindowAttributes::default()
                .with_title("Fluid Backdrop")
                .with_inner_size(winit::dpi::LogicalSize::new(1280, 720)),
        )?,
    );

    let torn_down = Rc::new(Cell::new(false));
    let flag = torn_down.clone();
    let mut backdrop = match setup_window(window.clone(), config, move || flag.set(true)) {
        Ok(backdrop) => Some(backdrop),
        Err(err) => {
            // The window stays up without the effect.
            log::error!("Fluid backdrop unavailable: {err}");
            None
        }
    };
    if let Some(backdrop) = backdrop.as_ref() {
        let failed = backdrop.programs().failed_stages();
        if !failed.is_empty() {
            log::warn!("Running without {} shading stages: {failed:?}", failed.len());
        }
    }
    let input = backdrop.as_ref().map(|b| b.input());
    let send = move |event: InputEvent| {
        if let Some(input) = input.as_ref() {
            if !input.send(event) {
                log::trace!("Input dropped after teardown: {event:?}");
            }
        }
    };

    let mut cursor = (0.0f32, 0.0f32);

    #[allow(deprecated)]
    event_loop.run(move |event, target| {
        if let Event::WindowEvent { event, window_id } = event {
            if window_id != window.id() {
                return;
            }
            match event {
                WindowEvent::CloseRequested => {
                    if let Some(backdrop) = backdrop.as_mut() {
                        backdrop.teardown();
                    }
                    target.exit();
                }
                WindowEvent::Resized(physical_size) => {
                    send(InputEvent::Resize {
                        width: physical_size.width,
                        height: physical_size.height,
                    });
                }
                WindowEvent::KeyboardInput {
                    event:
                        KeyEvent {
                            physical_key,
                            state: ElementState::Pressed,
                            ..
                        },
                    ..
                } => {
                    let Some(backdrop) = backdrop.as_mut() else {
                        if physical_key == PhysicalKey::Code(KeyCode::Escape) {
                            target.exit();
                        }
                        return;
                    };
                    match physical_key {
                        PhysicalKey::Code(KeyCode::Space) => {
                            let count = rand::random::<u32>() % 20 + 5;
                            backdrop.queue_random_splats(count);
                        }
                        PhysicalKey::Code(KeyCode::KeyB) => {
                            if backdrop.run_bloom() {
                                if let Some(bloom) = backdrop.read_field(Field::Bloom) {
                                    let peak = bloom
                                        .iter()
                                        .map(|t| t[0].max(t[1]).max(t[2]))
                                        .fold(0.0f32, f32::max);
                                    log::info!("Bloom peak brightness {peak:.3}");
                                }
                            }
                        }
                        PhysicalKey::Code(KeyCode::KeyR) => {
                            backdrop.run_sunrays();
                            if let Some(rays) = backdrop.read_field(Field::Sunrays) {
                                let mean = rays.iter().map(|t| t[0]).sum::<f32>() / rays.len().max(1) as f32;
                                log::info!("Sunrays mean intensity {mean:.3}");
                            }
                        }
                        PhysicalKey::Code(KeyCode::Escape) => {
                            backdrop.teardown();
                        }
                        _ => {}
                    }
                }
                WindowEvent::MouseInput {
                    state: button_state,
                    button: MouseButton::Left,
                    ..
                } => {
                    let (x, y) = cursor;
                    send(match button_state {
                        ElementState::Pressed => InputEvent::Press { id: PointerId::Mouse, x, y },
                        ElementState::Released => InputEvent::Release { id: PointerId::Mouse },
                    });
                }
                WindowEvent::CursorMoved { position, .. } => {
                    cursor = (position.x as f32, position.y as f32);
                    send(InputEvent::Move {
                        id: PointerId::Mouse,
                        x: cursor.0,
                        y: cursor.1,
                    });
                }
                WindowEvent::Touch(Touch {
                    phase, location, id, ..
                }) => {
                    let (id, x, y) = (PointerId::Touch(id), location.x as f32, location.y as f32);
                    send(match phase {
                        TouchPhase::Started => InputEvent::Press { id, x, y },
                        TouchPhase::Moved => InputEvent::Move { id, x, y },
                        TouchPhase::Ended | TouchPhase::Cancelled => InputEvent::Release { id },
                    });
                }
                WindowEvent::RedrawRequested => {
                    if let Some(backdrop) = backdrop.as_mut() {
                        backdrop.on_frame(std::time::Instant::now());
                    }
                }
                _ => {}
            }
        }

        if torn_down.get() {
            log::info!("Backdrop stopped, closing");
            target.exit();
        }
    })?;

    Ok(())
}
