// Fluid Backdrop - GPU Fluid Simulation Backdrop
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use thiserror::Error;

/// Setup could not acquire a usable graphics context. Nothing was allocated.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to create a drawable surface: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),
    #[error("no compatible graphics adapter found")]
    NoAdapter,
    #[error("failed to open graphics device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
    #[error("surface reports no supported texture formats")]
    NoSurfaceFormat,
}

/// A shader stage that could not be turned into a usable program.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProgramError {
    #[error("failed to compile {stage} shader: {log}")]
    Compile { stage: String, log: String },
    #[error("failed to link {stage} program: {log}")]
    Link { stage: String, log: String },
    #[error("shared vertex stage is unavailable")]
    VertexUnavailable,
}
