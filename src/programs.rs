// Fluid Backdrop - GPU Fluid Simulation Backdrop
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

//! Shading program registry.
//!
//! Every stage is compiled once at setup. Failures are logged and remembered;
//! the solver asks for a [`Program`] before each pass and skips the pass when
//! none is available, so a broken shader never reaches a draw call.

use std::collections::HashMap;
use std::fmt;

use crate::error::ProgramError;
use crate::gpu::{FieldFormat, GpuDevice};
use crate::shaders;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Clear,
    Color,
    Splat,
    Advection,
    Curl,
    Vorticity,
    Divergence,
    Pressure,
    GradientSubtract,
    Display,
    BloomPrefilter,
    BloomBlur,
    BloomFinal,
    SunraysMask,
    Sunrays,
    Blur,
}

impl Stage {
    pub const ALL: [Stage; 16] = [
        Stage::Clear,
        Stage::Color,
        Stage::Splat,
        Stage::Advection,
        Stage::Curl,
        Stage::Vorticity,
        Stage::Divergence,
        Stage::Pressure,
        Stage::GradientSubtract,
        Stage::Display,
        Stage::BloomPrefilter,
        Stage::BloomBlur,
        Stage::BloomFinal,
        Stage::SunraysMask,
        Stage::Sunrays,
        Stage::Blur,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Stage::Clear => "clear",
            Stage::Color => "color",
            Stage::Splat => "splat",
            Stage::Advection => "advection",
            Stage::Curl => "curl",
            Stage::Vorticity => "vorticity",
            Stage::Divergence => "divergence",
            Stage::Pressure => "pressure",
            Stage::GradientSubtract => "gradient subtract",
            Stage::Display => "display",
            Stage::BloomPrefilter => "bloom prefilter",
            Stage::BloomBlur => "bloom blur",
            Stage::BloomFinal => "bloom final",
            Stage::SunraysMask => "sunrays mask",
            Stage::Sunrays => "sunrays",
            Stage::Blur => "blur",
        }
    }

    /// Format the stage usually renders into; `None` means the screen.
    /// Backends link against this format first and add variants on demand.
    pub fn primary_format(self) -> Option<FieldFormat> {
        match self {
            Stage::Color | Stage::Display => None,
            Stage::Splat | Stage::Advection | Stage::Vorticity | Stage::GradientSubtract => {
                Some(FieldFormat::Rg16Float)
            }
            Stage::BloomPrefilter | Stage::BloomBlur | Stage::BloomFinal | Stage::SunraysMask => {
                Some(FieldFormat::Rgba16Float)
            }
            Stage::Clear
            | Stage::Curl
            | Stage::Divergence
            | Stage::Pressure
            | Stage::Sunrays
            | Stage::Blur => Some(FieldFormat::R16Float),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Proof that a stage compiled and linked. Only the registry hands these out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Program {
    stage: Stage,
}

impl Program {
    pub fn stage(self) -> Stage {
        self.stage
    }
}

pub struct ProgramRegistry {
    programs: HashMap<Stage, Result<Program, ProgramError>>,
}

impl ProgramRegistry {
    pub fn build<D: GpuDevice + ?Sized>(device: &mut D) -> Self {
        let vertex = device.compile_vertex(shaders::VERTEX);
        if let Err(err) = &vertex {
            log::error!("{err}");
        }

        let mut programs = HashMap::with_capacity(Stage::ALL.len());
        for stage in Stage::ALL {
            let result = match &vertex {
                Ok(()) => device
                    .link_program(stage, &shaders::fragment_source(stage))
                    .map(|()| Program { stage }),
                Err(_) => Err(ProgramError::VertexUnavailable),
            };
            if let Err(err) = &result {
                log::error!("{stage} stage disabled: {err}");
            }
            programs.insert(stage, result);
        }

        let ready = programs.values().filter(|r| r.is_ok()).count();
        log::info!("Linked {ready}/{} shading programs", Stage::ALL.len());

        Self { programs }
    }

    pub fn program(&self, stage: Stage) -> Option<Program> {
        match self.programs.get(&stage) {
            Some(Ok(program)) => Some(*program),
            _ => None,
        }
    }

    pub fn error(&self, stage: Stage) -> Option<&ProgramError> {
        self.programs.get(&stage).and_then(|r| r.as_ref().err())
    }

    pub fn failed_stages(&self) -> Vec<Stage> {
        let mut failed: Vec<Stage> = self
            .programs
            .iter()
            .filter(|(_, r)| r.is_err())
            .map(|(stage, _)| *stage)
            .collect();
        failed.sort();
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless::HeadlessDevice;

    #[test]
    fn every_stage_links_on_a_healthy_device() {
        let mut device = HeadlessDevice::new(64, 64);
        let registry = ProgramRegistry::build(&mut device);
        for stage in Stage::ALL {
            assert_eq!(registry.program(stage).map(Program::stage), Some(stage));
        }
        assert!(registry.failed_stages().is_empty());
    }

    #[test]
    fn failed_link_yields_no_program_and_keeps_diagnostic() {
        let mut device = HeadlessDevice::new(64, 64).with_failing_stages(&[Stage::Curl]);
        let registry = ProgramRegistry::build(&mut device);
        assert!(registry.program(Stage::Curl).is_none());
        assert!(matches!(
            registry.error(Stage::Curl),
            Some(ProgramError::Link { .. })
        ));
        assert!(registry.program(Stage::Advection).is_some());
        assert_eq!(registry.failed_stages(), vec![Stage::Curl]);
    }

    #[test]
    fn broken_vertex_stage_disables_everything() {
        let mut device = HeadlessDevice::new(64, 64).with_failing_vertex();
        let registry = ProgramRegistry::build(&mut device);
        assert_eq!(registry.failed_stages().len(), Stage::ALL.len());
        assert_eq!(
            registry.error(Stage::Display),
            Some(&ProgramError::VertexUnavailable)
        );
    }
}
