// Fluid Backdrop - GPU Fluid Simulation Backdrop
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const SETTINGS_FILE_NAME: &str = "fluid_settings.json";

/// Background color in 0..=255 channel units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BackColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl BackColor {
    pub fn normalized(&self) -> [f32; 3] {
        [self.r / 255.0, self.g / 255.0, self.b / 255.0]
    }
}

impl Default for BackColor {
    fn default() -> Self {
        Self { r: 0.0, g: 0.0, b: 0.0 }
    }
}

/// Per-session simulation knobs. Changing any of them requires a new setup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SimConfig {
    pub sim_resolution: u32,      // longest edge of the velocity/pressure grid
    pub dye_resolution: u32,      // longest edge of the dye grid
    pub capture_resolution: u32,  // reserved
    pub density_dissipation: f32, // per-frame dye multiplier
    pub velocity_dissipation: f32,
    pub pressure: f32,            // reserved, pressure is cleared to zero each frame
    pub pressure_iterations: u32,
    pub curl: f32,
    pub splat_radius: f32,
    pub splat_force: f32,         // reserved, splats scale with the pointer delta
    pub shading: bool,            // reserved
    pub color_update_speed: f32,  // reserved
    pub back_color: BackColor,
    pub transparent: bool,
    pub bloom_iterations: u32,
    pub bloom_resolution: u32,
    pub bloom_intensity: f32,
    pub bloom_threshold: f32,
    pub bloom_soft_knee: f32,
    pub sunrays_resolution: u32,
    pub sunrays_weight: f32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            sim_resolution: 128,
            dye_resolution: 1024,
            capture_resolution: 512,
            density_dissipation: 0.99,  // dye lingers
            velocity_dissipation: 0.98, // motion settles faster
            pressure: 0.8,
            pressure_iterations: 20,
            curl: 30.0,
            splat_radius: 0.25,
            splat_force: 6000.0,
            shading: true,
            color_update_speed: 10.0,
            back_color: BackColor::default(),
            transparent: false,
            bloom_iterations: 8,
            bloom_resolution: 256,
            bloom_intensity: 0.8,
            bloom_threshold: 0.6,
            bloom_soft_knee: 0.7,
            sunrays_resolution: 196,
            sunrays_weight: 1.0,
        }
    }
}

impl SimConfig {
    pub fn default_path() -> PathBuf {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(SETTINGS_FILE_NAME)
    }

    pub fn load_from_disk(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&data)?;
        config.sanitize();
        Ok(config)
    }

    pub fn save_to_disk(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn sanitize(&mut self) {
        self.sim_resolution = self.sim_resolution.clamp(8, 2048);
        self.dye_resolution = self.dye_resolution.clamp(8, 4096);
        self.capture_resolution = self.capture_resolution.clamp(8, 4096);
        self.density_dissipation = self.density_dissipation.clamp(0.0, 1.0);
        self.velocity_dissipation = self.velocity_dissipation.clamp(0.0, 1.0);
        self.pressure = self.pressure.clamp(0.0, 1.0);
        self.pressure_iterations = self.pressure_iterations.min(200);
        self.curl = self.curl.clamp(0.0, 100.0);
        self.splat_radius = self.splat_radius.clamp(0.01, 1.0);
        self.color_update_speed = self.color_update_speed.clamp(0.0, 100.0);
        self.back_color.r = self.back_color.r.clamp(0.0, 255.0);
        self.back_color.g = self.back_color.g.clamp(0.0, 255.0);
        self.back_color.b = self.back_color.b.clamp(0.0, 255.0);
        self.bloom_iterations = self.bloom_iterations.clamp(1, 16);
        self.bloom_resolution = self.bloom_resolution.clamp(8, 2048);
        self.bloom_intensity = self.bloom_intensity.clamp(0.0, 2.0);
        self.bloom_threshold = self.bloom_threshold.clamp(0.0, 1.0);
        self.bloom_soft_knee = self.bloom_soft_knee.clamp(0.001, 1.0);
        self.sunrays_resolution = self.sunrays_resolution.clamp(8, 2048);
        self.sunrays_weight = self.sunrays_weight.clamp(0.0, 2.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: SimConfig =
            serde_json::from_str(r#"{ "PRESSURE_ITERATIONS": 5, "TRANSPARENT": true }"#).unwrap();
        assert_eq!(config.pressure_iterations, 5);
        assert!(config.transparent);
        assert_eq!(config.sim_resolution, 128);
        assert_eq!(config.back_color, BackColor::default());
    }

    #[test]
    fn back_color_uses_nested_rgb_object() {
        let config: SimConfig =
            serde_json::from_str(r#"{ "BACK_COLOR": { "r": 255, "g": 0, "b": 51 } }"#).unwrap();
        assert_eq!(config.back_color.normalized(), [1.0, 0.0, 0.2]);
    }

    #[test]
    fn sanitize_clamps_out_of_range_knobs() {
        let mut config = SimConfig {
            density_dissipation: 3.0,
            velocity_dissipation: -1.0,
            sim_resolution: 0,
            pressure_iterations: 10_000,
            ..SimConfig::default()
        };
        config.sanitize();
        assert_eq!(config.density_dissipation, 1.0);
        assert_eq!(config.velocity_dissipation, 0.0);
        assert_eq!(config.sim_resolution, 8);
        assert_eq!(config.pressure_iterations, 200);
    }

    #[test]
    fn settings_survive_a_disk_round_trip() {
        let dir = std::env::temp_dir().join(format!("fluid-backdrop-{}", std::process::id()));
        let path = dir.join(SETTINGS_FILE_NAME);
        let config = SimConfig {
            curl: 12.5,
            transparent: true,
            ..SimConfig::default()
        };
        config.save_to_disk(&path).unwrap();
        let loaded = SimConfig::load_from_disk(&path).unwrap();
        assert_eq!(loaded, config);
        let _ = fs::remove_dir_all(&dir);
    }
}
