// Fluid Backdrop - GPU Fluid Simulation Backdrop
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use std::time::Instant;

use crate::solver::MAX_FRAME_DT;

/// Cooperative frame loop state. Stopping takes effect at the next tick
/// boundary and cannot be undone for a given scheduler.
#[derive(Debug)]
pub struct FrameScheduler {
    running: bool,
    stopped: bool,
    last_tick: Option<Instant>,
    frames: u64,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self {
            running: false,
            stopped: false,
            last_tick: None,
            frames: 0,
        }
    }

    pub fn start(&mut self, now: Instant) {
        if self.stopped {
            log::warn!("Frame scheduler already stopped; ignoring start");
            return;
        }
        self.running = true;
        self.last_tick = Some(now);
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.stopped = true;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Clamped seconds since the previous tick, or `None` when stopped.
    pub fn begin_tick(&mut self, now: Instant) -> Option<f32> {
        if !self.running {
            return None;
        }
        let elapsed = match self.last_tick {
            Some(last) => now.saturating_duration_since(last).as_secs_f32(),
            None => 0.0,
        };
        self.last_tick = Some(now);
        self.frames += 1;
        Some(elapsed.min(MAX_FRAME_DT))
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn dt_is_clamped_to_one_sixtieth() {
        let t0 = Instant::now();
        let mut scheduler = FrameScheduler::new();
        scheduler.start(t0);
        assert_eq!(scheduler.begin_tick(t0 + Duration::from_millis(250)), Some(MAX_FRAME_DT));
        let dt = scheduler
            .begin_tick(t0 + Duration::from_millis(258))
            .unwrap();
        assert!((dt - 0.008).abs() < 1e-4);
        assert_eq!(scheduler.frames(), 2);
    }

    #[test]
    fn stop_is_terminal() {
        let t0 = Instant::now();
        let mut scheduler = FrameScheduler::new();
        assert_eq!(scheduler.begin_tick(t0), None);
        scheduler.start(t0);
        scheduler.stop();
        assert_eq!(scheduler.begin_tick(t0), None);
        scheduler.start(t0);
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.frames(), 0);
    }
}
