// Fluid Backdrop - GPU Fluid Simulation Backdrop
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

//! Pointer and touch input.
//!
//! Hosts push [`InputEvent`]s through an [`InputSender`] from wherever their
//! callbacks run. The queue is drained once per tick, so pointer state only
//! ever changes on the frame thread.

use std::sync::mpsc;

use glam::Vec2;
use rand::Rng;

/// Velocity impulse per pixel of pointer drag.
pub const DRAG_IMPULSE_PER_PIXEL: f32 = 8.0;

/// Dye impulses are kept faint so overlapping strokes don't saturate.
const POINTER_COLOR_SCALE: f32 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerId {
    Mouse,
    Touch(u64),
}

/// Coordinates are device pixels with the origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    Press { id: PointerId, x: f32, y: f32 },
    Move { id: PointerId, x: f32, y: f32 },
    Release { id: PointerId },
    Resize { width: u32, height: u32 },
}

#[derive(Debug, Clone)]
pub struct InputSender(mpsc::Sender<InputEvent>);

impl InputSender {
    /// Returns false once the backdrop has been torn down.
    pub fn send(&self, event: InputEvent) -> bool {
        self.0.send(event).is_ok()
    }
}

#[derive(Debug)]
pub struct InputReceiver(mpsc::Receiver<InputEvent>);

impl InputReceiver {
    pub fn drain(&self) -> Vec<InputEvent> {
        self.0.try_iter().collect()
    }
}

pub fn input_queue() -> (InputSender, InputReceiver) {
    let (tx, rx) = mpsc::channel();
    (InputSender(tx), InputReceiver(rx))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pointer {
    pub id: PointerId,
    /// Last known position in pixels.
    pub position: Vec2,
    /// Normalized position, y pointing up.
    pub texcoord: Vec2,
    /// Pixel movement accumulated since the last splat.
    pub delta: Vec2,
    pub down: bool,
    pub moved: bool,
    pub color: [f32; 3],
}

/// One impulse for the solver: velocity and dye injected at `point`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplatCommand {
    pub point: Vec2,
    pub velocity: Vec2,
    pub color: [f32; 3],
}

#[derive(Debug, Default)]
pub struct InputTranslator {
    pointers: Vec<Pointer>,
}

impl InputTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pointers(&self) -> &[Pointer] {
        &self.pointers
    }

    pub fn pointer(&self, id: PointerId) -> Option<&Pointer> {
        self.pointers.iter().find(|p| p.id == id)
    }

    /// Pointer events only; resize is handled by the caller.
    pub fn apply<R: Rng + ?Sized>(&mut self, event: InputEvent, screen: (u32, u32), rng: &mut R) {
        match event {
            InputEvent::Press { id, x, y } => self.press(id, Vec2::new(x, y), screen, rng),
            InputEvent::Move { id, x, y } => self.move_to(id, Vec2::new(x, y), screen),
            InputEvent::Release { id } => self.release(id),
            InputEvent::Resize { .. } => {}
        }
    }

    pub fn press<R: Rng + ?Sized>(
        &mut self,
        id: PointerId,
        position: Vec2,
        screen: (u32, u32),
        rng: &mut R,
    ) {
        let index = self.slot_for(id);
        let pointer = &mut self.pointers[index];
        pointer.id = id;
        pointer.position = position;
        pointer.texcoord = texcoord(position, screen);
        pointer.delta = Vec2::ZERO;
        pointer.down = true;
        pointer.moved = false;
        pointer.color = generate_color(rng);
    }

    pub fn move_to(&mut self, id: PointerId, position: Vec2, screen: (u32, u32)) {
        let Some(pointer) = self.pointers.iter_mut().find(|p| p.id == id && p.down) else {
            log::trace!("Ignoring move for inactive pointer {id:?}");
            return;
        };
        pointer.delta += position - pointer.position;
        pointer.position = position;
        pointer.texcoord = texcoord(position, screen);
        pointer.moved = pointer.delta != Vec2::ZERO;
    }

    pub fn release(&mut self, id: PointerId) {
        match self.pointers.iter_mut().find(|p| p.id == id) {
            Some(pointer) => pointer.down = false,
            None => log::trace!("Ignoring release for unknown pointer {id:?}"),
        }
    }

    /// Splat commands for every pointer that moved since the last call.
    pub fn take_moved(&mut self) -> Vec<SplatCommand> {
        let mut splats = Vec::new();
        for pointer in self.pointers.iter_mut().filter(|p| p.moved) {
            splats.push(SplatCommand {
                point: pointer.texcoord,
                velocity: Vec2::new(pointer.delta.x, -pointer.delta.y) * DRAG_IMPULSE_PER_PIXEL,
                color: pointer.color,
            });
            pointer.moved = false;
            pointer.delta = Vec2::ZERO;
        }
        splats
    }

    fn slot_for(&mut self, id: PointerId) -> usize {
        if let Some(index) = self.pointers.iter().position(|p| p.id == id) {
            return index;
        }
        // Touch ids keep increasing on most platforms; recycle released contacts
        // so the set only grows to the peak number of simultaneous touches.
        if matches!(id, PointerId::Touch(_)) {
            if let Some(index) = self
                .pointers
                .iter()
                .position(|p| !p.down && matches!(p.id, PointerId::Touch(_)))
            {
                return index;
            }
        }
        self.pointers.push(Pointer {
            id,
            position: Vec2::ZERO,
            texcoord: Vec2::ZERO,
            delta: Vec2::ZERO,
            down: false,
            moved: false,
            color: [0.0; 3],
        });
        self.pointers.len() - 1
    }
}

fn texcoord(position: Vec2, screen: (u32, u32)) -> Vec2 {
    let (w, h) = (screen.0.max(1) as f32, screen.1.max(1) as f32);
    Vec2::new(position.x / w, 1.0 - position.y / h)
}

/// Random fully saturated hue, scaled down for dye injection.
pub fn generate_color<R: Rng + ?Sized>(rng: &mut R) -> [f32; 3] {
    let [r, g, b] = hsv_to_rgb(rng.gen::<f32>(), 1.0, 1.0);
    [r * POINTER_COLOR_SCALE, g * POINTER_COLOR_SCALE, b * POINTER_COLOR_SCALE]
}

pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [f32; 3] {
    let i = (h * 6.0).floor();
    let f = h * 6.0 - i;
    let p = v * (1.0 - s);
    let q = v * (1.0 - f * s);
    let t = v * (1.0 - (1.0 - f) * s);
    match (i as i32).rem_euclid(6) {
        0 => [v, t, p],
        1 => [q, v, p],
        2 => [p, v, t],
        3 => [p, q, v],
        4 => [t, p, v],
        _ => [v, p, q],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const SCREEN: (u32, u32) = (800, 600);

    #[test]
    fn drag_produces_flipped_texcoord_and_inverted_dy() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut input = InputTranslator::new();
        input.press(PointerId::Mouse, Vec2::new(350.0, 320.0), SCREEN, &mut rng);
        input.move_to(PointerId::Mouse, Vec2::new(400.0, 300.0), SCREEN);

        let splats = input.take_moved();
        assert_eq!(splats.len(), 1);
        assert_eq!(splats[0].point, Vec2::new(0.5, 0.5));
        assert_eq!(
            splats[0].velocity,
            Vec2::new(50.0, 20.0) * DRAG_IMPULSE_PER_PIXEL
        );
        assert!(input.take_moved().is_empty());
    }

    #[test]
    fn moves_accumulate_until_the_next_splat() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut input = InputTranslator::new();
        input.press(PointerId::Mouse, Vec2::new(0.0, 0.0), SCREEN, &mut rng);
        input.move_to(PointerId::Mouse, Vec2::new(10.0, 0.0), SCREEN);
        input.move_to(PointerId::Mouse, Vec2::new(25.0, 0.0), SCREEN);
        let splats = input.take_moved();
        assert_eq!(splats[0].velocity.x, 25.0 * DRAG_IMPULSE_PER_PIXEL);
    }

    #[test]
    fn move_without_press_is_ignored() {
        let mut input = InputTranslator::new();
        input.move_to(PointerId::Touch(7), Vec2::new(10.0, 10.0), SCREEN);
        input.release(PointerId::Touch(7));
        assert!(input.pointers().is_empty());
        assert!(input.take_moved().is_empty());
    }

    #[test]
    fn release_keeps_pointer_but_stops_tracking() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut input = InputTranslator::new();
        input.press(PointerId::Mouse, Vec2::new(5.0, 5.0), SCREEN, &mut rng);
        input.release(PointerId::Mouse);
        input.move_to(PointerId::Mouse, Vec2::new(50.0, 5.0), SCREEN);
        assert_eq!(input.pointers().len(), 1);
        assert!(!input.pointers()[0].down);
        assert!(input.take_moved().is_empty());
    }

    #[test]
    fn touch_set_grows_to_peak_contacts_and_reuses_slots() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut input = InputTranslator::new();
        input.press(PointerId::Touch(1), Vec2::new(10.0, 10.0), SCREEN, &mut rng);
        input.press(PointerId::Touch(2), Vec2::new(20.0, 20.0), SCREEN, &mut rng);
        assert_eq!(input.pointers().len(), 2);

        input.release(PointerId::Touch(1));
        input.press(PointerId::Touch(3), Vec2::new(30.0, 30.0), SCREEN, &mut rng);
        assert_eq!(input.pointers().len(), 2);
        assert!(input.pointer(PointerId::Touch(3)).unwrap().down);
        assert!(input.pointer(PointerId::Touch(2)).unwrap().down);

        // Contact 2 keeps its identity through its own move.
        input.move_to(PointerId::Touch(2), Vec2::new(25.0, 20.0), SCREEN);
        let splats = input.take_moved();
        assert_eq!(splats.len(), 1);
        assert_eq!(splats[0].velocity, Vec2::new(5.0, 0.0) * DRAG_IMPULSE_PER_PIXEL);
    }

    #[test]
    fn press_assigns_fresh_faint_color() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut input = InputTranslator::new();
        input.press(PointerId::Mouse, Vec2::ZERO, SCREEN, &mut rng);
        let color = input.pointers()[0].color;
        assert!(color.iter().all(|c| (0.0..=POINTER_COLOR_SCALE).contains(c)));
        assert!(color.iter().any(|c| *c > 0.0));
    }

    #[test]
    fn queue_reports_detached_receiver() {
        let (tx, rx) = input_queue();
        assert!(tx.send(InputEvent::Release { id: PointerId::Mouse }));
        assert_eq!(rx.drain().len(), 1);
        drop(rx);
        assert!(!tx.send(InputEvent::Release { id: PointerId::Mouse }));
    }

    #[test]
    fn hsv_primaries() {
        assert_eq!(hsv_to_rgb(0.0, 1.0, 1.0), [1.0, 0.0, 0.0]);
        assert_eq!(hsv_to_rgb(1.0 / 3.0, 1.0, 1.0)[1], 1.0);
    }
}
