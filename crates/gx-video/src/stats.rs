//! Per-frame counters and the FPS estimate shown by the debug overlay.

use std::time::{Duration, Instant};

#[derive(Debug, Default, Clone, Copy)]
pub struct FrameStats {
    pub textures_created: u64,
    pub textures_uploaded: u64,
    pub textures_aliased: u64,
    pub efb_copies: u64,
    pub efb_peeks: u64,
    pub efb_pokes: u64,
    pub partial_updates: u64,
    pub entries_evicted: u64,
    pub pool_hits: u64,
}

impl FrameStats {
    pub fn reset_frame(&mut self) {
        *self = Self::default();
    }
}

/// Sliding-window frames-per-second counter, updated once per swap.
pub struct FpsCounter {
    window_start: Instant,
    frames_in_window: u32,
    fps: f64,
}

const WINDOW: Duration = Duration::from_millis(500);

impl FpsCounter {
    pub fn new() -> Self {
        Self {
            window_start: Instant::now(),
            frames_in_window: 0,
            fps: 0.0,
        }
    }

    pub fn on_frame(&mut self) {
        self.frames_in_window += 1;
        let elapsed = self.window_start.elapsed();
        if elapsed >= WINDOW {
            self.fps = self.frames_in_window as f64 / elapsed.as_secs_f64();
            self.window_start = Instant::now();
            self.frames_in_window = 0;
        }
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}
