//! Frame orchestration.
//!
//! The renderer owns the backend, the texture cache and the framebuffer
//! manager, sequences the per-frame phases, converts between emulated and
//! host coordinate spaces, and drives presentation and frame dumping. All
//! entry points here are called synchronously from the emulation thread;
//! only frame-dump encoding leaves it (see [`crate::frame_dump`]).

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::backend::VideoBackend;
use crate::cache::{EntryId, TextureCache};
use crate::config::{AlphaReadMode, AspectMode, EfbScale, StereoMode, VideoConfig};
use crate::error::VideoError;
use crate::format::{AbstractTextureFormat, EfbCopyParams};
use crate::frame_dump::{FrameData, FrameDumper};
use crate::framebuffer::{
    FramebufferManager, EFB_HEIGHT, EFB_WIDTH, MAX_XFB_HEIGHT, MAX_XFB_WIDTH,
};
use crate::guest_mem::GuestMemory;
use crate::rect::{EfbRect, Rectangle, TargetRect};
use crate::stats::FpsCounter;
use crate::texture::{StagingTextureType, TextureConfig};

/// Where the renderer is within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    BuildingFrame,
    Presenting,
}

/// Single-pixel EFB access kinds, as issued by the command interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EfbAccess {
    PeekColor,
    PokeColor,
    PeekZ,
    PokeZ,
}

/// Fraction of flushed draws that must agree before the widescreen
/// heuristic flips. Tunable; the console gives no ground truth.
const WIDESCREEN_VOTE_THRESHOLD: f32 = 0.75;

struct OsdMessage {
    text: String,
    frames_left: u32,
}

pub struct Renderer {
    backend: Box<dyn VideoBackend>,
    cache: TextureCache,
    framebuffer: FramebufferManager,
    config: VideoConfig,

    phase: FramePhase,
    frame_number: u64,
    window_width: u32,
    window_height: u32,
    target_rect: TargetRect,
    alpha_read: AlphaReadMode,

    last_xfb: Option<EntryId>,

    // Widescreen heuristic state, fed by log_flushed_draw.
    draws_wide: u32,
    draws_normal: u32,
    game_is_widescreen: bool,

    dumper: Option<FrameDumper>,
    dump_frames: bool,

    fps: FpsCounter,
    osd: Vec<OsdMessage>,
}

impl Renderer {
    pub fn new(backend: Box<dyn VideoBackend>, config: VideoConfig) -> Result<Self, VideoError> {
        let scale = Self::resolve_scale(&config, backend.as_ref(), 640, 480);
        let framebuffer = FramebufferManager::new(backend.as_ref(), scale, config.msaa_samples)?;
        let cache = TextureCache::new(config.hash_samples, config.efb_copy_cache_enable);
        info!(scale, msaa = config.msaa_samples, "renderer initialized");
        Ok(Self {
            backend,
            cache,
            framebuffer,
            config,
            phase: FramePhase::Idle,
            frame_number: 0,
            window_width: 640,
            window_height: 480,
            target_rect: Rectangle::from_extent(0, 0, 640, 480),
            alpha_read: AlphaReadMode::default(),
            last_xfb: None,
            draws_wide: 0,
            draws_normal: 0,
            game_is_widescreen: false,
            dumper: None,
            dump_frames: false,
            fps: FpsCounter::new(),
            osd: Vec::new(),
        })
    }

    pub fn backend(&self) -> &dyn VideoBackend {
        self.backend.as_ref()
    }

    pub fn cache(&self) -> &TextureCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut TextureCache {
        &mut self.cache
    }

    pub fn framebuffer(&self) -> &FramebufferManager {
        &self.framebuffer
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn set_alpha_read_mode(&mut self, mode: AlphaReadMode) {
        self.alpha_read = mode;
    }

    // -- coordinate transforms -------------------------------------------

    fn resolve_scale(config: &VideoConfig, backend: &dyn VideoBackend, win_w: u32, win_h: u32) -> u32 {
        let scale = match config.efb_scale {
            EfbScale::Integer(n) => n.max(1),
            EfbScale::Auto => {
                // Smallest integer scale covering the window.
                let sx = (win_w.saturating_sub(1)) / EFB_WIDTH + 1;
                let sy = (win_h.saturating_sub(1)) / EFB_HEIGHT + 1;
                sx.max(sy)
            }
        };
        // Never exceed what the backend can allocate.
        let max = backend.caps().max_texture_size / EFB_WIDTH;
        scale.clamp(1, max.max(1))
    }

    pub fn efb_scale(&self) -> u32 {
        self.framebuffer.scale()
    }

    pub fn efb_to_scaled_x(&self, x: i32) -> i32 {
        x * self.framebuffer.scale() as i32
    }

    pub fn efb_to_scaled_y(&self, y: i32) -> i32 {
        y * self.framebuffer.scale() as i32
    }

    /// Host window (backbuffer) size changed. Recomputes the draw
    /// rectangle and, under automatic scaling, the internal resolution.
    pub fn set_window_size(&mut self, width: u32, height: u32) {
        self.window_width = width.max(1);
        self.window_height = height.max(1);
        if self.config.efb_scale == EfbScale::Auto {
            let scale = Self::resolve_scale(
                &self.config,
                self.backend.as_ref(),
                self.window_width,
                self.window_height,
            );
            if scale != self.framebuffer.scale() {
                match FramebufferManager::new(self.backend.as_ref(), scale, self.config.msaa_samples)
                {
                    Ok(fb) => {
                        debug!(scale, "internal resolution rescaled");
                        self.framebuffer = fb;
                    }
                    Err(err) => warn!(%err, "could not rescale framebuffer"),
                }
            }
        }
        self.update_draw_rectangle();
    }

    pub fn is_game_widescreen(&self) -> bool {
        self.game_is_widescreen
    }

    /// Vote from the command interpreter: one flushed draw whose viewport
    /// looked widescreen-shaped (or not).
    pub fn log_flushed_draw(&mut self, widescreen: bool) {
        if widescreen {
            self.draws_wide += 1;
        } else {
            self.draws_normal += 1;
        }
    }

    fn update_widescreen_heuristic(&mut self) {
        let total = self.draws_wide + self.draws_normal;
        if total > 0 {
            let wide = self.draws_wide as f32 / total as f32;
            // Asymmetric flip: only change state on a confident majority,
            // so mixed frames keep the previous answer.
            if wide > WIDESCREEN_VOTE_THRESHOLD {
                self.game_is_widescreen = true;
            } else if (1.0 - wide) > WIDESCREEN_VOTE_THRESHOLD {
                self.game_is_widescreen = false;
            }
        }
        self.draws_wide = 0;
        self.draws_normal = 0;
    }

    /// Displayed width/height ratio after aspect resolution.
    pub fn calculate_draw_aspect_ratio(&self) -> f32 {
        match self.config.aspect_mode {
            AspectMode::Stretch => self.window_width as f32 / self.window_height as f32,
            AspectMode::Analog => 4.0 / 3.0,
            AspectMode::AnalogWide => 16.0 / 9.0,
            AspectMode::Auto => {
                if self.game_is_widescreen {
                    16.0 / 9.0
                } else {
                    4.0 / 3.0
                }
            }
        }
    }

    /// Recompute the on-screen destination rectangle from the window size,
    /// aspect ratio and crop setting. Width and height round down to a
    /// multiple of 4 for video-encoder compatibility.
    pub fn update_draw_rectangle(&mut self) {
        let win_w = self.window_width as f32;
        let win_h = self.window_height as f32;
        let draw_aspect = self.calculate_draw_aspect_ratio();

        let (mut fit_w, mut fit_h) = if self.config.aspect_mode == AspectMode::Stretch {
            (win_w, win_h)
        } else if win_w / win_h >= draw_aspect {
            (win_h * draw_aspect, win_h)
        } else {
            (win_w, win_w / draw_aspect)
        };

        if self.config.crop && self.config.aspect_mode != AspectMode::Stretch {
            // Grow the picture until its 4:3 / 16:9 center region fills the
            // window; the overflow is cropped by the window edges.
            let expected = if self.game_is_widescreen
                || self.config.aspect_mode == AspectMode::AnalogWide
            {
                16.0 / 9.0
            } else {
                4.0 / 3.0
            };
            let crop_w = if win_w / win_h >= expected {
                win_w
            } else {
                win_h * expected
            };
            let crop_h = crop_w / expected;
            let grow = (crop_w / fit_w).max(crop_h / fit_h);
            fit_w *= grow;
            fit_h *= grow;
        }

        let mut width = fit_w as i32;
        let mut height = fit_h as i32;
        width -= width % 4;
        height -= height % 4;
        let left = (self.window_width as i32 - width) / 2;
        let top = (self.window_height as i32 - height) / 2;
        self.target_rect = Rectangle::from_extent(left, top, width, height);
    }

    pub fn target_rectangle(&self) -> TargetRect {
        self.target_rect
    }

    /// Output size for frame dumps: the draw rectangle's dimensions.
    pub fn calculate_output_dimensions(&self) -> (u32, u32) {
        (
            self.target_rect.width().max(4) as u32,
            self.target_rect.height().max(4) as u32,
        )
    }

    /// Split a destination rectangle into per-eye halves for the
    /// side-by-side and top-bottom stereo layouts.
    pub fn convert_stereo_rectangle(&self, rect: &TargetRect) -> (TargetRect, TargetRect) {
        match self.config.stereo_mode {
            StereoMode::TopBottom => {
                let half = rect.height() / 2;
                let left_eye = Rectangle::from_extent(rect.left, rect.top, rect.width(), half);
                let right_eye =
                    Rectangle::from_extent(rect.left, rect.top + half, rect.width(), half);
                (left_eye, right_eye)
            }
            StereoMode::SideBySide => {
                let half = rect.width() / 2;
                let left_eye = Rectangle::from_extent(rect.left, rect.top, half, rect.height());
                let right_eye =
                    Rectangle::from_extent(rect.left + half, rect.top, half, rect.height());
                (left_eye, right_eye)
            }
            _ => (*rect, *rect),
        }
    }

    // -- command-interpreter entry points --------------------------------

    /// The guest issued a draw referencing the EFB.
    pub fn on_draw(&mut self) {
        if self.phase == FramePhase::Idle {
            self.phase = FramePhase::BuildingFrame;
        }
        self.framebuffer.on_draw(self.backend.as_ref());
    }

    pub fn clear_screen(
        &mut self,
        rect: &EfbRect,
        color_enable: bool,
        alpha_enable: bool,
        z_enable: bool,
        color: u32,
        z: u32,
    ) {
        if self.phase == FramePhase::Idle {
            self.phase = FramePhase::BuildingFrame;
        }
        self.framebuffer.clear(
            self.backend.as_ref(),
            rect,
            color_enable,
            alpha_enable,
            z_enable,
            color,
            z,
        );
    }

    /// Single-pixel EFB access. Peeks return ARGB color or 24-bit depth;
    /// pokes return 0.
    pub fn access_efb(&mut self, access: EfbAccess, x: u32, y: u32, poke_data: u32) -> u32 {
        match access {
            EfbAccess::PeekColor => {
                let [r, g, b, stored_a] = self.framebuffer.peek_color(self.backend.as_ref(), x, y);
                self.cache.stats.efb_peeks += 1;
                let a = match self.alpha_read {
                    AlphaReadMode::ReadNone => {
                        if self.framebuffer.efb_format().has_alpha() {
                            stored_a
                        } else {
                            0xff
                        }
                    }
                    AlphaReadMode::ReadFf => 0xff,
                    AlphaReadMode::Read00 => 0x00,
                };
                u32::from_be_bytes([a, r, g, b])
            }
            EfbAccess::PokeColor => {
                self.framebuffer.poke_color(x, y, poke_data);
                self.cache.stats.efb_pokes += 1;
                0
            }
            EfbAccess::PeekZ => {
                self.cache.stats.efb_peeks += 1;
                self.framebuffer.peek_depth(self.backend.as_ref(), x, y)
            }
            EfbAccess::PokeZ => {
                self.framebuffer.poke_depth(x, y, poke_data);
                self.cache.stats.efb_pokes += 1;
                0
            }
        }
    }

    /// Copy an EFB region into guest memory (and the copy cache) in the
    /// requested format. `stride` is the destination pitch in bytes per
    /// block row; `0` selects the format's natural pitch.
    #[allow(clippy::too_many_arguments)]
    pub fn copy_render_target_to_texture(
        &mut self,
        mem: &mut GuestMemory,
        address: u32,
        stride: u32,
        params: &EfbCopyParams,
        src_rect: &EfbRect,
        intensity: bool,
        scale_by_half: bool,
    ) -> Result<Option<EntryId>, VideoError> {
        let pixels = if params.depth {
            self.framebuffer.read_depth_region(self.backend.as_ref(), src_rect)
        } else {
            self.framebuffer.read_color_region(self.backend.as_ref(), src_rect)
        };
        self.cache.copy_render_target_to_texture(
            self.backend.as_ref(),
            mem,
            address,
            stride,
            params,
            &pixels,
            src_rect.width() as u32,
            src_rect.height() as u32,
            scale_by_half,
            intensity,
        )
    }

    // -- swap ------------------------------------------------------------

    /// Guest finished a framebuffer-copy-to-display; present the XFB at
    /// `xfb_addr`. `fb_stride` is in pixels.
    pub fn swap(
        &mut self,
        mem: &GuestMemory,
        xfb_addr: u32,
        fb_width: u32,
        fb_stride: u32,
        fb_height: u32,
        ticks: u64,
    ) {
        self.phase = FramePhase::Presenting;

        // The previous frame's dump encode must finish before its readback
        // buffer slot is reused.
        if let Some(ref mut dumper) = self.dumper {
            dumper.flush();
            if dumper.has_failed() && self.dump_frames {
                warn!("frame dumping disabled after I/O failure");
                self.dump_frames = false;
            }
        }

        self.update_widescreen_heuristic();
        self.framebuffer.flush_pokes(self.backend.as_ref());

        let fb_width = fb_width.min(MAX_XFB_WIDTH);
        let fb_height = fb_height.min(MAX_XFB_HEIGHT);
        let stride_bytes = fb_stride * 2;
        let xfb = self
            .cache
            .get_xfb_texture(self.backend.as_ref(), mem, xfb_addr, fb_width, fb_height, stride_bytes);

        match xfb {
            Some(id) if self.last_xfb != Some(id) => {
                self.last_xfb = Some(id);
                self.update_draw_rectangle();
                self.present(id);
                self.fps.on_frame();
                self.draw_overlay();
                if self.dump_frames || self.screenshot_pending() {
                    self.dump_current_frame(id, ticks);
                }
            }
            Some(_) => {
                // Same XFB content as last time; the guest is repeating a
                // frame. Skip presentation entirely.
                debug!("duplicate xfb, swap skipped");
            }
            None => warn!(addr = xfb_addr, "no xfb texture for swap"),
        }

        self.cache.cleanup();
        self.cache.stats.reset_frame();
        self.frame_number += 1;
        self.phase = FramePhase::Idle;
    }

    fn present(&mut self, id: EntryId) {
        let Some(entry) = self.cache.entry(id) else {
            return;
        };
        let src = entry.texture().config().rect();
        match self.config.stereo_mode {
            StereoMode::SideBySide | StereoMode::TopBottom => {
                let (left_eye, _right_eye) = self.convert_stereo_rectangle(&self.target_rect);
                // One layer per eye would be presented here; the CPU-side
                // backends carry a single layer, so both eyes show it.
                self.backend.present(entry.texture(), &src, &left_eye);
            }
            _ => {
                self.backend.present(entry.texture(), &src, &self.target_rect);
            }
        }
    }

    fn draw_overlay(&mut self) {
        self.osd.retain_mut(|msg| {
            msg.frames_left = msg.frames_left.saturating_sub(1);
            msg.frames_left > 0
        });
        let mut top = 10;
        if self.config.show_fps {
            let text = format!("FPS: {:.1}", self.fps.fps());
            self.backend.render_text(&text, 10, top, 0xffff_ff00);
            top += 20;
        }
        for msg in &self.osd {
            self.backend.render_text(&msg.text, 10, top, 0xffff_ffff);
            top += 20;
        }
    }

    /// Show a transient message in the debug overlay.
    pub fn add_osd_message(&mut self, text: impl Into<String>, frames: u32) {
        self.osd.push(OsdMessage {
            text: text.into(),
            frames_left: frames.max(1),
        });
    }

    // -- frame dumping ---------------------------------------------------

    pub fn start_frame_dumping(&mut self) {
        self.ensure_dumper();
        self.dump_frames = true;
    }

    pub fn stop_frame_dumping(&mut self) {
        self.dump_frames = false;
        if let Some(ref mut dumper) = self.dumper {
            dumper.flush();
        }
    }

    pub fn is_frame_dumping(&self) -> bool {
        self.dump_frames
    }

    /// Save the next presented frame to `path`.
    pub fn save_screenshot(&mut self, path: PathBuf) {
        self.ensure_dumper();
        if let Some(ref dumper) = self.dumper {
            dumper.request_screenshot(path);
        }
    }

    fn screenshot_pending(&self) -> bool {
        self.dumper
            .as_ref()
            .map(|d| d.screenshot_pending())
            .unwrap_or(false)
    }

    fn ensure_dumper(&mut self) {
        if self.dumper.is_none() {
            self.dumper = Some(FrameDumper::new(self.config.frame_dump.clone()));
        }
    }

    fn dump_current_frame(&mut self, id: EntryId, ticks: u64) {
        let Some(entry) = self.cache.entry(id) else {
            return;
        };
        let src_rect = entry.texture().config().rect();

        // Dumps come out at the displayed size, not the XFB's native size.
        let (out_w, out_h) = self.calculate_output_dimensions();
        let config = TextureConfig::new(out_w, out_h, 1, 1, AbstractTextureFormat::Rgba8, true);
        let mut scaled = match self.backend.create_texture(&config) {
            Ok(t) => t,
            Err(err) => {
                warn!(%err, "frame dump target allocation failed");
                return;
            }
        };
        scaled.scale_rectangle_from(entry.texture(), &src_rect, &config.rect());

        let staging = self
            .backend
            .create_staging_texture(StagingTextureType::Readback, &config);
        let mut staging = match staging {
            Ok(s) => s,
            Err(err) => {
                warn!(%err, "frame dump readback allocation failed");
                return;
            }
        };
        staging.copy_from_texture(scaled.as_ref(), &config.rect(), 0, 0, &config.rect());
        staging.flush();
        if !staging.map() {
            warn!("frame dump readback map failed");
            return;
        }
        let stride = staging.mapped_stride();
        let pixels = staging.mapped_data().to_vec();
        staging.unmap();

        let frame = FrameData {
            pixels,
            width: out_w,
            height: out_h,
            stride,
            ticks,
            frame_number: self.frame_number,
            dump: self.dump_frames,
        };
        if let Some(ref mut dumper) = self.dumper {
            let screenshot = dumper.screenshot_pending();
            dumper.queue_frame(frame);
            if screenshot {
                // Synchronous screenshots wait for the encode.
                dumper.flush();
            }
        }
    }

    /// Stop the worker and drain the dump pipeline. Called at emulation
    /// shutdown; also runs on drop.
    pub fn shutdown(&mut self) {
        if let Some(ref mut dumper) = self.dumper {
            dumper.shutdown();
        }
        self.dumper = None;
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
