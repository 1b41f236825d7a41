//! The virtual EFB.
//!
//! Owns the color/depth render targets the guest draws into (at the
//! configured internal scale), the single-sample resolve targets used when
//! multisampling is on, and the CPU peek/poke machinery. Single-pixel
//! reads are batched at 64x64-tile granularity to amortize GPU-to-CPU
//! synchronization; the whole tile cache is invalidated whenever anything
//! draws to the EFB.

use tracing::debug;

use crate::backend::{EfbPokeData, VideoBackend};
use crate::error::VideoError;
use crate::format::{AbstractTextureFormat, EfbFormat, PixelFormatConversion};
use crate::rect::{EfbRect, Rectangle, TargetRect};
use crate::texture::{AbstractStagingTexture, AbstractTexture, StagingTextureType, TextureConfig};

/// Native EFB dimensions.
pub const EFB_WIDTH: u32 = 640;
pub const EFB_HEIGHT: u32 = 528;

/// Largest XFB the console can scan out.
pub const MAX_XFB_WIDTH: u32 = 720;
pub const MAX_XFB_HEIGHT: u32 = 574;

/// Depth values are 24-bit; this is the largest representable value as a
/// fraction of the float depth range.
pub const GX_MAX_DEPTH: f32 = 16_777_215.0 / 16_777_216.0;

/// Edge length of one peek-cache tile.
const PEEK_TILE: u32 = 64;

const TILES_X: u32 = (EFB_WIDTH + PEEK_TILE - 1) / PEEK_TILE;
const TILES_Y: u32 = (EFB_HEIGHT + PEEK_TILE - 1) / PEEK_TILE;

pub struct FramebufferManager {
    color: Box<dyn AbstractTexture>,
    depth: Box<dyn AbstractTexture>,
    /// Scratch color target `reinterpret_pixel_data` writes into before the
    /// swap; reinterpreting a texture into itself would alias reads with
    /// writes.
    color_temp: Box<dyn AbstractTexture>,
    resolved_color: Option<Box<dyn AbstractTexture>>,
    resolved_depth: Option<Box<dyn AbstractTexture>>,

    /// Native-resolution targets peeked tiles are downscaled into.
    read_color: Box<dyn AbstractTexture>,
    read_depth: Box<dyn AbstractTexture>,
    readback_color: Box<dyn AbstractStagingTexture>,
    readback_depth: Box<dyn AbstractStagingTexture>,

    peek_color: Vec<[u8; 4]>,
    peek_depth: Vec<f32>,
    tile_valid: Vec<bool>,

    pending_color_pokes: Vec<EfbPokeData>,
    pending_depth_pokes: Vec<EfbPokeData>,

    scale: u32,
    msaa_samples: u32,
    efb_format: EfbFormat,
}

impl FramebufferManager {
    pub fn new(
        backend: &dyn VideoBackend,
        scale: u32,
        msaa_samples: u32,
    ) -> Result<Self, VideoError> {
        let width = EFB_WIDTH * scale;
        let height = EFB_HEIGHT * scale;
        let color_config =
            TextureConfig::new(width, height, 1, 1, AbstractTextureFormat::Rgba8, true);
        let depth_config =
            TextureConfig::new(width, height, 1, 1, AbstractTextureFormat::D32F, true);
        let native_color =
            TextureConfig::new(EFB_WIDTH, EFB_HEIGHT, 1, 1, AbstractTextureFormat::Rgba8, true);
        let native_depth =
            TextureConfig::new(EFB_WIDTH, EFB_HEIGHT, 1, 1, AbstractTextureFormat::D32F, true);

        let multisampled = msaa_samples > 1;
        Ok(Self {
            color: backend.create_texture(&color_config)?,
            depth: backend.create_texture(&depth_config)?,
            color_temp: backend.create_texture(&color_config)?,
            resolved_color: if multisampled {
                Some(backend.create_texture(&color_config)?)
            } else {
                None
            },
            resolved_depth: if multisampled {
                Some(backend.create_texture(&depth_config)?)
            } else {
                None
            },
            read_color: backend.create_texture(&native_color)?,
            read_depth: backend.create_texture(&native_depth)?,
            readback_color: backend
                .create_staging_texture(StagingTextureType::Readback, &native_color)?,
            readback_depth: backend
                .create_staging_texture(StagingTextureType::Readback, &native_depth)?,
            peek_color: vec![[0; 4]; (EFB_WIDTH * EFB_HEIGHT) as usize],
            peek_depth: vec![0.0; (EFB_WIDTH * EFB_HEIGHT) as usize],
            tile_valid: vec![false; (TILES_X * TILES_Y) as usize],
            pending_color_pokes: Vec::new(),
            pending_depth_pokes: Vec::new(),
            scale,
            msaa_samples,
            efb_format: EfbFormat::default(),
        })
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn efb_format(&self) -> EfbFormat {
        self.efb_format
    }

    pub fn set_efb_format(&mut self, format: EfbFormat) {
        self.efb_format = format;
    }

    pub fn color_texture(&self) -> &dyn AbstractTexture {
        self.color.as_ref()
    }

    /// Scale a native EFB rectangle to the internal render-target scale.
    pub fn efb_to_target(&self, rect: &EfbRect) -> TargetRect {
        rect.scaled(self.scale)
    }

    /// Any draw or clear touching the EFB lands here: peeked tiles are no
    /// longer trustworthy.
    pub fn invalidate_peek_cache(&mut self) {
        self.tile_valid.fill(false);
    }

    /// Called by the renderer when the guest issues a draw.
    pub fn on_draw(&mut self, backend: &dyn VideoBackend) {
        self.flush_pokes(backend);
        self.invalidate_peek_cache();
    }

    pub fn clear(
        &mut self,
        backend: &dyn VideoBackend,
        rect: &EfbRect,
        color_enable: bool,
        alpha_enable: bool,
        z_enable: bool,
        color: u32,
        z: u32,
    ) {
        self.flush_pokes(backend);
        let target = self.efb_to_target(rect);
        backend.clear_region(
            Some(self.color.as_mut()),
            Some(self.depth.as_mut()),
            &target,
            color_enable,
            alpha_enable,
            z_enable,
            color,
            z,
        );
        self.invalidate_peek_cache();
    }

    // -- resolve ---------------------------------------------------------

    /// Single-sample view of the color target. A plain blit suffices for
    /// color.
    pub fn resolved_color(&mut self, rect: &TargetRect) -> &dyn AbstractTexture {
        match self.resolved_color {
            Some(ref mut resolved) => {
                resolved.copy_rectangle_from(self.color.as_ref(), rect, 0, 0, rect, 0, 0);
                &**resolved
            }
            None => self.color.as_ref(),
        }
    }

    /// Single-sample view of the depth target. Depth cannot be resolved by
    /// blit on most APIs; the backend runs a min-across-samples pass.
    pub fn resolved_depth(&mut self, backend: &dyn VideoBackend, rect: &TargetRect) -> &dyn AbstractTexture {
        match self.resolved_depth {
            Some(ref mut resolved) => {
                backend.resolve_depth_min(self.depth.as_ref(), resolved.as_mut(), rect);
                &**resolved
            }
            None => self.depth.as_ref(),
        }
    }

    // -- peek ------------------------------------------------------------

    fn tile_index(x: u32, y: u32) -> usize {
        ((y / PEEK_TILE) * TILES_X + x / PEEK_TILE) as usize
    }

    fn populate_tile(&mut self, backend: &dyn VideoBackend, x: u32, y: u32) {
        self.flush_pokes(backend);

        let tile_left = x / PEEK_TILE * PEEK_TILE;
        let tile_top = y / PEEK_TILE * PEEK_TILE;
        let native = Rectangle::from_extent(
            tile_left as i32,
            tile_top as i32,
            PEEK_TILE.min(EFB_WIDTH - tile_left) as i32,
            PEEK_TILE.min(EFB_HEIGHT - tile_top) as i32,
        );
        let scaled = native.scaled(self.scale);
        debug!(?native, "populating peek tile");

        // Downscale the tile to native resolution, then read it back.
        if self.msaa_samples > 1 {
            self.resolved_color(&scaled);
            let src = self.resolved_color.as_ref().map(|t| t.as_ref());
            if let Some(src) = src {
                self.read_color.scale_rectangle_from(src, &scaled, &native);
            }
        } else {
            self.read_color
                .scale_rectangle_from(self.color.as_ref(), &scaled, &native);
        }
        self.readback_color
            .copy_from_texture(self.read_color.as_ref(), &native, 0, 0, &native);
        self.readback_color.flush();

        let depth_src: &dyn AbstractTexture = if self.msaa_samples > 1 {
            if let Some(ref mut resolved) = self.resolved_depth {
                backend.resolve_depth_min(self.depth.as_ref(), resolved.as_mut(), &scaled);
                &**resolved
            } else {
                self.depth.as_ref()
            }
        } else {
            self.depth.as_ref()
        };
        self.read_depth.scale_rectangle_from(depth_src, &scaled, &native);
        self.readback_depth
            .copy_from_texture(self.read_depth.as_ref(), &native, 0, 0, &native);
        self.readback_depth.flush();

        if self.readback_color.map() && self.readback_depth.map() {
            for ty in native.top..native.bottom {
                for tx in native.left..native.right {
                    let idx = (ty as u32 * EFB_WIDTH + tx as u32) as usize;
                    let c = self.readback_color.read_texel(tx as u32, ty as u32);
                    self.peek_color[idx] = [c[0], c[1], c[2], c[3]];
                    let d = self.readback_depth.read_texel(tx as u32, ty as u32);
                    self.peek_depth[idx] = bytemuck::pod_read_unaligned(d);
                }
            }
            self.readback_color.unmap();
            self.readback_depth.unmap();
            // A failed map leaves the tile invalid so the next peek retries
            // instead of serving stale values.
            self.tile_valid[Self::tile_index(x, y)] = true;
        }
    }

    /// Read one EFB color pixel as RGBA8 bytes (native coordinates).
    pub fn peek_color(&mut self, backend: &dyn VideoBackend, x: u32, y: u32) -> [u8; 4] {
        debug_assert!(x < EFB_WIDTH && y < EFB_HEIGHT);
        if !self.tile_valid[Self::tile_index(x, y)] {
            self.populate_tile(backend, x, y);
        }
        self.peek_color[(y * EFB_WIDTH + x) as usize]
    }

    /// Read one EFB depth pixel as a 24-bit value.
    pub fn peek_depth(&mut self, backend: &dyn VideoBackend, x: u32, y: u32) -> u32 {
        debug_assert!(x < EFB_WIDTH && y < EFB_HEIGHT);
        if !self.tile_valid[Self::tile_index(x, y)] {
            self.populate_tile(backend, x, y);
        }
        let depth = self.peek_depth[(y * EFB_WIDTH + x) as usize];
        (depth * 16_777_216.0).min(16_777_215.0) as u32
    }

    // -- poke ------------------------------------------------------------

    /// Queue a color write at `(x, y)`. `value` is ARGB, the layout the
    /// access interface uses.
    pub fn poke_color(&mut self, x: u32, y: u32, value: u32) {
        self.pending_color_pokes.push(EfbPokeData {
            x: x as u16,
            y: y as u16,
            data: value,
        });
        // Keep an already-valid tile coherent so a peek after this poke
        // does not need a round trip.
        if self.tile_valid[Self::tile_index(x, y)] {
            let argb = value.to_be_bytes();
            self.peek_color[(y * EFB_WIDTH + x) as usize] = [argb[1], argb[2], argb[3], argb[0]];
        }
    }

    /// Queue a depth write at `(x, y)`. `value` is 24-bit.
    pub fn poke_depth(&mut self, x: u32, y: u32, value: u32) {
        self.pending_depth_pokes.push(EfbPokeData {
            x: x as u16,
            y: y as u16,
            data: value & 0x00ff_ffff,
        });
        if self.tile_valid[Self::tile_index(x, y)] {
            self.peek_depth[(y * EFB_WIDTH + x) as usize] =
                (value & 0x00ff_ffff) as f32 / 16_777_216.0;
        }
    }

    /// Draw all pending pokes as point geometry, so blending and depth
    /// test state apply as they would for a real draw.
    pub fn flush_pokes(&mut self, backend: &dyn VideoBackend) {
        if !self.pending_color_pokes.is_empty() {
            // Pokes are issued in native coordinates; scale if needed.
            let points = self.scaled_pokes(&self.pending_color_pokes);
            backend.draw_pokes(self.color.as_mut(), &points, false);
            self.pending_color_pokes.clear();
        }
        if !self.pending_depth_pokes.is_empty() {
            let points = self.scaled_pokes(&self.pending_depth_pokes);
            backend.draw_pokes(self.depth.as_mut(), &points, true);
            self.pending_depth_pokes.clear();
        }
    }

    fn scaled_pokes(&self, pokes: &[EfbPokeData]) -> Vec<EfbPokeData> {
        if self.scale == 1 {
            return pokes.to_vec();
        }
        let mut out = Vec::with_capacity(pokes.len() * (self.scale * self.scale) as usize);
        for p in pokes {
            for dy in 0..self.scale {
                for dx in 0..self.scale {
                    out.push(EfbPokeData {
                        x: (p.x as u32 * self.scale + dx) as u16,
                        y: (p.y as u32 * self.scale + dy) as u16,
                        data: p.data,
                    });
                }
            }
        }
        out
    }

    // -- reinterpret -----------------------------------------------------

    /// Reinterpret the EFB color bits as a different layout. Runs into the
    /// temp target, then swaps live and temp.
    pub fn reinterpret_pixel_data(
        &mut self,
        backend: &dyn VideoBackend,
        conversion: PixelFormatConversion,
    ) {
        self.flush_pokes(backend);
        backend.reinterpret_pixel_data(self.color.as_ref(), self.color_temp.as_mut(), conversion);
        std::mem::swap(&mut self.color, &mut self.color_temp);
        self.invalidate_peek_cache();
    }

    // -- region readback (EFB copies) ------------------------------------

    /// Read a native-coordinate EFB color region back as linear RGBA8.
    pub fn read_color_region(
        &mut self,
        backend: &dyn VideoBackend,
        rect: &EfbRect,
    ) -> Vec<u8> {
        self.flush_pokes(backend);
        let scaled = self.efb_to_target(rect);
        if self.msaa_samples > 1 {
            self.resolved_color(&scaled);
        }
        let src: &dyn AbstractTexture = match self.resolved_color {
            Some(ref t) if self.msaa_samples > 1 => t.as_ref(),
            _ => self.color.as_ref(),
        };
        self.read_color.scale_rectangle_from(src, &scaled, rect);
        self.readback_color
            .copy_from_texture(self.read_color.as_ref(), rect, 0, 0, rect);
        self.readback_color.flush();

        let mut out = vec![0u8; (rect.width() * rect.height() * 4) as usize];
        if self.readback_color.map() {
            for y in 0..rect.height() {
                for x in 0..rect.width() {
                    let p = self
                        .readback_color
                        .read_texel((rect.left + x) as u32, (rect.top + y) as u32);
                    let off = ((y * rect.width() + x) * 4) as usize;
                    out[off..off + 4].copy_from_slice(p);
                }
            }
            self.readback_color.unmap();
        }
        out
    }

    /// Read a native EFB depth region back, packing each 24-bit value into
    /// the R, G, B channels the copy encoders consume.
    pub fn read_depth_region(
        &mut self,
        backend: &dyn VideoBackend,
        rect: &EfbRect,
    ) -> Vec<u8> {
        self.flush_pokes(backend);
        let scaled = self.efb_to_target(rect);
        let src: &dyn AbstractTexture = if self.msaa_samples > 1 {
            if let Some(ref mut resolved) = self.resolved_depth {
                backend.resolve_depth_min(self.depth.as_ref(), resolved.as_mut(), &scaled);
                &**resolved
            } else {
                self.depth.as_ref()
            }
        } else {
            self.depth.as_ref()
        };
        self.read_depth.scale_rectangle_from(src, &scaled, rect);
        self.readback_depth
            .copy_from_texture(self.read_depth.as_ref(), rect, 0, 0, rect);
        self.readback_depth.flush();

        let mut out = vec![0u8; (rect.width() * rect.height() * 4) as usize];
        if self.readback_depth.map() {
            for y in 0..rect.height() {
                for x in 0..rect.width() {
                    let d = self
                        .readback_depth
                        .read_texel((rect.left + x) as u32, (rect.top + y) as u32);
                    let depth: f32 = bytemuck::pod_read_unaligned(d);
                    let z = (depth * 16_777_216.0).min(16_777_215.0) as u32;
                    let off = ((y * rect.width() + x) * 4) as usize;
                    out[off] = (z >> 16) as u8;
                    out[off + 1] = (z >> 8) as u8;
                    out[off + 2] = z as u8;
                    out[off + 3] = 0xff;
                }
            }
            self.readback_depth.unmap();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::soft::SoftBackend;
    use crate::backend::{BackendCaps, BackendKind};

    #[test]
    fn clear_then_peek() {
        let backend = SoftBackend::new();
        let mut fb = FramebufferManager::new(&backend, 1, 1).unwrap();
        let rect = EfbRect::from_extent(0, 0, EFB_WIDTH as i32, EFB_HEIGHT as i32);
        fb.clear(&backend, &rect, true, true, true, 0xff20_4060, 0x123456);

        assert_eq!(fb.peek_color(&backend, 10, 10), [0x20, 0x40, 0x60, 0xff]);
        assert_eq!(fb.peek_depth(&backend, 10, 10), 0x123456);
    }

    #[test]
    fn poke_updates_subsequent_peek() {
        let backend = SoftBackend::new();
        let mut fb = FramebufferManager::new(&backend, 1, 1).unwrap();
        fb.poke_color(5, 7, 0x80ff_0000);
        assert_eq!(fb.peek_color(&backend, 5, 7), [0xff, 0x00, 0x00, 0x80]);

        fb.poke_depth(5, 7, 0xabcdef);
        assert_eq!(fb.peek_depth(&backend, 5, 7), 0xabcdef);
    }

    #[test]
    fn draw_invalidates_peeked_tiles() {
        let backend = SoftBackend::new();
        let mut fb = FramebufferManager::new(&backend, 1, 1).unwrap();
        let rect = EfbRect::from_extent(0, 0, 64, 64);
        fb.clear(&backend, &rect, true, true, false, 0xff11_1111, 0);
        let before = fb.peek_color(&backend, 3, 3);
        assert_eq!(before, [0x11, 0x11, 0x11, 0xff]);

        fb.clear(&backend, &rect, true, true, false, 0xff22_2222, 0);
        assert_eq!(fb.peek_color(&backend, 3, 3), [0x22, 0x22, 0x22, 0xff]);
    }

    #[test]
    fn reinterpret_quantizes_to_565() {
        let backend = SoftBackend::new();
        let mut fb = FramebufferManager::new(&backend, 1, 1).unwrap();
        let rect = EfbRect::from_extent(0, 0, EFB_WIDTH as i32, EFB_HEIGHT as i32);
        fb.clear(&backend, &rect, true, true, false, 0xff01_0101, 0);
        fb.reinterpret_pixel_data(&backend, PixelFormatConversion::Rgb8ToRgb565);
        // 0x01 has no surviving bits at 5/6-bit precision.
        assert_eq!(fb.peek_color(&backend, 0, 0), [0, 0, 0, 0xff]);
    }

    #[test]
    fn msaa_resolve_feeds_peeks() {
        let backend = SoftBackend::new();
        let mut fb = FramebufferManager::new(&backend, 1, 4).unwrap();
        let rect = EfbRect::from_extent(0, 0, EFB_WIDTH as i32, EFB_HEIGHT as i32);
        fb.clear(&backend, &rect, true, true, true, 0xff33_4455, 0x00abcd);

        assert_eq!(fb.peek_color(&backend, 100, 100), [0x33, 0x44, 0x55, 0xff]);
        assert_eq!(fb.peek_depth(&backend, 100, 100), 0x00abcd);
    }

    struct UnmappableStaging(Box<dyn AbstractStagingTexture>);

    impl AbstractStagingTexture for UnmappableStaging {
        fn config(&self) -> &TextureConfig {
            self.0.config()
        }
        fn staging_type(&self) -> StagingTextureType {
            self.0.staging_type()
        }
        fn map(&mut self) -> bool {
            false
        }
        fn unmap(&mut self) {}
        fn is_mapped(&self) -> bool {
            false
        }
        fn flush(&mut self) {
            self.0.flush();
        }
        fn copy_from_texture(
            &mut self,
            src: &dyn AbstractTexture,
            src_rect: &Rectangle,
            src_layer: u32,
            src_level: u32,
            dst_rect: &Rectangle,
        ) {
            self.0.copy_from_texture(src, src_rect, src_layer, src_level, dst_rect);
        }
        fn copy_to_texture(
            &mut self,
            src_rect: &Rectangle,
            dst: &mut dyn AbstractTexture,
            dst_rect: &Rectangle,
            dst_layer: u32,
            dst_level: u32,
        ) {
            self.0.copy_to_texture(src_rect, dst, dst_rect, dst_layer, dst_level);
        }
        fn mapped_data(&self) -> &[u8] {
            &[]
        }
        fn mapped_data_mut(&mut self) -> &mut [u8] {
            &mut []
        }
        fn mapped_stride(&self) -> usize {
            self.0.mapped_stride()
        }
    }

    /// Software backend whose staging textures never map.
    struct UnmappableBackend(SoftBackend);

    impl VideoBackend for UnmappableBackend {
        fn kind(&self) -> BackendKind {
            self.0.kind()
        }
        fn caps(&self) -> &BackendCaps {
            self.0.caps()
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self.0.as_any()
        }
        fn create_texture(
            &self,
            config: &TextureConfig,
        ) -> Result<Box<dyn AbstractTexture>, VideoError> {
            self.0.create_texture(config)
        }
        fn create_staging_texture(
            &self,
            ty: StagingTextureType,
            config: &TextureConfig,
        ) -> Result<Box<dyn AbstractStagingTexture>, VideoError> {
            let inner = self.0.create_staging_texture(ty, config)?;
            Ok(Box::new(UnmappableStaging(inner)))
        }
        fn clear_region(
            &self,
            color_target: Option<&mut dyn AbstractTexture>,
            depth_target: Option<&mut dyn AbstractTexture>,
            rect: &Rectangle,
            color_enable: bool,
            alpha_enable: bool,
            z_enable: bool,
            color: u32,
            z: u32,
        ) {
            self.0.clear_region(
                color_target,
                depth_target,
                rect,
                color_enable,
                alpha_enable,
                z_enable,
                color,
                z,
            );
        }
        fn resolve_depth_min(
            &self,
            src: &dyn AbstractTexture,
            dst: &mut dyn AbstractTexture,
            rect: &Rectangle,
        ) {
            self.0.resolve_depth_min(src, dst, rect);
        }
        fn reinterpret_pixel_data(
            &self,
            src: &dyn AbstractTexture,
            dst: &mut dyn AbstractTexture,
            conversion: PixelFormatConversion,
        ) {
            self.0.reinterpret_pixel_data(src, dst, conversion);
        }
        fn draw_pokes(
            &self,
            target: &mut dyn AbstractTexture,
            points: &[EfbPokeData],
            depth: bool,
        ) {
            self.0.draw_pokes(target, points, depth);
        }
        fn present(
            &mut self,
            texture: &dyn AbstractTexture,
            src_rect: &Rectangle,
            target_rect: &Rectangle,
        ) {
            self.0.present(texture, src_rect, target_rect);
        }
    }

    #[test]
    fn failed_readback_leaves_tiles_invalid() {
        let backend = UnmappableBackend(SoftBackend::new());
        let mut fb = FramebufferManager::new(&backend, 1, 1).unwrap();
        let rect = EfbRect::from_extent(0, 0, 64, 64);
        fb.clear(&backend, &rect, true, true, true, 0xff11_2233, 0x123456);

        fb.peek_color(&backend, 3, 3);
        fb.peek_depth(&backend, 3, 3);
        assert!(!fb.tile_valid.iter().any(|&v| v));
    }

    #[test]
    fn scaled_efb_rect() {
        let backend = SoftBackend::new();
        let fb = FramebufferManager::new(&backend, 2, 1).unwrap();
        let rect = EfbRect::from_extent(10, 20, 30, 40);
        let scaled = fb.efb_to_target(&rect);
        assert_eq!((scaled.left, scaled.top), (20, 40));
        assert_eq!((scaled.width(), scaled.height()), (60, 80));
    }
}
