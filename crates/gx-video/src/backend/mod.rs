//! The per-backend contract.
//!
//! One `VideoBackend` implementation exists per graphics API and is
//! selected once at renderer construction; there is no per-call backend
//! switching. This crate ships the CPU-side members of the set
//! ([`null::NullBackend`], [`soft::SoftBackend`]); hardware backends
//! (wgpu/GL/Vulkan/D3D) implement the same traits out of tree.

pub mod null;
pub mod soft;

use crate::error::VideoError;
use crate::format::{PixelFormatConversion, TextureFormat, TlutFormat};
use crate::rect::Rectangle;
use crate::texture::{AbstractStagingTexture, AbstractTexture, StagingTextureType, TextureConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Null,
    Software,
}

/// Static capabilities a backend advertises at construction.
#[derive(Debug, Clone, Copy)]
pub struct BackendCaps {
    pub max_texture_size: u32,
    /// Whether `decode_texture_on_gpu` is worth calling at all.
    pub supports_gpu_texture_decode: bool,
    /// Transfers complete synchronously; staging `flush` is a no-op.
    pub synchronous_transfers: bool,
}

/// A single framebuffer poke. `data` is an RGBA8 color for color pokes and
/// a 24-bit depth value for depth pokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EfbPokeData {
    pub x: u16,
    pub y: u16,
    pub data: u32,
}

pub trait VideoBackend {
    fn kind(&self) -> BackendKind;
    fn caps(&self) -> &BackendCaps;

    /// Backend-private downcast hook.
    fn as_any(&self) -> &dyn std::any::Any;

    fn create_texture(&self, config: &TextureConfig) -> Result<Box<dyn AbstractTexture>, VideoError>;

    fn create_staging_texture(
        &self,
        ty: StagingTextureType,
        config: &TextureConfig,
    ) -> Result<Box<dyn AbstractStagingTexture>, VideoError>;

    /// Clear `rect` of the given targets, honoring the per-channel enables.
    /// `color` is ARGB (the layout the EFB access interface uses), `z` a
    /// 24-bit depth value.
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
    );

    /// Resolve a multisampled depth target by selecting the minimum depth
    /// across samples, as a full-screen pass. Hardware blits cannot resolve
    /// depth on most APIs, which is why this is a dedicated hook while
    /// color resolve goes through a plain rectangle copy.
    fn resolve_depth_min(
        &self,
        src: &dyn AbstractTexture,
        dst: &mut dyn AbstractTexture,
        rect: &Rectangle,
    );

    /// Full-screen pass reinterpreting the EFB color bit layout from `src`
    /// into `dst` (never in place).
    fn reinterpret_pixel_data(
        &self,
        src: &dyn AbstractTexture,
        dst: &mut dyn AbstractTexture,
        conversion: PixelFormatConversion,
    );

    /// Draw a batch of poke values as point geometry into the target, so
    /// blending/test state applies as it would for a real draw.
    fn draw_pokes(
        &self,
        target: &mut dyn AbstractTexture,
        points: &[EfbPokeData],
        depth: bool,
    );

    /// Present `src_rect` of the given texture to the display surface at
    /// `target_rect`.
    fn present(&mut self, texture: &dyn AbstractTexture, src_rect: &Rectangle, target_rect: &Rectangle);

    /// Overlay debug text; backends without a text path ignore this.
    fn render_text(&mut self, _text: &str, _left: i32, _top: i32, _color: u32) {}

    /// Whether the GPU decode path handles this format pair.
    fn supports_gpu_texture_decode(
        &self,
        _format: TextureFormat,
        _tlut: Option<TlutFormat>,
    ) -> bool {
        false
    }

    /// Decode guest texels directly on the GPU. Returns false when the
    /// backend did nothing and the caller must fall back to CPU decode.
    fn decode_texture_on_gpu(
        &self,
        _entry_texture: &mut dyn AbstractTexture,
        _level: u32,
        _data: &[u8],
        _format: TextureFormat,
        _width: u32,
        _height: u32,
        _tlut: Option<(&[u8], TlutFormat)>,
    ) -> bool {
        false
    }
}
