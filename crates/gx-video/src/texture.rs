//! The capability contract every backend's texture types satisfy.
//!
//! `AbstractTexture` is the GPU-resident resource; `AbstractStagingTexture`
//! is a CPU-visible transfer buffer bound to one direction of transfer for
//! its lifetime. Rectangle-dimension and mip-geometry mismatches are
//! programming-contract violations and assert; only allocation and upload
//! paths return errors.

use std::any::Any;

use crate::error::VideoError;
use crate::format::AbstractTextureFormat;
use crate::rect::Rectangle;

/// Immutable description of a texture resource. Equality/hash is the
/// texture-pool lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureConfig {
    pub width: u32,
    pub height: u32,
    pub levels: u32,
    pub layers: u32,
    pub format: AbstractTextureFormat,
    pub render_target: bool,
}

impl TextureConfig {
    pub fn new(
        width: u32,
        height: u32,
        levels: u32,
        layers: u32,
        format: AbstractTextureFormat,
        render_target: bool,
    ) -> Self {
        Self {
            width,
            height,
            levels,
            layers,
            format,
            render_target,
        }
    }

    pub fn rect(&self) -> Rectangle {
        Rectangle::from_extent(0, 0, self.width as i32, self.height as i32)
    }

    pub fn mip_width(&self, level: u32) -> u32 {
        (self.width >> level).max(1)
    }

    pub fn mip_height(&self, level: u32) -> u32 {
        (self.height >> level).max(1)
    }

    /// Byte size of one layer of the given level at tight packing.
    pub fn level_size_in_bytes(&self, level: u32) -> usize {
        let rows = if self.format.is_block_compressed() {
            (self.mip_height(level) + 3) / 4
        } else {
            self.mip_height(level)
        };
        self.format.row_size_in_bytes(self.mip_width(level)) as usize * rows as usize
    }
}

pub trait AbstractTexture {
    fn config(&self) -> &TextureConfig;

    /// Bind to a sampler slot. Backends without bind-point state ignore it.
    fn bind(&self, stage: u32);

    /// 1:1 copy of `src_rect` from `src` into `dst_rect`.
    ///
    /// Contract: the rectangles must have equal dimensions and lie within
    /// the respective mip levels.
    fn copy_rectangle_from(
        &mut self,
        src: &dyn AbstractTexture,
        src_rect: &Rectangle,
        src_layer: u32,
        src_level: u32,
        dst_rect: &Rectangle,
        dst_layer: u32,
        dst_level: u32,
    );

    /// Filtered (possibly non-1:1) copy into level 0. The destination must
    /// have been created with `render_target = true`.
    fn scale_rectangle_from(
        &mut self,
        src: &dyn AbstractTexture,
        src_rect: &Rectangle,
        dst_rect: &Rectangle,
    );

    /// Upload raw CPU bytes into one mip level. `row_length` is in texels
    /// and must be >= `width`; `width`/`height` must match the level's own
    /// geometry.
    fn load(
        &mut self,
        level: u32,
        width: u32,
        height: u32,
        row_length: u32,
        data: &[u8],
    ) -> Result<(), VideoError>;

    /// Backend-private downcast hook.
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Permitted transfer direction of a staging texture, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingTextureType {
    /// GPU → CPU only.
    Readback,
    /// CPU → GPU only.
    Upload,
    /// Both directions.
    Mutable,
}

pub trait AbstractStagingTexture {
    fn config(&self) -> &TextureConfig;
    fn staging_type(&self) -> StagingTextureType;

    /// Map for CPU access. Idempotent; returns false on failure.
    fn map(&mut self) -> bool;
    /// Idempotent.
    fn unmap(&mut self);
    fn is_mapped(&self) -> bool;

    /// Block until previously issued transfers are CPU-visible. A no-op on
    /// backends whose transfers complete synchronously.
    fn flush(&mut self);

    /// GPU → CPU. Contract: `staging_type` is `Readback` or `Mutable`, and
    /// the rectangles have equal dimensions.
    fn copy_from_texture(
        &mut self,
        src: &dyn AbstractTexture,
        src_rect: &Rectangle,
        src_layer: u32,
        src_level: u32,
        dst_rect: &Rectangle,
    );

    /// CPU → GPU. Contract: `staging_type` is `Upload` or `Mutable`, and
    /// the rectangles have equal dimensions.
    fn copy_to_texture(
        &mut self,
        src_rect: &Rectangle,
        dst: &mut dyn AbstractTexture,
        dst_rect: &Rectangle,
        dst_layer: u32,
        dst_level: u32,
    );

    /// Mapped bytes; empty when unmapped.
    fn mapped_data(&self) -> &[u8];
    fn mapped_data_mut(&mut self) -> &mut [u8];
    /// Row stride in bytes of the mapped data.
    fn mapped_stride(&self) -> usize;

    /// Read one texel's bytes out of the mapped data.
    fn read_texel(&self, x: u32, y: u32) -> &[u8] {
        let unit = self.config().format.stride_unit() as usize;
        let off = y as usize * self.mapped_stride() + x as usize * unit;
        &self.mapped_data()[off..off + unit]
    }
}

pub(crate) fn assert_same_extent(src: &Rectangle, dst: &Rectangle) {
    assert!(
        src.width() == dst.width() && src.height() == dst.height(),
        "copy rectangle dimensions differ: {}x{} vs {}x{}",
        src.width(),
        src.height(),
        dst.width(),
        dst.height()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_geometry_clamps_to_one() {
        let config = TextureConfig::new(64, 4, 7, 1, AbstractTextureFormat::Rgba8, false);
        assert_eq!(config.mip_width(0), 64);
        assert_eq!(config.mip_width(6), 1);
        assert_eq!(config.mip_height(2), 1);
    }

    #[test]
    fn level_sizes() {
        let config = TextureConfig::new(16, 16, 2, 1, AbstractTextureFormat::Rgba8, false);
        assert_eq!(config.level_size_in_bytes(0), 16 * 16 * 4);
        assert_eq!(config.level_size_in_bytes(1), 8 * 8 * 4);

        let bc = TextureConfig::new(16, 16, 1, 1, AbstractTextureFormat::Dxt1, false);
        assert_eq!(bc.level_size_in_bytes(0), 4 * 4 * 8);
    }
}
