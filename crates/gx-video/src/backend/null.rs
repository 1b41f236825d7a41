//! Backend that allocates nothing and draws nothing. Useful for headless
//! runs and for exercising cache logic without pixel storage.

use std::any::Any;

use crate::backend::{BackendCaps, BackendKind, EfbPokeData, VideoBackend};
use crate::error::VideoError;
use crate::format::PixelFormatConversion;
use crate::rect::Rectangle;
use crate::texture::{
    assert_same_extent, AbstractStagingTexture, AbstractTexture, StagingTextureType, TextureConfig,
};

pub struct NullBackend {
    caps: BackendCaps,
}

impl NullBackend {
    pub fn new() -> Self {
        Self {
            caps: BackendCaps {
                max_texture_size: 16384,
                supports_gpu_texture_decode: false,
                synchronous_transfers: true,
            },
        }
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoBackend for NullBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Null
    }

    fn caps(&self) -> &BackendCaps {
        &self.caps
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn create_texture(&self, config: &TextureConfig) -> Result<Box<dyn AbstractTexture>, VideoError> {
        Ok(Box::new(NullTexture { config: *config }))
    }

    fn create_staging_texture(
        &self,
        ty: StagingTextureType,
        config: &TextureConfig,
    ) -> Result<Box<dyn AbstractStagingTexture>, VideoError> {
        let stride = config.format.row_size_in_bytes(config.width) as usize;
        Ok(Box::new(NullStagingTexture {
            config: *config,
            ty,
            data: vec![0; stride * config.height as usize],
            stride,
            mapped: false,
        }))
    }

    fn clear_region(
        &self,
        _color_target: Option<&mut dyn AbstractTexture>,
        _depth_target: Option<&mut dyn AbstractTexture>,
        _rect: &Rectangle,
        _color_enable: bool,
        _alpha_enable: bool,
        _z_enable: bool,
        _color: u32,
        _z: u32,
    ) {
    }

    fn resolve_depth_min(
        &self,
        _src: &dyn AbstractTexture,
        _dst: &mut dyn AbstractTexture,
        _rect: &Rectangle,
    ) {
    }

    fn reinterpret_pixel_data(
        &self,
        _src: &dyn AbstractTexture,
        _dst: &mut dyn AbstractTexture,
        _conversion: PixelFormatConversion,
    ) {
    }

    fn draw_pokes(&self, _target: &mut dyn AbstractTexture, _points: &[EfbPokeData], _depth: bool) {}

    fn present(
        &mut self,
        _texture: &dyn AbstractTexture,
        _src_rect: &Rectangle,
        _target_rect: &Rectangle,
    ) {
    }
}

struct NullTexture {
    config: TextureConfig,
}

impl AbstractTexture for NullTexture {
    fn config(&self) -> &TextureConfig {
        &self.config
    }

    fn bind(&self, _stage: u32) {}

    fn copy_rectangle_from(
        &mut self,
        _src: &dyn AbstractTexture,
        src_rect: &Rectangle,
        _src_layer: u32,
        _src_level: u32,
        dst_rect: &Rectangle,
        _dst_layer: u32,
        _dst_level: u32,
    ) {
        assert_same_extent(src_rect, dst_rect);
    }

    fn scale_rectangle_from(
        &mut self,
        _src: &dyn AbstractTexture,
        _src_rect: &Rectangle,
        _dst_rect: &Rectangle,
    ) {
        assert!(self.config.render_target, "scale destination must be a render target");
    }

    fn load(
        &mut self,
        level: u32,
        width: u32,
        height: u32,
        row_length: u32,
        _data: &[u8],
    ) -> Result<(), VideoError> {
        assert!(level < self.config.levels);
        assert_eq!(width, self.config.mip_width(level));
        assert_eq!(height, self.config.mip_height(level));
        assert!(row_length >= width);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct NullStagingTexture {
    config: TextureConfig,
    ty: StagingTextureType,
    data: Vec<u8>,
    stride: usize,
    mapped: bool,
}

impl AbstractStagingTexture for NullStagingTexture {
    fn config(&self) -> &TextureConfig {
        &self.config
    }

    fn staging_type(&self) -> StagingTextureType {
        self.ty
    }

    fn map(&mut self) -> bool {
        self.mapped = true;
        true
    }

    fn unmap(&mut self) {
        self.mapped = false;
    }

    fn is_mapped(&self) -> bool {
        self.mapped
    }

    fn flush(&mut self) {}

    fn copy_from_texture(
        &mut self,
        _src: &dyn AbstractTexture,
        src_rect: &Rectangle,
        _src_layer: u32,
        _src_level: u32,
        dst_rect: &Rectangle,
    ) {
        assert_ne!(self.ty, StagingTextureType::Upload, "readback from an upload staging texture");
        assert_same_extent(src_rect, dst_rect);
    }

    fn copy_to_texture(
        &mut self,
        src_rect: &Rectangle,
        _dst: &mut dyn AbstractTexture,
        dst_rect: &Rectangle,
        _dst_layer: u32,
        _dst_level: u32,
    ) {
        assert_ne!(self.ty, StagingTextureType::Readback, "upload from a readback staging texture");
        assert_same_extent(src_rect, dst_rect);
    }

    fn mapped_data(&self) -> &[u8] {
        if self.mapped {
            &self.data
        } else {
            &[]
        }
    }

    fn mapped_data_mut(&mut self) -> &mut [u8] {
        if self.mapped {
            &mut self.data
        } else {
            &mut []
        }
    }

    fn mapped_stride(&self) -> usize {
        self.stride
    }
}
