//! Software backend: every texture is a CPU pixel buffer and every
//! operation runs on the host CPU. This is both the lowest-common-
//! denominator member of the backend set and the backend the integration
//! tests observe, since its pixel state is directly inspectable.

use std::any::Any;

use tracing::warn;

use crate::backend::{BackendCaps, BackendKind, EfbPokeData, VideoBackend};
use crate::error::VideoError;
use crate::format::{AbstractTextureFormat, PixelFormatConversion};
use crate::rect::Rectangle;
use crate::texture::{
    assert_same_extent, AbstractStagingTexture, AbstractTexture, StagingTextureType, TextureConfig,
};

pub struct SoftBackend {
    caps: BackendCaps,
    display: Vec<u8>,
    display_width: u32,
    display_height: u32,
    present_count: u64,
    last_text: String,
}

impl SoftBackend {
    pub fn new() -> Self {
        Self {
            caps: BackendCaps {
                max_texture_size: 16384,
                supports_gpu_texture_decode: false,
                synchronous_transfers: true,
            },
            display: Vec::new(),
            display_width: 0,
            display_height: 0,
            present_count: 0,
            last_text: String::new(),
        }
    }

    /// The most recently presented image as linear RGBA8.
    pub fn display(&self) -> (&[u8], u32, u32) {
        (&self.display, self.display_width, self.display_height)
    }

    pub fn present_count(&self) -> u64 {
        self.present_count
    }

    pub fn last_text(&self) -> &str {
        &self.last_text
    }
}

impl Default for SoftBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn texel_size(format: AbstractTextureFormat) -> Option<usize> {
    match format {
        AbstractTextureFormat::Rgba8 | AbstractTextureFormat::Bgra8 => Some(4),
        AbstractTextureFormat::D32F => Some(4),
        // No CPU sampling path for block-compressed host formats.
        AbstractTextureFormat::Dxt1 | AbstractTextureFormat::Dxt3 | AbstractTextureFormat::Dxt5 => {
            None
        }
    }
}

impl VideoBackend for SoftBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Software
    }

    fn caps(&self) -> &BackendCaps {
        &self.caps
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn create_texture(&self, config: &TextureConfig) -> Result<Box<dyn AbstractTexture>, VideoError> {
        let Some(texel) = texel_size(config.format) else {
            warn!(?config.format, "software backend cannot allocate block-compressed textures");
            return Err(VideoError::TextureAllocation {
                width: config.width,
                height: config.height,
                levels: config.levels,
                layers: config.layers,
            });
        };
        let mut levels = Vec::with_capacity(config.levels as usize);
        for level in 0..config.levels {
            let size = config.mip_width(level) as usize
                * config.mip_height(level) as usize
                * config.layers as usize
                * texel;
            levels.push(vec![0u8; size]);
        }
        Ok(Box::new(SwTexture {
            config: *config,
            levels,
        }))
    }

    fn create_staging_texture(
        &self,
        ty: StagingTextureType,
        config: &TextureConfig,
    ) -> Result<Box<dyn AbstractStagingTexture>, VideoError> {
        let Some(texel) = texel_size(config.format) else {
            return Err(VideoError::StagingAllocation {
                size: config.level_size_in_bytes(0),
            });
        };
        let stride = config.width as usize * texel;
        Ok(Box::new(SwStagingTexture {
            config: *config,
            ty,
            data: vec![0; stride * config.height as usize],
            stride,
            mapped: false,
        }))
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
        if let Some(target) = color_target {
            if color_enable || alpha_enable {
                let tex = sw_mut(target);
                let rgba = color.to_be_bytes(); // ARGB in memory order A,R,G,B
                let (a, r, g, b) = (rgba[0], rgba[1], rgba[2], rgba[3]);
                for y in rect.top.max(0)..rect.bottom.min(tex.config.height as i32) {
                    for x in rect.left.max(0)..rect.right.min(tex.config.width as i32) {
                        let p = tex.texel_mut(0, x as u32, y as u32);
                        if color_enable {
                            p[0] = r;
                            p[1] = g;
                            p[2] = b;
                        }
                        if alpha_enable {
                            p[3] = a;
                        }
                    }
                }
            }
        }
        if let Some(target) = depth_target {
            if z_enable {
                let tex = sw_mut(target);
                let depth = (z & 0x00ff_ffff) as f32 / 16_777_216.0;
                for y in rect.top.max(0)..rect.bottom.min(tex.config.height as i32) {
                    for x in rect.left.max(0)..rect.right.min(tex.config.width as i32) {
                        tex.texel_mut(0, x as u32, y as u32)
                            .copy_from_slice(bytemuck::bytes_of(&depth));
                    }
                }
            }
        }
    }

    fn resolve_depth_min(
        &self,
        src: &dyn AbstractTexture,
        dst: &mut dyn AbstractTexture,
        rect: &Rectangle,
    ) {
        // The software rasterizer stores one sample per pixel, so the
        // min-over-samples pass degenerates to a copy.
        dst.copy_rectangle_from(src, rect, 0, 0, rect, 0, 0);
    }

    fn reinterpret_pixel_data(
        &self,
        src: &dyn AbstractTexture,
        dst: &mut dyn AbstractTexture,
        conversion: PixelFormatConversion,
    ) {
        let src = sw_ref(src);
        let dst = sw_mut(dst);
        assert_eq!(src.config.width, dst.config.width);
        assert_eq!(src.config.height, dst.config.height);

        let quant = |v: u8, bits: u32| -> u8 {
            let v = v >> (8 - bits);
            match bits {
                5 => (v << 3) | (v >> 2),
                6 => (v << 2) | (v >> 4),
                _ => unreachable!(),
            }
        };

        for y in 0..src.config.height {
            for x in 0..src.config.width {
                let p = src.texel(0, x, y);
                let (r, g, b) = (p[0], p[1], p[2]);
                let out = match conversion {
                    PixelFormatConversion::Rgb8ToRgba6 | PixelFormatConversion::Rgb565ToRgba6 => {
                        let q = |v: u8| (v & 0xfc) | (v >> 6);
                        [q(r), q(g), q(b), 0xff]
                    }
                    PixelFormatConversion::Rgb8ToRgb565 | PixelFormatConversion::Rgba6ToRgb565 => {
                        [quant(r, 5), quant(g, 6), quant(b, 5), 0xff]
                    }
                    PixelFormatConversion::Rgba6ToRgb8 | PixelFormatConversion::Rgb565ToRgb8 => {
                        [r, g, b, 0xff]
                    }
                };
                dst.texel_mut(0, x, y).copy_from_slice(&out);
            }
        }
    }

    fn draw_pokes(&self, target: &mut dyn AbstractTexture, points: &[EfbPokeData], depth: bool) {
        let tex = sw_mut(target);
        for point in points {
            let (x, y) = (point.x as u32, point.y as u32);
            if x >= tex.config.width || y >= tex.config.height {
                continue;
            }
            if depth {
                let value = (point.data & 0x00ff_ffff) as f32 / 16_777_216.0;
                tex.texel_mut(0, x, y).copy_from_slice(bytemuck::bytes_of(&value));
            } else {
                // Poke colors arrive ARGB, the same layout peeks return.
                let argb = point.data.to_be_bytes();
                tex.texel_mut(0, x, y)
                    .copy_from_slice(&[argb[1], argb[2], argb[3], argb[0]]);
            }
        }
    }

    fn present(
        &mut self,
        texture: &dyn AbstractTexture,
        src_rect: &Rectangle,
        target_rect: &Rectangle,
    ) {
        let tex = sw_ref(texture);
        let width = target_rect.width().max(0) as u32;
        let height = target_rect.height().max(0) as u32;
        self.display = vec![0u8; (width * height * 4) as usize];
        self.display_width = width;
        self.display_height = height;

        // Nearest-neighbor scale of the source region into the display.
        for y in 0..height {
            for x in 0..width {
                let sx = src_rect.left
                    + (x as i64 * src_rect.width() as i64 / width.max(1) as i64) as i32;
                let sy = src_rect.top
                    + (y as i64 * src_rect.height() as i64 / height.max(1) as i64) as i32;
                if !tex.config.rect().contains(sx, sy) {
                    continue;
                }
                let p = tex.texel(0, sx as u32, sy as u32);
                let off = ((y * width + x) * 4) as usize;
                self.display[off..off + 4].copy_from_slice(p);
            }
        }
        self.present_count += 1;
    }

    fn render_text(&mut self, text: &str, _left: i32, _top: i32, _color: u32) {
        self.last_text = text.to_owned();
    }
}

fn sw_ref(tex: &dyn AbstractTexture) -> &SwTexture {
    tex.as_any()
        .downcast_ref::<SwTexture>()
        .expect("software backend was handed a foreign texture")
}

fn sw_mut(tex: &mut dyn AbstractTexture) -> &mut SwTexture {
    tex.as_any_mut()
        .downcast_mut::<SwTexture>()
        .expect("software backend was handed a foreign texture")
}

pub struct SwTexture {
    config: TextureConfig,
    /// One linear buffer per mip level (layers stacked vertically).
    levels: Vec<Vec<u8>>,
}

impl SwTexture {
    fn texel_bytes(&self) -> usize {
        texel_size(self.config.format).unwrap_or(4)
    }

    fn texel_offset(&self, level: u32, x: u32, y: u32) -> usize {
        let w = self.config.mip_width(level) as usize;
        (y as usize * w + x as usize) * self.texel_bytes()
    }

    pub fn texel(&self, level: u32, x: u32, y: u32) -> &[u8] {
        let off = self.texel_offset(level, x, y);
        let n = self.texel_bytes();
        &self.levels[level as usize][off..off + n]
    }

    pub fn texel_mut(&mut self, level: u32, x: u32, y: u32) -> &mut [u8] {
        let off = self.texel_offset(level, x, y);
        let n = self.texel_bytes();
        &mut self.levels[level as usize][off..off + n]
    }

    pub fn depth_at(&self, x: u32, y: u32) -> f32 {
        let p = self.texel(0, x, y);
        bytemuck::pod_read_unaligned(p)
    }
}

impl AbstractTexture for SwTexture {
    fn config(&self) -> &TextureConfig {
        &self.config
    }

    fn bind(&self, _stage: u32) {}

    fn copy_rectangle_from(
        &mut self,
        src: &dyn AbstractTexture,
        src_rect: &Rectangle,
        _src_layer: u32,
        src_level: u32,
        dst_rect: &Rectangle,
        _dst_layer: u32,
        dst_level: u32,
    ) {
        assert_same_extent(src_rect, dst_rect);
        let src = sw_ref(src);
        let n = self.texel_bytes();
        for y in 0..src_rect.height() {
            for x in 0..src_rect.width() {
                let sp = src.texel_offset(src_level, (src_rect.left + x) as u32, (src_rect.top + y) as u32);
                let dp = self.texel_offset(dst_level, (dst_rect.left + x) as u32, (dst_rect.top + y) as u32);
                let texel: Vec<u8> = src.levels[src_level as usize][sp..sp + n].to_vec();
                self.levels[dst_level as usize][dp..dp + n].copy_from_slice(&texel);
            }
        }
    }

    fn scale_rectangle_from(
        &mut self,
        src: &dyn AbstractTexture,
        src_rect: &Rectangle,
        dst_rect: &Rectangle,
    ) {
        assert!(self.config.render_target, "scale destination must be a render target");
        let src = sw_ref(src);
        let n = self.texel_bytes();
        let (dw, dh) = (dst_rect.width().max(1), dst_rect.height().max(1));
        for y in 0..dst_rect.height() {
            for x in 0..dst_rect.width() {
                let sx = src_rect.left + (x as i64 * src_rect.width() as i64 / dw as i64) as i32;
                let sy = src_rect.top + (y as i64 * src_rect.height() as i64 / dh as i64) as i32;
                let sp = src.texel_offset(0, sx as u32, sy as u32);
                let dp = self.texel_offset(0, (dst_rect.left + x) as u32, (dst_rect.top + y) as u32);
                let texel: Vec<u8> = src.levels[0][sp..sp + n].to_vec();
                self.levels[0][dp..dp + n].copy_from_slice(&texel);
            }
        }
    }

    fn load(
        &mut self,
        level: u32,
        width: u32,
        height: u32,
        row_length: u32,
        data: &[u8],
    ) -> Result<(), VideoError> {
        assert!(level < self.config.levels, "level out of range");
        assert_eq!(width, self.config.mip_width(level), "level width mismatch");
        assert_eq!(height, self.config.mip_height(level), "level height mismatch");
        assert!(row_length >= width);

        let n = self.texel_bytes();
        let src_stride = row_length as usize * n;
        let dst_stride = width as usize * n;
        let dst = &mut self.levels[level as usize];
        for y in 0..height as usize {
            let src_row = &data[y * src_stride..y * src_stride + dst_stride];
            dst[y * dst_stride..(y + 1) * dst_stride].copy_from_slice(src_row);
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub struct SwStagingTexture {
    config: TextureConfig,
    ty: StagingTextureType,
    data: Vec<u8>,
    stride: usize,
    mapped: bool,
}

impl AbstractStagingTexture for SwStagingTexture {
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

    fn flush(&mut self) {
        // Transfers are synchronous on the CPU.
    }

    fn copy_from_texture(
        &mut self,
        src: &dyn AbstractTexture,
        src_rect: &Rectangle,
        _src_layer: u32,
        src_level: u32,
        dst_rect: &Rectangle,
    ) {
        assert_ne!(self.ty, StagingTextureType::Upload, "readback from an upload staging texture");
        assert_same_extent(src_rect, dst_rect);
        let src = sw_ref(src);
        let n = src.texel_bytes();
        for y in 0..src_rect.height() {
            for x in 0..src_rect.width() {
                let texel = src.texel(src_level, (src_rect.left + x) as u32, (src_rect.top + y) as u32);
                let off = (dst_rect.top + y) as usize * self.stride + (dst_rect.left + x) as usize * n;
                self.data[off..off + n].copy_from_slice(texel);
            }
        }
    }

    fn copy_to_texture(
        &mut self,
        src_rect: &Rectangle,
        dst: &mut dyn AbstractTexture,
        dst_rect: &Rectangle,
        _dst_layer: u32,
        dst_level: u32,
    ) {
        assert_ne!(self.ty, StagingTextureType::Readback, "upload from a readback staging texture");
        assert_same_extent(src_rect, dst_rect);
        let dst = sw_mut(dst);
        let n = dst.texel_bytes();
        for y in 0..src_rect.height() {
            for x in 0..src_rect.width() {
                let off = (src_rect.top + y) as usize * self.stride + (src_rect.left + x) as usize * n;
                let texel: Vec<u8> = self.data[off..off + n].to_vec();
                dst.texel_mut(dst_level, (dst_rect.left + x) as u32, (dst_rect.top + y) as u32)
                    .copy_from_slice(&texel);
            }
        }
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
