//! Guest and host pixel formats, and the block geometry used to size and
//! hash guest texture memory.
//!
//! Guest textures are stored tiled: texels are grouped into fixed-size
//! blocks (32 or 64 bytes) whose dimensions depend on the format. All byte
//! math in the cache goes through [`TextureFormat`]'s geometry helpers so
//! that address-overlap checks and hashes agree with what the console
//! actually reads.

/// Guest texture formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// 4-bit intensity.
    I4,
    /// 8-bit intensity.
    I8,
    /// 4-bit intensity + 4-bit alpha.
    Ia4,
    /// 8-bit intensity + 8-bit alpha.
    Ia8,
    Rgb565,
    /// 15-bit RGB or 12-bit RGB + 3-bit alpha, selected per texel.
    Rgb5A3,
    Rgba8,
    /// 4-bit palette index.
    C4,
    /// 8-bit palette index.
    C8,
    /// 14-bit palette index (upper 2 bits unused).
    C14X2,
    /// Block-compressed (BC1-like, 4x4 sub-blocks in a 2x2 tile).
    Cmpr,
    /// External framebuffer scanout data (YUYV, linear layout).
    Xfb,
}

/// Palette (TLUT) entry formats for the indexed texture formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TlutFormat {
    #[default]
    Ia8,
    Rgb565,
    Rgb5A3,
}

impl TextureFormat {
    pub fn is_indexed(self) -> bool {
        matches!(self, TextureFormat::C4 | TextureFormat::C8 | TextureFormat::C14X2)
    }

    /// Texel columns per block.
    pub fn block_width(self) -> u32 {
        match self {
            TextureFormat::I4 | TextureFormat::C4 | TextureFormat::Cmpr => 8,
            TextureFormat::I8 | TextureFormat::Ia4 | TextureFormat::C8 => 8,
            TextureFormat::Ia8
            | TextureFormat::Rgb565
            | TextureFormat::Rgb5A3
            | TextureFormat::Rgba8
            | TextureFormat::C14X2 => 4,
            // XFB data is linear; treat a row pair as the "block".
            TextureFormat::Xfb => 16,
        }
    }

    /// Texel rows per block.
    pub fn block_height(self) -> u32 {
        match self {
            TextureFormat::I4 | TextureFormat::C4 | TextureFormat::Cmpr => 8,
            TextureFormat::I8 | TextureFormat::Ia4 | TextureFormat::C8 => 4,
            TextureFormat::Ia8
            | TextureFormat::Rgb565
            | TextureFormat::Rgb5A3
            | TextureFormat::Rgba8
            | TextureFormat::C14X2 => 4,
            TextureFormat::Xfb => 1,
        }
    }

    pub fn bytes_per_block(self) -> u32 {
        match self {
            TextureFormat::Rgba8 => 64,
            _ => 32,
        }
    }

    /// Width rounded up to a whole number of blocks.
    pub fn expanded_width(self, width: u32) -> u32 {
        round_up(width, self.block_width())
    }

    /// Height rounded up to a whole number of blocks.
    pub fn expanded_height(self, height: u32) -> u32 {
        round_up(height, self.block_height())
    }

    /// Total byte size of a `width` x `height` image in guest memory.
    pub fn texture_size_in_bytes(self, width: u32, height: u32) -> u32 {
        let blocks_x = self.expanded_width(width) / self.block_width();
        let blocks_y = self.expanded_height(height) / self.block_height();
        blocks_x * blocks_y * self.bytes_per_block()
    }

    /// Bytes occupied by one row of blocks.
    pub fn bytes_per_row(self, width: u32) -> u32 {
        (self.expanded_width(width) / self.block_width()) * self.bytes_per_block()
    }

    /// Number of palette entries an indexed texture can reference.
    pub fn palette_entries(self) -> u32 {
        match self {
            TextureFormat::C4 => 16,
            TextureFormat::C8 => 256,
            TextureFormat::C14X2 => 16384,
            _ => 0,
        }
    }

    /// Byte size of the palette for an indexed format (entries are 16-bit).
    pub fn palette_size_in_bytes(self) -> u32 {
        self.palette_entries() * 2
    }
}

/// EFB pixel formats (the console's framebuffer bit layouts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EfbFormat {
    #[default]
    Rgb8Z24,
    Rgba6Z24,
    Rgb565Z16,
    Z24,
}

impl EfbFormat {
    pub fn has_alpha(self) -> bool {
        matches!(self, EfbFormat::Rgba6Z24)
    }
}

/// Destination formats for EFB-to-RAM copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EfbCopyFormat {
    R4,
    R8,
    Ra4,
    Ra8,
    Rgb565,
    Rgb5A3,
    Rgba8,
    A8,
    G8,
    B8,
    Rg8,
    Gb8,
    Xfb,
}

impl EfbCopyFormat {
    /// The texture format a later fetch of the copied memory decodes as.
    /// Depth copies store Z24 in the same byte layouts as the color formats.
    pub fn as_texture_format(self) -> TextureFormat {
        match self {
            EfbCopyFormat::R4 => TextureFormat::I4,
            EfbCopyFormat::R8 | EfbCopyFormat::A8 | EfbCopyFormat::G8 | EfbCopyFormat::B8 => {
                TextureFormat::I8
            }
            EfbCopyFormat::Ra4 => TextureFormat::Ia4,
            EfbCopyFormat::Ra8 | EfbCopyFormat::Rg8 | EfbCopyFormat::Gb8 => TextureFormat::Ia8,
            EfbCopyFormat::Rgb565 => TextureFormat::Rgb565,
            EfbCopyFormat::Rgb5A3 => TextureFormat::Rgb5A3,
            EfbCopyFormat::Rgba8 => TextureFormat::Rgba8,
            EfbCopyFormat::Xfb => TextureFormat::Xfb,
        }
    }
}

/// Parameter block describing one EFB copy-out operation. Doubles as the
/// cache key for per-variant encoding state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EfbCopyParams {
    pub efb_format: EfbFormat,
    pub copy_format: EfbCopyFormat,
    pub depth: bool,
    pub yuv: bool,
    pub y_scale: f32,
    /// Copy gamma curve; 1.0 passes colors through unchanged.
    pub gamma: f32,
}

/// Host texture formats the backends can allocate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbstractTextureFormat {
    Rgba8,
    Bgra8,
    Dxt1,
    Dxt3,
    Dxt5,
    /// 32-bit float depth.
    D32F,
}

impl AbstractTextureFormat {
    pub fn is_depth(self) -> bool {
        matches!(self, AbstractTextureFormat::D32F)
    }

    pub fn is_block_compressed(self) -> bool {
        matches!(
            self,
            AbstractTextureFormat::Dxt1 | AbstractTextureFormat::Dxt3 | AbstractTextureFormat::Dxt5
        )
    }

    /// Bytes per texel for uncompressed formats, bytes per 4x4 block for
    /// compressed ones.
    pub fn stride_unit(self) -> u32 {
        match self {
            AbstractTextureFormat::Rgba8 | AbstractTextureFormat::Bgra8 => 4,
            AbstractTextureFormat::D32F => 4,
            AbstractTextureFormat::Dxt1 => 8,
            AbstractTextureFormat::Dxt3 | AbstractTextureFormat::Dxt5 => 16,
        }
    }

    /// Byte size of one `row_length`-wide row at this format.
    pub fn row_size_in_bytes(self, row_length: u32) -> u32 {
        if self.is_block_compressed() {
            round_up(row_length, 4) / 4 * self.stride_unit()
        } else {
            row_length * self.stride_unit()
        }
    }
}

/// EFB color reinterpretation selectors (live format → requested format).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormatConversion {
    Rgb8ToRgba6,
    Rgb8ToRgb565,
    Rgba6ToRgb8,
    Rgba6ToRgb565,
    Rgb565ToRgb8,
    Rgb565ToRgba6,
}

pub(crate) fn round_up(value: u32, factor: u32) -> u32 {
    (value + factor - 1) / factor * factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_geometry_matches_hardware_tables() {
        assert_eq!(TextureFormat::I4.block_width(), 8);
        assert_eq!(TextureFormat::I4.block_height(), 8);
        assert_eq!(TextureFormat::I8.block_height(), 4);
        assert_eq!(TextureFormat::Rgba8.bytes_per_block(), 64);
        assert_eq!(TextureFormat::Cmpr.bytes_per_block(), 32);
    }

    #[test]
    fn texture_sizes() {
        // 64x64 I8: 8x16 blocks of 32 bytes.
        assert_eq!(TextureFormat::I8.texture_size_in_bytes(64, 64), 8 * 16 * 32);
        // 64x64 RGBA8: 16x16 blocks of 64 bytes = width*height*4.
        assert_eq!(TextureFormat::Rgba8.texture_size_in_bytes(64, 64), 64 * 64 * 4);
        // Non-block-aligned dimensions round up.
        assert_eq!(
            TextureFormat::I4.texture_size_in_bytes(9, 9),
            TextureFormat::I4.texture_size_in_bytes(16, 16)
        );
    }

    #[test]
    fn xfb_size_is_two_bytes_per_texel() {
        assert_eq!(TextureFormat::Xfb.texture_size_in_bytes(640, 480), 640 * 480 * 2);
    }

    #[test]
    fn palette_sizes() {
        assert_eq!(TextureFormat::C4.palette_size_in_bytes(), 32);
        assert_eq!(TextureFormat::C8.palette_size_in_bytes(), 512);
        assert_eq!(TextureFormat::I8.palette_size_in_bytes(), 0);
    }
}
