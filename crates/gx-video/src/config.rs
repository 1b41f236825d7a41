//! Video configuration consumed (read-only) by the core.

use std::path::PathBuf;

/// Internal-resolution scale for the virtual EFB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EfbScale {
    /// Smallest integer scale whose target size covers the render window.
    #[default]
    Auto,
    /// Fixed integer multiplier (1 = native).
    Integer(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AspectMode {
    /// Use the widescreen heuristic to pick between 4:3 and 16:9.
    #[default]
    Auto,
    /// Stretch to the window, ignoring the picture aspect ratio.
    Stretch,
    /// Force the analog TV ratio (4:3).
    Analog,
    /// Force anamorphic widescreen (16:9).
    AnalogWide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StereoMode {
    #[default]
    Off,
    SideBySide,
    TopBottom,
    QuadBuffer,
    Interleaved,
}

/// How color peeks report the alpha channel, mirroring the console's
/// pixel-engine alpha-read register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlphaReadMode {
    /// Return the stored alpha unmodified.
    #[default]
    ReadNone,
    /// Force alpha to 0xFF.
    ReadFf,
    /// Force alpha to 0x00.
    Read00,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameDumpFormat {
    /// One PNG per presented frame.
    #[default]
    ImageSequence,
    /// Single video file. Not implemented natively; falls back to
    /// [`FrameDumpFormat::ImageSequence`] with a logged warning.
    Video,
}

#[derive(Debug, Clone)]
pub struct FrameDumpConfig {
    pub format: FrameDumpFormat,
    /// Directory frame PNGs are written to.
    pub directory: PathBuf,
    /// Overwrite an existing dump without asking the caller to confirm.
    pub silent_overwrite: bool,
}

impl Default for FrameDumpConfig {
    fn default() -> Self {
        Self {
            format: FrameDumpFormat::ImageSequence,
            directory: PathBuf::from("dump"),
            silent_overwrite: true,
        }
    }
}

/// Texture-hash accuracy/performance trade-off.
///
/// `0` hashes every byte of the texture (safe). A non-zero value hashes that
/// many evenly spaced chunks instead; this is measurably faster for large
/// textures but can miss writes that land entirely between sampled chunks,
/// producing a stale cache hit. XFB entries always hash fully regardless of
/// this setting.
pub type HashSampleCount = u32;

#[derive(Debug, Clone)]
pub struct VideoConfig {
    pub efb_scale: EfbScale,
    /// MSAA sample count for the EFB targets; 1 disables multisampling.
    pub msaa_samples: u32,
    pub stereo_mode: StereoMode,
    pub aspect_mode: AspectMode,
    /// Crop the presented picture to exactly 4:3 / 16:9.
    pub crop: bool,
    pub hash_samples: HashSampleCount,
    /// Keep EFB-copy entries alive in the cache so later texture fetches can
    /// reuse them instead of re-decoding guest RAM.
    pub efb_copy_cache_enable: bool,
    pub frame_dump: FrameDumpConfig,
    /// Show FPS in the debug text overlay.
    pub show_fps: bool,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            efb_scale: EfbScale::Integer(1),
            msaa_samples: 1,
            stereo_mode: StereoMode::Off,
            aspect_mode: AspectMode::Auto,
            crop: false,
            hash_samples: 0,
            efb_copy_cache_enable: true,
            frame_dump: FrameDumpConfig::default(),
            show_fps: false,
        }
    }
}

impl VideoConfig {
    pub fn multisampling_enabled(&self) -> bool {
        self.msaa_samples > 1
    }
}
