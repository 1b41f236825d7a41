//! Console GPU virtualization core: the EFB/XFB framebuffer model, the
//! content-addressable texture cache, and the renderer that sequences
//! frame presentation.
//!
//! The emulated console renders into a small embedded framebuffer (EFB),
//! copies regions of it into main memory as tiled texture data, and scans
//! a region of main memory (the XFB) out to the display. None of that
//! exists on host GPUs, so this crate reconstructs it: guest texture
//! memory is decoded and cached as host textures keyed by address and
//! content hash, the EFB lives as a pair of render targets with CPU
//! peek/poke access, and presentation goes through a swap path with
//! asynchronous frame capture.
//!
//! Graphics APIs plug in through [`backend::VideoBackend`] and the
//! resource traits in [`texture`]. The crate ships two CPU-side backends:
//! [`backend::null::NullBackend`] (headless) and
//! [`backend::soft::SoftBackend`] (real pixel storage, used by the tests).
//!
//! Everything here is driven synchronously from the emulation thread;
//! the only internal thread is the frame-dump encoder in [`frame_dump`].

pub mod backend;
pub mod cache;
pub mod config;
pub mod decode;
pub mod error;
pub mod format;
pub mod frame_dump;
pub mod framebuffer;
pub mod guest_mem;
pub mod rect;
pub mod renderer;
pub mod stats;
pub mod texture;

pub use backend::{BackendCaps, BackendKind, VideoBackend};
pub use cache::{CacheEntry, EntryId, TextureCache, TextureLookup};
pub use config::{AlphaReadMode, AspectMode, EfbScale, StereoMode, VideoConfig};
pub use error::VideoError;
pub use format::{EfbCopyFormat, EfbCopyParams, EfbFormat, TextureFormat, TlutFormat};
pub use framebuffer::{FramebufferManager, EFB_HEIGHT, EFB_WIDTH};
pub use guest_mem::GuestMemory;
pub use rect::{EfbRect, Rectangle, TargetRect};
pub use renderer::{EfbAccess, FramePhase, Renderer};
pub use texture::{AbstractStagingTexture, AbstractTexture, StagingTextureType, TextureConfig};
