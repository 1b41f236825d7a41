use std::path::PathBuf;

/// Failures surfaced by the video core.
///
/// Nothing in this crate propagates an error across the command-decode
/// boundary as a panic: resource-creation failures degrade the affected
/// operation (a draw proceeds with no bound texture, a copy is skipped)
/// and frame-dump I/O failures disable dumping. Shader-compile failures
/// are the one class callers are expected to surface to the user, since
/// silently continuing corrupts output in ways users misattribute to the
/// guest program.
#[derive(Debug, thiserror::Error)]
pub enum VideoError {
    #[error("backend failed to allocate a {width}x{height} texture ({levels} levels, {layers} layers)")]
    TextureAllocation {
        width: u32,
        height: u32,
        levels: u32,
        layers: u32,
    },

    #[error("backend failed to allocate a staging texture of {size} bytes")]
    StagingAllocation { size: usize },

    #[error("failed to compile {kind} shader: {message}")]
    ShaderCompile { kind: &'static str, message: String },

    #[error("backend does not support {0}")]
    Unsupported(&'static str),

    #[error("guest memory range {address:#010x}+{len:#x} is out of bounds")]
    GuestMemoryRange { address: u32, len: u32 },

    #[error("failed to write {path}")]
    ImageWrite {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
