//! Renderer swap path: XFB lookup, duplicate-frame suppression, and the
//! asynchronous dump pipeline.

use gx_video::backend::soft::SoftBackend;
use gx_video::cache::TextureCache;
use gx_video::config::{FrameDumpConfig, FrameDumpFormat, VideoConfig};
use gx_video::format::TextureFormat;
use gx_video::guest_mem::GuestMemory;
use gx_video::renderer::Renderer;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

const FB_WIDTH: u32 = 640;
const FB_HEIGHT: u32 = 480;
const XFB_ADDR: u32 = 0x0040_0000;

fn xfb_size() -> u32 {
    TextureFormat::Xfb.texture_size_in_bytes(FB_WIDTH, FB_HEIGHT)
}

fn soft_renderer(config: VideoConfig) -> Renderer {
    Renderer::new(Box::new(SoftBackend::new()), config).unwrap()
}

fn present_count(renderer: &Renderer) -> u64 {
    renderer
        .backend()
        .as_any()
        .downcast_ref::<SoftBackend>()
        .unwrap()
        .present_count()
}

#[test]
fn swap_presents_once_per_distinct_xfb() {
    init_tracing();
    let mut renderer = soft_renderer(VideoConfig::default());
    let mut mem = GuestMemory::new();
    TextureCache::uninitialize_xfb_memory(&mut mem, XFB_ADDR, xfb_size()).unwrap();

    renderer.swap(&mem, XFB_ADDR, FB_WIDTH, FB_WIDTH, FB_HEIGHT, 1000);
    assert_eq!(present_count(&renderer), 1);

    // Identical XFB content: the guest repeated a frame.
    renderer.swap(&mem, XFB_ADDR, FB_WIDTH, FB_WIDTH, FB_HEIGHT, 2000);
    assert_eq!(present_count(&renderer), 1);

    // New content presents again.
    mem.write(XFB_ADDR, &[0xe0, 0x80, 0xe0, 0x80]).unwrap();
    renderer.swap(&mem, XFB_ADDR, FB_WIDTH, FB_WIDTH, FB_HEIGHT, 3000);
    assert_eq!(present_count(&renderer), 2);
    assert_eq!(renderer.frame_number(), 3);
}

#[test]
fn presented_uninitialized_xfb_is_black() {
    let mut renderer = soft_renderer(VideoConfig::default());
    renderer.set_window_size(640, 480);
    let mut mem = GuestMemory::new();
    TextureCache::uninitialize_xfb_memory(&mut mem, XFB_ADDR, xfb_size()).unwrap();

    renderer.swap(&mem, XFB_ADDR, FB_WIDTH, FB_WIDTH, FB_HEIGHT, 0);

    let backend = renderer
        .backend()
        .as_any()
        .downcast_ref::<SoftBackend>()
        .unwrap();
    let (display, width, height) = backend.display();
    assert!(width > 0 && height > 0);
    let center = (((height / 2) * width + width / 2) * 4) as usize;
    assert_eq!(&display[center..center + 4], &[0, 0, 0, 0xff]);
}

#[test]
fn frame_dump_lags_one_frame_and_drains_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = VideoConfig::default();
    config.frame_dump = FrameDumpConfig {
        format: FrameDumpFormat::ImageSequence,
        directory: dir.path().to_owned(),
        silent_overwrite: true,
    };
    let mut renderer = soft_renderer(config);
    let mut mem = GuestMemory::new();
    TextureCache::uninitialize_xfb_memory(&mut mem, XFB_ADDR, xfb_size()).unwrap();

    renderer.start_frame_dumping();
    renderer.swap(&mem, XFB_ADDR, FB_WIDTH, FB_WIDTH, FB_HEIGHT, 100);
    mem.write(XFB_ADDR, &[0xe0, 0x80, 0xe0, 0x80]).unwrap();
    renderer.swap(&mem, XFB_ADDR, FB_WIDTH, FB_WIDTH, FB_HEIGHT, 200);
    renderer.shutdown();

    assert!(dir.path().join("frame_000000_100.png").exists());
    assert!(dir.path().join("frame_000001_200.png").exists());
}

#[test]
fn screenshot_is_synchronous_with_the_swap() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = VideoConfig::default();
    config.frame_dump.directory = dir.path().to_owned();
    let mut renderer = soft_renderer(config);
    let mut mem = GuestMemory::new();
    TextureCache::uninitialize_xfb_memory(&mut mem, XFB_ADDR, xfb_size()).unwrap();

    let shot = dir.path().join("screenshot.png");
    renderer.save_screenshot(shot.clone());
    renderer.swap(&mem, XFB_ADDR, FB_WIDTH, FB_WIDTH, FB_HEIGHT, 0);

    assert!(shot.exists());
    let img = image::open(&shot).unwrap().to_rgba8();
    assert_eq!(img.dimensions(), (FB_WIDTH, FB_HEIGHT));
    // Uninitialized XFB scans out as black.
    assert_eq!(img.get_pixel(10, 10).0, [0, 0, 0, 255]);
}
