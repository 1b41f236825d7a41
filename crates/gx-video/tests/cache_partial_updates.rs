//! End-to-end texture cache scenarios: aliasing, partial reconstruction
//! from EFB copies, and eviction.

use gx_video::backend::soft::{SoftBackend, SwTexture};
use gx_video::cache::{TextureCache, TextureLookup, TEXTURE_KILL_THRESHOLD};
use gx_video::format::{EfbCopyFormat, EfbCopyParams, EfbFormat, TextureFormat};
use gx_video::guest_mem::GuestMemory;

use pretty_assertions::assert_eq;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn i8_lookup(address: u32, width: u32, height: u32) -> TextureLookup {
    TextureLookup {
        address,
        width,
        height,
        format: TextureFormat::I8,
        tlut: None,
    }
}

fn copy_params() -> EfbCopyParams {
    EfbCopyParams {
        efb_format: EfbFormat::Rgba6Z24,
        copy_format: EfbCopyFormat::R8,
        depth: false,
        yuv: false,
        y_scale: 1.0,
        gamma: 1.0,
    }
}

/// Linear RGBA8 with every channel set to `v` (so an R8 encode/I8 decode
/// round trip reproduces it exactly).
fn solid(v: u8, width: u32, height: u32) -> Vec<u8> {
    vec![v; (width * height * 4) as usize]
}

fn texel(cache: &TextureCache, id: gx_video::EntryId, x: u32, y: u32) -> [u8; 4] {
    let tex = cache
        .entry(id)
        .unwrap()
        .texture()
        .as_any()
        .downcast_ref::<SwTexture>()
        .unwrap();
    let p = tex.texel(0, x, y);
    [p[0], p[1], p[2], p[3]]
}

#[test]
fn overlapping_copies_reconstruct_a_cached_texture() {
    init_tracing();
    let backend = SoftBackend::new();
    let mut mem = GuestMemory::new();
    let mut cache = TextureCache::new(0, true);

    // A 16x16 I8 texture the guest uploaded normally.
    let addr = 0x10_0000;
    mem.write(addr, &[0x55; 256]).unwrap();
    let original = cache.get_texture(&backend, &mem, &i8_lookup(addr, 16, 16)).unwrap();
    assert_eq!(texel(&cache, original, 0, 0), [0x55; 4]);

    // Two 16x8 EFB copies that together cover its footprint. I8 is 8x4
    // blocks at 32 bytes, so a 16-texel-wide copy spans 64 bytes per block
    // row and the second copy starts two block rows (128 bytes) in.
    let top = solid(100, 16, 8);
    let bottom = solid(200, 16, 8);
    cache
        .copy_render_target_to_texture(&backend, &mut mem, addr, 0, &copy_params(), &top, 16, 8, false, false)
        .unwrap()
        .unwrap();
    cache
        .copy_render_target_to_texture(
            &backend,
            &mut mem,
            addr + 128,
            0,
            &copy_params(),
            &bottom,
            16,
            8,
            false,
            false,
        )
        .unwrap()
        .unwrap();

    // The next fetch rebuilds the entry; its content must equal a full
    // decode of the (rewritten) guest memory.
    let rebuilt = cache.get_texture(&backend, &mem, &i8_lookup(addr, 16, 16)).unwrap();
    assert_ne!(rebuilt, original);
    assert_eq!(texel(&cache, rebuilt, 0, 0), [100; 4]);
    assert_eq!(texel(&cache, rebuilt, 15, 7), [100; 4]);
    assert_eq!(texel(&cache, rebuilt, 0, 8), [200; 4]);
    assert_eq!(texel(&cache, rebuilt, 15, 15), [200; 4]);
    assert!(cache.stats.partial_updates >= 2);
}

#[test]
fn copy_entries_participate_in_eviction() {
    let backend = SoftBackend::new();
    let mut mem = GuestMemory::new();
    let mut cache = TextureCache::new(0, true);

    let id = cache
        .copy_render_target_to_texture(
            &backend,
            &mut mem,
            0x20_0000,
            0,
            &copy_params(),
            &solid(50, 16, 8),
            16,
            8,
            false,
            false,
        )
        .unwrap()
        .unwrap();
    assert!(cache.entry(id).is_some());

    for _ in 0..=TEXTURE_KILL_THRESHOLD + 1 {
        cache.cleanup();
    }
    assert!(cache.entry(id).is_none());
}

#[test]
fn scale_by_half_box_filters_the_copy() {
    let backend = SoftBackend::new();
    let mut mem = GuestMemory::new();
    let mut cache = TextureCache::new(0, true);

    // Alternating 0/200 columns average to 100 under the 2x2 box filter.
    let (w, h) = (16u32, 8u32);
    let mut pixels = vec![0u8; (w * h * 4) as usize];
    for y in 0..h {
        for x in 0..w {
            let v = if x % 2 == 0 { 0 } else { 200 };
            let off = ((y * w + x) * 4) as usize;
            pixels[off..off + 4].copy_from_slice(&[v; 4]);
        }
    }
    let id = cache
        .copy_render_target_to_texture(
            &backend,
            &mut mem,
            0x30_0000,
            0,
            &copy_params(),
            &pixels,
            w,
            h,
            true,
            false,
        )
        .unwrap()
        .unwrap();

    let entry = cache.entry(id).unwrap();
    assert_eq!(entry.native_width, 8);
    assert_eq!(entry.native_height, 4);
    assert_eq!(texel(&cache, id, 0, 0), [100; 4]);
}

#[test]
fn strided_copy_leaves_the_row_gaps_untouched() {
    let backend = SoftBackend::new();
    let mut mem = GuestMemory::new();
    let mut cache = TextureCache::new(0, true);

    // 16x8 I8 is two 64-byte block rows; a 128-byte stride leaves a
    // 64-byte gap after each row.
    let addr = 0x60_0000;
    let id = cache
        .copy_render_target_to_texture(
            &backend,
            &mut mem,
            addr,
            128,
            &copy_params(),
            &solid(100, 16, 8),
            16,
            8,
            false,
            false,
        )
        .unwrap()
        .unwrap();

    assert_eq!(cache.entry(id).unwrap().memory_stride, 128);
    assert_eq!(mem.slice(addr, 64).unwrap(), &[100u8; 64][..]);
    assert_eq!(mem.slice(addr + 64, 64).unwrap(), &[0u8; 64][..]);
    assert_eq!(mem.slice(addr + 128, 64).unwrap(), &[100u8; 64][..]);
}

#[test]
fn strided_xfb_copy_blacks_out_the_gap() {
    let backend = SoftBackend::new();
    let mut mem = GuestMemory::new();
    let mut cache = TextureCache::new(0, true);

    // 16-pixel-wide XFB rows are 32 bytes; a 64-byte stride leaves a
    // 32-byte gap the display scans straight through.
    let addr = 0x80_0000;
    mem.write(addr, &[0xde; 256]).unwrap();
    let params = EfbCopyParams {
        efb_format: EfbFormat::Rgb8Z24,
        copy_format: EfbCopyFormat::Xfb,
        depth: false,
        yuv: true,
        y_scale: 1.0,
        gamma: 1.0,
    };
    cache
        .copy_render_target_to_texture(
            &backend,
            &mut mem,
            addr,
            64,
            &params,
            &solid(100, 16, 4),
            16,
            4,
            false,
            false,
        )
        .unwrap()
        .unwrap();

    // Gaps between rows hold the YUYV pattern that presents as black.
    for row in 0..3u32 {
        let gap = mem.slice(addr + row * 64 + 32, 32).unwrap();
        for pair in gap.chunks_exact(2) {
            assert_eq!(pair, &[0x10, 0x80][..]);
        }
    }
    // Nothing follows the last row, so the copy ends with it.
    assert_eq!(mem.slice(addr + 3 * 64 + 32, 32).unwrap(), &[0xde; 32][..]);
}

#[test]
fn alphaless_efb_formats_copy_out_opaque() {
    let backend = SoftBackend::new();
    let mut mem = GuestMemory::new();
    let mut cache = TextureCache::new(0, true);

    let params = EfbCopyParams {
        efb_format: EfbFormat::Rgb8Z24,
        ..copy_params()
    };
    let mut pixels = solid(100, 16, 8);
    // Whatever alpha the render target held is not what the guest sees.
    for texel in pixels.chunks_exact_mut(4) {
        texel[3] = 0x20;
    }
    let id = cache
        .copy_render_target_to_texture(
            &backend,
            &mut mem,
            0x70_0000,
            0,
            &params,
            &pixels,
            16,
            8,
            false,
            false,
        )
        .unwrap()
        .unwrap();

    assert_eq!(texel(&cache, id, 0, 0), [100, 100, 100, 0xff]);
}

#[test]
fn alias_at_a_new_address_reuses_the_entry() {
    let backend = SoftBackend::new();
    let mut mem = GuestMemory::new();
    let mut cache = TextureCache::new(0, true);

    mem.write(0x40_0000, &[0x7f; 256]).unwrap();
    mem.write(0x50_0000, &[0x7f; 256]).unwrap();

    let a = cache.get_texture(&backend, &mem, &i8_lookup(0x40_0000, 16, 16)).unwrap();
    let b = cache.get_texture(&backend, &mem, &i8_lookup(0x50_0000, 16, 16)).unwrap();
    assert_eq!(a, b);
    assert_eq!(cache.stats.textures_aliased, 1);
}
