//! CPU texel codec: tiled guest formats → linear RGBA8, and the reverse
//! encoders used when the EFB is copied back into guest memory.
//!
//! Guest texture memory is tiled (see [`crate::format`]); every decoder
//! walks source blocks and scatters texels into a linear RGBA8 image.
//! All multi-byte guest values are big-endian.

use crate::format::{EfbCopyFormat, TextureFormat, TlutFormat};

#[inline]
fn expand3(v: u8) -> u8 {
    (v << 5) | (v << 2) | (v >> 1)
}

#[inline]
fn expand4(v: u8) -> u8 {
    v * 0x11
}

#[inline]
fn expand5(v: u8) -> u8 {
    (v << 3) | (v >> 2)
}

#[inline]
fn expand6(v: u8) -> u8 {
    (v << 2) | (v >> 4)
}

#[inline]
fn decode_rgb565(val: u16) -> [u8; 4] {
    let r = expand5(((val >> 11) & 0x1f) as u8);
    let g = expand6(((val >> 5) & 0x3f) as u8);
    let b = expand5((val & 0x1f) as u8);
    [r, g, b, 0xff]
}

#[inline]
fn decode_rgb5a3(val: u16) -> [u8; 4] {
    if val & 0x8000 != 0 {
        let r = expand5(((val >> 10) & 0x1f) as u8);
        let g = expand5(((val >> 5) & 0x1f) as u8);
        let b = expand5((val & 0x1f) as u8);
        [r, g, b, 0xff]
    } else {
        let a = expand3(((val >> 12) & 0x7) as u8);
        let r = expand4(((val >> 8) & 0xf) as u8);
        let g = expand4(((val >> 4) & 0xf) as u8);
        let b = expand4((val & 0xf) as u8);
        [r, g, b, a]
    }
}

/// Decode one TLUT entry. Entry byte order matches guest memory: IA8
/// entries are `[alpha, intensity]`, the RGB formats are big-endian u16.
pub fn decode_tlut_entry(fmt: TlutFormat, bytes: [u8; 2]) -> [u8; 4] {
    match fmt {
        TlutFormat::Ia8 => {
            let (a, i) = (bytes[0], bytes[1]);
            [i, i, i, a]
        }
        TlutFormat::Rgb565 => decode_rgb565(u16::from_be_bytes(bytes)),
        TlutFormat::Rgb5A3 => decode_rgb5a3(u16::from_be_bytes(bytes)),
    }
}

fn tlut_lookup(tlut: &[u8], fmt: TlutFormat, index: usize) -> [u8; 4] {
    let off = index * 2;
    if off + 2 > tlut.len() {
        return [0, 0, 0, 0];
    }
    decode_tlut_entry(fmt, [tlut[off], tlut[off + 1]])
}

#[inline]
fn put_pixel(dst: &mut [u8], width: u32, x: u32, y: u32, rgba: [u8; 4]) {
    let off = ((y * width + x) * 4) as usize;
    dst[off..off + 4].copy_from_slice(&rgba);
}

/// Decode a whole tiled guest texture into a linear `width * height * 4`
/// RGBA8 image. `src` must cover the block-expanded image
/// ([`TextureFormat::texture_size_in_bytes`]); texels outside `width` x
/// `height` (block padding) are dropped. Indexed formats require `tlut`.
pub fn decode_texture(
    dst: &mut [u8],
    src: &[u8],
    width: u32,
    height: u32,
    format: TextureFormat,
    tlut: Option<(&[u8], TlutFormat)>,
) {
    assert_eq!(dst.len(), (width * height * 4) as usize, "destination size mismatch");
    debug_assert!(
        src.len() >= format.texture_size_in_bytes(width, height) as usize,
        "source smaller than block-expanded image"
    );

    match format {
        TextureFormat::Cmpr => return decode_cmpr(dst, src, width, height),
        TextureFormat::Xfb => return decode_yuyv(dst, src, width, height),
        _ => {}
    }

    let bw = format.block_width();
    let bh = format.block_height();
    let bpb = format.bytes_per_block() as usize;
    let blocks_x = format.expanded_width(width) / bw;
    let blocks_y = format.expanded_height(height) / bh;

    for by in 0..blocks_y {
        for bx in 0..blocks_x {
            let block = &src[((by * blocks_x + bx) as usize) * bpb..][..bpb];
            for ty in 0..bh {
                for tx in 0..bw {
                    let x = bx * bw + tx;
                    let y = by * bh + ty;
                    if x >= width || y >= height {
                        continue;
                    }
                    let i = (ty * bw + tx) as usize;
                    let rgba = match format {
                        TextureFormat::I4 => {
                            let byte = block[i / 2];
                            let v = if i % 2 == 0 { byte >> 4 } else { byte & 0xf };
                            let v = expand4(v);
                            [v, v, v, v]
                        }
                        TextureFormat::I8 => {
                            let v = block[i];
                            [v, v, v, v]
                        }
                        TextureFormat::Ia4 => {
                            let byte = block[i];
                            let v = expand4(byte & 0xf);
                            let a = expand4(byte >> 4);
                            [v, v, v, a]
                        }
                        TextureFormat::Ia8 => {
                            let (a, v) = (block[i * 2], block[i * 2 + 1]);
                            [v, v, v, a]
                        }
                        TextureFormat::Rgb565 => {
                            decode_rgb565(u16::from_be_bytes([block[i * 2], block[i * 2 + 1]]))
                        }
                        TextureFormat::Rgb5A3 => {
                            decode_rgb5a3(u16::from_be_bytes([block[i * 2], block[i * 2 + 1]]))
                        }
                        TextureFormat::Rgba8 => {
                            // Split-plane block: 32 bytes of AR pairs then
                            // 32 bytes of GB pairs.
                            let a = block[i * 2];
                            let r = block[i * 2 + 1];
                            let g = block[32 + i * 2];
                            let b = block[32 + i * 2 + 1];
                            [r, g, b, a]
                        }
                        TextureFormat::C4 => {
                            let byte = block[i / 2];
                            let idx = if i % 2 == 0 { byte >> 4 } else { byte & 0xf };
                            match tlut {
                                Some((t, f)) => tlut_lookup(t, f, idx as usize),
                                None => [0, 0, 0, 0],
                            }
                        }
                        TextureFormat::C8 => match tlut {
                            Some((t, f)) => tlut_lookup(t, f, block[i] as usize),
                            None => [0, 0, 0, 0],
                        },
                        TextureFormat::C14X2 => {
                            let idx =
                                u16::from_be_bytes([block[i * 2], block[i * 2 + 1]]) & 0x3fff;
                            match tlut {
                                Some((t, f)) => tlut_lookup(t, f, idx as usize),
                                None => [0, 0, 0, 0],
                            }
                        }
                        TextureFormat::Cmpr | TextureFormat::Xfb => unreachable!(),
                    };
                    put_pixel(dst, width, x, y, rgba);
                }
            }
        }
    }
}

/// CMPR: 8x8 tiles of four BC1-style 4x4 sub-blocks, in the order
/// top-left, top-right, bottom-left, bottom-right.
fn decode_cmpr(dst: &mut [u8], src: &[u8], width: u32, height: u32) {
    let blocks_x = TextureFormat::Cmpr.expanded_width(width) / 8;
    let blocks_y = TextureFormat::Cmpr.expanded_height(height) / 8;

    for by in 0..blocks_y {
        for bx in 0..blocks_x {
            let tile = &src[((by * blocks_x + bx) as usize) * 32..][..32];
            for sub in 0..4u32 {
                let sx = bx * 8 + (sub % 2) * 4;
                let sy = by * 8 + (sub / 2) * 4;
                let b = &tile[(sub as usize) * 8..][..8];

                let c0 = u16::from_be_bytes([b[0], b[1]]);
                let c1 = u16::from_be_bytes([b[2], b[3]]);
                let p0 = decode_rgb565(c0);
                let p1 = decode_rgb565(c1);
                let (p2, p3) = if c0 > c1 {
                    (
                        lerp_third(p0, p1, false),
                        lerp_third(p0, p1, true),
                    )
                } else {
                    let mid = [
                        ((p0[0] as u16 + p1[0] as u16) / 2) as u8,
                        ((p0[1] as u16 + p1[1] as u16) / 2) as u8,
                        ((p0[2] as u16 + p1[2] as u16) / 2) as u8,
                        0xff,
                    ];
                    (mid, [0, 0, 0, 0])
                };
                let palette = [p0, p1, p2, p3];

                for ty in 0..4u32 {
                    let row = b[4 + ty as usize];
                    for tx in 0..4u32 {
                        let x = sx + tx;
                        let y = sy + ty;
                        if x >= width || y >= height {
                            continue;
                        }
                        let sel = (row >> (6 - tx * 2)) & 0x3;
                        put_pixel(dst, width, x, y, palette[sel as usize]);
                    }
                }
            }
        }
    }
}

fn lerp_third(a: [u8; 4], b: [u8; 4], far: bool) -> [u8; 4] {
    let mix = |x: u8, y: u8| -> u8 {
        if far {
            ((x as u16 + 2 * y as u16) / 3) as u8
        } else {
            ((2 * x as u16 + y as u16) / 3) as u8
        }
    };
    [mix(a[0], b[0]), mix(a[1], b[1]), mix(a[2], b[2]), 0xff]
}

/// XFB scanout data: YUYV pairs, linear rows. BT.601 integer conversion.
fn decode_yuyv(dst: &mut [u8], src: &[u8], width: u32, height: u32) {
    for y in 0..height {
        for px in 0..width / 2 {
            let off = ((y * width / 2 + px) * 4) as usize;
            let (y0, u, y1, v) = (src[off], src[off + 1], src[off + 2], src[off + 3]);
            let x = px * 2;
            put_pixel(dst, width, x, y, yuv_to_rgba(y0, u, v));
            if x + 1 < width {
                put_pixel(dst, width, x + 1, y, yuv_to_rgba(y1, u, v));
            }
        }
    }
}

#[inline]
fn yuv_to_rgba(y: u8, u: u8, v: u8) -> [u8; 4] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |v: i32| v.clamp(0, 255) as u8;
    let r = clamp((298 * c + 409 * e + 128) >> 8);
    let g = clamp((298 * c - 100 * d - 208 * e + 128) >> 8);
    let b = clamp((298 * c + 516 * d + 128) >> 8);
    [r, g, b, 0xff]
}

#[inline]
fn rgb_to_yuv(rgba: [u8; 4]) -> (u8, u8, u8) {
    let (r, g, b) = (rgba[0] as i32, rgba[1] as i32, rgba[2] as i32);
    let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (y.clamp(0, 255) as u8, u.clamp(0, 255) as u8, v.clamp(0, 255) as u8)
}

#[inline]
fn intensity(rgba: [u8; 4]) -> u8 {
    let (y, _, _) = rgb_to_yuv(rgba);
    y
}

#[inline]
fn src_pixel(src: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
    let off = ((y * width + x) * 4) as usize;
    [src[off], src[off + 1], src[off + 2], src[off + 3]]
}

/// 2x2 box filter for `scale_by_half` EFB copies. Output is
/// `(width/2) * (height/2)` linear RGBA8.
pub fn box_filter_half(src: &[u8], width: u32, height: u32) -> Vec<u8> {
    let ow = width / 2;
    let oh = height / 2;
    let mut out = vec![0u8; (ow * oh * 4) as usize];
    for y in 0..oh {
        for x in 0..ow {
            let mut acc = [0u32; 4];
            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                let p = src_pixel(src, width, x * 2 + dx, y * 2 + dy);
                for c in 0..4 {
                    acc[c] += p[c] as u32;
                }
            }
            let avg = [
                (acc[0] / 4) as u8,
                (acc[1] / 4) as u8,
                (acc[2] / 4) as u8,
                (acc[3] / 4) as u8,
            ];
            put_pixel(&mut out, ow, x, y, avg);
        }
    }
    out
}

/// Apply the EFB copy gamma curve in place (`v^(1/gamma)`, color channels
/// only). A gamma of 1.0 is the identity and skips the pass.
pub fn apply_gamma(pixels: &mut [u8], gamma: f32) {
    if (gamma - 1.0).abs() < f32::EPSILON {
        return;
    }
    let inv = 1.0 / gamma;
    let mut lut = [0u8; 256];
    for (i, out) in lut.iter_mut().enumerate() {
        *out = ((i as f32 / 255.0).powf(inv) * 255.0 + 0.5) as u8;
    }
    for texel in pixels.chunks_exact_mut(4) {
        for c in &mut texel[..3] {
            *c = lut[*c as usize];
        }
    }
}

/// Encode a linear RGBA8 image into tiled guest memory in `copy_format`.
///
/// `dst` receives the block-expanded image
/// (`copy_format.as_texture_format().texture_size_in_bytes(width, height)`
/// bytes). `intensity_fmt` applies the Y conversion the hardware performs
/// for intensity copy formats.
pub fn encode_efb_copy(
    dst: &mut [u8],
    src: &[u8],
    width: u32,
    height: u32,
    copy_format: EfbCopyFormat,
    intensity_fmt: bool,
) {
    if copy_format == EfbCopyFormat::Xfb {
        return encode_yuyv(dst, src, width, height);
    }

    let format = copy_format.as_texture_format();
    let bw = format.block_width();
    let bh = format.block_height();
    let bpb = format.bytes_per_block() as usize;
    let blocks_x = format.expanded_width(width) / bw;
    let blocks_y = format.expanded_height(height) / bh;
    debug_assert!(dst.len() >= blocks_x as usize * blocks_y as usize * bpb);

    let sample = |x: u32, y: u32| -> [u8; 4] {
        // Clamp block padding to the edge texel.
        let x = x.min(width - 1);
        let y = y.min(height - 1);
        let p = src_pixel(src, width, x, y);
        if intensity_fmt {
            let i = intensity(p);
            [i, i, i, p[3]]
        } else {
            p
        }
    };

    for by in 0..blocks_y {
        for bx in 0..blocks_x {
            let block = &mut dst[((by * blocks_x + bx) as usize) * bpb..][..bpb];
            for ty in 0..bh {
                for tx in 0..bw {
                    let p = sample(bx * bw + tx, by * bh + ty);
                    let i = (ty * bw + tx) as usize;
                    match copy_format {
                        EfbCopyFormat::R4 => {
                            let v = p[0] >> 4;
                            if i % 2 == 0 {
                                block[i / 2] = v << 4;
                            } else {
                                block[i / 2] |= v;
                            }
                        }
                        EfbCopyFormat::R8 => block[i] = p[0],
                        EfbCopyFormat::G8 => block[i] = p[1],
                        EfbCopyFormat::B8 => block[i] = p[2],
                        EfbCopyFormat::A8 => block[i] = p[3],
                        EfbCopyFormat::Ra4 => {
                            block[i] = (p[3] & 0xf0) | (p[0] >> 4);
                        }
                        EfbCopyFormat::Ra8 => {
                            block[i * 2] = p[3];
                            block[i * 2 + 1] = p[0];
                        }
                        EfbCopyFormat::Rg8 => {
                            block[i * 2] = p[0];
                            block[i * 2 + 1] = p[1];
                        }
                        EfbCopyFormat::Gb8 => {
                            block[i * 2] = p[1];
                            block[i * 2 + 1] = p[2];
                        }
                        EfbCopyFormat::Rgb565 => {
                            let val = (((p[0] >> 3) as u16) << 11)
                                | (((p[1] >> 2) as u16) << 5)
                                | ((p[2] >> 3) as u16);
                            block[i * 2..i * 2 + 2].copy_from_slice(&val.to_be_bytes());
                        }
                        EfbCopyFormat::Rgb5A3 => {
                            let val = if p[3] >= 0xe0 {
                                0x8000
                                    | (((p[0] >> 3) as u16) << 10)
                                    | (((p[1] >> 3) as u16) << 5)
                                    | ((p[2] >> 3) as u16)
                            } else {
                                (((p[3] >> 5) as u16) << 12)
                                    | (((p[0] >> 4) as u16) << 8)
                                    | (((p[1] >> 4) as u16) << 4)
                                    | ((p[2] >> 4) as u16)
                            };
                            block[i * 2..i * 2 + 2].copy_from_slice(&val.to_be_bytes());
                        }
                        EfbCopyFormat::Rgba8 => {
                            block[i * 2] = p[3];
                            block[i * 2 + 1] = p[0];
                            block[32 + i * 2] = p[1];
                            block[32 + i * 2 + 1] = p[2];
                        }
                        EfbCopyFormat::Xfb => unreachable!(),
                    }
                }
            }
        }
    }
}

fn encode_yuyv(dst: &mut [u8], src: &[u8], width: u32, height: u32) {
    for y in 0..height {
        for px in 0..width / 2 {
            let p0 = src_pixel(src, width, px * 2, y);
            let p1 = src_pixel(src, width, (px * 2 + 1).min(width - 1), y);
            let (y0, u0, v0) = rgb_to_yuv(p0);
            let (y1, u1, v1) = rgb_to_yuv(p1);
            let off = ((y * width / 2 + px) * 4) as usize;
            dst[off] = y0;
            dst[off + 1] = ((u0 as u16 + u1 as u16) / 2) as u8;
            dst[off + 2] = y1;
            dst[off + 3] = ((v0 as u16 + v1 as u16) / 2) as u8;
        }
    }
}

/// The hardware fills the stride gap of a fresh XFB copy with this YUYV
/// "black" pattern rather than leaving stale bytes.
pub const XFB_UNINITIALIZED_TEXEL: [u8; 4] = [0x10, 0x80, 0x10, 0x80];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::TextureFormat;

    #[test]
    fn i8_decode_places_texels_by_block() {
        // 8x4 blocks: texel (8, 0) starts the second block.
        let width = 16;
        let height = 4;
        let mut src = vec![0u8; TextureFormat::I8.texture_size_in_bytes(width, height) as usize];
        src[0] = 0x40; // (0, 0)
        src[32] = 0x80; // first byte of second block = (8, 0)
        let mut dst = vec![0u8; (width * height * 4) as usize];
        decode_texture(&mut dst, &src, width, height, TextureFormat::I8, None);
        assert_eq!(&dst[0..4], &[0x40, 0x40, 0x40, 0x40]);
        let off = (8 * 4) as usize;
        assert_eq!(&dst[off..off + 4], &[0x80, 0x80, 0x80, 0x80]);
    }

    #[test]
    fn rgb565_decode_expands_channels() {
        let mut src = vec![0u8; TextureFormat::Rgb565.texture_size_in_bytes(4, 4) as usize];
        src[0..2].copy_from_slice(&0xf800u16.to_be_bytes()); // pure red
        let mut dst = vec![0u8; 4 * 4 * 4];
        decode_texture(&mut dst, &src, 4, 4, TextureFormat::Rgb565, None);
        assert_eq!(&dst[0..4], &[0xff, 0x00, 0x00, 0xff]);
    }

    #[test]
    fn rgb5a3_selects_layout_by_msb() {
        assert_eq!(decode_rgb5a3(0xffff), [0xff, 0xff, 0xff, 0xff]);
        // MSB clear: A3 RGB444. 0x0fff = a=0, white.
        assert_eq!(decode_rgb5a3(0x0fff), [0xff, 0xff, 0xff, 0x00]);
    }

    #[test]
    fn c8_decode_uses_tlut() {
        let width = 8;
        let height = 4;
        let mut src = vec![0u8; TextureFormat::C8.texture_size_in_bytes(width, height) as usize];
        src[0] = 1;
        let mut tlut = vec![0u8; 512];
        // Entry 1: RGB565 pure green.
        tlut[2..4].copy_from_slice(&0x07e0u16.to_be_bytes());
        let mut dst = vec![0u8; (width * height * 4) as usize];
        decode_texture(
            &mut dst,
            &src,
            width,
            height,
            TextureFormat::C8,
            Some((&tlut, TlutFormat::Rgb565)),
        );
        assert_eq!(&dst[0..4], &[0x00, 0xff, 0x00, 0xff]);
        assert_eq!(&dst[4..8], &[0x00, 0x00, 0x00, 0xff]); // entry 0 = black
    }

    #[test]
    fn cmpr_solid_block() {
        // One sub-block with c0 = red, all selectors 0 -> solid red 4x4.
        let mut src = vec![0u8; TextureFormat::Cmpr.texture_size_in_bytes(8, 8) as usize];
        src[0..2].copy_from_slice(&0xf800u16.to_be_bytes());
        let mut dst = vec![0u8; 8 * 8 * 4];
        decode_texture(&mut dst, &src, 8, 8, TextureFormat::Cmpr, None);
        assert_eq!(&dst[0..4], &[0xff, 0x00, 0x00, 0xff]);
        // Texel (4, 0) belongs to the second (all-zero) sub-block.
        let off = (4 * 4) as usize;
        assert_eq!(&dst[off..off + 4], &[0x00, 0x00, 0x00, 0xff]);
    }

    #[test]
    fn rgba8_encode_decode_round_trip() {
        let width = 8;
        let height = 8;
        let mut img = vec![0u8; (width * height * 4) as usize];
        for (i, b) in img.iter_mut().enumerate() {
            *b = (i * 7 % 251) as u8;
        }
        let mut encoded =
            vec![0u8; TextureFormat::Rgba8.texture_size_in_bytes(width, height) as usize];
        encode_efb_copy(&mut encoded, &img, width, height, EfbCopyFormat::Rgba8, false);
        let mut decoded = vec![0u8; (width * height * 4) as usize];
        decode_texture(&mut decoded, &encoded, width, height, TextureFormat::Rgba8, None);
        assert_eq!(img, decoded);
    }

    #[test]
    fn intensity_copy_stores_luma() {
        let img = vec![0xff, 0x00, 0x00, 0xff]; // one red pixel
        let mut encoded = vec![0u8; TextureFormat::I8.texture_size_in_bytes(1, 1) as usize];
        encode_efb_copy(&mut encoded, &img, 1, 1, EfbCopyFormat::R8, true);
        // BT.601 luma of pure red is ~0x51.
        assert!((0x48..=0x58).contains(&encoded[0]), "luma {:#x}", encoded[0]);
    }

    #[test]
    fn box_filter_averages_quads() {
        #[rustfmt::skip]
        let src = [
            0u8, 0, 0, 0,  100, 100, 100, 100,
            100, 100, 100, 100,  0, 0, 0, 0,
        ];
        let out = box_filter_half(&src, 2, 2);
        assert_eq!(out, vec![50, 50, 50, 50]);
    }

    #[test]
    fn gamma_brightens_midtones_and_leaves_alpha() {
        let mut px = [128u8, 128, 128, 128];
        apply_gamma(&mut px, 2.2);
        assert!(px[0] > 128);
        assert_eq!(px[0], px[1]);
        assert_eq!(px[3], 128);

        let mut ident = [7u8, 130, 250, 9];
        apply_gamma(&mut ident, 1.0);
        assert_eq!(ident, [7, 130, 250, 9]);
    }

    #[test]
    fn yuyv_round_trip_is_close() {
        // Chroma is shared per texel pair, so use an identical pair; the
        // remaining error is quantization only.
        let img: Vec<u8> = [[200u8, 50, 30, 255], [200, 50, 30, 255]].concat();
        let mut enc = vec![0u8; TextureFormat::Xfb.texture_size_in_bytes(2, 1) as usize];
        encode_efb_copy(&mut enc, &img, 2, 1, EfbCopyFormat::Xfb, false);
        let mut dec = vec![0u8; 2 * 4];
        decode_texture(&mut dec, &enc, 2, 1, TextureFormat::Xfb, None);
        for (a, b) in img.iter().zip(dec.iter()).take(3) {
            assert!((*a as i32 - *b as i32).abs() <= 4, "{a} vs {b}");
        }
    }
}
