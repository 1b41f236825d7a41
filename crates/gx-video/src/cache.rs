//! Content-addressable texture cache.
//!
//! Every GPU texture decoded from guest memory or copied out of the EFB is
//! owned by a [`CacheEntry`] here. Entries are addressed by a stable
//! [`EntryId`] and indexed three ways: by guest address (a range-scannable
//! map, since games routinely alias texture memory), by combined content
//! hash, and by the eight hardware sampler bind points. Entries that
//! partially overlap record bidirectional id references so invalidating
//! one side forces re-evaluation of the other.

use std::collections::BTreeMap;

use hashbrown::{HashMap, HashSet};
use tracing::{debug, warn};
use xxhash_rust::xxh3::{xxh3_64, Xxh3};

use crate::backend::VideoBackend;
use crate::decode::{self, XFB_UNINITIALIZED_TEXEL};
use crate::error::VideoError;
use crate::format::{
    AbstractTextureFormat, EfbCopyFormat, EfbCopyParams, TextureFormat, TlutFormat,
};
use crate::guest_mem::GuestMemory;
use crate::rect::Rectangle;
use crate::stats::FrameStats;
use crate::texture::{AbstractTexture, TextureConfig};

/// Frames an entry may go unreferenced before eviction into the pool.
pub const TEXTURE_KILL_THRESHOLD: u64 = 64;
/// Frames a pooled resource may sit unused before it is destroyed.
pub const POOL_KILL_THRESHOLD: u64 = 128;

/// Sampled hashing reads chunks of this many bytes.
const HASH_CHUNK: usize = 768;

/// Number of hardware sampler slots.
pub const NUM_BIND_POINTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Normal,
    EfbCopy,
    XfbCopy,
}

/// Cache lookup key for a draw's texture reference.
#[derive(Debug, Clone, Copy)]
pub struct TextureLookup {
    pub address: u32,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    /// Palette address and entry format, required for indexed formats.
    pub tlut: Option<(u32, TlutFormat)>,
}

pub struct CacheEntry {
    pub id: EntryId,
    pub address: u32,
    pub size_in_bytes: u32,
    /// Hash of the raw texel (or index) data.
    pub base_hash: u64,
    /// `base_hash` XOR palette hash for indexed formats, else `base_hash`.
    pub hash: u64,
    pub format: TextureFormat,
    pub tlut_format: Option<TlutFormat>,
    pub kind: EntryKind,
    pub native_width: u32,
    pub native_height: u32,
    /// Bytes between consecutive block rows in guest memory. Equals
    /// `format.bytes_per_row(native_width)` except for strided XFB copies.
    pub memory_stride: u32,
    pub y_scale: f32,
    pub frame_last_used: u64,
    /// Entries this one partially overlaps (and vice versa).
    pub references: HashSet<EntryId>,
    /// Set when an overlapping copy landed after this entry was built.
    pub may_have_overlapping_textures: bool,
    texture: Box<dyn AbstractTexture>,
}

impl CacheEntry {
    pub fn texture(&self) -> &dyn AbstractTexture {
        self.texture.as_ref()
    }

    fn end_address(&self) -> u32 {
        self.address + self.size_in_bytes
    }

    fn overlaps(&self, address: u32, size: u32) -> bool {
        self.address < address + size && address < self.end_address()
    }

    pub fn scaled_width(&self) -> u32 {
        self.texture.config().width
    }

    pub fn scaled_height(&self) -> u32 {
        self.texture.config().height
    }
}

struct PoolEntry {
    texture: Box<dyn AbstractTexture>,
    frame_retired: u64,
}

pub struct TextureCache {
    entries: HashMap<EntryId, CacheEntry>,
    by_address: BTreeMap<u32, Vec<EntryId>>,
    by_hash: HashMap<u64, Vec<EntryId>>,
    pool: HashMap<TextureConfig, Vec<PoolEntry>>,
    bind_points: [Option<EntryId>; NUM_BIND_POINTS],
    next_id: u64,
    current_frame: u64,
    /// Sampled-hash chunk count; 0 selects the full (safe) hash.
    hash_samples: u32,
    efb_copy_cache_enable: bool,
    pub stats: FrameStats,
}

impl TextureCache {
    pub fn new(hash_samples: u32, efb_copy_cache_enable: bool) -> Self {
        Self {
            entries: HashMap::new(),
            by_address: BTreeMap::new(),
            by_hash: HashMap::new(),
            pool: HashMap::new(),
            bind_points: [None; NUM_BIND_POINTS],
            next_id: 0,
            current_frame: 0,
            hash_samples,
            efb_copy_cache_enable,
            stats: FrameStats::default(),
        }
    }

    pub fn current_frame(&self) -> u64 {
        self.current_frame
    }

    pub fn entry(&self, id: EntryId) -> Option<&CacheEntry> {
        self.entries.get(&id)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Re-reads settings that change cache behavior. Sampling-parameter
    /// changes invalidate everything, since stored hashes are no longer
    /// comparable.
    pub fn on_config_changed(&mut self, hash_samples: u32, efb_copy_cache_enable: bool) {
        if hash_samples != self.hash_samples {
            self.invalidate();
        }
        self.hash_samples = hash_samples;
        self.efb_copy_cache_enable = efb_copy_cache_enable;
    }

    /// Drops every entry and pooled resource.
    pub fn invalidate(&mut self) {
        self.entries.clear();
        self.by_address.clear();
        self.by_hash.clear();
        self.pool.clear();
        self.bind_points = [None; NUM_BIND_POINTS];
    }

    /// Drops entries whose guest range intersects `[address, address+size)`.
    pub fn invalidate_range(&mut self, address: u32, size: u32) {
        let ids: Vec<EntryId> = self
            .entries
            .values()
            .filter(|e| e.overlaps(address, size))
            .map(|e| e.id)
            .collect();
        for id in ids {
            self.destroy_entry(id, false);
        }
    }

    // -- hashing ---------------------------------------------------------

    fn hash_sampled(&self, data: &[u8], force_safe: bool) -> u64 {
        let samples = if force_safe { 0 } else { self.hash_samples };
        if samples == 0 || data.len() <= samples as usize * HASH_CHUNK {
            return xxh3_64(data);
        }
        // N evenly spaced chunks. Approximate: writes between chunks are
        // invisible to the hash.
        let mut hasher = Xxh3::new();
        let step = (data.len() - HASH_CHUNK) / (samples as usize - 1).max(1);
        for i in 0..samples as usize {
            let off = i * step;
            hasher.update(&data[off..off + HASH_CHUNK]);
        }
        hasher.digest()
    }

    fn hash_lookup(
        &self,
        mem: &GuestMemory,
        lookup: &TextureLookup,
    ) -> Result<(u64, u64), VideoError> {
        let size = lookup.format.texture_size_in_bytes(lookup.width, lookup.height);
        let base = self.hash_sampled(mem.slice(lookup.address, size)?, false);
        let combined = match lookup.tlut {
            Some((tlut_addr, _)) if lookup.format.is_indexed() => {
                let pal = mem.slice(tlut_addr, lookup.format.palette_size_in_bytes())?;
                base ^ self.hash_sampled(pal, false)
            }
            _ => base,
        };
        Ok((base, combined))
    }

    // -- allocation and the pool -----------------------------------------

    fn allocate(
        &mut self,
        backend: &dyn VideoBackend,
        config: TextureConfig,
    ) -> Option<Box<dyn AbstractTexture>> {
        if let Some(bucket) = self.pool.get_mut(&config) {
            if let Some(pooled) = bucket.pop() {
                self.stats.pool_hits += 1;
                return Some(pooled.texture);
            }
        }
        match backend.create_texture(&config) {
            Ok(texture) => {
                self.stats.textures_created += 1;
                Some(texture)
            }
            Err(err) => {
                // Fatal to this texture only; the draw proceeds unbound.
                warn!(%err, "texture allocation failed");
                None
            }
        }
    }

    fn release_to_pool(&mut self, texture: Box<dyn AbstractTexture>) {
        let config = *texture.config();
        self.pool.entry(config).or_default().push(PoolEntry {
            texture,
            frame_retired: self.current_frame,
        });
    }

    // -- entry registration ----------------------------------------------

    fn register(&mut self, entry: CacheEntry) -> EntryId {
        let id = entry.id;
        self.by_address.entry(entry.address).or_default().push(id);
        self.by_hash.entry(entry.hash).or_default().push(id);
        // A fresh entry over memory other entries also claim makes those
        // entries candidates for partial updates.
        let (addr, size) = (entry.address, entry.size_in_bytes);
        for other in self.entries.values_mut() {
            if other.overlaps(addr, size) {
                other.may_have_overlapping_textures = true;
            }
        }
        self.entries.insert(id, entry);
        id
    }

    fn unregister(&mut self, id: EntryId) -> Option<CacheEntry> {
        let entry = self.entries.remove(&id)?;
        if let Some(ids) = self.by_address.get_mut(&entry.address) {
            ids.retain(|&e| e != id);
            if ids.is_empty() {
                self.by_address.remove(&entry.address);
            }
        }
        if let Some(ids) = self.by_hash.get_mut(&entry.hash) {
            ids.retain(|&e| e != id);
            if ids.is_empty() {
                self.by_hash.remove(&entry.hash);
            }
        }
        for slot in self.bind_points.iter_mut() {
            if *slot == Some(id) {
                *slot = None;
            }
        }
        for referenced in &entry.references {
            if let Some(other) = self.entries.get_mut(referenced) {
                other.references.remove(&id);
                other.may_have_overlapping_textures = true;
            }
        }
        Some(entry)
    }

    fn destroy_entry(&mut self, id: EntryId, to_pool: bool) {
        if let Some(entry) = self.unregister(id) {
            if to_pool {
                self.release_to_pool(entry.texture);
            }
            self.stats.entries_evicted += 1;
        }
    }

    /// Entry ids whose guest range intersects `[address, address+size)`.
    fn overlapping_ids(&self, address: u32, size: u32) -> Vec<EntryId> {
        // Range scan: any entry starting before address+size can overlap.
        let mut out = Vec::new();
        for ids in self.by_address.range(..address.saturating_add(size)).map(|(_, v)| v) {
            for &id in ids {
                if self.entries[&id].overlaps(address, size) {
                    out.push(id);
                }
            }
        }
        out
    }

    // -- GetTexture ------------------------------------------------------

    /// Resolve a draw's texture reference to a cache entry, building one if
    /// necessary. `None` means allocation failed and the draw proceeds with
    /// no bound texture.
    pub fn get_texture(
        &mut self,
        backend: &dyn VideoBackend,
        mem: &GuestMemory,
        lookup: &TextureLookup,
    ) -> Option<EntryId> {
        let size = lookup.format.texture_size_in_bytes(lookup.width, lookup.height);
        let (base_hash, hash) = match self.hash_lookup(mem, lookup) {
            Ok(h) => h,
            Err(err) => {
                warn!(%err, address = lookup.address, "texture lookup out of range");
                return None;
            }
        };

        // Exact-address hit.
        let mut hit = None;
        let mut stale = Vec::new();
        if let Some(ids) = self.by_address.get(&lookup.address) {
            for &id in ids {
                let entry = &self.entries[&id];
                if entry.format != lookup.format
                    || entry.native_width != lookup.width
                    || entry.native_height != lookup.height
                {
                    continue;
                }
                if entry.hash == hash {
                    hit = Some(id);
                    break;
                }
                // Same key, different content: the memory was overwritten.
                stale.push(id);
            }
        }
        if let Some(id) = hit {
            return Some(self.touch(id));
        }
        for id in stale {
            self.destroy_entry(id, true);
        }

        // Hash hit at another address (games relocate textures wholesale).
        let alias = self.by_hash.get(&hash).and_then(|ids| {
            ids.iter().copied().find(|id| {
                let e = &self.entries[id];
                e.format == lookup.format
                    && e.native_width == lookup.width
                    && e.native_height == lookup.height
                    && e.kind == EntryKind::Normal
            })
        });
        if let Some(id) = alias {
            self.stats.textures_aliased += 1;
            return Some(self.touch(id));
        }

        // Full decode from guest memory into a fresh or pooled resource.
        let config = TextureConfig::new(
            lookup.width,
            lookup.height,
            1,
            1,
            AbstractTextureFormat::Rgba8,
            true,
        );
        let mut texture = self.allocate(backend, config)?;
        if let Err(err) = self.decode_into(backend, &mut texture, mem, lookup) {
            warn!(%err, "texture decode failed");
            self.release_to_pool(texture);
            return None;
        }
        self.stats.textures_uploaded += 1;

        let id = EntryId(self.next_id);
        self.next_id += 1;
        let entry = CacheEntry {
            id,
            address: lookup.address,
            size_in_bytes: size,
            base_hash,
            hash,
            format: lookup.format,
            tlut_format: lookup.tlut.map(|(_, f)| f),
            kind: EntryKind::Normal,
            native_width: lookup.width,
            native_height: lookup.height,
            memory_stride: lookup.format.bytes_per_row(lookup.width),
            y_scale: 1.0,
            frame_last_used: self.current_frame,
            references: HashSet::new(),
            may_have_overlapping_textures: true,
            texture,
        };
        let id = self.register(entry);
        self.do_partial_texture_updates(id);
        Some(id)
    }

    fn touch(&mut self, id: EntryId) -> EntryId {
        let frame = self.current_frame;
        let needs_update = {
            let entry = self.entries.get_mut(&id).expect("touched entry exists");
            entry.frame_last_used = frame;
            entry.may_have_overlapping_textures
        };
        if needs_update {
            self.do_partial_texture_updates(id);
        }
        id
    }

    fn decode_into(
        &self,
        backend: &dyn VideoBackend,
        texture: &mut Box<dyn AbstractTexture>,
        mem: &GuestMemory,
        lookup: &TextureLookup,
    ) -> Result<(), VideoError> {
        let size = lookup.format.texture_size_in_bytes(lookup.width, lookup.height);
        let src = mem.slice(lookup.address, size)?;
        let tlut_data;
        let tlut = match lookup.tlut {
            Some((addr, fmt)) if lookup.format.is_indexed() => {
                tlut_data = mem.slice(addr, lookup.format.palette_size_in_bytes())?;
                Some((tlut_data, fmt))
            }
            _ => None,
        };
        if backend.caps().supports_gpu_texture_decode
            && backend.supports_gpu_texture_decode(lookup.format, tlut.map(|(_, f)| f))
            && backend.decode_texture_on_gpu(
                texture.as_mut(),
                0,
                src,
                lookup.format,
                lookup.width,
                lookup.height,
                tlut,
            )
        {
            return Ok(());
        }
        let mut rgba = vec![0u8; (lookup.width * lookup.height * 4) as usize];
        decode::decode_texture(&mut rgba, src, lookup.width, lookup.height, lookup.format, tlut);
        texture.load(0, lookup.width, lookup.height, lookup.width, &rgba)
    }

    // -- partial updates -------------------------------------------------

    /// Stitch overlapping copy entries into `id`'s texture. Copies are the
    /// freshest view of the memory they cover, so they win over whatever
    /// the full decode produced.
    pub fn do_partial_texture_updates(&mut self, id: EntryId) {
        let (addr, size, format, stride) = {
            let e = &self.entries[&id];
            (e.address, e.size_in_bytes, e.format, e.memory_stride)
        };

        let candidates: Vec<EntryId> = self
            .overlapping_ids(addr, size)
            .into_iter()
            .filter(|&other| {
                if other == id {
                    return false;
                }
                let o = &self.entries[&other];
                o.kind == EntryKind::EfbCopy
                    && o.format == format
                    && o.memory_stride == stride
            })
            .collect();

        // Take the destination out of the arena so both sides can be
        // borrowed at once; reinsert when done.
        let Some(mut dst) = self.entries.remove(&id) else {
            return;
        };
        for other in candidates {
            let Some(src) = self.entries.get_mut(&other) else {
                continue;
            };
            let Some((src_rect, dst_rect)) = Self::overlap_rects(&dst, src) else {
                continue;
            };
            debug!(
                src = src.id.0,
                dst = dst.id.0,
                ?src_rect,
                ?dst_rect,
                "partial texture update"
            );
            if src_rect.width() == dst_rect.width() && src_rect.height() == dst_rect.height() {
                dst.texture
                    .copy_rectangle_from(src.texture.as_ref(), &src_rect, 0, 0, &dst_rect, 0, 0);
            } else {
                dst.texture
                    .scale_rectangle_from(src.texture.as_ref(), &src_rect, &dst_rect);
            }
            dst.references.insert(other);
            src.references.insert(id);
            self.stats.partial_updates += 1;
        }
        dst.may_have_overlapping_textures = false;
        self.entries.insert(id, dst);
    }

    /// Texel-space rectangles of the overlap between `d` and copy entry
    /// `s`, in each entry's own coordinates. Both share format and memory
    /// stride.
    fn overlap_rects(d: &CacheEntry, s: &CacheEntry) -> Option<(Rectangle, Rectangle)> {
        let bw = d.format.block_width() as i32;
        let bh = d.format.block_height() as i32;
        let bpb = d.format.bytes_per_block() as i32;
        let stride = d.memory_stride as i32;
        if stride == 0 || bpb == 0 {
            return None;
        }

        // Byte offset of src's base relative to dst's base, decomposed into
        // whole block rows and a column within the row.
        let delta = s.address as i64 - d.address as i64;
        let (row_delta, col_delta) = (
            delta.div_euclid(stride as i64) as i32,
            delta.rem_euclid(stride as i64) as i32,
        );
        if col_delta % bpb != 0 {
            return None;
        }
        let x_off = col_delta / bpb * bw;
        let y_off = row_delta * bh;

        let src_extent = Rectangle::from_extent(
            x_off,
            y_off,
            s.native_width as i32,
            s.native_height as i32,
        );
        let dst_extent =
            Rectangle::from_extent(0, 0, d.native_width as i32, d.native_height as i32);
        let overlap = src_extent.intersect(&dst_extent);
        if overlap.is_empty() {
            return None;
        }

        let src_rect = Rectangle::new(
            overlap.left - x_off,
            overlap.top - y_off,
            overlap.right - x_off,
            overlap.bottom - y_off,
        );
        Some((src_rect, overlap))
    }

    // -- EFB/XFB copies --------------------------------------------------

    /// Copy a rendered region back into guest memory in `params.copy_format`
    /// and (when the copy cache is enabled) keep the GPU-side pixels as an
    /// EFB-copy entry so later fetches skip the lossy decode.
    ///
    /// `pixels` is the resolved region as linear RGBA8 at native EFB
    /// resolution; for depth copies the caller has already packed Z24 into
    /// the color channels. `stride` is the destination pitch in guest RAM
    /// in bytes per block row; `0` selects the format's natural pitch.
    #[allow(clippy::too_many_arguments)]
    pub fn copy_render_target_to_texture(
        &mut self,
        backend: &dyn VideoBackend,
        mem: &mut GuestMemory,
        address: u32,
        stride: u32,
        params: &EfbCopyParams,
        pixels: &[u8],
        width: u32,
        height: u32,
        scale_by_half: bool,
        intensity: bool,
    ) -> Result<Option<EntryId>, VideoError> {
        debug_assert_eq!(
            params.yuv,
            params.copy_format == EfbCopyFormat::Xfb,
            "yuv flag and copy format disagree"
        );
        let (mut pixels, width, height) = if scale_by_half {
            let filtered = decode::box_filter_half(pixels, width, height);
            (filtered, width / 2, height / 2)
        } else {
            (pixels.to_vec(), width, height)
        };
        decode::apply_gamma(&mut pixels, params.gamma);
        if !params.efb_format.has_alpha() {
            // Alpha-less EFB formats read back as opaque.
            for texel in pixels.chunks_exact_mut(4) {
                texel[3] = 0xff;
            }
        }

        let format = params.copy_format.as_texture_format();
        let row_bytes = format.bytes_per_row(width);
        let stride = if stride == 0 { row_bytes } else { stride };
        let block_rows = height.div_ceil(format.block_height());
        let size = stride * block_rows.saturating_sub(1) + row_bytes;
        let mut encoded = vec![0u8; format.texture_size_in_bytes(width, height) as usize];
        decode::encode_efb_copy(&mut encoded, &pixels, width, height, params.copy_format, intensity);
        if stride == row_bytes {
            mem.write(address, &encoded)?;
        } else {
            for row in 0..block_rows {
                let src = (row * row_bytes) as usize;
                mem.write(address + row * stride, &encoded[src..src + row_bytes as usize])?;
            }
            if params.yuv && stride > row_bytes {
                // Scanout reads straight through the stride; the gap bytes
                // must hold the YUYV pattern that presents as black rather
                // than whatever the guest left there.
                for row in 0..block_rows.saturating_sub(1) {
                    Self::uninitialize_xfb_memory(
                        mem,
                        address + row * stride + row_bytes,
                        stride - row_bytes,
                    )?;
                }
            }
        }
        self.stats.efb_copies += 1;

        // Memory now holds new content; anything previously cached over it
        // is stale or needs re-stitching.
        for id in self.overlapping_ids(address, size) {
            let exact = {
                let e = &self.entries[&id];
                e.address == address && e.size_in_bytes == size
            };
            if exact {
                self.destroy_entry(id, true);
            } else if let Some(e) = self.entries.get_mut(&id) {
                e.may_have_overlapping_textures = true;
            }
        }

        if !self.efb_copy_cache_enable {
            return Ok(None);
        }

        let config =
            TextureConfig::new(width, height, 1, 1, AbstractTextureFormat::Rgba8, true);
        let Some(mut texture) = self.allocate(backend, config) else {
            return Ok(None);
        };
        texture.load(0, width, height, width, &pixels)?;

        // XFB entries must match the full hash the swap path computes, so
        // sampling never applies to them.
        let base_hash = self.hash_sampled(&encoded, params.yuv);
        let id = EntryId(self.next_id);
        self.next_id += 1;
        let kind = if params.yuv {
            EntryKind::XfbCopy
        } else {
            EntryKind::EfbCopy
        };
        let entry = CacheEntry {
            id,
            address,
            size_in_bytes: size,
            base_hash,
            hash: base_hash,
            format,
            tlut_format: None,
            kind,
            native_width: width,
            native_height: height,
            memory_stride: stride,
            y_scale: params.y_scale,
            frame_last_used: self.current_frame,
            references: HashSet::new(),
            may_have_overlapping_textures: false,
            texture,
        };
        Ok(Some(self.register(entry)))
    }

    /// Resolve the XFB region scanned out at swap time. XFB data is hashed
    /// with the full hash regardless of the sampling setting, since a false
    /// hit here presents a stale frame.
    pub fn get_xfb_texture(
        &mut self,
        backend: &dyn VideoBackend,
        mem: &GuestMemory,
        address: u32,
        width: u32,
        height: u32,
        stride_bytes: u32,
    ) -> Option<EntryId> {
        let row_bytes = TextureFormat::Xfb.bytes_per_row(width);
        let total = stride_bytes * height.saturating_sub(1) + row_bytes;
        let data = match mem.slice(address, total) {
            Ok(d) => d,
            Err(err) => {
                warn!(%err, "xfb region out of range");
                return None;
            }
        };

        let mut hasher = Xxh3::new();
        for row in 0..height {
            let off = (row * stride_bytes) as usize;
            hasher.update(&data[off..off + row_bytes as usize]);
        }
        let hash = hasher.digest();

        let hit = self.by_address.get(&address).and_then(|ids| {
            ids.iter().copied().find(|id| {
                let e = &self.entries[id];
                e.kind == EntryKind::XfbCopy
                    && e.hash == hash
                    && e.native_width == width
                    && e.native_height == height
            })
        });
        if let Some(id) = hit {
            return Some(self.touch(id));
        }
        let stale: Vec<EntryId> = self
            .by_address
            .get(&address)
            .map(|ids| {
                ids.iter()
                    .copied()
                    .filter(|id| self.entries[id].kind == EntryKind::XfbCopy)
                    .collect()
            })
            .unwrap_or_default();
        for id in stale {
            self.destroy_entry(id, true);
        }

        // Decode rows through the stride gap.
        let mut packed = vec![0u8; (row_bytes * height) as usize];
        for row in 0..height {
            let src = (row * stride_bytes) as usize;
            let dst = (row * row_bytes) as usize;
            packed[dst..dst + row_bytes as usize]
                .copy_from_slice(&data[src..src + row_bytes as usize]);
        }
        let mut rgba = vec![0u8; (width * height * 4) as usize];
        decode::decode_texture(&mut rgba, &packed, width, height, TextureFormat::Xfb, None);

        let config = TextureConfig::new(width, height, 1, 1, AbstractTextureFormat::Rgba8, true);
        let mut texture = self.allocate(backend, config)?;
        if let Err(err) = texture.load(0, width, height, width, &rgba) {
            warn!(%err, "xfb upload failed");
            self.release_to_pool(texture);
            return None;
        }

        let id = EntryId(self.next_id);
        self.next_id += 1;
        let entry = CacheEntry {
            id,
            address,
            size_in_bytes: total,
            base_hash: hash,
            hash,
            format: TextureFormat::Xfb,
            tlut_format: None,
            kind: EntryKind::XfbCopy,
            native_width: width,
            native_height: height,
            memory_stride: stride_bytes,
            y_scale: 1.0,
            frame_last_used: self.current_frame,
            references: HashSet::new(),
            may_have_overlapping_textures: false,
            texture,
        };
        Some(self.register(entry))
    }

    /// Fill an XFB region the guest never wrote with the YUYV pattern that
    /// scans out as black, so uninitialized frames present as black rather
    /// than leftover RAM.
    pub fn uninitialize_xfb_memory(
        mem: &mut GuestMemory,
        address: u32,
        size: u32,
    ) -> Result<(), VideoError> {
        let dst = mem.slice_mut(address, size)?;
        for chunk in dst.chunks_exact_mut(4) {
            chunk.copy_from_slice(&XFB_UNINITIALIZED_TEXEL);
        }
        Ok(())
    }

    // -- maintenance -----------------------------------------------------

    /// Rescale an entry's host texture (native content is preserved via a
    /// filtered copy). Used when the internal resolution changes under a
    /// live entry.
    pub fn scale_entry_to(
        &mut self,
        backend: &dyn VideoBackend,
        id: EntryId,
        new_width: u32,
        new_height: u32,
    ) -> bool {
        let old_config = match self.entries.get(&id) {
            Some(e) => *e.texture.config(),
            None => return false,
        };
        if old_config.width == new_width && old_config.height == new_height {
            return true;
        }
        let config = TextureConfig::new(
            new_width,
            new_height,
            old_config.levels,
            old_config.layers,
            old_config.format,
            true,
        );
        let Some(mut texture) = self.allocate(backend, config) else {
            return false;
        };
        let entry = self.entries.get_mut(&id).expect("scaled entry exists");
        texture.scale_rectangle_from(
            entry.texture.as_ref(),
            &old_config.rect(),
            &config.rect(),
        );
        let old = std::mem::replace(&mut entry.texture, texture);
        self.release_to_pool(old);
        true
    }

    /// Advance the frame counter and expire old entries: unreferenced
    /// entries older than [`TEXTURE_KILL_THRESHOLD`] move to the pool, and
    /// pooled resources older than [`POOL_KILL_THRESHOLD`] are destroyed.
    pub fn cleanup(&mut self) {
        self.current_frame += 1;
        let frame = self.current_frame;

        let expired: Vec<EntryId> = self
            .entries
            .values()
            .filter(|e| {
                e.references.is_empty()
                    && frame.saturating_sub(e.frame_last_used) > TEXTURE_KILL_THRESHOLD
            })
            .map(|e| e.id)
            .collect();
        for id in expired {
            self.destroy_entry(id, true);
        }

        self.pool.retain(|_, bucket| {
            bucket.retain(|p| frame.saturating_sub(p.frame_retired) <= POOL_KILL_THRESHOLD);
            !bucket.is_empty()
        });
    }

    /// Recompute every entry's hash against current guest memory and evict
    /// mismatches. Returns the number of entries evicted.
    pub fn check_consistency(&mut self, mem: &GuestMemory) -> usize {
        let mut stale = Vec::new();
        for entry in self.entries.values() {
            if entry.kind != EntryKind::Normal {
                continue;
            }
            let Ok(data) = mem.slice(entry.address, entry.size_in_bytes) else {
                stale.push(entry.id);
                continue;
            };
            if self.hash_sampled(data, false) != entry.base_hash {
                stale.push(entry.id);
            }
        }
        let count = stale.len();
        for id in stale {
            self.destroy_entry(id, true);
        }
        count
    }

    // -- bind points -----------------------------------------------------

    pub fn bind(&mut self, slot: usize, id: Option<EntryId>) {
        assert!(slot < NUM_BIND_POINTS);
        if let Some(id) = id {
            if let Some(entry) = self.entries.get(&id) {
                entry.texture.bind(slot as u32);
            }
        }
        self.bind_points[slot] = id;
    }

    pub fn bound_entry(&self, slot: usize) -> Option<EntryId> {
        self.bind_points[slot]
    }

    pub fn unbind_all(&mut self) {
        self.bind_points = [None; NUM_BIND_POINTS];
    }
}
