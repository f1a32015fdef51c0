//! TIFF native-image codec.
//!
//! The probe walks the full IFD chain byte-by-byte, honoring the
//! byte-order mark, and validates out-of-line entry data against the
//! stream size. Decode handles the grayscale, full-color and palette
//! baseline layouts with a direct-scanline fast path when the TIFF row
//! layout already matches the destination; everything else (unusual
//! photometrics, non-top-left orientation, compressed data) goes
//! through the `tiff` crate's generic reader and lands in RGBA8888.
//! Encode mirrors the decode mapping and emits baseline uncompressed
//! little-endian TIFF with a single strip.

use std::any::Any;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use byteorder::{LittleEndian, WriteBytesExt};

use rastex_core::{
    layout::{copy_palette_index, palette_data_size, texel_row_mut},
    AlphaState, ColorDispatcher, ColorModel, ColorOrder, CompressionType, Error, MipmapLevel,
    PaletteType, PixelDataTraversal, PixelLayout, RasterFormat, Result, Rgba, SharedTexels,
};

use crate::engine::Engine;
use crate::image::{FilenameExtension, NativeImageFormatDesc, NativeImageTypeManager};
use crate::stream::{Stream, StreamExt, SubStream};
use crate::texture::{probed, AcquireFeedback};
use crate::types::{Payload, TypedObject};

const TAG_IMAGE_WIDTH: u16 = 256;
const TAG_IMAGE_LENGTH: u16 = 257;
const TAG_BITS_PER_SAMPLE: u16 = 258;
const TAG_COMPRESSION: u16 = 259;
const TAG_PHOTOMETRIC: u16 = 262;
const TAG_STRIP_OFFSETS: u16 = 273;
const TAG_ORIENTATION: u16 = 274;
const TAG_SAMPLES_PER_PIXEL: u16 = 277;
const TAG_ROWS_PER_STRIP: u16 = 278;
const TAG_STRIP_BYTE_COUNTS: u16 = 279;
const TAG_PLANAR_CONFIG: u16 = 284;
const TAG_COLOR_MAP: u16 = 320;
const TAG_EXTRA_SAMPLES: u16 = 338;

const PHOTOMETRIC_MINISWHITE: u16 = 0;
const PHOTOMETRIC_MINISBLACK: u16 = 1;
const PHOTOMETRIC_RGB: u16 = 2;
const PHOTOMETRIC_PALETTE: u16 = 3;

const COMPRESSION_NONE: u16 = 1;
const ORIENTATION_TOPLEFT: u16 = 1;
const EXTRASAMPLE_UNASSALPHA: u16 = 2;
const PLANARCONFIG_CONTIG: u16 = 1;

const FIELD_BYTE: u16 = 1;
const FIELD_ASCII: u16 = 2;
const FIELD_SHORT: u16 = 3;
const FIELD_LONG: u16 = 4;
const FIELD_RATIONAL: u16 = 5;

const MAX_IFD_CHAIN: u32 = 1024;
const MAX_DIMENSION: u32 = 0x10000;

/// Byte-order aware integer parsing for TIFF structures.
#[derive(Clone, Copy)]
struct TiffNum {
    big_endian: bool,
}

impl TiffNum {
    fn u16(&self, bytes: [u8; 2]) -> u16 {
        if self.big_endian {
            u16::from_be_bytes(bytes)
        } else {
            u16::from_le_bytes(bytes)
        }
    }

    fn u32(&self, bytes: [u8; 4]) -> u32 {
        if self.big_endian {
            u32::from_be_bytes(bytes)
        } else {
            u32::from_le_bytes(bytes)
        }
    }
}

fn field_item_size(field_type: u16) -> Option<u64> {
    match field_type {
        FIELD_BYTE | FIELD_ASCII => Some(1),
        FIELD_SHORT => Some(2),
        FIELD_LONG => Some(4),
        FIELD_RATIONAL => Some(8),
        _ => None,
    }
}

/// Fills `buf` completely, or reports a clean end-of-stream as `false`.
fn read_struct(stream: &mut dyn Stream, buf: &mut [u8]) -> Result<bool> {
    match stream.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(Error::Io(e)),
    }
}

fn parse_byte_order(header: &[u8; 8]) -> Option<TiffNum> {
    match [header[0], header[1]] {
        [0x49, 0x49] => Some(TiffNum { big_endian: false }),
        [0x4D, 0x4D] => Some(TiffNum { big_endian: true }),
        _ => None,
    }
}

/// Validates the whole IFD chain; the stream is positioned at the TIFF
/// header and `tiff_start` is its offset.
fn check_tiff(stream: &mut dyn Stream, tiff_start: u64) -> Result<bool> {
    let tiff_size = stream.stream_size()?.saturating_sub(tiff_start);

    let mut header = [0u8; 8];
    if !read_struct(stream, &mut header)? {
        return Ok(false);
    }
    let Some(num) = parse_byte_order(&header) else {
        return Ok(false);
    };
    if num.u16([header[2], header[3]]) != 42 {
        return Ok(false);
    }

    let ifd_offset = num.u32([header[4], header[5], header[6], header[7]]);
    stream.seek(SeekFrom::Start(tiff_start + ifd_offset as u64))?;

    let mut had_ifd = false;
    let mut chain_length = 0u32;

    loop {
        chain_length += 1;
        if chain_length > MAX_IFD_CHAIN {
            return Ok(false);
        }

        let mut count_bytes = [0u8; 2];
        if !read_struct(stream, &mut count_bytes)? {
            return Ok(false);
        }
        let entry_count = num.u16(count_bytes);
        if entry_count == 0 {
            // An IFD cannot be empty.
            return Ok(false);
        }

        for _ in 0..entry_count {
            let mut entry = [0u8; 12];
            if !read_struct(stream, &mut entry)? {
                return Ok(false);
            }

            let field_type = num.u16([entry[2], entry[3]]);
            if let Some(item_size) = field_item_size(field_type) {
                let value_count = num.u32([entry[4], entry[5], entry[6], entry[7]]);
                let data_size = item_size * value_count as u64;
                // Values wider than the inline field must lie inside
                // the stream.
                if data_size > 4 {
                    let data_start = num.u32([entry[8], entry[9], entry[10], entry[11]]);
                    if data_start as u64 + data_size > tiff_size {
                        return Ok(false);
                    }
                }
            }
        }

        had_ifd = true;

        let mut next_bytes = [0u8; 4];
        if !read_struct(stream, &mut next_bytes)? {
            return Ok(false);
        }
        let next_ifd = num.u32(next_bytes);
        if next_ifd == 0 {
            break;
        }
        stream.seek(SeekFrom::Start(tiff_start + next_ifd as u64))?;
    }

    Ok(had_ifd)
}

struct IfdEntry {
    tag: u16,
    field_type: u16,
    count: u32,
    raw: [u8; 4],
}

/// The first image file directory, with lazy out-of-line value access.
struct Ifd {
    num: TiffNum,
    tiff_start: u64,
    entries: Vec<IfdEntry>,
}

impl Ifd {
    fn read_first(stream: &mut dyn Stream, tiff_start: u64) -> Result<Self> {
        let mut header = [0u8; 8];
        stream.read_exact(&mut header).map_err(|_| {
            Error::StreamTruncated("TIFF header".to_string())
        })?;
        let num = parse_byte_order(&header)
            .ok_or_else(|| Error::StreamMalformed("not a TIFF byte-order mark".to_string()))?;
        if num.u16([header[2], header[3]]) != 42 {
            return Err(Error::StreamMalformed("TIFF version is not 42".to_string()));
        }

        let ifd_offset = num.u32([header[4], header[5], header[6], header[7]]);
        stream.seek(SeekFrom::Start(tiff_start + ifd_offset as u64))?;

        let mut count_bytes = [0u8; 2];
        stream
            .read_exact(&mut count_bytes)
            .map_err(|_| Error::StreamTruncated("TIFF directory".to_string()))?;
        let entry_count = num.u16(count_bytes);
        if entry_count == 0 {
            return Err(Error::StreamMalformed("empty TIFF directory".to_string()));
        }

        let mut entries = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            let mut raw = [0u8; 12];
            stream
                .read_exact(&mut raw)
                .map_err(|_| Error::StreamTruncated("TIFF directory entry".to_string()))?;
            entries.push(IfdEntry {
                tag: num.u16([raw[0], raw[1]]),
                field_type: num.u16([raw[2], raw[3]]),
                count: num.u32([raw[4], raw[5], raw[6], raw[7]]),
                raw: [raw[8], raw[9], raw[10], raw[11]],
            });
        }

        Ok(Self {
            num,
            tiff_start,
            entries,
        })
    }

    fn entry(&self, tag: u16) -> Option<&IfdEntry> {
        self.entries.iter().find(|e| e.tag == tag)
    }

    /// All values of an integer-typed entry, widened to u32.
    fn values(&self, stream: &mut dyn Stream, tag: u16) -> Result<Option<Vec<u32>>> {
        let Some(entry) = self.entry(tag) else {
            return Ok(None);
        };
        let item_size = match entry.field_type {
            FIELD_BYTE => 1usize,
            FIELD_SHORT => 2,
            FIELD_LONG => 4,
            _ => return Ok(None),
        };

        let total = item_size * entry.count as usize;
        let bytes = if total <= 4 {
            entry.raw[..total].to_vec()
        } else {
            let offset = self.num.u32(entry.raw);
            let position = stream.tell()?;
            stream.seek(SeekFrom::Start(self.tiff_start + offset as u64))?;
            let mut buf = vec![0u8; total];
            stream
                .read_exact(&mut buf)
                .map_err(|_| Error::StreamTruncated("TIFF entry data".to_string()))?;
            stream.seek(SeekFrom::Start(position))?;
            buf
        };

        let mut out = Vec::with_capacity(entry.count as usize);
        for chunk in bytes.chunks_exact(item_size) {
            out.push(match item_size {
                1 => chunk[0] as u32,
                2 => self.num.u16([chunk[0], chunk[1]]) as u32,
                _ => self.num.u32([chunk[0], chunk[1], chunk[2], chunk[3]]),
            });
        }
        Ok(Some(out))
    }

    fn first(&self, stream: &mut dyn Stream, tag: u16) -> Result<Option<u32>> {
        Ok(self.values(stream, tag)?.and_then(|v| v.first().copied()))
    }

    fn first_required(&self, stream: &mut dyn Stream, tag: u16, what: &str) -> Result<u32> {
        self.first(stream, tag)?
            .ok_or_else(|| Error::StreamMalformed(format!("TIFF is missing its {what} tag")))
    }
}

/// Which per-texel transform the scanline reader applies.
#[derive(Clone, Copy, PartialEq, Eq)]
enum ParseMode {
    Grayscale,
    FullColor,
    Palette,
}

/// Decoded image held by the TIFF payload.
#[derive(Debug, Clone, Default)]
pub struct NativeImageTiff {
    width: u32,
    height: u32,
    layout: PixelLayout,
    texels: Option<SharedTexels>,
    palette: Option<SharedTexels>,
    palette_size: u32,
    alpha: AlphaState,
}

impl NativeImageTiff {
    /// Logical dimensions of the decoded image.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Byte layout of the decoded texels.
    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    /// Decoded texel rows, if any image is loaded.
    pub fn texels(&self) -> Option<&SharedTexels> {
        self.texels.as_ref()
    }

    /// Decoded palette colors, if palettised.
    pub fn palette(&self) -> Option<&SharedTexels> {
        self.palette.as_ref()
    }
}

fn read_tiff_grayscale(
    row: &[u8],
    index: u32,
    photometric: u16,
    bits_per_sample: u32,
    has_alpha: bool,
) -> Option<(u8, u8)> {
    let expand4 = |v: u8| (v as u32 * 255 / 15) as u8;
    let (mut lum, alpha) = match (bits_per_sample, has_alpha) {
        (4, true) => {
            let byte = *row.get(index as usize)?;
            (expand4(byte >> 4), expand4(byte & 0x0F))
        }
        (4, false) => {
            let byte = *row.get(index as usize / 2)?;
            let l = if index % 2 == 0 { byte >> 4 } else { byte & 0x0F };
            (expand4(l), 255)
        }
        (8, true) => {
            let pair = row.get(index as usize * 2..index as usize * 2 + 2)?;
            (pair[0], pair[1])
        }
        (8, false) => (*row.get(index as usize)?, 255),
        _ => return None,
    };
    if photometric == PHOTOMETRIC_MINISWHITE {
        lum = 255 - lum;
    }
    Some((lum, alpha))
}

fn read_tiff_color(row: &[u8], index: u32, has_alpha: bool) -> Option<Rgba> {
    if has_alpha {
        let px = row.get(index as usize * 4..index as usize * 4 + 4)?;
        Some(Rgba::new(px[0], px[1], px[2], px[3]))
    } else {
        let px = row.get(index as usize * 3..index as usize * 3 + 3)?;
        Some(Rgba::new(px[0], px[1], px[2], 0xFF))
    }
}

/// Layout the destination buffer uses for one decode.
struct DecodeTarget {
    layout: PixelLayout,
    palette_size: u32,
    parse_mode: ParseMode,
    /// TIFF-side layout when a raw row copy could be byte-exact.
    direct_tiff_layout: Option<PixelLayout>,
}

fn map_decode_target(
    photometric: u16,
    bits_per_sample: u32,
    orientation: u16,
    has_colormap: bool,
    extra_sample_count: usize,
    tiff_has_alpha: bool,
) -> Option<DecodeTarget> {
    if orientation != ORIENTATION_TOPLEFT {
        return None;
    }

    let alpha_config_ok = extra_sample_count == 0 || tiff_has_alpha;

    match photometric {
        PHOTOMETRIC_MINISWHITE | PHOTOMETRIC_MINISBLACK
            if matches!(bits_per_sample, 4 | 8) && alpha_config_ok =>
        {
            let (format, depth) = if tiff_has_alpha {
                (RasterFormat::LumAlpha, 16)
            } else {
                (RasterFormat::Lum8, 8)
            };
            let layout = PixelLayout {
                raster_format: format,
                depth,
                row_alignment: 4,
                color_order: ColorOrder::Rgba,
                palette_type: PaletteType::None,
            };
            // MINISWHITE inverts, so only MINISBLACK rows can be taken
            // verbatim, and only at full sample depth.
            let direct = (photometric == PHOTOMETRIC_MINISBLACK && bits_per_sample == 8)
                .then_some(layout);
            Some(DecodeTarget {
                layout,
                palette_size: 0,
                parse_mode: ParseMode::Grayscale,
                direct_tiff_layout: direct,
            })
        }
        PHOTOMETRIC_RGB if bits_per_sample == 8 && alpha_config_ok => {
            let (format, depth) = if tiff_has_alpha {
                (RasterFormat::Rgba8888, 32)
            } else {
                (RasterFormat::Rgb888, 24)
            };
            let layout = PixelLayout {
                raster_format: format,
                depth,
                row_alignment: 4,
                color_order: ColorOrder::Rgba,
                palette_type: PaletteType::None,
            };
            Some(DecodeTarget {
                layout,
                palette_size: 0,
                parse_mode: ParseMode::FullColor,
                direct_tiff_layout: Some(layout),
            })
        }
        PHOTOMETRIC_PALETTE
            if matches!(bits_per_sample, 4 | 8) && has_colormap && extra_sample_count == 0 =>
        {
            let palette_type = if bits_per_sample == 4 {
                PaletteType::Pal4
            } else {
                PaletteType::Pal8
            };
            let layout = PixelLayout {
                raster_format: RasterFormat::Rgb888,
                depth: bits_per_sample,
                row_alignment: 4,
                color_order: ColorOrder::Rgba,
                palette_type,
            };
            Some(DecodeTarget {
                layout,
                palette_size: palette_type.item_count(),
                parse_mode: ParseMode::Palette,
                // Index rows share the packing and can be copied.
                direct_tiff_layout: Some(layout),
            })
        }
        _ => None,
    }
}

/// Per-strip scanline addressing for uncompressed data.
struct StripReader {
    offsets: Vec<u32>,
    rows_per_strip: u32,
    scanline_size: usize,
    tiff_start: u64,
}

impl StripReader {
    fn new(ifd: &Ifd, stream: &mut dyn Stream, height: u32, scanline_size: usize) -> Result<Self> {
        let offsets = ifd
            .values(stream, TAG_STRIP_OFFSETS)?
            .ok_or_else(|| Error::StreamMalformed("TIFF is missing strip offsets".to_string()))?;
        let rows_per_strip = ifd
            .first(stream, TAG_ROWS_PER_STRIP)?
            .unwrap_or(u32::MAX)
            .min(height);
        if rows_per_strip == 0 {
            return Err(Error::StreamMalformed("TIFF rows-per-strip is zero".to_string()));
        }
        let strips_needed = height.div_ceil(rows_per_strip) as usize;
        if offsets.len() < strips_needed {
            return Err(Error::StreamMalformed(
                "TIFF strip table is shorter than the image".to_string(),
            ));
        }
        Ok(Self {
            offsets,
            rows_per_strip,
            scanline_size,
            tiff_start: ifd.tiff_start,
        })
    }

    fn read_scanline(&self, stream: &mut dyn Stream, row: u32, buf: &mut [u8]) -> Result<()> {
        let strip = (row / self.rows_per_strip) as usize;
        let within = (row % self.rows_per_strip) as u64;
        let offset =
            self.tiff_start + self.offsets[strip] as u64 + within * self.scanline_size as u64;
        stream.seek(SeekFrom::Start(offset))?;
        stream
            .read_exact(buf)
            .map_err(|_| Error::StreamTruncated("TIFF scanline".to_string()))
    }
}

fn decode_known_mapping(
    stream: &mut dyn Stream,
    ifd: &Ifd,
    target: &DecodeTarget,
    width: u32,
    height: u32,
    photometric: u16,
    bits_per_sample: u32,
    samples_per_pixel: u32,
    tiff_has_alpha: bool,
    colormap: Option<Vec<u32>>,
) -> Result<NativeImageTiff> {
    let scanline_size = (width as usize * bits_per_sample as usize * samples_per_pixel as usize)
        .div_ceil(8);
    if scanline_size == 0 {
        return Err(Error::StreamMalformed("TIFF scanline size is zero".to_string()));
    }

    let dst_row_size = target.layout.row_size(width);
    let mut texels = vec![0u8; dst_row_size * height as usize];

    let strips = StripReader::new(ifd, stream, height, scanline_size)?;

    let direct = scanline_size == dst_row_size
        && match target.parse_mode {
            // Palette index rows always share the packing.
            ParseMode::Palette => true,
            _ => target.direct_tiff_layout == Some(target.layout),
        };

    if direct {
        for row in 0..height {
            let dst = texel_row_mut(&mut texels, dst_row_size, row);
            strips.read_scanline(stream, row, dst)?;
        }
    } else {
        let put = ColorDispatcher::for_layout(&target.layout, None, 0);
        let mut scanline = vec![0u8; scanline_size];
        for row in 0..height {
            strips.read_scanline(stream, row, &mut scanline)?;
            let dst = texel_row_mut(&mut texels, dst_row_size, row);
            for col in 0..width {
                match target.parse_mode {
                    ParseMode::Grayscale => {
                        let (lum, alpha) = read_tiff_grayscale(
                            &scanline,
                            col,
                            photometric,
                            bits_per_sample,
                            tiff_has_alpha,
                        )
                        .unwrap_or((0, 0));
                        put.set_luminance(dst, col, lum, alpha);
                    }
                    ParseMode::FullColor => {
                        let color =
                            read_tiff_color(&scanline, col, tiff_has_alpha).unwrap_or_default();
                        put.set_rgba(dst, col, color);
                    }
                    ParseMode::Palette => {
                        copy_palette_index(
                            &scanline,
                            dst,
                            col,
                            target.layout.palette_type,
                            col,
                            target.layout.palette_type,
                            target.palette_size,
                        );
                    }
                }
            }
        }
    }

    // Palette colors are stored as 16-bit channels; rescale linearly.
    let mut palette = None;
    if target.parse_mode == ParseMode::Palette {
        let colormap = colormap
            .ok_or_else(|| Error::StreamMalformed("palette TIFF without colormap".to_string()))?;
        let entries = target.palette_size as usize;
        if colormap.len() < entries * 3 {
            return Err(Error::StreamMalformed(
                "TIFF colormap is shorter than the palette".to_string(),
            ));
        }

        let palette_depth = target.layout.raster_format.depth();
        let mut colors = vec![0u8; palette_data_size(target.palette_size, palette_depth)];
        let put = ColorDispatcher::new(
            target.layout.raster_format,
            target.layout.color_order,
            palette_depth,
        );
        for n in 0..entries {
            let r = (colormap[n] * 255 / 65535) as u8;
            let g = (colormap[entries + n] * 255 / 65535) as u8;
            let b = (colormap[entries * 2 + n] * 255 / 65535) as u8;
            put.set_rgba(&mut colors, n as u32, Rgba::new(r, g, b, 255));
        }
        palette = Some(SharedTexels::from(colors));
    }

    Ok(NativeImageTiff {
        width,
        height,
        layout: target.layout,
        texels: Some(texels.into()),
        palette,
        palette_size: target.palette_size,
        alpha: AlphaState::Unknown,
    })
}

/// Decodes anything the scanline paths do not cover through the `tiff`
/// crate, producing RGBA8888.
fn decode_generic(stream: &mut dyn Stream, tiff_start: u64) -> Result<NativeImageTiff> {
    use tiff::decoder::{Decoder, DecodingResult};
    use tiff::tags::Tag;
    use tiff::ColorType;

    stream.seek(SeekFrom::Start(tiff_start))?;
    let sub = SubStream::new(stream)?;
    let mut decoder =
        Decoder::new(sub).map_err(|e| Error::StreamMalformed(format!("TIFF decode: {e}")))?;

    let (width, height) = decoder
        .dimensions()
        .map_err(|e| Error::StreamMalformed(format!("TIFF decode: {e}")))?;
    let color_type = decoder
        .colortype()
        .map_err(|e| Error::StreamMalformed(format!("TIFF decode: {e}")))?;
    let result = decoder
        .read_image()
        .map_err(|e| Error::StreamMalformed(format!("TIFF decode: {e}")))?;

    let pixel_count = width as usize * height as usize;
    let mut texels = vec![0u8; pixel_count * 4];

    match (color_type, result) {
        (ColorType::RGBA(8), DecodingResult::U8(buf)) if buf.len() >= pixel_count * 4 => {
            texels.copy_from_slice(&buf[..pixel_count * 4]);
        }
        (ColorType::RGB(8), DecodingResult::U8(buf)) if buf.len() >= pixel_count * 3 => {
            for (dst, src) in texels.chunks_exact_mut(4).zip(buf.chunks_exact(3)) {
                dst[..3].copy_from_slice(src);
                dst[3] = 0xFF;
            }
        }
        (ColorType::GrayA(8), DecodingResult::U8(buf)) if buf.len() >= pixel_count * 2 => {
            for (dst, src) in texels.chunks_exact_mut(4).zip(buf.chunks_exact(2)) {
                dst[0] = src[0];
                dst[1] = src[0];
                dst[2] = src[0];
                dst[3] = src[1];
            }
        }
        (ColorType::Gray(8), DecodingResult::U8(buf)) if buf.len() >= pixel_count => {
            for (dst, &l) in texels.chunks_exact_mut(4).zip(buf.iter()) {
                dst[0] = l;
                dst[1] = l;
                dst[2] = l;
                dst[3] = 0xFF;
            }
        }
        (ColorType::RGBA(16), DecodingResult::U16(buf)) if buf.len() >= pixel_count * 4 => {
            for (dst, src) in texels.chunks_exact_mut(4).zip(buf.chunks_exact(4)) {
                for ch in 0..4 {
                    dst[ch] = (src[ch] >> 8) as u8;
                }
            }
        }
        (ColorType::RGB(16), DecodingResult::U16(buf)) if buf.len() >= pixel_count * 3 => {
            for (dst, src) in texels.chunks_exact_mut(4).zip(buf.chunks_exact(3)) {
                for ch in 0..3 {
                    dst[ch] = (src[ch] >> 8) as u8;
                }
                dst[3] = 0xFF;
            }
        }
        (ColorType::Gray(16), DecodingResult::U16(buf)) if buf.len() >= pixel_count => {
            for (dst, &l) in texels.chunks_exact_mut(4).zip(buf.iter()) {
                let l = (l >> 8) as u8;
                dst[0] = l;
                dst[1] = l;
                dst[2] = l;
                dst[3] = 0xFF;
            }
        }
        (ColorType::Palette(_), DecodingResult::U8(buf)) if buf.len() >= pixel_count => {
            // The decoder hands out raw indices; expand them through
            // the colormap's 16-bit channels.
            let colormap = decoder
                .get_tag_u32_vec(Tag::ColorMap)
                .map_err(|e| Error::StreamMalformed(format!("TIFF decode: {e}")))?;
            let entries = colormap.len() / 3;
            if entries == 0 {
                return Err(Error::StreamMalformed(
                    "palette TIFF without colormap".to_string(),
                ));
            }
            for (dst, &index) in texels.chunks_exact_mut(4).zip(buf.iter()) {
                let n = index as usize;
                // Indices past the palette stay transparent black.
                if n < entries {
                    dst[0] = (colormap[n] * 255 / 65535) as u8;
                    dst[1] = (colormap[entries + n] * 255 / 65535) as u8;
                    dst[2] = (colormap[entries * 2 + n] * 255 / 65535) as u8;
                    dst[3] = 0xFF;
                }
            }
        }
        (ColorType::CMYK(8), DecodingResult::U8(buf)) if buf.len() >= pixel_count * 4 => {
            for (dst, src) in texels.chunks_exact_mut(4).zip(buf.chunks_exact(4)) {
                let k = 255 - src[3] as u32;
                dst[0] = ((255 - src[0] as u32) * k / 255) as u8;
                dst[1] = ((255 - src[1] as u32) * k / 255) as u8;
                dst[2] = ((255 - src[2] as u32) * k / 255) as u8;
                dst[3] = 0xFF;
            }
        }
        (ct, _) => {
            return Err(Error::Unsupported(format!(
                "TIFF color type {ct:?} has no raster mapping"
            )));
        }
    }

    Ok(NativeImageTiff {
        width,
        height,
        layout: PixelLayout {
            raster_format: RasterFormat::Rgba8888,
            depth: 32,
            row_alignment: 4,
            color_order: ColorOrder::Rgba,
            palette_type: PaletteType::None,
        },
        texels: Some(texels.into()),
        palette: None,
        palette_size: 0,
        alpha: AlphaState::Unknown,
    })
}

fn read_native_image(stream: &mut dyn Stream) -> Result<NativeImageTiff> {
    let tiff_start = stream.tell()?;
    let ifd = Ifd::read_first(stream, tiff_start)?;

    let photometric = ifd.first_required(stream, TAG_PHOTOMETRIC, "photometric")? as u16;
    let width = ifd.first_required(stream, TAG_IMAGE_WIDTH, "image width")?;
    let height = ifd.first_required(stream, TAG_IMAGE_LENGTH, "image length")?;
    let bits_per_sample = ifd.first_required(stream, TAG_BITS_PER_SAMPLE, "sample depth")?;
    let compression = ifd.first(stream, TAG_COMPRESSION)?.unwrap_or(1) as u16;
    let samples_per_pixel = ifd.first(stream, TAG_SAMPLES_PER_PIXEL)?.unwrap_or(1);
    let orientation = ifd.first(stream, TAG_ORIENTATION)?.unwrap_or(1) as u16;
    let extra_samples = ifd.values(stream, TAG_EXTRA_SAMPLES)?.unwrap_or_default();
    let colormap = ifd.values(stream, TAG_COLOR_MAP)?;

    if width == 0 || height == 0 {
        return Err(Error::StreamMalformed(
            "TIFF image dimensions are zero".to_string(),
        ));
    }
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(Error::Unsupported("TIFF image is too large".to_string()));
    }
    if bits_per_sample == 0 {
        return Err(Error::StreamMalformed("TIFF sample depth is zero".to_string()));
    }
    if samples_per_pixel == 0 {
        return Err(Error::StreamMalformed("TIFF has no samples".to_string()));
    }

    let tiff_has_alpha = extra_samples.len() == 1
        && (extra_samples[0] == 1 || extra_samples[0] == EXTRASAMPLE_UNASSALPHA as u32);

    let target = map_decode_target(
        photometric,
        bits_per_sample,
        orientation,
        colormap.is_some(),
        extra_samples.len(),
        tiff_has_alpha,
    );

    match target {
        Some(target) if compression == COMPRESSION_NONE => decode_known_mapping(
            stream,
            &ifd,
            &target,
            width,
            height,
            photometric,
            bits_per_sample,
            samples_per_pixel,
            tiff_has_alpha,
            colormap,
        ),
        _ => decode_generic(stream, tiff_start),
    }
}

// --- Encoding ---

struct TiffTarget {
    photometric: u16,
    bits_per_sample: u32,
    sample_count: u16,
    has_alpha: bool,
    layout: PixelLayout,
    palette_size: u32,
}

fn map_encode_target(source: &NativeImageTiff) -> Result<TiffTarget> {
    let src = &source.layout;
    if src.palette_type != PaletteType::None {
        let bits_per_sample = if matches!(src.depth, 4 | 8) { src.depth } else { 8 };
        let palette_type = if bits_per_sample == 4 {
            PaletteType::Pal4
        } else {
            PaletteType::Pal8
        };
        return Ok(TiffTarget {
            photometric: PHOTOMETRIC_PALETTE,
            bits_per_sample,
            sample_count: 1,
            has_alpha: false,
            layout: PixelLayout {
                raster_format: RasterFormat::Rgb888,
                depth: bits_per_sample,
                row_alignment: 1,
                color_order: ColorOrder::Rgba,
                palette_type,
            },
            palette_size: palette_type.item_count(),
        });
    }

    let has_alpha = src.raster_format.can_have_alpha();
    match src.raster_format.color_model() {
        ColorModel::Rgba => {
            let (format, depth) = if has_alpha {
                (RasterFormat::Rgba8888, 32)
            } else {
                (RasterFormat::Rgb888, 24)
            };
            Ok(TiffTarget {
                photometric: PHOTOMETRIC_RGB,
                bits_per_sample: 8,
                sample_count: 3,
                has_alpha,
                layout: PixelLayout {
                    raster_format: format,
                    depth,
                    row_alignment: 1,
                    color_order: ColorOrder::Rgba,
                    palette_type: PaletteType::None,
                },
                palette_size: 0,
            })
        }
        ColorModel::Luminance => {
            let (format, depth) = if has_alpha {
                (RasterFormat::LumAlpha, 16)
            } else {
                (RasterFormat::Lum8, 8)
            };
            Ok(TiffTarget {
                photometric: PHOTOMETRIC_MINISBLACK,
                bits_per_sample: 8,
                sample_count: 1,
                has_alpha,
                layout: PixelLayout {
                    raster_format: format,
                    depth,
                    row_alignment: 1,
                    color_order: ColorOrder::Rgba,
                    palette_type: PaletteType::None,
                },
                palette_size: 0,
            })
        }
        _ => Err(Error::Unsupported(
            "raster format has no TIFF serialization mapping".to_string(),
        )),
    }
}

enum EntryValue {
    Short(Vec<u16>),
    Long(Vec<u32>),
}

struct DirEntry {
    tag: u16,
    value: EntryValue,
}

impl DirEntry {
    fn short(tag: u16, value: u16) -> Self {
        Self {
            tag,
            value: EntryValue::Short(vec![value]),
        }
    }

    fn long(tag: u16, value: u32) -> Self {
        Self {
            tag,
            value: EntryValue::Long(vec![value]),
        }
    }

    fn field_type(&self) -> u16 {
        match &self.value {
            EntryValue::Short(_) => FIELD_SHORT,
            EntryValue::Long(_) => FIELD_LONG,
        }
    }

    fn count(&self) -> u32 {
        match &self.value {
            EntryValue::Short(v) => v.len() as u32,
            EntryValue::Long(v) => v.len() as u32,
        }
    }

    fn data_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match &self.value {
            EntryValue::Short(values) => {
                for v in values {
                    out.extend_from_slice(&v.to_le_bytes());
                }
            }
            EntryValue::Long(values) => {
                for v in values {
                    out.extend_from_slice(&v.to_le_bytes());
                }
            }
        }
        out
    }
}

/// Writes the directory, spilling wide values behind it, and returns
/// the offset of the first byte after the aux data area.
fn write_directory(stream: &mut dyn Stream, entries: &mut [DirEntry]) -> Result<u32> {
    entries.sort_by_key(|e| e.tag);

    let ifd_offset = 8u32;
    let ifd_len = 2 + entries.len() as u32 * 12 + 4;
    let mut aux_cursor = ifd_offset + ifd_len;

    // Header.
    stream.write_all(&[0x49, 0x49])?;
    stream.write_u16::<LittleEndian>(42)?;
    stream.write_u32::<LittleEndian>(ifd_offset)?;

    // Directory.
    stream.write_u16::<LittleEndian>(entries.len() as u16)?;
    let mut aux_blobs: Vec<Vec<u8>> = Vec::new();
    for entry in entries.iter() {
        stream.write_u16::<LittleEndian>(entry.tag)?;
        stream.write_u16::<LittleEndian>(entry.field_type())?;
        stream.write_u32::<LittleEndian>(entry.count())?;

        let data = entry.data_bytes();
        if data.len() <= 4 {
            let mut inline = [0u8; 4];
            inline[..data.len()].copy_from_slice(&data);
            stream.write_all(&inline)?;
        } else {
            stream.write_u32::<LittleEndian>(aux_cursor)?;
            aux_cursor += data.len() as u32;
            aux_blobs.push(data);
        }
    }
    stream.write_u32::<LittleEndian>(0)?;

    for blob in aux_blobs {
        stream.write_all(&blob)?;
    }
    Ok(aux_cursor)
}

fn write_native_image(
    _engine: &Engine,
    source: &NativeImageTiff,
    stream: &mut dyn Stream,
) -> Result<()> {
    let texels = source
        .texels
        .as_ref()
        .ok_or_else(|| Error::InvalidArgument("native image holds no pixel data".to_string()))?;

    let target = map_encode_target(source)?;
    let width = source.width;
    let height = source.height;

    let src_row_size = source.layout.row_size(width);
    let tiff_row_size = (width as usize
        * target.bits_per_sample as usize
        * (target.sample_count as usize + target.has_alpha as usize))
        .div_ceil(8);
    let strip_byte_count = (tiff_row_size * height as usize) as u32;

    // Palette channels are widened back to 16 bits.
    let colormap = if target.layout.palette_type != PaletteType::None {
        let palette_depth = source.layout.raster_format.depth();
        let fetch = ColorDispatcher::new(
            source.layout.raster_format,
            source.layout.color_order,
            palette_depth,
        );
        let palette_bytes = source.palette.as_deref().unwrap_or(&[]);

        let entries = target.palette_size as usize;
        let mut channels = vec![0u16; entries * 3];
        for n in 0..entries {
            let color = fetch.get_rgba(palette_bytes, n as u32).unwrap_or_default();
            channels[n] = (color.r as u32 * 65535 / 255) as u16;
            channels[entries + n] = (color.g as u32 * 65535 / 255) as u16;
            channels[entries * 2 + n] = (color.b as u32 * 65535 / 255) as u16;
        }
        Some(channels)
    } else {
        None
    };

    let total_spp = target.sample_count + target.has_alpha as u16;
    let mut entries = vec![
        DirEntry::long(TAG_IMAGE_WIDTH, width),
        DirEntry::long(TAG_IMAGE_LENGTH, height),
        DirEntry {
            tag: TAG_BITS_PER_SAMPLE,
            value: EntryValue::Short(vec![target.bits_per_sample as u16; total_spp as usize]),
        },
        DirEntry::short(TAG_COMPRESSION, COMPRESSION_NONE),
        DirEntry::short(TAG_PHOTOMETRIC, target.photometric),
        DirEntry::short(TAG_ORIENTATION, ORIENTATION_TOPLEFT),
        DirEntry::short(TAG_SAMPLES_PER_PIXEL, total_spp),
        DirEntry::long(TAG_ROWS_PER_STRIP, height),
        DirEntry::long(TAG_STRIP_BYTE_COUNTS, strip_byte_count),
        DirEntry::short(TAG_PLANAR_CONFIG, PLANARCONFIG_CONTIG),
    ];
    if target.has_alpha {
        entries.push(DirEntry::short(TAG_EXTRA_SAMPLES, EXTRASAMPLE_UNASSALPHA));
    }
    if let Some(channels) = &colormap {
        entries.push(DirEntry {
            tag: TAG_COLOR_MAP,
            value: EntryValue::Short(channels.clone()),
        });
    }

    // The strip begins right after the directory and its spilled
    // values; its offset depends only on entry sizes, so it can be
    // computed before writing.
    let spilled: u32 = entries
        .iter()
        .map(|e| {
            let len = e.data_bytes().len() as u32;
            if len > 4 {
                len
            } else {
                0
            }
        })
        .sum();
    let entry_count = entries.len() as u32 + 1;
    let ifd_len = 2 + entry_count * 12 + 4;
    let strip_offset = 8 + ifd_len + spilled;
    entries.push(DirEntry::long(TAG_STRIP_OFFSETS, strip_offset));

    let data_start = write_directory(stream, &mut entries)?;
    debug_assert_eq!(data_start, strip_offset);

    let direct = source.layout.raster_format == target.layout.raster_format
        && source.layout.depth == target.layout.depth
        && source.layout.color_order == target.layout.color_order
        && source.layout.palette_type == target.layout.palette_type
        && src_row_size == tiff_row_size;

    if direct {
        stream.write_all(texels)?;
    } else {
        tracing::debug!(target: "rastex", "TIFF serialization takes the row transform path");
        let fetch = ColorDispatcher::for_layout(
            &source.layout,
            source.palette.as_deref(),
            source.palette_size,
        );
        let put = ColorDispatcher::for_layout(&target.layout, None, 0);

        let mut rowbuf = vec![0u8; tiff_row_size];
        for row in 0..height {
            rowbuf.fill(0);
            let src_row = &texels[row as usize * src_row_size..(row as usize + 1) * src_row_size];
            for col in 0..width {
                match target.photometric {
                    PHOTOMETRIC_PALETTE => {
                        copy_palette_index(
                            src_row,
                            &mut rowbuf,
                            col,
                            source.layout.palette_type,
                            col,
                            target.layout.palette_type,
                            target.palette_size,
                        );
                    }
                    PHOTOMETRIC_MINISBLACK => {
                        let (lum, alpha) = fetch.get_luminance(src_row, col).unwrap_or((0, 0));
                        put.set_luminance(&mut rowbuf, col, lum, alpha);
                    }
                    _ => {
                        let color = fetch.get_rgba(src_row, col).unwrap_or_default();
                        put.set_rgba(&mut rowbuf, col, color);
                    }
                }
            }
            stream.write_all(&rowbuf)?;
        }
    }

    Ok(())
}

// --- Codec registration ---

fn downcast(payload: &(dyn Any + Send + Sync)) -> &NativeImageTiff {
    payload
        .downcast_ref::<NativeImageTiff>()
        .expect("TIFF codec received a foreign payload")
}

fn downcast_mut(payload: &mut (dyn Any + Send + Sync)) -> &mut NativeImageTiff {
    payload
        .downcast_mut::<NativeImageTiff>()
        .expect("TIFF codec received a foreign payload")
}

fn crop_rows(texels: &[u8], src_row_size: usize, dst_row_size: usize, rows: u32) -> Vec<u8> {
    let mut out = vec![0u8; dst_row_size * rows as usize];
    for row in 0..rows as usize {
        let src = &texels[row * src_row_size..row * src_row_size + dst_row_size];
        out[row * dst_row_size..(row + 1) * dst_row_size].copy_from_slice(src);
    }
    out
}

/// The TIFF codec vtable.
pub struct TiffImageTypeManager;

impl NativeImageTypeManager for TiffImageTypeManager {
    fn construct_image(&self, _engine: &Engine) -> Payload {
        Box::new(NativeImageTiff::default())
    }

    fn clone_image(&self, _engine: &Engine, src: &(dyn Any + Send + Sync)) -> Result<Payload> {
        Ok(Box::new(downcast(src).clone()))
    }

    fn is_stream_native_image(&self, _engine: &Engine, stream: &mut dyn Stream) -> bool {
        probed(stream, false, check_tiff)
    }

    fn read_native_image(
        &self,
        _engine: &Engine,
        payload: &mut (dyn Any + Send + Sync),
        stream: &mut dyn Stream,
    ) -> Result<()> {
        *downcast_mut(payload) = read_native_image(stream)?;
        Ok(())
    }

    fn write_native_image(
        &self,
        engine: &Engine,
        payload: &(dyn Any + Send + Sync),
        stream: &mut dyn Stream,
    ) -> Result<()> {
        write_native_image(engine, downcast(payload), stream)
    }

    fn read_from_native_texture(
        &self,
        engine: &Engine,
        payload: &mut (dyn Any + Send + Sync),
        native_tex_name: &str,
        texture: &TypedObject,
    ) -> Result<AcquireFeedback> {
        let provider = engine
            .texture_provider(native_tex_name)
            .ok_or_else(|| Error::UnknownFormat(native_tex_name.to_string()))?;
        let pixels = provider.get_pixel_data_from_texture(engine, texture.payload())?;
        if pixels.compression != CompressionType::None {
            return Err(Error::Unsupported(
                "TIFF cannot hold compressed texels".to_string(),
            ));
        }
        let level = pixels
            .mipmaps
            .first()
            .ok_or_else(|| Error::InvalidArgument("raster has no mipmap layers".to_string()))?;

        let mut directly_acquired = false;
        let texels = if level.width == level.layer_width && level.height == level.layer_height {
            directly_acquired = !pixels.is_newly_allocated;
            level.texels.clone()
        } else {
            // Strip the raw-buffer padding down to the logical layer.
            let src_row_size = pixels.layout.row_size(level.width);
            let dst_row_size = pixels.layout.row_size(level.layer_width);
            crop_rows(&level.texels, src_row_size, dst_row_size, level.layer_height).into()
        };

        let directly_acquired_palette =
            pixels.palette.is_some() && !pixels.is_newly_allocated;

        *downcast_mut(payload) = NativeImageTiff {
            width: level.layer_width,
            height: level.layer_height,
            layout: pixels.layout,
            texels: Some(texels),
            palette: pixels.palette.clone(),
            palette_size: pixels.palette_size,
            alpha: pixels.alpha,
        };

        Ok(AcquireFeedback {
            has_directly_acquired: directly_acquired,
            has_directly_acquired_palette: directly_acquired_palette,
        })
    }

    fn write_to_native_texture(
        &self,
        engine: &Engine,
        payload: &mut (dyn Any + Send + Sync),
        native_tex_name: &str,
        texture: &mut TypedObject,
    ) -> Result<AcquireFeedback> {
        let source = downcast(payload);
        let texels = source
            .texels
            .clone()
            .ok_or_else(|| Error::InvalidArgument("native image holds no pixel data".to_string()))?;

        let mut pixels = PixelDataTraversal::new(source.layout);
        pixels.mipmaps.push(MipmapLevel {
            width: source.width,
            height: source.height,
            layer_width: source.width,
            layer_height: source.height,
            texels,
        });
        pixels.palette = source.palette.clone();
        pixels.palette_size = source.palette_size;
        pixels.alpha = source.alpha;
        pixels.is_newly_allocated = false;

        let provider = engine
            .texture_provider(native_tex_name)
            .ok_or_else(|| Error::UnknownFormat(native_tex_name.to_string()))?;
        let mut feedback = AcquireFeedback::default();
        provider.set_pixel_data_to_texture(engine, texture.payload_mut(), pixels, &mut feedback)?;
        Ok(feedback)
    }

    fn clear_image_data(&self, payload: &mut (dyn Any + Send + Sync)) {
        let image = downcast_mut(payload);
        image.texels = None;
        image.width = 0;
        image.height = 0;
        image.alpha = AlphaState::Unknown;
    }

    fn clear_palette_data(&self, payload: &mut (dyn Any + Send + Sync)) {
        let image = downcast_mut(payload);
        image.palette = None;
        image.palette_size = 0;
    }

    fn best_supported_native_texture(&self, _payload: &(dyn Any + Send + Sync)) -> &'static str {
        "Direct3D"
    }
}

const TIFF_EXTENSIONS: &[FilenameExtension] = &[
    FilenameExtension {
        name: "TIFF",
        is_default: false,
    },
    FilenameExtension {
        name: "TIF",
        is_default: true,
    },
];

const TIFF_SUPPORTED_TEXTURES: &[&str] = &["Direct3D", "PowerVR"];

/// Registers the TIFF codec with an engine.
pub fn register_native_image_type(engine: &Engine) -> bool {
    engine.register_native_image_type(
        NativeImageFormatDesc {
            type_name: "TIFF",
            friendly_name: "Tag Image File Format",
            extensions: TIFF_EXTENSIONS,
            supported_native_textures: TIFF_SUPPORTED_TEXTURES,
        },
        Arc::new(TiffImageTypeManager),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemoryStream;

    fn probe(bytes: &[u8]) -> bool {
        let mut stream = MemoryStream::from_vec(bytes.to_vec());
        probed(&mut stream as &mut dyn Stream, false, check_tiff)
    }

    /// Header + one IFD with a single SHORT entry, properly terminated.
    fn minimal_tiff() -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&[0x49, 0x49, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00]);
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&256u16.to_le_bytes());
        out.extend_from_slice(&3u16.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&0x00010000u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out
    }

    #[test]
    fn probe_accepts_minimal_tiff() {
        assert!(probe(&minimal_tiff()));
    }

    #[test]
    fn probe_rejects_wrong_magic() {
        let mut bytes = minimal_tiff();
        bytes[2] = 0x2B;
        assert!(!probe(&bytes));
        assert!(!probe(b"II\x2A"));
        assert!(!probe(b"PNG not a tiff at all"));
    }

    #[test]
    fn probe_rejects_empty_ifd() {
        let mut out = Vec::new();
        out.extend_from_slice(&[0x49, 0x49, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00]);
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        assert!(!probe(&out));
    }

    #[test]
    fn probe_rejects_unterminated_chain() {
        let mut bytes = minimal_tiff();
        let len = bytes.len();
        // Truncate away the next-IFD pointer.
        bytes.truncate(len - 4);
        assert!(!probe(&bytes));
    }

    #[test]
    fn probe_rejects_out_of_bounds_entry_data() {
        let mut out = Vec::new();
        out.extend_from_slice(&[0x49, 0x49, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00]);
        out.extend_from_slice(&1u16.to_le_bytes());
        // A LONG entry with 100 values far past the end of the stream.
        out.extend_from_slice(&273u16.to_le_bytes());
        out.extend_from_slice(&4u16.to_le_bytes());
        out.extend_from_slice(&100u32.to_le_bytes());
        out.extend_from_slice(&0xFFFF_0000u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        assert!(!probe(&out));
    }

    #[test]
    fn probe_accepts_big_endian() {
        let mut out = Vec::new();
        out.extend_from_slice(&[0x4D, 0x4D, 0x00, 0x2A, 0x00, 0x00, 0x00, 0x08]);
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&256u16.to_be_bytes());
        out.extend_from_slice(&3u16.to_be_bytes());
        out.extend_from_slice(&1u32.to_be_bytes());
        out.extend_from_slice(&0x00000100u32.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());
        assert!(probe(&out));
    }

    #[test]
    fn probe_restores_position_at_offset() {
        let mut padded = vec![0u8; 100];
        padded.extend_from_slice(&minimal_tiff());

        let mut stream = MemoryStream::from_vec(padded);
        stream.seek(SeekFrom::Start(100)).unwrap();
        assert!(probe_at(&mut stream));
        assert_eq!(stream.tell().unwrap(), 100);
    }

    fn probe_at(stream: &mut MemoryStream) -> bool {
        probed(stream as &mut dyn Stream, false, check_tiff)
    }

    fn encode(image: &NativeImageTiff) -> Vec<u8> {
        let engine = Engine::builder().builtin_formats(false).build();
        let mut stream = MemoryStream::new();
        write_native_image(&engine, image, &mut stream).unwrap();
        stream.into_inner()
    }

    fn decode(bytes: Vec<u8>) -> NativeImageTiff {
        let mut stream = MemoryStream::from_vec(bytes);
        read_native_image(&mut stream).unwrap()
    }

    fn gray_alpha_image() -> NativeImageTiff {
        // 2x2 LUM_ALPHA image, rows padded to 4 bytes.
        let texels: Vec<u8> = vec![0, 0, 255, 255, 128, 64, 64, 128];
        NativeImageTiff {
            width: 2,
            height: 2,
            layout: PixelLayout {
                raster_format: RasterFormat::LumAlpha,
                depth: 16,
                row_alignment: 4,
                color_order: ColorOrder::Rgba,
                palette_type: PaletteType::None,
            },
            texels: Some(texels.into()),
            palette: None,
            palette_size: 0,
            alpha: AlphaState::Transparent,
        }
    }

    #[test]
    fn encoded_tiff_passes_the_probe() {
        let bytes = encode(&gray_alpha_image());
        assert!(probe(&bytes));
    }

    #[test]
    fn gray_alpha_round_trip() {
        let original = gray_alpha_image();
        let decoded = decode(encode(&original));

        assert_eq!(decoded.width, 2);
        assert_eq!(decoded.height, 2);
        assert_eq!(decoded.layout.raster_format, RasterFormat::LumAlpha);
        assert_eq!(
            decoded.texels.as_deref().unwrap(),
            original.texels.as_deref().unwrap()
        );
    }

    #[test]
    fn rgb_round_trip() {
        // 3x1 RGB888 rows pad from 9 to 12 bytes.
        let texels: Vec<u8> = vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 0, 0, 0];
        let original = NativeImageTiff {
            width: 3,
            height: 1,
            layout: PixelLayout {
                raster_format: RasterFormat::Rgb888,
                depth: 24,
                row_alignment: 4,
                color_order: ColorOrder::Rgba,
                palette_type: PaletteType::None,
            },
            texels: Some(texels.into()),
            palette: None,
            palette_size: 0,
            alpha: AlphaState::Opaque,
        };

        let decoded = decode(encode(&original));
        assert_eq!(decoded.layout.raster_format, RasterFormat::Rgb888);
        // The decoded rows carry the same pixels; padding bytes are zero
        // in both.
        assert_eq!(
            decoded.texels.as_deref().unwrap(),
            original.texels.as_deref().unwrap()
        );
    }

    #[test]
    fn palette_round_trip() {
        // 4x1 8-bit palettised image with a 256-entry RGB888 palette.
        let mut palette = vec![0u8; 768];
        palette[0..3].copy_from_slice(&[255, 0, 0]);
        palette[3..6].copy_from_slice(&[0, 255, 0]);
        palette[6..9].copy_from_slice(&[0, 0, 255]);

        let original = NativeImageTiff {
            width: 4,
            height: 1,
            layout: PixelLayout {
                raster_format: RasterFormat::Rgb888,
                depth: 8,
                row_alignment: 4,
                color_order: ColorOrder::Rgba,
                palette_type: PaletteType::Pal8,
            },
            texels: Some(vec![0u8, 1, 2, 1].into()),
            palette: Some(palette.clone().into()),
            palette_size: 256,
            alpha: AlphaState::Opaque,
        };

        let decoded = decode(encode(&original));
        assert_eq!(decoded.layout.palette_type, PaletteType::Pal8);
        assert_eq!(decoded.texels.as_deref().unwrap(), &[0u8, 1, 2, 1]);
        // Palette channels went through 8 -> 16 -> 8 bit rescaling and
        // must come back exactly.
        assert_eq!(decoded.palette.as_deref().unwrap(), palette.as_slice());
    }

    #[test]
    fn miniswhite_inverts() {
        // Hand-build a MINISWHITE grayscale TIFF: 2x1, bps 8.
        let mut out = Vec::new();
        out.extend_from_slice(&[0x49, 0x49, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00]);
        let entries: &[(u16, u16, u32, u32)] = &[
            (256, 4, 1, 2),    // width
            (257, 4, 1, 1),    // height
            (258, 3, 1, 8),    // bits per sample
            (259, 3, 1, 1),    // no compression
            (262, 3, 1, 0),    // MINISWHITE
            (273, 4, 1, 122),  // strip offset
            (277, 3, 1, 1),    // samples per pixel
            (278, 4, 1, 1),    // rows per strip
            (279, 4, 1, 2),    // strip byte count
        ];
        out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        for (tag, ty, count, value) in entries {
            out.extend_from_slice(&tag.to_le_bytes());
            out.extend_from_slice(&ty.to_le_bytes());
            out.extend_from_slice(&count.to_le_bytes());
            out.extend_from_slice(&value.to_le_bytes());
        }
        out.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(out.len(), 122);
        out.write_all(&[0, 200]).unwrap();

        let decoded = decode(out);
        assert_eq!(decoded.layout.raster_format, RasterFormat::Lum8);
        assert_eq!(decoded.texels.as_deref().unwrap()[..2], [255, 55]);
    }

    #[test]
    fn lzw_compressed_tiff_falls_back_to_the_generic_reader() {
        use tiff::encoder::{colortype, compression, TiffEncoder};

        let width = 4u32;
        let height = 2u32;
        let data: Vec<u8> = (0..width * height * 3).map(|i| (i * 10) as u8).collect();

        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut encoder = TiffEncoder::new(&mut cursor).unwrap();
            encoder
                .write_image_with_compression::<colortype::RGB8, compression::Lzw>(
                    width,
                    height,
                    compression::Lzw,
                    &data,
                )
                .unwrap();
        }
        let bytes = cursor.into_inner();
        assert!(probe(&bytes));

        let decoded = decode(bytes);
        // Compressed data never takes the scanline paths; the generic
        // reader lands in RGBA8888.
        assert_eq!(decoded.layout.raster_format, RasterFormat::Rgba8888);
        assert_eq!(decoded.dimensions(), (4, 2));

        let mut expected = Vec::new();
        for px in data.chunks_exact(3) {
            expected.extend_from_slice(px);
            expected.push(0xFF);
        }
        assert_eq!(decoded.texels.as_deref().unwrap(), expected.as_slice());
    }

    #[test]
    fn compressed_palette_tiff_decodes_through_the_generic_path() {
        // 4x1 paletted image, PackBits-compressed indices 0,1,2,1 with
        // a red/green/blue colormap.
        let mut out = Vec::new();
        out.extend_from_slice(&[0x49, 0x49, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00]);
        let entries: &[(u16, u16, u32, u32)] = &[
            (256, 4, 1, 4),      // width
            (257, 4, 1, 1),      // height
            (258, 3, 1, 8),      // bits per sample
            (259, 3, 1, 32773),  // PackBits
            (262, 3, 1, 3),      // palette photometric
            (273, 4, 1, 1670),   // strip offset
            (277, 3, 1, 1),      // samples per pixel
            (278, 4, 1, 1),      // rows per strip
            (279, 4, 1, 5),      // strip byte count
            (320, 3, 768, 134),  // colormap offset
        ];
        out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        for (tag, ty, count, value) in entries {
            out.extend_from_slice(&tag.to_le_bytes());
            out.extend_from_slice(&ty.to_le_bytes());
            out.extend_from_slice(&count.to_le_bytes());
            out.extend_from_slice(&value.to_le_bytes());
        }
        out.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(out.len(), 134);

        // Three 256-entry 16-bit channel arrays: r[0], g[1], b[2] lit.
        let mut colormap = vec![0u8; 1536];
        colormap[0..2].copy_from_slice(&65535u16.to_le_bytes());
        colormap[512 + 2..512 + 4].copy_from_slice(&65535u16.to_le_bytes());
        colormap[1024 + 4..1024 + 6].copy_from_slice(&65535u16.to_le_bytes());
        out.extend_from_slice(&colormap);
        assert_eq!(out.len(), 1670);

        // PackBits: one literal run of four bytes.
        out.extend_from_slice(&[3, 0, 1, 2, 1]);

        let decoded = decode(out);
        assert_eq!(decoded.layout.raster_format, RasterFormat::Rgba8888);
        assert_eq!(
            decoded.texels.as_deref().unwrap(),
            &[
                255, 0, 0, 255, //
                0, 255, 0, 255, //
                0, 0, 255, 255, //
                0, 255, 0, 255,
            ]
        );
    }

    #[test]
    fn cmyk_tiff_decodes_through_the_generic_path() {
        // 2x1 uncompressed CMYK: white, then full-magenta-and-yellow
        // (red). No scanline mapping exists for photometric 5, so this
        // also exercises the fallback.
        let mut out = Vec::new();
        out.extend_from_slice(&[0x49, 0x49, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00]);
        let entries: &[(u16, u16, u32, u32)] = &[
            (256, 4, 1, 2),    // width
            (257, 4, 1, 1),    // height
            (258, 3, 4, 122),  // bits per sample, out of line
            (259, 3, 1, 1),    // no compression
            (262, 3, 1, 5),    // CMYK photometric
            (273, 4, 1, 130),  // strip offset
            (277, 3, 1, 4),    // samples per pixel
            (278, 4, 1, 1),    // rows per strip
            (279, 4, 1, 8),    // strip byte count
        ];
        out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        for (tag, ty, count, value) in entries {
            out.extend_from_slice(&tag.to_le_bytes());
            out.extend_from_slice(&ty.to_le_bytes());
            out.extend_from_slice(&count.to_le_bytes());
            out.extend_from_slice(&value.to_le_bytes());
        }
        out.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(out.len(), 122);
        for _ in 0..4 {
            out.extend_from_slice(&8u16.to_le_bytes());
        }
        assert_eq!(out.len(), 130);
        out.extend_from_slice(&[0, 0, 0, 0, 0, 255, 255, 0]);

        let decoded = decode(out);
        assert_eq!(decoded.layout.raster_format, RasterFormat::Rgba8888);
        assert_eq!(
            decoded.texels.as_deref().unwrap(),
            &[255, 255, 255, 255, 255, 0, 0, 255]
        );
    }
}
