//! DDS (DirectDraw Surface) native-image codec.
//!
//! Handles the classic 124-byte header with an uncompressed RGB mask
//! block or a DXT1-DXT5 FourCC. Uncompressed layers map onto the
//! raster formats by their channel masks; DXT layers pass through
//! without transcoding. Mipmap chains are read and written in full.

use std::any::Any;
use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use rastex_core::{
    AlphaState, ColorOrder, CompressionType, Error, MipmapLevel, PaletteType, PixelDataTraversal,
    PixelLayout, RasterFormat, Result,
};

use crate::engine::Engine;
use crate::image::{FilenameExtension, NativeImageFormatDesc, NativeImageTypeManager};
use crate::stream::{read_exact_buf, Stream};
use crate::texture::{mip_level_dimensions, probed, AcquireFeedback};
use crate::types::{Payload, TypedObject};

const DDS_MAGIC: u32 = 0x2053_4444; // "DDS "
const HEADER_SIZE: u32 = 124;
const PIXELFORMAT_SIZE: u32 = 32;

const DDSD_CAPS: u32 = 0x1;
const DDSD_HEIGHT: u32 = 0x2;
const DDSD_WIDTH: u32 = 0x4;
const DDSD_PITCH: u32 = 0x8;
const DDSD_PIXELFORMAT: u32 = 0x1000;
const DDSD_MIPMAPCOUNT: u32 = 0x20000;
const DDSD_LINEARSIZE: u32 = 0x80000;

const DDPF_ALPHAPIXELS: u32 = 0x1;
const DDPF_FOURCC: u32 = 0x4;
const DDPF_RGB: u32 = 0x40;
const DDPF_LUMINANCE: u32 = 0x20000;

const DDSCAPS_COMPLEX: u32 = 0x8;
const DDSCAPS_TEXTURE: u32 = 0x1000;
const DDSCAPS_MIPMAP: u32 = 0x400000;

const MAX_DIMENSION: u32 = 0x8000;
const MAX_MIPMAPS: u32 = 16;

fn fourcc(name: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*name)
}

/// Pixel-format block of a DDS header.
#[derive(Debug, Clone, Copy, Default)]
struct DdsPixelFormat {
    flags: u32,
    four_cc: u32,
    rgb_bit_count: u32,
    r_mask: u32,
    g_mask: u32,
    b_mask: u32,
    a_mask: u32,
}

impl DdsPixelFormat {
    fn compression(&self) -> Option<CompressionType> {
        if self.flags & DDPF_FOURCC == 0 {
            return None;
        }
        match self.four_cc {
            c if c == fourcc(b"DXT1") => Some(CompressionType::Dxt1),
            c if c == fourcc(b"DXT2") => Some(CompressionType::Dxt2),
            c if c == fourcc(b"DXT3") => Some(CompressionType::Dxt3),
            c if c == fourcc(b"DXT4") => Some(CompressionType::Dxt4),
            c if c == fourcc(b"DXT5") => Some(CompressionType::Dxt5),
            _ => None,
        }
    }

    fn uncompressed_layout(&self) -> Option<PixelLayout> {
        let masks = (self.r_mask, self.g_mask, self.b_mask, self.a_mask);
        let (format, order) = if self.flags & DDPF_LUMINANCE != 0 {
            if self.rgb_bit_count == 8 && self.r_mask == 0xFF {
                (RasterFormat::Lum8, ColorOrder::Rgba)
            } else {
                return None;
            }
        } else if self.flags & DDPF_RGB != 0 {
            match (self.rgb_bit_count, masks) {
                (32, (0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0xFF00_0000)) => {
                    (RasterFormat::Rgba8888, ColorOrder::Bgra)
                }
                (32, (0x0000_00FF, 0x0000_FF00, 0x00FF_0000, 0xFF00_0000)) => {
                    (RasterFormat::Rgba8888, ColorOrder::Rgba)
                }
                (24, (0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0)) => {
                    (RasterFormat::Rgb888, ColorOrder::Bgra)
                }
                (16, (0xF800, 0x07E0, 0x001F, 0)) => (RasterFormat::Rgb565, ColorOrder::Rgba),
                (16, (0x7C00, 0x03E0, 0x001F, 0x8000)) => {
                    (RasterFormat::Rgba1555, ColorOrder::Rgba)
                }
                (16, (0x0F00, 0x00F0, 0x000F, 0xF000)) => {
                    (RasterFormat::Rgba4444, ColorOrder::Rgba)
                }
                _ => return None,
            }
        } else {
            return None;
        };

        Some(PixelLayout {
            raster_format: format,
            depth: self.rgb_bit_count,
            // DDS rows are byte aligned.
            row_alignment: 1,
            color_order: order,
            palette_type: PaletteType::None,
        })
    }

    fn for_layout(layout: &PixelLayout) -> Result<Self> {
        let (flags, bit_count, masks) = match (layout.raster_format, layout.color_order) {
            (RasterFormat::Rgba8888, ColorOrder::Bgra) => (
                DDPF_RGB | DDPF_ALPHAPIXELS,
                32,
                (0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0xFF00_0000),
            ),
            (RasterFormat::Rgba8888, _) => (
                DDPF_RGB | DDPF_ALPHAPIXELS,
                32,
                (0x0000_00FF, 0x0000_FF00, 0x00FF_0000, 0xFF00_0000),
            ),
            (RasterFormat::Rgb888, _) => {
                (DDPF_RGB, 24, (0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0))
            }
            (RasterFormat::Rgb565, _) => (DDPF_RGB, 16, (0xF800, 0x07E0, 0x001F, 0)),
            (RasterFormat::Rgba1555, _) => {
                (DDPF_RGB | DDPF_ALPHAPIXELS, 16, (0x7C00, 0x03E0, 0x001F, 0x8000))
            }
            (RasterFormat::Rgba4444, _) => {
                (DDPF_RGB | DDPF_ALPHAPIXELS, 16, (0x0F00, 0x00F0, 0x000F, 0xF000))
            }
            (RasterFormat::Lum8, _) => (DDPF_LUMINANCE, 8, (0xFF, 0, 0, 0)),
            _ => {
                return Err(Error::Unsupported(
                    "raster format has no DDS mask mapping".to_string(),
                ))
            }
        };
        Ok(Self {
            flags,
            four_cc: 0,
            rgb_bit_count: bit_count,
            r_mask: masks.0,
            g_mask: masks.1,
            b_mask: masks.2,
            a_mask: masks.3,
        })
    }

    fn for_compression(compression: CompressionType) -> Result<Self> {
        let name: &[u8; 4] = match compression {
            CompressionType::Dxt1 => b"DXT1",
            CompressionType::Dxt2 => b"DXT2",
            CompressionType::Dxt3 => b"DXT3",
            CompressionType::Dxt4 => b"DXT4",
            CompressionType::Dxt5 => b"DXT5",
            CompressionType::None => {
                return Err(Error::InvalidArgument(
                    "uncompressed data takes the mask path".to_string(),
                ))
            }
        };
        Ok(Self {
            flags: DDPF_FOURCC,
            four_cc: fourcc(name),
            ..Default::default()
        })
    }
}

fn mip_data_size(layout: &PixelLayout, compression: CompressionType, w: u32, h: u32) -> usize {
    match compression.block_size() {
        Some(block) => {
            (w.div_ceil(4) as usize) * (h.div_ceil(4) as usize) * block as usize
        }
        None => layout.row_size(w) * h as usize,
    }
}

/// Decoded surface held by the DDS payload.
#[derive(Debug, Clone, Default)]
pub struct NativeImageDds {
    width: u32,
    height: u32,
    layout: PixelLayout,
    compression: CompressionType,
    alpha: AlphaState,
    mipmaps: Vec<MipmapLevel>,
}

impl NativeImageDds {
    /// Logical dimensions of the base surface.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Number of stored mip levels.
    pub fn mipmap_count(&self) -> usize {
        self.mipmaps.len()
    }

    /// Block compression of the stored surfaces.
    pub fn compression(&self) -> CompressionType {
        self.compression
    }
}

fn check_dds(stream: &mut dyn Stream, _start: u64) -> Result<bool> {
    let magic = match stream.read_u32::<LittleEndian>() {
        Ok(v) => v,
        Err(_) => return Ok(false),
    };
    if magic != DDS_MAGIC {
        return Ok(false);
    }
    let header_size = match stream.read_u32::<LittleEndian>() {
        Ok(v) => v,
        Err(_) => return Ok(false),
    };
    if header_size != HEADER_SIZE {
        return Ok(false);
    }
    // Skip ahead to the pixel-format block and verify its size field.
    stream.seek(SeekFrom::Current(68))?;
    let pf_size = match stream.read_u32::<LittleEndian>() {
        Ok(v) => v,
        Err(_) => return Ok(false),
    };
    Ok(pf_size == PIXELFORMAT_SIZE)
}

fn read_native_image(stream: &mut dyn Stream) -> Result<NativeImageDds> {
    let magic = stream.read_u32::<LittleEndian>()?;
    if magic != DDS_MAGIC {
        return Err(Error::StreamMalformed("missing DDS magic".to_string()));
    }
    let header_size = stream.read_u32::<LittleEndian>()?;
    if header_size != HEADER_SIZE {
        return Err(Error::StreamMalformed(format!(
            "DDS header size is {header_size}"
        )));
    }
    let flags = stream.read_u32::<LittleEndian>()?;
    let height = stream.read_u32::<LittleEndian>()?;
    let width = stream.read_u32::<LittleEndian>()?;
    let _pitch_or_linear = stream.read_u32::<LittleEndian>()?;
    let _depth = stream.read_u32::<LittleEndian>()?;
    let mip_count_raw = stream.read_u32::<LittleEndian>()?;
    let _reserved = read_exact_buf(stream, 11 * 4, "DDS reserved fields")?;

    let pf_size = stream.read_u32::<LittleEndian>()?;
    if pf_size != PIXELFORMAT_SIZE {
        return Err(Error::StreamMalformed(format!(
            "DDS pixel-format size is {pf_size}"
        )));
    }
    let pixel_format = DdsPixelFormat {
        flags: stream.read_u32::<LittleEndian>()?,
        four_cc: stream.read_u32::<LittleEndian>()?,
        rgb_bit_count: stream.read_u32::<LittleEndian>()?,
        r_mask: stream.read_u32::<LittleEndian>()?,
        g_mask: stream.read_u32::<LittleEndian>()?,
        b_mask: stream.read_u32::<LittleEndian>()?,
        a_mask: stream.read_u32::<LittleEndian>()?,
    };
    let _caps = read_exact_buf(stream, 4 * 4, "DDS caps")?;
    let _reserved2 = stream.read_u32::<LittleEndian>()?;

    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(Error::StreamMalformed(format!(
            "DDS dimensions {width}x{height} are out of range"
        )));
    }
    let mip_count = if flags & DDSD_MIPMAPCOUNT != 0 {
        mip_count_raw.clamp(1, MAX_MIPMAPS)
    } else {
        1
    };

    let (layout, compression, alpha) = if let Some(compression) = pixel_format.compression() {
        let layout = PixelLayout {
            raster_format: RasterFormat::Rgba8888,
            depth: 32,
            row_alignment: 1,
            color_order: ColorOrder::Rgba,
            palette_type: PaletteType::None,
        };
        let alpha = if compression == CompressionType::Dxt1 {
            AlphaState::Unknown
        } else {
            AlphaState::Transparent
        };
        (layout, compression, alpha)
    } else if let Some(layout) = pixel_format.uncompressed_layout() {
        let alpha = if pixel_format.flags & DDPF_ALPHAPIXELS != 0 {
            AlphaState::Transparent
        } else {
            AlphaState::Opaque
        };
        (layout, CompressionType::None, alpha)
    } else {
        return Err(Error::Unsupported(
            "DDS pixel format has no raster mapping".to_string(),
        ));
    };

    let mut mipmaps = Vec::with_capacity(mip_count as usize);
    for level in 0..mip_count {
        let (w, h) = mip_level_dimensions(width, height, level);
        let size = mip_data_size(&layout, compression, w, h);
        let texels = read_exact_buf(stream, size, "DDS mip data")?;
        let (raw_w, raw_h) = match compression {
            CompressionType::None => (w, h),
            _ => (w.div_ceil(4) * 4, h.div_ceil(4) * 4),
        };
        mipmaps.push(MipmapLevel {
            width: raw_w,
            height: raw_h,
            layer_width: w,
            layer_height: h,
            texels: texels.into(),
        });
    }

    Ok(NativeImageDds {
        width,
        height,
        layout,
        compression,
        alpha,
        mipmaps,
    })
}

fn write_native_image(source: &NativeImageDds, stream: &mut dyn Stream) -> Result<()> {
    if source.mipmaps.is_empty() {
        return Err(Error::InvalidArgument(
            "native image holds no pixel data".to_string(),
        ));
    }

    let pixel_format = match source.compression {
        CompressionType::None => DdsPixelFormat::for_layout(&source.layout)?,
        compression => DdsPixelFormat::for_compression(compression)?,
    };

    // DDS rows are byte aligned; a payload carrying padded rows is
    // written tightly.
    let mut tight_layout = source.layout;
    tight_layout.row_alignment = 1;

    let mip_count = source.mipmaps.len() as u32;
    let mut flags = DDSD_CAPS | DDSD_HEIGHT | DDSD_WIDTH | DDSD_PIXELFORMAT;
    let pitch_or_linear = match source.compression {
        CompressionType::None => {
            flags |= DDSD_PITCH;
            tight_layout.row_size(source.width) as u32
        }
        _ => {
            flags |= DDSD_LINEARSIZE;
            source.mipmaps[0].texels.len() as u32
        }
    };
    let mut caps = DDSCAPS_TEXTURE;
    if mip_count > 1 {
        flags |= DDSD_MIPMAPCOUNT;
        caps |= DDSCAPS_COMPLEX | DDSCAPS_MIPMAP;
    }

    stream.write_u32::<LittleEndian>(DDS_MAGIC)?;
    stream.write_u32::<LittleEndian>(HEADER_SIZE)?;
    stream.write_u32::<LittleEndian>(flags)?;
    stream.write_u32::<LittleEndian>(source.height)?;
    stream.write_u32::<LittleEndian>(source.width)?;
    stream.write_u32::<LittleEndian>(pitch_or_linear)?;
    stream.write_u32::<LittleEndian>(0)?;
    stream.write_u32::<LittleEndian>(mip_count)?;
    for _ in 0..11 {
        stream.write_u32::<LittleEndian>(0)?;
    }

    stream.write_u32::<LittleEndian>(PIXELFORMAT_SIZE)?;
    stream.write_u32::<LittleEndian>(pixel_format.flags)?;
    stream.write_u32::<LittleEndian>(pixel_format.four_cc)?;
    stream.write_u32::<LittleEndian>(pixel_format.rgb_bit_count)?;
    stream.write_u32::<LittleEndian>(pixel_format.r_mask)?;
    stream.write_u32::<LittleEndian>(pixel_format.g_mask)?;
    stream.write_u32::<LittleEndian>(pixel_format.b_mask)?;
    stream.write_u32::<LittleEndian>(pixel_format.a_mask)?;

    stream.write_u32::<LittleEndian>(caps)?;
    stream.write_u32::<LittleEndian>(0)?;
    stream.write_u32::<LittleEndian>(0)?;
    stream.write_u32::<LittleEndian>(0)?;
    stream.write_u32::<LittleEndian>(0)?;

    for mip in &source.mipmaps {
        let padded = source.layout.row_size(mip.width);
        let tight = tight_layout.row_size(mip.width);
        if source.compression != CompressionType::None || padded == tight {
            stream.write_all(&mip.texels)?;
        } else {
            for row in 0..mip.height as usize {
                stream.write_all(&mip.texels[row * padded..row * padded + tight])?;
            }
        }
    }
    Ok(())
}

fn downcast(payload: &(dyn Any + Send + Sync)) -> &NativeImageDds {
    payload
        .downcast_ref::<NativeImageDds>()
        .expect("DDS codec received a foreign payload")
}

fn downcast_mut(payload: &mut (dyn Any + Send + Sync)) -> &mut NativeImageDds {
    payload
        .downcast_mut::<NativeImageDds>()
        .expect("DDS codec received a foreign payload")
}

/// The DDS codec vtable.
pub struct DdsImageTypeManager;

impl NativeImageTypeManager for DdsImageTypeManager {
    fn construct_image(&self, _engine: &Engine) -> Payload {
        Box::new(NativeImageDds::default())
    }

    fn clone_image(&self, _engine: &Engine, src: &(dyn Any + Send + Sync)) -> Result<Payload> {
        Ok(Box::new(downcast(src).clone()))
    }

    fn is_stream_native_image(&self, _engine: &Engine, stream: &mut dyn Stream) -> bool {
        probed(stream, false, check_dds)
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
        _engine: &Engine,
        payload: &(dyn Any + Send + Sync),
        stream: &mut dyn Stream,
    ) -> Result<()> {
        write_native_image(downcast(payload), stream)
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
        if pixels.is_palettised() {
            return Err(Error::Unsupported(
                "DDS cannot hold palettised texels".to_string(),
            ));
        }
        let (width, height) = pixels.base_dimensions();
        if pixels.mipmaps.is_empty() {
            return Err(Error::InvalidArgument(
                "raster has no mipmap layers".to_string(),
            ));
        }

        let directly_acquired = !pixels.is_newly_allocated;
        *downcast_mut(payload) = NativeImageDds {
            width,
            height,
            layout: pixels.layout,
            compression: pixels.compression,
            alpha: pixels.alpha,
            mipmaps: pixels.mipmaps.iter().cloned().collect(),
        };

        Ok(AcquireFeedback {
            has_directly_acquired: directly_acquired,
            has_directly_acquired_palette: false,
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
        if source.mipmaps.is_empty() {
            return Err(Error::InvalidArgument(
                "native image holds no pixel data".to_string(),
            ));
        }

        let mut pixels = PixelDataTraversal::new(source.layout);
        pixels.mipmaps.extend(source.mipmaps.iter().cloned());
        pixels.compression = source.compression;
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
        image.mipmaps.clear();
        image.width = 0;
        image.height = 0;
        image.compression = CompressionType::None;
        image.alpha = AlphaState::Unknown;
    }

    fn clear_palette_data(&self, _payload: &mut (dyn Any + Send + Sync)) {
        // DDS payloads never hold palettes.
    }

    fn best_supported_native_texture(&self, _payload: &(dyn Any + Send + Sync)) -> &'static str {
        "Direct3D"
    }
}

const DDS_EXTENSIONS: &[FilenameExtension] = &[FilenameExtension {
    name: "DDS",
    is_default: true,
}];

const DDS_SUPPORTED_TEXTURES: &[&str] = &["Direct3D", "PowerVR"];

/// Registers the DDS codec with an engine.
pub fn register_native_image_type(engine: &Engine) -> bool {
    engine.register_native_image_type(
        NativeImageFormatDesc {
            type_name: "DDS",
            friendly_name: "DirectDraw Surface",
            extensions: DDS_EXTENSIONS,
            supported_native_textures: DDS_SUPPORTED_TEXTURES,
        },
        Arc::new(DdsImageTypeManager),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemoryStream;

    fn rgba_image(width: u32, height: u32, mips: u32) -> NativeImageDds {
        let layout = PixelLayout {
            raster_format: RasterFormat::Rgba8888,
            depth: 32,
            row_alignment: 1,
            color_order: ColorOrder::Bgra,
            palette_type: PaletteType::None,
        };
        let mut mipmaps = Vec::new();
        for level in 0..mips {
            let (w, h) = mip_level_dimensions(width, height, level);
            let mut texels = Vec::with_capacity((w * h * 4) as usize);
            for n in 0..w * h {
                texels.extend_from_slice(&[(n % 256) as u8, level as u8, 0x33, 0xFF]);
            }
            mipmaps.push(MipmapLevel::unpadded(w, h, texels));
        }
        NativeImageDds {
            width,
            height,
            layout,
            compression: CompressionType::None,
            alpha: AlphaState::Transparent,
            mipmaps,
        }
    }

    #[test]
    fn round_trip_uncompressed_with_mipmaps() {
        let original = rgba_image(8, 4, 3);
        let mut stream = MemoryStream::new();
        write_native_image(&original, &mut stream).unwrap();

        let mut stream = MemoryStream::from_vec(stream.into_inner());
        let decoded = read_native_image(&mut stream).unwrap();

        assert_eq!(decoded.dimensions(), (8, 4));
        assert_eq!(decoded.mipmap_count(), 3);
        assert_eq!(decoded.layout.raster_format, RasterFormat::Rgba8888);
        assert_eq!(decoded.layout.color_order, ColorOrder::Bgra);
        for (a, b) in original.mipmaps.iter().zip(decoded.mipmaps.iter()) {
            assert_eq!(a.texels.as_ref(), b.texels.as_ref());
        }
    }

    #[test]
    fn probe_checks_header_sizes() {
        let original = rgba_image(4, 4, 1);
        let mut stream = MemoryStream::new();
        write_native_image(&original, &mut stream).unwrap();
        let mut bytes = stream.into_inner();

        let mut probe_stream = MemoryStream::from_vec(bytes.clone());
        let manager = DdsImageTypeManager;
        let engine = Engine::builder().builtin_formats(false).build();
        assert!(manager.is_stream_native_image(&engine, &mut probe_stream));

        // Corrupt the header-size field.
        bytes[4] = 99;
        let mut probe_stream = MemoryStream::from_vec(bytes);
        assert!(!manager.is_stream_native_image(&engine, &mut probe_stream));
    }

    #[test]
    fn dxt_passthrough_round_trip() {
        // One 8x8 DXT1 surface: 4 blocks of 8 bytes.
        let texels: Vec<u8> = (0..32).collect();
        let original = NativeImageDds {
            width: 8,
            height: 8,
            layout: PixelLayout {
                raster_format: RasterFormat::Rgba8888,
                depth: 32,
                row_alignment: 1,
                color_order: ColorOrder::Rgba,
                palette_type: PaletteType::None,
            },
            compression: CompressionType::Dxt1,
            alpha: AlphaState::Unknown,
            mipmaps: vec![MipmapLevel {
                width: 8,
                height: 8,
                layer_width: 8,
                layer_height: 8,
                texels: texels.clone().into(),
            }],
        };

        let mut stream = MemoryStream::new();
        write_native_image(&original, &mut stream).unwrap();
        let mut stream = MemoryStream::from_vec(stream.into_inner());
        let decoded = read_native_image(&mut stream).unwrap();

        assert_eq!(decoded.compression(), CompressionType::Dxt1);
        assert_eq!(decoded.mipmaps[0].texels.as_ref(), texels.as_slice());
    }
}
