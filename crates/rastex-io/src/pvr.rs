//! PowerVR native-texture provider.
//!
//! Stores mipmap chains in PVRTC1 compressed form. The serialized
//! block is little-endian: a meta header carrying the unique PowerVR
//! platform descriptor, the texture and mask names, mip count, alpha
//! flag, base dimensions and internal format, followed by one u32 size
//! per mipmap and the concatenated mip bytes.
//!
//! Pixel exchange always transcodes: acquisition compresses into the
//! chosen PVRTC variant and delivery decompresses, so the acquire
//! feedback never reports direct acquisition.

mod pvrtc;

use std::any::Any;
use std::io::Write;
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use rastex_core::{
    move_texels, AlphaState, ColorDispatcher, ColorOrder, CompressionType, Error, MipmapLevel,
    PaletteType, PixelDataTraversal, PixelLayout, RasterFormat, RawMipmapLayer, Result,
    SharedTexels,
};

use crate::engine::Engine;
use crate::stream::{read_exact_buf, Stream};
use crate::texture::{
    append_mipmap_layer, fetch_mipmap_layer, mip_level_dimensions, probed, AcquireFeedback,
    MipmapManager, NativeTextureTypeProvider, TexFormatInfo, TexNativeCompatibility, TextureBase,
    TextureInfo, TextureSizeRules,
};
use crate::types::Payload;

/// Platform descriptor word identifying PowerVR texture blocks.
pub const PLATFORM_PVR: u32 = 9;

const NAME_FIELD_LEN: usize = 32;
const MAX_MIPMAPS: u8 = 32;
const MAX_MIP_DATA_SIZE: u32 = 64 << 20;

/// PVRTC variant a texture is stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum PvrInternalFormat {
    /// PVRTC1 4bpp, no alpha.
    #[default]
    Rgb4Bpp = 0x8C00,
    /// PVRTC1 2bpp, no alpha.
    Rgb2Bpp = 0x8C01,
    /// PVRTC1 4bpp with alpha.
    Rgba4Bpp = 0x8C02,
    /// PVRTC1 2bpp with alpha.
    Rgba2Bpp = 0x8C03,
}

impl PvrInternalFormat {
    /// Bits per texel of the compressed data.
    pub fn depth(self) -> u32 {
        match self {
            Self::Rgb4Bpp | Self::Rgba4Bpp => 4,
            Self::Rgb2Bpp | Self::Rgba2Bpp => 2,
        }
    }

    /// True for the RGBA variants.
    pub fn has_alpha(self) -> bool {
        matches!(self, Self::Rgba4Bpp | Self::Rgba2Bpp)
    }

    /// Layer alignment, `(width, height)`, for this variant.
    pub fn block_dimensions(self) -> (u32, u32) {
        if self.depth() == 2 {
            (16, 8)
        } else {
            (8, 8)
        }
    }

    fn is_two_bpp(self) -> bool {
        self.depth() == 2
    }

    fn from_wire(word: u32) -> Result<Self> {
        match word {
            0x8C00 => Ok(Self::Rgb4Bpp),
            0x8C01 => Ok(Self::Rgb2Bpp),
            0x8C02 => Ok(Self::Rgba4Bpp),
            0x8C03 => Ok(Self::Rgba2Bpp),
            other => Err(Error::Unsupported(format!(
                "unknown PowerVR internal format {other:#06x}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
struct PvrMipmapLayer {
    width: u32,
    height: u32,
    layer_width: u32,
    layer_height: u32,
    texels: SharedTexels,
}

/// The PowerVR platform texture payload.
#[derive(Debug, Clone, Default)]
pub struct NativeTexturePvr {
    internal_format: PvrInternalFormat,
    has_alpha: bool,
    unk1: u8,
    unk8: u32,
    mipmaps: Vec<PvrMipmapLayer>,
}

impl NativeTexturePvr {
    /// The PVRTC variant of the stored mipmaps.
    pub fn internal_format(&self) -> PvrInternalFormat {
        self.internal_format
    }

    /// The serialized alpha flag.
    pub fn has_alpha(&self) -> bool {
        self.has_alpha
    }

    /// Number of stored mipmap layers.
    pub fn mipmap_count(&self) -> usize {
        self.mipmaps.len()
    }
}

fn pvr_size_rules() -> TextureSizeRules {
    TextureSizeRules {
        power_of_two: true,
        squared: false,
        maximum: Some(2048),
    }
}

fn decompressed_layout(format: PvrInternalFormat) -> PixelLayout {
    if format.has_alpha() {
        PixelLayout {
            raster_format: RasterFormat::Rgba8888,
            depth: 32,
            row_alignment: 4,
            color_order: ColorOrder::Rgba,
            palette_type: PaletteType::None,
        }
    } else {
        PixelLayout {
            raster_format: RasterFormat::Rgb888,
            depth: 24,
            row_alignment: 4,
            color_order: ColorOrder::Rgba,
            palette_type: PaletteType::None,
        }
    }
}

/// Tight RGBA rows, as produced by the transcoder.
fn transcoder_layout() -> PixelLayout {
    PixelLayout {
        raster_format: RasterFormat::Rgba8888,
        depth: 32,
        row_alignment: 4,
        color_order: ColorOrder::Rgba,
        palette_type: PaletteType::None,
    }
}

fn decompress_layer(layer: &PvrMipmapLayer, format: PvrInternalFormat) -> Result<(PixelLayout, Vec<u8>)> {
    let expected = pvrtc::data_size(layer.width, layer.height, format.is_two_bpp());
    if layer.texels.len() != expected {
        return Err(Error::StreamMalformed(format!(
            "PowerVR mip data is {} bytes, expected {expected}",
            layer.texels.len()
        )));
    }

    let rgba = pvrtc::decompress(&layer.texels, layer.width, layer.height, format.is_two_bpp());

    let target = decompressed_layout(format);
    if target == transcoder_layout() && layer.width == layer.layer_width && layer.height == layer.layer_height
    {
        return Ok((target, rgba));
    }

    // Crop the block padding away and convert into the delivery layout.
    let dst_row_size = target.row_size(layer.layer_width);
    let mut out = vec![0u8; dst_row_size * layer.layer_height as usize];
    move_texels(
        &rgba,
        &mut out,
        0,
        0,
        0,
        0,
        layer.layer_width,
        layer.layer_height,
        layer.width,
        layer.layer_width,
        &transcoder_layout(),
        None,
        0,
        &target,
    );
    Ok((target, out))
}

/// Expands one source layer into block-aligned tight RGBA and
/// compresses it.
fn compress_layer(
    layout: &PixelLayout,
    palette: Option<&[u8]>,
    palette_size: u32,
    level: &MipmapLevel,
    format: PvrInternalFormat,
) -> PvrMipmapLayer {
    let (block_w, block_h) = format.block_dimensions();
    let aligned_w = pvrtc::align_dimension(level.layer_width, block_w);
    let aligned_h = pvrtc::align_dimension(level.layer_height, block_h);

    let src_row_size = layout.row_size(level.width);
    let fetch = ColorDispatcher::for_layout(layout, palette, palette_size);

    let mut rgba = vec![0u8; (aligned_w * aligned_h * 4) as usize];
    for y in 0..aligned_h {
        let src_row = if y < level.height {
            let start = y as usize * src_row_size;
            level.texels.get(start..start + src_row_size)
        } else {
            None
        };
        for x in 0..aligned_w {
            let color = src_row
                .filter(|_| x < level.width)
                .and_then(|row| fetch.get_rgba(row, x))
                .unwrap_or_default();
            let offset = ((y * aligned_w + x) * 4) as usize;
            rgba[offset] = color.r;
            rgba[offset + 1] = color.g;
            rgba[offset + 2] = color.b;
            rgba[offset + 3] = color.a;
        }
    }

    let texels = pvrtc::compress(&rgba, aligned_w, aligned_h, format.is_two_bpp());
    PvrMipmapLayer {
        width: aligned_w,
        height: aligned_h,
        layer_width: level.layer_width,
        layer_height: level.layer_height,
        texels: texels.into(),
    }
}

/// Picks the PVRTC variant for incoming pixel data.
///
/// Large bases take the 2bpp variants, everything else 4bpp; alpha
/// selects the RGBA variants.
fn choose_internal_format(base_width: u32, base_height: u32, has_alpha: bool) -> PvrInternalFormat {
    let compress_high = base_width * base_height >= 100 * 100;
    match (has_alpha, compress_high) {
        (true, true) => PvrInternalFormat::Rgba2Bpp,
        (true, false) => PvrInternalFormat::Rgba4Bpp,
        (false, true) => PvrInternalFormat::Rgb2Bpp,
        (false, false) => PvrInternalFormat::Rgb4Bpp,
    }
}

fn write_name_field(
    engine: &Engine,
    owner: &str,
    field: &str,
    value: &str,
    stream: &mut dyn Stream,
) -> Result<()> {
    let mut buf = [0u8; NAME_FIELD_LEN];
    let bytes = value.as_bytes();
    if bytes.len() >= NAME_FIELD_LEN {
        engine.push_warning(&format!(
            "{owner}: {field} truncated to fit the serialized PowerVR name field"
        ));
    }
    let len = bytes.len().min(NAME_FIELD_LEN - 1);
    buf[..len].copy_from_slice(&bytes[..len]);
    stream.write_all(&buf)?;
    Ok(())
}

fn read_name_field(stream: &mut dyn Stream, what: &str) -> Result<String> {
    let buf = read_exact_buf(stream, NAME_FIELD_LEN, what)?;
    let end = buf.iter().position(|&b| b == 0).unwrap_or(NAME_FIELD_LEN);
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

fn downcast<'a>(payload: &'a (dyn Any + Send + Sync)) -> &'a NativeTexturePvr {
    payload
        .downcast_ref::<NativeTexturePvr>()
        .expect("PowerVR provider received a foreign payload")
}

fn downcast_mut<'a>(payload: &'a mut (dyn Any + Send + Sync)) -> &'a mut NativeTexturePvr {
    payload
        .downcast_mut::<NativeTexturePvr>()
        .expect("PowerVR provider received a foreign payload")
}

struct PvrMipmapManager {
    format: PvrInternalFormat,
}

impl MipmapManager for PvrMipmapManager {
    type Layer = PvrMipmapLayer;

    fn layer_dimensions(&self, layer: &Self::Layer) -> (u32, u32) {
        (layer.layer_width, layer.layer_height)
    }

    fn size_rules(&self) -> TextureSizeRules {
        pvr_size_rules()
    }

    fn deinternalize(&self, _engine: &Engine, layer: &Self::Layer) -> Result<RawMipmapLayer> {
        let (layout, texels) = decompress_layer(layer, self.format)?;
        Ok(RawMipmapLayer {
            mipmap: MipmapLevel {
                width: layer.layer_width,
                height: layer.layer_height,
                layer_width: layer.layer_width,
                layer_height: layer.layer_height,
                texels: texels.into(),
            },
            layout,
            palette: None,
            palette_size: 0,
            compression: CompressionType::None,
            alpha: if self.format.has_alpha() {
                AlphaState::Transparent
            } else {
                AlphaState::Opaque
            },
        })
    }

    fn internalize(&self, _engine: &Engine, layer: RawMipmapLayer) -> Result<(Self::Layer, bool)> {
        if layer.compression != CompressionType::None {
            return Err(Error::Unsupported(
                "PowerVR mipmap acquisition requires raw texels".to_string(),
            ));
        }
        let internal = compress_layer(
            &layer.layout,
            layer.palette.as_deref(),
            layer.palette_size,
            &layer.mipmap,
            self.format,
        );
        Ok((internal, false))
    }
}

/// The PowerVR provider singleton registered with the engine.
pub struct PvrNativeTextureTypeProvider;

impl NativeTextureTypeProvider for PvrNativeTextureTypeProvider {
    fn native_name(&self) -> &'static str {
        "PowerVR"
    }

    fn construct_texture(&self, _engine: &Engine) -> Payload {
        Box::new(NativeTexturePvr::default())
    }

    fn clone_texture(&self, _engine: &Engine, src: &(dyn Any + Send + Sync)) -> Result<Payload> {
        Ok(Box::new(downcast(src).clone()))
    }

    fn is_compatible_texture_block(&self, stream: &mut dyn Stream) -> TexNativeCompatibility {
        probed(stream, TexNativeCompatibility::None, |stream, _| {
            let descriptor = stream.read_u32::<LittleEndian>()?;
            Ok(if descriptor == PLATFORM_PVR {
                TexNativeCompatibility::Absolute
            } else {
                TexNativeCompatibility::None
            })
        })
    }

    fn serialize_texture(
        &self,
        engine: &Engine,
        texture: &TextureBase,
        payload: &(dyn Any + Send + Sync),
        stream: &mut dyn Stream,
    ) -> Result<()> {
        let tex = downcast(payload);
        let mipmap_count = tex.mipmaps.len();
        if mipmap_count == 0 {
            return Err(Error::InvalidArgument(
                "attempt to write a PowerVR native texture without mipmap layers".to_string(),
            ));
        }

        stream.write_u32::<LittleEndian>(PLATFORM_PVR)?;
        stream.write_u32::<LittleEndian>(texture.format_info.to_wire())?;
        stream.write_all(&[0u8; 8])?;

        write_name_field(engine, &texture.name, "name", &texture.name, stream)?;
        write_name_field(engine, &texture.name, "mask name", &texture.mask_name, stream)?;

        stream.write_u8(mipmap_count as u8)?;
        stream.write_u8(tex.unk1)?;
        stream.write_u8(tex.has_alpha as u8)?;
        stream.write_u8(0)?;

        let base = &tex.mipmaps[0];
        stream.write_u16::<LittleEndian>(base.layer_width as u16)?;
        stream.write_u16::<LittleEndian>(base.layer_height as u16)?;
        stream.write_u32::<LittleEndian>(tex.internal_format as u32)?;

        let image_data_size: u32 = tex
            .mipmaps
            .iter()
            .map(|m| m.texels.len() as u32 + 4)
            .sum();
        stream.write_u32::<LittleEndian>(image_data_size)?;
        stream.write_u32::<LittleEndian>(tex.unk8)?;

        for mip in &tex.mipmaps {
            stream.write_u32::<LittleEndian>(mip.texels.len() as u32)?;
        }
        for mip in &tex.mipmaps {
            stream.write_all(&mip.texels)?;
        }
        Ok(())
    }

    fn deserialize_texture(
        &self,
        engine: &Engine,
        texture: &mut TextureBase,
        payload: &mut (dyn Any + Send + Sync),
        stream: &mut dyn Stream,
    ) -> Result<()> {
        let descriptor = stream.read_u32::<LittleEndian>()?;
        if descriptor != PLATFORM_PVR {
            return Err(Error::StreamMalformed(
                "stream does not hold a PowerVR texture block".to_string(),
            ));
        }

        texture.format_info = TexFormatInfo::from_wire(stream.read_u32::<LittleEndian>()?);
        let _pad1 = read_exact_buf(stream, 8, "PowerVR header padding")?;
        texture.name = read_name_field(stream, "PowerVR texture name")?;
        texture.mask_name = read_name_field(stream, "PowerVR mask name")?;

        let mipmap_count = stream.read_u8()?;
        if mipmap_count == 0 || mipmap_count > MAX_MIPMAPS {
            return Err(Error::StreamMalformed(format!(
                "PowerVR texture declares {mipmap_count} mipmap layers"
            )));
        }
        let unk1 = stream.read_u8()?;
        let has_alpha = stream.read_u8()? != 0;
        let _pad2 = stream.read_u8()?;

        let base_width = stream.read_u16::<LittleEndian>()? as u32;
        let base_height = stream.read_u16::<LittleEndian>()? as u32;
        let internal_format = PvrInternalFormat::from_wire(stream.read_u32::<LittleEndian>()?)?;
        let image_data_size = stream.read_u32::<LittleEndian>()?;
        let unk8 = stream.read_u32::<LittleEndian>()?;

        let mut sizes = Vec::with_capacity(mipmap_count as usize);
        for _ in 0..mipmap_count {
            let size = stream.read_u32::<LittleEndian>()?;
            if size == 0 || size > MAX_MIP_DATA_SIZE {
                return Err(Error::StreamMalformed(format!(
                    "PowerVR mip data size {size} is out of range"
                )));
            }
            sizes.push(size);
        }

        let declared: u32 = sizes.iter().map(|s| s + 4).sum();
        if declared != image_data_size {
            engine.push_warning(&format!(
                "{}: PowerVR image data section size mismatch (header {image_data_size}, actual {declared})",
                texture.name
            ));
        }

        let (block_w, block_h) = internal_format.block_dimensions();
        let mut mipmaps = Vec::with_capacity(mipmap_count as usize);
        for (level, size) in sizes.iter().enumerate() {
            let (layer_w, layer_h) = mip_level_dimensions(base_width, base_height, level as u32);
            let texels = read_exact_buf(stream, *size as usize, "PowerVR mip data")?;
            mipmaps.push(PvrMipmapLayer {
                width: pvrtc::align_dimension(layer_w, block_w),
                height: pvrtc::align_dimension(layer_h, block_h),
                layer_width: layer_w,
                layer_height: layer_h,
                texels: texels.into(),
            });
        }

        let tex = downcast_mut(payload);
        *tex = NativeTexturePvr {
            internal_format,
            has_alpha,
            unk1,
            unk8,
            mipmaps,
        };
        Ok(())
    }

    fn get_pixel_data_from_texture(
        &self,
        _engine: &Engine,
        payload: &(dyn Any + Send + Sync),
    ) -> Result<PixelDataTraversal> {
        let tex = downcast(payload);
        let format = tex.internal_format;

        let mut pixels = PixelDataTraversal::new(decompressed_layout(format));
        for layer in &tex.mipmaps {
            let (_, texels) = decompress_layer(layer, format)?;
            pixels.mipmaps.push(MipmapLevel {
                width: layer.layer_width,
                height: layer.layer_height,
                layer_width: layer.layer_width,
                layer_height: layer.layer_height,
                texels: texels.into(),
            });
        }

        pixels.compression = CompressionType::None;
        pixels.alpha = if tex.has_alpha {
            AlphaState::Transparent
        } else {
            AlphaState::Opaque
        };
        pixels.is_newly_allocated = true;
        Ok(pixels)
    }

    fn set_pixel_data_to_texture(
        &self,
        _engine: &Engine,
        payload: &mut (dyn Any + Send + Sync),
        pixels: PixelDataTraversal,
        feedback: &mut AcquireFeedback,
    ) -> Result<()> {
        if pixels.compression != CompressionType::None {
            return Err(Error::Unsupported(
                "PowerVR pixel acquisition requires raw texels".to_string(),
            ));
        }
        if pixels.mipmaps.is_empty() {
            return Err(Error::InvalidArgument(
                "pixel data holds no mipmap layers".to_string(),
            ));
        }

        let rules = pvr_size_rules();
        for level in &pixels.mipmaps {
            if !rules.is_mipmap_size_valid(level.layer_width, level.layer_height) {
                return Err(Error::SizeRuleViolation {
                    width: level.layer_width,
                    height: level.layer_height,
                });
            }
        }

        let has_alpha = pixels.alpha.has_alpha();
        let (base_w, base_h) = pixels.base_dimensions();
        let internal_format = choose_internal_format(base_w, base_h, has_alpha);

        let mut mipmaps = Vec::with_capacity(pixels.mipmaps.len());
        for level in &pixels.mipmaps {
            mipmaps.push(compress_layer(
                &pixels.layout,
                pixels.palette.as_deref(),
                pixels.palette_size,
                level,
                internal_format,
            ));
        }

        let tex = downcast_mut(payload);
        tex.internal_format = internal_format;
        tex.has_alpha = has_alpha;
        tex.mipmaps = mipmaps;

        // Compression always materialises new buffers.
        feedback.has_directly_acquired = false;
        feedback.has_directly_acquired_palette = false;
        Ok(())
    }

    fn unset_pixel_data_from_texture(
        &self,
        _engine: &Engine,
        payload: &mut (dyn Any + Send + Sync),
        _deallocate: bool,
    ) {
        downcast_mut(payload).mipmaps.clear();
    }

    fn get_mipmap_layer(
        &self,
        engine: &Engine,
        payload: &(dyn Any + Send + Sync),
        index: u32,
    ) -> Result<Option<RawMipmapLayer>> {
        let tex = downcast(payload);
        let manager = PvrMipmapManager {
            format: tex.internal_format,
        };
        fetch_mipmap_layer(engine, &manager, &tex.mipmaps, index)
    }

    fn add_mipmap_layer(
        &self,
        engine: &Engine,
        payload: &mut (dyn Any + Send + Sync),
        layer: RawMipmapLayer,
        feedback: &mut AcquireFeedback,
    ) -> Result<()> {
        let tex = downcast_mut(payload);
        let manager = PvrMipmapManager {
            format: tex.internal_format,
        };
        append_mipmap_layer(engine, &manager, &mut tex.mipmaps, layer, feedback)
    }

    fn clear_mipmaps(&self, _engine: &Engine, payload: &mut (dyn Any + Send + Sync)) {
        downcast_mut(payload).mipmaps.clear();
    }

    fn get_texture_info(&self, _engine: &Engine, payload: &(dyn Any + Send + Sync)) -> TextureInfo {
        let tex = downcast(payload);
        let (base_width, base_height) = tex
            .mipmaps
            .first()
            .map(|m| (m.layer_width, m.layer_height))
            .unwrap_or((0, 0));
        TextureInfo {
            mipmap_count: tex.mipmaps.len() as u32,
            base_width,
            base_height,
        }
    }

    fn get_texture_format_string(
        &self,
        _engine: &Engine,
        payload: &(dyn Any + Send + Sync),
    ) -> String {
        let suffix = match downcast(payload).internal_format {
            PvrInternalFormat::Rgb2Bpp => "RGB 2bit",
            PvrInternalFormat::Rgba2Bpp => "RGBA 2bit",
            PvrInternalFormat::Rgb4Bpp => "RGB 4bit",
            PvrInternalFormat::Rgba4Bpp => "RGBA 4bit",
        };
        format!("PVR {suffix}")
    }

    fn size_rules(&self, _payload: &(dyn Any + Send + Sync)) -> TextureSizeRules {
        pvr_size_rules()
    }
}

/// Registers the PowerVR provider with an engine.
pub fn register_native_texture_type(engine: &Engine) -> bool {
    engine.register_native_texture_type(Arc::new(PvrNativeTextureTypeProvider))
}
