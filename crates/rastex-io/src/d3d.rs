//! Direct3D native-texture provider.
//!
//! The Direct3D platform stores mipmaps in the raster formats as-is,
//! so pixel exchange is the adopt/alias path: acquisition takes the
//! traversal's buffers without copying and reports direct acquisition,
//! and delivery hands out views of the stored buffers. This is the
//! counterpart to the PowerVR provider, which always transcodes.
//!
//! The serialized block is little-endian: the platform descriptor,
//! format flags, name fields, the layout descriptor, an optional
//! palette, then per-mipmap dimensions and sizes followed by the texel
//! bytes.

use std::any::Any;
use std::io::Write;
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use rastex_core::{
    AlphaState, ColorOrder, CompressionType, Error, MipmapLevel, PaletteType, PixelDataTraversal,
    PixelLayout, RasterFormat, RawMipmapLayer, Result, SharedTexels,
};

use crate::engine::Engine;
use crate::pvr::PLATFORM_PVR;
use crate::stream::{read_exact_buf, Stream};
use crate::texture::{
    append_mipmap_layer, fetch_mipmap_layer, probed, AcquireFeedback, MipmapManager,
    NativeTextureTypeProvider, TexFormatInfo, TexNativeCompatibility, TextureBase, TextureInfo,
    TextureSizeRules,
};
use crate::types::Payload;

/// Platform descriptor word identifying Direct3D texture blocks.
pub const PLATFORM_D3D: u32 = 8;

const NAME_FIELD_LEN: usize = 32;
const MAX_MIPMAPS: u8 = 32;
const MAX_MIP_DATA_SIZE: u32 = 256 << 20;

// Sanity: the two platform descriptors must stay distinct for probing.
const _: () = assert!(PLATFORM_D3D != PLATFORM_PVR);

/// The Direct3D platform texture payload.
#[derive(Debug, Clone, Default)]
pub struct NativeTextureD3d {
    layout: PixelLayout,
    compression: CompressionType,
    alpha: AlphaState,
    palette: Option<SharedTexels>,
    palette_size: u32,
    mipmaps: Vec<MipmapLevel>,
}

impl NativeTextureD3d {
    /// Byte layout of the stored mipmaps.
    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    /// Number of stored mipmap layers.
    pub fn mipmap_count(&self) -> usize {
        self.mipmaps.len()
    }
}

fn d3d_size_rules() -> TextureSizeRules {
    TextureSizeRules {
        power_of_two: false,
        squared: false,
        maximum: Some(4096),
    }
}

fn raster_format_to_wire(format: RasterFormat) -> u32 {
    match format {
        RasterFormat::Default => 0,
        RasterFormat::Rgba1555 => 1,
        RasterFormat::Rgb565 => 2,
        RasterFormat::Rgba4444 => 3,
        RasterFormat::Lum8 => 4,
        RasterFormat::LumAlpha => 5,
        RasterFormat::Rgba8888 => 6,
        RasterFormat::Rgb888 => 7,
        RasterFormat::Depth16 => 8,
        RasterFormat::Depth24 => 9,
        RasterFormat::Depth32 => 10,
    }
}

fn raster_format_from_wire(word: u32) -> Result<RasterFormat> {
    Ok(match word {
        0 => RasterFormat::Default,
        1 => RasterFormat::Rgba1555,
        2 => RasterFormat::Rgb565,
        3 => RasterFormat::Rgba4444,
        4 => RasterFormat::Lum8,
        5 => RasterFormat::LumAlpha,
        6 => RasterFormat::Rgba8888,
        7 => RasterFormat::Rgb888,
        8 => RasterFormat::Depth16,
        9 => RasterFormat::Depth24,
        10 => RasterFormat::Depth32,
        other => {
            return Err(Error::StreamMalformed(format!(
                "unknown Direct3D raster format code {other}"
            )))
        }
    })
}

fn color_order_to_wire(order: ColorOrder) -> u32 {
    match order {
        ColorOrder::Rgba => 0,
        ColorOrder::Bgra => 1,
        ColorOrder::Abgr => 2,
    }
}

fn color_order_from_wire(word: u32) -> Result<ColorOrder> {
    Ok(match word {
        0 => ColorOrder::Rgba,
        1 => ColorOrder::Bgra,
        2 => ColorOrder::Abgr,
        other => {
            return Err(Error::StreamMalformed(format!(
                "unknown Direct3D color order code {other}"
            )))
        }
    })
}

fn palette_type_to_wire(palette: PaletteType) -> u32 {
    match palette {
        PaletteType::None => 0,
        PaletteType::Pal4 => 4,
        PaletteType::Pal8 => 8,
    }
}

fn palette_type_from_wire(word: u32) -> Result<PaletteType> {
    Ok(match word {
        0 => PaletteType::None,
        4 => PaletteType::Pal4,
        8 => PaletteType::Pal8,
        other => {
            return Err(Error::StreamMalformed(format!(
                "unknown Direct3D palette type code {other}"
            )))
        }
    })
}

fn compression_to_wire(compression: CompressionType) -> u32 {
    match compression {
        CompressionType::None => 0,
        CompressionType::Dxt1 => 1,
        CompressionType::Dxt2 => 2,
        CompressionType::Dxt3 => 3,
        CompressionType::Dxt4 => 4,
        CompressionType::Dxt5 => 5,
    }
}

fn compression_from_wire(word: u32) -> Result<CompressionType> {
    Ok(match word {
        0 => CompressionType::None,
        1 => CompressionType::Dxt1,
        2 => CompressionType::Dxt2,
        3 => CompressionType::Dxt3,
        4 => CompressionType::Dxt4,
        5 => CompressionType::Dxt5,
        other => {
            return Err(Error::StreamMalformed(format!(
                "unknown Direct3D compression code {other}"
            )))
        }
    })
}

fn alpha_to_wire(alpha: AlphaState) -> u8 {
    match alpha {
        AlphaState::Opaque => 0,
        AlphaState::Transparent => 1,
        AlphaState::Unknown => 2,
    }
}

fn alpha_from_wire(byte: u8) -> AlphaState {
    match byte {
        0 => AlphaState::Opaque,
        1 => AlphaState::Transparent,
        _ => AlphaState::Unknown,
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
            "{owner}: {field} truncated to fit the serialized Direct3D name field"
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

fn downcast<'a>(payload: &'a (dyn Any + Send + Sync)) -> &'a NativeTextureD3d {
    payload
        .downcast_ref::<NativeTextureD3d>()
        .expect("Direct3D provider received a foreign payload")
}

fn downcast_mut<'a>(payload: &'a mut (dyn Any + Send + Sync)) -> &'a mut NativeTextureD3d {
    payload
        .downcast_mut::<NativeTextureD3d>()
        .expect("Direct3D provider received a foreign payload")
}

struct D3dMipmapManager {
    layout: PixelLayout,
    compression: CompressionType,
    alpha: AlphaState,
    palette: Option<SharedTexels>,
    palette_size: u32,
}

impl MipmapManager for D3dMipmapManager {
    type Layer = MipmapLevel;

    fn layer_dimensions(&self, layer: &Self::Layer) -> (u32, u32) {
        (layer.layer_width, layer.layer_height)
    }

    fn size_rules(&self) -> TextureSizeRules {
        d3d_size_rules()
    }

    fn deinternalize(&self, _engine: &Engine, layer: &Self::Layer) -> Result<RawMipmapLayer> {
        Ok(RawMipmapLayer {
            mipmap: layer.clone(),
            layout: self.layout,
            palette: self.palette.clone(),
            palette_size: self.palette_size,
            compression: self.compression,
            alpha: self.alpha,
        })
    }

    fn internalize(&self, _engine: &Engine, layer: RawMipmapLayer) -> Result<(Self::Layer, bool)> {
        if layer.layout != self.layout || layer.compression != self.compression {
            return Err(Error::Unsupported(
                "mipmap layer layout differs from the texture's layout".to_string(),
            ));
        }
        Ok((layer.mipmap, true))
    }
}

/// The Direct3D provider singleton registered with the engine.
pub struct D3dNativeTextureTypeProvider;

impl NativeTextureTypeProvider for D3dNativeTextureTypeProvider {
    fn native_name(&self) -> &'static str {
        "Direct3D"
    }

    fn construct_texture(&self, _engine: &Engine) -> Payload {
        Box::new(NativeTextureD3d::default())
    }

    fn clone_texture(&self, _engine: &Engine, src: &(dyn Any + Send + Sync)) -> Result<Payload> {
        Ok(Box::new(downcast(src).clone()))
    }

    fn is_compatible_texture_block(&self, stream: &mut dyn Stream) -> TexNativeCompatibility {
        probed(stream, TexNativeCompatibility::None, |stream, _| {
            let descriptor = stream.read_u32::<LittleEndian>()?;
            Ok(if descriptor == PLATFORM_D3D {
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
        if tex.mipmaps.is_empty() {
            return Err(Error::InvalidArgument(
                "attempt to write a Direct3D native texture without mipmap layers".to_string(),
            ));
        }

        stream.write_u32::<LittleEndian>(PLATFORM_D3D)?;
        stream.write_u32::<LittleEndian>(texture.format_info.to_wire())?;
        write_name_field(engine, &texture.name, "name", &texture.name, stream)?;
        write_name_field(engine, &texture.name, "mask name", &texture.mask_name, stream)?;

        stream.write_u32::<LittleEndian>(raster_format_to_wire(tex.layout.raster_format))?;
        stream.write_u32::<LittleEndian>(tex.layout.depth)?;
        stream.write_u32::<LittleEndian>(tex.layout.row_alignment)?;
        stream.write_u32::<LittleEndian>(color_order_to_wire(tex.layout.color_order))?;
        stream.write_u32::<LittleEndian>(palette_type_to_wire(tex.layout.palette_type))?;
        stream.write_u32::<LittleEndian>(compression_to_wire(tex.compression))?;

        stream.write_u8(tex.mipmaps.len() as u8)?;
        stream.write_u8(alpha_to_wire(tex.alpha))?;
        stream.write_u16::<LittleEndian>(0)?;

        stream.write_u32::<LittleEndian>(tex.palette_size)?;
        let palette_bytes = tex.palette.as_deref().unwrap_or(&[]);
        stream.write_u32::<LittleEndian>(palette_bytes.len() as u32)?;
        stream.write_all(palette_bytes)?;

        for mip in &tex.mipmaps {
            stream.write_u32::<LittleEndian>(mip.width)?;
            stream.write_u32::<LittleEndian>(mip.height)?;
            stream.write_u32::<LittleEndian>(mip.layer_width)?;
            stream.write_u32::<LittleEndian>(mip.layer_height)?;
            stream.write_u32::<LittleEndian>(mip.texels.len() as u32)?;
            stream.write_all(&mip.texels)?;
        }
        Ok(())
    }

    fn deserialize_texture(
        &self,
        _engine: &Engine,
        texture: &mut TextureBase,
        payload: &mut (dyn Any + Send + Sync),
        stream: &mut dyn Stream,
    ) -> Result<()> {
        let descriptor = stream.read_u32::<LittleEndian>()?;
        if descriptor != PLATFORM_D3D {
            return Err(Error::StreamMalformed(
                "stream does not hold a Direct3D texture block".to_string(),
            ));
        }

        texture.format_info = TexFormatInfo::from_wire(stream.read_u32::<LittleEndian>()?);
        texture.name = read_name_field(stream, "Direct3D texture name")?;
        texture.mask_name = read_name_field(stream, "Direct3D mask name")?;

        let layout = PixelLayout {
            raster_format: raster_format_from_wire(stream.read_u32::<LittleEndian>()?)?,
            depth: stream.read_u32::<LittleEndian>()?,
            row_alignment: stream.read_u32::<LittleEndian>()?,
            color_order: color_order_from_wire(stream.read_u32::<LittleEndian>()?)?,
            palette_type: palette_type_from_wire(stream.read_u32::<LittleEndian>()?)?,
        };
        let compression = compression_from_wire(stream.read_u32::<LittleEndian>()?)?;

        let mipmap_count = stream.read_u8()?;
        if mipmap_count == 0 || mipmap_count > MAX_MIPMAPS {
            return Err(Error::StreamMalformed(format!(
                "Direct3D texture declares {mipmap_count} mipmap layers"
            )));
        }
        let alpha = alpha_from_wire(stream.read_u8()?);
        let _pad = stream.read_u16::<LittleEndian>()?;

        let palette_size = stream.read_u32::<LittleEndian>()?;
        let palette_len = stream.read_u32::<LittleEndian>()?;
        if palette_len > MAX_MIP_DATA_SIZE {
            return Err(Error::StreamMalformed(
                "Direct3D palette is out of range".to_string(),
            ));
        }
        let palette = if palette_len > 0 {
            Some(SharedTexels::from(read_exact_buf(
                stream,
                palette_len as usize,
                "Direct3D palette data",
            )?))
        } else {
            None
        };

        let mut mipmaps = Vec::with_capacity(mipmap_count as usize);
        for _ in 0..mipmap_count {
            let width = stream.read_u32::<LittleEndian>()?;
            let height = stream.read_u32::<LittleEndian>()?;
            let layer_width = stream.read_u32::<LittleEndian>()?;
            let layer_height = stream.read_u32::<LittleEndian>()?;
            let size = stream.read_u32::<LittleEndian>()?;
            if size == 0 || size > MAX_MIP_DATA_SIZE {
                return Err(Error::StreamMalformed(format!(
                    "Direct3D mip data size {size} is out of range"
                )));
            }
            let texels = read_exact_buf(stream, size as usize, "Direct3D mip data")?;
            mipmaps.push(MipmapLevel {
                width,
                height,
                layer_width,
                layer_height,
                texels: texels.into(),
            });
        }

        *downcast_mut(payload) = NativeTextureD3d {
            layout,
            compression,
            alpha,
            palette,
            palette_size,
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
        let mut pixels = PixelDataTraversal::new(tex.layout);
        pixels.mipmaps.extend(tex.mipmaps.iter().cloned());
        pixels.palette = tex.palette.clone();
        pixels.palette_size = tex.palette_size;
        pixels.compression = tex.compression;
        pixels.alpha = tex.alpha;
        // The views alias the texture's storage.
        pixels.is_newly_allocated = false;
        Ok(pixels)
    }

    fn set_pixel_data_to_texture(
        &self,
        _engine: &Engine,
        payload: &mut (dyn Any + Send + Sync),
        pixels: PixelDataTraversal,
        feedback: &mut AcquireFeedback,
    ) -> Result<()> {
        if pixels.mipmaps.is_empty() {
            return Err(Error::InvalidArgument(
                "pixel data holds no mipmap layers".to_string(),
            ));
        }
        let rules = d3d_size_rules();
        for level in &pixels.mipmaps {
            if !rules.is_mipmap_size_valid(level.layer_width, level.layer_height) {
                return Err(Error::SizeRuleViolation {
                    width: level.layer_width,
                    height: level.layer_height,
                });
            }
        }

        let had_palette = pixels.palette.is_some();
        let tex = downcast_mut(payload);
        *tex = NativeTextureD3d {
            layout: pixels.layout,
            compression: pixels.compression,
            alpha: pixels.alpha,
            palette: pixels.palette,
            palette_size: pixels.palette_size,
            mipmaps: pixels.mipmaps.into_vec(),
        };

        // The buffers are adopted as-is.
        feedback.has_directly_acquired = true;
        feedback.has_directly_acquired_palette = had_palette;
        Ok(())
    }

    fn unset_pixel_data_from_texture(
        &self,
        _engine: &Engine,
        payload: &mut (dyn Any + Send + Sync),
        _deallocate: bool,
    ) {
        let tex = downcast_mut(payload);
        tex.mipmaps.clear();
        tex.palette = None;
        tex.palette_size = 0;
    }

    fn get_mipmap_layer(
        &self,
        engine: &Engine,
        payload: &(dyn Any + Send + Sync),
        index: u32,
    ) -> Result<Option<RawMipmapLayer>> {
        let tex = downcast(payload);
        let manager = D3dMipmapManager {
            layout: tex.layout,
            compression: tex.compression,
            alpha: tex.alpha,
            palette: tex.palette.clone(),
            palette_size: tex.palette_size,
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
        if tex.mipmaps.is_empty() {
            tex.layout = layer.layout;
            tex.compression = layer.compression;
            tex.alpha = layer.alpha;
            tex.palette = layer.palette.clone();
            tex.palette_size = layer.palette_size;
        }
        let manager = D3dMipmapManager {
            layout: tex.layout,
            compression: tex.compression,
            alpha: tex.alpha,
            palette: tex.palette.clone(),
            palette_size: tex.palette_size,
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
        let tex = downcast(payload);
        let body = match tex.compression {
            CompressionType::None => match tex.layout.raster_format {
                RasterFormat::Rgba8888 => "8888",
                RasterFormat::Rgb888 => "888",
                RasterFormat::Rgb565 => "565",
                RasterFormat::Rgba1555 => "1555",
                RasterFormat::Rgba4444 => "4444",
                RasterFormat::Lum8 => "LUM8",
                RasterFormat::LumAlpha => "LUM_ALPHA",
                _ => "unknown",
            },
            CompressionType::Dxt1 => "DXT1",
            CompressionType::Dxt2 => "DXT2",
            CompressionType::Dxt3 => "DXT3",
            CompressionType::Dxt4 => "DXT4",
            CompressionType::Dxt5 => "DXT5",
        };
        format!("Direct3D {body}")
    }

    fn size_rules(&self, _payload: &(dyn Any + Send + Sync)) -> TextureSizeRules {
        d3d_size_rules()
    }
}

/// Registers the Direct3D provider with an engine.
pub fn register_native_texture_type(engine: &Engine) -> bool {
    engine.register_native_texture_type(Arc::new(D3dNativeTextureTypeProvider))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemoryStream;

    fn sample_payload() -> NativeTextureD3d {
        NativeTextureD3d {
            layout: PixelLayout {
                raster_format: RasterFormat::Rgba8888,
                depth: 32,
                row_alignment: 4,
                color_order: ColorOrder::Bgra,
                palette_type: PaletteType::None,
            },
            compression: CompressionType::None,
            alpha: AlphaState::Transparent,
            palette: None,
            palette_size: 0,
            mipmaps: vec![
                MipmapLevel::unpadded(4, 4, (0..64).collect()),
                MipmapLevel::unpadded(2, 2, (0..16).collect()),
            ],
        }
    }

    #[test]
    fn serialize_round_trip_is_byte_identical() {
        let engine = Engine::builder().builtin_formats(false).build();
        let provider = D3dNativeTextureTypeProvider;
        let texture = TextureBase {
            name: "bricks".to_string(),
            mask_name: String::new(),
            format_info: TexFormatInfo::default(),
        };

        let payload = sample_payload();
        let mut first = MemoryStream::new();
        provider
            .serialize_texture(&engine, &texture, &payload, &mut first)
            .unwrap();

        let mut fresh = NativeTextureD3d::default();
        let mut read_back = TextureBase::default();
        let mut input = MemoryStream::from_vec(first.as_slice().to_vec());
        provider
            .deserialize_texture(&engine, &mut read_back, &mut fresh, &mut input)
            .unwrap();
        assert_eq!(read_back.name, "bricks");

        let mut second = MemoryStream::new();
        provider
            .serialize_texture(&engine, &read_back, &fresh, &mut second)
            .unwrap();
        assert_eq!(first.as_slice(), second.as_slice());
    }

    #[test]
    fn pixel_exchange_aliases_buffers() {
        let engine = Engine::builder().builtin_formats(false).build();
        let provider = D3dNativeTextureTypeProvider;
        let mut payload = sample_payload();

        let pixels = provider
            .get_pixel_data_from_texture(&engine, &payload)
            .unwrap();
        assert!(!pixels.is_newly_allocated);
        assert!(std::sync::Arc::ptr_eq(
            &pixels.mipmaps[0].texels,
            &payload.mipmaps[0].texels
        ));

        let mut feedback = AcquireFeedback::default();
        provider
            .set_pixel_data_to_texture(&engine, &mut payload, pixels, &mut feedback)
            .unwrap();
        assert!(feedback.has_directly_acquired);
    }

    #[test]
    fn size_rules_reject_oversize_layers() {
        let engine = Engine::builder().builtin_formats(false).build();
        let provider = D3dNativeTextureTypeProvider;
        let mut payload = NativeTextureD3d::default();

        let mut pixels = PixelDataTraversal::new(sample_payload().layout);
        pixels
            .mipmaps
            .push(MipmapLevel::unpadded(8192, 8, vec![0; 8192 * 8 * 4]));

        let mut feedback = AcquireFeedback::default();
        let err = provider
            .set_pixel_data_to_texture(&engine, &mut payload, pixels, &mut feedback)
            .unwrap_err();
        assert!(matches!(err, Error::SizeRuleViolation { .. }));
    }
}
