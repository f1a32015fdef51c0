//! Native-texture provider layer.
//!
//! A platform provider knows how to probe, serialize and deserialize
//! one platform's texture blocks and how to exchange pixel data with
//! the codec-neutral traversal view. Providers register under the
//! engine's native-texture base type and are looked up either by name
//! or from a raster's platform payload.

use std::any::Any;
use std::io::Seek;
use std::sync::Arc;

use rastex_core::{Error, PixelDataTraversal, RawMipmapLayer, Result};

use crate::engine::Engine;
use crate::raster::Raster;
use crate::stream::{Stream, StreamExt};
use crate::types::{Payload, TypeId, TypeInterface};

/// Result of probing a texture block against one platform provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TexNativeCompatibility {
    /// The block does not belong to this platform.
    #[default]
    None,
    /// The block could belong to this platform.
    Maybe,
    /// A unique platform descriptor was matched.
    Absolute,
}

/// How a provider or codec took ownership of transferred pixel data.
///
/// `has_directly_acquired` reports that the destination aliases the
/// source buffers (an `Arc` clone) instead of holding a converted
/// copy; the image layer turns that into a const-reference pin.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcquireFeedback {
    /// Texel buffers were aliased, not copied.
    pub has_directly_acquired: bool,
    /// The palette buffer was aliased, not copied.
    pub has_directly_acquired_palette: bool,
}

/// Mipmap count and base dimensions of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureInfo {
    /// Number of mipmap layers.
    pub mipmap_count: u32,
    /// Width of the base layer.
    pub base_width: u32,
    /// Height of the base layer.
    pub base_height: u32,
}

/// Per-platform constraints on mipmap dimensions.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextureSizeRules {
    /// Dimensions must be powers of two.
    pub power_of_two: bool,
    /// Width and height must be equal.
    pub squared: bool,
    /// Upper bound on either dimension, if any.
    pub maximum: Option<u32>,
}

impl TextureSizeRules {
    /// Checks one layer's logical dimensions.
    pub fn is_mipmap_size_valid(&self, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 {
            return false;
        }
        if self.power_of_two && (!width.is_power_of_two() || !height.is_power_of_two()) {
            return false;
        }
        if self.squared && width != height {
            return false;
        }
        if let Some(max) = self.maximum {
            if width > max || height > max {
                return false;
            }
        }
        true
    }

    /// Checks every layer of a traversal.
    pub fn verify_pixel_data(&self, pixels: &PixelDataTraversal) -> bool {
        pixels
            .mipmaps
            .iter()
            .all(|m| self.is_mipmap_size_valid(m.layer_width, m.layer_height))
    }
}

/// Texture filtering mode, stored in the serialized format word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TextureFilterMode {
    /// Nearest texel.
    #[default]
    Nearest = 0,
    /// Bilinear interpolation.
    Bilinear = 1,
    /// Trilinear interpolation across mip levels.
    Trilinear = 2,
}

/// Texture addressing mode, stored in the serialized format word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TextureAddressMode {
    /// Repeat the texture.
    #[default]
    Repeat = 0,
    /// Mirror at edges.
    Mirror = 1,
    /// Clamp to edge.
    Clamp = 2,
}

/// Filtering and addressing flags serialized with every texture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TexFormatInfo {
    /// Minification/magnification filter.
    pub filter_mode: TextureFilterMode,
    /// Horizontal addressing.
    pub u_addressing: TextureAddressMode,
    /// Vertical addressing.
    pub v_addressing: TextureAddressMode,
}

impl TexFormatInfo {
    /// Packs the flags into their 32-bit wire form.
    pub fn to_wire(self) -> u32 {
        let addressing = (self.u_addressing as u32) | ((self.v_addressing as u32) << 4);
        (self.filter_mode as u32) | (addressing << 8)
    }

    /// Unpacks the flags from their 32-bit wire form.
    ///
    /// Unknown values fall back to the defaults.
    pub fn from_wire(word: u32) -> Self {
        let filter = match word & 0xFF {
            1 => TextureFilterMode::Bilinear,
            2 => TextureFilterMode::Trilinear,
            _ => TextureFilterMode::Nearest,
        };
        let decode_addr = |v: u32| match v {
            1 => TextureAddressMode::Mirror,
            2 => TextureAddressMode::Clamp,
            _ => TextureAddressMode::Repeat,
        };
        Self {
            filter_mode: filter,
            u_addressing: decode_addr((word >> 8) & 0xF),
            v_addressing: decode_addr((word >> 12) & 0xF),
        }
    }
}

/// Platform-independent texture attributes serialized alongside the
/// platform payload.
#[derive(Debug, Clone, Default)]
pub struct TextureBase {
    /// Texture name.
    pub name: String,
    /// Alpha mask name.
    pub mask_name: String,
    /// Filtering and addressing flags.
    pub format_info: TexFormatInfo,
}

/// One platform's texture implementation.
///
/// All payload parameters are the type-erased objects constructed by
/// [`construct_texture`](Self::construct_texture); providers downcast
/// to their concrete payload type.
pub trait NativeTextureTypeProvider: Send + Sync {
    /// Registry name of the platform (e.g. `"PowerVR"`).
    fn native_name(&self) -> &'static str;

    /// Builds an empty platform texture payload.
    fn construct_texture(&self, engine: &Engine) -> Payload;

    /// Builds a payload replicating `src`.
    fn clone_texture(&self, engine: &Engine, src: &(dyn Any + Send + Sync)) -> Result<Payload>;

    /// Probes whether the stream holds this platform's texture block.
    ///
    /// Never fails on malformed input and always restores the stream
    /// position.
    fn is_compatible_texture_block(&self, stream: &mut dyn Stream) -> TexNativeCompatibility;

    /// Writes the platform texture block.
    fn serialize_texture(
        &self,
        engine: &Engine,
        texture: &TextureBase,
        payload: &(dyn Any + Send + Sync),
        stream: &mut dyn Stream,
    ) -> Result<()>;

    /// Reads the platform texture block.
    fn deserialize_texture(
        &self,
        engine: &Engine,
        texture: &mut TextureBase,
        payload: &mut (dyn Any + Send + Sync),
        stream: &mut dyn Stream,
    ) -> Result<()>;

    /// Produces the codec-neutral view of the texture's pixel data,
    /// decompressing if the platform stores compressed layers.
    fn get_pixel_data_from_texture(
        &self,
        engine: &Engine,
        payload: &(dyn Any + Send + Sync),
    ) -> Result<PixelDataTraversal>;

    /// Accepts a codec-neutral view, validating it against the
    /// platform's size rules and converting or adopting the buffers.
    fn set_pixel_data_to_texture(
        &self,
        engine: &Engine,
        payload: &mut (dyn Any + Send + Sync),
        pixels: PixelDataTraversal,
        feedback: &mut AcquireFeedback,
    ) -> Result<()>;

    /// Releases the texture's mipmaps. `deallocate` is false when the
    /// caller took ownership of the buffers.
    fn unset_pixel_data_from_texture(
        &self,
        engine: &Engine,
        payload: &mut (dyn Any + Send + Sync),
        deallocate: bool,
    );

    /// Extracts one mipmap level as a raw layer, or `None` past the end.
    fn get_mipmap_layer(
        &self,
        engine: &Engine,
        payload: &(dyn Any + Send + Sync),
        index: u32,
    ) -> Result<Option<RawMipmapLayer>>;

    /// Appends one mipmap level.
    fn add_mipmap_layer(
        &self,
        engine: &Engine,
        payload: &mut (dyn Any + Send + Sync),
        layer: RawMipmapLayer,
        feedback: &mut AcquireFeedback,
    ) -> Result<()>;

    /// Drops all mipmap levels.
    fn clear_mipmaps(&self, engine: &Engine, payload: &mut (dyn Any + Send + Sync));

    /// Mipmap count and base dimensions.
    fn get_texture_info(&self, engine: &Engine, payload: &(dyn Any + Send + Sync)) -> TextureInfo;

    /// Human-readable format description (e.g. `"PVR RGBA 4bit"`).
    fn get_texture_format_string(
        &self,
        engine: &Engine,
        payload: &(dyn Any + Send + Sync),
    ) -> String;

    /// The platform's mipmap dimension rules.
    fn size_rules(&self, payload: &(dyn Any + Send + Sync)) -> TextureSizeRules;
}

struct NativeTextureTypeInterface {
    provider: Arc<dyn NativeTextureTypeProvider>,
}

impl TypeInterface for NativeTextureTypeInterface {
    fn construct(&self, engine: &Engine) -> Result<Payload> {
        Ok(self.provider.construct_texture(engine))
    }

    fn clone_payload(&self, engine: &Engine, src: &(dyn Any + Send + Sync)) -> Result<Payload> {
        self.provider.clone_texture(engine, src)
    }
}

struct RegisteredTextureFormat {
    type_id: TypeId,
    provider: Arc<dyn NativeTextureTypeProvider>,
}

/// Registration-ordered list of native-texture providers.
#[derive(Default)]
pub(crate) struct NativeTextureRegistry {
    formats: Vec<RegisteredTextureFormat>,
}

impl Engine {
    /// Registers a native-texture provider.
    ///
    /// Returns false if the platform name is already taken.
    pub fn register_native_texture_type(
        &self,
        provider: Arc<dyn NativeTextureTypeProvider>,
    ) -> bool {
        let mut formats = self.inner.texture_formats.write().unwrap();
        let type_id = {
            let mut types = self.inner.types.write().unwrap();
            let interface = Arc::new(NativeTextureTypeInterface {
                provider: provider.clone(),
            });
            match types.register(
                provider.native_name(),
                interface,
                Some(self.native_texture_base()),
            ) {
                Ok(id) => id,
                Err(Error::TypeNameConflict(_)) => return false,
                Err(_) => return false,
            }
        };
        formats
            .formats
            .push(RegisteredTextureFormat { type_id, provider });
        true
    }

    /// Unregisters a native-texture provider by name.
    pub fn unregister_native_texture_type(&self, name: &str) -> bool {
        let mut formats = self.inner.texture_formats.write().unwrap();
        let Some(position) = formats
            .formats
            .iter()
            .position(|f| f.provider.native_name() == name)
        else {
            return false;
        };
        let type_id = formats.formats[position].type_id;
        let mut types = self.inner.types.write().unwrap();
        if !types.delete_type(type_id) {
            return false;
        }
        formats.formats.remove(position);
        true
    }

    /// Looks up a provider by platform name.
    pub fn texture_provider(&self, name: &str) -> Option<Arc<dyn NativeTextureTypeProvider>> {
        let formats = self.inner.texture_formats.read().unwrap();
        formats
            .formats
            .iter()
            .find(|f| f.provider.native_name() == name)
            .map(|f| f.provider.clone())
    }

    /// Looks up the provider owning a platform payload type.
    pub(crate) fn texture_provider_for(
        &self,
        type_id: TypeId,
    ) -> Option<Arc<dyn NativeTextureTypeProvider>> {
        let formats = self.inner.texture_formats.read().unwrap();
        formats
            .formats
            .iter()
            .find(|f| f.type_id == type_id)
            .map(|f| f.provider.clone())
    }

    /// Names of all registered native-texture platforms, in
    /// registration order.
    pub fn get_registered_native_texture_types(&self) -> Vec<String> {
        let formats = self.inner.texture_formats.read().unwrap();
        formats
            .formats
            .iter()
            .map(|f| f.provider.native_name().to_string())
            .collect()
    }

    /// Probes every provider against the stream and returns the name
    /// of the platform that owns the block, preferring an absolute
    /// descriptor match over a tentative one. The stream position is
    /// always restored.
    pub fn get_native_texture_type_for_stream(&self, stream: &mut dyn Stream) -> Option<String> {
        let providers: Vec<_> = {
            let formats = self.inner.texture_formats.read().unwrap();
            formats.formats.iter().map(|f| f.provider.clone()).collect()
        };

        let mut maybe: Option<String> = None;
        for provider in providers {
            match provider.is_compatible_texture_block(stream) {
                TexNativeCompatibility::Absolute => {
                    return Some(provider.native_name().to_string());
                }
                TexNativeCompatibility::Maybe => {
                    maybe.get_or_insert_with(|| provider.native_name().to_string());
                }
                TexNativeCompatibility::None => {}
            }
        }
        maybe
    }

    /// Creates an empty raster with the given platform payload.
    pub fn create_raster(&self, native_tex_name: &str) -> Result<Arc<Raster>> {
        let type_id = self
            .find_type(native_tex_name, Some(self.native_texture_base()))
            .ok_or_else(|| Error::UnknownFormat(native_tex_name.to_string()))?;
        let platform = self.construct_type(type_id)?;
        Ok(Raster::new(self.clone(), platform))
    }

    /// Reads a platform texture block, dispatching to the matching
    /// provider, and returns the texture attributes plus a raster
    /// holding the deserialized payload.
    pub fn read_native_texture(
        &self,
        stream: &mut dyn Stream,
    ) -> Result<(TextureBase, Arc<Raster>)> {
        let name = self
            .get_native_texture_type_for_stream(stream)
            .ok_or_else(|| Error::UnknownFormat("no provider accepts this stream".to_string()))?;
        let raster = self.create_raster(&name)?;
        let mut texture = TextureBase::default();
        raster.deserialize(&mut texture, stream)?;
        Ok((texture, raster))
    }

    /// Serializes a raster's platform texture block.
    pub fn write_native_texture(
        &self,
        texture: &TextureBase,
        raster: &Arc<Raster>,
        stream: &mut dyn Stream,
    ) -> Result<()> {
        raster.serialize(texture, stream)
    }
}

/// Per-provider hooks for the shared mipmap get/add routines.
pub trait MipmapManager {
    /// The provider's internal mipmap layer type.
    type Layer;

    /// Logical dimensions of an internal layer.
    fn layer_dimensions(&self, layer: &Self::Layer) -> (u32, u32);

    /// The platform's size rules.
    fn size_rules(&self) -> TextureSizeRules;

    /// Converts an internal layer into a raw layer, decompressing if
    /// needed.
    fn deinternalize(&self, engine: &Engine, layer: &Self::Layer) -> Result<RawMipmapLayer>;

    /// Converts a raw layer into an internal layer. The boolean
    /// reports direct acquisition of the raw buffers.
    fn internalize(&self, engine: &Engine, layer: RawMipmapLayer) -> Result<(Self::Layer, bool)>;
}

/// Dimensions of mip level `level` below a base of `base_w` x `base_h`.
///
/// Each level halves both axes, flooring and clamping at one.
pub fn mip_level_dimensions(base_w: u32, base_h: u32, level: u32) -> (u32, u32) {
    ((base_w >> level).max(1), (base_h >> level).max(1))
}

/// Shared implementation of `get_mipmap_layer`.
pub fn fetch_mipmap_layer<M: MipmapManager>(
    engine: &Engine,
    manager: &M,
    mipmaps: &[M::Layer],
    index: u32,
) -> Result<Option<RawMipmapLayer>> {
    match mipmaps.get(index as usize) {
        Some(layer) => Ok(Some(manager.deinternalize(engine, layer)?)),
        None => Ok(None),
    }
}

/// Shared implementation of `add_mipmap_layer`.
///
/// Verifies that the new layer continues the halving chain and obeys
/// the platform's size rules before internalizing it.
pub fn append_mipmap_layer<M: MipmapManager>(
    engine: &Engine,
    manager: &M,
    mipmaps: &mut Vec<M::Layer>,
    layer: RawMipmapLayer,
    feedback: &mut AcquireFeedback,
) -> Result<()> {
    let (width, height) = (layer.mipmap.layer_width, layer.mipmap.layer_height);

    let rules = manager.size_rules();
    if !rules.is_mipmap_size_valid(width, height) {
        return Err(Error::SizeRuleViolation { width, height });
    }

    if let Some(last) = mipmaps.last() {
        let (last_w, last_h) = manager.layer_dimensions(last);
        let expected = mip_level_dimensions(last_w, last_h, 1);
        if (width, height) != expected {
            return Err(Error::InvalidArgument(format!(
                "mipmap layer {width}x{height} does not continue the chain (expected {}x{})",
                expected.0, expected.1
            )));
        }
    }

    let (internal, directly_acquired) = manager.internalize(engine, layer)?;
    mipmaps.push(internal);
    feedback.has_directly_acquired = directly_acquired;
    Ok(())
}

/// Saves the stream position, runs a probe body, and restores the
/// position on every exit path.
pub(crate) fn probed<R>(
    stream: &mut dyn Stream,
    default: R,
    body: impl FnOnce(&mut dyn Stream, u64) -> Result<R>,
) -> R {
    let Ok(start) = stream.tell() else {
        return default;
    };
    let outcome = body(stream, start);
    let _ = stream.seek(std::io::SeekFrom::Start(start));
    outcome.unwrap_or(default)
}
