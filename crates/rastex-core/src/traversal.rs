//! Codec-neutral pixel data views.
//!
//! [`PixelDataTraversal`] is the exchange format between native-texture
//! providers and native-image codecs: a mipmap chain with one shared
//! layout descriptor. Texel and palette buffers are shared byte slices
//! (`Arc<[u8]>`); a *direct acquire* clones the `Arc` instead of the
//! bytes, which is what the reference-pinning protocol in the image
//! layer accounts for.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::format::{CompressionType, PaletteType};
use crate::layout::PixelLayout;

/// Shared immutable texel storage.
pub type SharedTexels = Arc<[u8]>;

/// Whether pixel data is known to contain meaningful alpha.
///
/// `Unknown` is reported by codecs that did not inspect alpha during
/// decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlphaState {
    /// All texels are fully opaque.
    #[default]
    Opaque,
    /// At least one texel carries non-opaque alpha.
    Transparent,
    /// The codec did not decide.
    Unknown,
}

impl AlphaState {
    /// True iff the data is known or assumed to carry alpha.
    pub fn has_alpha(self) -> bool {
        matches!(self, Self::Transparent)
    }
}

/// One mipmap level of a traversal.
///
/// `width`/`height` are the raw buffer dimensions (block-aligned for
/// compressed data); `layer_width`/`layer_height` are the logical pixel
/// rectangle.
#[derive(Debug, Clone)]
pub struct MipmapLevel {
    /// Raw buffer width.
    pub width: u32,
    /// Raw buffer height.
    pub height: u32,
    /// Logical layer width.
    pub layer_width: u32,
    /// Logical layer height.
    pub layer_height: u32,
    /// Texel bytes.
    pub texels: SharedTexels,
}

impl MipmapLevel {
    /// Creates a level whose raw dimensions equal its layer dimensions.
    pub fn unpadded(width: u32, height: u32, texels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            layer_width: width,
            layer_height: height,
            texels: texels.into(),
        }
    }

    /// Byte size of this level's texel buffer.
    pub fn data_size(&self) -> usize {
        self.texels.len()
    }
}

/// A codec-neutral view of a texture's complete pixel data.
#[derive(Debug, Clone)]
pub struct PixelDataTraversal {
    /// Mipmap chain, base level first.
    pub mipmaps: SmallVec<[MipmapLevel; 8]>,
    /// Shared byte layout of all levels.
    pub layout: PixelLayout,
    /// Palette colors in `layout.raster_format`, if palettised.
    pub palette: Option<SharedTexels>,
    /// Number of palette entries.
    pub palette_size: u32,
    /// Block compression applied to the texel buffers.
    pub compression: CompressionType,
    /// Alpha knowledge for the whole chain.
    pub alpha: AlphaState,
    /// True if the buffers were freshly materialised by the producer
    /// (e.g. a decompression pass) rather than aliasing its internal
    /// storage.
    pub is_newly_allocated: bool,
}

impl PixelDataTraversal {
    /// Creates an empty traversal with the given layout.
    pub fn new(layout: PixelLayout) -> Self {
        Self {
            mipmaps: SmallVec::new(),
            layout,
            palette: None,
            palette_size: 0,
            compression: CompressionType::None,
            alpha: AlphaState::Unknown,
            is_newly_allocated: false,
        }
    }

    /// Base-level logical dimensions, or `(0, 0)` when empty.
    pub fn base_dimensions(&self) -> (u32, u32) {
        self.mipmaps
            .first()
            .map(|m| (m.layer_width, m.layer_height))
            .unwrap_or((0, 0))
    }

    /// True when the traversal holds palettised texels.
    pub fn is_palettised(&self) -> bool {
        self.layout.palette_type != PaletteType::None
    }
}

/// A single mipmap level bundled with its own layout, as exchanged by
/// the per-level `get_mipmap_layer`/`add_mipmap_layer` operations.
#[derive(Debug, Clone)]
pub struct RawMipmapLayer {
    /// The level's dimensions and texels.
    pub mipmap: MipmapLevel,
    /// Byte layout of the level.
    pub layout: PixelLayout,
    /// Palette colors, if palettised.
    pub palette: Option<SharedTexels>,
    /// Number of palette entries.
    pub palette_size: u32,
    /// Block compression of the texels.
    pub compression: CompressionType,
    /// Alpha knowledge for the level.
    pub alpha: AlphaState,
}
