//! Raster format enumerations and classification helpers.
//!
//! A raster's byte layout is described by a [`RasterFormat`] plus a bit
//! depth, a row alignment, a [`ColorOrder`] and a [`PaletteType`]. The
//! format names the channel set and per-channel width; the palette type
//! turns the texel buffer into indices into a separately stored palette
//! whose colors are themselves in the raster format.

/// Per-texel channel layout of uncompressed pixel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RasterFormat {
    /// Layout not yet decided; placeholder before format negotiation.
    #[default]
    Default,
    /// 5-5-5 RGB with a 1-bit alpha, packed into 16 bits.
    Rgba1555,
    /// 5-6-5 RGB, packed into 16 bits.
    Rgb565,
    /// 4-4-4-4 RGBA, packed into 16 bits.
    Rgba4444,
    /// 8-bit luminance.
    Lum8,
    /// 8-bit luminance with an 8-bit alpha channel.
    LumAlpha,
    /// 8-8-8-8 RGBA.
    Rgba8888,
    /// 8-8-8 RGB, no alpha.
    Rgb888,
    /// 16-bit depth buffer values.
    Depth16,
    /// 24-bit depth buffer values.
    Depth24,
    /// 32-bit depth buffer values.
    Depth32,
}

/// The color model a raster format stores samples in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorModel {
    /// Red/green/blue with optional alpha.
    Rgba,
    /// Grayscale with optional alpha.
    Luminance,
    /// Depth buffer values.
    Depth,
    /// Not classifiable (e.g. [`RasterFormat::Default`]).
    Unknown,
}

/// Byte order of channels inside a texel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorOrder {
    /// Red first.
    #[default]
    Rgba,
    /// Blue first, alpha last.
    Bgra,
    /// Alpha first, red last.
    Abgr,
}

/// Palette indexing mode of a texel buffer.
///
/// 4-bit indices are packed two per byte, high nibble first (the even
/// index occupies the high nibble), matching TIFF bit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PaletteType {
    /// No palette; texels are colors.
    #[default]
    None,
    /// 4-bit indices, 16 palette entries.
    Pal4,
    /// 8-bit indices, 256 palette entries.
    Pal8,
}

/// Block compression scheme applied to the texel buffer.
///
/// PVRTC compression never appears here; the PowerVR provider keeps its
/// compressed layers internal and always exchanges raw texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionType {
    /// Uncompressed texels.
    #[default]
    None,
    /// DXT1 (BC1), 8 bytes per 4x4 block.
    Dxt1,
    /// DXT2, premultiplied explicit alpha.
    Dxt2,
    /// DXT3 (BC2), explicit alpha.
    Dxt3,
    /// DXT4, premultiplied interpolated alpha.
    Dxt4,
    /// DXT5 (BC3), interpolated alpha.
    Dxt5,
}

impl RasterFormat {
    /// Returns the color model this format stores samples in.
    pub fn color_model(self) -> ColorModel {
        match self {
            Self::Rgba1555 | Self::Rgb565 | Self::Rgba4444 | Self::Rgba8888 | Self::Rgb888 => {
                ColorModel::Rgba
            }
            Self::Lum8 | Self::LumAlpha => ColorModel::Luminance,
            Self::Depth16 | Self::Depth24 | Self::Depth32 => ColorModel::Depth,
            Self::Default => ColorModel::Unknown,
        }
    }

    /// Returns true iff the format carries an alpha channel.
    pub fn can_have_alpha(self) -> bool {
        matches!(
            self,
            Self::Rgba1555 | Self::Rgba4444 | Self::Rgba8888 | Self::LumAlpha
        )
    }

    /// Bit depth of one color sample in this format.
    ///
    /// For palettised rasters this is the depth of a palette entry, not
    /// of an index.
    pub fn depth(self) -> u32 {
        match self {
            Self::Rgba1555 | Self::Rgb565 | Self::Rgba4444 | Self::Depth16 | Self::LumAlpha => 16,
            Self::Lum8 => 8,
            Self::Rgba8888 | Self::Depth32 => 32,
            Self::Rgb888 | Self::Depth24 => 24,
            Self::Default => 0,
        }
    }
}

impl PaletteType {
    /// Number of palette entries addressed by this palette type.
    pub fn item_count(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Pal4 => 16,
            Self::Pal8 => 256,
        }
    }

    /// Bit width of one palette index.
    pub fn index_depth(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Pal4 => 4,
            Self::Pal8 => 8,
        }
    }
}

impl CompressionType {
    /// Bytes occupied by one 4x4 block, or `None` for raw texels.
    pub fn block_size(self) -> Option<u32> {
        match self {
            Self::None => None,
            Self::Dxt1 => Some(8),
            Self::Dxt2 | Self::Dxt3 | Self::Dxt4 | Self::Dxt5 => Some(16),
        }
    }
}
