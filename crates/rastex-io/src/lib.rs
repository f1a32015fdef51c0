//! # rastex-io
//!
//! Native image and native texture handling for the rastex
//! texture-asset engine.
//!
//! The crate is organised around an explicit [`Engine`] value owning
//! three registries:
//!
//! - the hierarchical [type registry](types::TypeRegistry), under
//!   which every codec and platform registers a named type
//! - the native-image codec registry ([`NativeImageTypeManager`]),
//!   probed in registration order for stream detection
//! - the native-texture provider registry
//!   ([`NativeTextureTypeProvider`]), dispatching platform texture
//!   blocks
//!
//! Pixel data moves between the two worlds through the codec-neutral
//! traversal types of `rastex-core`. A [`NativeImage`] either owns its
//! bytes or borrows them from a [`Raster`]; borrows are pinned with
//! const-references so no writer can mutate a raster while images
//! alias its buffers.
//!
//! # Quick Start
//!
//! ```no_run
//! use rastex_io::{Engine, MemoryStream};
//!
//! let engine = Engine::new();
//!
//! // Detect and decode an image file.
//! let mut stream = MemoryStream::from_vec(std::fs::read("texture.tif")?);
//! let type_name = engine
//!     .get_native_image_type_for_stream(&mut stream)
//!     .ok_or("unknown image format")?;
//! let image = engine.create_native_image(&type_name)?;
//! image.read_from_stream(&mut stream)?;
//!
//! // Push the pixels into a PowerVR raster (this compresses).
//! let raster = engine.create_raster("PowerVR")?;
//! image.put_to_raster(&raster)?;
//! println!("stored as {}", raster.format_string()?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Built-in formats
//!
//! | Name | Kind | Notes |
//! |------|------|-------|
//! | TIFF | native image | baseline scanline paths + generic fallback |
//! | DDS | native image | RGB masks and DXT1-5 passthrough |
//! | PowerVR | native texture | PVRTC1 2bpp/4bpp transcoding |
//!
//! Hosts register additional codecs through
//! [`Engine::register_native_image_type`] and
//! [`Engine::register_native_texture_type`].

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod d3d;
pub mod dds;
pub mod engine;
pub mod image;
pub mod pvr;
pub mod raster;
pub mod stream;
pub mod texture;
pub mod tiff;
pub mod types;

pub use engine::{Engine, EngineBuilder, WarningSink};
pub use image::{
    FilenameExtension, NativeImage, NativeImageFormatDesc, NativeImageInfo, NativeImageTypeManager,
};
pub use raster::Raster;
pub use stream::{MemoryStream, Stream, StreamExt, SubStream};
pub use texture::{
    AcquireFeedback, NativeTextureTypeProvider, TexFormatInfo, TexNativeCompatibility, TextureBase,
    TextureInfo, TextureSizeRules,
};
pub use types::{TypeId, TypedObject};

// Re-export the core value types alongside the handles.
pub use rastex_core::{
    AlphaState, ColorOrder, CompressionType, Error, MipmapLevel, PaletteType, PixelDataTraversal,
    PixelLayout, RasterFormat, RawMipmapLayer, Result,
};
