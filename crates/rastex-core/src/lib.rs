//! # rastex-core
//!
//! Core types for the rastex texture-asset engine.
//!
//! This crate provides the foundational value types shared by the
//! engine's raster, registry and codec layers:
//!
//! - [`RasterFormat`], [`ColorOrder`], [`PaletteType`], [`CompressionType`] -
//!   the pixel format model
//! - [`PixelLayout`] and the row/size math in [`layout`]
//! - [`ColorDispatcher`] - uniform per-texel color access over any layout
//! - [`PixelDataTraversal`] - the codec-neutral pixel exchange view
//! - [`Error`] / [`Result`] - the error taxonomy for all engine operations
//!
//! ## Design
//!
//! Everything here is a value type with no I/O and no locking; the
//! stateful entities (rasters, native images, registries) live in
//! `rastex-io`. Texel buffers are shared immutable slices
//! ([`traversal::SharedTexels`]) so that the transfer protocol can alias
//! pixel data instead of copying it when layouts agree.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod dispatch;
pub mod error;
pub mod format;
pub mod layout;
pub mod traversal;

pub use dispatch::{move_texels, rescale_depth, ColorDispatcher, Rgba};
pub use error::{Error, Result};
pub use format::{ColorModel, ColorOrder, CompressionType, PaletteType, RasterFormat};
pub use layout::PixelLayout;
pub use traversal::{AlphaState, MipmapLevel, PixelDataTraversal, RawMipmapLayer, SharedTexels};
