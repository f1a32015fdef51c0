//! Rasters: owners of platform-native pixel data.
//!
//! A [`Raster`] wraps one native-texture payload behind a read/write
//! lock and carries a *const-reference count*. While that count is
//! positive the raster is pinned: operations that would change its
//! pixel or palette bytes are refused, so that native images borrowing
//! the bytes stay valid. Ownership itself is expressed with
//! [`Arc<Raster>`]; a pinned raster stays alive because every const-ref
//! holder also holds an `Arc`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use rastex_core::{Error, PixelDataTraversal, Result};

use crate::engine::Engine;
use crate::stream::Stream;
use crate::texture::{AcquireFeedback, TextureBase, TextureInfo};
use crate::types::TypedObject;

/// Owner of mipmap pixel data in a platform-native format.
pub struct Raster {
    engine: Engine,
    platform: RwLock<TypedObject>,
    const_refs: AtomicU32,
}

impl Raster {
    pub(crate) fn new(engine: Engine, platform: TypedObject) -> Arc<Self> {
        Arc::new(Self {
            engine,
            platform: RwLock::new(platform),
            const_refs: AtomicU32::new(0),
        })
    }

    /// The engine this raster belongs to.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Clones the owning handle.
    pub fn acquire(this: &Arc<Self>) -> Arc<Self> {
        Arc::clone(this)
    }

    /// Takes a const-reference, pinning the raster's bytes.
    pub fn add_const_ref(&self) {
        self.const_refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Releases a const-reference.
    ///
    /// Releasing more references than were taken is a caller bug.
    pub fn rem_const_ref(&self) {
        let prev = self.const_refs.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "const-reference count underflow");
    }

    /// Current const-reference count.
    pub fn const_ref_count(&self) -> u32 {
        self.const_refs.load(Ordering::Acquire)
    }

    /// The lock guarding the platform payload.
    ///
    /// Callers of the `*_no_lock` image operations acquire this
    /// themselves; everything else should prefer the high-level
    /// methods.
    pub fn platform(&self) -> &RwLock<TypedObject> {
        &self.platform
    }

    /// Type name of the platform payload (e.g. `"PowerVR"`).
    pub fn native_type_name(&self) -> Result<String> {
        let platform = self.platform.read().unwrap();
        self.engine
            .type_name(platform.type_id())
            .ok_or_else(|| Error::UnknownFormat("raster platform type not registered".to_string()))
    }

    /// Produces the codec-neutral view of this raster's pixel data.
    pub fn get_pixel_data(&self) -> Result<PixelDataTraversal> {
        let platform = self.platform.read().unwrap();
        let provider = self
            .engine
            .texture_provider_for(platform.type_id())
            .ok_or_else(|| Error::UnknownFormat("no provider for raster platform".to_string()))?;
        provider.get_pixel_data_from_texture(&self.engine, platform.payload())
    }

    /// Replaces this raster's pixel data from a codec-neutral view.
    ///
    /// Refused while const-references pin the raster.
    pub fn set_pixel_data(&self, pixels: PixelDataTraversal) -> Result<AcquireFeedback> {
        if self.const_ref_count() > 0 {
            return Err(Error::InvalidArgument(
                "raster is pinned by const references".to_string(),
            ));
        }
        let mut platform = self.platform.write().unwrap();
        let provider = self
            .engine
            .texture_provider_for(platform.type_id())
            .ok_or_else(|| Error::UnknownFormat("no provider for raster platform".to_string()))?;
        provider.unset_pixel_data_from_texture(&self.engine, platform.payload_mut(), true);
        let mut feedback = AcquireFeedback::default();
        provider.set_pixel_data_to_texture(&self.engine, platform.payload_mut(), pixels, &mut feedback)?;
        Ok(feedback)
    }

    /// Mipmap count and base dimensions of the platform texture.
    pub fn texture_info(&self) -> Result<TextureInfo> {
        let platform = self.platform.read().unwrap();
        let provider = self
            .engine
            .texture_provider_for(platform.type_id())
            .ok_or_else(|| Error::UnknownFormat("no provider for raster platform".to_string()))?;
        Ok(provider.get_texture_info(&self.engine, platform.payload()))
    }

    /// Human-readable platform format description.
    pub fn format_string(&self) -> Result<String> {
        let platform = self.platform.read().unwrap();
        let provider = self
            .engine
            .texture_provider_for(platform.type_id())
            .ok_or_else(|| Error::UnknownFormat("no provider for raster platform".to_string()))?;
        Ok(provider.get_texture_format_string(&self.engine, platform.payload()))
    }

    /// Deserializes a platform texture block into this raster.
    ///
    /// Refused while const-references pin the raster.
    pub fn deserialize(&self, texture: &mut TextureBase, stream: &mut dyn Stream) -> Result<()> {
        if self.const_ref_count() > 0 {
            return Err(Error::InvalidArgument(
                "raster is pinned by const references".to_string(),
            ));
        }
        let mut platform = self.platform.write().unwrap();
        let provider = self
            .engine
            .texture_provider_for(platform.type_id())
            .ok_or_else(|| Error::UnknownFormat("no provider for raster platform".to_string()))?;
        provider.deserialize_texture(&self.engine, texture, platform.payload_mut(), stream)
    }

    /// Serializes this raster's platform texture block.
    pub fn serialize(&self, texture: &TextureBase, stream: &mut dyn Stream) -> Result<()> {
        let platform = self.platform.read().unwrap();
        let provider = self
            .engine
            .texture_provider_for(platform.type_id())
            .ok_or_else(|| Error::UnknownFormat("no provider for raster platform".to_string()))?;
        provider.serialize_texture(&self.engine, texture, platform.payload(), stream)
    }
}

impl std::fmt::Debug for Raster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Raster")
            .field("native_type", &self.native_type_name().ok())
            .field("const_refs", &self.const_ref_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn const_ref_counting() {
        let engine = Engine::new();
        let raster = engine.create_raster("PowerVR").unwrap();

        assert_eq!(raster.const_ref_count(), 0);
        raster.add_const_ref();
        raster.add_const_ref();
        assert_eq!(raster.const_ref_count(), 2);
        raster.rem_const_ref();
        raster.rem_const_ref();
        assert_eq!(raster.const_ref_count(), 0);
    }

    #[test]
    fn pinned_raster_refuses_mutation() {
        let engine = Engine::new();
        let raster = engine.create_raster("PowerVR").unwrap();
        raster.add_const_ref();

        let pixels = PixelDataTraversal::new(Default::default());
        let err = raster.set_pixel_data(pixels).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        raster.rem_const_ref();
    }

    #[test]
    fn native_type_name_matches_provider() {
        let engine = Engine::new();
        let raster = engine.create_raster("PowerVR").unwrap();
        assert_eq!(raster.native_type_name().unwrap(), "PowerVR");
    }
}
