//! Native-image layer.
//!
//! A [`NativeImage`] is a codec-side handle over one image-format
//! payload (TIFF, DDS, ...). The handle either *owns* its pixel and
//! palette bytes or *borrows* them from a [`Raster`]; borrowing is
//! recorded by a const-reference on the raster plus the two
//! `has_*_data_ref` flags, and released by
//! [`clear_image_data`](NativeImage::clear_image_data).
//!
//! Known things to improve:
//! * the acquire feedback is all-mipmaps-at-once instead of
//!   per-mipmap, which makes partial-chain reuse awkward; the
//!   per-layer `add_mipmap_layer` path already has finer feedback and
//!   the traversal path could move to it.

use std::any::Any;
use std::io::Seek;
use std::sync::{Arc, RwLock};

use rastex_core::{Error, Result};

use crate::engine::Engine;
use crate::raster::Raster;
use crate::stream::{Stream, StreamExt};
use crate::texture::AcquireFeedback;
use crate::types::{Payload, TypeId, TypeInterface, TypedObject};

/// A file extension of a registered image format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilenameExtension {
    /// Extension without the dot, uppercase.
    pub name: &'static str,
    /// True for the extension to suggest when saving.
    pub is_default: bool,
}

/// Static registration record of a native-image codec.
#[derive(Debug, Clone, Copy)]
pub struct NativeImageFormatDesc {
    /// Registry type name, matched case-sensitively (e.g. `"TIFF"`).
    pub type_name: &'static str,
    /// Human-readable format name.
    pub friendly_name: &'static str,
    /// File extensions with a default flag.
    pub extensions: &'static [FilenameExtension],
    /// Names of native-texture platforms this codec can feed.
    pub supported_native_textures: &'static [&'static str],
}

/// Format metadata returned by the engine queries.
#[derive(Debug, Clone)]
pub struct NativeImageInfo {
    /// Registry type name.
    pub type_name: String,
    /// Human-readable format name.
    pub friendly_name: &'static str,
    /// File extensions with a default flag.
    pub extensions: &'static [FilenameExtension],
    /// Supported native-texture platforms.
    pub supported_native_textures: &'static [&'static str],
}

/// The codec vtable of a native-image format.
///
/// Payload parameters are the type-erased objects built by
/// [`construct_image`](Self::construct_image). Stream operations must
/// not assume the container starts at position zero.
pub trait NativeImageTypeManager: Send + Sync {
    /// Builds an empty format payload.
    fn construct_image(&self, engine: &Engine) -> Payload;

    /// Builds a payload replicating `src`.
    fn clone_image(&self, engine: &Engine, src: &(dyn Any + Send + Sync)) -> Result<Payload>;

    /// Probes whether the stream holds this format. Never fails on
    /// malformed input and always restores the stream position.
    fn is_stream_native_image(&self, engine: &Engine, stream: &mut dyn Stream) -> bool;

    /// Deserializes the image container from the stream.
    fn read_native_image(
        &self,
        engine: &Engine,
        payload: &mut (dyn Any + Send + Sync),
        stream: &mut dyn Stream,
    ) -> Result<()>;

    /// Serializes the image container to the stream.
    fn write_native_image(
        &self,
        engine: &Engine,
        payload: &(dyn Any + Send + Sync),
        stream: &mut dyn Stream,
    ) -> Result<()>;

    /// Pulls pixel data out of a raster's platform payload.
    ///
    /// The returned feedback reports whether the image payload now
    /// aliases the raster's buffers.
    fn read_from_native_texture(
        &self,
        engine: &Engine,
        payload: &mut (dyn Any + Send + Sync),
        native_tex_name: &str,
        texture: &TypedObject,
    ) -> Result<AcquireFeedback>;

    /// Pushes pixel data into a raster's platform payload.
    fn write_to_native_texture(
        &self,
        engine: &Engine,
        payload: &mut (dyn Any + Send + Sync),
        native_tex_name: &str,
        texture: &mut TypedObject,
    ) -> Result<AcquireFeedback>;

    /// Drops the payload's pixel data.
    fn clear_image_data(&self, payload: &mut (dyn Any + Send + Sync));

    /// Drops the payload's palette data.
    fn clear_palette_data(&self, payload: &mut (dyn Any + Send + Sync));

    /// The native-texture platform this payload maps to best.
    fn best_supported_native_texture(&self, payload: &(dyn Any + Send + Sync)) -> &'static str;
}

struct NativeImageTypeInterface {
    manager: Arc<dyn NativeImageTypeManager>,
}

impl TypeInterface for NativeImageTypeInterface {
    fn construct(&self, engine: &Engine) -> Result<Payload> {
        Ok(self.manager.construct_image(engine))
    }

    fn clone_payload(&self, engine: &Engine, src: &(dyn Any + Send + Sync)) -> Result<Payload> {
        self.manager.clone_image(engine, src)
    }
}

struct RegisteredImageFormat {
    type_id: TypeId,
    desc: NativeImageFormatDesc,
    manager: Arc<dyn NativeImageTypeManager>,
}

impl RegisteredImageFormat {
    fn matches_name(&self, name: &str) -> bool {
        self.desc.type_name == name || self.desc.friendly_name == name
    }

    fn info(&self) -> NativeImageInfo {
        NativeImageInfo {
            type_name: self.desc.type_name.to_string(),
            friendly_name: self.desc.friendly_name,
            extensions: self.desc.extensions,
            supported_native_textures: self.desc.supported_native_textures,
        }
    }
}

/// Registration-ordered list of native-image codecs.
#[derive(Default)]
pub(crate) struct NativeImageRegistry {
    formats: Vec<RegisteredImageFormat>,
}

impl NativeImageRegistry {
    fn find(&self, name: &str) -> Option<&RegisteredImageFormat> {
        self.formats.iter().find(|f| f.matches_name(name))
    }
}

impl Engine {
    /// Registers a native-image codec.
    ///
    /// Returns false when the type name is already taken under the
    /// native-image base.
    pub fn register_native_image_type(
        &self,
        desc: NativeImageFormatDesc,
        manager: Arc<dyn NativeImageTypeManager>,
    ) -> bool {
        let mut formats = self.inner.image_formats.write().unwrap();
        let type_id = {
            let mut types = self.inner.types.write().unwrap();
            let interface = Arc::new(NativeImageTypeInterface {
                manager: manager.clone(),
            });
            match types.register(desc.type_name, interface, Some(self.native_image_base())) {
                Ok(id) => id,
                Err(_) => return false,
            }
        };
        formats.formats.push(RegisteredImageFormat {
            type_id,
            desc,
            manager,
        });
        true
    }

    /// Unregisters a native-image codec by type name.
    pub fn unregister_native_image_type(&self, type_name: &str) -> bool {
        let mut formats = self.inner.image_formats.write().unwrap();
        let Some(position) = formats
            .formats
            .iter()
            .position(|f| f.desc.type_name == type_name)
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

    /// Creates an empty native image of the given registered format.
    pub fn create_native_image(&self, type_name: &str) -> Result<NativeImage> {
        let type_id = self
            .find_type(type_name, Some(self.native_image_base()))
            .ok_or_else(|| Error::UnknownFormat(type_name.to_string()))?;
        let object = self.construct_type(type_id)?;
        Ok(NativeImage {
            engine: self.clone(),
            type_id,
            state: RwLock::new(ImageState {
                object,
                has_palette_data_ref: false,
                has_pixel_data_ref: false,
                pixel_owner: None,
                external_raster_ref: false,
            }),
        })
    }

    /// Probes every registered codec, in registration order, against
    /// the stream and returns the type name of the first that accepts
    /// it. The stream position is always restored.
    pub fn get_native_image_type_for_stream(&self, stream: &mut dyn Stream) -> Option<String> {
        let managers: Vec<_> = {
            let formats = self.inner.image_formats.read().unwrap();
            formats
                .formats
                .iter()
                .map(|f| (f.desc.type_name, f.manager.clone()))
                .collect()
        };

        let start = stream.tell().ok()?;
        let mut found = None;
        for (name, manager) in managers {
            if stream.seek(std::io::SeekFrom::Start(start)).is_err() {
                break;
            }
            if manager.is_stream_native_image(self, stream) {
                found = Some(name.to_string());
                break;
            }
        }
        let _ = stream.seek(std::io::SeekFrom::Start(start));
        found
    }

    /// Names of all codecs that can feed the given native-texture
    /// platform.
    pub fn get_native_image_types_for_native_texture(&self, native_tex_name: &str) -> Vec<String> {
        let formats = self.inner.image_formats.read().unwrap();
        formats
            .formats
            .iter()
            .filter(|f| f.desc.supported_native_textures.contains(&native_tex_name))
            .map(|f| f.desc.type_name.to_string())
            .collect()
    }

    /// Whether the named codec supports input/output against the named
    /// native-texture platform. The codec may be named by type name or
    /// friendly name.
    pub fn does_native_image_support_native_texture_friendly(
        &self,
        image_name: &str,
        native_tex_name: &str,
    ) -> bool {
        let formats = self.inner.image_formats.read().unwrap();
        formats
            .find(image_name)
            .map(|f| f.desc.supported_native_textures.contains(&native_tex_name))
            .unwrap_or(false)
    }

    /// Resolves a friendly name to the registry type name.
    pub fn get_native_image_type_name_from_friendly_name(&self, friendly: &str) -> Option<String> {
        let formats = self.inner.image_formats.read().unwrap();
        formats.find(friendly).map(|f| f.desc.type_name.to_string())
    }

    /// Format metadata for one codec, by type or friendly name.
    pub fn get_native_image_info(&self, name: &str) -> Option<NativeImageInfo> {
        let formats = self.inner.image_formats.read().unwrap();
        formats.find(name).map(|f| f.info())
    }

    /// Format metadata for every registered codec, in registration
    /// order.
    pub fn get_registered_native_image_types(&self) -> Vec<NativeImageInfo> {
        let formats = self.inner.image_formats.read().unwrap();
        formats.formats.iter().map(|f| f.info()).collect()
    }

    fn image_manager_for(&self, type_id: TypeId) -> Result<Arc<dyn NativeImageTypeManager>> {
        let formats = self.inner.image_formats.read().unwrap();
        formats
            .formats
            .iter()
            .find(|f| f.type_id == type_id)
            .map(|f| f.manager.clone())
            .ok_or_else(|| Error::UnknownFormat("image format no longer registered".to_string()))
    }
}

struct ImageState {
    object: TypedObject,
    has_palette_data_ref: bool,
    has_pixel_data_ref: bool,
    pixel_owner: Option<Arc<Raster>>,
    external_raster_ref: bool,
}

impl ImageState {
    fn release_owner(&mut self) {
        self.has_palette_data_ref = false;
        self.has_pixel_data_ref = false;
        if let Some(owner) = self.pixel_owner.take() {
            if !self.external_raster_ref {
                owner.rem_const_ref();
            }
        }
        self.external_raster_ref = false;
    }
}

/// Codec-side handle that either owns or borrows pixel bytes.
///
/// Dropping the handle releases any borrowed raster reference.
pub struct NativeImage {
    engine: Engine,
    type_id: TypeId,
    state: RwLock<ImageState>,
}

impl NativeImage {
    /// The engine this image belongs to.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Registry type name of the image format.
    pub fn type_name(&self) -> String {
        self.engine
            .type_name(self.type_id)
            .unwrap_or_else(|| "<unregistered>".to_string())
    }

    /// The native-texture platform the codec recommends for this
    /// payload.
    pub fn recommended_native_texture_target(&self) -> Result<&'static str> {
        let manager = self.engine.image_manager_for(self.type_id)?;
        let state = self.state.read().unwrap();
        Ok(manager.best_supported_native_texture(state.object.payload()))
    }

    /// Runs a closure against the format payload under the read lock.
    pub fn with_payload<T: 'static, R>(&self, body: impl FnOnce(Option<&T>) -> R) -> R {
        let state = self.state.read().unwrap();
        body(state.object.downcast_ref::<T>())
    }

    /// True while this image borrows bytes from a raster.
    pub fn pixel_owner(&self) -> Option<Arc<Raster>> {
        self.state.read().unwrap().pixel_owner.clone()
    }

    /// The two borrow flags, `(palette, pixels)`.
    pub fn data_ref_flags(&self) -> (bool, bool) {
        let state = self.state.read().unwrap();
        (state.has_palette_data_ref, state.has_pixel_data_ref)
    }

    /// Releases all pixel and palette data, returning the handle to
    /// the empty state. Idempotent.
    pub fn clear_image_data(&self) {
        let manager = self.engine.image_manager_for(self.type_id).ok();
        let mut state = self.state.write().unwrap();
        Self::clear_locked(manager.as_deref(), &mut state);
    }

    fn clear_locked(manager: Option<&dyn NativeImageTypeManager>, state: &mut ImageState) {
        if let Some(manager) = manager {
            manager.clear_palette_data(state.object.payload_mut());
            manager.clear_image_data(state.object.payload_mut());
        }
        state.release_owner();
    }

    /// Pulls pixel data from a raster into this image.
    ///
    /// Previous image data is cleared first. If the codec directly
    /// acquires the raster's buffers, the image records the raster as
    /// its pixel owner and keeps one const-reference on it.
    pub fn fetch_from_raster(&self, raster: &Arc<Raster>) -> Result<()> {
        let manager = self.engine.image_manager_for(self.type_id)?;
        let mut state = self.state.write().unwrap();
        Self::clear_locked(Some(manager.as_ref()), &mut state);
        debug_assert!(state.pixel_owner.is_none());

        // Pin the raster while the codec inspects it.
        raster.add_const_ref();

        let mut needs_ref = false;
        let outcome = (|| -> Result<()> {
            let native_tex_name = raster.native_type_name()?;
            let platform = raster.platform().read().unwrap();
            let feedback = manager.read_from_native_texture(
                &self.engine,
                state.object.payload_mut(),
                &native_tex_name,
                &platform,
            )?;

            let has_palette_ref = feedback.has_directly_acquired_palette;
            let has_pixel_ref = feedback.has_directly_acquired;
            if has_palette_ref || has_pixel_ref {
                state.pixel_owner = Some(Raster::acquire(raster));
                needs_ref = true;
            }
            state.has_palette_data_ref = has_palette_ref;
            state.has_pixel_data_ref = has_pixel_ref;
            state.external_raster_ref = false;
            Ok(())
        })();

        if outcome.is_err() || !needs_ref {
            raster.rem_const_ref();
        }
        outcome
    }

    /// Like [`fetch_from_raster`](Self::fetch_from_raster), but for
    /// callers that already hold the raster's read lock and a
    /// const-reference.
    ///
    /// `platform` must be the guarded payload of `raster`. Returns
    /// true iff the image borrowed the raster's buffers, in which case
    /// the caller must leave its const-reference in place for the
    /// image's lifetime.
    pub fn fetch_from_raster_no_lock(
        &self,
        raster: &Arc<Raster>,
        platform: &TypedObject,
        native_tex_name: &str,
    ) -> Result<bool> {
        let manager = self.engine.image_manager_for(self.type_id)?;
        let mut state = self.state.write().unwrap();
        Self::clear_locked(Some(manager.as_ref()), &mut state);

        let feedback = manager.read_from_native_texture(
            &self.engine,
            state.object.payload_mut(),
            native_tex_name,
            platform,
        )?;

        let has_palette_ref = feedback.has_directly_acquired_palette;
        let has_pixel_ref = feedback.has_directly_acquired;
        let needs_ref = has_palette_ref || has_pixel_ref;
        if needs_ref {
            state.pixel_owner = Some(Raster::acquire(raster));
        }
        state.has_palette_data_ref = has_palette_ref;
        state.has_pixel_data_ref = has_pixel_ref;
        state.external_raster_ref = true;
        Ok(needs_ref)
    }

    /// Pushes this image's pixel data into a raster.
    ///
    /// Fails with [`Error::AlreadyOwned`] when the image's bytes
    /// belong to another raster. On success the image is empty.
    pub fn put_to_raster(&self, raster: &Arc<Raster>) -> Result<()> {
        let manager = self.engine.image_manager_for(self.type_id)?;
        let mut state = self.state.write().unwrap();
        if state.pixel_owner.is_some() {
            return Err(Error::AlreadyOwned);
        }
        if raster.const_ref_count() > 0 {
            return Err(Error::InvalidArgument(
                "raster is pinned by const references".to_string(),
            ));
        }
        let mut platform = raster.platform().write().unwrap();
        Self::put_locked(&self.engine, manager.as_ref(), &mut state, &mut platform)
    }

    /// Like [`put_to_raster`](Self::put_to_raster), but for callers
    /// that already hold the raster's write lock.
    ///
    /// `platform` must be the guarded payload of the target raster.
    pub fn put_to_raster_no_lock(&self, platform: &mut TypedObject) -> Result<()> {
        let manager = self.engine.image_manager_for(self.type_id)?;
        let mut state = self.state.write().unwrap();
        if state.pixel_owner.is_some() {
            return Err(Error::AlreadyOwned);
        }
        Self::put_locked(&self.engine, manager.as_ref(), &mut state, platform)
    }

    fn put_locked(
        engine: &Engine,
        manager: &dyn NativeImageTypeManager,
        state: &mut ImageState,
        platform: &mut TypedObject,
    ) -> Result<()> {
        let native_tex_name = engine
            .type_name(TypedObject::type_id(platform))
            .ok_or_else(|| Error::UnknownFormat("raster platform type not registered".to_string()))?;
        let provider = engine
            .texture_provider_for(TypedObject::type_id(platform))
            .ok_or_else(|| Error::UnknownFormat("no provider for raster platform".to_string()))?;

        // The raster gives up any previous pixel data first.
        provider.unset_pixel_data_from_texture(engine, platform.payload_mut(), true);

        let feedback = manager.write_to_native_texture(
            engine,
            state.object.payload_mut(),
            &native_tex_name,
            platform,
        )?;
        tracing::debug!(
            target: "rastex",
            direct = feedback.has_directly_acquired,
            "image data handed to raster"
        );

        // The bytes now live in the raster; the image returns to the
        // empty state either way.
        manager.clear_palette_data(state.object.payload_mut());
        manager.clear_image_data(state.object.payload_mut());
        state.release_owner();
        Ok(())
    }

    /// Deserializes the image container from a stream.
    ///
    /// On failure the image is left empty and the stream position is
    /// not restored.
    pub fn read_from_stream(&self, stream: &mut dyn Stream) -> Result<()> {
        let manager = self.engine.image_manager_for(self.type_id)?;
        let mut state = self.state.write().unwrap();
        Self::clear_locked(Some(manager.as_ref()), &mut state);

        manager.read_native_image(&self.engine, state.object.payload_mut(), stream)?;

        // Freshly decoded bytes are owned by the image itself.
        state.has_palette_data_ref = false;
        state.has_pixel_data_ref = false;
        Ok(())
    }

    /// Serializes the image container to a stream.
    ///
    /// The stream position is not restored on failure.
    pub fn write_to_stream(&self, stream: &mut dyn Stream) -> Result<()> {
        let manager = self.engine.image_manager_for(self.type_id)?;
        let state = self.state.read().unwrap();
        manager.write_native_image(&self.engine, state.object.payload(), stream)
    }

    /// Builds an independent copy of this image.
    ///
    /// A borrowing image's copy borrows from the same raster and takes
    /// its own const-reference.
    pub fn try_clone(&self) -> Result<NativeImage> {
        let manager = self.engine.image_manager_for(self.type_id)?;
        let state = self.state.read().unwrap();
        let payload = manager.clone_image(&self.engine, state.object.payload())?;

        let pixel_owner = state.pixel_owner.clone();
        if let Some(owner) = &pixel_owner {
            owner.add_const_ref();
        }

        Ok(NativeImage {
            engine: self.engine.clone(),
            type_id: self.type_id,
            state: RwLock::new(ImageState {
                object: TypedObject::new(self.type_id, payload),
                has_palette_data_ref: state.has_palette_data_ref,
                has_pixel_data_ref: state.has_pixel_data_ref,
                pixel_owner,
                external_raster_ref: false,
            }),
        })
    }
}

impl Drop for NativeImage {
    fn drop(&mut self) {
        let manager = self.engine.image_manager_for(self.type_id).ok();
        if manager.is_none() {
            self.engine
                .push_warning("dropping a native image whose format is no longer registered");
        }
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(manager) = &manager {
            manager.clear_palette_data(state.object.payload_mut());
            manager.clear_image_data(state.object.payload_mut());
        }
        state.release_owner();
    }
}

impl std::fmt::Debug for NativeImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().unwrap();
        f.debug_struct("NativeImage")
            .field("type", &self.type_name())
            .field("has_palette_data_ref", &state.has_palette_data_ref)
            .field("has_pixel_data_ref", &state.has_pixel_data_ref)
            .field("borrows", &state.pixel_owner.is_some())
            .finish()
    }
}
