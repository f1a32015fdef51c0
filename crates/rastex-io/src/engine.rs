//! The engine handle.
//!
//! An [`Engine`] owns the type registry, the native-image codec
//! registry, the native-texture provider registry and the warning sink.
//! There is no global instance; hosts create one engine per loaded
//! environment and pass it (or objects holding it) everywhere. Cloning
//! an engine clones the handle, not the registries.

use std::sync::{Arc, RwLock};

use rastex_core::{Error, Result};

use crate::image::NativeImageRegistry;
use crate::texture::NativeTextureRegistry;
use crate::types::{TypeId, TypeRegistry, TypedObject};

/// Receiver of non-fatal engine diagnostics.
///
/// Warnings never abort the operation that raised them.
pub trait WarningSink: Send + Sync {
    /// Accepts one warning message.
    fn push_warning(&self, message: &str);
}

/// Default sink forwarding warnings to `tracing`.
struct TracingWarningSink;

impl WarningSink for TracingWarningSink {
    fn push_warning(&self, message: &str) {
        tracing::warn!(target: "rastex", "{message}");
    }
}

/// Configures and builds an [`Engine`].
pub struct EngineBuilder {
    builtin_formats: bool,
    warning_sink: Box<dyn WarningSink>,
}

impl EngineBuilder {
    /// Controls whether the built-in codecs (TIFF, DDS) and platform
    /// providers (Direct3D, PowerVR) are registered. Defaults to true.
    pub fn builtin_formats(mut self, enabled: bool) -> Self {
        self.builtin_formats = enabled;
        self
    }

    /// Installs a custom warning sink.
    pub fn warning_sink(mut self, sink: Box<dyn WarningSink>) -> Self {
        self.warning_sink = sink;
        self
    }

    /// Builds the engine and registers built-in formats if enabled.
    pub fn build(self) -> Engine {
        let mut types = TypeRegistry::new();
        let native_image_base = types
            .register_abstract("native_image", None)
            .expect("fresh registry cannot conflict");
        let native_texture_base = types
            .register_abstract("native_texture", None)
            .expect("fresh registry cannot conflict");

        let engine = Engine {
            inner: Arc::new(EngineInner {
                types: RwLock::new(types),
                image_formats: RwLock::new(NativeImageRegistry::default()),
                texture_formats: RwLock::new(NativeTextureRegistry::default()),
                warning_sink: self.warning_sink,
                native_image_base,
                native_texture_base,
            }),
        };

        if self.builtin_formats {
            crate::d3d::register_native_texture_type(&engine);
            crate::pvr::register_native_texture_type(&engine);
            crate::tiff::register_native_image_type(&engine);
            crate::dds::register_native_image_type(&engine);
        }

        engine
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            builtin_formats: true,
            warning_sink: Box::new(TracingWarningSink),
        }
    }
}

pub(crate) struct EngineInner {
    pub(crate) types: RwLock<TypeRegistry>,
    pub(crate) image_formats: RwLock<NativeImageRegistry>,
    pub(crate) texture_formats: RwLock<NativeTextureRegistry>,
    warning_sink: Box<dyn WarningSink>,
    native_image_base: TypeId,
    native_texture_base: TypeId,
}

/// Handle to one engine environment.
///
/// # Thread Safety
///
/// The handle is cheap to clone and all registries use internal
/// synchronization; engine methods may be called from any thread.
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Arc<EngineInner>,
}

impl Engine {
    /// Creates an engine with the built-in codecs registered.
    pub fn new() -> Self {
        EngineBuilder::default().build()
    }

    /// Starts building a customised engine.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Dispatches a warning to the installed sink.
    pub fn push_warning(&self, message: &str) {
        self.inner.warning_sink.push_warning(message);
    }

    /// Root node of the native-image type subtree.
    pub fn native_image_base(&self) -> TypeId {
        self.inner.native_image_base
    }

    /// Root node of the native-texture type subtree.
    pub fn native_texture_base(&self) -> TypeId {
        self.inner.native_texture_base
    }

    /// Name of a registered type.
    pub fn type_name(&self, id: TypeId) -> Option<String> {
        let types = self.inner.types.read().unwrap();
        types.name_of(id).map(str::to_string)
    }

    /// Finds a type by name in the subtree rooted at `base`.
    pub fn find_type(&self, name: &str, base: Option<TypeId>) -> Option<TypeId> {
        let types = self.inner.types.read().unwrap();
        types.find_type_info(name, base)
    }

    /// Constructs a payload object of the given registered type.
    ///
    /// The construction interface is resolved under the type-system
    /// lock, but runs outside it so that payload constructors may call
    /// back into the engine.
    pub fn construct_type(&self, id: TypeId) -> Result<TypedObject> {
        let interface = {
            let types = self.inner.types.read().unwrap();
            types.interface_of(id).ok_or_else(|| {
                Error::InvalidArgument("type is abstract or no longer registered".to_string())
            })?
        };
        let payload = interface.construct(self)?;
        Ok(TypedObject::new(id, payload))
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Sink collecting warnings for assertions.
    pub struct CollectingSink(pub Mutex<Vec<String>>);

    impl WarningSink for CollectingSink {
        fn push_warning(&self, message: &str) {
            self.0.lock().unwrap().push(message.to_string());
        }
    }

    #[test]
    fn builder_without_builtins_is_empty() {
        let engine = Engine::builder().builtin_formats(false).build();
        assert!(engine.get_registered_native_image_types().is_empty());
    }

    #[test]
    fn new_registers_builtins() {
        let engine = Engine::new();
        let names: Vec<_> = engine
            .get_registered_native_image_types()
            .into_iter()
            .map(|info| info.type_name)
            .collect();
        assert!(names.contains(&"TIFF".to_string()));
        assert!(names.contains(&"DDS".to_string()));
        assert!(engine.texture_provider("PowerVR").is_some());
    }

    #[test]
    fn warnings_reach_the_installed_sink() {
        let sink = Arc::new(CollectingSink(Mutex::new(Vec::new())));
        struct Forward(Arc<CollectingSink>);
        impl WarningSink for Forward {
            fn push_warning(&self, message: &str) {
                self.0.push_warning(message);
            }
        }

        let engine = Engine::builder()
            .builtin_formats(false)
            .warning_sink(Box::new(Forward(sink.clone())))
            .build();
        engine.push_warning("something mild");
        assert_eq!(sink.0.lock().unwrap().as_slice(), ["something mild"]);
    }
}
