//! Integration tests for the native-image codec registry.

use std::any::Any;
use std::io::Read;
use std::sync::Arc;

use rastex_io::{
    AcquireFeedback, Engine, Error, FilenameExtension, MemoryStream, NativeImageFormatDesc,
    NativeImageTypeManager, Result, Stream, TypedObject,
};

/// A codec that recognises streams starting with its magic.
struct MockManager {
    magic: &'static [u8; 4],
}

#[derive(Default)]
struct MockPayload;

impl NativeImageTypeManager for MockManager {
    fn construct_image(&self, _engine: &Engine) -> Box<dyn Any + Send + Sync> {
        Box::new(MockPayload)
    }

    fn clone_image(
        &self,
        _engine: &Engine,
        _src: &(dyn Any + Send + Sync),
    ) -> Result<Box<dyn Any + Send + Sync>> {
        Ok(Box::new(MockPayload))
    }

    fn is_stream_native_image(&self, _engine: &Engine, stream: &mut dyn Stream) -> bool {
        let mut buf = [0u8; 4];
        match stream.read_exact(&mut buf) {
            Ok(()) => &buf == self.magic,
            Err(_) => false,
        }
    }

    fn read_native_image(
        &self,
        _engine: &Engine,
        _payload: &mut (dyn Any + Send + Sync),
        _stream: &mut dyn Stream,
    ) -> Result<()> {
        Err(Error::Unsupported("mock codec cannot decode".to_string()))
    }

    fn write_native_image(
        &self,
        _engine: &Engine,
        _payload: &(dyn Any + Send + Sync),
        _stream: &mut dyn Stream,
    ) -> Result<()> {
        Err(Error::Unsupported("mock codec cannot encode".to_string()))
    }

    fn read_from_native_texture(
        &self,
        _engine: &Engine,
        _payload: &mut (dyn Any + Send + Sync),
        _native_tex_name: &str,
        _texture: &TypedObject,
    ) -> Result<AcquireFeedback> {
        Ok(AcquireFeedback::default())
    }

    fn write_to_native_texture(
        &self,
        _engine: &Engine,
        _payload: &mut (dyn Any + Send + Sync),
        _native_tex_name: &str,
        _texture: &mut TypedObject,
    ) -> Result<AcquireFeedback> {
        Ok(AcquireFeedback::default())
    }

    fn clear_image_data(&self, _payload: &mut (dyn Any + Send + Sync)) {}

    fn clear_palette_data(&self, _payload: &mut (dyn Any + Send + Sync)) {}

    fn best_supported_native_texture(&self, _payload: &(dyn Any + Send + Sync)) -> &'static str {
        "Direct3D"
    }
}

const MOCK_EXTENSIONS: &[FilenameExtension] = &[FilenameExtension {
    name: "MOK",
    is_default: true,
}];

fn mock_desc(type_name: &'static str, friendly_name: &'static str) -> NativeImageFormatDesc {
    NativeImageFormatDesc {
        type_name,
        friendly_name,
        extensions: MOCK_EXTENSIONS,
        supported_native_textures: &["Direct3D"],
    }
}

#[test]
fn builtins_are_listed_in_registration_order() {
    let engine = Engine::new();
    let names: Vec<_> = engine
        .get_registered_native_image_types()
        .into_iter()
        .map(|info| info.type_name)
        .collect();
    assert_eq!(names, ["TIFF", "DDS"]);
}

#[test]
fn register_unregister_register_again() {
    let engine = Engine::new();
    let manager = Arc::new(MockManager { magic: b"MOCK" });

    assert!(engine.register_native_image_type(mock_desc("MOCK", "Mock Format"), manager.clone()));
    // The name is taken now.
    assert!(!engine.register_native_image_type(mock_desc("MOCK", "Mock Format"), manager.clone()));

    assert!(engine.unregister_native_image_type("MOCK"));
    assert!(!engine.unregister_native_image_type("MOCK"));

    assert!(engine.register_native_image_type(mock_desc("MOCK", "Mock Format"), manager));
}

#[test]
fn duplicate_builtin_name_is_rejected() {
    let engine = Engine::new();
    let manager = Arc::new(MockManager { magic: b"MOCK" });
    assert!(!engine.register_native_image_type(mock_desc("TIFF", "Impostor"), manager));
}

#[test]
fn stream_probing_follows_registration_order() {
    let engine = Engine::builder().builtin_formats(false).build();
    // Both codecs accept the same magic; the first registered wins.
    assert!(engine.register_native_image_type(
        mock_desc("FIRST", "First Format"),
        Arc::new(MockManager { magic: b"SAME" }),
    ));
    assert!(engine.register_native_image_type(
        mock_desc("SECOND", "Second Format"),
        Arc::new(MockManager { magic: b"SAME" }),
    ));

    let mut stream = MemoryStream::from_vec(b"SAME....".to_vec());
    assert_eq!(
        engine
            .get_native_image_type_for_stream(&mut stream)
            .as_deref(),
        Some("FIRST")
    );
}

#[test]
fn codec_queries() {
    let engine = Engine::new();

    assert_eq!(
        engine
            .get_native_image_type_name_from_friendly_name("Tag Image File Format")
            .as_deref(),
        Some("TIFF")
    );
    assert_eq!(
        engine.get_native_image_type_name_from_friendly_name("Nonexistent Format"),
        None
    );

    let info = engine.get_native_image_info("TIFF").unwrap();
    assert_eq!(info.friendly_name, "Tag Image File Format");
    let default_ext = info.extensions.iter().find(|e| e.is_default).unwrap();
    assert_eq!(default_ext.name, "TIF");

    assert!(engine.does_native_image_support_native_texture_friendly("TIFF", "PowerVR"));
    assert!(engine.does_native_image_support_native_texture_friendly("DDS", "Direct3D"));
    assert!(!engine.does_native_image_support_native_texture_friendly("TIFF", "PlayStation2"));

    let feeders = engine.get_native_image_types_for_native_texture("PowerVR");
    assert!(feeders.contains(&"TIFF".to_string()));
    assert!(feeders.contains(&"DDS".to_string()));
    assert!(engine
        .get_native_image_types_for_native_texture("PlayStation2")
        .is_empty());
}

#[test]
fn unknown_format_creation_fails() {
    let engine = Engine::new();
    let err = engine.create_native_image("BMP").unwrap_err();
    assert!(matches!(err, Error::UnknownFormat(_)));
}

#[test]
fn image_handles_report_type_metadata() {
    let engine = Engine::new();
    let image = engine.create_native_image("TIFF").unwrap();
    assert_eq!(image.type_name(), "TIFF");
    assert_eq!(image.recommended_native_texture_target().unwrap(), "Direct3D");
}

#[test]
fn texture_provider_registry() {
    let engine = Engine::new();
    assert_eq!(
        engine.get_registered_native_texture_types(),
        ["Direct3D", "PowerVR"]
    );
    assert!(engine.texture_provider("PowerVR").is_some());
    assert!(engine.texture_provider("PlayStation2").is_none());
}
