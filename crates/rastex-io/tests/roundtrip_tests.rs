//! Round-trip and boundary tests across codecs and providers.

use std::sync::{Arc, Mutex};

use rastex_io::{
    texture::TextureBase, ColorOrder, Engine, Error, MemoryStream, MipmapLevel, PaletteType,
    PixelDataTraversal, PixelLayout, RasterFormat, StreamExt, WarningSink,
};

fn rgba_layout() -> PixelLayout {
    PixelLayout {
        raster_format: RasterFormat::Rgba8888,
        depth: 32,
        row_alignment: 4,
        color_order: ColorOrder::Rgba,
        palette_type: PaletteType::None,
    }
}

fn rgba_traversal(width: u32, height: u32, mips: u32) -> PixelDataTraversal {
    let mut pixels = PixelDataTraversal::new(rgba_layout());
    for level in 0..mips {
        let (w, h) = ((width >> level).max(1), (height >> level).max(1));
        let mut texels = Vec::with_capacity((w * h * 4) as usize);
        for n in 0..w * h {
            texels.extend_from_slice(&[(n % 199) as u8, (n % 83) as u8, level as u8, 0xFF]);
        }
        pixels.mipmaps.push(MipmapLevel::unpadded(w, h, texels));
    }
    pixels
}

struct CollectingSink(Mutex<Vec<String>>);

impl WarningSink for CollectingSink {
    fn push_warning(&self, message: &str) {
        self.0.lock().unwrap().push(message.to_string());
    }
}

struct ForwardingSink(Arc<CollectingSink>);

impl WarningSink for ForwardingSink {
    fn push_warning(&self, message: &str) {
        self.0.push_warning(message);
    }
}

#[test]
fn dds_stream_to_raster_and_back() {
    let engine = Engine::new();

    // Seed a raster, export it as DDS bytes, reimport, and compare the
    // raster contents byte for byte.
    let source = engine.create_raster("Direct3D").unwrap();
    source.set_pixel_data(rgba_traversal(8, 8, 2)).unwrap();

    let exporter = engine.create_native_image("DDS").unwrap();
    exporter.fetch_from_raster(&source).unwrap();
    let mut stream = MemoryStream::new();
    exporter.write_to_stream(&mut stream).unwrap();

    let mut stream = MemoryStream::from_vec(stream.into_inner());
    assert_eq!(
        engine
            .get_native_image_type_for_stream(&mut stream)
            .as_deref(),
        Some("DDS")
    );

    let importer = engine.create_native_image("DDS").unwrap();
    importer.read_from_stream(&mut stream).unwrap();
    // Decoded bytes are owned, not borrowed.
    assert_eq!(importer.data_ref_flags(), (false, false));

    let target = engine.create_raster("Direct3D").unwrap();
    importer.put_to_raster(&target).unwrap();

    let before = source.get_pixel_data().unwrap();
    let after = target.get_pixel_data().unwrap();
    // DDS stores byte-aligned rows, so only the row alignment may
    // differ; at 32bpp the bytes cannot.
    assert_eq!(before.layout.raster_format, after.layout.raster_format);
    assert_eq!(before.layout.depth, after.layout.depth);
    assert_eq!(before.layout.color_order, after.layout.color_order);
    assert_eq!(before.mipmaps.len(), after.mipmaps.len());
    for (a, b) in before.mipmaps.iter().zip(after.mipmaps.iter()) {
        assert_eq!(a.texels.as_ref(), b.texels.as_ref());
    }

    // The importer handed its bytes off and is empty again.
    let err = importer.write_to_stream(&mut MemoryStream::new()).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn pvr_texture_block_round_trip_is_byte_identical() {
    let engine = Engine::new();

    let raster = engine.create_raster("PowerVR").unwrap();
    raster.set_pixel_data(rgba_traversal(16, 16, 2)).unwrap();
    assert!(raster.format_string().unwrap().starts_with("PVR "));

    let texture = TextureBase {
        name: "stone".to_string(),
        mask_name: "stone_mask".to_string(),
        format_info: Default::default(),
    };

    let mut first = MemoryStream::new();
    engine
        .write_native_texture(&texture, &raster, &mut first)
        .unwrap();
    let first = first.into_inner();

    let mut input = MemoryStream::from_vec(first.clone());
    assert_eq!(
        engine
            .get_native_texture_type_for_stream(&mut input)
            .as_deref(),
        Some("PowerVR")
    );
    let (texture_back, raster_back) = engine.read_native_texture(&mut input).unwrap();
    assert_eq!(texture_back.name, "stone");
    assert_eq!(texture_back.mask_name, "stone_mask");

    let mut second = MemoryStream::new();
    engine
        .write_native_texture(&texture_back, &raster_back, &mut second)
        .unwrap();
    assert_eq!(first, second.into_inner());
}

#[test]
fn pvr_rejects_non_power_of_two_layers() {
    let engine = Engine::new();
    let raster = engine.create_raster("PowerVR").unwrap();

    let err = raster.set_pixel_data(rgba_traversal(5, 7, 1)).unwrap_err();
    match err {
        Error::SizeRuleViolation { width, height } => {
            assert_eq!((width, height), (5, 7));
        }
        other => panic!("expected a size rule violation, got {other}"),
    }
}

#[test]
fn pvr_chooses_bpp_by_base_area() {
    let engine = Engine::new();

    let small = engine.create_raster("PowerVR").unwrap();
    small.set_pixel_data(rgba_traversal(64, 64, 1)).unwrap();
    assert_eq!(small.format_string().unwrap(), "PVR RGB 4bit");

    let large = engine.create_raster("PowerVR").unwrap();
    large.set_pixel_data(rgba_traversal(128, 128, 1)).unwrap();
    assert_eq!(large.format_string().unwrap(), "PVR RGB 2bit");
}

#[test]
fn pvr_decode_recovers_saturated_colors() {
    let engine = Engine::new();
    let raster = engine.create_raster("PowerVR").unwrap();

    // Solid red survives PVRTC quantization exactly.
    let layout = rgba_layout();
    let mut pixels = PixelDataTraversal::new(layout);
    let mut texels = Vec::new();
    for _ in 0..8 * 8 {
        texels.extend_from_slice(&[255, 0, 0, 255]);
    }
    pixels.mipmaps.push(MipmapLevel::unpadded(8, 8, texels));
    raster.set_pixel_data(pixels).unwrap();

    let info = raster.texture_info().unwrap();
    assert_eq!((info.base_width, info.base_height), (8, 8));
    assert_eq!(info.mipmap_count, 1);

    let decoded = raster.get_pixel_data().unwrap();
    assert_eq!(decoded.layout.raster_format, RasterFormat::Rgb888);
    let level = &decoded.mipmaps[0];
    let row_size = decoded.layout.row_size(level.layer_width);
    for y in 0..8usize {
        for x in 0..8usize {
            let px = &level.texels[y * row_size + x * 3..y * row_size + x * 3 + 3];
            assert_eq!(px, &[255, 0, 0]);
        }
    }
}

#[test]
fn long_texture_names_warn_but_serialize() {
    let sink = Arc::new(CollectingSink(Mutex::new(Vec::new())));
    let engine = Engine::builder()
        .warning_sink(Box::new(ForwardingSink(sink.clone())))
        .build();

    let raster = engine.create_raster("PowerVR").unwrap();
    raster.set_pixel_data(rgba_traversal(8, 8, 1)).unwrap();

    let texture = TextureBase {
        name: "a_texture_name_far_longer_than_the_serialized_field_allows".to_string(),
        mask_name: String::new(),
        format_info: Default::default(),
    };

    let mut stream = MemoryStream::new();
    engine
        .write_native_texture(&texture, &raster, &mut stream)
        .unwrap();

    let warnings = sink.0.lock().unwrap();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("truncated"));
}

#[test]
fn mipmap_layers_can_be_added_and_fetched() {
    let engine = Engine::new();
    let raster = engine.create_raster("Direct3D").unwrap();
    raster.set_pixel_data(rgba_traversal(8, 8, 1)).unwrap();

    let provider = engine.texture_provider("Direct3D").unwrap();
    let mut platform = raster.platform().write().unwrap();

    // Fetch the base layer back.
    let base = provider
        .get_mipmap_layer(&engine, platform.payload(), 0)
        .unwrap()
        .unwrap();
    assert_eq!(base.mipmap.layer_width, 8);
    assert!(provider
        .get_mipmap_layer(&engine, platform.payload(), 1)
        .unwrap()
        .is_none());

    // A correctly halved level extends the chain.
    let mut next = base.clone();
    next.mipmap = MipmapLevel::unpadded(4, 4, vec![0x11; 4 * 4 * 4]);
    let mut feedback = Default::default();
    provider
        .add_mipmap_layer(&engine, platform.payload_mut(), next, &mut feedback)
        .unwrap();

    // A level that does not continue the halving chain is refused.
    let mut bad = base.clone();
    bad.mipmap = MipmapLevel::unpadded(3, 3, vec![0x22; 3 * 3 * 4]);
    let err = provider
        .add_mipmap_layer(&engine, platform.payload_mut(), bad, &mut Default::default())
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    drop(platform);
    assert_eq!(raster.texture_info().unwrap().mipmap_count, 2);
}

#[test]
fn tiff_stream_round_trip_through_handles() {
    let engine = Engine::new();

    // Raster -> TIFF bytes.
    let raster = engine.create_raster("Direct3D").unwrap();
    raster.set_pixel_data(rgba_traversal(6, 3, 1)).unwrap();

    let image = engine.create_native_image("TIFF").unwrap();
    image.fetch_from_raster(&raster).unwrap();
    let mut stream = MemoryStream::new();
    image.write_to_stream(&mut stream).unwrap();
    drop(image);

    // TIFF bytes -> fresh raster.
    let mut stream = MemoryStream::from_vec(stream.into_inner());
    let reader = engine.create_native_image("TIFF").unwrap();
    reader.read_from_stream(&mut stream).unwrap();
    // Decode consumed the container; the position is wherever the
    // parser left it, not rewound.
    assert!(stream.tell().unwrap() > 0);

    let target = engine.create_raster("Direct3D").unwrap();
    reader.put_to_raster(&target).unwrap();

    let before = raster.get_pixel_data().unwrap();
    let after = target.get_pixel_data().unwrap();
    let level_before = &before.mipmaps[0];
    let level_after = &after.mipmaps[0];
    assert_eq!(level_after.layer_width, 6);
    assert_eq!(level_after.layer_height, 3);
    assert_eq!(level_before.texels.as_ref(), level_after.texels.as_ref());
}
