use std::sync::Arc;

use wz_edit::property::{Vector2D, WzPng, WzSound, WzString, WzSubProperty, WzValue};
use wz_edit::util::repack::{save_archive, WzSaveError, WZ_FSTART};
use wz_edit::util::write_property::WzWriteError;
use wz_edit::{
    add_child, parse_archive, parse_image, repack_archive, serialize_xml, WzFile, WzImage,
    WzMapleVersion, WzNode, WzNodeArc, WzNodeCast, WzObjectType,
};

fn new_file_root(name: &str) -> WzNodeArc {
    WzNode::from_str(name, WzFile::default(), None).into_lock()
}

fn new_image(name: &str) -> WzNodeArc {
    WzNode::from_str(name, WzImage::default(), None).into_lock()
}

fn new_dir(name: &str) -> WzNodeArc {
    WzNode::from_str(name, wz_edit::WzDirectory::default(), None).into_lock()
}

fn child(node: &WzNodeArc, name: &str) -> WzNodeArc {
    node.read()
        .unwrap()
        .at(name)
        .unwrap_or_else(|| panic!("missing child {name}"))
}

fn parsed_file_meta(root: &WzNodeArc) -> wz_edit::WzFileMeta {
    let read = root.read().unwrap();
    read.try_as_file().expect("root should be a file").wz_file_meta.clone()
}

#[test]
fn minimal_archive_round_trip() {
    let root = new_file_root("Test");
    let image = new_image("Test.img");
    add_child(&root, Arc::clone(&image));
    add_child(&image, WzNode::from_str("n", 42, None).into_lock());

    let bytes = repack_archive(&root, WzMapleVersion::BMS, 83).unwrap();

    // no hints: variant and patch are recovered by detection
    let reparsed = parse_archive(&bytes, None, None).unwrap();

    let meta = parsed_file_meta(&reparsed);
    assert_eq!(meta.patch_version, 83);
    assert_eq!(meta.maple_version, Some(WzMapleVersion::BMS));

    let image = child(&reparsed, "Test.img");
    parse_image(&image).unwrap();

    let n = child(&image, "n");
    assert_eq!(n.read().unwrap().try_as_int(), Some(&42));

    // direct stream access without materializing the image
    let direct = {
        let read = image.read().unwrap();
        read.try_as_image().unwrap().at_path("n").unwrap()
    };
    assert_eq!(direct.read().unwrap().try_as_int(), Some(&42));
}

#[test]
fn empty_image_emits_reserved_header() {
    let root = new_file_root("Test");
    add_child(&root, new_image("Empty.img"));

    let bytes = repack_archive(&root, WzMapleVersion::BMS, 83).unwrap();
    let reparsed = parse_archive(&bytes, None, None).unwrap();

    let image = child(&reparsed, "Empty.img");
    parse_image(&image).unwrap();
    assert!(image.read().unwrap().children.is_empty());
}

fn build_rich_image() -> WzNodeArc {
    let image = new_image("Rich.img");

    let sub = WzNode::from_str(
        "props",
        WzObjectType::Property(WzSubProperty::Property),
        None,
    )
    .into_lock();
    add_child(&sub, WzNode::from_str("short", -3i16, None).into_lock());
    add_child(&sub, WzNode::from_str("long", 1i64 << 40, None).into_lock());
    add_child(&sub, WzNode::from_str("zero_float", 0f32, None).into_lock());
    add_child(&sub, WzNode::from_str("float", 2.5f32, None).into_lock());
    add_child(&sub, WzNode::from_str("double", -0.125f64, None).into_lock());
    add_child(
        &sub,
        WzNode::from_str("nil", WzObjectType::Value(WzValue::Null), None).into_lock(),
    );
    add_child(&image, sub);

    add_child(
        &image,
        WzNode::from_str("ascii", WzString::from_str("plain value"), None).into_lock(),
    );
    add_child(
        &image,
        WzNode::from_str("unicode", WzString::from_str("測試文字"), None).into_lock(),
    );
    add_child(
        &image,
        WzNode::from_str("origin", Vector2D(10, -20), None).into_lock(),
    );

    let convex = WzNode::from_str(
        "bounds",
        WzObjectType::Property(WzSubProperty::Convex),
        None,
    )
    .into_lock();
    add_child(&convex, WzNode::from_str("0", Vector2D(0, 0), None).into_lock());
    add_child(&convex, WzNode::from_str("1", Vector2D(5, 9), None).into_lock());
    add_child(&image, convex);

    let mut header = vec![0u8; 52];
    header[0] = 0x02;
    let sound = WzSound::from_parts(header, b"RIFFxxxxWAVEfmt ".to_vec(), 1200);
    add_child(
        &image,
        WzNode::from_str("bgm", sound, None).into_lock(),
    );

    let rgba: Vec<u8> = (0..64u8).collect();
    let canvas_node = WzNode::from_str("icon", WzPng::from_rgba(4, 4, &rgba).unwrap(), None)
        .into_lock();
    add_child(
        &canvas_node,
        WzNode::from_str("origin", Vector2D(2, 3), None).into_lock(),
    );
    add_child(&image, canvas_node);

    // a canvas with no metadata children takes the bare flag-byte path
    let plain_rgba = vec![0x80u8; 2 * 2 * 4];
    add_child(
        &image,
        WzNode::from_str("flat", WzPng::from_rgba(2, 2, &plain_rgba).unwrap(), None).into_lock(),
    );

    add_child(
        &image,
        WzNode::from_str(
            "link",
            WzObjectType::Value(WzValue::UOL(WzString::from_str("../ascii"))),
            None,
        )
        .into_lock(),
    );

    image
}

#[test]
fn every_property_kind_survives_round_trip() {
    let root = new_file_root("Test");
    let image = build_rich_image();
    add_child(&root, Arc::clone(&image));

    // GMS exercises the real keystream, patch 95 a non-default hash
    let bytes = repack_archive(&root, WzMapleVersion::GMS, 95).unwrap();
    let reparsed = parse_archive(&bytes, None, None).unwrap();

    let meta = parsed_file_meta(&reparsed);
    assert_eq!(meta.patch_version, 95);
    assert_eq!(meta.maple_version, Some(WzMapleVersion::GMS));

    let reparsed_image = child(&reparsed, "Rich.img");
    parse_image(&reparsed_image).unwrap();

    let sub = child(&reparsed_image, "props");
    assert_eq!(child(&sub, "short").read().unwrap().try_as_short(), Some(&-3));
    assert_eq!(
        child(&sub, "long").read().unwrap().try_as_long(),
        Some(&(1i64 << 40))
    );
    assert_eq!(
        child(&sub, "zero_float").read().unwrap().try_as_float(),
        Some(&0.0)
    );
    assert_eq!(child(&sub, "float").read().unwrap().try_as_float(), Some(&2.5));
    assert_eq!(
        child(&sub, "double").read().unwrap().try_as_double(),
        Some(&-0.125)
    );
    assert!(child(&sub, "nil").read().unwrap().is_null());

    assert_eq!(
        child(&reparsed_image, "ascii")
            .read()
            .unwrap()
            .try_as_string()
            .unwrap()
            .get_string()
            .unwrap(),
        "plain value"
    );
    assert_eq!(
        child(&reparsed_image, "unicode")
            .read()
            .unwrap()
            .try_as_string()
            .unwrap()
            .get_string()
            .unwrap(),
        "測試文字"
    );
    assert_eq!(
        child(&reparsed_image, "origin").read().unwrap().try_as_vector2d(),
        Some(&Vector2D(10, -20))
    );

    let convex = child(&reparsed_image, "bounds");
    assert!(convex.read().unwrap().is_convex());
    assert_eq!(
        child(&convex, "1").read().unwrap().try_as_vector2d(),
        Some(&Vector2D(5, 9))
    );

    let bgm = child(&reparsed_image, "bgm");
    {
        let read = bgm.read().unwrap();
        let sound = read.try_as_sound().unwrap();
        assert_eq!(sound.duration, 1200);
        assert_eq!(sound.sound_type.mime(), "audio/wav");
        assert_eq!(sound.body().as_ref(), b"RIFFxxxxWAVEfmt ");
        assert_eq!(sound.header_bytes().len(), 52);
    }

    let icon = child(&reparsed_image, "icon");
    {
        let read = icon.read().unwrap();
        let png = read.try_as_png().unwrap();
        assert_eq!((png.width, png.height), (4, 4));
        let rgba: Vec<u8> = (0..64u8).collect();
        assert_eq!(png.extract_rgba().unwrap(), rgba);
    }
    assert_eq!(
        child(&icon, "origin").read().unwrap().try_as_vector2d(),
        Some(&Vector2D(2, 3))
    );

    let flat = child(&reparsed_image, "flat");
    {
        let read = flat.read().unwrap();
        assert!(read.children.is_empty());
        let rgba = read.try_as_png().unwrap().extract_rgba().unwrap();
        assert_eq!(rgba, vec![0x80u8; 16]);
    }

    assert_eq!(
        child(&reparsed_image, "link")
            .read()
            .unwrap()
            .try_as_uol()
            .unwrap()
            .get_string()
            .unwrap(),
        "../ascii"
    );

    // the XML projection of the rebuilt tree matches the original's
    assert_eq!(serialize_xml(&reparsed_image), serialize_xml(&image));
}

#[test]
fn long_string_value_interned_once() {
    let value = "LongStringOverFourChars";

    let root = new_file_root("Test");
    let image = new_image("Strings.img");
    add_child(
        &image,
        WzNode::from_str("z", WzString::from_str(value), None).into_lock(),
    );
    add_child(
        &image,
        WzNode::from_str("z", WzString::from_str(value), None).into_lock(),
    );
    add_child(&root, image);

    let bytes = repack_archive(&root, WzMapleVersion::BMS, 83).unwrap();

    // the encrypted form of the value appears exactly once
    let keys = Arc::new(std::sync::RwLock::new(
        wz_edit::util::WzMutableKey::from_iv([0; 4]),
    ));
    let encoded = wz_edit::writer::encrypt_str(
        &keys,
        value,
        &wz_edit::writer::wz_string_type_for(value),
    );
    let occurrences = bytes
        .windows(encoded.len())
        .filter(|window| *window == encoded.as_slice())
        .count();
    assert_eq!(occurrences, 1);

    let reparsed = parse_archive(&bytes, None, None).unwrap();
    let image = child(&reparsed, "Strings.img");
    parse_image(&image).unwrap();

    let strings: Vec<String> = image
        .read()
        .unwrap()
        .children
        .iter()
        .map(|node| {
            node.read()
                .unwrap()
                .try_as_string()
                .unwrap()
                .get_string()
                .unwrap()
        })
        .collect();
    assert_eq!(strings, [value, value]);
}

#[test]
fn nested_directories_and_shared_entry_names() {
    let root = new_file_root("Test");

    let outer_image = new_image("A.img");
    add_child(&outer_image, WzNode::from_str("v", 1, None).into_lock());
    add_child(&root, outer_image);

    let sub = new_dir("chapter");
    let inner_image = new_image("A.img");
    add_child(&inner_image, WzNode::from_str("v", 2, None).into_lock());
    add_child(&sub, inner_image);
    add_child(&root, sub);

    let bytes = repack_archive(&root, WzMapleVersion::BMS, 83).unwrap();
    let reparsed = parse_archive(&bytes, None, None).unwrap();

    let outer = child(&reparsed, "A.img");
    parse_image(&outer).unwrap();
    assert_eq!(child(&outer, "v").read().unwrap().try_as_int(), Some(&1));

    let chapter = child(&reparsed, "chapter");
    let inner = child(&chapter, "A.img");
    parse_image(&inner).unwrap();
    assert_eq!(child(&inner, "v").read().unwrap().try_as_int(), Some(&2));

    assert_eq!(
        inner.read().unwrap().get_full_path(),
        "/chapter/A.img"
    );
}

#[test]
fn directory_entries_emit_images_before_subdirectories() {
    let root = new_file_root("Test");
    add_child(&root, new_dir("zdir"));
    let image = new_image("a.img");
    add_child(&image, WzNode::from_str("v", 5, None).into_lock());
    add_child(&root, image);

    let bytes = repack_archive(&root, WzMapleVersion::BMS, 83).unwrap();
    let reparsed = parse_archive(&bytes, None, None).unwrap();

    let names: Vec<String> = reparsed
        .read()
        .unwrap()
        .children
        .iter()
        .map(|node| node.read().unwrap().name.to_string())
        .collect();
    assert_eq!(names, ["a.img", "zdir"]);
}

#[test]
fn empty_subdirectory_is_single_zero_byte() {
    let root = new_file_root("Test");
    add_child(&root, new_dir("sub"));

    let bytes = repack_archive(&root, WzMapleVersion::BMS, 83).unwrap();

    // root block: count, entry ("sub": disc+4-char-string, size, checksum,
    // offset field); the empty subdirectory block is the final byte
    let root_block_len = 1 + (1 + 1 + 3) + 1 + 1 + 4;
    assert_eq!(bytes.len(), WZ_FSTART + 2 + root_block_len + 1);
    assert_eq!(*bytes.last().unwrap(), 0);

    let reparsed = parse_archive(&bytes, None, None).unwrap();
    let sub = child(&reparsed, "sub");
    assert!(sub.read().unwrap().children.is_empty());
}

#[test]
fn unmodified_images_copy_verbatim() {
    let root = new_file_root("Test");
    let stable = new_image("Stable.img");
    add_child(&stable, WzNode::from_str("v", 7, None).into_lock());
    add_child(&root, stable);
    let edited = build_rich_image();
    add_child(&root, Arc::clone(&edited));

    let first = repack_archive(&root, WzMapleVersion::BMS, 83).unwrap();

    let reparsed = parse_archive(&first, None, None).unwrap();
    let image = child(&reparsed, "Rich.img");
    parse_image(&image).unwrap();

    // flip the canvas's modified flag: its image must re-serialize while
    // the untouched one rides the fast path
    child(&image, "icon").write().unwrap().modified = true;

    let second = repack_archive(&reparsed, WzMapleVersion::BMS, 83).unwrap();

    let slice_of = |bytes: &[u8], name: &str| -> (usize, usize) {
        let parsed = parse_archive(bytes, None, None).unwrap();
        let node = child(&parsed, name);
        let read = node.read().unwrap();
        let image = read.try_as_image().unwrap();
        (image.offset, image.block_size)
    };

    let (first_off, first_len) = slice_of(&first, "Stable.img");
    let (second_off, second_len) = slice_of(&second, "Stable.img");
    assert_eq!(first_len, second_len);
    assert_eq!(
        first[first_off..first_off + first_len],
        second[second_off..second_off + second_len]
    );

    // and the edited archive still reads back whole
    let reparsed_second = parse_archive(&second, None, None).unwrap();
    let rich = child(&reparsed_second, "Rich.img");
    parse_image(&rich).unwrap();
    assert_eq!(serialize_xml(&rich), serialize_xml(&image));
}

#[test]
fn fresh_canvas_without_payload_is_refused() {
    let root = new_file_root("Test");
    let image = new_image("Bad.img");
    add_child(
        &image,
        WzNode::from_str("empty_canvas", WzPng::default(), None).into_lock(),
    );
    add_child(&root, image);

    let err = repack_archive(&root, WzMapleVersion::BMS, 83).unwrap_err();
    assert!(matches!(
        err,
        WzSaveError::WriteError(WzWriteError::CanvasPayloadMissing)
    ));
}

#[test]
fn layout_parameter_change_refuses_verbatim_source() {
    let root = new_file_root("Test");
    let image = new_image("Test.img");
    add_child(&image, WzNode::from_str("n", 1, None).into_lock());
    add_child(&root, image);

    let bytes = repack_archive(&root, WzMapleVersion::BMS, 83).unwrap();
    let reparsed = parse_archive(&bytes, None, None).unwrap();

    let source = {
        let read = reparsed.read().unwrap();
        Arc::clone(&read.try_as_file().unwrap().reader)
    };

    // explicit verbatim source with a different patch version
    let err = save_archive(&reparsed, WzMapleVersion::BMS, 84, Some(&source)).unwrap_err();
    assert!(matches!(err, WzSaveError::MismatchedLayoutParameters));

    // without the source everything re-serializes and the new layout works
    let rehashed = save_archive(&reparsed, WzMapleVersion::BMS, 84, None).unwrap();
    let reparsed2 = parse_archive(&rehashed, None, None).unwrap();
    assert_eq!(parsed_file_meta(&reparsed2).patch_version, 84);

    let image = child(&reparsed2, "Test.img");
    parse_image(&image).unwrap();
    assert_eq!(child(&image, "n").read().unwrap().try_as_int(), Some(&1));
}
