use thiserror::Error;

use crate::property::{WzStringParseError, WzSubProperty, WzValue};
use crate::reader::SharedWzMutableKey;
use crate::writer::WzWriter;
use crate::{WzNode, WzNodeArc, WzObjectType};

#[derive(Debug, Error)]
pub enum WzWriteError {
    #[error("modified canvas has no compressed payload to emit")]
    CanvasPayloadMissing,

    #[error("string value unreadable: {0}")]
    StringError(#[from] WzStringParseError),

    #[error("node {0} cannot appear inside an image")]
    UnexpectedNode(String),
}

/// Serialize an image node to its standalone block: 0x73, the
/// `"Property"` marker, a reserved uint16, then the property list.
/// The writer's string cache lives and dies with this one image.
pub fn serialize_image(
    node: &WzNodeArc,
    keys: &SharedWzMutableKey,
) -> Result<Vec<u8>, WzWriteError> {
    let mut writer = WzWriter::new(keys);

    writer.write_wz_string_block("Property", 0x73, 0x1B);
    writer.write_u16(0);

    let read = node.read().unwrap();
    write_property_list(&mut writer, &read.children)?;

    Ok(writer.buf)
}

fn write_property_list(
    writer: &mut WzWriter,
    children: &[WzNodeArc],
) -> Result<(), WzWriteError> {
    writer.write_wz_int(children.len() as i32);

    for child in children {
        let read = child.read().unwrap();
        writer.write_wz_string_block(&read.name, 0x00, 0x01);
        write_property_value(writer, &read)?;
    }

    Ok(())
}

fn write_property_value(writer: &mut WzWriter, node: &WzNode) -> Result<(), WzWriteError> {
    match &node.object_type {
        WzObjectType::Value(WzValue::Null) => writer.write_u8(0),
        WzObjectType::Value(WzValue::Short(v)) => {
            writer.write_u8(2);
            writer.write_i16(*v);
        }
        WzObjectType::Value(WzValue::Int(v)) => {
            writer.write_u8(3);
            writer.write_wz_int(*v);
        }
        WzObjectType::Value(WzValue::Long(v)) => {
            writer.write_u8(20);
            writer.write_wz_int64(*v);
        }
        WzObjectType::Value(WzValue::Float(v)) => {
            writer.write_u8(4);
            if *v == 0.0 {
                writer.write_u8(0);
            } else {
                writer.write_u8(0x80);
                writer.write_float(*v);
            }
        }
        WzObjectType::Value(WzValue::Double(v)) => {
            writer.write_u8(5);
            writer.write_double(*v);
        }
        WzObjectType::Value(WzValue::String(s)) => {
            writer.write_u8(8);
            writer.write_wz_string_block(&s.get_string()?, 0x00, 0x01);
        }
        WzObjectType::Value(WzValue::Vector(_))
        | WzObjectType::Value(WzValue::UOL(_))
        | WzObjectType::Property(_) => {
            writer.write_u8(9);
            let len_pos = writer.pos();
            writer.write_u32(0);

            write_extended_body(writer, node)?;

            let block_len = (writer.pos() - len_pos - 4) as u32;
            writer.patch_u32_at(len_pos, block_len);
        }
        _ => return Err(WzWriteError::UnexpectedNode(node.name.to_string())),
    }

    Ok(())
}

/// The body of an extended property: type-name block, then the concrete
/// layout. Convex children recurse here directly, with no tag or length
/// prefix of their own.
fn write_extended_body(writer: &mut WzWriter, node: &WzNode) -> Result<(), WzWriteError> {
    match &node.object_type {
        WzObjectType::Property(WzSubProperty::Property) => {
            writer.write_wz_string_block("Property", 0x73, 0x1B);
            writer.write_u16(0);
            write_property_list(writer, &node.children)?;
        }
        WzObjectType::Property(WzSubProperty::Convex) => {
            writer.write_wz_string_block("Shape2D#Convex2D", 0x73, 0x1B);
            writer.write_wz_int(node.children.len() as i32);
            for child in node.children.iter() {
                write_extended_body(writer, &child.read().unwrap())?;
            }
        }
        WzObjectType::Property(WzSubProperty::PNG(png)) => {
            writer.write_wz_string_block("Canvas", 0x73, 0x1B);
            writer.write_u8(0);

            if node.children.is_empty() {
                writer.write_u8(0);
            } else {
                writer.write_u8(1);
                writer.write_u16(0);
                write_property_list(writer, &node.children)?;
            }

            writer.write_wz_int(png.width as i32);
            writer.write_wz_int(png.height as i32);
            writer.write_wz_int(png.format1 as i32);
            writer.write_wz_int(png.format2 as i32);
            writer.write_u32(0);

            let blob = png
                .compressed_blob()
                .ok_or(WzWriteError::CanvasPayloadMissing)?;
            writer.write_i32(blob.len() as i32 + 1);
            writer.write_u8(0);
            writer.write_bytes(&blob);
        }
        WzObjectType::Property(WzSubProperty::Sound(sound)) => {
            writer.write_wz_string_block("Sound_DX8", 0x73, 0x1B);
            writer.write_u8(0);

            let body = sound.body();
            writer.write_wz_int(body.len() as i32);
            writer.write_wz_int(sound.duration as i32);
            writer.write_bytes(&sound.header_bytes());
            writer.write_bytes(&body);
        }
        WzObjectType::Value(WzValue::Vector(vec2)) => {
            writer.write_wz_string_block("Shape2D#Vector2D", 0x73, 0x1B);
            writer.write_wz_int(vec2.0);
            writer.write_wz_int(vec2.1);
        }
        WzObjectType::Value(WzValue::UOL(link)) => {
            writer.write_wz_string_block("UOL", 0x73, 0x1B);
            writer.write_u8(0);
            writer.write_wz_string_block(&link.get_string()?, 0x00, 0x01);
        }
        _ => return Err(WzWriteError::UnexpectedNode(node.name.to_string())),
    }

    Ok(())
}
