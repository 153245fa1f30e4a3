use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::property::{WzPng, WzSound, WzString, WzSubProperty, WzValue};
use crate::{reader, WzNode, WzNodeArc, WzNodeArcVec, WzNodeName, WzObjectType, WzReader, WzSliceReader};

#[derive(Debug, Error)]
pub enum WzPropertyParseError {
    #[error("node not found")]
    NodeNotFound,

    #[error("unknown property tag {0}, at position {1}")]
    UnknownPropertyType(u8, usize),

    #[error("unknown extended header type {0}, at position {1}")]
    UnknownExtendedHeaderType(u8, usize),

    #[error("sound header length mismatch, at position {0}")]
    SoundHeaderMismatch(usize),

    #[error("binary reading error: {0}")]
    ReaderError(#[from] reader::Error),
}

/// Bytes of container metadata in front of a sound body, before the
/// 1-byte waveform-extension length.
const SOUND_HEADER_FIXED_LEN: usize = 51;

/// Parse a property list at the cursor: a compressed-int count, then
/// `count` (name, tag, payload) entries. `origin` is the offset base for
/// string-or-offset blocks, the enclosing image's start.
pub fn parse_property_list(
    parent: Option<&WzNodeArc>,
    org_reader: &Arc<WzReader>,
    reader: &WzSliceReader,
    origin: usize,
) -> Result<WzNodeArcVec, WzPropertyParseError> {
    let entry_count = reader.read_wz_int()?;

    let mut childs: WzNodeArcVec = Vec::with_capacity(entry_count.max(0) as usize);

    for _ in 0..entry_count {
        let name: WzNodeName = reader.read_wz_string_block(origin)?.into();
        let tag = reader.read_u8()?;
        if let Some(node) = parse_property_node(name, tag, parent, org_reader, reader, origin)? {
            childs.push(node);
        }
    }

    Ok(childs)
}

/// Parse one tag-dispatched payload. `None` when the entry was an
/// extended property of an unknown type, which is skipped whole.
pub fn parse_property_node(
    name: WzNodeName,
    tag: u8,
    parent: Option<&WzNodeArc>,
    org_reader: &Arc<WzReader>,
    reader: &WzSliceReader,
    origin: usize,
) -> Result<Option<WzNodeArc>, WzPropertyParseError> {
    let node = match tag {
        0 => WzNode::new(&name, WzObjectType::Value(WzValue::Null), parent).into_lock(),
        2 | 11 => WzNode::new(&name, reader.read_i16()?, parent).into_lock(),
        3 | 19 => WzNode::new(&name, reader.read_wz_int()?, parent).into_lock(),
        20 => WzNode::new(&name, reader.read_wz_int64()?, parent).into_lock(),
        4 => {
            let float_flag: u8 = reader.read_u8()?;
            let value = match float_flag {
                0x80 => reader.read_float()?,
                _ => 0.0,
            };
            WzNode::new(&name, value, parent).into_lock()
        }
        5 => WzNode::new(&name, reader.read_double()?, parent).into_lock(),
        8 => {
            let meta = reader.read_wz_string_block_meta(origin)?;
            WzNode::new(&name, WzString::from_meta(meta, org_reader), parent).into_lock()
        }
        9 => {
            let block_size = reader.read_u32()?;
            let block_end = reader.pos.get() + block_size as usize;

            let node = parse_extended_prop(parent, org_reader, reader, block_end, origin, name)?;

            // the recorded end is authoritative no matter where the
            // sub-parser stopped
            reader.seek(block_end);

            return Ok(node);
        }
        _ => {
            return Err(WzPropertyParseError::UnknownPropertyType(
                tag,
                reader.pos.get(),
            ));
        }
    };

    Ok(Some(node))
}

/// Parse an extended property after its length prefix: a discriminated
/// type-name string selects the concrete layout.
pub fn parse_extended_prop(
    parent: Option<&WzNodeArc>,
    org_reader: &Arc<WzReader>,
    reader: &WzSliceReader,
    block_end: usize,
    origin: usize,
    property_name: WzNodeName,
) -> Result<Option<WzNodeArc>, WzPropertyParseError> {
    let type_discriminator = reader.read_u8()?;
    let extend_property_type = match type_discriminator {
        0 | 0x73 => reader.read_wz_string()?,
        1 | 0x1B => {
            let append = reader.read_i32()?;
            reader.read_wz_string_at_offset(origin + append as usize)?
        }
        other => {
            return Err(WzPropertyParseError::UnknownExtendedHeaderType(
                other,
                reader.pos.get(),
            ));
        }
    };

    match extend_property_type.as_str() {
        "Property" => {
            let node = WzNode::new(
                &property_name,
                WzObjectType::Property(WzSubProperty::Property),
                parent,
            )
            .into_lock();

            reader.skip(2);
            let childs = parse_property_list(Some(&node), org_reader, reader, origin)?;
            node.write().unwrap().children = childs;

            Ok(Some(node))
        }
        "Canvas" => {
            reader.skip(1);
            let has_child = reader.read_u8()? == 1;

            let node = WzNode::new(
                &property_name,
                WzObjectType::Property(WzSubProperty::Property),
                parent,
            )
            .into_lock();

            if has_child {
                reader.skip(2);
                let childs = parse_property_list(Some(&node), org_reader, reader, origin)?;
                node.write().unwrap().children = childs;
            }

            let width = reader.read_wz_int()?;
            let height = reader.read_wz_int()?;
            let format_low = reader.read_wz_int()?;
            let format_high = reader.read_wz_int()?;
            reader.skip(4);
            let payload_size = (reader.read_i32()? - 1) as usize;
            reader.skip(1);
            let payload_offset = reader.pos.get();

            let png = WzPng::new(
                org_reader,
                (width as u32, height as u32),
                (format_low as u32, format_high as u32),
                (payload_offset, payload_size),
            );
            node.write().unwrap().object_type = png.into();

            reader.seek(payload_offset + payload_size);

            Ok(Some(node))
        }
        "Shape2D#Vector2D" => {
            let vec2 = crate::property::Vector2D(reader.read_wz_int()?, reader.read_wz_int()?);
            Ok(Some(WzNode::new(&property_name, vec2, parent).into_lock()))
        }
        "Shape2D#Convex2D" => {
            let node = WzNode::new(
                &property_name,
                WzObjectType::Property(WzSubProperty::Convex),
                parent,
            )
            .into_lock();

            let entry_count = reader.read_wz_int()?;
            let mut childs = Vec::with_capacity(entry_count.max(0) as usize);
            for i in 0..entry_count {
                // convex children are bare extended bodies, no tag or
                // length prefix of their own
                let child_name: WzNodeName = i.to_string().into();
                if let Some(child) = parse_extended_prop(
                    Some(&node),
                    org_reader,
                    reader,
                    block_end,
                    origin,
                    child_name,
                )? {
                    childs.push(child);
                }
            }
            node.write().unwrap().children = childs;

            Ok(Some(node))
        }
        "Sound_DX8" => {
            reader.skip(1);
            let data_size = reader.read_wz_int()? as usize;
            let duration = reader.read_wz_int()? as u32;

            let header_offset = reader.pos.get();
            if block_end > reader.get_size() {
                return Err(WzPropertyParseError::SoundHeaderMismatch(header_offset));
            }
            let data_offset = block_end
                .checked_sub(data_size)
                .ok_or(WzPropertyParseError::SoundHeaderMismatch(header_offset))?;
            let header_size = data_offset
                .checked_sub(header_offset)
                .ok_or(WzPropertyParseError::SoundHeaderMismatch(header_offset))?;

            // 51 fixed bytes, a length byte, then that many extension bytes
            let ext_len = reader
                .read_u8_at(header_offset + SOUND_HEADER_FIXED_LEN)
                .map_err(|_| WzPropertyParseError::SoundHeaderMismatch(header_offset))?;
            if SOUND_HEADER_FIXED_LEN + 1 + ext_len as usize != header_size {
                return Err(WzPropertyParseError::SoundHeaderMismatch(header_offset));
            }

            let sound = WzSound::new(
                org_reader,
                data_offset,
                data_size as u32,
                header_offset,
                header_size,
                duration,
            );

            reader.seek(block_end);

            Ok(Some(WzNode::new(&property_name, sound, parent).into_lock()))
        }
        "UOL" => {
            reader.skip(1);
            let meta = reader.read_wz_string_block_meta(origin)?;
            let node = WzNode::new(
                &property_name,
                WzObjectType::Value(WzValue::UOL(WzString::from_meta(meta, org_reader))),
                parent,
            );

            Ok(Some(node.into_lock()))
        }
        other => {
            warn!(
                name = %property_name,
                extended_type = other,
                pos = reader.pos.get(),
                "unknown extended property type skipped"
            );
            reader.seek(block_end);
            Ok(None)
        }
    }
}

/// Walk the raw property stream for a single path without building
/// intermediate nodes, skipping non-matching payloads by their recorded
/// sizes.
pub fn get_node(
    path: &str,
    org_reader: &Arc<WzReader>,
    reader: &WzSliceReader,
    origin: usize,
) -> Result<WzNodeArc, WzPropertyParseError> {
    if path.is_empty() {
        return Err(WzPropertyParseError::NodeNotFound);
    }

    let mut pathes = path.split('/');
    let mut current_path = pathes.next();

    while let Some(current_name) = current_path {
        let entry_count = reader.read_wz_int()?;
        let next_path = pathes.next();
        let mut descended = false;

        for _ in 0..entry_count {
            let name = reader.read_wz_string_block(origin)?;
            let tag = reader.read_u8()?;

            if name.eq_ignore_ascii_case(current_name) && next_path.is_none() {
                return parse_property_node(name.into(), tag, None, org_reader, reader, origin)?
                    .ok_or(WzPropertyParseError::NodeNotFound);
            }

            match tag {
                0 => { /* no payload */ }
                2 | 11 => reader.skip(2),
                3 | 19 => {
                    reader.read_wz_int()?;
                }
                20 => {
                    reader.read_wz_int64()?;
                }
                4 => {
                    if reader.read_u8()? == 0x80 {
                        reader.skip(4);
                    }
                }
                5 => reader.skip(8),
                8 => {
                    reader.read_wz_string_block_meta(origin)?;
                }
                9 => {
                    if name.eq_ignore_ascii_case(current_name) {
                        current_path = next_path;
                        reader.skip(4);
                        // step over the type name and reserved bytes into
                        // the nested list
                        reader.read_wz_string_block_meta(origin)?;
                        reader.skip(2);
                        descended = true;
                        break;
                    }
                    let block_size = reader.read_u32()?;
                    reader.skip(block_size as usize);
                }
                _ => {
                    return Err(WzPropertyParseError::UnknownPropertyType(
                        tag,
                        reader.pos.get(),
                    ));
                }
            }
        }

        if !descended {
            break;
        }
    }

    Err(WzPropertyParseError::NodeNotFound)
}
