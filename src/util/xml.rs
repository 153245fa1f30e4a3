use base64::{engine::general_purpose, Engine as _};
use tracing::warn;

use crate::property::{WzSubProperty, WzValue};
use crate::{WzNodeArc, WzObjectType};

pub const XML_PROLOG: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;

/// Project a subtree to its XML text form. Undecodable payloads drop
/// their data attributes with a warning; the projection itself never
/// fails.
pub fn serialize_xml(node: &WzNodeArc) -> String {
    let mut out = String::from(XML_PROLOG);
    out.push('\n');
    write_node(&mut out, node, 0);
    out
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Float attributes always carry a decimal point.
fn decimal_attr(value: f64) -> String {
    let mut s = value.to_string();
    if !s.contains('.') {
        s.push_str(".0");
    }
    s
}

fn open_tag(out: &mut String, depth: usize, body: &str, close: bool) {
    for _ in 0..depth {
        out.push_str("  ");
    }
    out.push('<');
    out.push_str(body);
    if close {
        out.push('/');
    }
    out.push_str(">\n");
}

fn close_tag(out: &mut String, depth: usize, element: &str) {
    for _ in 0..depth {
        out.push_str("  ");
    }
    out.push_str("</");
    out.push_str(element);
    out.push_str(">\n");
}

fn write_children(out: &mut String, node: &WzNodeArc, depth: usize) {
    for child in node.read().unwrap().children.iter() {
        write_node(out, child, depth);
    }
}

fn write_node(out: &mut String, node: &WzNodeArc, depth: usize) {
    let (name, object_type) = {
        let read = node.read().unwrap();
        (escape(&read.name), read.object_type.clone())
    };

    match &object_type {
        WzObjectType::File(_) | WzObjectType::Directory(_) | WzObjectType::Image(_) => {
            open_tag(out, depth, &format!(r#"imgdir name="{name}""#), false);
            write_children(out, node, depth + 1);
            close_tag(out, depth, "imgdir");
        }
        WzObjectType::Property(WzSubProperty::Property) => {
            open_tag(out, depth, &format!(r#"imgdir name="{name}""#), false);
            write_children(out, node, depth + 1);
            close_tag(out, depth, "imgdir");
        }
        WzObjectType::Property(WzSubProperty::Convex) => {
            open_tag(out, depth, &format!(r#"extended name="{name}""#), false);
            write_children(out, node, depth + 1);
            close_tag(out, depth, "extended");
        }
        WzObjectType::Property(WzSubProperty::PNG(png)) => {
            let mut body = format!(
                r#"canvas name="{name}" width="{}" height="{}""#,
                png.width, png.height
            );
            match png.extract_png() {
                Ok(png_bytes) => {
                    body.push_str(&format!(
                        r#" basedata="{}""#,
                        general_purpose::STANDARD.encode(png_bytes)
                    ));
                }
                Err(e) => warn!(name = %name, error = %e, "canvas payload not exported"),
            }

            let has_children = !node.read().unwrap().children.is_empty();
            open_tag(out, depth, &body, !has_children);
            if has_children {
                write_children(out, node, depth + 1);
                close_tag(out, depth, "canvas");
            }
        }
        WzObjectType::Property(WzSubProperty::Sound(sound)) => {
            let mut body = format!(r#"sound name="{name}" length="{}""#, sound.duration);

            let header = sound.header_bytes();
            if !header.is_empty() {
                body.push_str(&format!(
                    r#" basehead="{}""#,
                    general_purpose::STANDARD.encode(header.as_ref())
                ));
            }
            let data = sound.body();
            if !data.is_empty() {
                body.push_str(&format!(
                    r#" basedata="{}""#,
                    general_purpose::STANDARD.encode(data.as_ref())
                ));
            }
            open_tag(out, depth, &body, true);
        }
        WzObjectType::Value(value) => write_value(out, depth, &name, value),
    }
}

fn write_value(out: &mut String, depth: usize, name: &str, value: &WzValue) {
    let body = match value {
        WzValue::Null => format!(r#"null name="{name}""#),
        WzValue::Short(v) => format!(r#"short name="{name}" value="{v}""#),
        WzValue::Int(v) => format!(r#"int name="{name}" value="{v}""#),
        WzValue::Long(v) => format!(r#"long name="{name}" value="{v}""#),
        WzValue::Float(v) => {
            format!(r#"float name="{name}" value="{}""#, decimal_attr(*v as f64))
        }
        WzValue::Double(v) => format!(r#"double name="{name}" value="{}""#, decimal_attr(*v)),
        WzValue::String(s) => {
            let value = s.get_string().unwrap_or_else(|e| {
                warn!(name = %name, error = %e, "string value unreadable");
                String::new()
            });
            format!(r#"string name="{name}" value="{}""#, escape(&value))
        }
        WzValue::UOL(link) => {
            let value = link.get_string().unwrap_or_else(|e| {
                warn!(name = %name, error = %e, "uol target unreadable");
                String::new()
            });
            format!(r#"uol name="{name}" value="{}""#, escape(&value))
        }
        WzValue::Vector(vec2) => {
            format!(r#"vector name="{name}" x="{}" y="{}""#, vec2.0, vec2.1)
        }
    };
    open_tag(out, depth, &body, true);
}
