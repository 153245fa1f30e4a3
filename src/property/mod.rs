pub mod png;
pub mod sound;
pub mod string;
pub mod vector;

pub use png::*;
pub use sound::*;
pub use string::*;
pub use vector::*;

/// Container-shaped properties: they may own children.
#[derive(Debug, Clone)]
pub enum WzSubProperty {
    /// a named sub-property list
    Property,
    /// a polyline whose children are all vectors
    Convex,
    PNG(Box<WzPng>),
    Sound(Box<WzSound>),
}

/// Leaf property values.
#[derive(Debug, Clone)]
pub enum WzValue {
    Null,
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(WzString),
    /// symbolic link by relative path; resolving it never mutates the tree
    UOL(WzString),
    Vector(Vector2D),
}
