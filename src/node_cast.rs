use crate::property::{Vector2D, WzPng, WzSound, WzString, WzSubProperty, WzValue};
use crate::{WzDirectory, WzFile, WzImage, WzNode, WzObjectType};

/// Casting a `WzNode` to its inner type.
///
/// # Example
///
/// ```
/// # use wz_edit::{WzNode, WzNodeCast};
/// let wz_int = WzNode::from_str("test", 1, None);
///
/// assert!(wz_int.try_as_int().is_some());
/// assert!(wz_int.try_as_file().is_none());
/// ```
pub trait WzNodeCast {
    fn try_as_file(&self) -> Option<&WzFile>;
    fn try_as_directory(&self) -> Option<&WzDirectory>;
    fn try_as_image(&self) -> Option<&WzImage>;

    fn try_as_png(&self) -> Option<&WzPng>;
    fn try_as_png_mut(&mut self) -> Option<&mut WzPng>;
    fn try_as_sound(&self) -> Option<&WzSound>;
    fn try_as_string(&self) -> Option<&WzString>;

    fn is_sub_property(&self) -> bool;
    fn is_convex(&self) -> bool;
    fn is_null(&self) -> bool;

    fn try_as_vector2d(&self) -> Option<&Vector2D>;
    fn try_as_short(&self) -> Option<&i16>;
    fn try_as_int(&self) -> Option<&i32>;
    fn try_as_long(&self) -> Option<&i64>;
    fn try_as_float(&self) -> Option<&f32>;
    fn try_as_double(&self) -> Option<&f64>;
    fn try_as_uol(&self) -> Option<&WzString>;
}

macro_rules! try_as {
    ($func_name:ident, $variant:ident, $result:ty) => {
        fn $func_name(&self) -> Option<&$result> {
            match &self.object_type {
                WzObjectType::$variant(inner) => Some(inner),
                _ => None,
            }
        }
    };
}

macro_rules! try_as_wz_value {
    ($func_name:ident, $variant:ident, $result:ident) => {
        fn $func_name(&self) -> Option<&$result> {
            match &self.object_type {
                WzObjectType::Value(WzValue::$variant(inner)) => Some(inner),
                _ => None,
            }
        }
    };
}

impl WzNodeCast for WzNode {
    try_as!(try_as_file, File, WzFile);
    try_as!(try_as_directory, Directory, WzDirectory);
    try_as!(try_as_image, Image, WzImage);

    fn try_as_png(&self) -> Option<&WzPng> {
        match &self.object_type {
            WzObjectType::Property(WzSubProperty::PNG(png)) => Some(png),
            _ => None,
        }
    }
    fn try_as_png_mut(&mut self) -> Option<&mut WzPng> {
        match &mut self.object_type {
            WzObjectType::Property(WzSubProperty::PNG(png)) => Some(png),
            _ => None,
        }
    }
    fn try_as_sound(&self) -> Option<&WzSound> {
        match &self.object_type {
            WzObjectType::Property(WzSubProperty::Sound(sound)) => Some(sound),
            _ => None,
        }
    }

    fn is_sub_property(&self) -> bool {
        matches!(
            self.object_type,
            WzObjectType::Property(WzSubProperty::Property)
        )
    }
    fn is_convex(&self) -> bool {
        matches!(
            self.object_type,
            WzObjectType::Property(WzSubProperty::Convex)
        )
    }
    fn is_null(&self) -> bool {
        matches!(self.object_type, WzObjectType::Value(WzValue::Null))
    }

    try_as_wz_value!(try_as_string, String, WzString);
    try_as_wz_value!(try_as_uol, UOL, WzString);
    try_as_wz_value!(try_as_vector2d, Vector, Vector2D);
    try_as_wz_value!(try_as_short, Short, i16);
    try_as_wz_value!(try_as_int, Int, i32);
    try_as_wz_value!(try_as_long, Long, i64);
    try_as_wz_value!(try_as_float, Float, f32);
    try_as_wz_value!(try_as_double, Double, f64);
}
