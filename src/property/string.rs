use std::sync::Arc;

use crate::{reader, WzReader};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WzStringParseError {
    #[error("error parsing WzString: {0}")]
    ParseError(#[from] reader::Error),

    #[error("not a String property")]
    NotStringProperty,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WzStringType {
    Ascii,
    Unicode,
    Empty,
}

/// Where an encrypted string lives inside the source buffer.
#[derive(Debug, Clone)]
pub struct WzStringMeta {
    /// start of the character data (after the length prefix)
    pub offset: usize,
    /// byte length of the character data
    pub length: u32,
    pub string_type: WzStringType,
}

impl WzStringMeta {
    pub fn empty() -> Self {
        Self {
            offset: 0,
            length: 0,
            string_type: WzStringType::Empty,
        }
    }
    pub fn new_ascii(offset: usize, length: u32) -> Self {
        Self {
            offset,
            length,
            string_type: WzStringType::Ascii,
        }
    }
    pub fn new_unicode(offset: usize, length: u32) -> Self {
        Self {
            offset,
            length,
            string_type: WzStringType::Unicode,
        }
    }
}

#[derive(Debug, Clone)]
enum WzStringInner {
    /// still sitting encrypted in the source buffer
    Lazy {
        reader: Arc<WzReader>,
        meta: WzStringMeta,
    },
    /// decoded, or born in the editor
    Owned(String),
}

/// A string value, decoded from its archive slice on first use.
#[derive(Debug, Clone)]
pub struct WzString {
    inner: WzStringInner,
}

impl WzString {
    pub fn from_meta(meta: WzStringMeta, reader: &Arc<WzReader>) -> Self {
        Self {
            inner: WzStringInner::Lazy {
                reader: Arc::clone(reader),
                meta,
            },
        }
    }
    pub fn from_str(s: &str) -> Self {
        Self {
            inner: WzStringInner::Owned(s.to_string()),
        }
    }

    /// Decode the string value.
    pub fn get_string(&self) -> Result<String, WzStringParseError> {
        match &self.inner {
            WzStringInner::Owned(s) => Ok(s.clone()),
            WzStringInner::Lazy { reader, meta } => reader
                .resolve_wz_string_meta(&meta.string_type, meta.offset, meta.length as usize)
                .map_err(WzStringParseError::from),
        }
    }

    /// Replace the value with an owned string; the archive slice is
    /// forgotten.
    pub fn set_string(&mut self, s: &str) {
        self.inner = WzStringInner::Owned(s.to_string());
    }
}

impl From<&str> for WzString {
    fn from(s: &str) -> Self {
        WzString::from_str(s)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_owned_string() {
        let mut s = WzString::from_str("hello");
        assert_eq!(s.get_string().unwrap(), "hello");

        s.set_string("world");
        assert_eq!(s.get_string().unwrap(), "world");
    }
}
