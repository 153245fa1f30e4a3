use std::fmt::Display;
use std::ops::Deref;
use std::sync::Arc;

/// A cheaply clonable node name. Lookup is case-insensitive, storage is
/// case-preserving.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WzNodeName(Arc<str>);

impl Default for WzNodeName {
    fn default() -> Self {
        WzNodeName(Arc::from(""))
    }
}

impl From<&str> for WzNodeName {
    fn from(s: &str) -> Self {
        WzNodeName(Arc::from(s))
    }
}

impl From<String> for WzNodeName {
    fn from(s: String) -> Self {
        WzNodeName(Arc::from(s))
    }
}

impl Deref for WzNodeName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for WzNodeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl WzNodeName {
    pub fn new(s: &str) -> Self {
        s.into()
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
    /// The lookup equivalence: ASCII case folded.
    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}
