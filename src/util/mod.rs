pub mod maple_crypto_constants;
pub mod node_util;
pub mod parse_property;
pub mod repack;
pub mod version;
pub mod walk;
pub mod write_property;
pub mod wz_mutable_key;
pub mod xml;

pub use node_util::*;
pub use parse_property::*;
pub use repack::*;
pub use walk::*;
pub use write_property::*;
pub use wz_mutable_key::*;
pub use xml::*;
