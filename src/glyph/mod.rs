//! Component C3: decodes Glyph v1/v2 CBOR metadata into a typed
//! `TokenDescriptor`.

pub mod decode;
pub mod descriptor;

pub use decode::decode;
pub use descriptor::{TokenDescriptor, TokenType};
