//! Anchoring: durable references from annotations to page elements

pub mod codec;
pub mod models;
pub mod resolver;

pub use codec::SelectorCodec;
pub use models::{parse_px, AnchorReference, Offset, Position, BODY_SELECTOR};
pub use resolver::AnchorResolver;
