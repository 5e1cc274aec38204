//! Streaming XML stanza codec: the data model and forward-only decoder
//! for a stanza-over-stream messaging protocol, with no I/O policy of
//! its own beyond `std::io::Read`.

pub mod builder;
pub mod codec;
pub mod error;
pub mod jid;
pub mod node;
mod reader;
mod xml;

pub use builder::StanzaBuilder;
pub use codec::StanzaCodec;
pub use error::{Result, StreamError};
pub use node::{Attribute, Stanza, StanzaChild, StreamMetadata, STREAM_NAMESPACE, XML_NAMESPACE};
pub use reader::ByteSource;
