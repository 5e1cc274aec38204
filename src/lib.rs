//! Client-side engine for a streaming XML messaging protocol: stanza
//! framing, strict command ordering against one shared connection,
//! connection/authentication lifecycle with adaptive beacon throttling,
//! and reduction of presence notifications into persisted contact state.
//!
//! Screens, adapters and storage schemas live elsewhere; this crate
//! only exposes the traits they plug into ([`store`], [`notify`],
//! [`beacon::DiagnosticSampler`], [`session::StanzaListener`]).

pub use chirp_xml as xml;

pub mod beacon;
pub mod channels;
pub mod command_queue;
pub mod config;
pub mod error;
pub mod notify;
pub mod presence;
pub mod session;
pub mod store;
pub mod transport;

pub use command_queue::CommandQueue;
pub use config::SessionConfig;
pub use error::{Result, SessionError};
pub use session::{ConnectionSession, SessionState, StanzaListener};
