use crate::error::{Result, StreamError};
use crate::node::{Stanza, StanzaChild, StreamMetadata, STREAM_NAMESPACE, XML_NAMESPACE};
use crate::reader::{ByteSource, Element, XmlEvent, XmlReader};
use chrono::Utc;
use log::debug;
use std::str::FromStr;

/// Streaming decoder for one directional byte channel: the stream
/// opening plus a lazy, forward-only sequence of stanzas. Never needs
/// the whole document in memory.
///
/// Lifecycle: unattached → attached (`attach`) → stream started
/// (`read_opening`) → stanzas (`next_stanza` in a loop) → detached or
/// closed. A detached codec can be re-attached, which is how in-band
/// stream resets after a security-layer upgrade work: the captured
/// [`StreamMetadata`] survives `attach` and is only replaced by the
/// next `read_opening`.
pub struct StanzaCodec {
    reader: Option<XmlReader>,
    metadata: StreamMetadata,
    last_receive_ms: i64,
    trace_enabled: bool,
    stream_depth: usize,
}

impl Default for StanzaCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl StanzaCodec {
    pub fn new() -> Self {
        Self {
            reader: None,
            metadata: StreamMetadata::default(),
            last_receive_ms: Utc::now().timestamp_millis(),
            trace_enabled: false,
            stream_depth: 0,
        }
    }

    /// Whether decoded stanzas are replayed to the trace log.
    pub fn trace_enabled(&self) -> bool {
        self.trace_enabled
    }

    pub fn set_trace_enabled(&mut self, enabled: bool) {
        self.trace_enabled = enabled;
    }

    /// Bind a new underlying byte source. Previously captured stream
    /// metadata is kept; stream resets re-read it via `read_opening`.
    pub fn attach(&mut self, source: Box<dyn ByteSource>) {
        debug!(target: "StanzaCodec", "attach");
        self.reader = Some(XmlReader::new(source));
        self.stream_depth = 0;
    }

    /// Release the parser and source without closing the underlying
    /// channel, ahead of re-attaching a fresh secured channel.
    pub fn detach(&mut self) {
        self.reader = None;
    }

    /// Release the parser and close the underlying channel. Idempotent:
    /// closing twice, or closing a detached codec, is a no-op.
    pub fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            let mut source = reader.into_source();
            if let Err(e) = source.close_channel() {
                debug!(target: "StanzaCodec", "close: {e}");
            }
        }
    }

    /// True once `close` or `detach` has been called (or before the
    /// first `attach`).
    pub fn is_closed(&self) -> bool {
        self.reader.is_none()
    }

    pub fn metadata(&self) -> &StreamMetadata {
        &self.metadata
    }

    /// Unix timestamp (milliseconds) of the last successful receive.
    pub fn last_receive_ms(&self) -> i64 {
        self.last_receive_ms
    }

    /// Consume the initial open tag and capture the declared stream
    /// attributes. Anything but the well-known stream element in the
    /// stream namespace is a malformed stream.
    pub fn read_opening(&mut self) -> Result<&StreamMetadata> {
        let reader = self.reader.as_mut().ok_or(StreamError::NotAttached)?;
        debug!(target: "StanzaCodec", "receiving stream start");

        let element = loop {
            match reader.next_event() {
                Ok(XmlEvent::Text(t)) if t.trim().is_empty() => continue,
                Ok(XmlEvent::Start(el)) => break el,
                Ok(XmlEvent::Text(_)) => {
                    return Err(StreamError::MalformedStream(
                        "text before stream opening".into(),
                    ));
                }
                Ok(XmlEvent::End(name)) => {
                    return Err(StreamError::MalformedStream(format!(
                        "end tag </{name}> before stream opening"
                    )));
                }
                Err(e @ StreamError::Transport(_)) => return Err(e),
                Err(e) => return Err(StreamError::MalformedStream(e.to_string())),
            }
        };

        if element.name != "stream" || element.namespace != STREAM_NAMESPACE {
            return Err(StreamError::MalformedStream(format!(
                "expected stream open, found <{}> in namespace '{}'",
                element.name, element.namespace
            )));
        }

        // A valid stream start replaces the previous metadata.
        let mut metadata = StreamMetadata::default();
        for attr in &element.attrs {
            // Unprefixed attributes on the open tag count as declared
            // in the stream namespace.
            let namespace = if attr.namespace.is_empty() {
                element.namespace.as_str()
            } else {
                attr.namespace.as_str()
            };
            if namespace == XML_NAMESPACE && attr.name == "lang" {
                metadata.language = Some(attr.value.clone());
                continue;
            }
            if namespace != STREAM_NAMESPACE {
                debug!(
                    target: "StanzaCodec",
                    "unknown stream attribute namespace {} containing {}",
                    namespace, attr.name
                );
                continue;
            }
            match attr.name.as_str() {
                "version" => metadata.version = Some(attr.value.clone()),
                "from" => metadata.from = Some(attr.value.clone()),
                "to" => metadata.to = Some(attr.value.clone()),
                "id" => metadata.id = Some(attr.value.clone()),
                other => {
                    debug!(target: "StanzaCodec", "unknown stream attribute {other}");
                }
            }
        }
        self.metadata = metadata;
        self.stream_depth = reader.depth();
        debug!(target: "StanzaCodec", "stream started");
        Ok(&self.metadata)
    }

    /// Decode exactly one top-level child element. Structural failures
    /// are recoverable ([`StreamError::MalformedStanza`]); I/O and
    /// reader-corruption failures are fatal ([`StreamError::Transport`]).
    pub fn next_stanza(&mut self) -> Result<Stanza> {
        let trace = self.trace_enabled;
        let reader = self.reader.as_mut().ok_or(StreamError::NotAttached)?;
        loop {
            match reader.next_event()? {
                XmlEvent::Text(t) if t.trim().is_empty() => continue,
                XmlEvent::Text(_) => {
                    return Err(StreamError::MalformedStanza(
                        "stray text between stanzas".into(),
                    ));
                }
                XmlEvent::End(name) => {
                    return Err(StreamError::MalformedStanza(format!(
                        "stream closed by peer (</{name}>)"
                    )));
                }
                XmlEvent::Start(el) => {
                    let stanza = read_element_tree(reader, el)?;
                    self.last_receive_ms = Utc::now().timestamp_millis();
                    if trace {
                        debug!(target: "StanzaCodec", "stanza: {stanza}");
                    }
                    return Ok(stanza);
                }
            }
        }
    }

    /// Skip forward until the reader is back at top-of-stream depth —
    /// the resync point after a malformed stanza.
    pub fn resync(&mut self) -> Result<()> {
        let depth = self.stream_depth;
        let reader = self.reader.as_mut().ok_or(StreamError::NotAttached)?;
        reader.skip_to_depth(depth)
    }
}

/// Build the stanza tree rooted at an already-consumed start tag.
fn read_element_tree(reader: &mut XmlReader, root: Element) -> Result<Stanza> {
    let mut stanza = Stanza {
        name: root.name,
        namespace: root.namespace,
        attrs: root.attrs,
        children: Vec::new(),
        via: None,
    };
    if root.self_closing {
        return Ok(stanza);
    }
    loop {
        match reader.next_event()? {
            XmlEvent::Start(el) => {
                let child = read_element_tree(reader, el)?;
                stanza.children.push(StanzaChild::Element(child));
            }
            XmlEvent::Text(t) => {
                if !t.is_empty() {
                    stanza.children.push(StanzaChild::Text(t));
                }
            }
            XmlEvent::End(_) => return Ok(stanza),
        }
    }
}

impl FromStr for Stanza {
    type Err = StreamError;

    /// Parse one standalone element, outside of stream framing. Mostly
    /// useful for fixtures and canned payloads.
    fn from_str(s: &str) -> Result<Stanza> {
        let mut reader = XmlReader::new(Box::new(std::io::Cursor::new(s.as_bytes().to_vec())));
        loop {
            match reader.next_event()? {
                XmlEvent::Text(t) if t.trim().is_empty() => continue,
                XmlEvent::Start(el) => return read_element_tree(&mut reader, el),
                _ => {
                    return Err(StreamError::MalformedStanza(
                        "expected a single element".into(),
                    ));
                }
            }
        }
    }
}
