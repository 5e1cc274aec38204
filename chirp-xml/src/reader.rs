use crate::error::{Result, StreamError};
use crate::node::{Attribute, XML_NAMESPACE};
use std::collections::HashMap;
use std::io::Read;

const READ_BUF_SIZE: usize = 4096;
const MAX_DEPTH: usize = 64;
const MAX_ENTITY_LEN: usize = 10;

/// A byte channel the codec can read from and, during cleanup, close.
pub trait ByteSource: Read + Send {
    /// Close the underlying channel. In-memory sources have nothing to
    /// close, so the default is a no-op.
    fn close_channel(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<T: AsRef<[u8]> + Send> ByteSource for std::io::Cursor<T> {}

/// Incremental UTF-8 decoder over a byte source. Pulls one block at a
/// time; never holds more than the read-ahead buffer.
struct Utf8Source {
    inner: Box<dyn ByteSource>,
    buf: [u8; READ_BUF_SIZE],
    pos: usize,
    len: usize,
}

impl Utf8Source {
    fn new(inner: Box<dyn ByteSource>) -> Self {
        Self {
            inner,
            buf: [0; READ_BUF_SIZE],
            pos: 0,
            len: 0,
        }
    }

    fn into_inner(self) -> Box<dyn ByteSource> {
        self.inner
    }

    fn next_byte(&mut self) -> Result<Option<u8>> {
        if self.pos > self.len {
            // Buffer indices can no longer be trusted.
            return Err(StreamError::Transport(
                "reader buffer position out of bounds".into(),
            ));
        }
        if self.pos == self.len {
            self.len = self
                .inner
                .read(&mut self.buf)
                .map_err(|e| StreamError::Transport(e.to_string()))?;
            self.pos = 0;
            if self.len == 0 {
                return Ok(None);
            }
        }
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(Some(b))
    }

    /// Decode exactly one character. `Ok(None)` on end of stream at a
    /// character boundary; a truncated sequence is a transport error.
    fn next_char(&mut self) -> Result<Option<char>> {
        let first = match self.next_byte()? {
            Some(b) => b,
            None => return Ok(None),
        };
        let width = match first {
            0x00..=0x7f => return Ok(Some(first as char)),
            0xc0..=0xdf => 2,
            0xe0..=0xef => 3,
            0xf0..=0xf7 => 4,
            _ => {
                return Err(StreamError::MalformedStanza(
                    "invalid utf-8 byte in stream".into(),
                ));
            }
        };
        let mut bytes = [first, 0, 0, 0];
        for slot in bytes.iter_mut().take(width).skip(1) {
            *slot = self.next_byte()?.ok_or_else(|| {
                StreamError::Transport("stream ended inside utf-8 sequence".into())
            })?;
        }
        match std::str::from_utf8(&bytes[..width]) {
            Ok(s) => Ok(s.chars().next()),
            Err(_) => Err(StreamError::MalformedStanza(
                "invalid utf-8 sequence in stream".into(),
            )),
        }
    }
}

/// One resolved start tag.
#[derive(Debug)]
pub(crate) struct Element {
    pub name: String,
    pub namespace: String,
    pub attrs: Vec<Attribute>,
    pub self_closing: bool,
}

#[derive(Debug)]
pub(crate) enum XmlEvent {
    Start(Element),
    End(String),
    Text(String),
}

#[derive(Default)]
struct Scope {
    default_ns: Option<String>,
    prefixes: HashMap<String, String>,
}

struct RawAttribute {
    prefix: Option<String>,
    name: String,
    value: String,
}

/// Streaming, forward-only pull reader. Comments, processing
/// instructions and the XML declaration are consumed silently; DOCTYPE
/// is rejected. Namespace prefixes are scoped per open element, with
/// the `xml` prefix built in.
pub(crate) struct XmlReader {
    src: Utf8Source,
    peeked: Option<char>,
    /// Qualified names of the currently open elements.
    stack: Vec<String>,
    scopes: Vec<Scope>,
}

impl XmlReader {
    pub(crate) fn new(source: Box<dyn ByteSource>) -> Self {
        Self {
            src: Utf8Source::new(source),
            peeked: None,
            stack: Vec::new(),
            scopes: Vec::new(),
        }
    }

    pub(crate) fn into_source(self) -> Box<dyn ByteSource> {
        self.src.into_inner()
    }

    pub(crate) fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Consume events until the reader is back at `depth` open
    /// elements. Recoverable stanza errors are swallowed; transport
    /// errors abort the skip.
    pub(crate) fn skip_to_depth(&mut self, depth: usize) -> Result<()> {
        while self.depth() > depth {
            match self.next_event() {
                Ok(_) => {}
                Err(e) if e.is_recoverable() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn next_char(&mut self) -> Result<Option<char>> {
        if let Some(c) = self.peeked.take() {
            return Ok(Some(c));
        }
        self.src.next_char()
    }

    fn next_char_req(&mut self) -> Result<char> {
        self.next_char()?
            .ok_or_else(|| StreamError::Transport("unexpected end of stream".into()))
    }

    fn peek_char(&mut self) -> Result<Option<char>> {
        if self.peeked.is_none() {
            self.peeked = self.src.next_char()?;
        }
        Ok(self.peeked)
    }

    fn skip_whitespace(&mut self) -> Result<()> {
        while let Some(c) = self.peek_char()? {
            if !c.is_whitespace() {
                break;
            }
            self.next_char()?;
        }
        Ok(())
    }

    fn expect_char(&mut self, expected: char) -> Result<()> {
        let c = self.next_char_req()?;
        if c != expected {
            return Err(StreamError::MalformedStanza(format!(
                "expected '{expected}', found '{c}'"
            )));
        }
        Ok(())
    }

    fn is_name_char(c: char) -> bool {
        c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')
    }

    fn read_name(&mut self) -> Result<String> {
        let mut name = String::new();
        while let Some(c) = self.peek_char()? {
            if !Self::is_name_char(c) {
                break;
            }
            name.push(c);
            self.next_char()?;
        }
        if name.is_empty() {
            return Err(StreamError::MalformedStanza("empty name in tag".into()));
        }
        Ok(name)
    }

    fn read_entity(&mut self) -> Result<char> {
        let mut entity = String::new();
        loop {
            let c = self.next_char_req()?;
            if c == ';' {
                break;
            }
            entity.push(c);
            if entity.len() > MAX_ENTITY_LEN {
                return Err(StreamError::MalformedStanza(format!(
                    "entity reference too long: &{entity}"
                )));
            }
        }
        match entity.as_str() {
            "amp" => Ok('&'),
            "lt" => Ok('<'),
            "gt" => Ok('>'),
            "quot" => Ok('"'),
            "apos" => Ok('\''),
            _ => {
                let code = if let Some(hex) = entity.strip_prefix("#x") {
                    u32::from_str_radix(hex, 16).ok()
                } else if let Some(dec) = entity.strip_prefix('#') {
                    dec.parse::<u32>().ok()
                } else {
                    None
                };
                code.and_then(char::from_u32).ok_or_else(|| {
                    StreamError::MalformedStanza(format!("unknown entity reference: &{entity};"))
                })
            }
        }
    }

    /// Resolve a prefix against the scope stack. The `xml` prefix is
    /// predeclared.
    fn resolve_prefix(&self, prefix: &str) -> Result<String> {
        if prefix == "xml" {
            return Ok(XML_NAMESPACE.to_string());
        }
        for scope in self.scopes.iter().rev() {
            if let Some(ns) = scope.prefixes.get(prefix) {
                return Ok(ns.clone());
            }
        }
        Err(StreamError::MalformedStanza(format!(
            "undeclared namespace prefix '{prefix}'"
        )))
    }

    fn default_namespace(&self) -> String {
        for scope in self.scopes.iter().rev() {
            if let Some(ns) = &scope.default_ns {
                return ns.clone();
            }
        }
        String::new()
    }

    /// Pull the next structural event. Only start tags, end tags and
    /// text are surfaced.
    pub(crate) fn next_event(&mut self) -> Result<XmlEvent> {
        loop {
            let c = self.next_char_req()?;
            if c != '<' {
                return self.read_text(c);
            }
            match self.peek_char()? {
                Some('?') => self.skip_processing_instruction()?,
                Some('!') => {
                    if let Some(text) = self.read_bang_section()? {
                        return Ok(XmlEvent::Text(text));
                    }
                }
                Some('/') => {
                    self.next_char()?;
                    return self.read_end_tag();
                }
                Some(_) => return self.read_start_tag(),
                None => {
                    return Err(StreamError::Transport("stream ended inside tag".into()));
                }
            }
        }
    }

    fn read_text(&mut self, first: char) -> Result<XmlEvent> {
        let mut text = String::new();
        let mut c = first;
        loop {
            if c == '&' {
                text.push(self.read_entity()?);
            } else {
                text.push(c);
            }
            match self.peek_char()? {
                Some('<') | None => break,
                Some(_) => c = self.next_char_req()?,
            }
        }
        Ok(XmlEvent::Text(text))
    }

    fn skip_processing_instruction(&mut self) -> Result<()> {
        // Also covers the <?xml ...?> declaration.
        self.next_char()?;
        let mut prev = '\u{0}';
        loop {
            let c = self.next_char_req()?;
            if prev == '?' && c == '>' {
                return Ok(());
            }
            prev = c;
        }
    }

    /// Consume `<!--`, `<![CDATA[` or reject `<!DOCTYPE`. Returns the
    /// CDATA text if there was one.
    fn read_bang_section(&mut self) -> Result<Option<String>> {
        self.next_char()?;
        match self.peek_char()? {
            Some('-') => {
                self.expect_char('-')?;
                self.expect_char('-')?;
                let mut tail = ['\u{0}'; 2];
                loop {
                    let c = self.next_char_req()?;
                    if tail == ['-', '-'] && c == '>' {
                        return Ok(None);
                    }
                    tail = [tail[1], c];
                }
            }
            Some('[') => {
                for expected in "[CDATA[".chars() {
                    self.expect_char(expected)?;
                }
                let mut text = String::new();
                let mut tail = ['\u{0}'; 2];
                loop {
                    let c = self.next_char_req()?;
                    if tail == [']', ']'] && c == '>' {
                        text.truncate(text.len() - 2);
                        return Ok(Some(text));
                    }
                    text.push(c);
                    tail = [tail[1], c];
                }
            }
            _ => Err(StreamError::MalformedStanza(
                "markup declarations are not allowed in the stream".into(),
            )),
        }
    }

    fn read_attr_value(&mut self) -> Result<String> {
        let quote = self.next_char_req()?;
        if quote != '"' && quote != '\'' {
            return Err(StreamError::MalformedStanza(
                "attribute value is not quoted".into(),
            ));
        }
        let mut value = String::new();
        loop {
            let c = self.next_char_req()?;
            if c == quote {
                return Ok(value);
            }
            match c {
                '&' => value.push(self.read_entity()?),
                '<' => {
                    return Err(StreamError::MalformedStanza(
                        "'<' in attribute value".into(),
                    ));
                }
                _ => value.push(c),
            }
        }
    }

    fn split_qname(qname: &str) -> (Option<&str>, &str) {
        match qname.split_once(':') {
            Some((prefix, local)) => (Some(prefix), local),
            None => (None, qname),
        }
    }

    fn read_start_tag(&mut self) -> Result<XmlEvent> {
        if self.stack.len() >= MAX_DEPTH {
            return Err(StreamError::MalformedStanza(
                "element nesting too deep".into(),
            ));
        }
        let qname = self.read_name()?;
        let mut raw_attrs: Vec<RawAttribute> = Vec::new();
        let mut scope = Scope::default();
        let self_closing;
        loop {
            self.skip_whitespace()?;
            match self.peek_char()? {
                Some('/') => {
                    self.next_char()?;
                    self.expect_char('>')?;
                    self_closing = true;
                    break;
                }
                Some('>') => {
                    self.next_char()?;
                    self_closing = false;
                    break;
                }
                Some(_) => {
                    let attr_qname = self.read_name()?;
                    self.skip_whitespace()?;
                    self.expect_char('=')?;
                    self.skip_whitespace()?;
                    let value = self.read_attr_value()?;
                    let (prefix, local) = Self::split_qname(&attr_qname);
                    if prefix.is_none() && local == "xmlns" {
                        scope.default_ns = Some(value);
                    } else if prefix == Some("xmlns") {
                        scope.prefixes.insert(local.to_string(), value);
                    } else {
                        raw_attrs.push(RawAttribute {
                            prefix: prefix.map(str::to_string),
                            name: local.to_string(),
                            value,
                        });
                    }
                }
                None => {
                    return Err(StreamError::Transport("stream ended inside tag".into()));
                }
            }
        }

        // Declarations on this element are in scope for its own name
        // and attributes, even when it is self-closing.
        self.scopes.push(scope);
        let resolved = self.resolve_start_tag(&qname, raw_attrs);
        if self_closing || resolved.is_err() {
            self.scopes.pop();
        } else {
            self.stack.push(qname);
        }
        let (name, namespace, attrs) = resolved?;
        Ok(XmlEvent::Start(Element {
            name,
            namespace,
            attrs,
            self_closing,
        }))
    }

    fn resolve_start_tag(
        &mut self,
        qname: &str,
        raw_attrs: Vec<RawAttribute>,
    ) -> Result<(String, String, Vec<Attribute>)> {
        let (prefix, local) = Self::split_qname(qname);
        let namespace = match prefix {
            Some(p) => self.resolve_prefix(p)?,
            None => self.default_namespace(),
        };
        let mut attrs: Vec<Attribute> = Vec::with_capacity(raw_attrs.len());
        for raw in raw_attrs {
            let attr_ns = match raw.prefix.as_deref() {
                Some(p) => self.resolve_prefix(p)?,
                None => String::new(),
            };
            // Unique by name + namespace; a repeated declaration wins.
            if let Some(existing) = attrs
                .iter_mut()
                .find(|a| a.name == raw.name && a.namespace == attr_ns)
            {
                existing.value = raw.value;
            } else {
                attrs.push(Attribute {
                    name: raw.name,
                    namespace: attr_ns,
                    value: raw.value,
                });
            }
        }
        Ok((local.to_string(), namespace, attrs))
    }

    fn read_end_tag(&mut self) -> Result<XmlEvent> {
        let qname = self.read_name()?;
        self.skip_whitespace()?;
        self.expect_char('>')?;
        match self.stack.last() {
            Some(top) if *top == qname => {
                self.stack.pop();
                self.scopes.pop();
                let (_, local) = Self::split_qname(&qname);
                Ok(XmlEvent::End(local.to_string()))
            }
            Some(_) if self.stack.iter().any(|n| *n == qname) => {
                // Unwind to the matching ancestor so the stream can
                // continue at a consistent depth after a resync.
                while let Some(popped) = self.stack.pop() {
                    self.scopes.pop();
                    if popped == qname {
                        break;
                    }
                }
                Err(StreamError::MalformedStanza(format!(
                    "mismatched end tag </{qname}>"
                )))
            }
            Some(_) | None => Err(StreamError::MalformedStanza(format!(
                "unexpected end tag </{qname}>"
            ))),
        }
    }
}
