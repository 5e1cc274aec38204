/// Namespace of the outer stream element.
pub const STREAM_NAMESPACE: &str = "http://etherx.jabber.org/streams";
/// The built-in `xml:` prefix namespace.
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// A tag attribute, a `{name, namespace, value}` triple. The namespace is
/// never absent; unprefixed attributes carry the empty namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub namespace: String,
    pub value: String,
}

impl Attribute {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StanzaChild {
    Element(Stanza),
    Text(String),
}

/// One top-level protocol unit, or a nested element inside one.
///
/// Immutable once decoded; the raw serialization is produced on demand by
/// the `Display` impl. `via` carries the routing context (the account the
/// stanza arrived through) and is stamped by the dispatch layer, not the
/// codec.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Stanza {
    pub name: String,
    pub namespace: String,
    pub attrs: Vec<Attribute>,
    pub children: Vec<StanzaChild>,
    pub via: Option<String>,
}

impl Stanza {
    /// First attribute value with the given name, in any namespace.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Attribute value with the given name in the given namespace.
    pub fn attr_ns(&self, name: &str, namespace: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.name == name && a.namespace == namespace)
            .map(|a| a.value.as_str())
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Stanza> {
        self.children.iter().filter_map(|c| match c {
            StanzaChild::Element(s) => Some(s),
            StanzaChild::Text(_) => None,
        })
    }

    /// Finds the first direct child element with the given name.
    pub fn get_optional_child(&self, name: &str) -> Option<&Stanza> {
        self.child_elements().find(|c| c.name == name)
    }

    /// Direct child elements with the given name.
    pub fn get_children_by_name(&self, name: &str) -> Vec<&Stanza> {
        self.child_elements().filter(|c| c.name == name).collect()
    }

    /// Concatenated text content of the direct text children.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            if let StanzaChild::Text(t) = child {
                out.push_str(t);
            }
        }
        out
    }
}

/// Attributes declared on the stream opening. Populated once per
/// stream-open and replaced on stream reset; `attach` leaves it alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamMetadata {
    pub version: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub language: Option<String>,
    pub id: Option<String>,
}
