use crate::node::{Attribute, Stanza, StanzaChild};
use indexmap::IndexMap;

/// Builder for outbound stanzas. Attributes are unique by
/// (name, namespace) and keep insertion order.
#[derive(Debug, Default)]
pub struct StanzaBuilder {
    name: String,
    namespace: String,
    attrs: IndexMap<(String, String), String>,
    children: Vec<StanzaChild>,
}

impl StanzaBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs
            .insert((name.into(), String::new()), value.into());
        self
    }

    pub fn attr_ns(
        mut self,
        name: impl Into<String>,
        namespace: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.attrs
            .insert((name.into(), namespace.into()), value.into());
        self
    }

    pub fn child(mut self, child: Stanza) -> Self {
        self.children.push(StanzaChild::Element(child));
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = Stanza>) -> Self {
        self.children
            .extend(children.into_iter().map(StanzaChild::Element));
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.children.push(StanzaChild::Text(text.into()));
        self
    }

    pub fn build(self) -> Stanza {
        Stanza {
            name: self.name,
            namespace: self.namespace,
            attrs: self
                .attrs
                .into_iter()
                .map(|((name, namespace), value)| Attribute {
                    name,
                    namespace,
                    value,
                })
                .collect(),
            children: self.children,
            via: None,
        }
    }
}
