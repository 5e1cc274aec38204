use crate::node::{Stanza, StanzaChild, XML_NAMESPACE};
use std::fmt;

pub(crate) fn escape_text(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

fn escape_attr(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}

fn format_attributes(stanza: &Stanza, parent_default_ns: &str) -> String {
    let mut result = String::new();
    if stanza.namespace != parent_default_ns {
        result.push_str(" xmlns=\"");
        escape_attr(&stanza.namespace, &mut result);
        result.push('"');
    }

    // Namespaced attributes get generated prefixes, declared inline on
    // this element. The xml namespace is predeclared and never written.
    let mut declared: Vec<(&str, String)> = Vec::new();
    for attr in &stanza.attrs {
        let prefix = if attr.namespace.is_empty() {
            None
        } else if attr.namespace == XML_NAMESPACE {
            Some("xml".to_string())
        } else if let Some((_, p)) = declared
            .iter()
            .find(|(ns, _)| *ns == attr.namespace.as_str())
        {
            Some(p.clone())
        } else {
            let p = format!("ns{}", declared.len());
            result.push_str(&format!(" xmlns:{}=\"", p));
            escape_attr(&attr.namespace, &mut result);
            result.push('"');
            declared.push((attr.namespace.as_str(), p.clone()));
            Some(p)
        };
        match prefix {
            Some(p) => result.push_str(&format!(" {}:{}=\"", p, attr.name)),
            None => result.push_str(&format!(" {}=\"", attr.name)),
        }
        escape_attr(&attr.value, &mut result);
        result.push('"');
    }
    result
}

fn write_element(f: &mut fmt::Formatter<'_>, stanza: &Stanza, parent_default_ns: &str) -> fmt::Result {
    let attrs = format_attributes(stanza, parent_default_ns);
    if stanza.children.is_empty() {
        return write!(f, "<{}{}/>", stanza.name, attrs);
    }
    write!(f, "<{}{}>", stanza.name, attrs)?;
    for child in &stanza.children {
        match child {
            StanzaChild::Element(e) => write_element(f, e, &stanza.namespace)?,
            StanzaChild::Text(t) => {
                let mut escaped = String::new();
                escape_text(t, &mut escaped);
                f.write_str(&escaped)?;
            }
        }
    }
    write!(f, "</{}>", stanza.name)
}

impl fmt::Display for Stanza {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // A top-level render inherits no default namespace, so the
        // element's own namespace is always declared.
        write_element(f, self, "\u{0}")
    }
}
