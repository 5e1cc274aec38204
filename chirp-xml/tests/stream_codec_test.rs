use chirp_xml::{StanzaBuilder, StanzaCodec, StreamError};
use std::io::Cursor;
use std::str::FromStr;

fn attached(input: &str) -> StanzaCodec {
    let mut codec = StanzaCodec::new();
    codec.attach(Box::new(Cursor::new(input.as_bytes().to_vec())));
    codec
}

const OPENING: &str = "<?xml version='1.0'?>\n\
    <stream:stream xmlns='jabber:client' \
    xmlns:stream='http://etherx.jabber.org/streams' \
    version='1.0' from='example.com' to='alice@example.com' \
    id='c2s-42' xml:lang='en'>";

#[test]
fn read_opening_captures_declared_attributes() {
    let mut codec = attached(OPENING);
    let meta = codec.read_opening().expect("stream open");
    assert_eq!(meta.version.as_deref(), Some("1.0"));
    assert_eq!(meta.from.as_deref(), Some("example.com"));
    assert_eq!(meta.to.as_deref(), Some("alice@example.com"));
    assert_eq!(meta.id.as_deref(), Some("c2s-42"));
    assert_eq!(meta.language.as_deref(), Some("en"));
}

#[test]
fn read_opening_ignores_foreign_and_unknown_attributes() {
    let input = "<stream:stream xmlns:stream='http://etherx.jabber.org/streams' \
        xmlns:x='urn:example:custom' x:flavor='blue' version='1.0' vendor='acme'>";
    let mut codec = attached(input);
    let meta = codec.read_opening().expect("stream open");
    assert_eq!(meta.version.as_deref(), Some("1.0"));
    assert_eq!(meta.from, None);
    assert_eq!(meta.id, None);
}

#[test]
fn read_opening_rejects_other_top_level_elements() {
    let mut codec = attached("<hello xmlns='urn:example'/>");
    match codec.read_opening() {
        Err(StreamError::MalformedStream(_)) => {}
        other => panic!("expected MalformedStream, got {other:?}"),
    }
}

#[test]
fn operations_require_an_attached_source() {
    let mut codec = StanzaCodec::new();
    assert!(codec.is_closed());
    assert!(matches!(
        codec.read_opening(),
        Err(StreamError::NotAttached)
    ));
    assert!(matches!(codec.next_stanza(), Err(StreamError::NotAttached)));
}

#[test]
fn decodes_a_sequence_of_stanzas() {
    let input = format!(
        "{OPENING}\n<presence from='bob@example.com/desk'/>\n\
         <message from='bob@example.com' type='chat'><body>hi</body></message>"
    );
    let mut codec = attached(&input);
    codec.read_opening().unwrap();

    let first = codec.next_stanza().unwrap();
    assert_eq!(first.name, "presence");
    assert_eq!(first.namespace, "jabber:client");
    assert_eq!(first.attr("from"), Some("bob@example.com/desk"));

    let second = codec.next_stanza().unwrap();
    assert_eq!(second.name, "message");
    let body = second.get_optional_child("body").expect("body child");
    assert_eq!(body.text(), "hi");
}

#[test]
fn malformed_stanza_is_recoverable_after_resync() {
    let input = format!("{OPENING}<presence><x></y></presence><iq type='get'/>");
    let mut codec = attached(&input);
    codec.read_opening().unwrap();

    match codec.next_stanza() {
        Err(StreamError::MalformedStanza(_)) => {}
        other => panic!("expected MalformedStanza, got {other:?}"),
    }
    codec.resync().expect("resync");

    let next = codec.next_stanza().expect("sibling after resync");
    assert_eq!(next.name, "iq");
    assert_eq!(next.attr("type"), Some("get"));
}

#[test]
fn closed_channel_mid_read_is_a_transport_error() {
    let input = format!("{OPENING}<message><body>never finis");
    let mut codec = attached(&input);
    codec.read_opening().unwrap();
    match codec.next_stanza() {
        Err(StreamError::Transport(_)) => {}
        other => panic!("expected Transport, got {other:?}"),
    }
}

#[test]
fn stream_close_is_not_fatal_to_the_codec() {
    let input = format!("{OPENING}</stream:stream>");
    let mut codec = attached(&input);
    codec.read_opening().unwrap();
    assert!(matches!(
        codec.next_stanza(),
        Err(StreamError::MalformedStanza(_))
    ));
}

#[test]
fn attach_preserves_metadata_until_next_opening() {
    let mut codec = attached(OPENING);
    codec.read_opening().unwrap();
    assert_eq!(codec.metadata().id.as_deref(), Some("c2s-42"));

    // Stream reset: detach without closing, rebind, metadata survives
    // until the new opening is read.
    codec.detach();
    assert!(codec.is_closed());
    codec.attach(Box::new(Cursor::new(
        "<stream:stream xmlns:stream='http://etherx.jabber.org/streams' id='c2s-43'>"
            .as_bytes()
            .to_vec(),
    )));
    assert_eq!(codec.metadata().id.as_deref(), Some("c2s-42"));
    codec.read_opening().unwrap();
    assert_eq!(codec.metadata().id.as_deref(), Some("c2s-43"));
    assert_eq!(codec.metadata().from, None);
}

#[test]
fn close_is_idempotent() {
    let mut codec = attached(OPENING);
    codec.close();
    assert!(codec.is_closed());
    codec.close();
    codec.detach();
    assert!(codec.is_closed());
}

#[test]
fn doctype_is_rejected() {
    let mut codec = attached("<!DOCTYPE stream []><stream:stream \
        xmlns:stream='http://etherx.jabber.org/streams'>");
    assert!(matches!(
        codec.read_opening(),
        Err(StreamError::MalformedStream(_))
    ));
}

#[test]
fn roundtrip_preserves_logical_structure() {
    let inner = StanzaBuilder::new("item")
        .namespace("urn:example:items")
        .attr("id", "1")
        .attr_ns("origin", "urn:example:meta", "cache")
        .text("payload & <raw>")
        .build();
    let original = StanzaBuilder::new("message")
        .namespace("jabber:client")
        .attr("from", "bob@example.com")
        .attr("type", "chat")
        .attr_ns("lang", chirp_xml::XML_NAMESPACE, "en")
        .child(
            StanzaBuilder::new("event")
                .namespace("urn:example:items")
                .child(inner)
                .build(),
        )
        .child(StanzaBuilder::new("body").namespace("jabber:client").text("hello").build())
        .build();

    let rendered = original.to_string();
    let decoded = chirp_xml::Stanza::from_str(&rendered).expect("reparse");
    assert_eq!(decoded, original);
}

#[test]
fn duplicate_attributes_collapse_to_the_last_value() {
    let stanza = chirp_xml::Stanza::from_str("<iq type='get' type='set'/>").unwrap();
    assert_eq!(stanza.attrs.len(), 1);
    assert_eq!(stanza.attr("type"), Some("set"));
}

#[test]
fn cdata_and_entities_decode_as_text() {
    let stanza =
        chirp_xml::Stanza::from_str("<body>a &amp; b <![CDATA[<c>]]> &#x21;</body>").unwrap();
    assert_eq!(stanza.text(), "a & b <c> !");
}
