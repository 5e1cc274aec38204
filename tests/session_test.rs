use chirp::beacon::{BeaconReport, DiagnosticSampler};
use chirp::notify::Mailbox;
use chirp::store::{ContactStore, MemoryStore, Presence, RecordStore};
use chirp::{ConnectionSession, SessionConfig, SessionState};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const SERVER_OPENING: &str = "<?xml version='1.0'?>\
    <stream:stream xmlns='jabber:client' \
    xmlns:stream='http://etherx.jabber.org/streams' \
    from='example.com' id='s1' version='1.0'>";

const SASL_FEATURES: &str = "<stream:features>\
    <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
    <mechanism>PLAIN</mechanism></mechanisms></stream:features>";

const BIND_FEATURES: &str = "<stream:features>\
    <bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/></stream:features>";

fn read_until(stream: &mut TcpStream, needle: &str, inbound: &mut String) -> bool {
    let mut buf = [0u8; 1024];
    while !inbound.contains(needle) {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return false,
            Ok(n) => inbound.push_str(&String::from_utf8_lossy(&buf[..n])),
        }
    }
    true
}

fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        thread::sleep(Duration::from_millis(20));
    }
}

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn credentials() -> Arc<HashMap<String, String>> {
    Arc::new(HashMap::from([
        ("jid".to_string(), "alice@example.com".to_string()),
        ("password".to_string(), "hunter2".to_string()),
    ]))
}

struct FixedSampler;

impl DiagnosticSampler for FixedSampler {
    fn append_to(&self, report: &mut BeaconReport) {
        report.push_reading("signal-strength", -70);
        report.push_reading("network-type", "wifi");
    }
}

#[test]
fn full_session_lifecycle_against_scripted_server() {
    init_logs();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut inbound = String::new();

        // Client stream header, then SASL.
        assert!(read_until(&mut stream, "version='1.0'>", &mut inbound));
        stream.write_all(SERVER_OPENING.as_bytes()).unwrap();
        stream.write_all(SASL_FEATURES.as_bytes()).unwrap();
        assert!(read_until(&mut stream, "</auth>", &mut inbound));
        assert!(inbound.contains("mechanism=\"PLAIN\""));
        stream
            .write_all(b"<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>")
            .unwrap();

        // Stream restart and resource binding.
        inbound.clear();
        assert!(read_until(&mut stream, "version='1.0'>", &mut inbound));
        stream.write_all(SERVER_OPENING.as_bytes()).unwrap();
        stream.write_all(BIND_FEATURES.as_bytes()).unwrap();
        assert!(read_until(&mut stream, "</iq>", &mut inbound));
        assert!(inbound.contains("urn:ietf:params:xml:ns:xmpp-bind"));
        stream
            .write_all(
                b"<iq type='result' id='chirp-1'>\
                  <bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'>\
                  <jid>alice@example.com/chirp</jid></bind></iq>",
            )
            .unwrap();

        // Push presence and channel content at the fresh session.
        stream
            .write_all(
                b"<presence from='bob@example.com/desk'>\
                  <show>dnd</show><status>busy</status></presence>",
            )
            .unwrap();
        stream
            .write_all(
                b"<message from='bob@example.com'>\
                  <event xmlns='http://jabber.org/protocol/pubsub#event'>\
                  <items node='/user/bob@example.com/channel'>\
                  <item id='post-1'><entry xmlns='urn:example:entry'>hi</entry></item>\
                  </items></event></message>",
            )
            .unwrap();

        // Initial sync: answer the roster pull.
        inbound.clear();
        assert!(read_until(&mut stream, "jabber:iq:roster", &mut inbound));
        stream
            .write_all(
                b"<iq type='result' id='chirp-2'>\
                  <query xmlns='jabber:iq:roster'>\
                  <item jid='bob@example.com' name='Bob'/></query></iq>",
            )
            .unwrap();

        // Drain until the client closes its stream; the channel pull
        // and the first beacon arrive on the way.
        read_until(&mut stream, "</stream:stream>", &mut inbound);
        assert!(inbound.contains("<beacon"));
        assert!(inbound.contains("signal-strength"));
        assert!(inbound.contains("/user/alice@example.com/channel"));
    });

    let (mailbox, messages) = Mailbox::new();
    let store = Arc::new(MemoryStore::new());
    let config = SessionConfig {
        server: Some(addr.to_string()),
        beacon_collector: Some("diagnostics.example.com".into()),
        trace_stanzas: true,
        ..Default::default()
    };
    let session = ConnectionSession::new(
        config,
        credentials(),
        Arc::new(mailbox),
        store.clone(),
        store.clone(),
    );
    session.register_sampler(Arc::new(FixedSampler));

    assert!(session.connect());
    wait_for("authentication", || session.is_authenticated());
    assert_eq!(session.account().as_deref(), Some("alice@example.com/chirp"));
    assert_eq!(
        messages.recv_timeout(Duration::from_secs(5)).unwrap(),
        "You are online."
    );

    wait_for("presence upsert", || {
        store.status("alice@example.com", "bob@example.com").is_some()
    });
    let status = store.status("alice@example.com", "bob@example.com").unwrap();
    assert_eq!(status.presence, Presence::DoNotDisturb);
    assert_eq!(status.status_text.as_deref(), Some("busy"));

    wait_for("channel record", || {
        !store.records("/user/bob@example.com/channel").is_empty()
    });
    wait_for("roster contact", || {
        store
            .contacts("alice@example.com")
            .contains(&"bob@example.com".to_string())
    });

    session.shutdown();
    assert_eq!(session.state(), SessionState::Disconnected);
    server.join().unwrap();
}

#[test]
fn rejected_credentials_surface_once_and_disconnect() {
    init_logs();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut inbound = String::new();
        assert!(read_until(&mut stream, "version='1.0'>", &mut inbound));
        stream.write_all(SERVER_OPENING.as_bytes()).unwrap();
        stream.write_all(SASL_FEATURES.as_bytes()).unwrap();
        assert!(read_until(&mut stream, "</auth>", &mut inbound));
        stream
            .write_all(
                b"<failure xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
                  <not-authorized/></failure>",
            )
            .unwrap();
        // Hold the socket open; the client tears down on its side.
        let mut rest = String::new();
        read_until(&mut stream, "\u{0}never", &mut rest);
    });

    let (mailbox, messages) = Mailbox::new();
    let store = Arc::new(MemoryStore::new());
    let config = SessionConfig {
        server: Some(addr.to_string()),
        ..Default::default()
    };
    let session = ConnectionSession::new(
        config,
        credentials(),
        Arc::new(mailbox),
        store.clone(),
        store,
    );

    assert!(session.connect());
    let message = messages.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(message.starts_with("Sign-in failed"));
    wait_for("disconnect", || {
        session.state() == SessionState::Disconnected
    });
    // No retry happens on its own: no further user messages.
    assert!(messages.recv_timeout(Duration::from_millis(300)).is_err());

    session.shutdown();
    server.join().unwrap();
}

#[test]
fn invalid_account_setting_never_dials() {
    let (mailbox, messages) = Mailbox::new();
    let store = Arc::new(MemoryStore::new());
    let creds = Arc::new(HashMap::from([
        ("jid".to_string(), "not-a-jid".to_string()),
        ("password".to_string(), "x".to_string()),
    ]));
    let session = ConnectionSession::new(
        SessionConfig::default(),
        creds,
        Arc::new(mailbox),
        store.clone(),
        store,
    );
    assert!(session.connect());
    wait_for("settling", || {
        session.state() == SessionState::Disconnected
    });
    // Misconfiguration is logged, not toasted.
    assert!(messages.recv_timeout(Duration::from_millis(300)).is_err());
    session.shutdown();
}

#[test]
fn connect_is_a_no_op_while_connected() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut inbound = String::new();
        assert!(read_until(&mut stream, "version='1.0'>", &mut inbound));
        stream.write_all(SERVER_OPENING.as_bytes()).unwrap();
        stream.write_all(SASL_FEATURES.as_bytes()).unwrap();
        assert!(read_until(&mut stream, "</auth>", &mut inbound));
        stream
            .write_all(b"<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>")
            .unwrap();
        inbound.clear();
        assert!(read_until(&mut stream, "version='1.0'>", &mut inbound));
        stream.write_all(SERVER_OPENING.as_bytes()).unwrap();
        stream.write_all(BIND_FEATURES.as_bytes()).unwrap();
        assert!(read_until(&mut stream, "</iq>", &mut inbound));
        stream
            .write_all(
                b"<iq type='result' id='chirp-1'>\
                  <bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'>\
                  <jid>alice@example.com/chirp</jid></bind></iq>",
            )
            .unwrap();
        let mut rest = String::new();
        read_until(&mut stream, "</stream:stream>", &mut rest);
    });

    let (mailbox, messages) = Mailbox::new();
    let store = Arc::new(MemoryStore::new());
    let config = SessionConfig {
        server: Some(addr.to_string()),
        ..Default::default()
    };
    let session = ConnectionSession::new(
        config,
        credentials(),
        Arc::new(mailbox),
        store.clone(),
        store,
    );

    assert!(session.connect());
    wait_for("authentication", || session.is_authenticated());
    assert_eq!(
        messages.recv_timeout(Duration::from_secs(5)).unwrap(),
        "You are online."
    );

    // A second connect while authenticated changes nothing and posts
    // nothing.
    assert!(session.connect());
    thread::sleep(Duration::from_millis(200));
    assert!(session.is_authenticated());
    assert!(messages.recv_timeout(Duration::from_millis(200)).is_err());

    session.shutdown();
    server.join().unwrap();
}
