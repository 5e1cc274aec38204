use crate::beacon::{BeaconReport, BeaconScheduler, DiagnosticSampler};
use crate::channels::{ChannelWriter, RosterWriter, channel_request, roster_request};
use crate::command_queue::CommandQueue;
use crate::config::{DEFAULT_PORT, SessionConfig};
use crate::error::{Result, SessionError};
use crate::notify::UserNotifier;
use crate::presence::PresenceReducer;
use crate::store::{ContactStore, CredentialSource, RecordStore, SETTING_JID, SETTING_PASSWORD};
use crate::transport::Connection;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chirp_xml::{Stanza, StanzaBuilder, StanzaCodec, jid};
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

pub const CLIENT_NAMESPACE: &str = "jabber:client";
pub const SASL_NAMESPACE: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
pub const BIND_NAMESPACE: &str = "urn:ietf:params:xml:ns:xmpp-bind";

/// Registered stanza consumer. Stanzas are owned by the dispatch call;
/// consumers must persist whatever they need before returning.
pub trait StanzaListener: Send + Sync {
    fn on_stanza(&self, stanza: &Stanza);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    /// Transport is up, stream is open, credentials not yet accepted.
    Connected,
    Authenticated,
    Closing,
}

/// Connection and authentication lifecycle for one account, plus the
/// adaptive beacon policy. Every mutation of the connection handle is
/// routed through the command queue, which is the whole locking story:
/// the worker is the only thread that touches it.
pub struct ConnectionSession {
    config: SessionConfig,
    credentials: Arc<dyn CredentialSource>,
    notifier: Arc<dyn UserNotifier>,
    contact_store: Arc<dyn ContactStore>,
    record_store: Arc<dyn RecordStore>,
    samplers: Mutex<Vec<Arc<dyn DiagnosticSampler>>>,
    extra_listeners: Mutex<Vec<Arc<dyn StanzaListener>>>,
    queue: CommandQueue,
    state: Mutex<SessionState>,
    connection: Mutex<Option<Connection>>,
    beacon: Mutex<BeaconScheduler>,
    /// Full (resource-qualified) jid once bound.
    account: Mutex<Option<String>>,
    listeners_armed: AtomicBool,
    stanza_counter: AtomicU64,
}

impl ConnectionSession {
    pub fn new(
        config: SessionConfig,
        credentials: Arc<dyn CredentialSource>,
        notifier: Arc<dyn UserNotifier>,
        contact_store: Arc<dyn ContactStore>,
        record_store: Arc<dyn RecordStore>,
    ) -> Arc<Self> {
        let queue = CommandQueue::new(config.queue_depth);
        Arc::new(Self {
            config,
            credentials,
            notifier,
            contact_store,
            record_store,
            samplers: Mutex::new(Vec::new()),
            extra_listeners: Mutex::new(Vec::new()),
            queue,
            state: Mutex::new(SessionState::Disconnected),
            connection: Mutex::new(None),
            beacon: Mutex::new(BeaconScheduler::new()),
            account: Mutex::new(None),
            listeners_armed: AtomicBool::new(false),
            stanza_counter: AtomicU64::new(0),
        })
    }

    /// Add a connectivity/signal sampler consulted at beacon send time.
    pub fn register_sampler(&self, sampler: Arc<dyn DiagnosticSampler>) {
        self.samplers.lock().unwrap().push(sampler);
    }

    /// Add a stanza consumer beyond the built-in presence/roster/channel
    /// set. Takes effect on the next authenticated-session entry.
    pub fn register_listener(&self, listener: Arc<dyn StanzaListener>) {
        self.extra_listeners.lock().unwrap().push(listener);
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.state(),
            SessionState::Connected | SessionState::Authenticated
        )
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == SessionState::Authenticated
    }

    /// Full jid of the bound session, if authenticated.
    pub fn account(&self) -> Option<String> {
        self.account.lock().unwrap().clone()
    }

    fn next_id(&self) -> String {
        let n = self.stanza_counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("chirp-{n}")
    }

    /// Queue a connect. No-op when already connected or connecting.
    pub fn connect(self: &Arc<Self>) -> bool {
        let this = Arc::clone(self);
        self.queue.submit_fn(move || {
            this.run_connect()?;
            Ok(())
        })
    }

    fn run_connect(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != SessionState::Disconnected {
                debug!(target: "Session", "connect: already {:?}", *state);
                return Ok(());
            }
            *state = SessionState::Connecting;
        }
        match self.establish() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.close_connection_now();
                *self.state.lock().unwrap() = SessionState::Disconnected;
                match &e {
                    SessionError::AuthenticationFailure { .. } => {
                        self.notifier.post("Sign-in failed: the server rejected your credentials.");
                    }
                    // Misconfiguration is a log-only condition.
                    SessionError::InvalidAccount(_) => {}
                    _ => self.notifier.post("Could not connect to the server."),
                }
                Err(e)
            }
        }
    }

    fn establish(self: &Arc<Self>) -> Result<()> {
        let jid_setting = self
            .credentials
            .get(SETTING_JID)
            .ok_or_else(|| SessionError::InvalidAccount("missing jid setting".into()))?;
        if !jid_setting.contains('@') {
            return Err(SessionError::InvalidAccount(jid_setting));
        }
        let password = self
            .credentials
            .get(SETTING_PASSWORD)
            .ok_or_else(|| SessionError::InvalidAccount("missing password setting".into()))?;
        let domain = jid::domain(&jid_setting).to_string();
        let addr = self
            .config
            .server
            .clone()
            .unwrap_or_else(|| format!("{domain}:{DEFAULT_PORT}"));

        info!(target: "Session", "connecting to {addr}");
        let connection = Connection::dial(&addr)?;
        let source = connection.byte_source()?;
        connection.send(stream_header(&domain, self.config.lang.as_deref()).as_bytes())?;
        *self.connection.lock().unwrap() = Some(connection);

        let mut codec = StanzaCodec::new();
        codec.set_trace_enabled(self.config.trace_stanzas);
        codec.attach(Box::new(source));
        codec.read_opening()?;
        *self.state.lock().unwrap() = SessionState::Connected;

        let full_jid = self.login(&mut codec, &jid_setting, &password, &domain)?;
        let account = jid::bare(&full_jid).to_string();
        *self.account.lock().unwrap() = Some(full_jid);
        *self.state.lock().unwrap() = SessionState::Authenticated;
        info!(target: "Session", "authenticated as {account}");

        self.arm_listeners(codec, account.clone());
        self.notifier.post("You are online.");

        // Initial synchronization: each step is its own queued command
        // and runs after this action completes.
        let roster_id = self.next_id();
        self.send_stanza(roster_request(&roster_id));
        let channel_id = self.next_id();
        self.send_stanza(channel_request(&channel_id, &account));
        self.send_beacon(0);
        Ok(())
    }

    fn login(
        &self,
        codec: &mut StanzaCodec,
        jid_setting: &str,
        password: &str,
        domain: &str,
    ) -> Result<String> {
        let features = codec.next_stanza()?;
        let mechanisms: Vec<String> = features
            .get_optional_child("mechanisms")
            .map(|m| {
                m.get_children_by_name("mechanism")
                    .iter()
                    .map(|c| c.text())
                    .collect()
            })
            .unwrap_or_default();
        if !mechanisms.iter().any(|m| m == "PLAIN") {
            return Err(SessionError::Negotiation {
                phase: "sasl",
                detail: format!("PLAIN not offered, server has {mechanisms:?}"),
            });
        }

        let local = jid::bare(jid_setting)
            .split('@')
            .next()
            .unwrap_or_default()
            .to_string();
        let payload = BASE64.encode(format!("\u{0}{local}\u{0}{password}"));
        let auth = StanzaBuilder::new("auth")
            .namespace(SASL_NAMESPACE)
            .attr("mechanism", "PLAIN")
            .text(payload)
            .build();
        self.send_raw(auth.to_string().as_bytes())?;

        let reply = codec.next_stanza()?;
        match reply.name.as_str() {
            "success" => {}
            "failure" => {
                return Err(SessionError::AuthenticationFailure {
                    jid: jid_setting.to_string(),
                });
            }
            other => {
                return Err(SessionError::Negotiation {
                    phase: "sasl",
                    detail: format!("unexpected <{other}>"),
                });
            }
        }

        // In-band stream reset on the now-authenticated channel. The
        // codec keeps the old metadata until the new opening arrives.
        codec.detach();
        let source = {
            let guard = self.connection.lock().unwrap();
            let connection = guard.as_ref().ok_or(SessionError::NotConnected)?;
            connection.send(stream_header(domain, self.config.lang.as_deref()).as_bytes())?;
            connection.byte_source()?
        };
        codec.attach(Box::new(source));
        codec.read_opening()?;
        let _features = codec.next_stanza()?;

        let bind_id = self.next_id();
        let bind = StanzaBuilder::new("iq")
            .namespace(CLIENT_NAMESPACE)
            .attr("type", "set")
            .attr("id", bind_id)
            .child(StanzaBuilder::new("bind").namespace(BIND_NAMESPACE).build())
            .build();
        self.send_raw(bind.to_string().as_bytes())?;
        let reply = codec.next_stanza()?;
        if reply.name == "iq" && reply.attr("type") == Some("result") {
            let bound = reply
                .get_optional_child("bind")
                .and_then(|b| b.get_optional_child("jid"))
                .map(|j| j.text());
            Ok(bound.unwrap_or_else(|| jid_setting.to_string()))
        } else {
            Err(SessionError::Negotiation {
                phase: "bind",
                detail: format!("unexpected <{}>", reply.name),
            })
        }
    }

    /// Arm the per-session listener set and hand the codec to the read
    /// loop. At most once per authenticated session; torn down again on
    /// disconnect.
    fn arm_listeners(self: &Arc<Self>, codec: StanzaCodec, account: String) {
        if self.listeners_armed.swap(true, Ordering::SeqCst) {
            warn!(target: "Session", "listener set already armed for this session");
            return;
        }
        let mut listeners: Vec<Arc<dyn StanzaListener>> = vec![
            Arc::new(PresenceReducer::new(self.contact_store.clone())),
            Arc::new(RosterWriter::new(self.contact_store.clone())),
            Arc::new(ChannelWriter::new(self.record_store.clone())),
        ];
        listeners.extend(self.extra_listeners.lock().unwrap().iter().cloned());

        let session = Arc::clone(self);
        thread::Builder::new()
            .name("stream-read".into())
            .spawn(move || read_loop(session, codec, listeners, account))
            .expect("spawn stream read loop");
    }

    /// Queue a stanza send. Dropped with a warning when the session is
    /// not authenticated by the time the action runs.
    pub fn send_stanza(self: &Arc<Self>, stanza: Stanza) -> bool {
        let this = Arc::clone(self);
        self.queue.submit_fn(move || {
            if !this.is_authenticated() {
                warn!(target: "Session", "dropping outbound <{}>: not authenticated", stanza.name);
                return Ok(());
            }
            this.send_raw(stanza.to_string().as_bytes())?;
            Ok(())
        })
    }

    /// Queue a diagnostic beacon request. `priority` runs 0..=10: 0
    /// means send now, 10 means only if the beacon has been idle for a
    /// long while. The effective priority is sampled at submission so
    /// an urgent request is not diluted by the queue delay.
    pub fn send_beacon(self: &Arc<Self>, priority: u8) -> bool {
        let effective = self.beacon.lock().unwrap().effective_priority(priority);
        let this = Arc::clone(self);
        self.queue.submit_fn(move || {
            if !this.is_authenticated() {
                return Ok(());
            }
            let now_ms = Utc::now().timestamp_millis();
            let approved = this.beacon.lock().unwrap().should_send(effective, now_ms);
            if !approved {
                debug!(target: "Session", "beacon suppressed (effective priority {effective})");
                return Ok(());
            }
            let account = this
                .account
                .lock()
                .unwrap()
                .clone()
                .ok_or(SessionError::NotConnected)?;
            let collector = this
                .config
                .beacon_collector
                .clone()
                .unwrap_or_else(|| format!("diagnostics.{}", jid::domain(&account)));
            let mut report = BeaconReport::new();
            for sampler in this.samplers.lock().unwrap().iter() {
                sampler.append_to(&mut report);
            }
            let id = this.next_id();
            let stanza = report.into_stanza(&account, &collector, &id);
            info!(target: "Session", "sending beacon to {collector}");
            this.send_raw(stanza.to_string().as_bytes())?;
            Ok(())
        })
    }

    /// Queue a disconnect: polite stream close, socket shutdown (which
    /// unblocks the read loop), state back to `Disconnected`.
    pub fn disconnect(self: &Arc<Self>) -> bool {
        let this = Arc::clone(self);
        self.queue.submit_fn(move || {
            {
                let mut state = this.state.lock().unwrap();
                if *state == SessionState::Disconnected {
                    return Ok(());
                }
                *state = SessionState::Closing;
            }
            if let Some(connection) = this.connection.lock().unwrap().as_ref() {
                let _ = connection.send(b"</stream:stream>");
            }
            this.close_connection_now();
            this.listeners_armed.store(false, Ordering::SeqCst);
            *this.state.lock().unwrap() = SessionState::Disconnected;
            *this.account.lock().unwrap() = None;
            info!(target: "Session", "disconnected");
            Ok(())
        })
    }

    /// Full shutdown: queued disconnect, queue stop (drains the
    /// backlog), then a redundant close that is safe to repeat.
    pub fn shutdown(self: &Arc<Self>) {
        self.disconnect();
        self.queue.stop();
        self.close_connection_now();
    }

    fn send_raw(&self, bytes: &[u8]) -> Result<()> {
        let guard = self.connection.lock().unwrap();
        let connection = guard.as_ref().ok_or(SessionError::NotConnected)?;
        connection.send(bytes)?;
        Ok(())
    }

    /// Drop the connection handle, closing it exactly once.
    fn close_connection_now(&self) {
        if let Some(connection) = self.connection.lock().unwrap().take() {
            connection.shutdown();
        }
    }

    /// Called by the read loop on any exit. The cleanup runs as a
    /// queued command so it cannot race an in-flight send.
    fn handle_stream_end(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let accepted = self.queue.submit_fn(move || {
            let expected = matches!(
                *this.state.lock().unwrap(),
                SessionState::Closing | SessionState::Disconnected
            );
            this.close_connection_now();
            this.listeners_armed.store(false, Ordering::SeqCst);
            *this.state.lock().unwrap() = SessionState::Disconnected;
            if !expected {
                this.notifier.post("Connection to the server was lost.");
            }
            Ok(())
        });
        if !accepted {
            // Queue already stopped; the shutdown path owns the cleanup.
            self.close_connection_now();
        }
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.queue.stop();
        self.close_connection_now();
    }
}

fn read_loop(
    session: Arc<ConnectionSession>,
    mut codec: StanzaCodec,
    listeners: Vec<Arc<dyn StanzaListener>>,
    account: String,
) {
    debug!(target: "Session", "read loop started");
    let teardown = scopeguard::guard(Arc::clone(&session), |s| s.handle_stream_end());
    loop {
        match codec.next_stanza() {
            Ok(mut stanza) => {
                stanza.via = Some(account.clone());
                for listener in &listeners {
                    listener.on_stanza(&stanza);
                }
            }
            Err(e) if e.is_recoverable() => {
                warn!(target: "Session", "dropping malformed stanza: {e}");
                if let Err(e) = codec.resync() {
                    info!(target: "Session", "stream ended during resync: {e}");
                    break;
                }
            }
            Err(e) => {
                info!(target: "Session", "stream ended: {e}");
                break;
            }
        }
    }
    codec.close();
    drop(teardown);
    debug!(target: "Session", "read loop stopped");
}

fn stream_header(domain: &str, lang: Option<&str>) -> String {
    let mut header = format!(
        "<?xml version='1.0'?><stream:stream to='{domain}' xmlns='{CLIENT_NAMESPACE}' \
         xmlns:stream='{}' version='1.0'",
        chirp_xml::STREAM_NAMESPACE
    );
    if let Some(lang) = lang {
        header.push_str(&format!(" xml:lang='{lang}'"));
    }
    header.push('>');
    header
}
