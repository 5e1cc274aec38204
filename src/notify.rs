use std::sync::mpsc;

/// Fire-and-forget channel for user-visible messages. Implementations
/// must never block the protocol threads.
pub trait UserNotifier: Send + Sync {
    fn post(&self, message: &str);
}

/// Message-passing handoff from the protocol threads to whatever
/// presentation surface drains the receiver. Dropping the receiver
/// silently discards further posts, which is the wanted behavior when
/// the surface goes away before the session does.
pub struct Mailbox {
    tx: mpsc::Sender<String>,
}

impl Mailbox {
    pub fn new() -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl UserNotifier for Mailbox {
    fn post(&self, message: &str) {
        let _ = self.tx.send(message.to_string());
    }
}

/// Notifier that drops everything, for sessions without a UI surface.
pub struct NullNotifier;

impl UserNotifier for NullNotifier {
    fn post(&self, _message: &str) {}
}
