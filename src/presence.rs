use crate::session::StanzaListener;
use crate::store::{ContactStatus, ContactStore, Presence};
use chirp_xml::{Stanza, jid};
use log::{debug, warn};
use std::sync::Arc;

/// Reduces incoming presence units into persisted contact state. Holds
/// no state of its own; everything lives in the store.
pub struct PresenceReducer {
    store: Arc<dyn ContactStore>,
}

impl PresenceReducer {
    pub fn new(store: Arc<dyn ContactStore>) -> Self {
        Self { store }
    }

    fn reduce(&self, stanza: &Stanza) -> Result<(), String> {
        let via = stanza
            .via
            .as_deref()
            .ok_or_else(|| "presence unit without routing context".to_string())?;
        let account_jid = jid::bare(via);
        let from = stanza
            .attr("from")
            .ok_or_else(|| "presence unit without sender".to_string())?;
        let contact_jid = jid::bare(from);

        let lookup = || {
            self.store
                .status(account_jid, contact_jid)
                .unwrap_or_else(|| ContactStatus::new(account_jid, contact_jid))
        };

        if stanza.attr("type") == Some("unavailable") {
            // Nothing after the type matters for an unavailability
            // notice; the stored status text is left alone.
            let mut update = lookup();
            update.presence = Presence::Offline;
            self.store.upsert_status(update);
            debug!(target: "PresenceReducer", "{contact_jid} is offline");
            return Ok(());
        }

        let mut update = lookup();
        update.presence = Presence::Available;
        if let Some(show) = stanza.get_optional_child("show") {
            match show.text().as_str() {
                "away" => update.presence = Presence::Away,
                "dnd" => update.presence = Presence::DoNotDisturb,
                _ => {}
            }
        }
        if let Some(status) = stanza.get_optional_child("status") {
            update.status_text = Some(status.text());
        }
        debug!(
            target: "PresenceReducer",
            "{contact_jid} is {:?}", update.presence
        );
        self.store.upsert_status(update);
        Ok(())
    }
}

impl StanzaListener for PresenceReducer {
    fn on_stanza(&self, stanza: &Stanza) {
        if stanza.name != "presence" {
            return;
        }
        if let Err(reason) = self.reduce(stanza) {
            // Malformed units are dropped, never fatal.
            warn!(target: "PresenceReducer", "ignoring presence unit: {reason}");
        }
    }
}
