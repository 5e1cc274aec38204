use crate::session::StanzaListener;
use crate::store::{ChannelRecord, ContactStore, RecordStore};
use chirp_xml::{Stanza, StanzaBuilder, jid};
use log::{debug, warn};
use std::sync::Arc;

pub const ROSTER_NAMESPACE: &str = "jabber:iq:roster";
pub const PUBSUB_NAMESPACE: &str = "http://jabber.org/protocol/pubsub";
pub const PUBSUB_EVENT_NAMESPACE: &str = "http://jabber.org/protocol/pubsub#event";

/// Persists pushed channel content (pubsub event items) as generic
/// records; the payload stays opaque to the engine.
pub struct ChannelWriter {
    store: Arc<dyn RecordStore>,
}

impl ChannelWriter {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

impl StanzaListener for ChannelWriter {
    fn on_stanza(&self, stanza: &Stanza) {
        if stanza.name != "message" {
            return;
        }
        let Some(event) = stanza
            .child_elements()
            .find(|c| c.name == "event" && c.namespace == PUBSUB_EVENT_NAMESPACE)
        else {
            return;
        };
        for items in event.get_children_by_name("items") {
            let Some(node) = items.attr("node") else {
                warn!(target: "ChannelWriter", "items element without a node attribute");
                continue;
            };
            for item in items.get_children_by_name("item") {
                let Some(item_id) = item.attr("id") else {
                    warn!(target: "ChannelWriter", "item without an id on node {node}");
                    continue;
                };
                let payload = item
                    .child_elements()
                    .next()
                    .map(|p| p.to_string())
                    .unwrap_or_default();
                self.store.insert_record(ChannelRecord {
                    node: node.to_string(),
                    item_id: item_id.to_string(),
                    author: item.attr("publisher").map(str::to_string),
                    payload,
                });
                debug!(target: "ChannelWriter", "stored {item_id}@{node}");
            }
        }
    }
}

/// Folds roster pull results into contact rows.
pub struct RosterWriter {
    store: Arc<dyn ContactStore>,
}

impl RosterWriter {
    pub fn new(store: Arc<dyn ContactStore>) -> Self {
        Self { store }
    }
}

impl StanzaListener for RosterWriter {
    fn on_stanza(&self, stanza: &Stanza) {
        if stanza.name != "iq" || !matches!(stanza.attr("type"), Some("result") | Some("set")) {
            return;
        }
        let Some(query) = stanza
            .child_elements()
            .find(|c| c.name == "query" && c.namespace == ROSTER_NAMESPACE)
        else {
            return;
        };
        let Some(via) = stanza.via.as_deref() else {
            warn!(target: "RosterWriter", "roster result without routing context");
            return;
        };
        let account_jid = jid::bare(via);
        for item in query.get_children_by_name("item") {
            let Some(item_jid) = item.attr("jid") else {
                warn!(target: "RosterWriter", "roster item without a jid");
                continue;
            };
            if item.attr("subscription") == Some("remove") {
                continue;
            }
            self.store
                .upsert_contact(account_jid, item_jid, item.attr("name"));
        }
    }
}

/// Roster pull request, sent once per authenticated-session entry.
pub fn roster_request(id: &str) -> Stanza {
    StanzaBuilder::new("iq")
        .namespace("jabber:client")
        .attr("type", "get")
        .attr("id", id)
        .child(StanzaBuilder::new("query").namespace(ROSTER_NAMESPACE).build())
        .build()
}

/// Channel pull request for the account's own channel node.
pub fn channel_request(id: &str, account_jid: &str) -> Stanza {
    let node = format!("/user/{}/channel", jid::bare(account_jid));
    StanzaBuilder::new("iq")
        .namespace("jabber:client")
        .attr("type", "get")
        .attr("id", id)
        .child(
            StanzaBuilder::new("pubsub")
                .namespace(PUBSUB_NAMESPACE)
                .child(
                    StanzaBuilder::new("items")
                        .namespace(PUBSUB_NAMESPACE)
                        .attr("node", node)
                        .build(),
                )
                .build(),
        )
        .build()
}
