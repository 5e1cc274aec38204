use dashmap::DashMap;

/// Availability state reduced from presence units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Available,
    Away,
    DoNotDisturb,
    Offline,
}

/// Persisted contact state, unique by `(account_jid, jid)`. A later
/// update for the same key overwrites, never appends.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactStatus {
    pub account_jid: String,
    pub jid: String,
    pub presence: Presence,
    pub status_text: Option<String>,
}

impl ContactStatus {
    pub fn new(account_jid: impl Into<String>, jid: impl Into<String>) -> Self {
        Self {
            account_jid: account_jid.into(),
            jid: jid.into(),
            presence: Presence::Offline,
            status_text: None,
        }
    }
}

/// A generic protocol-unit record persisted by the channel writer.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRecord {
    pub node: String,
    pub item_id: String,
    pub author: Option<String>,
    /// Serialized payload of the item, kept opaque.
    pub payload: String,
}

/// Contact persistence. Implementations must provide per-key atomic
/// upserts; callers may hit the same key from concurrent dispatches.
pub trait ContactStore: Send + Sync {
    fn status(&self, account_jid: &str, jid: &str) -> Option<ContactStatus>;
    fn upsert_status(&self, update: ContactStatus);
    /// Roster entry upsert. `name` is the server-side display name.
    fn upsert_contact(&self, account_jid: &str, jid: &str, name: Option<&str>);
    fn contacts(&self, account_jid: &str) -> Vec<String>;
}

/// Generic channel-content persistence, atomic per node.
pub trait RecordStore: Send + Sync {
    fn insert_record(&self, record: ChannelRecord);
    fn records(&self, node: &str) -> Vec<ChannelRecord>;
}

/// Supplies login settings by name; see [`SETTING_JID`] and
/// [`SETTING_PASSWORD`].
pub trait CredentialSource: Send + Sync {
    fn get(&self, setting: &str) -> Option<String>;
}

pub const SETTING_JID: &str = "jid";
pub const SETTING_PASSWORD: &str = "password";

impl CredentialSource for std::collections::HashMap<String, String> {
    fn get(&self, setting: &str) -> Option<String> {
        std::collections::HashMap::get(self, setting).cloned()
    }
}

/// In-memory reference store. The concurrent maps give the per-key
/// atomicity the dispatch path relies on.
#[derive(Default)]
pub struct MemoryStore {
    statuses: DashMap<(String, String), ContactStatus>,
    contacts: DashMap<(String, String), Option<String>>,
    records: DashMap<String, Vec<ChannelRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored status rows, across all accounts.
    pub fn status_count(&self) -> usize {
        self.statuses.len()
    }
}

impl ContactStore for MemoryStore {
    fn status(&self, account_jid: &str, jid: &str) -> Option<ContactStatus> {
        self.statuses
            .get(&(account_jid.to_string(), jid.to_string()))
            .map(|s| s.value().clone())
    }

    fn upsert_status(&self, update: ContactStatus) {
        self.statuses
            .insert((update.account_jid.clone(), update.jid.clone()), update);
    }

    fn upsert_contact(&self, account_jid: &str, jid: &str, name: Option<&str>) {
        self.contacts.insert(
            (account_jid.to_string(), jid.to_string()),
            name.map(str::to_string),
        );
    }

    fn contacts(&self, account_jid: &str) -> Vec<String> {
        self.contacts
            .iter()
            .filter(|e| e.key().0 == account_jid)
            .map(|e| e.key().1.clone())
            .collect()
    }
}

impl RecordStore for MemoryStore {
    fn insert_record(&self, record: ChannelRecord) {
        self.records
            .entry(record.node.clone())
            .or_default()
            .push(record);
    }

    fn records(&self, node: &str) -> Vec<ChannelRecord> {
        self.records
            .get(node)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }
}
