use chirp_xml::{Stanza, StanzaBuilder};

pub const BEACON_NAMESPACE: &str = "urn:xmpp:beacon:0";

/// Highest (least urgent) request priority.
pub const MAX_PRIORITY: u8 = 10;
/// Below this spacing nothing is sent, whatever the urgency.
const HARD_MINIMUM_MS: i64 = 10_000;
/// Required spacing per unit of effective priority.
const PRIORITY_STEP_MS: i64 = 30_000;

/// Adaptive throttle for the periodic diagnostic beacon. Requests carry
/// a priority in `0..=10` (0 = send now, 10 = only when idle for a long
/// while); the scheduler keeps the beacon from flooding the network
/// without ever losing it entirely.
///
/// The tracked priority is only ever lowered by a dropped request
/// between sends, never raised; a send resets it to [`MAX_PRIORITY`].
/// That asymmetry is deliberate: it lets an urgent request that arrived
/// inside the hard-minimum window win the next opportunity instead of
/// being shadowed by earlier lazy requests.
#[derive(Debug)]
pub struct BeaconScheduler {
    last_send_ms: i64,
    tracked_priority: u8,
}

impl Default for BeaconScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl BeaconScheduler {
    pub fn new() -> Self {
        Self {
            last_send_ms: 0,
            tracked_priority: MAX_PRIORITY,
        }
    }

    /// Effective priority of a request, sampled at submission time.
    pub fn effective_priority(&self, requested: u8) -> u8 {
        requested.min(MAX_PRIORITY).min(self.tracked_priority)
    }

    /// Decide whether a request with the given effective priority may
    /// send now. Mutates the scheduler accordingly.
    pub fn should_send(&mut self, effective: u8, now_ms: i64) -> bool {
        let elapsed = now_ms - self.last_send_ms;
        if elapsed < PRIORITY_STEP_MS * i64::from(effective) {
            // Too soon for this urgency.
            return false;
        }
        if elapsed < HARD_MINIMUM_MS {
            // Inside the hard minimum: remember the urgency so a later
            // request is not blocked by a previously lazy one.
            self.tracked_priority = effective;
            return false;
        }
        self.tracked_priority = MAX_PRIORITY;
        self.last_send_ms = now_ms;
        true
    }

    pub fn tracked_priority(&self) -> u8 {
        self.tracked_priority
    }

    pub fn last_send_ms(&self) -> i64 {
        self.last_send_ms
    }
}

/// Scalar connectivity/signal readings appended at send time.
pub trait DiagnosticSampler: Send + Sync {
    fn append_to(&self, report: &mut BeaconReport);
}

/// Diagnostic report under construction.
#[derive(Debug, Default)]
pub struct BeaconReport {
    readings: Vec<(String, String)>,
}

impl BeaconReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reading(&mut self, name: impl Into<String>, value: impl ToString) {
        self.readings.push((name.into(), value.to_string()));
    }

    pub fn readings(&self) -> &[(String, String)] {
        &self.readings
    }

    pub fn into_stanza(self, from: &str, to: &str, id: &str) -> Stanza {
        let readings = self.readings.into_iter().map(|(name, value)| {
            StanzaBuilder::new("reading")
                .namespace(BEACON_NAMESPACE)
                .attr("name", name)
                .attr("value", value)
                .build()
        });
        StanzaBuilder::new("message")
            .namespace("jabber:client")
            .attr("from", from)
            .attr("to", to)
            .attr("id", id)
            .child(
                StanzaBuilder::new("beacon")
                    .namespace(BEACON_NAMESPACE)
                    .children(readings)
                    .build(),
            )
            .build()
    }
}
