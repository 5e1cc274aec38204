/// Session construction parameters. Replaces the connection-debug
/// globals of older builds; everything is explicit per session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Server address override as `host:port`. When `None`, the server
    /// is derived from the account domain with [`DEFAULT_PORT`].
    pub server: Option<String>,
    /// Collector address for diagnostic beacons. When `None`, beacons
    /// go to `diagnostics.<account domain>`.
    pub beacon_collector: Option<String>,
    /// Replay decoded stanzas to the trace log.
    pub trace_stanzas: bool,
    /// Bound on queued-but-not-yet-executed commands.
    pub queue_depth: usize,
    /// Preferred stream language, sent on the stream header.
    pub lang: Option<String>,
}

pub const DEFAULT_PORT: u16 = 5222;

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server: None,
            beacon_collector: None,
            trace_stanzas: false,
            queue_depth: 32,
            lang: None,
        }
    }
}
