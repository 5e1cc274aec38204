use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    /// The stream opening did not match the expected stream element.
    /// Fatal for the current stream; framing must be restarted.
    #[error("malformed stream opening: {0}")]
    MalformedStream(String),
    /// A single stanza failed to decode. Recoverable: the caller may
    /// resync and continue reading siblings.
    #[error("malformed stanza: {0}")]
    MalformedStanza(String),
    /// I/O failure or internal reader corruption. Fatal for the
    /// connection; the reader cannot be trusted afterwards.
    #[error("transport error: {0}")]
    Transport(String),
    /// An operation that needs a bound source was called while detached.
    #[error("codec is not attached to a byte source")]
    NotAttached,
}

impl From<std::io::Error> for StreamError {
    fn from(e: std::io::Error) -> Self {
        StreamError::Transport(e.to_string())
    }
}

impl StreamError {
    /// Whether the stream can keep going after this error (skip and
    /// resync) or the connection has to be torn down.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StreamError::MalformedStanza(_))
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;
