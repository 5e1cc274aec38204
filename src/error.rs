use chirp_xml::StreamError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    /// Credentials were rejected by the server. Surfaced to the user
    /// once; never retried automatically.
    #[error("authentication rejected for {jid}")]
    AuthenticationFailure { jid: String },
    /// The configured account identifier is unusable.
    #[error("invalid account identifier: {0}")]
    InvalidAccount(String),
    #[error("session is not connected")]
    NotConnected,
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// The server closed the negotiation early or answered with
    /// something the login flow cannot use.
    #[error("unexpected server response during {phase}: {detail}")]
    Negotiation { phase: &'static str, detail: String },
}

pub type Result<T> = std::result::Result<T, SessionError>;
