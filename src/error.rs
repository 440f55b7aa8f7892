pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the node and its transport.
///
/// Transport and timeout failures against a remote peer are equivalent from
/// the caller's point of view: the peer is treated as unreachable and
/// recovery is left to the next stabilization round.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer did not answer within the liveness deadline")]
    Timeout,

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    #[error("frame of {0} bytes exceeds the message limit")]
    MessageTooLarge(usize),

    #[error("invalid host: {0}")]
    InvalidHost(String),
}
