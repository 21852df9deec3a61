use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid spatial cell: {0}")]
    InvalidCell(String),

    #[error("unparseable expiry timestamp: {0}")]
    Timestamp(String),

    #[error("session closed")]
    SessionClosed,
}

impl From<tokio_tungstenite::tungstenite::Error> for CoreError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        CoreError::Transport(e.to_string())
    }
}
