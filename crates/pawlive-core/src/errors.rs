use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LiveError {
    #[error("token request failed: {0}")]
    TokenRequest(String),
    #[error("transport connect failed: {0}")]
    TransportConnect(String),
    #[error("transport error: {0}")]
    TransportRuntime(String),
    #[error("signaling error: {0}")]
    Signaling(String),
    #[error("not connected")]
    NotConnected,
    #[error("operation cancelled by teardown")]
    Cancelled,
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("configuration error: {0}")]
    Config(String),
}
