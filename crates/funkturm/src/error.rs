use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("no active broker connection")]
    NotConnected,

    #[error("timed out waiting for broker connection")]
    ConnectTimeout,

    #[error("broker rejected the connection as not authorized")]
    NotAuthorized,

    #[error("credential refresh failed: {0}")]
    CredentialRefresh(String),

    #[error("broker adapter is shutting down")]
    Shutdown,
}

impl From<zeromq::ZmqError> for BrokerError {
    fn from(err: zeromq::ZmqError) -> Self {
        BrokerError::Transport(err.to_string())
    }
}
