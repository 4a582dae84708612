use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("connection is shut down")]
    Shutdown,

    #[error("invalid encoding type {0}")]
    InvalidEncoding(String),

    #[error("invalid rpc number {0:#x}")]
    InvalidRpcNumber(u64),

    #[error("connect timeout: expect within {0:?}")]
    ConnectTimeout(Duration),

    #[error("unexpected HTTP response: {0}")]
    UnexpectedHttpResponse(String),

    #[error("wrong format '{0}', expect protocol@addr")]
    InvalidEndpoint(String),

    #[error("service already defined: {0}")]
    ServiceAlreadyDefined(String),

    #[error("no available services")]
    NoAvailableServices,

    /// Error message produced by the remote server, carried in `Header.error`.
    #[error("{0}")]
    Server(String),

    #[error("reading body: {0}")]
    ReadingBody(String),

    #[error("frame too large: {0} bytes (max {1} bytes)")]
    FrameTooLarge(usize, usize),

    #[error("serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("registry error: {0}")]
    Registry(String),
}

impl RpcError {
    /// True when the error means the peer closed the connection cleanly
    /// between frames, as opposed to a mid-frame failure worth logging.
    pub fn is_connection_closed(&self) -> bool {
        matches!(
            self,
            RpcError::Io(err) if matches!(
                err.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
            )
        )
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
