//! Top-level error for the `tracelink` binary.

use thiserror::Error;

use crate::client::ClientError;
use crate::config::ConfigError;
use crate::server::ServerError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("failed to render output: {0}")]
    Output(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
