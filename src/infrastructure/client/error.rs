//! Client-side errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Not connected to server")]
    NotConnected,

    #[error("Client stopped")]
    Stopped,

    #[error("Probe setup failed: {0}")]
    Probe(#[from] ProbeError),
}

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Health request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Health endpoint returned status {0}")]
    Status(u16),
}
