use std::io;

use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use thiserror::Error;
use tokio::sync::mpsc::error::SendError as TokioSendError;

use crate::event::GraphEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum TopologyError {
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Channel error: {0}")]
    Channel(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Graph conflict: {0}")]
    Conflict(String),
    #[error("Unable to decode graph message: {0}")]
    Decode(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
}

impl TopologyError {
    /// True for failures whose precondition no longer holds (a missing node or edge). These are
    /// reported but never retried; a later sync is expected to correct the state.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TopologyError::NotFound(_))
    }
}

impl From<JsonError> for TopologyError {
    fn from(src: JsonError) -> TopologyError {
        TopologyError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<toml::de::Error> for TopologyError {
    fn from(src: toml::de::Error) -> TopologyError {
        TopologyError::Config(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for TopologyError {
    fn from(src: toml::ser::Error) -> TopologyError {
        TopologyError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<io::Error> for TopologyError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => TopologyError::NotFound(format!("{x}")),
            _ => TopologyError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

impl From<TokioSendError<GraphEvent>> for TopologyError {
    fn from(x: TokioSendError<GraphEvent>) -> Self {
        TopologyError::Channel(format!(
            "Channel update send Error, could not transmit graph event {}",
            x.0
        ))
    }
}
