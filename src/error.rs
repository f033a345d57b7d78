use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum AgentError {
    #[error("display {display} not ready after {waited_ms}ms")]
    DisplayStartTimeout { display: String, waited_ms: u128 },
    #[error("display session already started")]
    DisplayAlreadyStarted,
    #[error("display session not started")]
    DisplayNotStarted,
    #[error("spawn error: {0}")]
    Spawn(String),
    #[error("screenshot error: {0}")]
    Screenshot(String),
    #[error("model error: {0}")]
    Model(String),
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::Io(err.to_string())
    }
}
