// src/error.rs

use flow_store::FlowStoreError;
use thiserror::Error;

use crate::controller::ControllerState;

/// Everything the bridge can fail with.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// A required attribute is missing or unusable. Fatal to `start`.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A flow document supplied as configuration could not be parsed.
    #[error("invalid flows: {0}")]
    Validation(String),

    /// The flow store could not hand out the current flows.
    #[error("flow store unavailable: {0}")]
    Adapter(#[source] FlowStoreError),

    /// The flow store refused a document we tried to deploy.
    #[error("deploy failed: {0}")]
    Deploy(#[source] FlowStoreError),

    /// The flow runtime failed to come up or go down.
    #[error("flow runtime error: {0}")]
    Runtime(#[source] FlowStoreError),

    /// Binding or accepting on a socket failed.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// The component is not in a state where this operation is valid.
    #[error("invalid state for this operation: {0:?}")]
    InvalidState(ControllerState),
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> BridgeError {
        BridgeError::Validation(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
