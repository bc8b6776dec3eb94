// crates/flow_store/src/store.rs

use std::{collections::HashSet, path::PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::node::FlowDocument;

/// Errors a flow store or flow runtime can return.
#[derive(Error, Debug)]
pub enum FlowStoreError {
    /// The flow engine has not been initialised or started yet.
    #[error("flow runtime is not initialised")]
    NotInitialized,

    /// The document handed to `deploy_flows` is structurally invalid.
    #[error("invalid flow document: {0}")]
    Validation(String),

    /// Reading or writing the backing storage failed.
    #[error("flow storage error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing storage did not contain a parseable document.
    #[error("flow json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FlowStoreError>;

/// Read and replace the active flow document.
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Current flow list. Fails with `NotInitialized` if the engine is not up.
    async fn get_flows(&self) -> Result<FlowDocument>;

    /// Validate and activate a new flow list.
    async fn deploy_flows(&self, flows: FlowDocument) -> Result<()>;
}

/// Settings handed to the flow runtime when the host component starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub user_dir: PathBuf,
    pub http_admin_root: String,
    pub http_node_root: String,
}

/// A flow store that also has a lifecycle of its own.
#[async_trait]
pub trait FlowRuntime: FlowStore {
    /// Hand the runtime its settings. Called once per host start.
    async fn init(&self, settings: RuntimeSettings) -> Result<()>;

    /// Load the stored flows and begin serving them.
    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    fn is_running(&self) -> bool;
}

/// Structural checks every store applies before accepting a document.
pub fn validate_document(doc: &FlowDocument) -> Result<()> {
    let mut seen = HashSet::with_capacity(doc.len());
    for (index, node) in doc.iter().enumerate() {
        let id = match node.id() {
            Some(id) if !id.is_empty() => id,
            _ => {
                return Err(FlowStoreError::Validation(format!(
                    "node #{index} has no id"
                )));
            }
        };
        if !seen.insert(id) {
            return Err(FlowStoreError::Validation(format!("duplicate node id {id}")));
        }
        if node.str_field("type").is_none() {
            return Err(FlowStoreError::Validation(format!("node {id} has no type")));
        }
        if let Some(wires) = node.get("wires") {
            let valid = wires.as_array().is_some_and(|ports| {
                ports.iter().all(|port| {
                    port.as_array()
                        .is_some_and(|targets| targets.iter().all(Value::is_string))
                })
            });
            if !valid {
                return Err(FlowStoreError::Validation(format!(
                    "node {id} has malformed wires"
                )));
            }
        }
    }
    Ok(())
}
