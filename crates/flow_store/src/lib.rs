//! Flow document model and the flow store contract the bridge consumes.
//!
//! A flow document is the flat, ordered node list a Node-RED style runtime
//! persists. The bridge never owns that runtime: it talks to it through
//! [`FlowStore`] (read / deploy) and [`FlowRuntime`] (lifecycle).
//!
//! ```rust
//! use flow_store::{FlowDocument, FlowNode, NodeType};
//! let mut doc = FlowDocument::new();
//! doc.push(FlowNode::new("t1", NodeType::Tab));
//! assert_eq!(doc.tabs(), vec!["t1"]);
//! ```
pub mod file;
pub mod memory;
pub mod node;
pub mod store;

pub use file::{FLOW_FILE, FileFlowRuntime};
pub use memory::MemoryFlowStore;
pub use node::{FlowDocument, FlowNode, NodeType};
pub use store::{FlowRuntime, FlowStore, FlowStoreError, RuntimeSettings, validate_document};
