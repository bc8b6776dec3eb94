// crates/flow_store/src/memory.rs

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{
    node::FlowDocument,
    store::{FlowRuntime, FlowStore, FlowStoreError, Result, RuntimeSettings, validate_document},
};

/// Flow runtime that keeps everything in memory.
///
/// Used by embedders that own persistence themselves and by the tests, which
/// can make deploys fail or take the store offline.
#[derive(Debug, Clone, Default)]
pub struct MemoryFlowStore {
    flows: Arc<RwLock<FlowDocument>>,
    settings: Arc<RwLock<Option<RuntimeSettings>>>,
    running: Arc<AtomicBool>,
    reject_deploys: Arc<AtomicBool>,
    deploys: Arc<AtomicUsize>,
}

impl MemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that is already running with `flows` loaded.
    pub fn running_with(flows: FlowDocument) -> Self {
        Self {
            flows: Arc::new(RwLock::new(flows)),
            running: Arc::new(AtomicBool::new(true)),
            ..Self::default()
        }
    }

    /// Make every following deploy fail with a validation error.
    pub fn reject_deploys(&self, reject: bool) {
        self.reject_deploys.store(reject, Ordering::SeqCst);
    }

    /// Number of deploys that were accepted.
    pub fn deploy_count(&self) -> usize {
        self.deploys.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> FlowDocument {
        self.flows.read().await.clone()
    }

    pub async fn settings(&self) -> Option<RuntimeSettings> {
        self.settings.read().await.clone()
    }
}

#[async_trait]
impl FlowStore for MemoryFlowStore {
    async fn get_flows(&self) -> Result<FlowDocument> {
        if !self.is_running() {
            return Err(FlowStoreError::NotInitialized);
        }
        Ok(self.flows.read().await.clone())
    }

    async fn deploy_flows(&self, flows: FlowDocument) -> Result<()> {
        if !self.is_running() {
            return Err(FlowStoreError::NotInitialized);
        }
        if self.reject_deploys.load(Ordering::SeqCst) {
            return Err(FlowStoreError::Validation("deploy rejected".into()));
        }
        validate_document(&flows)?;
        debug!(nodes = flows.len(), "memory store: deploying flows");
        *self.flows.write().await = flows;
        self.deploys.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl FlowRuntime for MemoryFlowStore {
    async fn init(&self, settings: RuntimeSettings) -> Result<()> {
        *self.settings.write().await = Some(settings);
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        if self.settings.read().await.is_none() {
            return Err(FlowStoreError::NotInitialized);
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{FlowNode, NodeType};
    use std::path::PathBuf;

    fn settings() -> RuntimeSettings {
        RuntimeSettings {
            user_dir: PathBuf::from("/tmp/red"),
            http_admin_root: "/".into(),
            http_node_root: "/red".into(),
        }
    }

    #[tokio::test]
    async fn get_flows_requires_running_runtime() {
        let store = MemoryFlowStore::new();
        assert!(matches!(store.get_flows().await, Err(FlowStoreError::NotInitialized)));

        store.init(settings()).await.unwrap();
        store.start().await.unwrap();
        assert!(store.get_flows().await.unwrap().is_empty());

        store.stop().await.unwrap();
        assert!(store.get_flows().await.is_err());
    }

    #[tokio::test]
    async fn start_without_init_fails() {
        let store = MemoryFlowStore::new();
        assert!(store.start().await.is_err());
        assert!(!store.is_running());
    }

    #[tokio::test]
    async fn rejected_deploy_keeps_previous_flows() {
        let initial: FlowDocument = vec![FlowNode::new("t1", NodeType::Tab)].into();
        let store = MemoryFlowStore::running_with(initial.clone());

        store.reject_deploys(true);
        let result = store.deploy_flows(FlowDocument::new()).await;
        assert!(matches!(result, Err(FlowStoreError::Validation(_))));
        assert_eq!(store.snapshot().await, initial);
        assert_eq!(store.deploy_count(), 0);

        store.reject_deploys(false);
        store.deploy_flows(FlowDocument::new()).await.unwrap();
        assert!(store.snapshot().await.is_empty());
        assert_eq!(store.deploy_count(), 1);
    }
}
