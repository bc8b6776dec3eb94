// crates/flow_store/src/file.rs

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use tokio::{fs, sync::RwLock};
use tracing::{info, warn};

use crate::{
    node::FlowDocument,
    store::{FlowRuntime, FlowStore, FlowStoreError, Result, RuntimeSettings, validate_document},
};

/// Name of the flow file inside the user directory.
pub const FLOW_FILE: &str = "flows.json";

/// Flow runtime persisting the active document as `<userDir>/flows.json`.
#[derive(Debug, Clone, Default)]
pub struct FileFlowRuntime {
    path: Arc<RwLock<Option<PathBuf>>>,
    flows: Arc<RwLock<FlowDocument>>,
    running: Arc<AtomicBool>,
}

impl FileFlowRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Where the flows are written, once `init` has run.
    pub async fn flow_file(&self) -> Option<PathBuf> {
        self.path.read().await.clone()
    }

    async fn load(path: &Path) -> Result<FlowDocument> {
        match fs::read_to_string(path).await {
            Ok(text) if text.trim().is_empty() => Ok(FlowDocument::new()),
            Ok(text) => Ok(FlowDocument::from_json(&text)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!("no flow file at {}, starting empty", path.display());
                Ok(FlowDocument::new())
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl FlowStore for FileFlowRuntime {
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
        validate_document(&flows)?;
        let path = self
            .path
            .read()
            .await
            .clone()
            .ok_or(FlowStoreError::NotInitialized)?;

        // atomic replace through a sibling temp file
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, flows.to_json_pretty()?).await?;
        fs::rename(&tmp, &path).await?;

        info!(nodes = flows.len(), "deployed flows to {}", path.display());
        *self.flows.write().await = flows;
        Ok(())
    }
}

#[async_trait]
impl FlowRuntime for FileFlowRuntime {
    async fn init(&self, settings: RuntimeSettings) -> Result<()> {
        fs::create_dir_all(&settings.user_dir).await?;
        *self.path.write().await = Some(settings.user_dir.join(FLOW_FILE));
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let path = self
            .path
            .read()
            .await
            .clone()
            .ok_or(FlowStoreError::NotInitialized)?;
        let flows = Self::load(&path).await?;
        if let Err(err) = validate_document(&flows) {
            warn!("stored flows in {} are invalid: {err}", path.display());
        }
        *self.flows.write().await = flows;
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
    use tempfile::TempDir;

    fn settings(dir: &Path) -> RuntimeSettings {
        RuntimeSettings {
            user_dir: dir.to_path_buf(),
            http_admin_root: "/".into(),
            http_node_root: "/red".into(),
        }
    }

    #[tokio::test]
    async fn deploy_persists_and_reloads() {
        let tmp = TempDir::new().unwrap();
        let runtime = FileFlowRuntime::new();
        runtime.init(settings(tmp.path())).await.unwrap();
        runtime.start().await.unwrap();
        assert!(runtime.get_flows().await.unwrap().is_empty());

        let doc: FlowDocument = vec![FlowNode::new("t1", NodeType::Tab).with("label", "Flow 1")].into();
        runtime.deploy_flows(doc.clone()).await.unwrap();
        assert!(tmp.path().join(FLOW_FILE).exists());

        let reopened = FileFlowRuntime::new();
        reopened.init(settings(tmp.path())).await.unwrap();
        reopened.start().await.unwrap();
        assert_eq!(reopened.get_flows().await.unwrap(), doc);
    }

    #[tokio::test]
    async fn invalid_deploy_leaves_file_untouched() {
        let tmp = TempDir::new().unwrap();
        let runtime = FileFlowRuntime::new();
        runtime.init(settings(tmp.path())).await.unwrap();
        runtime.start().await.unwrap();

        let bad: FlowDocument = vec![FlowNode::new("a", NodeType::Tab), FlowNode::new("a", NodeType::Tab)].into();
        assert!(matches!(runtime.deploy_flows(bad).await, Err(FlowStoreError::Validation(_))));
        assert!(!tmp.path().join(FLOW_FILE).exists());
    }

    #[tokio::test]
    async fn not_running_before_start() {
        let runtime = FileFlowRuntime::new();
        assert!(matches!(runtime.get_flows().await, Err(FlowStoreError::NotInitialized)));
        assert!(matches!(runtime.start().await, Err(FlowStoreError::NotInitialized)));
    }
}
