// src/controller.rs

use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use flow_store::{FlowDocument, FlowRuntime, FlowStore, RuntimeSettings};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    bridge::Direction,
    config::{BridgeConfig, ConfigDiff},
    endpoint::BridgeEndpoint,
    error::{BridgeError, Result},
    reconcile::{FirstTab, PlacementPolicy},
    server::{BridgeServer, ConnectionHandler, ConnectionRegistry, DrainHandler},
    wiring::FlowSync,
};

#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ControllerState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Lifecycle entry points the orchestrator drives.
///
/// Calls are expected one at a time; each returns once the transition has
/// completed, with the error that made it fail.
#[async_trait]
pub trait Component: Send {
    fn name(&self) -> String;

    fn state(&self) -> ControllerState;

    async fn start(&mut self) -> Result<()>;

    async fn stop(&mut self) -> Result<()>;

    /// Apply pending restart-only configuration changes.
    async fn update(&mut self) -> Result<()>;
}

/// Everything that only exists while the component runs.
struct Running {
    server: BridgeServer,
    input: BridgeEndpoint,
    output: BridgeEndpoint,
    dispatcher: JoinHandle<()>,
    sync: FlowSync,
}

/// Hosts a flow runtime and keeps its bridge nodes in line with our ports.
pub struct BridgeController {
    name: String,
    config: BridgeConfig,
    runtime: Arc<dyn FlowRuntime>,
    store: Arc<dyn FlowStore>,
    handler: Arc<dyn ConnectionHandler>,
    placement: Arc<dyn PlacementPolicy>,
    state: ControllerState,
    needs_restart: bool,
    running: Option<Running>,
    outbound_tx: UnboundedSender<String>,
    outbound_rx: Option<UnboundedReceiver<String>>,
}

impl BridgeController {
    pub fn new<R>(name: impl Into<String>, config: BridgeConfig, runtime: Arc<R>) -> Self
    where
        R: FlowRuntime + 'static,
    {
        let (outbound_tx, outbound_rx) = unbounded_channel();
        Self {
            name: name.into(),
            config,
            runtime: runtime.clone(),
            store: runtime,
            handler: Arc::new(DrainHandler),
            placement: Arc::new(FirstTab),
            state: ControllerState::Stopped,
            needs_restart: false,
            running: None,
            outbound_tx,
            outbound_rx: Some(outbound_rx),
        }
    }

    /// Hand accepted connections to `handler` instead of draining them.
    pub fn with_connection_handler(mut self, handler: Arc<dyn ConnectionHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn with_placement(mut self, placement: Arc<dyn PlacementPolicy>) -> Self {
        self.placement = placement;
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn needs_restart(&self) -> bool {
        self.needs_restart
    }

    /// Messages the flow sent through the output bridge. Can be taken once.
    pub fn take_outbound(&mut self) -> Option<UnboundedReceiver<String>> {
        self.outbound_rx.take()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.server.local_addr())
    }

    pub fn connections(&self) -> Option<&ConnectionRegistry> {
        self.running.as_ref().map(|r| r.server.connections())
    }

    /// Number of flow-side peers connected to the given bridge endpoint.
    pub fn bridge_peers(&self, direction: Direction) -> usize {
        self.running.as_ref().map_or(0, |r| match direction {
            Direction::Input => r.input.peer_count(),
            Direction::Output => r.output.peer_count(),
        })
    }

    /// A message arrived on the Kevoree input port.
    ///
    /// Kicks off the inbound wiring step in the background and pushes the
    /// message to the flow. Returns the number of flow peers reached.
    pub fn on_inbound(&self, msg: &str) -> Result<usize> {
        let running = self
            .running
            .as_ref()
            .ok_or(BridgeError::InvalidState(self.state))?;
        running.sync.spawn_inbound();
        let delivered = running.input.broadcast(msg);
        if delivered == 0 {
            debug!("\"{}\" no flow peer on the input bridge yet", self.name);
        }
        Ok(delivered)
    }

    /// Take a new configuration from the orchestrator.
    ///
    /// `flows` is deployed right away; anything else is remembered and applied
    /// by the next [`Component::update`].
    pub async fn apply_config(&mut self, config: BridgeConfig) -> ConfigDiff {
        let diff = ConfigDiff::between(&self.config, &config);
        self.config = config;

        if diff.needs_restart() {
            info!(fields = ?diff.restart, "\"{}\" restart required", self.name);
            self.needs_restart = true;
        }
        if diff.flows_changed {
            self.deploy_configured_flows().await;
        }
        diff
    }

    async fn deploy_configured_flows(&self) {
        let Some(running) = &self.running else {
            debug!("\"{}\" not running, flows deploy on next start", self.name);
            return;
        };
        match self.config.parse_flows() {
            Ok(Some(doc)) => match running.sync.deploy_document(doc).await {
                Ok(()) => info!("\"{}\" flows updated", self.name),
                Err(err) => error!("\"{}\" {err}", self.name),
            },
            Ok(None) => debug!("\"{}\" flows attribute cleared, keeping deployed flows", self.name),
            Err(err) => error!("\"{}\" ignoring flows update: {err}", self.name),
        }
    }

    async fn boot(&self) -> Result<Running> {
        let settings = self.config.validate(&self.name)?;
        let initial = self.config.parse_flows()?;
        let ports = self.config.ports();
        let sync = FlowSync::new(self.store.clone(), ports).with_placement(self.placement.clone());

        let server = BridgeServer::bind(&self.config.listen_addr(), self.handler.clone()).await?;
        info!(
            "\"{}\" server started at http://{}{}",
            self.name,
            server.local_addr(),
            self.config.http_admin_root
        );

        if let Err(err) = self.start_runtime(settings, initial, &sync).await {
            server.shutdown().await;
            return Err(err);
        }

        let input = match BridgeEndpoint::bind(Direction::Input, ports.input, None).await {
            Ok(endpoint) => endpoint,
            Err(err) => {
                self.stop_runtime().await;
                server.shutdown().await;
                return Err(err);
            }
        };
        let (forward_tx, forward_rx) = unbounded_channel();
        let output = match BridgeEndpoint::bind(Direction::Output, ports.output, Some(forward_tx)).await {
            Ok(endpoint) => endpoint,
            Err(err) => {
                input.shutdown().await;
                self.stop_runtime().await;
                server.shutdown().await;
                return Err(err);
            }
        };
        let dispatcher = tokio::spawn(dispatch_outbound(
            forward_rx,
            self.outbound_tx.clone(),
            sync.clone(),
        ));

        Ok(Running {
            server,
            input,
            output,
            dispatcher,
            sync,
        })
    }

    async fn start_runtime(
        &self,
        settings: RuntimeSettings,
        initial: Option<FlowDocument>,
        sync: &FlowSync,
    ) -> Result<()> {
        self.runtime.init(settings).await.map_err(BridgeError::Runtime)?;
        self.runtime.start().await.map_err(BridgeError::Runtime)?;
        let deployed = match initial {
            Some(doc) => sync.deploy_document(doc).await,
            None => sync.ensure_bridges().await.map(|_| ()),
        };
        if let Err(err) = deployed {
            self.stop_runtime().await;
            return Err(err);
        }
        Ok(())
    }

    async fn stop_runtime(&self) {
        if let Err(err) = self.runtime.stop().await {
            warn!("\"{}\" flow runtime did not stop cleanly: {err}", self.name);
        }
    }
}

/// Forward what the flow sends us and run the outbound wiring step for it.
async fn dispatch_outbound(
    mut forward_rx: UnboundedReceiver<String>,
    outbound_tx: UnboundedSender<String>,
    sync: FlowSync,
) {
    while let Some(msg) = forward_rx.recv().await {
        sync.spawn_outbound();
        if outbound_tx.send(msg).is_err() {
            debug!("outbound receiver dropped, message discarded");
        }
    }
}

#[async_trait]
impl Component for BridgeController {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn state(&self) -> ControllerState {
        self.state
    }

    async fn start(&mut self) -> Result<()> {
        if self.state != ControllerState::Stopped {
            return Err(BridgeError::InvalidState(self.state));
        }
        self.state = ControllerState::Starting;
        match self.boot().await {
            Ok(running) => {
                self.running = Some(running);
                self.state = ControllerState::Running;
                info!("\"{}\" running", self.name);
                Ok(())
            }
            Err(err) => {
                self.state = ControllerState::Stopped;
                error!("\"{}\" failed to start: {err}", self.name);
                Err(err)
            }
        }
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            self.state = ControllerState::Stopped;
            return Ok(());
        };
        self.state = ControllerState::Stopping;

        self.stop_runtime().await;
        running.input.shutdown().await;
        running.output.shutdown().await;
        running.dispatcher.abort();
        let _ = running.dispatcher.await;
        // no wiring step may outlive this run and deploy stale ports
        running.sync.drain().await;
        running.server.shutdown().await;

        self.state = ControllerState::Stopped;
        info!("\"{}\" stopped", self.name);
        Ok(())
    }

    async fn update(&mut self) -> Result<()> {
        if !self.needs_restart {
            debug!("\"{}\" update: nothing to restart", self.name);
            return Ok(());
        }
        info!("\"{}\" restarting to apply configuration", self.name);
        self.stop().await?;
        self.needs_restart = false;
        self.start().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_store::MemoryFlowStore;

    #[tokio::test]
    async fn missing_user_dir_fails_before_binding() {
        let store = Arc::new(MemoryFlowStore::new());
        let mut controller = BridgeController::new("red", BridgeConfig::default(), store.clone());

        let err = controller.start().await.unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));
        assert_eq!(controller.state(), ControllerState::Stopped);
        assert!(controller.local_addr().is_none());
        assert!(store.settings().await.is_none());
    }

    #[tokio::test]
    async fn stop_without_start_is_ok() {
        let store = Arc::new(MemoryFlowStore::new());
        let mut controller = BridgeController::new("red", BridgeConfig::default(), store);
        assert!(controller.stop().await.is_ok());
        assert_eq!(controller.state(), ControllerState::Stopped);
    }

    #[tokio::test]
    async fn update_without_pending_restart_is_noop() {
        let store = Arc::new(MemoryFlowStore::new());
        let mut controller = BridgeController::new("red", BridgeConfig::default(), store);
        assert!(controller.update().await.is_ok());
        assert_eq!(controller.state(), ControllerState::Stopped);
    }

    #[tokio::test]
    async fn inbound_before_start_is_rejected() {
        let store = Arc::new(MemoryFlowStore::new());
        let controller = BridgeController::new("red", BridgeConfig::default(), store);
        assert!(matches!(
            controller.on_inbound("hi"),
            Err(BridgeError::InvalidState(ControllerState::Stopped))
        ));
    }

    #[tokio::test]
    async fn restart_fields_only_flag_the_controller() {
        let store = Arc::new(MemoryFlowStore::new());
        let mut controller = BridgeController::new("red", BridgeConfig::default(), store.clone());
        let diff = controller
            .apply_config(BridgeConfig {
                http_admin_root: "/admin".into(),
                ..Default::default()
            })
            .await;
        assert_eq!(diff.restart, vec!["httpAdminRoot"]);
        assert!(controller.needs_restart());
        assert_eq!(store.deploy_count(), 0);
    }
}
