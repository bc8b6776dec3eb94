// src/wiring.rs

use std::sync::Arc;

use flow_store::{FlowDocument, FlowStore};
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::{
    bridge::{BridgePorts, INPUT_BRIDGE, OUTPUT_BRIDGE, is_reserved},
    error::{BridgeError, Result},
    reconcile::{FirstTab, PlacementPolicy, reconcile_with},
};

/// Id of the user node carrying `name`, ignoring tabs and bridge nodes.
fn find_named(doc: &FlowDocument, name: &str) -> Option<String> {
    doc.iter()
        .filter(|n| !n.is_tab() && n.name() == Some(name))
        .filter_map(|n| n.id())
        .find(|id| !is_reserved(id))
        .map(str::to_string)
}

/// Wire the input bridge to the user node named `kevoree-in`.
///
/// Nothing happens when that node or the bridge is missing.
pub fn wire_input(doc: &mut FlowDocument) -> bool {
    let Some(target) = find_named(doc, INPUT_BRIDGE.sentinel) else {
        debug!("no {} node, input bridge left unwired", INPUT_BRIDGE.sentinel);
        return false;
    };
    doc.get_mut(INPUT_BRIDGE.node_id)
        .is_some_and(|bridge| bridge.ensure_wire(&target))
}

/// Wire the user node named `kevoree-out` to the output bridge.
///
/// A sentinel without output ports (`"wires": []`) is left as is.
pub fn wire_output(doc: &mut FlowDocument) -> bool {
    let Some(source) = find_named(doc, OUTPUT_BRIDGE.sentinel) else {
        debug!("no {} node, output bridge left unwired", OUTPUT_BRIDGE.sentinel);
        return false;
    };
    if doc.get(OUTPUT_BRIDGE.node_id).is_none() {
        return false;
    }
    let Some(node) = doc.get_mut(&source) else {
        return false;
    };
    if node.is_sink() {
        debug!(id = %source, "{} has no output port, output bridge left unwired", OUTPUT_BRIDGE.sentinel);
        return false;
    }
    node.ensure_wire(OUTPUT_BRIDGE.node_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Bridges,
    Inbound,
    Outbound,
}

/// Fetch → reconcile → (wire) → deploy-if-changed against one flow store.
///
/// Cycles started through clones of the same `FlowSync` never overlap.
#[derive(Clone)]
pub struct FlowSync {
    store: Arc<dyn FlowStore>,
    ports: BridgePorts,
    placement: Arc<dyn PlacementPolicy>,
    gate: Arc<Mutex<()>>,
    tasks: TaskTracker,
}

impl FlowSync {
    pub fn new(store: Arc<dyn FlowStore>, ports: BridgePorts) -> Self {
        Self {
            store,
            ports,
            placement: Arc::new(FirstTab),
            gate: Arc::new(Mutex::new(())),
            tasks: TaskTracker::new(),
        }
    }

    pub fn with_placement(mut self, placement: Arc<dyn PlacementPolicy>) -> Self {
        self.placement = placement;
        self
    }

    pub fn ports(&self) -> BridgePorts {
        self.ports
    }

    /// Ensure the bridge nodes exist. Returns whether a deploy happened.
    pub async fn ensure_bridges(&self) -> Result<bool> {
        self.run(Step::Bridges).await
    }

    /// The inbound-message step: bridges plus the `kevoree-in` wire.
    pub async fn wire_inbound(&self) -> Result<bool> {
        self.run(Step::Inbound).await
    }

    /// The outbound-dispatch step: bridges plus the `kevoree-out` wire.
    pub async fn wire_outbound(&self) -> Result<bool> {
        self.run(Step::Outbound).await
    }

    /// Reconcile a caller supplied document and deploy it as is.
    pub async fn deploy_document(&self, mut doc: FlowDocument) -> Result<()> {
        let _guard = self.gate.lock().await;
        reconcile_with(&mut doc, self.ports, self.placement.as_ref());
        self.store
            .deploy_flows(doc)
            .await
            .map_err(BridgeError::Deploy)
    }

    /// Fire-and-forget [`FlowSync::wire_inbound`].
    pub fn spawn_inbound(&self) -> JoinHandle<()> {
        self.spawn(Step::Inbound)
    }

    /// Fire-and-forget [`FlowSync::wire_outbound`].
    pub fn spawn_outbound(&self) -> JoinHandle<()> {
        self.spawn(Step::Outbound)
    }

    /// Wait for every spawned step to finish.
    ///
    /// Steps spawned while draining are waited for as well.
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }

    fn spawn(&self, step: Step) -> JoinHandle<()> {
        let sync = self.clone();
        self.tasks.spawn(async move {
            match sync.run(step).await {
                Ok(true) => info!(?step, "bridge flows deployed"),
                Ok(false) => debug!(?step, "bridge flows already up to date"),
                Err(BridgeError::Deploy(err)) => {
                    error!(?step, "could not deploy bridge flows: {err}")
                }
                Err(err) => error!(?step, "bridge flow update aborted: {err}"),
            }
        })
    }

    async fn run(&self, step: Step) -> Result<bool> {
        let _guard = self.gate.lock().await;
        let mut flows = self
            .store
            .get_flows()
            .await
            .map_err(BridgeError::Adapter)?;

        let mut changed = reconcile_with(&mut flows, self.ports, self.placement.as_ref());
        changed |= match step {
            Step::Bridges => false,
            Step::Inbound => wire_input(&mut flows),
            Step::Outbound => wire_output(&mut flows),
        };

        if changed {
            self.store
                .deploy_flows(flows)
                .await
                .map_err(BridgeError::Deploy)?;
        }
        Ok(changed)
    }
}
