// src/reconcile.rs

use flow_store::FlowDocument;
use tracing::debug;

use crate::bridge::{BRIDGES, BridgePorts, endpoint_url};

/// Decides which tab a freshly injected bridge node lands on.
pub trait PlacementPolicy: Send + Sync {
    /// `tabs` are the tab ids in document order. `None` leaves the node
    /// unplaced.
    fn place(&self, tabs: &[&str]) -> Option<String>;
}

/// Put new nodes on the first tab of the document.
///
/// Nodes end up on that tab even when the user's flows live elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstTab;

impl PlacementPolicy for FirstTab {
    fn place(&self, tabs: &[&str]) -> Option<String> {
        tabs.first().map(|tab| tab.to_string())
    }
}

impl<F> PlacementPolicy for F
where
    F: Fn(&[&str]) -> Option<String> + Send + Sync,
{
    fn place(&self, tabs: &[&str]) -> Option<String> {
        self(tabs)
    }
}

/// Make sure both bridges and their config nodes exist and point at `ports`.
///
/// Returns the document and whether anything had to change. Existing nodes are
/// never removed or reordered; missing ones are appended.
pub fn reconcile(mut doc: FlowDocument, ports: BridgePorts) -> (FlowDocument, bool) {
    let changed = reconcile_with(&mut doc, ports, &FirstTab);
    (doc, changed)
}

/// In-place variant of [`reconcile`] with an explicit placement policy.
pub fn reconcile_with(
    doc: &mut FlowDocument,
    ports: BridgePorts,
    placement: &dyn PlacementPolicy,
) -> bool {
    let mut tabs = Vec::new();
    let mut has_bridge = [false; BRIDGES.len()];
    let mut config_at: [Option<usize>; BRIDGES.len()] = [None; BRIDGES.len()];

    for (index, node) in doc.iter().enumerate() {
        let Some(id) = node.id() else { continue };
        if node.is_tab() {
            tabs.push(id);
            continue;
        }
        for (slot, spec) in BRIDGES.iter().enumerate() {
            if id == spec.node_id {
                has_bridge[slot] = true;
            } else if id == spec.config_id && config_at[slot].is_none() {
                config_at[slot] = Some(index);
            }
        }
    }
    let z = placement.place(&tabs);

    let mut changed = false;
    for (slot, spec) in BRIDGES.iter().enumerate() {
        let port = ports.port_for(spec.direction);

        if !has_bridge[slot] {
            debug!(id = spec.node_id, tab = ?z, "adding bridge node");
            doc.push(spec.bridge_node(z.as_deref()));
            changed = true;
        }

        let expected = endpoint_url(port);
        match config_at[slot] {
            None => {
                debug!(id = spec.config_id, path = %expected, "adding bridge config node");
                doc.push(spec.config_node(port));
                changed = true;
            }
            Some(index) => {
                let node = &mut doc.nodes_mut()[index];
                if node.path() != Some(expected.as_str()) {
                    debug!(id = spec.config_id, path = %expected, "updating bridge config path");
                    node.set_path(expected);
                    changed = true;
                }
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{INPUT_BRIDGE, OUTPUT_BRIDGE};
    use flow_store::{FlowNode, NodeType};

    fn ports() -> BridgePorts {
        BridgePorts::new(9091, 9092)
    }

    #[test]
    fn empty_document_gets_four_unplaced_nodes() {
        let (doc, changed) = reconcile(FlowDocument::new(), ports());
        assert!(changed);
        assert_eq!(
            doc.ids(),
            vec!["kWSServerInput", "kWSServerInputConf", "kWSServerOutput", "kWSServerOutputConf"]
        );
        assert!(doc.iter().all(|n| n.z().is_none()));
    }

    #[test]
    fn second_pass_changes_nothing() {
        let (once, _) = reconcile(FlowDocument::new(), ports());
        let (twice, changed) = reconcile(once.clone(), ports());
        assert!(!changed);
        assert_eq!(once, twice);
    }

    #[test]
    fn new_nodes_land_on_first_tab() {
        let doc: FlowDocument = vec![
            FlowNode::new("t1", NodeType::Tab),
            FlowNode::new("t2", NodeType::Tab),
        ]
        .into();
        let (doc, _) = reconcile(doc, ports());
        assert_eq!(doc.get(INPUT_BRIDGE.node_id).and_then(|n| n.z()), Some("t1"));
        assert_eq!(doc.get(OUTPUT_BRIDGE.node_id).and_then(|n| n.z()), Some("t1"));
    }

    #[test]
    fn placement_policy_can_be_swapped() {
        let mut doc: FlowDocument = vec![
            FlowNode::new("t1", NodeType::Tab),
            FlowNode::new("t2", NodeType::Tab),
        ]
        .into();
        let last_tab = |tabs: &[&str]| tabs.last().map(|t| t.to_string());
        assert!(reconcile_with(&mut doc, ports(), &last_tab));
        assert_eq!(doc.get(INPUT_BRIDGE.node_id).and_then(|n| n.z()), Some("t2"));
    }

    #[test]
    fn only_stale_path_is_rewritten() {
        let (doc, _) = reconcile(FlowDocument::new(), ports());
        let (moved, changed) = reconcile(doc.clone(), BridgePorts::new(9999, 9092));
        assert!(changed);
        assert_eq!(moved.len(), doc.len());
        for (before, after) in doc.iter().zip(moved.iter()) {
            if after.id() == Some(INPUT_BRIDGE.config_id) {
                assert_eq!(after.path(), Some("ws://127.0.0.1:9999"));
            } else {
                assert_eq!(before, after);
            }
        }
    }

    #[test]
    fn existing_bridge_node_is_left_alone() {
        let custom = FlowNode::new(INPUT_BRIDGE.node_id, NodeType::WebsocketIn)
            .with("name", "renamed by user")
            .with("x", 42);
        let doc: FlowDocument = vec![custom.clone()].into();
        let (doc, changed) = reconcile(doc, ports());
        assert!(changed);
        assert_eq!(doc.nodes()[0], custom);
        assert_eq!(doc.len(), 4);
    }
}
