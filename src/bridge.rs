// src/bridge.rs
//
// The one table of reserved ids and names the bridge injects into a flow.

use flow_store::{FlowNode, NodeType};
use serde_json::json;

/// Host the flow runtime uses to reach our endpoints.
pub const LOCALHOST: &str = "127.0.0.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Kevoree → flow: messages we push into the flow.
    Input,
    /// Flow → Kevoree: messages the flow pushes to us.
    Output,
}

/// Description of one bridge: a websocket node plus its client config node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeSpec {
    pub direction: Direction,
    /// Reserved id of the `websocket in` / `websocket out` node.
    pub node_id: &'static str,
    /// Reserved id of the paired `websocket-client` node.
    pub config_id: &'static str,
    /// Name given to the injected bridge node.
    pub name: &'static str,
    /// Name a user gives the node the bridge should be wired to.
    pub sentinel: &'static str,
    pub x: u32,
    pub y: u32,
}

pub const INPUT_BRIDGE: BridgeSpec = BridgeSpec {
    direction: Direction::Input,
    node_id: "kWSServerInput",
    config_id: "kWSServerInputConf",
    name: "kevoreeInput",
    sentinel: "kevoree-in",
    x: 100,
    y: 100,
};

pub const OUTPUT_BRIDGE: BridgeSpec = BridgeSpec {
    direction: Direction::Output,
    node_id: "kWSServerOutput",
    config_id: "kWSServerOutputConf",
    name: "kevoreeOutput",
    sentinel: "kevoree-out",
    x: 300,
    y: 100,
};

pub const BRIDGES: [BridgeSpec; 2] = [INPUT_BRIDGE, OUTPUT_BRIDGE];

/// `true` for any of the four ids the bridge owns.
pub fn is_reserved(id: &str) -> bool {
    BRIDGES
        .iter()
        .any(|b| b.node_id == id || b.config_id == id)
}

/// `ws://127.0.0.1:<port>`
pub fn endpoint_url(port: u16) -> String {
    format!("ws://{LOCALHOST}:{port}")
}

impl BridgeSpec {
    pub fn node_type(&self) -> NodeType {
        match self.direction {
            Direction::Input => NodeType::WebsocketIn,
            Direction::Output => NodeType::WebsocketOut,
        }
    }

    /// Fresh bridge node placed on tab `z` (unplaced when `None`).
    pub fn bridge_node(&self, z: Option<&str>) -> FlowNode {
        let mut node = FlowNode::from(serde_json::Map::new())
            .with("id", self.node_id)
            .with("name", self.name)
            .with("type", self.node_type().as_str())
            .with("server", "")
            .with("client", self.config_id)
            .with("x", self.x)
            .with("y", self.y);
        if let Some(tab) = z {
            node = node.with("z", tab);
        }
        node.with("wires", json!([[]]))
    }

    /// Fresh `websocket-client` node pointing at `port`.
    pub fn config_node(&self, port: u16) -> FlowNode {
        FlowNode::new(self.config_id, NodeType::WebsocketClient)
            .with("path", endpoint_url(port))
            .with("wholemsg", "false")
    }
}

/// The two local ports the bridge endpoints listen on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgePorts {
    pub input: u16,
    pub output: u16,
}

impl BridgePorts {
    pub fn new(input: u16, output: u16) -> Self {
        Self { input, output }
    }

    pub fn port_for(&self, direction: Direction) -> u16 {
        match direction {
            Direction::Input => self.input,
            Direction::Output => self.output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_ids_cover_both_bridges() {
        for id in ["kWSServerInput", "kWSServerInputConf", "kWSServerOutput", "kWSServerOutputConf"] {
            assert!(is_reserved(id));
        }
        assert!(!is_reserved("kevoreeInputServer"));
    }

    #[test]
    fn bridge_node_without_tab_has_no_z() {
        let node = INPUT_BRIDGE.bridge_node(None);
        assert_eq!(node.z(), None);
        assert_eq!(node.kind(), Some(NodeType::WebsocketIn));
        assert_eq!(node.str_field("client"), Some("kWSServerInputConf"));
        assert_eq!(node.get("wires"), Some(&json!([[]])));
    }

    #[test]
    fn config_node_points_at_local_port() {
        let node = OUTPUT_BRIDGE.config_node(9092);
        assert_eq!(node.path(), Some("ws://127.0.0.1:9092"));
        assert_eq!(node.str_field("wholemsg"), Some("false"));
    }
}
