// crates/flow_store/src/node.rs

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Discriminant carried in a node's `type` field.
///
/// Only the types the bridge cares about get their own variant, everything
/// else is passed through untouched as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeType {
    Tab,
    WebsocketIn,
    WebsocketOut,
    WebsocketClient,
    Other(String),
}

impl NodeType {
    pub fn as_str(&self) -> &str {
        match self {
            NodeType::Tab => "tab",
            NodeType::WebsocketIn => "websocket in",
            NodeType::WebsocketOut => "websocket out",
            NodeType::WebsocketClient => "websocket-client",
            NodeType::Other(kind) => kind,
        }
    }
}

impl From<&str> for NodeType {
    fn from(kind: &str) -> Self {
        match kind {
            "tab" => NodeType::Tab,
            "websocket in" => NodeType::WebsocketIn,
            "websocket out" => NodeType::WebsocketOut,
            "websocket-client" => NodeType::WebsocketClient,
            other => NodeType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One node record of a flow document.
///
/// The record is kept as the raw JSON object so fields this crate does not
/// know about survive a fetch/deploy cycle byte for byte (key order included).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowNode(Map<String, Value>);

impl FlowNode {
    /// Create a node with just an `id` and a `type`.
    pub fn new(id: impl Into<String>, kind: NodeType) -> Self {
        let mut fields = Map::new();
        fields.insert("id".into(), Value::String(id.into()));
        fields.insert("type".into(), Value::String(kind.as_str().to_string()));
        FlowNode(fields)
    }

    /// Builder style field setter.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.str_field("id")
    }

    pub fn kind(&self) -> Option<NodeType> {
        self.str_field("type").map(NodeType::from)
    }

    pub fn is_tab(&self) -> bool {
        self.kind() == Some(NodeType::Tab)
    }

    pub fn name(&self) -> Option<&str> {
        self.str_field("name")
    }

    /// Owning tab id.
    pub fn z(&self) -> Option<&str> {
        self.str_field("z")
    }

    pub fn path(&self) -> Option<&str> {
        self.str_field("path")
    }

    pub fn set_path(&mut self, path: impl Into<String>) {
        self.0.insert("path".into(), Value::String(path.into()));
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Downstream ids of output port `port`, empty when the port or the
    /// `wires` field is missing.
    pub fn wires(&self, port: usize) -> Vec<&str> {
        self.0
            .get("wires")
            .and_then(Value::as_array)
            .and_then(|ports| ports.get(port))
            .and_then(Value::as_array)
            .map(|targets| targets.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Make sure output port 0 lists `target`. Returns `true` when the node
    /// was modified.
    ///
    /// A `wires` field that is missing or not shaped like a list of lists is
    /// replaced by `[[]]` before the target is added.
    pub fn ensure_wire(&mut self, target: &str) -> bool {
        let well_formed = matches!(
            self.0.get("wires"),
            Some(Value::Array(ports)) if !ports.is_empty() && ports[0].is_array()
        );
        if !well_formed {
            self.0
                .insert("wires".into(), Value::Array(vec![Value::Array(vec![])]));
        }

        let Some(Value::Array(ports)) = self.0.get_mut("wires") else {
            return false;
        };
        let Some(Value::Array(first)) = ports.get_mut(0) else {
            return false;
        };
        if first.iter().any(|t| t.as_str() == Some(target)) {
            return !well_formed;
        }
        first.push(Value::String(target.to_string()));
        true
    }

    /// `true` for a node declaring zero output ports (`"wires": []`).
    pub fn is_sink(&self) -> bool {
        self.0
            .get("wires")
            .and_then(Value::as_array)
            .is_some_and(Vec::is_empty)
    }
}

impl From<Map<String, Value>> for FlowNode {
    fn from(fields: Map<String, Value>) -> Self {
        FlowNode(fields)
    }
}

/// The wrapped file format written by newer flow runtimes.
#[derive(Deserialize)]
#[serde(untagged)]
enum FlowFile {
    Bare(Vec<FlowNode>),
    Wrapped { flows: Vec<FlowNode> },
}

/// An ordered list of flow nodes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowDocument(Vec<FlowNode>);

impl FlowDocument {
    pub fn new() -> Self {
        FlowDocument(Vec::new())
    }

    /// Parse either a bare node array or a `{"flows": [...]}` wrapper.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        match serde_json::from_str::<FlowFile>(text)? {
            FlowFile::Bare(nodes) | FlowFile::Wrapped { flows: nodes } => Ok(FlowDocument(nodes)),
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, node: FlowNode) {
        self.0.push(node);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FlowNode> {
        self.0.iter()
    }

    pub fn nodes(&self) -> &[FlowNode] {
        &self.0
    }

    pub fn nodes_mut(&mut self) -> &mut [FlowNode] {
        &mut self.0
    }

    pub fn get(&self, id: &str) -> Option<&FlowNode> {
        self.0.iter().find(|n| n.id() == Some(id))
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut FlowNode> {
        self.0.iter_mut().find(|n| n.id() == Some(id))
    }

    /// Tab ids in document order.
    pub fn tabs(&self) -> Vec<&str> {
        self.0
            .iter()
            .filter(|n| n.is_tab())
            .filter_map(FlowNode::id)
            .collect()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.0.iter().filter_map(FlowNode::id).collect()
    }
}

impl From<Vec<FlowNode>> for FlowDocument {
    fn from(nodes: Vec<FlowNode>) -> Self {
        FlowDocument(nodes)
    }
}

impl IntoIterator for FlowDocument {
    type Item = FlowNode;
    type IntoIter = std::vec::IntoIter<FlowNode>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a FlowDocument {
    type Item = &'a FlowNode;
    type IntoIter = std::slice::Iter<'a, FlowNode>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_bare_and_wrapped_documents() {
        let bare = FlowDocument::from_json(r#"[{"id":"t1","type":"tab"}]"#).unwrap();
        let wrapped =
            FlowDocument::from_json(r#"{"rev":"abc","flows":[{"id":"t1","type":"tab"}]}"#).unwrap();
        assert_eq!(bare, wrapped);
        assert_eq!(bare.tabs(), vec!["t1"]);
    }

    #[test]
    fn unknown_fields_survive_serialisation() {
        let text = r#"[{"id":"n1","type":"function","func":"return msg;","outputs":1,"z":"t1"}]"#;
        let doc = FlowDocument::from_json(text).unwrap();
        assert_eq!(serde_json::to_string(&doc).unwrap(), text);
        assert_eq!(doc.nodes()[0].kind(), Some(NodeType::Other("function".into())));
    }

    #[test]
    fn ensure_wire_appends_once() {
        let mut node = FlowNode::new("a", NodeType::WebsocketIn).with("wires", json!([[]]));
        assert!(node.ensure_wire("b"));
        assert!(!node.ensure_wire("b"));
        assert_eq!(node.wires(0), vec!["b"]);
    }

    #[test]
    fn ensure_wire_repairs_malformed_wires() {
        let mut node = FlowNode::new("a", NodeType::WebsocketIn).with("wires", json!("nope"));
        assert!(node.ensure_wire("b"));
        assert_eq!(node.get("wires"), Some(&json!([["b"]])));
    }

    #[test]
    fn sink_is_a_node_with_empty_wires() {
        assert!(FlowNode::new("d", NodeType::Other("debug".into())).with("wires", json!([])).is_sink());
        assert!(!FlowNode::new("f", NodeType::Other("function".into())).with("wires", json!([[]])).is_sink());
        assert!(!FlowNode::new("t", NodeType::Tab).is_sink());
    }

    #[test]
    fn ensure_wire_keeps_other_ports() {
        let mut node = FlowNode::new("a", NodeType::Other("switch".into()))
            .with("wires", json!([["x"], ["y"]]));
        assert!(node.ensure_wire("b"));
        assert_eq!(node.get("wires"), Some(&json!([["x", "b"], ["y"]])));
    }
}
