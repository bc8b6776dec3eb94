//! Kevoree component hosting a Node-RED style flow runtime.
//!
//! The component owns two bridge websocket endpoints on localhost and keeps
//! the flow document deployed in the runtime wired to them: an input bridge
//! feeding messages into the flow and an output bridge carrying the flow's
//! results back out.
pub mod bridge;
pub mod config;
pub mod controller;
pub mod endpoint;
pub mod error;
pub mod flow_commands;
pub mod logger;
pub mod reconcile;
pub mod server;
pub mod wiring;

pub use bridge::{BridgePorts, Direction, INPUT_BRIDGE, OUTPUT_BRIDGE};
pub use config::{BridgeConfig, ConfigDiff, ConfigSource, EnvConfigSource, MapConfigSource};
pub use controller::{BridgeController, Component, ControllerState};
pub use error::BridgeError;
pub use reconcile::{FirstTab, PlacementPolicy, reconcile, reconcile_with};
pub use wiring::{FlowSync, wire_input, wire_output};
