//! Serializable snapshot of the module graph.
//!
//! Enabled with [`ApplicationOptions::snapshot`](crate::ApplicationOptions::snapshot).
//! The graph records modules, providers, import edges and the dependency
//! edges found during lookup. When bootstrap fails the graph is kept as
//! `partial` together with the error message.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::DiError;
use crate::injector::{Collection, InstanceWrapper};
use crate::module::Module;
use crate::scope::Scope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Module,
    Provider,
    Injectable,
    Controller,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    pub kind: NodeKind,
    /// Host module id, for provider nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
    #[serde(default)]
    pub durable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeKind {
    ModuleToModule,
    ClassToClass,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub forward: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphStatus {
    Complete,
    Partial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedGraph {
    pub nodes: BTreeMap<String, GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub status: GraphStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl SerializedGraph {
    fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            edges: Vec::new(),
            status: GraphStatus::Complete,
            error: None,
            captured_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    #[cfg(feature = "graph-export")]
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Graphviz rendering: modules as boxes, providers as ellipses.
    pub fn to_dot(&self) -> String {
        let mut output = String::from("digraph Modules {\n  rankdir=TB;\n");
        for node in self.nodes.values() {
            let (shape, color) = match (node.kind, node.scope) {
                (NodeKind::Module, _) => ("box", "lightgrey"),
                (_, Some(Scope::Request)) => ("ellipse", "lightgreen"),
                (_, Some(Scope::Transient)) => ("ellipse", "lightyellow"),
                _ => ("ellipse", "lightblue"),
            };
            output.push_str(&format!(
                "  \"{}\" [label=\"{}\", shape={}, fillcolor={}, style=filled];\n",
                node.id, node.label, shape, color
            ));
        }
        for edge in &self.edges {
            let style = match (edge.kind, edge.optional || edge.forward) {
                (EdgeKind::ModuleToModule, _) => "bold",
                (EdgeKind::ClassToClass, true) => "dashed",
                (EdgeKind::ClassToClass, false) => "solid",
            };
            output.push_str(&format!("  \"{}\" -> \"{}\" [style={}];\n", edge.from, edge.to, style));
        }
        output.push_str("}\n");
        output
    }

    fn insert_module(&mut self, module: &Module) {
        self.nodes.insert(
            module.id().to_string(),
            GraphNode {
                id: module.id().to_string(),
                label: module.name().to_string(),
                kind: NodeKind::Module,
                module_id: None,
                scope: None,
                durable: false,
                global: Some(module.is_global()),
                distance: Some(module.distance()),
            },
        );
        for imported in module.imports() {
            let edge = GraphEdge {
                from: module.id().to_string(),
                to: imported.id().to_string(),
                kind: EdgeKind::ModuleToModule,
                optional: false,
                forward: false,
            };
            if !self.edges.contains(&edge) {
                self.edges.push(edge);
            }
        }
    }

    fn insert_wrapper(&mut self, module: &Module, wrapper: &InstanceWrapper) {
        let kind = match wrapper.collection() {
            Collection::Provider => NodeKind::Provider,
            Collection::Injectable => NodeKind::Injectable,
            Collection::Controller => NodeKind::Controller,
        };
        let id = wrapper_node_id(wrapper);
        self.nodes.insert(
            id.clone(),
            GraphNode {
                id: id.clone(),
                label: wrapper.name().to_string(),
                kind,
                module_id: Some(module.id().to_string()),
                scope: Some(wrapper.scope()),
                durable: wrapper.is_durable(),
                global: None,
                distance: None,
            },
        );
        for (target, optional, forward) in wrapper.resolved_edges() {
            let edge = GraphEdge {
                from: id.clone(),
                to: wrapper_node_id(&target),
                kind: EdgeKind::ClassToClass,
                optional,
                forward,
            };
            if !self.edges.contains(&edge) {
                self.edges.push(edge);
            }
        }
    }
}

fn wrapper_node_id(wrapper: &InstanceWrapper) -> String {
    format!("provider-{}", wrapper.id())
}

/// Collects the graph while modules are loaded. A disabled inspector does nothing.
pub struct GraphInspector {
    enabled: bool,
    graph: Mutex<Option<SerializedGraph>>,
}

impl GraphInspector {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            graph: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn inspect_modules(&self, modules: &[Arc<Module>]) {
        if !self.enabled {
            return;
        }
        let mut guard = self.graph.lock();
        let graph = guard.get_or_insert_with(SerializedGraph::new);
        for module in modules {
            graph.insert_module(module);
            for wrapper in module.wrappers() {
                graph.insert_wrapper(module, &wrapper);
            }
        }
        graph.captured_at = Utc::now();
    }

    pub fn register_partial(&self, error: &DiError) {
        if !self.enabled {
            return;
        }
        let mut guard = self.graph.lock();
        let graph = guard.get_or_insert_with(SerializedGraph::new);
        graph.status = GraphStatus::Partial;
        graph.error = Some(error.to_string());
    }

    pub fn graph(&self) -> Option<SerializedGraph> {
        self.graph.lock().clone()
    }
}

impl std::fmt::Debug for GraphInspector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphInspector").field("enabled", &self.enabled).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_inspector_records_nothing() {
        let inspector = GraphInspector::new(false);
        inspector.register_partial(&DiError::UnknownElement { token: "X".into() });
        assert!(inspector.graph().is_none());
    }

    #[test]
    fn partial_graph_keeps_error() {
        let inspector = GraphInspector::new(true);
        inspector.register_partial(&DiError::UnknownElement { token: "X".into() });
        let graph = inspector.graph().unwrap();
        assert_eq!(graph.status, GraphStatus::Partial);
        assert!(graph.error.unwrap().contains("X"));
    }

    #[test]
    fn json_and_dot_render() {
        let mut graph = SerializedGraph::new();
        graph.nodes.insert(
            "m".into(),
            GraphNode {
                id: "m".into(),
                label: "AppModule".into(),
                kind: NodeKind::Module,
                module_id: None,
                scope: None,
                durable: false,
                global: Some(false),
                distance: Some(0),
            },
        );
        let json = graph.to_json().unwrap();
        assert!(json.contains("\"status\": \"complete\""));
        assert!(graph.to_dot().contains("AppModule"));
    }
}
