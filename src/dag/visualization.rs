//! DAG Visualization Support
//!
//! Serializes a cycle's task graph into a node/edge structure for display.

use crate::dag::core::{DagError, PipelineDag};
use crate::dag::types::TriggerRule;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Represents a node in the DAG visualization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizationNode {
    pub id: usize,
    pub task_id: String,
    pub trigger_rule: TriggerRule,
    /// Execution level, 0 for tasks without parents
    pub level: usize,
    pub description: String,
}

/// Represents an edge in the DAG visualization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizationEdge {
    pub source: usize,
    pub target: usize,
    pub label: Option<String>,
}

/// Metadata about the DAG
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagMetadata {
    pub name: String,
    pub node_count: usize,
    pub edge_count: usize,
    /// Task ids in execution order
    pub execution_order: Vec<String>,
}

/// Complete DAG visualization structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagVisualization {
    pub nodes: Vec<VisualizationNode>,
    pub edges: Vec<VisualizationEdge>,
    pub metadata: DagMetadata,
}

impl PipelineDag {
    /// Serializes the DAG for visualization
    pub fn to_visualization(&self) -> Result<DagVisualization, DagError> {
        let mut level_of = HashMap::new();
        let mut execution_order = Vec::new();
        for (level, ids) in self.levels()?.into_iter().enumerate() {
            for id in ids {
                level_of.insert(id, level);
                if let Some(node) = self.get_node(id) {
                    execution_order.push(node.task_id().to_string());
                }
            }
        }

        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        for node_id in self.node_ids() {
            let Some(node) = self.get_node(node_id) else {
                continue;
            };
            nodes.push(VisualizationNode {
                id: node_id.0,
                task_id: node.task_id().to_string(),
                trigger_rule: node.trigger_rule,
                level: level_of.get(&node_id).copied().unwrap_or(0),
                description: node.task.description().to_string(),
            });

            for child in self.get_children(node_id) {
                let label = self
                    .get_node(child)
                    .filter(|c| c.trigger_rule == TriggerRule::OnRetrain)
                    .map(|_| "on retrain".to_string());
                edges.push(VisualizationEdge {
                    source: node_id.0,
                    target: child.0,
                    label,
                });
            }
        }

        Ok(DagVisualization {
            metadata: DagMetadata {
                name: self.name().to_string(),
                node_count: nodes.len(),
                edge_count: edges.len(),
                execution_order,
            },
            nodes,
            edges,
        })
    }
}
