//! Task graphs for the pipeline cycles.
//!
//! Tasks are wired into a daggy DAG with cycle detection, sorted
//! topologically and executed level by level with per-task retries and
//! decision-gated branches.

mod core;
mod types;
pub mod visualization;

pub use self::core::{DagError, PipelineDag, TaskRunner};
pub use self::types::{
    Node, NodeId, TaskError, TaskKind, TaskOutcome, TaskState, TriggerRule,
};
pub use self::visualization::{DagMetadata, DagVisualization, VisualizationEdge, VisualizationNode};
