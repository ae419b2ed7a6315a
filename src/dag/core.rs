//! DAG construction and execution for pipeline cycles.
//!
//! Tasks are wired explicitly with cycle detection, ordered topologically and
//! executed level by level: every task whose parents are settled runs
//! concurrently on its own tokio task, under the cycle's retry policy.

use crate::dag::types::{Node, NodeId, TaskError, TaskKind, TaskOutcome, TaskState, TriggerRule};
use crate::retry::{retry, RetryPolicy};
use async_trait::async_trait;
use daggy::{Dag, EdgeIndex, NodeIndex, Walker};
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Error types for DAG operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DagError {
    #[error("Cycle detected: {0}")]
    CycleDetected(String),
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("Duplicate task: {0}")]
    DuplicateTask(String),
    #[error("Execution error: {0}")]
    ExecutionError(String),
}

/// Runs the body of a task. One implementation wires the real collaborators;
/// tests supply their own.
#[async_trait]
pub trait TaskRunner: Send + Sync + 'static {
    async fn run(&self, node: &Node) -> Result<TaskOutcome, TaskError>;
}

/// Task graph of one pipeline cycle.
#[derive(Debug)]
pub struct PipelineDag {
    name: String,
    /// The underlying daggy DAG
    dag: Dag<Node, ()>,
    node_id_to_index: HashMap<NodeId, NodeIndex>,
    index_to_node_id: HashMap<NodeIndex, NodeId>,
    task_to_node_id: HashMap<TaskKind, NodeId>,
    next_node_id: usize,
    /// Cached topological sort result
    cached_toposort: Option<Vec<NodeId>>,
}

impl PipelineDag {
    pub fn new(name: impl Into<String>) -> Self {
        PipelineDag {
            name: name.into(),
            dag: Dag::new(),
            node_id_to_index: HashMap::new(),
            index_to_node_id: HashMap::new(),
            task_to_node_id: HashMap::new(),
            next_node_id: 0,
            cached_toposort: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a task; each task kind may appear once per graph.
    pub fn add_task(&mut self, task: TaskKind, trigger_rule: TriggerRule) -> Result<NodeId, DagError> {
        if self.task_to_node_id.contains_key(&task) {
            return Err(DagError::DuplicateTask(task.to_string()));
        }

        let node_id = NodeId(self.next_node_id);
        self.next_node_id += 1;

        let index = self.dag.add_node(Node::new(node_id, task, trigger_rule));
        self.node_id_to_index.insert(node_id, index);
        self.index_to_node_id.insert(index, node_id);
        self.task_to_node_id.insert(task, node_id);

        // Invalidate cache when DAG structure changes
        self.cached_toposort = None;

        Ok(node_id)
    }

    /// Adds an edge (dependency) between two nodes
    ///
    /// # Returns
    /// Returns Ok(EdgeIndex) if successful, or Err(DagError) if cycle would be created
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) -> Result<EdgeIndex, DagError> {
        let from_index = self
            .node_id_to_index
            .get(&from)
            .ok_or_else(|| DagError::NodeNotFound(format!("Node {:?} not found", from)))?;
        let to_index = self
            .node_id_to_index
            .get(&to)
            .ok_or_else(|| DagError::NodeNotFound(format!("Node {:?} not found", to)))?;

        match self.dag.add_edge(*from_index, *to_index, ()) {
            Ok(edge_index) => {
                self.cached_toposort = None;
                Ok(edge_index)
            }
            Err(_would_cycle) => Err(DagError::CycleDetected(format!(
                "Adding edge from {:?} to {:?} would create a cycle",
                from, to
            ))),
        }
    }

    /// `upstream >> downstream` by task kind.
    pub fn add_dependency(
        &mut self,
        upstream: TaskKind,
        downstream: TaskKind,
    ) -> Result<EdgeIndex, DagError> {
        let from = self.node_for_task(upstream)?;
        let to = self.node_for_task(downstream)?;
        self.add_edge(from, to)
    }

    pub fn node_for_task(&self, task: TaskKind) -> Result<NodeId, DagError> {
        self.task_to_node_id
            .get(&task)
            .copied()
            .ok_or_else(|| DagError::NodeNotFound(task.to_string()))
    }

    /// Gets a node by its ID
    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.node_id_to_index
            .get(&node_id)
            .and_then(|&index| self.dag.node_weight(index))
    }

    pub fn node_count(&self) -> usize {
        self.dag.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.dag.edge_count()
    }

    /// All node IDs in insertion order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.node_id_to_index.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn get_parents(&self, node_id: NodeId) -> Vec<NodeId> {
        let Some(&node_index) = self.node_id_to_index.get(&node_id) else {
            return Vec::new();
        };
        let mut parents: Vec<NodeId> = self
            .dag
            .parents(node_index)
            .iter(&self.dag)
            .filter_map(|(_, parent_idx)| self.index_to_node_id.get(&parent_idx).copied())
            .collect();
        parents.sort();
        parents
    }

    pub fn get_children(&self, node_id: NodeId) -> Vec<NodeId> {
        let Some(&node_index) = self.node_id_to_index.get(&node_id) else {
            return Vec::new();
        };
        let mut children: Vec<NodeId> = self
            .dag
            .children(node_index)
            .iter(&self.dag)
            .filter_map(|(_, child_idx)| self.index_to_node_id.get(&child_idx).copied())
            .collect();
        children.sort();
        children
    }

    /// Every node reachable downstream of `node_id`, excluding itself.
    pub fn get_descendants(&self, node_id: NodeId) -> Vec<NodeId> {
        let mut descendants = Vec::new();
        let mut to_visit = vec![node_id];
        let mut visited = HashSet::new();

        while let Some(current) = to_visit.pop() {
            if !visited.insert(current) {
                continue;
            }
            if current != node_id {
                descendants.push(current);
            }
            to_visit.extend(self.get_children(current));
        }

        descendants.sort();
        descendants
    }

    /// Kahn's algorithm; ties are broken by node ID so the order is stable.
    fn compute_toposort(&self) -> Result<Vec<NodeId>, DagError> {
        let mut in_degree: BTreeMap<NodeId, usize> =
            self.node_ids().into_iter().map(|id| (id, 0)).collect();
        for edge in self.dag.raw_edges() {
            if let Some(target) = self.index_to_node_id.get(&edge.target()) {
                *in_degree.entry(*target).or_insert(0) += 1;
            }
        }

        let mut queue: VecDeque<NodeId> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut result = Vec::with_capacity(in_degree.len());

        while let Some(node_id) = queue.pop_front() {
            result.push(node_id);
            for child in self.get_children(node_id) {
                if let Some(degree) = in_degree.get_mut(&child) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(child);
                    }
                }
            }
        }

        if result.len() != self.dag.node_count() {
            return Err(DagError::ExecutionError(
                "Topological sort failed - DAG may contain cycles".to_string(),
            ));
        }
        Ok(result)
    }

    /// Topological execution order, cached until the structure changes.
    pub fn execution_order(&mut self) -> Result<Vec<NodeId>, DagError> {
        if let Some(ref cached) = self.cached_toposort {
            return Ok(cached.clone());
        }
        let sorted = self.compute_toposort()?;
        self.cached_toposort = Some(sorted.clone());
        Ok(sorted)
    }

    /// Groups nodes into levels: a node's level is one past its deepest parent.
    pub fn levels(&self) -> Result<Vec<Vec<NodeId>>, DagError> {
        let order = match &self.cached_toposort {
            Some(cached) => cached.clone(),
            None => self.compute_toposort()?,
        };

        let mut depth: HashMap<NodeId, usize> = HashMap::new();
        let mut levels: Vec<Vec<NodeId>> = Vec::new();
        for node_id in order {
            let level = self
                .get_parents(node_id)
                .iter()
                .filter_map(|p| depth.get(p))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(node_id, level);
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(node_id);
        }
        Ok(levels)
    }

    /// Decides, from the parents' final states, whether a node may run.
    fn gate(&self, node: &Node, states: &HashMap<NodeId, TaskState>) -> Option<TaskState> {
        let parents: Vec<&TaskState> = self
            .get_parents(node.id)
            .iter()
            .filter_map(|p| states.get(p))
            .collect();

        if parents.iter().any(|s| s.is_failure()) {
            return Some(TaskState::UpstreamFailed);
        }
        if parents.iter().any(|s| matches!(s, TaskState::Skipped)) {
            return Some(TaskState::Skipped);
        }
        match node.trigger_rule {
            TriggerRule::AllSuccess => None,
            TriggerRule::OnRetrain => {
                let requested = parents
                    .iter()
                    .filter_map(|s| s.outcome())
                    .any(TaskOutcome::requests_retrain);
                if requested {
                    None
                } else {
                    Some(TaskState::Skipped)
                }
            }
        }
    }

    /// Executes the graph with `runner`, each task under `policy`.
    ///
    /// A task that exhausts its attempts is `Failed` and everything
    /// downstream of it `UpstreamFailed`; independent branches still run.
    pub async fn execute<R: TaskRunner + ?Sized>(
        &self,
        runner: Arc<R>,
        policy: &RetryPolicy,
    ) -> Result<HashMap<NodeId, TaskState>, DagError> {
        let mut states: HashMap<NodeId, TaskState> = HashMap::new();

        for level in self.levels()? {
            let mut tasks = Vec::new();

            for node_id in level {
                let node = self
                    .get_node(node_id)
                    .cloned()
                    .ok_or_else(|| DagError::NodeNotFound(format!("Node {:?} not found", node_id)))?;

                if let Some(state) = self.gate(&node, &states) {
                    info!(dag = %self.name, task = node.task_id(), ?state, "task not run");
                    states.insert(node_id, state);
                    continue;
                }

                let runner = Arc::clone(&runner);
                let policy = *policy;
                let dag_name = self.name.clone();
                tasks.push(tokio::spawn(async move {
                    let state = run_with_retry(&dag_name, runner, &node, &policy).await;
                    (node.id, state)
                }));
            }

            for joined in join_all(tasks).await {
                let (node_id, state) = joined
                    .map_err(|e| DagError::ExecutionError(format!("Task join error: {}", e)))?;
                states.insert(node_id, state);
            }
        }

        Ok(states)
    }
}

async fn run_with_retry<R: TaskRunner + ?Sized>(
    dag_name: &str,
    runner: Arc<R>,
    node: &Node,
    policy: &RetryPolicy,
) -> TaskState {
    let label = format!("{}.{}", dag_name, node.task_id());
    let result = retry(policy, &label, |_| true, |attempt| {
        let runner = Arc::clone(&runner);
        async move {
            debug!(task = node.task_id(), attempt, "running task");
            runner.run(node).await
        }
    })
    .await;

    match result {
        Ok(outcome) => {
            info!(dag = dag_name, task = node.task_id(), ?outcome, "task succeeded");
            TaskState::Success { outcome }
        }
        Err(err) => {
            warn!(
                dag = dag_name,
                task = node.task_id(),
                attempts = err.attempts,
                error = %err.last_error,
                "task failed"
            );
            TaskState::Failed {
                attempts: err.attempts,
                error: err.last_error.to_string(),
            }
        }
    }
}
