use async_trait::async_trait;
use autopilot_core::{History, Result, Step};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Policy, array_param, step_from_config};

const ID_SALT: u64 = 0xdf5_0000;

/// A node of the search tree: a step plus the steps to try if it succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchNode {
    /// Step run when the node is explored
    pub step: Step,
    /// Alternatives tried in order beneath this node
    #[serde(default)]
    pub children: Vec<SearchNode>,
}

impl SearchNode {
    /// Leaf node.
    #[must_use]
    pub fn leaf(step: Step) -> Self {
        Self {
            step,
            children: Vec::new(),
        }
    }

    /// Node with children.
    #[must_use]
    pub fn new(step: Step, children: Vec<Self>) -> Self {
        Self { step, children }
    }

    /// Whether the node has no children.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Depth-first search over a forest of candidate steps.
///
/// The first unexplored node is chosen in pre-order. A node's children are
/// reachable only once the node itself succeeded; a failed node prunes its
/// subtree, which backtracks to the nearest ancestor with an unexplored child.
#[derive(Debug, Clone)]
pub struct DepthFirstSearchPolicy {
    roots: Vec<SearchNode>,
    stop_at_first_leaf: bool,
}

impl DepthFirstSearchPolicy {
    /// Search over `roots`.
    #[must_use]
    pub fn new(roots: Vec<SearchNode>) -> Self {
        Self {
            roots,
            stop_at_first_leaf: false,
        }
    }

    /// Stop as soon as one leaf succeeds.
    #[must_use]
    pub fn stop_at_first_leaf(mut self, stop: bool) -> Self {
        self.stop_at_first_leaf = stop;
        self
    }

    /// Builds the policy from `{nodes: [SearchNode], stop_at_first_leaf: bool}`.
    ///
    /// # Errors
    /// Returns a configuration error if a node cannot be parsed.
    pub fn from_parameters(parameters: &Value) -> Result<Self> {
        let mut counter = 0_u64;
        let roots = array_param(parameters, "nodes", "depth_first_search")?
            .iter()
            .map(|value| node_from_config(value, &mut counter))
            .collect::<Result<Vec<_>>>()?;
        let stop = parameters
            .get("stop_at_first_leaf")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok(Self::new(roots).stop_at_first_leaf(stop))
    }

    /// Root nodes.
    #[must_use]
    pub fn roots(&self) -> &[SearchNode] {
        &self.roots
    }
}

fn node_from_config(value: &Value, counter: &mut u64) -> Result<SearchNode> {
    let index = *counter;
    *counter += 1;
    let step = step_from_config(value.get("step").unwrap_or(&Value::Null), ID_SALT, index)?;
    let children = array_param(value, "children", "depth_first_search")?
        .iter()
        .map(|child| node_from_config(child, counter))
        .collect::<Result<Vec<_>>>()?;
    Ok(SearchNode { step, children })
}

fn first_unexplored<'node>(nodes: &'node [SearchNode], history: &History) -> Option<&'node Step> {
    for node in nodes {
        match history.terminal_entry(node.step.id) {
            None => return Some(&node.step),
            Some(entry) if entry.succeeded() => {
                if let Some(step) = first_unexplored(&node.children, history) {
                    return Some(step);
                }
            }
            Some(_) => {}
        }
    }
    None
}

fn any_leaf_succeeded(nodes: &[SearchNode], history: &History) -> bool {
    nodes.iter().any(|node| {
        let succeeded = history
            .terminal_entry(node.step.id)
            .is_some_and(|entry| entry.succeeded());
        succeeded && (node.is_leaf() || any_leaf_succeeded(&node.children, history))
    })
}

#[async_trait]
impl Policy for DepthFirstSearchPolicy {
    fn name(&self) -> &str {
        "depth_first_search"
    }

    async fn next(&self, history: &History) -> Option<Step> {
        if self.stop_at_first_leaf && any_leaf_succeeded(&self.roots, history) {
            return None;
        }
        first_unexplored(&self.roots, history).cloned()
    }

    fn succeeded(&self, history: &History) -> bool {
        any_leaf_succeeded(&self.roots, history)
    }
}
