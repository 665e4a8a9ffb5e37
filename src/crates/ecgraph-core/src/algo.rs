//! Graph primitives and algorithms over an adjacency representation.
//!
//! A graph is a mapping from node id to its ordered child ids. An empty
//! child vector means "no outgoing edges"; a missing key means "not in the
//! graph". `BTreeMap` keeps iteration deterministic, which in turn keeps
//! derived orders (roots, topological sort) stable across runs.
//!
//! The centerpiece is [`depth_first_search`], an iterative DFS with
//! pluggable hooks that the higher-level operations ([`is_cyclic`],
//! [`reachable_interior`]) are built from.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};

/// Node identifier: a unique name within its containing graph.
pub type NodeId = String;

/// Adjacency representation: node id to ordered child ids.
pub type AdjacencyGraph = BTreeMap<NodeId, Vec<NodeId>>;

/// True iff `id` is a node of the graph.
pub fn contains(graph: &AdjacencyGraph, id: &str) -> bool {
    graph.contains_key(id)
}

/// Direct children of `id`, deduplicated preserving first-seen order.
/// Empty for unknown ids.
pub fn children(graph: &AdjacencyGraph, id: &str) -> Vec<NodeId> {
    let Some(child_ids) = graph.get(id) else {
        return Vec::new();
    };
    let mut seen = BTreeSet::new();
    child_ids
        .iter()
        .filter(|c| seen.insert((*c).clone()))
        .cloned()
        .collect()
}

/// Node ids that list `id` as a child. Linear in the number of edges.
pub fn parents(graph: &AdjacencyGraph, id: &str) -> Vec<NodeId> {
    if !contains(graph, id) {
        return Vec::new();
    }
    graph
        .iter()
        .filter(|(_, child_ids)| child_ids.iter().any(|c| c == id))
        .map(|(parent_id, _)| parent_id.clone())
        .collect()
}

/// Nodes sharing at least one parent with `id`, excluding `id` itself.
/// Children of each parent are combined by set union.
pub fn siblings(graph: &AdjacencyGraph, id: &str) -> Vec<NodeId> {
    let mut sibling_ids = BTreeSet::new();
    for parent_id in parents(graph, id) {
        for child_id in children(graph, &parent_id) {
            sibling_ids.insert(child_id);
        }
    }
    sibling_ids.remove(id);
    sibling_ids.into_iter().collect()
}

/// Nodes with no outgoing edges.
pub fn leaves(graph: &AdjacencyGraph) -> Vec<NodeId> {
    graph
        .iter()
        .filter(|(_, child_ids)| child_ids.is_empty())
        .map(|(id, _)| id.clone())
        .collect()
}

/// Nodes with no inbound edges.
pub fn roots(graph: &AdjacencyGraph) -> Vec<NodeId> {
    graph
        .keys()
        .filter(|id| parents(graph, id).is_empty())
        .cloned()
        .collect()
}

/// Every `(parent, child)` edge, children deduplicated per node.
pub fn edges(graph: &AdjacencyGraph) -> Vec<(NodeId, NodeId)> {
    let mut edge_list = Vec::new();
    for id in graph.keys() {
        for child_id in children(graph, id) {
            edge_list.push((id.clone(), child_id));
        }
    }
    edge_list
}

/// Read-only view of the search state handed to DFS hooks.
///
/// `current`/`depth` are `None` only on the terminal [`depth_first_search`]
/// finalize call after the stack is exhausted.
#[derive(Debug)]
pub struct DfsState<'a> {
    /// The node just popped from the stack, if any.
    pub current: Option<&'a str>,
    /// Visitation depth of `current`.
    pub depth: Option<usize>,
    /// Node id to the depth of its first visit.
    pub visited: &'a BTreeMap<NodeId, usize>,
    /// Remaining `(node, depth)` entries still to visit.
    pub stack: &'a [(NodeId, usize)],
    /// Current root-to-node visitation path, `current` last.
    pub path: &'a [NodeId],
}

/// Iterative depth-first search with pluggable hooks.
///
/// Starts from `start_ids` (falling back to [`roots`] when absent or empty)
/// and maintains an explicit `(node, depth)` stack, a visited map, and the
/// current visitation path whose depths strictly increase.
///
/// On every popped node, in order:
/// 1. the path is truncated to entries of strictly smaller depth and the
///    node appended;
/// 2. `stop_when` may terminate the whole search, in which case `finalize`
///    is invoked with the same state and its result returned;
/// 3. already-visited nodes are not expanded again;
/// 4. `skip_children_when` may suppress pushing the node's children, which
///    are otherwise pushed in declared order at `depth + 1`.
///
/// On stack exhaustion `finalize` is invoked once with `current = None`.
/// Returns `None` when the graph or the effective start set is empty, or
/// when no `finalize` hook was supplied.
pub fn depth_first_search<R>(
    graph: &AdjacencyGraph,
    start_ids: Option<&[NodeId]>,
    mut stop_when: Option<&mut dyn FnMut(&DfsState<'_>) -> bool>,
    mut skip_children_when: Option<&mut dyn FnMut(&DfsState<'_>) -> bool>,
    mut finalize: Option<&mut dyn FnMut(&DfsState<'_>) -> R>,
) -> Option<R> {
    if graph.is_empty() {
        return None;
    }
    let fallback_roots;
    let start_ids = match start_ids {
        Some(ids) if !ids.is_empty() => ids,
        _ => {
            fallback_roots = roots(graph);
            &fallback_roots[..]
        }
    };

    let mut visited: BTreeMap<NodeId, usize> = BTreeMap::new();
    let mut stack: Vec<(NodeId, usize)> = start_ids
        .iter()
        .filter(|id| contains(graph, id))
        .map(|id| (id.clone(), 0))
        .collect();
    if stack.is_empty() {
        return None;
    }

    let mut path: Vec<NodeId> = Vec::new();
    let mut path_depths: Vec<usize> = Vec::new();

    while let Some((current, depth)) = stack.pop() {
        if depth == 0 {
            path.clear();
            path_depths.clear();
        } else {
            while path_depths.last().is_some_and(|d| *d >= depth) {
                path.pop();
                path_depths.pop();
            }
        }
        path.push(current.clone());
        path_depths.push(depth);

        let state = DfsState {
            current: Some(current.as_str()),
            depth: Some(depth),
            visited: &visited,
            stack: &stack,
            path: &path,
        };
        if stop_when.as_mut().is_some_and(|stop| stop(&state)) {
            return finalize.as_mut().map(|f| f(&state));
        }
        if visited.contains_key(&current) {
            continue;
        }
        drop(state);
        visited.insert(current.clone(), depth);

        let state = DfsState {
            current: Some(current.as_str()),
            depth: Some(depth),
            visited: &visited,
            stack: &stack,
            path: &path,
        };
        if skip_children_when.as_mut().is_some_and(|skip| skip(&state)) {
            continue;
        }
        drop(state);

        for child_id in children(graph, &current) {
            stack.push((child_id, depth + 1));
        }
    }

    let state = DfsState {
        current: None,
        depth: None,
        visited: &visited,
        stack: &stack,
        path: &path,
    };
    finalize.as_mut().map(|f| f(&state))
}

/// True iff the graph contains a directed cycle. Empty graphs are acyclic.
///
/// Runs a DFS from all roots and reports a cycle when a popped node is
/// already visited and occurs earlier on the current path (a back edge).
/// A non-empty graph without roots is cyclic by construction, as is one
/// whose root-reachable portion does not cover every node: the unreached
/// remainder has no entry point and must close on itself.
pub fn is_cyclic(graph: &AdjacencyGraph) -> bool {
    if graph.is_empty() {
        return false;
    }
    let root_ids = roots(graph);
    if root_ids.is_empty() {
        return true;
    }

    let mut found_back_edge = false;
    let mut stop_when = |state: &DfsState<'_>| -> bool {
        let Some(current) = state.current else {
            return false;
        };
        if !state.visited.contains_key(current) {
            return false;
        }
        // The path ends with the popped node itself; a back edge needs an
        // earlier occurrence.
        if state.path[..state.path.len() - 1].iter().any(|n| n == current) {
            found_back_edge = true;
            return true;
        }
        false
    };
    let mut finalize = |state: &DfsState<'_>| state.visited.len();

    let visited_count = depth_first_search(
        graph,
        Some(&root_ids),
        Some(&mut stop_when),
        None,
        Some(&mut finalize),
    );
    if found_back_edge {
        return true;
    }
    visited_count.is_some_and(|count| count < graph.len())
}

/// Kahn-style topological sort. `None` for empty or cyclic graphs.
///
/// The frontier starts from [`roots`] and is consumed LIFO; edges are
/// removed from a working list and a child joins the frontier once its last
/// inbound edge is gone.
pub fn topological_sort(graph: &AdjacencyGraph) -> Option<Vec<NodeId>> {
    if graph.is_empty() || is_cyclic(graph) {
        return None;
    }
    let mut remaining_edges = edges(graph);
    let mut sorted = Vec::with_capacity(graph.len());
    let mut frontier = roots(graph);

    while let Some(current) = frontier.pop() {
        for child_id in children(graph, &current) {
            let edge = (current.clone(), child_id.clone());
            if let Some(index) = remaining_edges.iter().position(|e| *e == edge) {
                remaining_edges.remove(index);
                if !remaining_edges.iter().any(|(_, to)| *to == child_id) {
                    frontier.push(child_id);
                }
            }
        }
        sorted.push(current);
    }
    Some(sorted)
}

/// Nodes lying on at least one `src` → `dst` path in a DAG.
///
/// Repeats a bounded DFS from `src` that stops on reaching `dst`; each
/// successful search contributes its visitation path, and nodes seen off
/// the successful paths are blocked from re-expansion so later rounds
/// explore alternatives. The loop ends when a search exhausts without
/// reaching `dst` or repeats the previous path.
///
/// Returns `None` for empty or cyclic graphs or unknown endpoints. When
/// `src == dst` the result is `[src]` if both inclusion flags are set and
/// empty otherwise.
pub fn reachable_interior(
    graph: &AdjacencyGraph,
    src: &str,
    dst: &str,
    include_src: bool,
    include_dst: bool,
) -> Option<Vec<NodeId>> {
    if graph.is_empty() {
        return None;
    }
    if is_cyclic(graph) || !contains(graph, src) || !contains(graph, dst) {
        return None;
    }
    if src == dst {
        if include_src && include_dst {
            return Some(vec![src.to_string()]);
        }
        return Some(Vec::new());
    }

    let blocked: RefCell<BTreeSet<NodeId>> = RefCell::new(BTreeSet::new());
    let on_path: RefCell<BTreeSet<NodeId>> = RefCell::new(BTreeSet::new());
    let last_path: RefCell<Vec<NodeId>> = RefCell::new(Vec::new());
    let done = Cell::new(false);
    let start_ids = vec![src.to_string()];

    while !done.get() {
        let mut stop_when = |state: &DfsState<'_>| state.current == Some(dst);
        let mut skip_children_when = |state: &DfsState<'_>| {
            state
                .current
                .is_some_and(|current| blocked.borrow().contains(current))
        };
        let mut finalize = |state: &DfsState<'_>| {
            if state.current.is_none() || state.path == last_path.borrow().as_slice() {
                done.set(true);
            }
            if state.current == Some(dst) {
                *last_path.borrow_mut() = state.path.to_vec();
                let mut connected = on_path.borrow_mut();
                for node_id in state.path {
                    if node_id == src && !include_src {
                        continue;
                    }
                    if node_id == dst && !include_dst {
                        continue;
                    }
                    connected.insert(node_id.clone());
                }
            }
            let mut seen = blocked.borrow_mut();
            for node_id in state.visited.keys() {
                if node_id == src || node_id == dst {
                    continue;
                }
                seen.insert(node_id.clone());
            }
        };

        let ran = depth_first_search(
            graph,
            Some(&start_ids),
            Some(&mut stop_when),
            Some(&mut skip_children_when),
            Some(&mut finalize),
        );
        if ran.is_none() {
            break;
        }
    }

    Some(on_path.into_inner().into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_of(entries: &[(&str, &[&str])]) -> AdjacencyGraph {
        entries
            .iter()
            .map(|(id, child_ids)| {
                (
                    id.to_string(),
                    child_ids.iter().map(|c| c.to_string()).collect(),
                )
            })
            .collect()
    }

    fn acyclic_fixture() -> AdjacencyGraph {
        graph_of(&[
            ("a", &["b", "c"]),
            ("b", &["d"]),
            ("c", &["e", "d"]),
            ("d", &[]),
            ("e", &[]),
        ])
    }

    fn cyclic_fixture() -> AdjacencyGraph {
        graph_of(&[
            ("a", &["b", "c"]),
            ("b", &["d"]),
            ("c", &["e"]),
            ("d", &["a"]),
            ("e", &[]),
        ])
    }

    #[test]
    fn test_contains_and_children() {
        let graph = acyclic_fixture();
        assert!(contains(&graph, "a"));
        assert!(!contains(&graph, "z"));
        assert_eq!(children(&graph, "a"), vec!["b", "c"]);
        assert!(children(&graph, "z").is_empty());
    }

    #[test]
    fn test_children_dedup_preserves_first_seen_order() {
        let graph = graph_of(&[("a", &["c", "b", "c", "b"]), ("b", &[]), ("c", &[])]);
        assert_eq!(children(&graph, "a"), vec!["c", "b"]);
    }

    #[test]
    fn test_parents_and_siblings() {
        let graph = acyclic_fixture();
        assert_eq!(parents(&graph, "d"), vec!["b", "c"]);
        assert_eq!(parents(&graph, "a"), Vec::<NodeId>::new());
        assert!(parents(&graph, "unknown").is_empty());
        // d's parents are b and c; their combined children are {d, e}.
        assert_eq!(siblings(&graph, "d"), vec!["e"]);
        assert_eq!(siblings(&graph, "b"), vec!["c"]);
    }

    #[test]
    fn test_leaves_and_roots() {
        let graph = acyclic_fixture();
        assert_eq!(leaves(&graph), vec!["d", "e"]);
        assert_eq!(roots(&graph), vec!["a"]);
        assert!(leaves(&AdjacencyGraph::new()).is_empty());
        assert!(roots(&AdjacencyGraph::new()).is_empty());
    }

    #[test]
    fn test_dfs_visits_every_reachable_node() {
        let graph = acyclic_fixture();
        let mut finalize = |state: &DfsState<'_>| state.visited.len();
        let visited = depth_first_search(&graph, None, None, None, Some(&mut finalize));
        assert_eq!(visited, Some(5));
    }

    #[test]
    fn test_dfs_path_reaches_popped_node() {
        let graph = acyclic_fixture();
        let mut stop_when = |state: &DfsState<'_>| state.current == Some("d");
        let mut finalize = |state: &DfsState<'_>| state.path.to_vec();
        let path =
            depth_first_search(&graph, None, Some(&mut stop_when), None, Some(&mut finalize))
                .expect("d is reachable from the root");
        assert_eq!(path.first().map(String::as_str), Some("a"));
        assert_eq!(path.last().map(String::as_str), Some("d"));
    }

    #[test]
    fn test_dfs_skip_children_suppresses_expansion() {
        let graph = acyclic_fixture();
        let mut skip = |state: &DfsState<'_>| state.current == Some("c");
        let mut finalize = |state: &DfsState<'_>| state.visited.contains_key("e");
        let saw_e = depth_first_search(&graph, None, None, Some(&mut skip), Some(&mut finalize));
        // e is only reachable through c, whose children were skipped.
        assert_eq!(saw_e, Some(false));
    }

    #[test]
    fn test_is_cyclic_detects_cycle() {
        assert!(is_cyclic(&cyclic_fixture()));
    }

    #[test]
    fn test_is_cyclic_acyclic_fixture_regression() {
        // The acyclic fixture must never be flagged, including on the DFS
        // exhaustion path.
        assert!(!is_cyclic(&acyclic_fixture()));
    }

    #[test]
    fn test_is_cyclic_empty_graph() {
        assert!(!is_cyclic(&AdjacencyGraph::new()));
    }

    #[test]
    fn test_is_cyclic_self_loop() {
        let graph = graph_of(&[("r", &["a"]), ("a", &["a"])]);
        assert!(is_cyclic(&graph));
    }

    #[test]
    fn test_is_cyclic_rootless_two_cycle() {
        let graph = graph_of(&[("a", &["b"]), ("b", &["a"])]);
        assert!(is_cyclic(&graph));
    }

    #[test]
    fn test_is_cyclic_detached_cycle_beside_roots() {
        let graph = graph_of(&[("a", &[]), ("b", &["c"]), ("c", &["b"])]);
        assert!(is_cyclic(&graph));
    }

    #[test]
    fn test_topological_sort_orders_producers_first() {
        let graph = acyclic_fixture();
        let order = topological_sort(&graph).expect("fixture is acyclic");
        assert_eq!(order.len(), 5);
        let position = |id: &str| order.iter().position(|n| n == id).unwrap();
        assert_eq!(position("a"), 0);
        assert!(position("b") < position("d"));
        assert!(position("c") < position("d"));
        assert!(position("c") < position("e"));
    }

    #[test]
    fn test_topological_sort_rejects_cyclic_and_empty() {
        assert!(topological_sort(&cyclic_fixture()).is_none());
        assert!(topological_sort(&AdjacencyGraph::new()).is_none());
    }

    #[test]
    fn test_reachable_interior_collects_all_paths() {
        let graph = acyclic_fixture();
        let nodes = reachable_interior(&graph, "a", "d", true, true).unwrap();
        assert_eq!(nodes, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_reachable_interior_excludes_endpoints_on_request() {
        let graph = acyclic_fixture();
        let nodes = reachable_interior(&graph, "a", "d", false, false).unwrap();
        assert_eq!(nodes, vec!["b", "c"]);
    }

    #[test]
    fn test_reachable_interior_same_endpoints() {
        let graph = acyclic_fixture();
        assert_eq!(
            reachable_interior(&graph, "a", "a", true, true).unwrap(),
            vec!["a"]
        );
        assert!(reachable_interior(&graph, "a", "a", true, false)
            .unwrap()
            .is_empty());
        assert!(reachable_interior(&graph, "a", "a", false, true)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_reachable_interior_rejects_bad_inputs() {
        assert!(reachable_interior(&AdjacencyGraph::new(), "a", "b", true, true).is_none());
        assert!(reachable_interior(&cyclic_fixture(), "a", "d", true, true).is_none());
        assert!(reachable_interior(&acyclic_fixture(), "a", "zz", true, true).is_none());
    }

    #[test]
    fn test_reachable_interior_no_path() {
        let graph = acyclic_fixture();
        // e is a sink; nothing flows from e to d.
        let nodes = reachable_interior(&graph, "e", "d", true, true).unwrap();
        assert!(nodes.is_empty());
    }
}
