//! Dependency ordering of instances by foreign key.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

/// Order `count` nodes so that every edge `(a, b)` puts `a` before `b`.
/// Independent nodes keep their original order. On a cycle, returns the
/// members of one offending cycle.
pub(crate) fn dependency_order(
    count: usize,
    edges: &[(usize, usize)],
) -> Result<Vec<usize>, Vec<usize>> {
    let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(count, edges.len());
    let nodes: Vec<NodeIndex> = (0..count).map(|i| graph.add_node(i)).collect();
    for &(from, to) in edges {
        if from != to {
            graph.update_edge(nodes[from], nodes[to], ());
        }
    }

    let mut pending: Vec<usize> = nodes
        .iter()
        .map(|&n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();
    let mut ready: BinaryHeap<Reverse<usize>> = pending
        .iter()
        .enumerate()
        .filter(|(_, incoming)| **incoming == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(count);
    while let Some(Reverse(next)) = ready.pop() {
        order.push(next);
        for successor in graph.neighbors_directed(nodes[next], Direction::Outgoing) {
            let index = graph[successor];
            pending[index] -= 1;
            if pending[index] == 0 {
                ready.push(Reverse(index));
            }
        }
    }

    if order.len() == count {
        return Ok(order);
    }
    let cycle = tarjan_scc(&graph)
        .into_iter()
        .find(|component| component.len() > 1)
        .map(|component| {
            let mut members: Vec<usize> = component.iter().map(|&n| graph[n]).collect();
            members.sort_unstable();
            members
        })
        .unwrap_or_default();
    Err(cycle)
}
