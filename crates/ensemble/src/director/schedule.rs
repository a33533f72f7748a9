use crate::graph::Graph;
use std::collections::BTreeSet;

/// Firing order for `graph`: producers before their consumers.
///
/// Kahn's algorithm with ties broken by insertion order, so the result is
/// stable for a given graph. Actors on a cycle have no valid position and are
/// appended in insertion order.
pub fn schedule(graph: &Graph) -> Vec<String> {
    let names: Vec<&str> = graph.names().collect();
    let order = topological_order(names.len(), &graph.edges());
    order.into_iter().map(|i| names[i].to_string()).collect()
}

pub(crate) fn topological_order(len: usize, edges: &[(usize, usize)]) -> Vec<usize> {
    let mut indegree = vec![0usize; len];
    let mut successors = vec![Vec::new(); len];
    for &(from, to) in edges {
        successors[from].push(to);
        indegree[to] += 1;
    }

    let mut ready: BTreeSet<usize> = (0..len).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(len);
    let mut placed = vec![false; len];

    while let Some(next) = ready.pop_first() {
        order.push(next);
        placed[next] = true;
        for &succ in &successors[next] {
            indegree[succ] -= 1;
            if indegree[succ] == 0 {
                ready.insert(succ);
            }
        }
    }

    order.extend((0..len).filter(|&i| !placed[i]));
    order
}
