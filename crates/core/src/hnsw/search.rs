//! HNSW search: single-layer best-first search and multi-layer KNN.

use crate::hnsw::distance::l2_sq;
use crate::hnsw::graph::HnswGraph;
use ordered_float::OrderedFloat;
use std::collections::BinaryHeap;

/// Epoch-tagged visited marker. A `clear` bumps the epoch instead of zeroing
/// the array; a slot counts as visited only if it carries the current epoch.
#[derive(Debug)]
pub(crate) struct VisitedSet {
    marks: Vec<u32>,
    epoch: u32,
}

impl VisitedSet {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            marks: vec![0; capacity],
            epoch: 1,
        }
    }

    pub(crate) fn clear(&mut self) {
        if self.epoch == u32::MAX {
            self.marks.fill(0);
            self.epoch = 1;
        } else {
            self.epoch += 1;
        }
    }

    /// Marks `id`; returns `true` if it was not already marked this epoch.
    #[inline]
    pub(crate) fn mark(&mut self, id: u32) -> bool {
        let slot = &mut self.marks[id as usize];
        if *slot == self.epoch {
            false
        } else {
            *slot = self.epoch;
            true
        }
    }
}

/// Min-heap entry ordered by distance (stored negated for BinaryHeap's
/// max-heap semantics).
#[derive(PartialEq, Eq)]
struct Candidate {
    neg_distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.neg_distance.cmp(&other.neg_distance)
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Max-heap entry for the running result set, so the worst result pops first.
#[derive(PartialEq, Eq)]
struct ResultEntry {
    distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for ResultEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance.cmp(&other.distance)
    }
}

impl PartialOrd for ResultEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Best-first search of a single layer.
///
/// Returns up to `ef` live nodes closest to `query`, ascending by distance.
/// Soft-deleted nodes are traversed for navigation but excluded from results.
pub(crate) fn search_layer(
    graph: &HnswGraph,
    query: &[f32],
    entry_points: &[u32],
    ef: usize,
    layer: usize,
    visited: &mut VisitedSet,
) -> Vec<(f32, u32)> {
    visited.clear();
    let mut candidates: BinaryHeap<Candidate> = BinaryHeap::with_capacity(ef * 2);
    let mut results: BinaryHeap<ResultEntry> = BinaryHeap::with_capacity(ef + 1);
    let mut worst = f32::MAX;

    for &ep in entry_points {
        if !visited.mark(ep) {
            continue;
        }
        let dist = l2_sq(query, graph.vector(ep));
        candidates.push(Candidate {
            neg_distance: OrderedFloat(-dist),
            id: ep,
        });
        if !graph.is_deleted(ep) {
            results.push(ResultEntry {
                distance: OrderedFloat(dist),
                id: ep,
            });
            if results.len() >= ef {
                worst = results.peek().map_or(f32::MAX, |r| r.distance.0);
            }
        }
    }

    while let Some(candidate) = candidates.pop() {
        let c_dist = -candidate.neg_distance.0;
        if results.len() >= ef && c_dist > worst {
            break;
        }

        let node = candidate.id as usize;
        if layer >= graph.neighbors[node].len() {
            continue;
        }
        for &neighbor in &graph.neighbors[node][layer] {
            if !visited.mark(neighbor) {
                continue;
            }
            let dist = l2_sq(query, graph.vector(neighbor));
            if results.len() < ef || dist < worst {
                candidates.push(Candidate {
                    neg_distance: OrderedFloat(-dist),
                    id: neighbor,
                });
                if !graph.is_deleted(neighbor) {
                    results.push(ResultEntry {
                        distance: OrderedFloat(dist),
                        id: neighbor,
                    });
                    if results.len() > ef {
                        results.pop();
                    }
                    worst = results.peek().map_or(f32::MAX, |r| r.distance.0);
                }
            }
        }
    }

    results
        .into_sorted_vec()
        .into_iter()
        .map(|r| (r.distance.0, r.id))
        .collect()
}

/// Multi-layer KNN search.
///
/// Returns up to `k` live nodes, ascending by distance with ties broken by
/// node id ascending. Approximate: recall depends on `ef_search`.
pub fn knn(graph: &HnswGraph, query: &[f32], k: usize) -> Vec<(f32, u32)> {
    let entry_point = match graph.entry_point {
        Some(ep) => ep,
        None => return Vec::new(),
    };

    let mut visited = VisitedSet::new(graph.node_count() as usize);
    let mut current = entry_point;

    // Greedy descent with ef=1 down to layer 1
    for layer in (1..=graph.max_level).rev() {
        let found = search_layer(
            graph,
            query,
            std::slice::from_ref(&current),
            1,
            layer,
            &mut visited,
        );
        if let Some(&(_, nearest)) = found.first() {
            current = nearest;
        }
    }

    // Wide search at layer 0
    let ef = graph.config.ef_search.max(k);
    let mut results = search_layer(
        graph,
        query,
        std::slice::from_ref(&current),
        ef,
        0,
        &mut visited,
    );

    results.sort_unstable_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.cmp(&b.1))
    });
    results.truncate(k);
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis_graph() -> HnswGraph {
        let mut g = HnswGraph::with_default_config(3);
        g.insert(&[1.0, 0.0, 0.0]);
        g.insert(&[0.0, 1.0, 0.0]);
        g.insert(&[0.0, 0.0, 1.0]);
        g
    }

    #[test]
    fn empty_graph_returns_nothing() {
        let g = HnswGraph::with_default_config(3);
        assert!(knn(&g, &[1.0, 0.0, 0.0], 5).is_empty());
    }

    #[test]
    fn nearest_first_ordering() {
        let g = axis_graph();
        let results = knn(&g, &[0.9, 0.1, 0.0], 3);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].1, 0);
        assert_eq!(results[1].1, 1);
        for pair in results.windows(2) {
            assert!(pair[0].0 <= pair[1].0, "distances must be non-decreasing");
        }
    }

    #[test]
    fn k_caps_result_count() {
        let g = axis_graph();
        assert_eq!(knn(&g, &[0.9, 0.1, 0.0], 2).len(), 2);
        assert_eq!(knn(&g, &[0.9, 0.1, 0.0], 10).len(), 3);
    }

    #[test]
    fn deleted_nodes_excluded() {
        let mut g = axis_graph();
        g.mark_deleted(0);
        let results = knn(&g, &[1.0, 0.0, 0.0], 3);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|&(_, id)| id != 0));
    }

    #[test]
    fn equidistant_ties_break_by_id() {
        let mut g = HnswGraph::with_default_config(2);
        g.insert(&[1.0, 0.0]);
        g.insert(&[-1.0, 0.0]);
        g.insert(&[0.0, 1.0]);
        g.insert(&[0.0, -1.0]);
        let results = knn(&g, &[0.0, 0.0], 4);
        let ids: Vec<u32> = results.iter().map(|&(_, id)| id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn recall_on_clustered_data() {
        let mut g = HnswGraph::with_default_config(4);
        // Two well-separated clusters
        for i in 0..50 {
            let off = i as f32 * 0.001;
            g.insert(&[1.0 + off, 1.0, 0.0, 0.0]);
        }
        for i in 0..50 {
            let off = i as f32 * 0.001;
            g.insert(&[-1.0 - off, -1.0, 0.0, 0.0]);
        }
        let results = knn(&g, &[1.0, 1.0, 0.0, 0.0], 10);
        assert_eq!(results.len(), 10);
        assert!(
            results.iter().all(|&(_, id)| id < 50),
            "all hits must come from the near cluster"
        );
    }

    #[test]
    fn visited_set_epochs() {
        let mut vs = VisitedSet::new(8);
        assert!(vs.mark(3));
        assert!(!vs.mark(3));
        vs.clear();
        assert!(vs.mark(3));
    }
}
