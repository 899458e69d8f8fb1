//! HNSW insertion: bidirectional connections with heuristic neighbor pruning
//! (Algorithm 4 from the HNSW paper).

use crate::hnsw::distance::l2_sq;
use crate::hnsw::graph::HnswGraph;
use crate::hnsw::search::{search_layer, VisitedSet};

impl HnswGraph {
    /// Insert a vector as a new node and return its id.
    ///
    /// Node ids are assigned densely in insertion order. `vector.len()` must
    /// equal the graph dimension.
    pub fn insert(&mut self, vector: &[f32]) -> u32 {
        debug_assert_eq!(vector.len(), self.dimension);
        let id = self.node_count;
        let level = self.random_level();

        // First node: no search needed
        let Some(entry_point) = self.entry_point else {
            self.push_node(vector, level);
            self.entry_point = Some(id);
            self.max_level = level;
            return id;
        };

        let mut visited = VisitedSet::new(self.node_count as usize);
        let mut current = entry_point;

        // Phase 1: greedy descent from the top layer to level + 1
        for layer in (level + 1..=self.max_level).rev() {
            let found = search_layer(
                self,
                vector,
                std::slice::from_ref(&current),
                1,
                layer,
                &mut visited,
            );
            if let Some(&(_, nearest)) = found.first() {
                current = nearest;
            }
        }

        // Phase 2: collect neighbors per layer from level down to 0
        let top = level.min(self.max_level);
        let mut node_neighbors: Vec<Vec<u32>> = vec![Vec::new(); level + 1];
        let mut layer_eps: Vec<u32> = vec![current];
        for layer in (0..=top).rev() {
            let candidates = search_layer(
                self,
                vector,
                &layer_eps,
                self.config.ef_construction,
                layer,
                &mut visited,
            );
            let m_max = self.m_max(layer);
            node_neighbors[layer] = select_diverse(self, &candidates, m_max)
                .into_iter()
                .map(|(_, cid)| cid)
                .collect();

            layer_eps.clear();
            layer_eps.extend(candidates.iter().map(|&(_, cid)| cid));
            if layer_eps.is_empty() {
                layer_eps.push(entry_point);
            }
        }

        self.push_node(vector, level);
        self.neighbors[id as usize] = node_neighbors;

        // Phase 3: backlinks, pruning over-capacity neighbor lists
        for layer in 0..=top {
            let m_max = self.m_max(layer);
            let links: Vec<u32> = self.neighbors[id as usize][layer].clone();
            for neighbor in links {
                let nid = neighbor as usize;
                while self.neighbors[nid].len() <= layer {
                    self.neighbors[nid].push(Vec::new());
                }
                self.neighbors[nid][layer].push(id);

                if self.neighbors[nid][layer].len() > m_max {
                    let candidates: Vec<(f32, u32)> = self.neighbors[nid][layer]
                        .iter()
                        .map(|&cid| (l2_sq(self.vector(neighbor), self.vector(cid)), cid))
                        .collect();
                    self.neighbors[nid][layer] = select_diverse(self, &candidates, m_max)
                        .into_iter()
                        .map(|(_, cid)| cid)
                        .collect();
                }
            }
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry_point = Some(id);
        }
        id
    }

    fn m_max(&self, layer: usize) -> usize {
        if layer == 0 {
            self.config.m_max0
        } else {
            self.config.m
        }
    }

    fn push_node(&mut self, vector: &[f32], level: usize) {
        self.vectors.extend_from_slice(vector);
        self.neighbors.push(vec![Vec::new(); level + 1]);
        self.levels.push(level as u8);
        self.deleted.push(false);
        self.node_count += 1;
    }
}

/// Heuristic neighbor selection: a candidate is kept only if it is closer to
/// the base node than to any already-kept neighbor, which favors diverse
/// directions over redundant near-duplicates. Remaining slots are filled with
/// the closest unused candidates.
fn select_diverse(graph: &HnswGraph, candidates: &[(f32, u32)], m: usize) -> Vec<(f32, u32)> {
    let mut sorted = candidates.to_vec();
    sorted.sort_unstable_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut selected: Vec<(f32, u32)> = Vec::with_capacity(m);
    for &(dist_to_base, cid) in &sorted {
        if selected.len() >= m {
            break;
        }
        let diverse = selected.iter().all(|&(_, sid)| {
            dist_to_base <= l2_sq(graph.vector(cid), graph.vector(sid))
        });
        if diverse {
            selected.push((dist_to_base, cid));
        }
    }

    if selected.len() < m {
        for &(dist, cid) in &sorted {
            if selected.len() >= m {
                break;
            }
            if !selected.iter().any(|&(_, sid)| sid == cid) {
                selected.push((dist, cid));
            }
        }
    }

    selected
}
