//! Graph reasoning walker - bounded multi-hop path expansion
//!
//! Breadth-first expansion from seed entities. Each path carries its own
//! visited set, so no path revisits an entity, while different paths may
//! reach the same entity via different routes. Expansion per seed is
//! capped, and only the top paths by cumulative confidence are retained.

use crate::config::RetrievalConfig;
use crate::store::GraphStore;
use kgrag_core::{GraphPath, Provenance};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Walker tunables, a view over the retrieval config
#[derive(Debug, Clone)]
pub struct WalkerConfig {
    pub hop_limit: usize,
    pub confidence_threshold: f32,
    pub max_paths_per_seed: usize,
    pub top_paths_per_seed: usize,
}

impl From<&RetrievalConfig> for WalkerConfig {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            hop_limit: config.hop_limit,
            confidence_threshold: config.edge_confidence_threshold,
            max_paths_per_seed: config.max_paths_per_seed,
            top_paths_per_seed: config.top_paths_per_seed,
        }
    }
}

/// The graph signal returned to the retriever
#[derive(Debug, Clone, Default)]
pub struct GraphSignal {
    pub paths: Vec<GraphPath>,
    /// Provenance gathered from traversed edges
    pub provenance: Vec<Provenance>,
    /// Set when the graph store failed mid-walk; the caller proceeds
    /// with whatever was collected (vector-only in the worst case)
    pub degraded: bool,
}

/// Expand outward from the seeds up to the hop limit.
///
/// Hop limit 0 returns one zero-hop path per seed at confidence 1.0.
/// For hop limit >= 1 only paths with at least one edge are returned,
/// ranked by cumulative confidence per seed. A store failure degrades
/// the signal instead of failing the call.
pub async fn walk(store: &dyn GraphStore, seeds: &[String], config: &WalkerConfig) -> GraphSignal {
    let mut signal = GraphSignal::default();

    if config.hop_limit == 0 {
        signal.paths = seeds.iter().map(GraphPath::seed).collect();
        return signal;
    }

    for seed in seeds {
        let mut collected: Vec<GraphPath> = Vec::new();
        let mut queue: VecDeque<GraphPath> = VecDeque::new();
        queue.push_back(GraphPath::seed(seed));

        'expand: while let Some(path) = queue.pop_front() {
            if path.hops() >= config.hop_limit {
                continue;
            }

            let edges = match store.edges_from(path.terminal()).await {
                Ok(edges) => edges,
                Err(e) => {
                    warn!("Graph store failed during walk: {}", e);
                    signal.degraded = true;
                    break 'expand;
                }
            };

            for edge in edges {
                if edge.confidence < config.confidence_threshold {
                    continue;
                }
                // Simple paths only: no entity repeats within one path
                if path.nodes.iter().any(|n| n == &edge.neighbor) {
                    continue;
                }

                let mut next = path.clone();
                next.nodes.push(edge.neighbor.clone());
                next.predicates.push(edge.predicate.clone());
                next.cumulative_confidence *= edge.confidence;

                for p in &edge.provenance {
                    if !signal.provenance.iter().any(|q| q.key() == p.key()) {
                        signal.provenance.push(p.clone());
                    }
                }

                collected.push(next.clone());
                if collected.len() >= config.max_paths_per_seed {
                    debug!("Expansion cap reached for seed {}", seed);
                    break 'expand;
                }
                queue.push_back(next);
            }
        }

        collected.sort_by(|a, b| {
            b.cumulative_confidence
                .total_cmp(&a.cumulative_confidence)
                .then_with(|| a.hops().cmp(&b.hops()))
                .then_with(|| a.nodes.cmp(&b.nodes))
        });
        collected.truncate(config.top_paths_per_seed);
        signal.paths.extend(collected);
    }

    signal
}

/// Find simple paths between two named entities within `hop_limit` hops.
///
/// Shortest paths rank first; equal-length paths rank by cumulative
/// confidence.
pub async fn paths_between(
    store: &dyn GraphStore,
    from: &str,
    to: &str,
    config: &WalkerConfig,
) -> crate::Result<Vec<GraphPath>> {
    let mut found: Vec<GraphPath> = Vec::new();
    let mut expanded = 0usize;
    let mut queue: VecDeque<GraphPath> = VecDeque::new();
    queue.push_back(GraphPath::seed(from));

    while let Some(path) = queue.pop_front() {
        if path.hops() >= config.hop_limit {
            continue;
        }

        let edges = store.edges_from(path.terminal()).await?;
        for edge in edges {
            if edge.confidence < config.confidence_threshold {
                continue;
            }
            if path.nodes.iter().any(|n| n == &edge.neighbor) {
                continue;
            }

            let mut next = path.clone();
            next.nodes.push(edge.neighbor.clone());
            next.predicates.push(edge.predicate.clone());
            next.cumulative_confidence *= edge.confidence;

            expanded += 1;
            if next.terminal() == to {
                found.push(next);
            } else {
                queue.push_back(next);
            }

            if expanded >= config.max_paths_per_seed {
                queue.clear();
                break;
            }
        }
    }

    found.sort_by(|a, b| {
        a.hops()
            .cmp(&b.hops())
            .then_with(|| b.cumulative_confidence.total_cmp(&a.cumulative_confidence))
            .then_with(|| a.nodes.cmp(&b.nodes))
    });
    found.truncate(config.top_paths_per_seed);
    Ok(found)
}
