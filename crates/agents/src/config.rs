//! Engine configuration
//!
//! All tunables are env-overridable with documented defaults. The edge
//! confidence threshold and the fusion weights interact; both are exposed
//! rather than hard-coded so deployments can calibrate them empirically.

use std::time::Duration;

const DEFAULT_TOP_K: usize = 5;
const DEFAULT_COMMUNITY_TOP_K: usize = 3;
const DEFAULT_HOP_LIMIT: usize = 2;
const DEFAULT_EDGE_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_VECTOR_WEIGHT: f32 = 0.6;
const DEFAULT_GRAPH_WEIGHT: f32 = 0.4;
const DEFAULT_MIN_FUSED_SCORE: f32 = 0.05;
const DEFAULT_MIN_VECTOR_SIMILARITY: f32 = 0.25;
const DEFAULT_MAX_PATHS_PER_SEED: usize = 32;
const DEFAULT_TOP_PATHS_PER_SEED: usize = 5;

const DEFAULT_MAX_STEPS: usize = 15;
const DEFAULT_WALL_CLOCK_SECS: u64 = 120;
const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_TRANSIENT_RETRIES: u32 = 2;
const DEFAULT_BACKOFF_BASE_MS: u64 = 200;
const DEFAULT_BACKOFF_CAP_MS: u64 = 5_000;

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<f32>().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

/// Tunables for hybrid retrieval
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Candidates returned per retrieve call
    pub top_k: usize,
    /// Community candidates considered per call
    pub community_top_k: usize,
    /// Maximum hops for the graph walker
    pub hop_limit: usize,
    /// Edges below this confidence are skipped during traversal
    /// (still stored for audit)
    pub edge_confidence_threshold: f32,
    /// Weight of the normalized vector-similarity term
    pub vector_weight: f32,
    /// Weight of the normalized graph-proximity term
    pub graph_weight: f32,
    /// Fused scores below this yield an empty ("no evidence") result
    pub min_fused_score: f32,
    /// Nearest-neighbor hits below this raw cosine similarity are
    /// discarded before fusion; KNN always returns something, so this
    /// gate is what separates "nothing relevant" from weak matches
    pub min_vector_similarity: f32,
    /// Expansion cap per seed to prevent combinatorial blow-up
    pub max_paths_per_seed: usize,
    /// Paths retained per seed after confidence ranking
    pub top_paths_per_seed: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            community_top_k: DEFAULT_COMMUNITY_TOP_K,
            hop_limit: DEFAULT_HOP_LIMIT,
            edge_confidence_threshold: DEFAULT_EDGE_CONFIDENCE_THRESHOLD,
            vector_weight: DEFAULT_VECTOR_WEIGHT,
            graph_weight: DEFAULT_GRAPH_WEIGHT,
            min_fused_score: DEFAULT_MIN_FUSED_SCORE,
            min_vector_similarity: DEFAULT_MIN_VECTOR_SIMILARITY,
            max_paths_per_seed: DEFAULT_MAX_PATHS_PER_SEED,
            top_paths_per_seed: DEFAULT_TOP_PATHS_PER_SEED,
        }
    }
}

impl RetrievalConfig {
    /// Load from environment, falling back to defaults.
    ///
    /// Weights are renormalized so `vector_weight + graph_weight = 1`
    /// holds for any input.
    pub fn from_env() -> Self {
        let mut config = Self {
            top_k: env_usize("KGRAG_TOP_K", DEFAULT_TOP_K),
            community_top_k: env_usize("KGRAG_COMMUNITY_TOP_K", DEFAULT_COMMUNITY_TOP_K),
            hop_limit: env_usize("KGRAG_HOP_LIMIT", DEFAULT_HOP_LIMIT),
            edge_confidence_threshold: env_f32(
                "KGRAG_EDGE_CONFIDENCE_THRESHOLD",
                DEFAULT_EDGE_CONFIDENCE_THRESHOLD,
            ),
            vector_weight: env_f32("KGRAG_VECTOR_WEIGHT", DEFAULT_VECTOR_WEIGHT),
            graph_weight: env_f32("KGRAG_GRAPH_WEIGHT", DEFAULT_GRAPH_WEIGHT),
            min_fused_score: env_f32("KGRAG_MIN_FUSED_SCORE", DEFAULT_MIN_FUSED_SCORE),
            min_vector_similarity: env_f32(
                "KGRAG_MIN_VECTOR_SIMILARITY",
                DEFAULT_MIN_VECTOR_SIMILARITY,
            ),
            max_paths_per_seed: env_usize("KGRAG_MAX_PATHS_PER_SEED", DEFAULT_MAX_PATHS_PER_SEED),
            top_paths_per_seed: env_usize("KGRAG_TOP_PATHS_PER_SEED", DEFAULT_TOP_PATHS_PER_SEED),
        };
        config.normalize_weights();
        config
    }

    /// Force the fusion weights to sum to 1
    pub fn normalize_weights(&mut self) {
        let total = self.vector_weight + self.graph_weight;
        if total > 0.0 {
            self.vector_weight /= total;
            self.graph_weight /= total;
        } else {
            self.vector_weight = DEFAULT_VECTOR_WEIGHT;
            self.graph_weight = DEFAULT_GRAPH_WEIGHT;
        }
    }
}

/// Budgets and resilience settings for the reasoning loop
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Hard cap on think-act-observe cycles per chat call
    pub max_steps: usize,
    /// Wall-clock budget per chat call
    pub wall_clock_budget: Duration,
    /// Timeout applied to each tool invocation
    pub tool_timeout: Duration,
    /// Retries for transient tool failures, per invocation
    pub max_transient_retries: u32,
    /// Exponential backoff starting delay
    pub backoff_base: Duration,
    /// Backoff ceiling
    pub backoff_cap: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            wall_clock_budget: Duration::from_secs(DEFAULT_WALL_CLOCK_SECS),
            tool_timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
            max_transient_retries: DEFAULT_MAX_TRANSIENT_RETRIES,
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            backoff_cap: Duration::from_millis(DEFAULT_BACKOFF_CAP_MS),
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Self {
        Self {
            max_steps: env_usize("KGRAG_MAX_STEPS", DEFAULT_MAX_STEPS),
            wall_clock_budget: Duration::from_secs(env_u64(
                "KGRAG_WALL_CLOCK_SECS",
                DEFAULT_WALL_CLOCK_SECS,
            )),
            tool_timeout: Duration::from_secs(env_u64(
                "KGRAG_TOOL_TIMEOUT_SECS",
                DEFAULT_TOOL_TIMEOUT_SECS,
            )),
            max_transient_retries: env_u64(
                "KGRAG_MAX_TRANSIENT_RETRIES",
                DEFAULT_MAX_TRANSIENT_RETRIES as u64,
            ) as u32,
            backoff_base: Duration::from_millis(env_u64(
                "KGRAG_BACKOFF_BASE_MS",
                DEFAULT_BACKOFF_BASE_MS,
            )),
            backoff_cap: Duration::from_millis(env_u64(
                "KGRAG_BACKOFF_CAP_MS",
                DEFAULT_BACKOFF_CAP_MS,
            )),
        }
    }
}
