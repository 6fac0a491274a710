//! Configuração plana do motor, carregada via setters
//! explícitos ou variáveis de ambiente `CAPROUTER_*`, no mesmo estilo
//! hand-rolled (`bool_env`, precedência em camadas) em vez de puxar a
//! crate `config`/`envy` para uma dúzia de campos.

use crate::error::EngineError;

/// Configuração do motor de roteamento, com valores-padrão sensatos.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    pub num_heads: usize,
    pub hidden_dim: usize,
    pub num_layers: usize,
    pub embedding_dim: usize,
    pub use_transformer_semantic: bool,
    pub semantic_projection_dim: Option<usize>,
    pub learning_rate: f64,
    pub l2_lambda: f64,
    pub damping: f64,
    pub pagerank_tol: f64,
    pub spectral_k: usize,
    pub max_recursion_layers: usize,
    pub acceptance_threshold: f64,
    pub reliability_threshold: f64,
    /// Floor epsilon used in `w(H) = 1 / max(eps, successRate(H))`.
    pub success_rate_epsilon: f64,
    /// Spectral PageRank iteration cap.
    pub pagerank_max_iterations: usize,
    /// Tamanho do top-N ao qual `discover` trunca seus candidatos
    /// (adição operacional registrada em `DESIGN.md`, fora do conjunto de
    /// campos originalmente enumerado).
    pub discover_top_n: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            num_heads: 4,
            hidden_dim: 64,
            num_layers: 2,
            embedding_dim: 1024,
            use_transformer_semantic: false,
            semantic_projection_dim: None,
            learning_rate: 1e-3,
            l2_lambda: 1e-4,
            damping: 0.85,
            pagerank_tol: 1e-6,
            spectral_k: 8,
            max_recursion_layers: 2,
            acceptance_threshold: 0.7,
            reliability_threshold: 0.8,
            success_rate_epsilon: 1e-3,
            pagerank_max_iterations: 100,
            discover_top_n: 10,
        }
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

impl Configuration {
    /// Carrega a configuração a partir de variáveis de ambiente `CAPROUTER_*`,
    /// caindo de volta para os defaults de [`Configuration::default`] quando
    /// ausentes.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            num_heads: env_usize("CAPROUTER_NUM_HEADS", default.num_heads),
            hidden_dim: env_usize("CAPROUTER_HIDDEN_DIM", default.hidden_dim),
            num_layers: env_usize("CAPROUTER_NUM_LAYERS", default.num_layers),
            embedding_dim: env_usize("CAPROUTER_EMBEDDING_DIM", default.embedding_dim),
            use_transformer_semantic: env_bool(
                "CAPROUTER_USE_TRANSFORMER_SEMANTIC",
                default.use_transformer_semantic,
            ),
            semantic_projection_dim: std::env::var("CAPROUTER_SEMANTIC_PROJECTION_DIM")
                .ok()
                .and_then(|v| v.parse().ok()),
            learning_rate: env_f64("CAPROUTER_LEARNING_RATE", default.learning_rate),
            l2_lambda: env_f64("CAPROUTER_L2_LAMBDA", default.l2_lambda),
            damping: env_f64("CAPROUTER_DAMPING", default.damping),
            pagerank_tol: env_f64("CAPROUTER_PAGERANK_TOL", default.pagerank_tol),
            spectral_k: env_usize("CAPROUTER_SPECTRAL_K", default.spectral_k),
            max_recursion_layers: env_usize(
                "CAPROUTER_MAX_RECURSION_LAYERS",
                default.max_recursion_layers,
            ),
            acceptance_threshold: env_f64(
                "CAPROUTER_ACCEPTANCE_THRESHOLD",
                default.acceptance_threshold,
            ),
            reliability_threshold: env_f64(
                "CAPROUTER_RELIABILITY_THRESHOLD",
                default.reliability_threshold,
            ),
            success_rate_epsilon: env_f64(
                "CAPROUTER_SUCCESS_RATE_EPSILON",
                default.success_rate_epsilon,
            ),
            pagerank_max_iterations: env_usize(
                "CAPROUTER_PAGERANK_MAX_ITERATIONS",
                default.pagerank_max_iterations,
            ),
            discover_top_n: env_usize("CAPROUTER_DISCOVER_TOP_N", default.discover_top_n),
        }
    }

    /// Valida os limites aceitáveis de cada campo, retornando `Result` em
    /// vez de `assert!`, pois valida entrada externa não confiável, não
    /// construção interna.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(1..=16).contains(&self.num_heads) {
            return Err(EngineError::InvalidConfiguration(format!(
                "num_heads out of range [1,16]: {}",
                self.num_heads
            )));
        }
        if !(8..=1024).contains(&self.hidden_dim) {
            return Err(EngineError::InvalidConfiguration(format!(
                "hidden_dim out of range [8,1024]: {}",
                self.hidden_dim
            )));
        }
        if !(1..=4).contains(&self.num_layers) {
            return Err(EngineError::InvalidConfiguration(format!(
                "num_layers out of range [1,4]: {}",
                self.num_layers
            )));
        }
        if !(64..=4096).contains(&self.embedding_dim) {
            return Err(EngineError::InvalidConfiguration(format!(
                "embedding_dim out of range [64,4096]: {}",
                self.embedding_dim
            )));
        }
        if !(0.0..=1.0).contains(&self.damping) {
            return Err(EngineError::InvalidConfiguration(format!(
                "damping out of range [0,1]: {}",
                self.damping
            )));
        }
        if self.spectral_k == 0 {
            return Err(EngineError::InvalidConfiguration(
                "spectral_k must be >= 1".into(),
            ));
        }
        if self.max_recursion_layers == 0 {
            return Err(EngineError::InvalidConfiguration(
                "max_recursion_layers must be >= 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.acceptance_threshold) {
            return Err(EngineError::InvalidConfiguration(
                "acceptance_threshold out of range [0,1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.reliability_threshold) {
            return Err(EngineError::InvalidConfiguration(
                "reliability_threshold out of range [0,1]".into(),
            ));
        }
        if self.success_rate_epsilon <= 0.0 {
            return Err(EngineError::InvalidConfiguration(
                "success_rate_epsilon must be > 0".into(),
            ));
        }
        if self.discover_top_n == 0 {
            return Err(EngineError::InvalidConfiguration(
                "discover_top_n must be >= 1".into(),
            ));
        }
        Ok(())
    }
}
