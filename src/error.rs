//! Taxonomia de erros do motor de roteamento.
//!
//! Cada variante carrega contexto suficiente para o chamador decidir se deve
//! repetir a chamada; `is_transient()`/`is_client_error()` ajudam a decidir
//! como reagir sem inspecionar a variante diretamente.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Dimensão de embedding incompatível com a configurada no store.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Identificador de nó desconhecido foi referenciado.
    #[error("unknown node: {0}")]
    UnknownNode(String),

    /// Uma capability foi registrada sem nenhuma ferramenta associada.
    #[error("capability {0} has no associated tools")]
    EmptyCapability(String),

    /// Embedding de entrada contém valores não-finitos.
    #[error("embedding contains non-finite values: {0}")]
    InvalidEmbedding(String),

    /// O embedder externo falhou ou está indisponível.
    #[error("embedder unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Operação de longa duração foi cancelada pelo chamador.
    #[error("operation cancelled")]
    Cancelled,

    /// Pontuação foi solicitada antes de o motor ser inicializado.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Menos de duas amostras positivas foram fornecidas para treino.
    #[error("insufficient training examples: have {have}, need at least {need}")]
    InsufficientExamples { have: usize, need: usize },

    /// Perda não-finita por `consecutive_steps` passos consecutivos.
    #[error("degenerate loss for {consecutive_steps} consecutive steps")]
    DegenerateLoss { consecutive_steps: u32 },

    /// A reconstrução espectral não convergiu dentro do limite de iterações.
    #[error("spectral recomputation failed to converge within {max_iterations} iterations")]
    SpectralNonConvergence { max_iterations: usize },

    /// Bytes de snapshot carregados são incompatíveis com a forma atual do modelo.
    #[error("incompatible parameter shape: expected {expected}, got {got}")]
    IncompatibleShape { expected: String, got: String },

    /// Nenhuma capability está registrada para sugerir um plano.
    #[error("no capabilities registered")]
    NoCapabilities,

    /// `accept` referenciou uma capability desconhecida.
    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    /// Um campo de [`crate::config::Configuration`] está fora do intervalo
    /// aceitável. Recuperável pelo chamador fornecendo um valor válido — não
    /// é `Internal`, já que a causa é entrada externa não confiável, não um
    /// invariante do motor.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Invariante interno violado — classe fatal; o processo deve terminar em produção.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl EngineError {
    /// `true` quando o chamador pode razoavelmente repetir com a mesma entrada
    /// (ex.: após sanar o problema) sem que o motor tenha entrado em quarentena.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::EmbeddingUnavailable(_) | EngineError::Cancelled
        )
    }

    /// `true` quando a causa raiz é uma entrada inválida do chamador.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EngineError::DimensionMismatch { .. }
                | EngineError::UnknownNode(_)
                | EngineError::EmptyCapability(_)
                | EngineError::InvalidEmbedding(_)
                | EngineError::UnknownCapability(_)
                | EngineError::InvalidConfiguration(_)
        )
    }

    /// `true` para os erros que colocam o motor em quarentena
    /// (`PreconditionFailed`, `Degenerate`) até `recover_from_quarantine()`.
    pub fn enters_quarantine(&self) -> bool {
        matches!(
            self,
            EngineError::PreconditionFailed(_)
                | EngineError::DegenerateLoss { .. }
                | EngineError::SpectralNonConvergence { .. }
        )
    }
}
