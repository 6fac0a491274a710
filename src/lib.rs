//! Núcleo público da crate `capability-router`.
//!
//! Expõe os tipos de domínio, a taxonomia de erros, os traços de
//! colaboradores externos e a fachada [`CapabilityRouter`], que compõe o
//! feature store, o spectral clusterer, o escorer SHGAT, o trainer online e
//! o router DR-DSP em uma única API de roteamento de capabilities.

pub mod config;
pub mod engine;
pub mod error;
pub mod external;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod router;
pub mod shgat;
pub mod spectral;
pub mod store;
pub mod trainer;
pub mod types;
pub mod vector;

pub use config::Configuration;
pub use engine::{CapabilityRouter, Dag, DagTask, ExecutionRequest, SuggestDecision, SuggestResult};
pub use error::{EngineError, Result};
pub use router::HyperpathResult;
pub use shgat::{CapabilityScore, ToolScore};
pub use trainer::{Outcome, TrainResult, TrainingExample};
pub use types::{CapabilityId, Embedding, ToolId};

/// Conjunto de importações usuais para ergonomia em aplicações consumidoras.
pub mod prelude {
    pub use crate::{
        config::Configuration,
        engine::{CapabilityRouter, Dag, DagTask, ExecutionRequest, SuggestDecision, SuggestResult},
        error::{EngineError, Result},
        external::{CapabilityRepository, Embedder, OutcomeSink, ToolRegistry},
        router::HyperpathResult,
        shgat::{CapabilityScore, ToolScore},
        trainer::{Outcome, TrainResult, TrainingExample},
        types::{CapabilityId, Embedding, ToolId},
    };
}
