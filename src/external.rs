//! Traços de colaboradores externos: o motor fala com o mundo
//! exterior só através destas interfaces somente-leitura (mais o sink de
//! saída), no mesmo espírito de `traits::HypergraphStorage` e
//! `embeddings::EmbeddingGenerator`.

use crate::error::EngineError;
use crate::trainer::TrainingExample;
use crate::types::{CapabilityId, Embedding, ToolId};
use async_trait::async_trait;
use serde_json::Value;

/// Capability externa de encoding de texto: o único ponto de I/O verdadeiro
/// do motor.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// `encode(text) → Vector(D)`; deve retornar apenas valores finitos.
    async fn encode(&self, text: &str) -> Result<Embedding, EngineError>;
}

/// Visão read-only de uma capability mantida por um repositório externo.
#[derive(Debug, Clone)]
pub struct CapabilityRecord {
    pub id: CapabilityId,
    pub external_id: String,
    pub code_hash: String,
    pub success_rate: f64,
    pub usage_count: u64,
    pub duration_ms: f64,
    pub tools_used: Vec<ToolId>,
    pub parameters_schema: Option<Value>,
    pub description: Option<String>,
}

/// Visão read-only do repositório de capabilities; o motor
/// nunca escreve código, só agrega estatísticas via [`OutcomeSink`].
#[async_trait]
pub trait CapabilityRepository: Send + Sync {
    async fn get(&self, id: CapabilityId) -> Result<Option<CapabilityRecord>, EngineError>;
    async fn list_all(&self) -> Result<Vec<CapabilityRecord>, EngineError>;
}

/// Visão read-only de uma ferramenta mantida pelo registro externo.
#[derive(Debug, Clone)]
pub struct ToolRecord {
    pub id: ToolId,
    pub external_id: String,
    pub server_id: String,
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Option<Value>,
}

/// Registro read-only de ferramentas.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    async fn get(&self, id: ToolId) -> Result<Option<ToolRecord>, EngineError>;
    async fn list_all(&self) -> Result<Vec<ToolRecord>, EngineError>;
}

/// Sink durável de exemplos de treino: `append` nunca reordena.
#[async_trait]
pub trait OutcomeSink: Send + Sync {
    async fn append(&self, example: TrainingExample) -> Result<(), EngineError>;
}

#[cfg(any(test, feature = "test-util"))]
pub mod test_util {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// `Embedder` determinístico: um hash estável do texto de entrada
    /// projetado sobre a dimensão configurada.
    pub struct MockEmbedder {
        dim: usize,
    }

    impl MockEmbedder {
        pub fn new(dim: usize) -> Self {
            Self { dim }
        }
    }

    #[async_trait]
    impl Embedder for MockEmbedder {
        async fn encode(&self, text: &str) -> Result<Embedding, EngineError> {
            let mut values = vec![0.0f64; self.dim];
            for (i, byte) in text.bytes().enumerate() {
                values[i % self.dim] += byte as f64 / 255.0;
            }
            let mut embedding = Embedding::new_unchecked(values);
            embedding.l2_normalize();
            Ok(embedding)
        }
    }

    #[derive(Default)]
    pub struct InMemoryCapabilityRepository {
        records: Mutex<HashMap<CapabilityId, CapabilityRecord>>,
    }

    impl InMemoryCapabilityRepository {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, record: CapabilityRecord) {
            self.records.lock().unwrap().insert(record.id, record);
        }
    }

    #[async_trait]
    impl CapabilityRepository for InMemoryCapabilityRepository {
        async fn get(&self, id: CapabilityId) -> Result<Option<CapabilityRecord>, EngineError> {
            Ok(self.records.lock().unwrap().get(&id).cloned())
        }

        async fn list_all(&self) -> Result<Vec<CapabilityRecord>, EngineError> {
            Ok(self.records.lock().unwrap().values().cloned().collect())
        }
    }

    #[derive(Default)]
    pub struct InMemoryToolRegistry {
        records: Mutex<HashMap<ToolId, ToolRecord>>,
    }

    impl InMemoryToolRegistry {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, record: ToolRecord) {
            self.records.lock().unwrap().insert(record.id, record);
        }
    }

    #[async_trait]
    impl ToolRegistry for InMemoryToolRegistry {
        async fn get(&self, id: ToolId) -> Result<Option<ToolRecord>, EngineError> {
            Ok(self.records.lock().unwrap().get(&id).cloned())
        }

        async fn list_all(&self) -> Result<Vec<ToolRecord>, EngineError> {
            Ok(self.records.lock().unwrap().values().cloned().collect())
        }
    }

    #[derive(Default)]
    pub struct InMemoryOutcomeSink {
        pub appended: Mutex<Vec<TrainingExample>>,
    }

    impl InMemoryOutcomeSink {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl OutcomeSink for InMemoryOutcomeSink {
        async fn append(&self, example: TrainingExample) -> Result<(), EngineError> {
            self.appended.lock().unwrap().push(example);
            Ok(())
        }
    }
}
