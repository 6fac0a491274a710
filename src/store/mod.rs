//! Feature store e modelo de incidência.
//!
//! Expõe `upsert_tool`, `upsert_capability`, `update_feature`, `get_features`,
//! `incidence`, `iter_hyperedges`. A matriz de incidência é recomputada sob
//! disciplina de rebuild-and-swap sempre que o bit de sujeira é marcado por
//! uma mutação; o spectral clusterer consome esse bit (`src/spectral`).

pub mod arena;
pub mod incidence;

use crate::error::EngineError;
use crate::types::{CapabilityId, Embedding, ToolId};
use arena::{CapabilityArena, CapabilityNode, ToolArena, ToolMeta, ToolNode};
use incidence::{build_hyperedges, CsrIncidence, Hyperedge};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Vetor de feature por nó (`F_n` em).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeFeatures {
    pub pagerank: f64,
    pub louvain_community: i64,
    /// Id de cluster espectral; -1 reservado para "sem cluster ativo".
    pub spectral_cluster: i32,
    pub adamic_adar: f64,
    /// Recência temporal em [0,1].
    pub recency: f64,
    pub success_rate: f64,
    pub usage_count: u64,
    /// Cacheado apenas em nós `Tool`.
    pub hypergraph_pagerank: Option<f64>,
    /// Cacheado apenas em nós `Capability`.
    pub heat_diffusion: Option<f64>,
}

impl Default for NodeFeatures {
    fn default() -> Self {
        Self {
            pagerank: 0.0,
            louvain_community: -1,
            spectral_cluster: -1,
            adamic_adar: 0.0,
            recency: 0.0,
            success_rate: 0.0,
            usage_count: 0,
            hypergraph_pagerank: None,
            heat_diffusion: None,
        }
    }
}

/// Patch parcial aplicado por `update_feature`; campos `None` preservam o
/// valor atual.
#[derive(Debug, Clone, Default)]
pub struct FeaturePatch {
    pub pagerank: Option<f64>,
    pub louvain_community: Option<i64>,
    pub spectral_cluster: Option<i32>,
    pub adamic_adar: Option<f64>,
    pub recency: Option<f64>,
    pub success_rate: Option<f64>,
    pub usage_count: Option<u64>,
    pub hypergraph_pagerank: Option<f64>,
    pub heat_diffusion: Option<f64>,
}

impl NodeFeatures {
    fn apply(&mut self, patch: &FeaturePatch) {
        if let Some(v) = patch.pagerank {
            self.pagerank = v;
        }
        if let Some(v) = patch.louvain_community {
            self.louvain_community = v;
        }
        if let Some(v) = patch.spectral_cluster {
            self.spectral_cluster = v;
        }
        if let Some(v) = patch.adamic_adar {
            self.adamic_adar = v;
        }
        if let Some(v) = patch.recency {
            self.recency = v;
        }
        if let Some(v) = patch.success_rate {
            self.success_rate = v;
        }
        if let Some(v) = patch.usage_count {
            self.usage_count = v;
        }
        if patch.hypergraph_pagerank.is_some() {
            self.hypergraph_pagerank = patch.hypergraph_pagerank;
        }
        if patch.heat_diffusion.is_some() {
            self.heat_diffusion = patch.heat_diffusion;
        }
    }
}

/// Identificador de um nó em qualquer uma das duas arenas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeId {
    Tool(ToolId),
    Capability(CapabilityId),
}

/// Store de features + incidência: arenas, features por nó, cache de
/// hiperedges e bit de sujeira que dispara a recomputação espectral lazy
///.
#[derive(Debug, Clone)]
pub struct FeatureStore {
    embedding_dim: usize,
    success_rate_epsilon: f64,
    tools: ToolArena,
    capabilities: CapabilityArena,
    tool_features: Vec<NodeFeatures>,
    capability_features: Vec<NodeFeatures>,
    external_tool_index: HashMap<String, ToolId>,
    external_cap_index: HashMap<String, CapabilityId>,
    incidence: CsrIncidence,
    hyperedges: Vec<Hyperedge>,
    dirty: bool,
}

impl FeatureStore {
    pub fn new(embedding_dim: usize, success_rate_epsilon: f64) -> Self {
        Self {
            embedding_dim,
            success_rate_epsilon,
            tools: ToolArena::new(),
            capabilities: CapabilityArena::new(),
            tool_features: Vec::new(),
            capability_features: Vec::new(),
            external_tool_index: HashMap::new(),
            external_cap_index: HashMap::new(),
            incidence: CsrIncidence::default(),
            hyperedges: Vec::new(),
            dirty: true,
        }
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    /// Insere (ou atualiza, se `external_id` já existe) um nó `Tool`.
    pub fn upsert_tool(
        &mut self,
        external_id: &str,
        embedding: Vec<f64>,
        server_id: &str,
        name: &str,
    ) -> Result<ToolId, EngineError> {
        if embedding.len() != self.embedding_dim {
            return Err(EngineError::DimensionMismatch {
                expected: self.embedding_dim,
                got: embedding.len(),
            });
        }
        let mut emb = Embedding::new(embedding, self.embedding_dim)
            .map_err(EngineError::InvalidEmbedding)?;
        emb.l2_normalize();

        if let Some(&id) = self.external_tool_index.get(external_id) {
            let node = self.tools.get_mut(id).expect("indexed tool must exist");
            node.embedding = emb;
            node.meta.server_id = server_id.to_string();
            node.meta.name = name.to_string();
            self.dirty = true;
            return Ok(id);
        }

        let meta = ToolMeta {
            external_id: external_id.to_string(),
            server_id: server_id.to_string(),
            name: name.to_string(),
        };
        let id = self.tools.insert(emb, meta);
        self.tool_features.push(NodeFeatures::default());
        self.external_tool_index.insert(external_id.to_string(), id);
        self.dirty = true;
        Ok(id)
    }

    /// Insere (ou atualiza) um nó `Capability`. `tools_used` deve ser
    /// não-vazio e referenciar apenas ids existentes.
    pub fn upsert_capability(
        &mut self,
        external_id: &str,
        embedding: Vec<f64>,
        tools_used: Vec<ToolId>,
        success_rate: f64,
    ) -> Result<CapabilityId, EngineError> {
        if tools_used.is_empty() {
            return Err(EngineError::EmptyCapability(external_id.to_string()));
        }
        for &t in &tools_used {
            if self.tools.get(t).is_none() {
                return Err(EngineError::UnknownNode(t.to_string()));
            }
        }
        if embedding.len() != self.embedding_dim {
            return Err(EngineError::DimensionMismatch {
                expected: self.embedding_dim,
                got: embedding.len(),
            });
        }
        let mut emb = Embedding::new(embedding, self.embedding_dim)
            .map_err(EngineError::InvalidEmbedding)?;
        emb.l2_normalize();

        if let Some(&id) = self.external_cap_index.get(external_id) {
            let node = self
                .capabilities
                .get_mut(id)
                .expect("indexed capability must exist");
            node.embedding = emb;
            node.tools_used = tools_used;
            node.success_rate = success_rate;
            self.capability_features[id.index()].success_rate = success_rate;
            self.dirty = true;
            return Ok(id);
        }

        let id = self
            .capabilities
            .insert(external_id.to_string(), emb, tools_used, success_rate);
        let mut features = NodeFeatures::default();
        features.success_rate = success_rate;
        self.capability_features.push(features);
        self.external_cap_index.insert(external_id.to_string(), id);
        self.dirty = true;
        Ok(id)
    }

    pub fn update_feature(&mut self, id: NodeId, patch: FeaturePatch) -> Result<(), EngineError> {
        match id {
            NodeId::Tool(t) => {
                let f = self
                    .tool_features
                    .get_mut(t.index())
                    .ok_or_else(|| EngineError::UnknownNode(t.to_string()))?;
                f.apply(&patch);
            }
            NodeId::Capability(c) => {
                let f = self
                    .capability_features
                    .get_mut(c.index())
                    .ok_or_else(|| EngineError::UnknownNode(c.to_string()))?;
                f.apply(&patch);
            }
        }
        self.dirty = true;
        Ok(())
    }

    pub fn get_features(&self, id: NodeId) -> Result<&NodeFeatures, EngineError> {
        match id {
            NodeId::Tool(t) => self
                .tool_features
                .get(t.index())
                .ok_or_else(|| EngineError::UnknownNode(t.to_string())),
            NodeId::Capability(c) => self
                .capability_features
                .get(c.index())
                .ok_or_else(|| EngineError::UnknownNode(c.to_string())),
        }
    }

    pub fn tool(&self, id: ToolId) -> Option<&ToolNode> {
        self.tools.get(id)
    }

    pub fn capability(&self, id: CapabilityId) -> Option<&CapabilityNode> {
        self.capabilities.get(id)
    }

    pub fn tools(&self) -> &ToolArena {
        &self.tools
    }

    pub fn capabilities(&self) -> &CapabilityArena {
        &self.capabilities
    }

    pub fn tool_id_by_external(&self, external_id: &str) -> Option<ToolId> {
        self.external_tool_index.get(external_id).copied()
    }

    pub fn capability_id_by_external(&self, external_id: &str) -> Option<CapabilityId> {
        self.external_cap_index.get(external_id).copied()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Recomputa a matriz de incidência e o cache de hiperedges quando o bit
    /// de sujeira está setado; no-op caso contrário (idempotência observável
    /// só via o bit `dirty`).
    pub fn recompute_incidence_if_dirty(&mut self) {
        if !self.dirty {
            return;
        }
        self.incidence = CsrIncidence::rebuild(&self.tools, &self.capabilities);
        self.hyperedges = build_hyperedges(&self.capabilities, self.success_rate_epsilon);
        self.dirty = false;
    }

    pub fn incidence(&self) -> &CsrIncidence {
        &self.incidence
    }

    pub fn iter_hyperedges(&self) -> impl Iterator<Item = &Hyperedge> {
        self.hyperedges.iter()
    }

    pub fn hyperedge(&self, id: CapabilityId) -> Option<&Hyperedge> {
        self.hyperedges.iter().find(|h| h.id == id)
    }

    /// Atualiza as estatísticas de execução de uma capability após um
    /// resultado observado: incrementa
    /// `usage_count`, recalcula a média corrente de `success_rate`, e marca
    /// a capability como recém-usada (`recency = 1.0`).
    pub fn record_capability_outcome(
        &mut self,
        id: CapabilityId,
        success: bool,
    ) -> Result<(), EngineError> {
        let node = self
            .capabilities
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownCapability(id.to_string()))?;
        let n = node.usage_count + 1;
        let prior_successes = node.success_rate * node.usage_count as f64;
        let successes = prior_successes + if success { 1.0 } else { 0.0 };
        node.usage_count = n;
        node.success_rate = successes / n as f64;
        let success_rate = node.success_rate;

        let features = self
            .capability_features
            .get_mut(id.index())
            .ok_or_else(|| EngineError::UnknownCapability(id.to_string()))?;
        features.success_rate = success_rate;
        features.usage_count = n;
        features.recency = 1.0;
        self.dirty = true;
        Ok(())
    }
}
