//! SHGAT: o escorer de atenção multi-cabeça heterogêneo estruturado
//!.
//!
//! Quatro cabeças (`heads::Head`) produzem contribuições escalares por
//! candidato; um gate softmax por nó as combina, e um termo recursivo
//! limitado adiciona a contribuição média dos vizinhos (capabilities que
//! compartilham >= 1 ferramenta). Todas as pontuações finais vivem em
//! `[0, 0.95]`.

pub mod heads;

use crate::error::EngineError;
use crate::spectral::SpectralClusterer;
use crate::store::{FeatureStore, NodeFeatures};
use crate::types::{CapabilityId, Embedding, ToolId};
use crate::vector::softmax;
use heads::{Head, HeadParams, ScoringContext};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

/// Dimensão do vetor de feature de gate: `[pagerank, cluster_match,
/// adamic_adar, recency, success_rate, bias]`.
const GATE_FEATURE_DIM: usize = 6;
const NUM_HEADS: usize = 4;
const SCORE_CEILING: f64 = 0.95;

/// Parâmetros do modelo SHGAT, de propriedade exclusiva do escorer durante
/// sua vida útil e mutados apenas pelo trainer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShgatParams {
    pub heads: [HeadParams; NUM_HEADS],
    /// `W_gate`, forma `[NUM_HEADS][GATE_FEATURE_DIM]`, clipado em ±50 antes
    /// do softmax.
    pub gate_weights: Vec<Vec<f64>>,
}

impl Default for ShgatParams {
    fn default() -> Self {
        Self {
            heads: [
                HeadParams::default(),
                HeadParams::default(),
                HeadParams::default(),
                HeadParams::default(),
            ],
            gate_weights: vec![vec![1.0 / GATE_FEATURE_DIM as f64; GATE_FEATURE_DIM]; NUM_HEADS],
        }
    }
}

impl ShgatParams {
    fn shape_descriptor(&self) -> String {
        format!(
            "heads={},gate_rows={},gate_cols={}",
            self.heads.len(),
            self.gate_weights.len(),
            self.gate_weights.first().map(|r| r.len()).unwrap_or(0)
        )
    }
}

/// Estatísticas observáveis do escorer.
#[derive(Debug, Default)]
pub struct ScorerStats {
    pub unstable_head: AtomicU64,
}

/// Pontuação detalhada de um candidato, retornada por `scoreCapabilities`.
#[derive(Debug, Clone)]
pub struct CapabilityScore {
    pub capability_id: CapabilityId,
    pub score: f64,
    pub head_scores: [f64; NUM_HEADS],
    pub head_weights: [f64; NUM_HEADS],
}

#[derive(Debug, Clone)]
pub struct ToolScore {
    pub tool_id: ToolId,
    pub score: f64,
}

/// Scorer SHGAT: possui os parâmetros do modelo e expõe as operações de
/// pontuação e registro do.
pub struct ShgatScorer {
    pub params: ShgatParams,
    pub stats: ScorerStats,
    pub max_recursion_layers: usize,
}

impl ShgatScorer {
    pub fn new(max_recursion_layers: usize) -> Self {
        Self {
            params: ShgatParams::default(),
            stats: ScorerStats::default(),
            max_recursion_layers,
        }
    }

    fn gate_feature_vector(features: &NodeFeatures, active_cluster: i32) -> [f64; GATE_FEATURE_DIM] {
        let cluster_match = if active_cluster >= 0 && features.spectral_cluster == active_cluster {
            1.0
        } else {
            0.0
        };
        [
            features.pagerank,
            cluster_match,
            features.adamic_adar,
            features.recency,
            features.success_rate,
            1.0,
        ]
    }

    fn gate_weights(&self, features: &NodeFeatures, active_cluster: i32) -> [f64; NUM_HEADS] {
        let feature_vec = Self::gate_feature_vector(features, active_cluster);
        let mut logits = [0.0f64; NUM_HEADS];
        for (h, row) in self.params.gate_weights.iter().enumerate().take(NUM_HEADS) {
            let mut acc = 0.0f64;
            for (w, f) in row.iter().zip(feature_vec.iter()) {
                acc += w.clamp(-50.0, 50.0) * f;
            }
            logits[h] = acc;
        }
        let weights = softmax(&logits);
        let mut out = [0.0f64; NUM_HEADS];
        out.copy_from_slice(&weights[..NUM_HEADS.min(weights.len())]);
        out
    }

    /// Pontua uma única capability sem o termo recursivo (usado como base
    /// pela propagação recursiva limitada em [`Self::propagate_recursive_term`]).
    fn score_capability_base(
        &self,
        store: &FeatureStore,
        cap_id: CapabilityId,
        intent: &Embedding,
        active_cluster: i32,
        recent_success_cooccurrence: f64,
    ) -> Option<CapabilityScore> {
        let cap = store.capability(cap_id)?;
        let features = store
            .get_features(crate::store::NodeId::Capability(cap_id))
            .ok()?;

        let gate = self.gate_weights(features, active_cluster);
        let ctx = ScoringContext {
            active_cluster,
            candidate_is_semantic_recent_success: recent_success_cooccurrence,
            params: &self.params.heads[0],
        };

        let mut head_scores = [0.0f64; NUM_HEADS];
        for head in Head::ALL {
            let ctx = ScoringContext {
                params: &self.params.heads[head.index()],
                ..ctx
            };
            let raw = head.contribute(&cap.embedding, features, intent, ctx);
            head_scores[head.index()] = if raw.is_finite() {
                raw
            } else {
                self.stats.unstable_head.fetch_add(1, Ordering::Relaxed);
                0.0
            };
        }

        let combined: f64 = head_scores
            .iter()
            .zip(gate.iter())
            .map(|(h, a)| h * a)
            .sum();

        Some(CapabilityScore {
            capability_id: cap_id,
            score: combined.clamp(0.0, SCORE_CEILING),
            head_scores,
            head_weights: gate,
        })
    }

    /// Propaga o termo recursivo limitado `lambda * mean(score(neighbors))`
    /// por até `max_recursion_layers` rodadas de troca de mensagens com os
    /// vizinhos diretos (capabilities que compartilham ao menos uma
    /// ferramenta), na base inteira de candidatos já pontuados. Cada rodada usa o score da rodada
    /// anterior, então L rodadas alcançam um raio de até L saltos no grafo de
    /// incidência, não apenas o vizinho direto.
    fn propagate_recursive_term(&self, store: &FeatureStore, scored: &mut [CapabilityScore]) {
        let lambda: f64 = self
            .params
            .heads
            .iter()
            .map(|h| h.recursion_lambda)
            .sum::<f64>()
            / self.params.heads.len() as f64;

        if lambda == 0.0 || self.max_recursion_layers == 0 {
            return;
        }

        let mut index_of: std::collections::HashMap<CapabilityId, usize> =
            std::collections::HashMap::with_capacity(scored.len());
        for (i, s) in scored.iter().enumerate() {
            index_of.insert(s.capability_id, i);
        }
        let neighbor_indices: Vec<Vec<usize>> = scored
            .iter()
            .map(|s| {
                store
                    .incidence()
                    .capabilities_sharing_tools(s.capability_id)
                    .into_iter()
                    .filter_map(|n| index_of.get(&n).copied())
                    .collect()
            })
            .collect();

        let mut current: Vec<f64> = scored.iter().map(|s| s.score).collect();
        for _ in 0..self.max_recursion_layers {
            let mut next = current.clone();
            for (i, neighbors) in neighbor_indices.iter().enumerate() {
                if neighbors.is_empty() {
                    continue;
                }
                let mean: f64 =
                    neighbors.iter().map(|&n| current[n]).sum::<f64>() / neighbors.len() as f64;
                next[i] = (current[i] + lambda * mean).clamp(0.0, SCORE_CEILING);
            }
            current = next;
        }

        for (s, score) in scored.iter_mut().zip(current) {
            s.score = score;
        }
    }

    fn tie_break_hash(external_id: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        external_id.hash(&mut hasher);
        hasher.finish()
    }

    /// `scoreCapabilities(intentEmbedding, contextTools) -> ranked list`
    ///. Total sobre todas as capabilities conhecidas; nunca
    /// retorna erro.
    pub fn score_capabilities(
        &self,
        store: &FeatureStore,
        clusterer: &SpectralClusterer,
        intent: &Embedding,
        context_tools: &[ToolId],
    ) -> Vec<CapabilityScore> {
        let active_cluster = clusterer.active_cluster(store, context_tools);
        let candidates: Vec<CapabilityId> = store.capabilities().iter().map(|c| c.id).collect();

        // Sharded across worker threads when the `rayon` feature is enabled;
        // candidate order is fixed before sharding so output order stays
        // stable regardless of thread count.
        #[cfg(feature = "rayon")]
        let mut scored: Vec<CapabilityScore> = {
            use rayon::prelude::*;
            candidates
                .par_iter()
                .filter_map(|&id| self.score_capability_base(store, id, intent, active_cluster, 0.0))
                .collect()
        };
        #[cfg(not(feature = "rayon"))]
        let mut scored: Vec<CapabilityScore> = candidates
            .iter()
            .filter_map(|&id| self.score_capability_base(store, id, intent, active_cluster, 0.0))
            .collect();

        self.propagate_recursive_term(store, &mut scored);

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let sa = store.capability(a.capability_id).map(|c| c.success_rate).unwrap_or(0.0);
                    let sb = store.capability(b.capability_id).map(|c| c.success_rate).unwrap_or(0.0);
                    sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| {
                    let ha = store
                        .capability(a.capability_id)
                        .map(|c| Self::tie_break_hash(&c.external_id))
                        .unwrap_or(0);
                    let hb = store
                        .capability(b.capability_id)
                        .map(|c| Self::tie_break_hash(&c.external_id))
                        .unwrap_or(0);
                    ha.cmp(&hb)
                })
        });
        scored
    }

    /// `scoreTools(intentEmbedding, contextTools) -> ranked list`, análogo a
    /// `scoreCapabilities` mas sem o termo recursivo (vizinhança recursiva é
    /// definida apenas entre capabilities).
    pub fn score_tools(
        &self,
        store: &FeatureStore,
        clusterer: &SpectralClusterer,
        intent: &Embedding,
        context_tools: &[ToolId],
    ) -> Vec<ToolScore> {
        let active_cluster = clusterer.active_cluster(store, context_tools);
        let mut scored: Vec<ToolScore> = store
            .tools()
            .iter()
            .filter_map(|tool| {
                let features = store
                    .get_features(crate::store::NodeId::Tool(tool.id))
                    .ok()?;
                let gate = self.gate_weights(features, active_cluster);
                let ctx = ScoringContext {
                    active_cluster,
                    candidate_is_semantic_recent_success: 0.0,
                    params: &self.params.heads[0],
                };
                let mut head_scores = [0.0f64; NUM_HEADS];
                for head in Head::ALL {
                    let ctx = ScoringContext {
                        params: &self.params.heads[head.index()],
                        ..ctx
                    };
                    let raw = head.contribute(&tool.embedding, features, intent, ctx);
                    head_scores[head.index()] = if raw.is_finite() {
                        raw
                    } else {
                        self.stats.unstable_head.fetch_add(1, Ordering::Relaxed);
                        0.0
                    };
                }
                let combined: f64 = head_scores.iter().zip(gate.iter()).map(|(h, a)| h * a).sum();
                Some(ToolScore {
                    tool_id: tool.id,
                    score: combined.clamp(0.0, SCORE_CEILING),
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let ha = store
                        .tool(a.tool_id)
                        .map(|t| Self::tie_break_hash(&t.meta.external_id))
                        .unwrap_or(0);
                    let hb = store
                        .tool(b.tool_id)
                        .map(|t| Self::tie_break_hash(&t.meta.external_id))
                        .unwrap_or(0);
                    ha.cmp(&hb)
                })
        });
        scored
    }

    /// Bytes opacos compactos via `bincode`.
    pub fn snapshot_params(&self) -> Result<Vec<u8>, EngineError> {
        bincode::serialize(&self.params)
            .map_err(|e| EngineError::Internal(format!("snapshot serialization failed: {e}")))
    }

    /// `loadParams(bytes) -> {}`; rejeita bytes cuja forma não bate com a do
    /// modelo atual.
    pub fn load_params(&mut self, bytes: &[u8]) -> Result<(), EngineError> {
        let loaded: ShgatParams = bincode::deserialize(bytes)
            .map_err(|e| EngineError::Internal(format!("snapshot deserialization failed: {e}")))?;
        let expected = self.params.shape_descriptor();
        let got = loaded.shape_descriptor();
        if expected != got {
            return Err(EngineError::IncompatibleShape { expected, got });
        }
        self.params = loaded;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectral::SpectralClusterer;

    fn fixture() -> (FeatureStore, SpectralClusterer) {
        let mut store = FeatureStore::new(2, 1e-3);
        let t0 = store
            .upsert_tool("fs:read", vec![1.0, 0.0], "fs", "read")
            .unwrap();
        let t1 = store
            .upsert_tool("json:parse", vec![0.0, 1.0], "json", "parse")
            .unwrap();
        store
            .upsert_capability("cap.fs.read_json", vec![1.0, 0.0], vec![t0, t1], 0.95)
            .unwrap();
        let mut clusterer = SpectralClusterer::new(2, 0.85, 1e-6, 100);
        clusterer.recompute_if_needed(&mut store).unwrap();
        (store, clusterer)
    }

    #[test]
    fn scores_are_bounded() {
        let (store, clusterer) = fixture();
        let scorer = ShgatScorer::new(2);
        let intent = Embedding::new_unchecked(vec![1.0, 0.0]);
        let scores = scorer.score_capabilities(&store, &clusterer, &intent, &[]);
        for s in &scores {
            assert!(s.score >= 0.0 && s.score <= 0.95 + 1e-9);
        }
    }

    #[test]
    fn gate_weights_sum_to_one() {
        let (store, clusterer) = fixture();
        let scorer = ShgatScorer::new(2);
        let intent = Embedding::new_unchecked(vec![1.0, 0.0]);
        let scores = scorer.score_capabilities(&store, &clusterer, &intent, &[]);
        for s in &scores {
            let sum: f64 = s.head_weights.iter().sum();
            assert!((sum - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn scores_every_known_capability() {
        let (store, clusterer) = fixture();
        let scorer = ShgatScorer::new(2);
        let intent = Embedding::new_unchecked(vec![1.0, 0.0]);
        let scores = scorer.score_capabilities(&store, &clusterer, &intent, &[]);
        assert_eq!(scores.len(), store.capabilities().len());
    }

    #[test]
    fn recursive_term_reaches_two_hop_neighbors_within_two_layers() {
        let mut store = FeatureStore::new(2, 1e-3);
        let t0 = store.upsert_tool("t0", vec![1.0, 0.0], "s", "t0").unwrap();
        let t1 = store.upsert_tool("t1", vec![0.0, 1.0], "s", "t1").unwrap();
        let t2 = store.upsert_tool("t2", vec![1.0, 1.0], "s", "t2").unwrap();
        let t3 = store.upsert_tool("t3", vec![0.0, 0.0], "s", "t3").unwrap();
        // Chain a-b-c, so c is two hops from a only through shared tools.
        store
            .upsert_capability("cap.a", vec![1.0, 0.0], vec![t0, t1], 0.95)
            .unwrap();
        store
            .upsert_capability("cap.b", vec![0.0, 1.0], vec![t1, t2], 0.95)
            .unwrap();
        store
            .upsert_capability("cap.c", vec![1.0, 1.0], vec![t2, t3], 0.95)
            .unwrap();
        let mut clusterer = SpectralClusterer::new(2, 0.85, 1e-6, 100);
        clusterer.recompute_if_needed(&mut store).unwrap();

        let mut one_layer = ShgatScorer::new(1);
        one_layer.params.heads.iter_mut().for_each(|h| h.recursion_lambda = 0.3);
        let mut two_layer = ShgatScorer::new(2);
        two_layer.params.heads.iter_mut().for_each(|h| h.recursion_lambda = 0.3);

        let intent = Embedding::new_unchecked(vec![1.0, 0.0]);
        let scores_1 = one_layer.score_capabilities(&store, &clusterer, &intent, &[]);
        let scores_2 = two_layer.score_capabilities(&store, &clusterer, &intent, &[]);

        let cap_c_id = store
            .capabilities()
            .iter()
            .find(|c| c.external_id == "cap.c")
            .unwrap()
            .id;
        let score_c_1 = scores_1.iter().find(|s| s.capability_id == cap_c_id).unwrap().score;
        let score_c_2 = scores_2.iter().find(|s| s.capability_id == cap_c_id).unwrap().score;
        assert!(
            score_c_2 >= score_c_1,
            "two layers of propagation should let cap.a's score reach cap.c at least as \
             strongly as a single layer: one_layer={score_c_1}, two_layer={score_c_2}"
        );
    }

    #[test]
    fn snapshot_round_trips() {
        let scorer = ShgatScorer::new(2);
        let bytes = scorer.snapshot_params().unwrap();
        let mut other = ShgatScorer::new(2);
        other.load_params(&bytes).unwrap();
        assert_eq!(
            other.params.shape_descriptor(),
            scorer.params.shape_descriptor()
        );
    }

    #[test]
    fn incompatible_shape_is_rejected() {
        let scorer = ShgatScorer::new(2);
        let mut bad = scorer.params.clone();
        bad.gate_weights.push(vec![0.0; GATE_FEATURE_DIM]);
        let bytes = bincode::serialize(&bad).unwrap();
        let mut target = ShgatScorer::new(2);
        assert!(target.load_params(&bytes).is_err());
    }

    proptest::proptest! {
        #[test]
        fn scores_stay_bounded_for_arbitrary_intents(
            intent_raw in proptest::collection::vec(-5.0f64..5.0, 2..3),
        ) {
            let (store, clusterer) = fixture();
            let scorer = ShgatScorer::new(2);
            let intent = Embedding::new_unchecked(intent_raw);
            let scores = scorer.score_capabilities(&store, &clusterer, &intent, &[]);
            for s in &scores {
                proptest::prop_assert!(s.score >= 0.0 && s.score <= SCORE_CEILING + 1e-9);
            }
        }

        #[test]
        fn gate_weights_sum_to_one_for_arbitrary_intents(
            intent_raw in proptest::collection::vec(-5.0f64..5.0, 2..3),
        ) {
            let (store, clusterer) = fixture();
            let scorer = ShgatScorer::new(2);
            let intent = Embedding::new_unchecked(intent_raw);
            let scores = scorer.score_capabilities(&store, &clusterer, &intent, &[]);
            for s in &scores {
                let sum: f64 = s.head_weights.iter().sum();
                proptest::prop_assert!((sum - 1.0).abs() < 1e-6);
            }
        }
    }
}
