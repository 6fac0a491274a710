//! As quatro cabeças do SHGAT, implementadas como variante tagueada em vez
//! de dispatch virtual por nó.

use crate::store::NodeFeatures;
use crate::types::Embedding;
use crate::vector::cosine;
use serde::{Deserialize, Serialize};

/// Contexto de pontuação passado a cada cabeça: o cluster ativo e os pesos
/// aprendidos específicos da cabeça.
#[derive(Debug, Clone, Copy)]
pub struct ScoringContext<'a> {
    pub active_cluster: i32,
    pub candidate_is_semantic_recent_success: f64,
    pub params: &'a HeadParams,
}

/// Parâmetros aprendidos de uma cabeça: projeção semântica opcional,
/// afins de estrutura/temporal, e o escalar de recursão `lambda`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadParams {
    /// Projeção linear aplicada ao cosseno bruto de H1, opcional
    /// (: não é um componente separado, apenas uma
    /// projeção opcional pós-cosseno).
    pub semantic_projection: Option<Vec<f64>>,
    /// Pesos afins de H2: `[w_pagerank, w_cluster_match, w_adamic_adar, bias]`.
    pub structure_affine: [f64; 4],
    /// Pesos afins de H3: `[w_recency, w_recent_success_cooccurrence, bias]`.
    pub temporal_affine: [f64; 3],
    /// `lambda` da contribuição recursiva limitada.
    pub recursion_lambda: f64,
}

impl Default for HeadParams {
    fn default() -> Self {
        Self {
            semantic_projection: None,
            structure_affine: [0.5, 0.3, 0.2, 0.0],
            temporal_affine: [0.6, 0.4, 0.0],
            recursion_lambda: 0.1,
        }
    }
}

/// Uma das quatro cabeças do SHGAT.
#[derive(Debug, Clone, Copy)]
pub enum Head {
    Semantic,
    Structure,
    Temporal,
    Reliability,
}

impl Head {
    pub const ALL: [Head; 4] = [
        Head::Semantic,
        Head::Structure,
        Head::Temporal,
        Head::Reliability,
    ];

    pub fn index(self) -> usize {
        match self {
            Head::Semantic => 0,
            Head::Structure => 1,
            Head::Temporal => 2,
            Head::Reliability => 3,
        }
    }

    /// `contribute(node, intent, ctx) -> scalar`.
    pub fn contribute(
        self,
        candidate_embedding: &Embedding,
        features: &NodeFeatures,
        intent: &Embedding,
        ctx: ScoringContext<'_>,
    ) -> f64 {
        match self {
            Head::Semantic => semantic(candidate_embedding, intent, ctx.params),
            Head::Structure => structure(features, ctx),
            Head::Temporal => temporal(features, ctx),
            Head::Reliability => reliability(features.success_rate),
        }
    }
}

fn semantic(candidate_embedding: &Embedding, intent: &Embedding, params: &HeadParams) -> f64 {
    let raw = cosine(intent.as_slice(), candidate_embedding.as_slice());
    match &params.semantic_projection {
        // Optional learned projection after cosine; a single scalar weight +
        // bias keeps this a projection, not a separate head.
        Some(w) if w.len() >= 2 => (w[0] * raw + w[1]).clamp(-1.0, 1.0),
        _ => raw,
    }
}

/// H2: afim aprendido sobre `(PageRank, cluster-match ∈ {0,1}, Adamic-Adar)`.
fn structure(features: &NodeFeatures, ctx: ScoringContext<'_>) -> f64 {
    let cluster_match = if ctx.active_cluster >= 0 && features.spectral_cluster == ctx.active_cluster
    {
        1.0
    } else {
        0.0
    };
    let [w_pr, w_cluster, w_aa, bias] = ctx.params.structure_affine;
    w_pr * features.pagerank + w_cluster * cluster_match + w_aa * features.adamic_adar + bias
}

/// H3: afim aprendido sobre `(recência, co-ocorrência com candidatos
/// recentes bem-sucedidos)`.
fn temporal(features: &NodeFeatures, ctx: ScoringContext<'_>) -> f64 {
    let [w_recency, w_cooc, bias] = ctx.params.temporal_affine;
    w_recency * features.recency + w_cooc * ctx.candidate_is_semantic_recent_success + bias
}

/// H4: função monótona por partes de `successRate`:
/// `<=0.5` → penalidade rígida de 0.1; `0.5..0.9` → linear; `>0.9` →
/// reforço suave de 1.2, limitado para que a pontuação final não exceda 0.95
/// após a multiplicação pelo peso do gate.
fn reliability(success_rate: f64) -> f64 {
    let success_rate = success_rate.clamp(0.0, 1.0);
    let multiplier = if success_rate <= 0.5 {
        0.1
    } else if success_rate <= 0.9 {
        // Linear ramp from 0.1 at 0.5 to 1.0 at 0.9.
        0.1 + (success_rate - 0.5) / (0.9 - 0.5) * 0.9
    } else {
        1.2
    };
    (success_rate * multiplier).min(0.95)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reliability_is_hard_penalized_at_or_below_half() {
        assert!((reliability(0.45) - 0.45 * 0.1).abs() < 1e-9);
        assert!(reliability(0.45) <= 0.1);
    }

    #[test]
    fn reliability_is_monotone() {
        let mut prev = reliability(0.0);
        for i in 1..=100 {
            let sr = i as f64 / 100.0;
            let cur = reliability(sr);
            assert!(cur + 1e-9 >= prev, "reliability must be monotone at {sr}");
            prev = cur;
        }
    }

    #[test]
    fn reliability_is_clamped_below_point_nine_five() {
        assert!(reliability(1.0) <= 0.95);
    }

    #[test]
    fn semantic_head_without_projection_is_raw_cosine() {
        let a = Embedding::new_unchecked(vec![1.0, 0.0]);
        let b = Embedding::new_unchecked(vec![1.0, 0.0]);
        let params = HeadParams::default();
        assert!((semantic(&a, &b, &params) - 1.0).abs() < 1e-6);
    }
}
