//! Trainer online: perda de entropia cruzada + ranking pareado sobre um
//! stream de exemplos episódicos, otimizado com Adam.
//!
//! O treino opera sobre a pontuação *base* (sem o termo recursivo limitado)
//! de cada candidato, mantendo o caminho de gradiente bem definido — a
//! contribuição recursiva continua sendo um refinamento aditivo limitado
//! aplicado apenas na pontuação servida, não no alvo supervisionado
//! (decisão registrada em `DESIGN.md`).

pub mod optimizer;

use crate::error::EngineError;
use crate::shgat::ShgatScorer;
use crate::spectral::SpectralClusterer;
use crate::store::{FeatureStore, NodeId};
use crate::types::{CapabilityId, Embedding, ToolId};
use crate::vector::softmax;
use optimizer::{AdamConfig, AdamState};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;

/// Estado explícito do motor: transições deliberadas apenas, nunca implícitas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Initialized,
    Training,
    Serving,
    Quarantined { cause: String },
}

#[derive(Debug, Clone)]
pub struct TrainingExample {
    pub intent_embedding: Embedding,
    pub context_tools: Vec<ToolId>,
    pub candidate_capability_id: CapabilityId,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Clone)]
pub struct TrainResult {
    pub epochs_run: u32,
    pub final_loss: f64,
    pub cancelled: bool,
}

const NEGATIVE_SAMPLE_SIZE: usize = 8;
const RANKING_MARGIN: f64 = 0.2;
const DEGENERATE_STEP_LIMIT: u32 = 5;

pub struct OnlineTrainer {
    pub state: EngineState,
    config: AdamConfig,
    batch_size: usize,
    adam_gate: Vec<AdamState>,
    adam_structure: AdamState,
    adam_temporal: AdamState,
    adam_semantic: AdamState,
    rng_seed: u64,
}

impl OnlineTrainer {
    pub fn new(config: AdamConfig, batch_size: usize, num_gate_rows: usize, seed: u64) -> Self {
        Self {
            state: EngineState::Uninitialized,
            config,
            batch_size: batch_size.max(1),
            adam_gate: (0..num_gate_rows).map(|_| AdamState::new(6)).collect(),
            adam_structure: AdamState::new(4),
            adam_temporal: AdamState::new(3),
            adam_semantic: AdamState::new(2),
            rng_seed: seed,
        }
    }

    pub fn mark_initialized(&mut self) {
        if self.state == EngineState::Uninitialized {
            self.state = EngineState::Initialized;
        }
    }

    pub fn quarantine(&mut self, cause: String) {
        self.state = EngineState::Quarantined { cause };
    }

    pub fn recover_from_quarantine(&mut self) -> Result<(), EngineError> {
        match &self.state {
            EngineState::Quarantined { .. } => {
                self.state = EngineState::Initialized;
                Ok(())
            }
            _ => Err(EngineError::PreconditionFailed(
                "engine is not in quarantine".into(),
            )),
        }
    }

    /// `train(epochs, batchSize, callback) -> {epochsRun, finalLoss}`
    ///. Scoring is forbidden while this holds the
    /// conceptual write lock — callers serialize this behind the engine's
    /// `RwLock` (`src/engine.rs`).
    pub fn train(
        &mut self,
        store: &FeatureStore,
        clusterer: &SpectralClusterer,
        scorer: &mut ShgatScorer,
        examples: &[TrainingExample],
        epochs: u32,
        cancellation: Option<&CancellationToken>,
        mut on_epoch: impl FnMut(u32, f64, f64),
    ) -> Result<TrainResult, EngineError> {
        if matches!(self.state, EngineState::Quarantined { .. }) {
            return Err(EngineError::PreconditionFailed(
                "engine is quarantined; call recover_from_quarantine() first".into(),
            ));
        }
        let positives = examples
            .iter()
            .filter(|e| e.outcome == Outcome::Success)
            .count();
        if positives < 2 {
            return Err(EngineError::InsufficientExamples {
                have: positives,
                need: 2,
            });
        }

        self.state = EngineState::Training;
        let rollback = scorer.params.clone();
        let mut rng = StdRng::seed_from_u64(self.rng_seed);
        let mut consecutive_degenerate = 0u32;
        let mut epochs_run = 0u32;
        let mut final_loss = f64::NAN;
        let mut cancelled = false;

        let all_capabilities: Vec<CapabilityId> = store.capabilities().iter().map(|c| c.id).collect();

        'epochs: for epoch in 0..epochs {
            if cancellation.map(|c| c.is_cancelled()).unwrap_or(false) {
                cancelled = true;
                break;
            }
            let mut order: Vec<usize> = (0..examples.len()).collect();
            order.shuffle(&mut rng);

            let mut epoch_loss = 0.0f64;
            let mut correct = 0usize;
            let mut total = 0usize;

            for batch in order.chunks(self.batch_size) {
                if cancellation.map(|c| c.is_cancelled()).unwrap_or(false) {
                    cancelled = true;
                    break 'epochs;
                }
                let mut grad_gate: Vec<Vec<f64>> = scorer
                    .params
                    .gate_weights
                    .iter()
                    .map(|row| vec![0.0; row.len()])
                    .collect();
                let mut grad_structure = [0.0f64; 4];
                let mut grad_temporal = [0.0f64; 3];
                let mut grad_semantic = [0.0f64; 2];

                for &idx in batch {
                    let example = &examples[idx];
                    let step = self.accumulate_example_gradient(
                        store,
                        clusterer,
                        scorer,
                        example,
                        &all_capabilities,
                        &mut rng,
                        &mut grad_gate,
                        &mut grad_structure,
                        &mut grad_temporal,
                        &mut grad_semantic,
                    );
                    if let Some((loss, was_correct)) = step {
                        if !loss.is_finite() {
                            consecutive_degenerate += 1;
                        } else {
                            consecutive_degenerate = 0;
                            epoch_loss += loss;
                        }
                        total += 1;
                        if was_correct {
                            correct += 1;
                        }
                    }
                    if consecutive_degenerate >= DEGENERATE_STEP_LIMIT {
                        scorer.params = rollback;
                        self.state = EngineState::Quarantined {
                            cause: "degenerate loss".into(),
                        };
                        return Err(EngineError::DegenerateLoss {
                            consecutive_steps: consecutive_degenerate,
                        });
                    }
                }

                self.apply_gradients(
                    scorer,
                    &grad_gate,
                    &grad_structure,
                    &grad_temporal,
                    &grad_semantic,
                    batch.len().max(1),
                );
            }

            epochs_run = epoch + 1;
            final_loss = if total > 0 {
                epoch_loss / total as f64
            } else {
                0.0
            };
            let acc = if total > 0 {
                correct as f64 / total as f64
            } else {
                0.0
            };
            on_epoch(epochs_run, final_loss, acc);
        }

        self.state = EngineState::Serving;
        Ok(TrainResult {
            epochs_run,
            final_loss,
            cancelled,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn accumulate_example_gradient(
        &self,
        store: &FeatureStore,
        clusterer: &SpectralClusterer,
        scorer: &ShgatScorer,
        example: &TrainingExample,
        all_capabilities: &[CapabilityId],
        rng: &mut StdRng,
        grad_gate: &mut [Vec<f64>],
        grad_structure: &mut [f64; 4],
        grad_temporal: &mut [f64; 3],
        grad_semantic: &mut [f64; 2],
    ) -> Option<(f64, bool)> {
        if example.outcome != Outcome::Success || all_capabilities.is_empty() {
            return None;
        }
        let active_cluster = clusterer.active_cluster(store, &example.context_tools);

        // Full softmax over all known capabilities for the cross-entropy term.
        let scored = scorer.score_capabilities(
            store,
            clusterer,
            &example.intent_embedding,
            &example.context_tools,
        );
        if scored.is_empty() {
            return None;
        }
        let raw_scores: Vec<f64> = scored.iter().map(|s| s.score).collect();
        let probs = softmax(&raw_scores);
        let true_idx = scored
            .iter()
            .position(|s| s.capability_id == example.candidate_capability_id)?;
        let predicted_idx = probs
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap_or(0);
        let was_correct = predicted_idx == true_idx;
        let loss_ce = -probs[true_idx].max(1e-12).ln();

        // d(cross-entropy)/d(score_c) = P[c] - 1{c == true}
        for (i, cap) in scored.iter().enumerate() {
            let grad_score = probs[i] - if i == true_idx { 1.0 } else { 0.0 };
            self.backprop_score_gradient(
                store,
                scorer,
                cap.capability_id,
                &example.intent_embedding,
                active_cluster,
                grad_score,
                grad_gate,
                grad_structure,
                grad_temporal,
                grad_semantic,
            );
        }

        // Pairwise ranking loss against sampled negatives.
        let negatives: Vec<CapabilityId> = all_capabilities
            .iter()
            .filter(|&&c| c != example.candidate_capability_id)
            .copied()
            .collect::<Vec<_>>()
            .choose_multiple(rng, NEGATIVE_SAMPLE_SIZE.min(all_capabilities.len()))
            .copied()
            .collect();

        let pos_score = scored[true_idx].score;
        let mut loss_rank = 0.0f64;
        for neg in negatives {
            let Some(neg_idx) = scored.iter().position(|s| s.capability_id == neg) else {
                continue;
            };
            let neg_score = scored[neg_idx].score;
            let margin_violation = RANKING_MARGIN - (pos_score - neg_score);
            if margin_violation > 0.0 {
                loss_rank += margin_violation;
                self.backprop_score_gradient(
                    store,
                    scorer,
                    example.candidate_capability_id,
                    &example.intent_embedding,
                    active_cluster,
                    -1.0,
                    grad_gate,
                    grad_structure,
                    grad_temporal,
                    grad_semantic,
                );
                self.backprop_score_gradient(
                    store,
                    scorer,
                    neg,
                    &example.intent_embedding,
                    active_cluster,
                    1.0,
                    grad_gate,
                    grad_structure,
                    grad_temporal,
                    grad_semantic,
                );
            }
        }

        Some((loss_ce + loss_rank, was_correct))
    }

    #[allow(clippy::too_many_arguments)]
    fn backprop_score_gradient(
        &self,
        store: &FeatureStore,
        scorer: &ShgatScorer,
        cap_id: CapabilityId,
        intent: &Embedding,
        active_cluster: i32,
        grad_score: f64,
        grad_gate: &mut [Vec<f64>],
        grad_structure: &mut [f64; 4],
        grad_temporal: &mut [f64; 3],
        grad_semantic: &mut [f64; 2],
    ) {
        use crate::shgat::heads::{Head, ScoringContext};
        let Some(cap) = store.capability(cap_id) else {
            return;
        };
        let Ok(features) = store.get_features(NodeId::Capability(cap_id)) else {
            return;
        };

        let gate_features = [
            features.pagerank,
            if active_cluster >= 0 && features.spectral_cluster == active_cluster {
                1.0
            } else {
                0.0
            },
            features.adamic_adar,
            features.recency,
            features.success_rate,
            1.0,
        ];
        let mut logits = [0.0f64; 4];
        for (h, row) in scorer.params.gate_weights.iter().enumerate().take(4) {
            logits[h] = row
                .iter()
                .zip(gate_features.iter())
                .map(|(w, f)| w.clamp(-50.0, 50.0) * f)
                .sum();
        }
        let alpha = softmax(&logits);

        let mut head_scores = [0.0f64; 4];
        let ctx_base = ScoringContext {
            active_cluster,
            candidate_is_semantic_recent_success: 0.0,
            params: &scorer.params.heads[0],
        };
        for head in Head::ALL {
            let ctx = ScoringContext {
                params: &scorer.params.heads[head.index()],
                ..ctx_base
            };
            let raw = head.contribute(&cap.embedding, features, intent, ctx);
            head_scores[head.index()] = if raw.is_finite() { raw } else { 0.0 };
        }
        let base_score: f64 = head_scores.iter().zip(alpha.iter()).map(|(h, a)| h * a).sum();

        // d(score)/d(z_k) = alpha_k * (h_k - score); chain through the gate logit.
        for k in 0..4.min(alpha.len()) {
            let d_score_d_zk = alpha[k] * (head_scores[k] - base_score);
            let grad_logit = grad_score * d_score_d_zk;
            for (j, f) in gate_features.iter().enumerate() {
                if let Some(row) = grad_gate.get_mut(k) {
                    if let Some(slot) = row.get_mut(j) {
                        *slot += grad_logit * f;
                    }
                }
            }
        }

        // d(score)/d(h_i) = alpha_i, chained into each head's own parameters.
        let cluster_match = if active_cluster >= 0 && features.spectral_cluster == active_cluster {
            1.0
        } else {
            0.0
        };
        let d_structure = grad_score * alpha[Head::Structure.index()];
        grad_structure[0] += d_structure * features.pagerank;
        grad_structure[1] += d_structure * cluster_match;
        grad_structure[2] += d_structure * features.adamic_adar;
        grad_structure[3] += d_structure;

        let d_temporal = grad_score * alpha[Head::Temporal.index()];
        grad_temporal[0] += d_temporal * features.recency;
        grad_temporal[1] += 0.0; // recent-success cooccurrence term not tracked per-example here
        grad_temporal[2] += d_temporal;

        if let Some(w) = &scorer.params.heads[Head::Semantic.index()].semantic_projection {
            if w.len() >= 2 {
                let raw_cosine = crate::vector::cosine(intent.as_slice(), cap.embedding.as_slice());
                let d_semantic = grad_score * alpha[Head::Semantic.index()];
                grad_semantic[0] += d_semantic * raw_cosine;
                grad_semantic[1] += d_semantic;
            }
        }
    }

    fn apply_gradients(
        &mut self,
        scorer: &mut ShgatScorer,
        grad_gate: &[Vec<f64>],
        grad_structure: &[f64; 4],
        grad_temporal: &[f64; 3],
        grad_semantic: &[f64; 2],
        batch_size: usize,
    ) {
        let scale = 1.0 / batch_size as f64;
        for (head_idx, grad_row) in grad_gate.iter().enumerate() {
            if head_idx >= scorer.params.gate_weights.len() {
                continue;
            }
            let scaled: Vec<f64> = grad_row.iter().map(|g| g * scale).collect();
            self.adam_gate[head_idx].step(
                &mut scorer.params.gate_weights[head_idx],
                &scaled,
                &self.config,
            );
        }
        let scaled_structure: Vec<f64> = grad_structure.iter().map(|g| g * scale).collect();
        self.adam_structure.step(
            &mut scorer.params.heads[1].structure_affine,
            &scaled_structure,
            &self.config,
        );
        let scaled_temporal: Vec<f64> = grad_temporal.iter().map(|g| g * scale).collect();
        self.adam_temporal.step(
            &mut scorer.params.heads[2].temporal_affine,
            &scaled_temporal,
            &self.config,
        );
        if let Some(w) = &mut scorer.params.heads[0].semantic_projection {
            let scaled_semantic: Vec<f64> = grad_semantic.iter().map(|g| g * scale).collect();
            self.adam_semantic.step(w, &scaled_semantic, &self.config);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shgat::ShgatScorer;
    use crate::spectral::SpectralClusterer;

    fn fixture() -> (FeatureStore, SpectralClusterer, ShgatScorer) {
        let mut store = FeatureStore::new(2, 1e-3);
        let t0 = store.upsert_tool("fs:read", vec![1.0, 0.0], "fs", "read").unwrap();
        let t1 = store.upsert_tool("json:parse", vec![0.0, 1.0], "json", "parse").unwrap();
        store
            .upsert_capability("cap.a", vec![1.0, 0.0], vec![t0, t1], 0.9)
            .unwrap();
        store
            .upsert_capability("cap.b", vec![0.0, 1.0], vec![t1], 0.5)
            .unwrap();
        let mut clusterer = SpectralClusterer::new(2, 0.85, 1e-6, 100);
        clusterer.recompute_if_needed(&mut store).unwrap();
        let scorer = ShgatScorer::new(2);
        (store, clusterer, scorer)
    }

    #[test]
    fn insufficient_examples_is_rejected() {
        let (store, clusterer, mut scorer) = fixture();
        let mut trainer = OnlineTrainer::new(AdamConfig::default(), 4, 4, 7);
        let err = trainer
            .train(&store, &clusterer, &mut scorer, &[], 1, None, |_, _, _| {})
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientExamples { .. }));
    }

    #[test]
    fn trains_to_serving_state_with_enough_examples() {
        let (store, clusterer, mut scorer) = fixture();
        let cap_a = store.capability_id_by_external("cap.a").unwrap();
        let examples: Vec<TrainingExample> = (0..4)
            .map(|_| TrainingExample {
                intent_embedding: Embedding::new_unchecked(vec![1.0, 0.0]),
                context_tools: vec![],
                candidate_capability_id: cap_a,
                outcome: Outcome::Success,
            })
            .collect();
        let mut trainer = OnlineTrainer::new(AdamConfig::default(), 4, 4, 7);
        let result = trainer
            .train(&store, &clusterer, &mut scorer, &examples, 3, None, |_, _, _| {})
            .unwrap();
        assert_eq!(trainer.state, EngineState::Serving);
        assert!(result.epochs_run >= 1);
        assert!(result.final_loss.is_finite());
    }

    #[test]
    fn cancellation_yields_partial_result_and_leaves_serving_state_usable() {
        let (store, clusterer, mut scorer) = fixture();
        let cap_a = store.capability_id_by_external("cap.a").unwrap();
        let examples: Vec<TrainingExample> = (0..4)
            .map(|_| TrainingExample {
                intent_embedding: Embedding::new_unchecked(vec![1.0, 0.0]),
                context_tools: vec![],
                candidate_capability_id: cap_a,
                outcome: Outcome::Success,
            })
            .collect();
        let token = CancellationToken::new();
        token.cancel();
        let mut trainer = OnlineTrainer::new(AdamConfig::default(), 4, 4, 7);
        let result = trainer
            .train(
                &store,
                &clusterer,
                &mut scorer,
                &examples,
                1000,
                Some(&token),
                |_, _, _| {},
            )
            .unwrap();
        assert!(result.cancelled);
        assert_eq!(result.epochs_run, 0);
    }
}
